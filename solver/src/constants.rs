//! Shared constants: defaults and persisted-format identifiers.

/// Worker count when neither `VIBLY_NUM_THREADS` nor `RAYON_NUM_THREADS` is set.
pub const DEFAULT_NUM_THREADS: usize = 8;

/// Minimum seconds between progress log lines during long sweeps.
pub const PROGRESS_REPORT_INTERVAL_SECS: f64 = 0.5;

/// Version stamped into saved viability artifacts.
///
/// Bump whenever the serialized layout of [`crate::storage::ViabilityArtifact`]
/// changes.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Default directory for artifacts written by the binaries.
pub const DEFAULT_ARTIFACT_DIR: &str = "data/dynamics";
