//! # Viability: brute-force viability kernel estimation
//!
//! Estimates the *viability kernel* of a discrete-time dynamical system: the
//! set of states from which some sequence of actions avoids failure forever.
//! The state and action spaces are covered by rectilinear grids, a
//! user-supplied oracle ([`model::TransitionModel`]) is evaluated once per
//! state-action grid point, and the kernel is then found by iterated pruning
//! over the resulting transition table.
//!
//! ## Pipeline
//!
//! | Phase | Rust module | Description |
//! |-------|-------------|-------------|
//! | 0 | [`grid`] | Validate axes, flatten/unflatten indices, digitize successors into bins |
//! | 1 | [`transition_map`] / [`parallel`] | One oracle call per grid point; record `Q_map`, `Q_F`, `Q_on_grid` |
//! | 2 | [`viability_kernel`] | Prune pairs whose successor leaves the kernel estimate until `S_V` is stable |
//! | 3 | [`measure`] | Project `Q_V` onto state space (`S_M`) and back-map it into Q-space (`Q_M`) |
//! | 4 | [`storage`] | Persist grids, tables and measures as a versioned JSON artifact |
//!
//! ## Index layout
//!
//! Every Q-space array has shape `states.shape() ++ actions.shape()` and is
//! enumerated row-major, so flat index `i` is the same state-action pair in
//! `Q_map`, `Q_F`, `Q_on_grid`, `Q_V` and `Q_M`. Bins along an axis with `n`
//! nodes are numbered `0..=n`: bin `b` covers `[g[b-1], g[b])`, with bins `0`
//! and `n` open towards minus and plus infinity.
//!
//! ## Failure model
//!
//! An oracle may report failure as data ([`model::StepOutcome::failed`]) or
//! raise an [`model::OracleError`]. The former lands in `Q_F`; the latter
//! aborts the whole build with [`error::ViabilityError::Oracle`].

pub mod constants;
pub mod env_config;
pub mod error;
pub mod grid;
pub mod measure;
pub mod model;
pub mod parallel;
pub mod storage;
pub mod transition_map;
pub mod types;
pub mod viability_kernel;

pub use error::{Result, ViabilityError};
pub use grid::{Grid, Grids};
pub use measure::{back_map, feasibility_mask, project, project_any, project_mean, project_sum};
pub use model::{OracleError, StepOutcome, TransitionModel, ViabilityProblem};
pub use parallel::{evaluate_batch, par_compute_transition_map, WorkerPool};
pub use storage::{load_artifact, save_artifact, ViabilityArtifact};
pub use transition_map::{compute_transition_map, evaluate_point};
pub use types::{MapOptions, TransitionTable, ViableSet};
pub use viability_kernel::compute_viable_set;
