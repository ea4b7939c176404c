//! Shared environment configuration for the binaries.
//!
//! Consolidates the `VIBLY_BASE_PATH` and `VIBLY_NUM_THREADS` reads. The
//! library core never reads the environment; everything it needs arrives
//! through [`crate::model::ViabilityProblem`] and explicit arguments.

use std::path::PathBuf;

use crate::constants::DEFAULT_NUM_THREADS;

/// Read `VIBLY_BASE_PATH` (default `"."`) and chdir into it. Exits on failure.
pub fn init_base_path() -> PathBuf {
    let base_path = std::env::var("VIBLY_BASE_PATH").unwrap_or_else(|_| ".".to_string());
    println!("VIBLY_BASE_PATH={}", base_path);
    let path = PathBuf::from(&base_path);
    if std::env::set_current_dir(&base_path).is_err() {
        eprintln!("Failed to change directory to {}", base_path);
        std::process::exit(1);
    }
    if let Ok(cwd) = std::env::current_dir() {
        println!("Working directory: {}", cwd.display());
    }
    path
}

/// Read `VIBLY_NUM_THREADS` (fallback `RAYON_NUM_THREADS`, default 8).
///
/// Zero and unparsable values fall back to the default.
pub fn num_threads() -> usize {
    parse_threads(
        std::env::var("VIBLY_NUM_THREADS")
            .or_else(|_| std::env::var("RAYON_NUM_THREADS"))
            .ok(),
    )
}

fn parse_threads(raw: Option<String>) -> usize {
    raw.and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_NUM_THREADS)
}
