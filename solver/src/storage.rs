//! JSON persistence of a finished viability computation.
//!
//! An artifact bundles the grids, the transition table, the viable set and
//! the measures together with the model parameters and initial state used to
//! produce them. Grids are re-validated on load, and the array shapes are
//! checked against them.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use ndarray::ArrayD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::constants::ARTIFACT_FORMAT_VERSION;
use crate::error::{Result, ViabilityError};
use crate::grid::Grids;
use crate::types::{check_shape, TransitionTable, ViableSet};

/// Everything a caller needs to reload and inspect a computed kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViabilityArtifact<P> {
    pub format_version: u32,
    pub grids: Grids,
    pub q_map: ArrayD<usize>,
    pub q_f: ArrayD<bool>,
    pub q_v: ArrayD<bool>,
    pub q_m: ArrayD<f64>,
    pub s_m: ArrayD<f64>,
    pub params: P,
    pub initial_state: Vec<f64>,
}

impl<P> ViabilityArtifact<P> {
    /// Assemble an artifact from the pipeline outputs.
    pub fn new(
        grids: Grids,
        table: &TransitionTable,
        viable: &ViableSet,
        s_m: ArrayD<f64>,
        q_m: ArrayD<f64>,
        params: P,
        initial_state: Vec<f64>,
    ) -> Self {
        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            grids,
            q_map: table.q_map.clone(),
            q_f: table.q_f.clone(),
            q_v: viable.q_v.clone(),
            q_m,
            s_m,
            params,
            initial_state,
        }
    }

    /// Check the format version and every array shape against the grids.
    pub fn validate(&self) -> Result<()> {
        if self.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(ViabilityError::FormatVersion {
                expected: ARTIFACT_FORMAT_VERSION,
                found: self.format_version,
            });
        }
        let q_shape = self.grids.q_shape();
        check_shape("Q_map", &q_shape, self.q_map.shape())?;
        check_shape("Q_F", &q_shape, self.q_f.shape())?;
        check_shape("Q_V", &q_shape, self.q_v.shape())?;
        check_shape("Q_M", &q_shape, self.q_m.shape())?;
        check_shape("S_M", &self.grids.states.shape(), self.s_m.shape())?;
        Ok(())
    }
}

/// Write `artifact` as JSON, creating parent directories as needed.
pub fn save_artifact<P: Serialize>(artifact: &ViabilityArtifact<P>, path: &Path) -> Result<()> {
    let start_time = Instant::now();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, artifact)?;
    writer.flush()?;
    info!(
        path = %path.display(),
        elapsed_ms = start_time.elapsed().as_secs_f64() * 1000.0,
        "saved viability artifact"
    );
    Ok(())
}

/// Read and validate an artifact written by [`save_artifact`].
pub fn load_artifact<P: DeserializeOwned>(path: &Path) -> Result<ViabilityArtifact<P>> {
    let start_time = Instant::now();
    let reader = BufReader::new(File::open(path)?);
    let artifact: ViabilityArtifact<P> = serde_json::from_reader(reader)?;
    artifact.validate()?;
    info!(
        path = %path.display(),
        elapsed_ms = start_time.elapsed().as_secs_f64() * 1000.0,
        "loaded viability artifact"
    );
    Ok(artifact)
}
