//! Core data structures: transition table, viable set, and build options.
//!
//! All Q-space arrays share the shape `state_grid_shape ++ action_grid_shape`
//! and are stored as dense row-major [`ArrayD`]s. Internally the builder and
//! the solver work on flat buffers and wrap them with [`from_flat`] at the
//! end, so flat index `i` of every Q-space array refers to the same
//! state-action pair (see [`crate::grid::Grids::state_action`]).

use ndarray::{Array2, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ViabilityError};
use crate::grid::{num_elements, Grids};

/// Options for building a transition table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapOptions {
    /// Detect successors that land exactly on a grid node and store their
    /// grid index instead of a bin index.
    pub check_grid: bool,
    /// Also keep the raw decoded successor of every point.
    pub keep_coords: bool,
}

impl MapOptions {
    pub fn with_check_grid(mut self, check_grid: bool) -> Self {
        self.check_grid = check_grid;
        self
    }

    pub fn with_keep_coords(mut self, keep_coords: bool) -> Self {
        self.keep_coords = keep_coords;
        self
    }
}

/// Raw transition table `(Q_map, Q_F, Q_on_grid)`, built once per grid
/// configuration and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionTable {
    /// Flattened successor index. A bin index over `states.bin_shape()`, or a
    /// grid index over `states.shape()` where `q_on_grid` is set. Zero for
    /// failed pairs, and one past the last bin for successors beyond the
    /// grid in every dimension.
    pub q_map: ArrayD<usize>,
    /// True where the transition failed.
    pub q_f: ArrayD<bool>,
    /// True where the successor is exactly a grid node.
    pub q_on_grid: ArrayD<bool>,
    /// Decoded successor of every point, `(num_points, state_dims)`, when
    /// requested with [`MapOptions::keep_coords`].
    pub reached: Option<Array2<f64>>,
}

impl TransitionTable {
    /// Shape shared by every Q-space array of this table.
    pub fn shape(&self) -> &[usize] {
        self.q_map.shape()
    }

    /// `~Q_F`: the pairs that did not fail, the default solver seed.
    pub fn not_failed(&self) -> ArrayD<bool> {
        self.q_f.mapv(|failed| !failed)
    }

    pub fn num_failed(&self) -> usize {
        self.q_f.iter().filter(|&&f| f).count()
    }

    /// Check every array against the Q-space shape of `grids`.
    pub fn validate(&self, grids: &Grids) -> Result<()> {
        let expected = grids.q_shape();
        check_shape("Q_map", &expected, self.q_map.shape())?;
        check_shape("Q_F", &expected, self.q_f.shape())?;
        check_shape("Q_on_grid", &expected, self.q_on_grid.shape())?;
        if let Some(reached) = &self.reached {
            check_shape(
                "reached",
                &[grids.num_points(), grids.states.ndim()],
                reached.shape(),
            )?;
        }
        Ok(())
    }
}

/// Fixed point of the viability solver.
#[derive(Debug, Clone, PartialEq)]
pub struct ViableSet {
    /// Viable state-action pairs, Q-space shaped.
    pub q_v: ArrayD<bool>,
    /// Viability kernel estimate, state-grid shaped: `OR` of `q_v` over actions.
    pub s_v: ArrayD<bool>,
    /// Number of pruning passes run.
    pub iterations: usize,
    /// Viable pair count at the seed and after every pass.
    pub viable_history: Vec<usize>,
}

impl ViableSet {
    /// True when no state is viable. A valid outcome, not an error.
    pub fn is_empty(&self) -> bool {
        !self.s_v.iter().any(|&v| v)
    }

    pub fn num_viable_pairs(&self) -> usize {
        self.q_v.iter().filter(|&&v| v).count()
    }

    pub fn num_viable_states(&self) -> usize {
        self.s_v.iter().filter(|&&v| v).count()
    }
}

pub(crate) fn check_shape(what: &'static str, expected: &[usize], actual: &[usize]) -> Result<()> {
    if expected != actual {
        return Err(ViabilityError::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

/// Wrap a row-major buffer as an array of the given shape.
pub fn from_flat<T>(shape: &[usize], data: Vec<T>) -> Result<ArrayD<T>> {
    if num_elements(shape) != data.len() {
        return Err(ViabilityError::ShapeMismatch {
            what: "flat buffer",
            expected: shape.to_vec(),
            actual: vec![data.len()],
        });
    }
    ArrayD::from_shape_vec(IxDyn(shape), data).map_err(|_| ViabilityError::ShapeMismatch {
        what: "flat buffer",
        expected: shape.to_vec(),
        actual: shape.to_vec(),
    })
}

/// Row-major copy of an array's elements, independent of its memory layout.
pub(crate) fn to_flat<T: Clone>(array: &ArrayD<T>) -> Vec<T> {
    array.iter().cloned().collect()
}
