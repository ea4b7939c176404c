//! Viability kernel: iterated backward pruning of the viable set.
//!
//! Starting from the non-failing pairs `Q_V = ~Q_F`, every pass removes the
//! pairs whose successor is *outside* the current kernel estimate `S_V`, then
//! re-projects `S_V = OR_a Q_V`. The loop stops at the first pass that leaves
//! `S_V` unchanged. `Q_V` only ever loses entries, so the loop terminates in
//! at most `|Q_V|` passes.
//!
//! ## Outside test
//!
//! - successor exactly on node `n` (`Q_on_grid`): outside iff `!S_V[n]`
//! - successor in a cell: outside iff the cell has no in-range corner, or any
//!   corner is not in `S_V`
//!
//! The cell rule is pessimistic: a cell touching a single non-viable node
//! counts as unsafe. Near the grid border this can under-estimate the
//! kernel, which is accepted in exchange for never over-estimating it.
//!
//! Every pass reads the `S_V` computed by the previous pass only; pruning
//! within a pass never feeds back into the same pass.

use std::time::Instant;

use ndarray::ArrayD;
use tracing::{debug, info, warn};

use crate::error::{Result, ViabilityError};
use crate::grid::{num_elements, push_corners, unflatten, Grid};
use crate::measure::any_over_actions;
use crate::transition_map::off_grid_index;
use crate::types::{check_shape, from_flat, to_flat, TransitionTable, ViableSet};

/// Resolves a `Q_map` entry to the flat state-grid nodes it depends on.
pub struct SuccessorLookup {
    grid_shape: Vec<usize>,
    bin_shape: Vec<usize>,
    num_nodes: usize,
    off_grid: usize,
}

impl SuccessorLookup {
    pub fn new(states: &Grid) -> Self {
        let grid_shape = states.shape();
        Self {
            num_nodes: num_elements(&grid_shape),
            grid_shape,
            bin_shape: states.bin_shape(),
            off_grid: off_grid_index(states),
        }
    }

    /// Fill `out` with the flat node indices the successor depends on: the
    /// single node when `on_grid`, else the in-range corners of the bin.
    ///
    /// `out` is left empty for successors with no node on the grid.
    pub fn nodes_into(&self, q_map_value: usize, on_grid: bool, out: &mut Vec<usize>) {
        out.clear();
        if on_grid {
            if q_map_value < self.num_nodes {
                out.push(q_map_value);
            }
            return;
        }
        if q_map_value >= self.off_grid {
            return;
        }
        let bin = unflatten(q_map_value, &self.bin_shape);
        push_corners(&bin, &self.grid_shape, out);
    }
}

/// Whether a successor lies outside the kernel estimate `s_v` (flat, row-major).
pub fn is_outside(nodes: &[usize], s_v: &[bool]) -> bool {
    nodes.is_empty() || nodes.iter().any(|&n| !s_v[n])
}

/// Compute the maximal viable set and the viability kernel.
///
/// `seed` replaces the default starting set `~Q_F`; it is intersected with
/// `~Q_F` so failed pairs can never be viable. The trailing dimensions of
/// the table beyond `states.ndim()` are the action dimensions.
pub fn compute_viable_set(
    table: &TransitionTable,
    states: &Grid,
    seed: Option<&ArrayD<bool>>,
) -> Result<ViableSet> {
    let shape = table.shape().to_vec();
    let state_shape = states.shape();
    if shape.len() < state_shape.len() || shape[..state_shape.len()] != state_shape[..] {
        return Err(ViabilityError::ShapeMismatch {
            what: "Q_map state dimensions",
            expected: state_shape,
            actual: shape,
        });
    }
    check_shape("Q_F", &shape, table.q_f.shape())?;
    check_shape("Q_on_grid", &shape, table.q_on_grid.shape())?;
    if let Some(seed) = seed {
        check_shape("Q_V seed", &shape, seed.shape())?;
    }

    let n_actions = num_elements(&shape[state_shape.len()..]);
    let q_map = to_flat(&table.q_map);
    let q_f = to_flat(&table.q_f);
    let q_on_grid = to_flat(&table.q_on_grid);
    let mut q_v: Vec<bool> = match seed {
        Some(seed) => seed.iter().zip(&q_f).map(|(&v, &f)| v && !f).collect(),
        None => q_f.iter().map(|&f| !f).collect(),
    };

    let lookup = SuccessorLookup::new(states);
    let mut s_v = any_over_actions(&q_v, n_actions);
    let mut viable = q_v.iter().filter(|&&v| v).count();
    let mut viable_history = vec![viable];
    let mut iterations = 0usize;
    let mut nodes = Vec::with_capacity(1 << states.ndim());

    info!(
        pairs = q_v.len(),
        viable,
        viable_states = s_v.iter().filter(|&&v| v).count(),
        "computing viable set"
    );
    let start = Instant::now();

    loop {
        iterations += 1;
        let mut pruned = 0usize;
        for (q, entry) in q_v.iter_mut().enumerate() {
            if !*entry {
                continue;
            }
            lookup.nodes_into(q_map[q], q_on_grid[q], &mut nodes);
            if is_outside(&nodes, &s_v) {
                *entry = false;
                pruned += 1;
            }
        }

        let next_s_v = any_over_actions(&q_v, n_actions);
        viable -= pruned;
        viable_history.push(viable);
        debug!(
            iteration = iterations,
            pruned,
            viable,
            viable_states = next_s_v.iter().filter(|&&v| v).count(),
            "pruning pass"
        );

        if next_s_v == s_v {
            break;
        }
        s_v = next_s_v;
    }

    let viable_states = s_v.iter().filter(|&&v| v).count();
    info!(
        iterations,
        viable,
        viable_states,
        elapsed_secs = start.elapsed().as_secs_f64(),
        "viable set converged"
    );
    if viable_states == 0 {
        warn!("viability kernel is empty");
    }

    Ok(ViableSet {
        q_v: from_flat(&shape, q_v)?,
        s_v: from_flat(&state_shape, s_v)?,
        iterations,
        viable_history,
    })
}
