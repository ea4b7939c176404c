//! Projection between state-action space and state space.
//!
//! - [`project`] reduces a Q-space array over its trailing action dimensions
//!   with any aggregator; [`project_any`], [`project_mean`] and
//!   [`project_sum`] cover the usual cases (kernel membership, fraction of
//!   viable actions, count of viable actions).
//! - [`back_map`] lifts a state-space measure `S_M` back to Q-space by
//!   averaging it over the nodes each viable pair's successor touches.
//! - [`feasibility_mask`] marks pairs that pass a cheap a-priori predicate,
//!   so callers can skip expensive evaluations.

use ndarray::ArrayD;

use crate::error::{Result, ViabilityError};
use crate::grid::{num_elements, Grid};
use crate::model::{TransitionModel, ViabilityProblem};
use crate::types::{check_shape, from_flat, to_flat, TransitionTable};
use crate::viability_kernel::SuccessorLookup;

/// `OR` over consecutive runs of `n_actions` entries of a flat Q-space buffer.
pub(crate) fn any_over_actions(q: &[bool], n_actions: usize) -> Vec<bool> {
    q.chunks(n_actions.max(1))
        .map(|actions| actions.iter().any(|&v| v))
        .collect()
}

/// Reduce `q` over its last `n_action_dims` dimensions.
///
/// `aggregate` receives, for every state, the row-major slice of that
/// state's action entries. The result has the leading (state) shape of `q`.
pub fn project<T, U, F>(q: &ArrayD<T>, n_action_dims: usize, mut aggregate: F) -> Result<ArrayD<U>>
where
    T: Clone,
    F: FnMut(&[T]) -> U,
{
    let shape = q.shape();
    if n_action_dims > shape.len() {
        return Err(ViabilityError::DimensionMismatch {
            expected: shape.len(),
            actual: n_action_dims,
        });
    }
    let split = shape.len() - n_action_dims;
    let state_shape = shape[..split].to_vec();
    let n_actions = num_elements(&shape[split..]);

    let flat = to_flat(q);
    let reduced = flat.chunks(n_actions.max(1)).map(&mut aggregate).collect();
    from_flat(&state_shape, reduced)
}

/// Kernel membership: true where any action is viable.
pub fn project_any(q_v: &ArrayD<bool>, n_action_dims: usize) -> Result<ArrayD<bool>> {
    project(q_v, n_action_dims, |actions| actions.iter().any(|&v| v))
}

/// Fraction of viable actions per state.
pub fn project_mean(q_v: &ArrayD<bool>, n_action_dims: usize) -> Result<ArrayD<f64>> {
    project(q_v, n_action_dims, |actions| {
        if actions.is_empty() {
            0.0
        } else {
            actions.iter().filter(|&&v| v).count() as f64 / actions.len() as f64
        }
    })
}

/// Number of viable actions per state.
pub fn project_sum(q_v: &ArrayD<bool>, n_action_dims: usize) -> Result<ArrayD<f64>> {
    project(q_v, n_action_dims, |actions| {
        actions.iter().filter(|&&v| v).count() as f64
    })
}

/// Lift a state-space measure into state-action space.
///
/// For every viable pair: the exact node value of `s_m` when the successor
/// is on a node, else the mean of `s_m` over the successor cell's in-range
/// corners. Non-viable pairs, and viable pairs without any in-range node,
/// stay at 0.
pub fn back_map(
    table: &TransitionTable,
    s_m: &ArrayD<f64>,
    states: &Grid,
    q_v: &ArrayD<bool>,
) -> Result<ArrayD<f64>> {
    let shape = table.shape().to_vec();
    if shape.len() < states.ndim() || shape[..states.ndim()] != states.shape()[..] {
        return Err(ViabilityError::ShapeMismatch {
            what: "Q_map state dimensions",
            expected: states.shape(),
            actual: shape,
        });
    }
    check_shape("S_M", &states.shape(), s_m.shape())?;
    check_shape("Q_V", &shape, q_v.shape())?;
    check_shape("Q_on_grid", &shape, table.q_on_grid.shape())?;

    let s_m = to_flat(s_m);
    let q_map = to_flat(&table.q_map);
    let q_on_grid = to_flat(&table.q_on_grid);
    let lookup = SuccessorLookup::new(states);
    let mut nodes = Vec::with_capacity(1 << states.ndim());

    let q_m: Vec<f64> = q_v
        .iter()
        .enumerate()
        .map(|(q, &viable)| {
            if !viable {
                return 0.0;
            }
            lookup.nodes_into(q_map[q], q_on_grid[q], &mut nodes);
            if nodes.is_empty() {
                0.0
            } else {
                nodes.iter().map(|&n| s_m[n]).sum::<f64>() / nodes.len() as f64
            }
        })
        .collect();

    from_flat(&shape, q_m)
}

/// Q-space mask of pairs whose encoded state and parameters satisfy
/// `feasible`. The oracle is never called.
pub fn feasibility_mask<M, F>(problem: &ViabilityProblem<M>, feasible: F) -> Result<ArrayD<bool>>
where
    M: TransitionModel,
    F: Fn(&[f64], &M::Params) -> bool,
{
    let grids = problem.grids();
    let mask = (0..grids.num_points())
        .map(|point| {
            let (x, p) = problem.encode_point(point);
            feasible(&x, &p)
        })
        .collect();
    from_flat(&grids.q_shape(), mask)
}
