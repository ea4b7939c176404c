//! Sequential transition-map builder: evaluate the oracle on every
//! state-action grid point and bin the successors.
//!
//! Points are enumerated in row-major order over `states.shape() ++
//! actions.shape()`, so flat index `i` of every output array is Q-space
//! point `i`. The parallel driver ([`crate::parallel`]) shares the recording
//! step ([`TableRecorder`]) so both builders produce identical tables.
//!
//! Successor encoding in `Q_map`:
//!
//! | Case | `Q_on_grid` | `Q_map` |
//! |------|-------------|---------|
//! | failed | false | 0 |
//! | exactly on a node (with `check_grid`) | true | flat grid index over `shape()` |
//! | inside or next to the grid | false | flat bin index over `bin_shape()` |
//! | beyond the grid range in every dimension, or not finite | false | [`off_grid_index`] |

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::constants::PROGRESS_REPORT_INTERVAL_SECS;
use crate::error::{Result, ViabilityError};
use crate::grid::{flatten, num_elements, Grid, Grids};
use crate::model::{StepOutcome, TransitionModel, ViabilityProblem};
use crate::types::{from_flat, MapOptions, TransitionTable};

/// `Q_map` value of a successor that left the grid range in every dimension.
///
/// One past the last flat bin index, so it never aliases a real bin and its
/// corner set is empty.
pub fn off_grid_index(states: &Grid) -> usize {
    num_elements(&states.bin_shape())
}

/// Evaluate the oracle on a single encoded point.
///
/// An oracle error is tagged with the point's flat index. A reported failure
/// is returned as data.
pub fn evaluate_point<M: TransitionModel>(
    model: &M,
    point: usize,
    state: &[f64],
    params: &M::Params,
) -> Result<StepOutcome> {
    model
        .step(state, params)
        .map_err(|e| ViabilityError::Oracle {
            point,
            message: e.0,
        })
}

/// Progress tracker for the oracle sweep.
struct BuildProgress {
    total: usize,
    start_time: Instant,
    last_report_time: Instant,
}

impl BuildProgress {
    fn new(total: usize) -> Self {
        let now = Instant::now();
        Self {
            total,
            start_time: now,
            last_report_time: now,
        }
    }

    fn report(&mut self, completed: usize) {
        let now = Instant::now();
        if completed < self.total
            && now.duration_since(self.last_report_time).as_secs_f64()
                < PROGRESS_REPORT_INTERVAL_SECS
        {
            return;
        }
        self.last_report_time = now;

        let elapsed = now.duration_since(self.start_time).as_secs_f64();
        let rate = completed as f64 / elapsed.max(f64::EPSILON);
        let eta = (self.total - completed) as f64 / rate.max(f64::EPSILON);
        info!(
            completed,
            total = self.total,
            pct = completed as f64 / self.total.max(1) as f64 * 100.0,
            rate,
            eta_secs = eta,
            "transition map progress"
        );
    }
}

/// Accumulates per-point results into the flat buffers of a
/// [`TransitionTable`].
pub(crate) struct TableRecorder<'g> {
    grids: &'g Grids,
    options: MapOptions,
    grid_shape: Vec<usize>,
    bin_shape: Vec<usize>,
    q_map: Vec<usize>,
    q_f: Vec<bool>,
    q_on_grid: Vec<bool>,
    reached: Option<Vec<f64>>,
    off_grid: usize,
    non_finite: usize,
}

impl<'g> TableRecorder<'g> {
    pub(crate) fn new(grids: &'g Grids, options: MapOptions) -> Self {
        let total = grids.num_points();
        Self {
            grids,
            options,
            grid_shape: grids.states.shape(),
            bin_shape: grids.states.bin_shape(),
            q_map: vec![0; total],
            q_f: vec![false; total],
            q_on_grid: vec![false; total],
            reached: options
                .keep_coords
                .then(|| Vec::with_capacity(total * grids.states.ndim())),
            off_grid: 0,
            non_finite: 0,
        }
    }

    /// Record the oracle outcome of Q-space point `point`.
    ///
    /// Only successful outcomes are decoded strictly. A failed outcome is
    /// decoded only for `keep_coords`, and a decode of the wrong
    /// dimensionality is kept as a row of NaN. Points must be recorded in
    /// increasing order when `keep_coords` is set.
    pub(crate) fn record_outcome<M: TransitionModel>(
        &mut self,
        problem: &ViabilityProblem<M>,
        point: usize,
        outcome: &StepOutcome,
        params: &M::Params,
    ) -> Result<()> {
        if outcome.failed {
            self.q_f[point] = true;
            if let Some(reached) = self.reached.as_mut() {
                let ndim = self.grid_shape.len();
                let s_next = problem.model().decode(&outcome.next_state, params);
                if s_next.len() == ndim {
                    reached.extend_from_slice(&s_next);
                } else {
                    reached.extend(std::iter::repeat(f64::NAN).take(ndim));
                }
            }
            return Ok(());
        }

        let s_next = problem.decode_checked(&outcome.next_state, params)?;
        if let Some(reached) = self.reached.as_mut() {
            reached.extend_from_slice(&s_next);
        }
        self.record_successor(point, &s_next)
    }

    fn record_successor(&mut self, point: usize, s_next: &[f64]) -> Result<()> {
        let states = &self.grids.states;
        if s_next.iter().any(|v| !v.is_finite()) {
            self.non_finite += 1;
            self.q_map[point] = off_grid_index(states);
        } else if self.options.check_grid && states.contains_node(s_next)? {
            self.q_on_grid[point] = true;
            self.q_map[point] = flatten(&states.nearest(s_next)?, &self.grid_shape);
        } else if beyond_grid(states, s_next) {
            self.off_grid += 1;
            self.q_map[point] = off_grid_index(states);
        } else {
            self.q_map[point] = flatten(&states.digitize(s_next)?, &self.bin_shape);
        }
        Ok(())
    }

    pub(crate) fn finish(self) -> Result<TransitionTable> {
        let shape = self.grids.q_shape();
        let total = self.grids.num_points();
        let failed = self.q_f.iter().filter(|&&f| f).count();
        let on_grid = self.q_on_grid.iter().filter(|&&g| g).count();
        if self.off_grid > 0 || self.non_finite > 0 {
            warn!(
                off_grid = self.off_grid,
                non_finite = self.non_finite,
                total,
                "successors left the state grid or are not finite; recorded as non-viable"
            );
        }
        debug!(total, failed, on_grid, "transition table recorded");

        let reached = match self.reached {
            Some(flat) => Some(
                ndarray::Array2::from_shape_vec((total, self.grids.states.ndim()), flat).map_err(
                    |_| ViabilityError::ShapeMismatch {
                        what: "reached",
                        expected: vec![total, self.grids.states.ndim()],
                        actual: vec![total],
                    },
                )?,
            ),
            None => None,
        };

        Ok(TransitionTable {
            q_map: from_flat(&shape, self.q_map)?,
            q_f: from_flat(&shape, self.q_f)?,
            q_on_grid: from_flat(&shape, self.q_on_grid)?,
            reached,
        })
    }
}

/// True when `s` lies strictly outside the axis range in every dimension.
fn beyond_grid(states: &Grid, s: &[f64]) -> bool {
    s.iter().zip(states.axes()).all(|(&v, axis)| {
        let (lo, hi) = (axis[0], axis[axis.len() - 1]);
        v < lo || v > hi
    })
}

/// Build the transition table on the calling thread.
///
/// One oracle call per grid point, in row-major order. Aborts on the first
/// oracle error, or before any call when the decoder does not match the
/// state grid; reported failures are recorded in `Q_F`.
pub fn compute_transition_map<M: TransitionModel>(
    problem: &ViabilityProblem<M>,
    options: MapOptions,
) -> Result<TransitionTable> {
    let grids = problem.grids();
    let total = grids.num_points();
    info!(
        total,
        state_shape = ?grids.states.shape(),
        action_shape = ?grids.actions.shape(),
        check_grid = options.check_grid,
        "computing transition map"
    );
    problem.check_decoder()?;
    let start = Instant::now();
    let mut progress = BuildProgress::new(total);
    let mut recorder = TableRecorder::new(grids, options);

    for point in 0..total {
        let (x, p) = problem.encode_point(point);
        let outcome = evaluate_point(problem.model(), point, &x, &p)?;
        recorder.record_outcome(problem, point, &outcome, &p)?;
        progress.report(point + 1);
    }

    let table = recorder.finish()?;
    info!(
        elapsed_secs = start.elapsed().as_secs_f64(),
        failed = table.num_failed(),
        "transition map complete"
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OracleError;
    use ndarray::IxDyn;

    /// s' = s - a, failing below zero.
    struct Subtract;

    impl TransitionModel for Subtract {
        type Params = ();

        fn encode(&self, sa: &[f64], _: &()) -> (Vec<f64>, ()) {
            (vec![sa[0] - sa[1]], ())
        }

        fn step(&self, x: &[f64], _: &()) -> std::result::Result<StepOutcome, OracleError> {
            if x[0] < 0.0 {
                Ok(StepOutcome::failed(x.to_vec()))
            } else {
                Ok(StepOutcome::ok(x.to_vec()))
            }
        }

        fn decode(&self, x: &[f64], _: &()) -> Vec<f64> {
            x.to_vec()
        }
    }

    struct Broken;

    impl TransitionModel for Broken {
        type Params = ();

        fn encode(&self, sa: &[f64], _: &()) -> (Vec<f64>, ()) {
            (vec![sa[0]], ())
        }

        fn step(&self, x: &[f64], _: &()) -> std::result::Result<StepOutcome, OracleError> {
            if x[0] > 0.5 {
                Err(OracleError("stiff system".into()))
            } else {
                Ok(StepOutcome::ok(vec![x[0]]))
            }
        }

        fn decode(&self, x: &[f64], _: &()) -> Vec<f64> {
            x.to_vec()
        }
    }

    /// s' = s - a; a failed step reports no successor at all.
    struct FailsEmpty;

    impl TransitionModel for FailsEmpty {
        type Params = ();

        fn encode(&self, sa: &[f64], _: &()) -> (Vec<f64>, ()) {
            (vec![sa[0] - sa[1]], ())
        }

        fn step(&self, x: &[f64], _: &()) -> std::result::Result<StepOutcome, OracleError> {
            if x[0] < 0.0 {
                Ok(StepOutcome::failed(vec![]))
            } else {
                Ok(StepOutcome::ok(x.to_vec()))
            }
        }

        fn decode(&self, x: &[f64], _: &()) -> Vec<f64> {
            x.to_vec()
        }
    }

    /// Identity, except that node 1 maps to NaN.
    struct NanAtOne;

    impl TransitionModel for NanAtOne {
        type Params = ();

        fn encode(&self, sa: &[f64], _: &()) -> (Vec<f64>, ()) {
            (vec![sa[0]], ())
        }

        fn step(&self, x: &[f64], _: &()) -> std::result::Result<StepOutcome, OracleError> {
            if x[0] == 1.0 {
                Ok(StepOutcome::ok(vec![f64::NAN]))
            } else {
                Ok(StepOutcome::ok(x.to_vec()))
            }
        }

        fn decode(&self, x: &[f64], _: &()) -> Vec<f64> {
            x.to_vec()
        }
    }

    fn grids(states: &[f64], actions: &[f64]) -> Grids {
        Grids::new(
            Grid::new(vec![states.to_vec()]).unwrap(),
            Grid::new(vec![actions.to_vec()]).unwrap(),
        )
    }

    #[test]
    fn test_failed_pairs_recorded() {
        let problem = ViabilityProblem::new(Subtract, (), vec![0.0], grids(&[0.0, 1.0, 2.0], &[0.0, 1.0])).unwrap();
        let table = compute_transition_map(&problem, MapOptions::default()).unwrap();
        assert_eq!(table.shape(), &[3, 2]);
        assert!(table.q_f[IxDyn(&[0, 1])]);
        assert_eq!(table.num_failed(), 1);
        // 2 - 1 = 1 lands in bin 2 (g[1] <= 1 < g[2]).
        assert_eq!(table.q_map[IxDyn(&[2, 1])], 2);
        assert_eq!(table.q_map[IxDyn(&[0, 1])], 0);
        assert!(table.reached.is_none());
    }

    #[test]
    fn test_check_grid_stores_node_index() {
        let problem = ViabilityProblem::new(Subtract, (), vec![0.0], grids(&[0.0, 1.0, 2.0], &[0.0, 0.5])).unwrap();
        let table =
            compute_transition_map(&problem, MapOptions::default().with_check_grid(true)).unwrap();
        // 1 - 0 = 1 is node 1.
        assert!(table.q_on_grid[IxDyn(&[1, 0])]);
        assert_eq!(table.q_map[IxDyn(&[1, 0])], 1);
        // 1 - 0.5 = 0.5 lies in bin 1.
        assert!(!table.q_on_grid[IxDyn(&[1, 1])]);
        assert_eq!(table.q_map[IxDyn(&[1, 1])], 1);
    }

    #[test]
    fn test_keep_coords_records_every_point() {
        let problem = ViabilityProblem::new(Subtract, (), vec![0.0], grids(&[0.0, 1.0], &[0.0, 1.0])).unwrap();
        let table =
            compute_transition_map(&problem, MapOptions::default().with_keep_coords(true)).unwrap();
        let reached = table.reached.unwrap();
        assert_eq!(reached.shape(), &[4, 1]);
        assert_eq!(reached[[1, 0]], -1.0);
        assert_eq!(reached[[2, 0]], 1.0);
    }

    #[test]
    fn test_oracle_error_aborts_build() {
        let problem = ViabilityProblem::new(Broken, (), vec![0.0], grids(&[0.0, 1.0], &[0.0])).unwrap();
        let err = compute_transition_map(&problem, MapOptions::default()).unwrap_err();
        assert!(matches!(err, ViabilityError::Oracle { point: 1, .. }));
    }

    #[test]
    fn test_successor_beyond_grid_gets_sentinel() {
        let problem = ViabilityProblem::new(Subtract, (), vec![0.0], grids(&[5.0, 6.0], &[-10.0])).unwrap();
        let table = compute_transition_map(&problem, MapOptions::default()).unwrap();
        let states = Grid::new(vec![vec![5.0, 6.0]]).unwrap();
        assert_eq!(table.q_map[IxDyn(&[0, 0])], off_grid_index(&states));
        assert_eq!(off_grid_index(&states), 3);
    }

    #[test]
    fn test_failed_outcome_without_successor_is_data() {
        let problem =
            ViabilityProblem::new(FailsEmpty, (), vec![0.0], grids(&[0.0, 1.0, 2.0], &[0.0, 1.0]))
                .unwrap();
        let table =
            compute_transition_map(&problem, MapOptions::default().with_keep_coords(true)).unwrap();
        assert_eq!(
            table.q_f.iter().copied().collect::<Vec<_>>(),
            vec![false, true, false, false, false, false]
        );
        let reached = table.reached.unwrap();
        assert!(reached[[1, 0]].is_nan());
        assert_eq!(reached[[2, 0]], 1.0);
    }

    #[test]
    fn test_non_finite_successor_is_pruned() {
        let problem =
            ViabilityProblem::new(NanAtOne, (), vec![0.0], grids(&[0.0, 1.0, 2.0], &[0.0])).unwrap();
        let table = compute_transition_map(&problem, MapOptions::default()).unwrap();
        let states = &problem.grids().states;
        assert_eq!(table.q_map[IxDyn(&[1, 0])], off_grid_index(states));
        assert!(!table.q_f[IxDyn(&[1, 0])]);

        let viable = crate::viability_kernel::compute_viable_set(&table, states, None).unwrap();
        assert!(!viable.q_v[IxDyn(&[1, 0])]);
        assert_eq!(
            viable.s_v.iter().copied().collect::<Vec<_>>(),
            vec![false, false, true]
        );
    }
}
