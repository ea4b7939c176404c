//! Parallel transition-map driver on an explicit, caller-owned worker pool.
//!
//! The build is split into three passes:
//!
//! | Pass | Threads | Work |
//! |------|---------|------|
//! | 1 | caller | check the decoder, encode every grid point into `(state, params)` |
//! | 2 | pool | run the oracle on every encoded pair |
//! | 3 | caller | bin successors via the shared [`TableRecorder`] |
//!
//! Pass 2 uses rayon's indexed `par_iter().collect()`, which places result
//! `i` at position `i` regardless of completion order. Workers only read the
//! model and their own input pair, so no locking is needed.

use std::time::Instant;

use rayon::prelude::*;
use tracing::info;

use crate::env_config;
use crate::error::Result;
use crate::model::{StepOutcome, TransitionModel, ViabilityProblem};
use crate::transition_map::{evaluate_point, TableRecorder};
use crate::types::{MapOptions, TransitionTable};

/// Fixed-size worker pool for oracle evaluation.
///
/// Created by the caller before the parallel pass; its threads shut down when
/// the pool is dropped.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// Build a pool with `num_threads` workers (0 lets rayon choose).
    pub fn new(num_threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("vibly-worker-{i}"))
            .build()?;
        Ok(Self { pool })
    }

    /// Build a pool sized by `VIBLY_NUM_THREADS` / `RAYON_NUM_THREADS`.
    pub fn from_env() -> Result<Self> {
        Self::new(env_config::num_threads())
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `op` inside the pool.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }
}

/// Evaluate the oracle on a batch of encoded points across the pool.
///
/// `outcomes[i]` belongs to `inputs[i]`. The first oracle error (by any
/// worker) aborts the batch and is tagged with its input index.
pub fn evaluate_batch<M: TransitionModel>(
    model: &M,
    inputs: &[(Vec<f64>, M::Params)],
    pool: &WorkerPool,
) -> Result<Vec<StepOutcome>> {
    pool.install(|| {
        inputs
            .par_iter()
            .enumerate()
            .map(|(i, (state, params))| evaluate_point(model, i, state, params))
            .collect()
    })
}

/// Build the transition table with the oracle sweep spread over `pool`.
///
/// Produces exactly the table [`crate::transition_map::compute_transition_map`]
/// would for a deterministic oracle.
pub fn par_compute_transition_map<M: TransitionModel>(
    problem: &ViabilityProblem<M>,
    options: MapOptions,
    pool: &WorkerPool,
) -> Result<TransitionTable> {
    let grids = problem.grids();
    let total = grids.num_points();
    info!(
        total,
        threads = pool.num_threads(),
        check_grid = options.check_grid,
        "computing transition map in parallel"
    );

    let t_encode = Instant::now();
    problem.check_decoder()?;
    let inputs: Vec<(Vec<f64>, M::Params)> = (0..total).map(|i| problem.encode_point(i)).collect();
    let encode_secs = t_encode.elapsed().as_secs_f64();

    let t_eval = Instant::now();
    let outcomes = evaluate_batch(problem.model(), &inputs, pool)?;
    let eval_secs = t_eval.elapsed().as_secs_f64();

    let t_record = Instant::now();
    let mut recorder = TableRecorder::new(grids, options);
    for (point, ((_, params), outcome)) in inputs.iter().zip(&outcomes).enumerate() {
        recorder.record_outcome(problem, point, outcome, params)?;
    }
    let table = recorder.finish()?;

    info!(
        encode_secs,
        eval_secs,
        record_secs = t_record.elapsed().as_secs_f64(),
        rate = total as f64 / eval_secs.max(f64::EPSILON),
        failed = table.num_failed(),
        "parallel transition map complete"
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ViabilityError;
    use crate::grid::{Grid, Grids};
    use crate::model::OracleError;
    use crate::transition_map::compute_transition_map;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Damped 2-D map with a failure region.
    struct Damped;

    impl TransitionModel for Damped {
        type Params = f64;

        fn encode(&self, sa: &[f64], damping: &f64) -> (Vec<f64>, f64) {
            (vec![sa[0], sa[1]], damping * sa[2])
        }

        fn step(&self, x: &[f64], k: &f64) -> std::result::Result<StepOutcome, OracleError> {
            let next = vec![x[0] * (1.0 - k), x[1] + k - 0.25];
            if next[1] > 1.0 {
                Ok(StepOutcome::failed(next))
            } else {
                Ok(StepOutcome::ok(next))
            }
        }

        fn decode(&self, x: &[f64], _: &f64) -> Vec<f64> {
            x.to_vec()
        }
    }

    struct FailsOn(usize);

    impl TransitionModel for FailsOn {
        type Params = ();

        fn encode(&self, sa: &[f64], _: &()) -> (Vec<f64>, ()) {
            (sa.to_vec(), ())
        }

        fn step(&self, x: &[f64], _: &()) -> std::result::Result<StepOutcome, OracleError> {
            if x[0] as usize == self.0 {
                Err(OracleError("diverged".into()))
            } else {
                Ok(StepOutcome::ok(vec![x[0]]))
            }
        }

        fn decode(&self, x: &[f64], _: &()) -> Vec<f64> {
            vec![x[0]]
        }
    }

    /// Counts oracle calls; the encoded params widen the decoded state.
    struct Widening {
        calls: AtomicUsize,
    }

    impl TransitionModel for Widening {
        type Params = usize;

        fn encode(&self, sa: &[f64], _: &usize) -> (Vec<f64>, usize) {
            (vec![sa[0]], 2)
        }

        fn step(&self, x: &[f64], _: &usize) -> std::result::Result<StepOutcome, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(StepOutcome::ok(x.to_vec()))
        }

        fn decode(&self, x: &[f64], dims: &usize) -> Vec<f64> {
            vec![x[0]; *dims]
        }
    }

    #[test]
    fn test_decoder_mismatch_fails_before_oracle_calls() {
        let grids = Grids::new(
            Grid::new(vec![vec![0.0, 1.0, 2.0]]).unwrap(),
            Grid::new(vec![vec![0.0, 1.0]]).unwrap(),
        );
        let model = Widening {
            calls: AtomicUsize::new(0),
        };
        let problem = ViabilityProblem::new(model, 1, vec![0.0], grids).unwrap();
        let pool = WorkerPool::new(2).unwrap();

        let err = par_compute_transition_map(&problem, MapOptions::default(), &pool).unwrap_err();
        assert!(matches!(
            err,
            ViabilityError::DimensionMismatch {
                expected: 1,
                actual: 2
            }
        ));
        let err = compute_transition_map(&problem, MapOptions::default()).unwrap_err();
        assert!(matches!(err, ViabilityError::DimensionMismatch { .. }));
        assert_eq!(problem.model().calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_matches_sequential_builder() {
        let grids = Grids::new(
            Grid::new(vec![vec![0.0, 0.25, 0.5, 1.0], vec![0.0, 0.5, 1.0]]).unwrap(),
            Grid::new(vec![vec![0.0, 0.25, 0.5]]).unwrap(),
        );
        let problem = ViabilityProblem::new(Damped, 1.0, vec![0.5, 0.5], grids).unwrap();
        let options = MapOptions::default()
            .with_check_grid(true)
            .with_keep_coords(true);
        let pool = WorkerPool::new(3).unwrap();

        let seq = compute_transition_map(&problem, options).unwrap();
        let par = par_compute_transition_map(&problem, options, &pool).unwrap();
        assert_eq!(seq, par);
    }

    #[test]
    fn test_batch_preserves_order() {
        let pool = WorkerPool::new(4).unwrap();
        let inputs: Vec<(Vec<f64>, ())> = (0..257).map(|i| (vec![i as f64], ())).collect();
        let outcomes = evaluate_batch(&FailsOn(usize::MAX), &inputs, &pool).unwrap();
        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.next_state, vec![i as f64]);
        }
    }

    #[test]
    fn test_batch_error_aborts() {
        let pool = WorkerPool::new(2).unwrap();
        let inputs: Vec<(Vec<f64>, ())> = (0..16).map(|i| (vec![i as f64], ())).collect();
        let err = evaluate_batch(&FailsOn(5), &inputs, &pool).unwrap_err();
        assert!(matches!(err, ViabilityError::Oracle { point: 5, .. }));
    }

    #[test]
    fn test_pool_size() {
        let pool = WorkerPool::new(2).unwrap();
        assert_eq!(pool.num_threads(), 2);
    }
}
