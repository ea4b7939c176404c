//! The black-box system interface and the immutable problem record.
//!
//! A [`TransitionModel`] bundles the three external collaborators: `encode`
//! (grid point + defaults → full state and parameters), `step` (one
//! transition of the underlying dynamics), and `decode` (full state → the
//! low-dimensional state used for gridding). The crate never looks inside
//! them.
//!
//! A [`ViabilityProblem`] ties a model to its default parameters, initial
//! state and grids. It is built once and passed by reference into every
//! builder and solver call.

use thiserror::Error;

use crate::error::{Result, ViabilityError};
use crate::grid::Grids;

/// Result of one transition: the next full state and whether it failed.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub next_state: Vec<f64>,
    pub failed: bool,
}

impl StepOutcome {
    pub fn ok(next_state: Vec<f64>) -> Self {
        Self {
            next_state,
            failed: false,
        }
    }

    pub fn failed(next_state: Vec<f64>) -> Self {
        Self {
            next_state,
            failed: true,
        }
    }
}

/// The oracle could not evaluate its input at all (as opposed to reporting
/// a failed transition). Aborts the whole transition-map build.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct OracleError(pub String);

/// A discrete-time system evaluated through its one-step map.
///
/// Implementations must be deterministic and free of hidden sequencing
/// state: `step` may be called in any order, repeatedly, and from several
/// threads at once. Any scratch buffers belong to a single call.
pub trait TransitionModel: Sync {
    /// Full parameter set of one evaluation.
    type Params: Clone + Send + Sync;

    /// Expand a concatenated (state, action) grid point into the full state
    /// and parameters the oracle needs.
    fn encode(&self, state_action: &[f64], defaults: &Self::Params) -> (Vec<f64>, Self::Params);

    /// One transition of the dynamics.
    fn step(
        &self,
        state: &[f64],
        params: &Self::Params,
    ) -> std::result::Result<StepOutcome, OracleError>;

    /// Compress a full state back to the gridded low-dimensional state.
    fn decode(&self, state: &[f64], params: &Self::Params) -> Vec<f64>;
}

/// Immutable configuration of one viability computation.
pub struct ViabilityProblem<M: TransitionModel> {
    model: M,
    defaults: M::Params,
    initial_state: Vec<f64>,
    grids: Grids,
}

impl<M> ViabilityProblem<M>
where
    M: TransitionModel,
{
    /// Bundle a model with its defaults and grids.
    ///
    /// Fails when the decoded initial state does not match the state grid's
    /// dimensionality.
    pub fn new(
        model: M,
        defaults: M::Params,
        initial_state: Vec<f64>,
        grids: Grids,
    ) -> Result<Self> {
        let problem = Self {
            model,
            defaults,
            initial_state,
            grids,
        };
        problem.decode_checked(&problem.initial_state, &problem.defaults)?;
        Ok(problem)
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn defaults(&self) -> &M::Params {
        &self.defaults
    }

    pub fn initial_state(&self) -> &[f64] {
        &self.initial_state
    }

    pub fn grids(&self) -> &Grids {
        &self.grids
    }

    /// Encode Q-space point `flat` into the oracle's input pair.
    pub fn encode_point(&self, flat: usize) -> (Vec<f64>, M::Params) {
        let state_action = self.grids.state_action(flat);
        self.model.encode(&state_action, &self.defaults)
    }

    /// Decode a full state, checking it against the state grid's dimensionality.
    pub fn decode_checked(&self, state: &[f64], params: &M::Params) -> Result<Vec<f64>> {
        let s = self.model.decode(state, params);
        if s.len() != self.grids.states.ndim() {
            return Err(ViabilityError::DimensionMismatch {
                expected: self.grids.states.ndim(),
                actual: s.len(),
            });
        }
        Ok(s)
    }

    /// Decode the first encoded grid point, so a decoder of the wrong
    /// dimensionality fails before any oracle call.
    pub fn check_decoder(&self) -> Result<()> {
        let (x, p) = self.encode_point(0);
        self.decode_checked(&x, &p)?;
        Ok(())
    }
}
