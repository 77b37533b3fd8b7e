//! Solver error taxonomy
//!
//! Failures inside the search loops (diverged rollouts, failed PD repairs)
//! are recoverable up to configured caps and handled by the strategies;
//! everything raised outside those loops is fatal for the current solve.

use thiserror::Error;

use crate::types::Scalar;

/// Status reported by a structured QP backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QpStatus {
    Success,
    MaxIter,
    Infeasible,
    NumericalFailure,
}

/// Errors produced by problem assembly and the solver cores.
#[derive(Debug, Error)]
pub enum SolverError {
    /// Contradictory or out-of-range settings, detected at construction.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A user callback returned an array of unexpected shape.
    #[error("dimension mismatch in {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// The integrator hit its step ceiling or produced a non-finite state.
    #[error("rollout diverged at t = {time}")]
    RolloutDiverged { time: Scalar },

    /// Positive-definiteness repair of the Hamiltonian Hessian was exhausted.
    #[error("backward pass failed at node {node}")]
    BackwardPassFailed { node: usize },

    /// The structured QP backend returned a non-success status.
    #[error("QP solver failed with status {0:?}")]
    QpFailed(QpStatus),

    /// A cost or constraint term with this name already exists.
    #[error("term with name \"{0}\" already exists")]
    DuplicateTerm(String),

    /// No cost or constraint term with this name exists.
    #[error("unknown term \"{0}\"")]
    UnknownTerm(String),
}

/// How a solve ended. A stalled search (step size at its floor without
/// acceptance) is a clean terminal state, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// A convergence criterion was met.
    Converged(String),
    /// The step size shrank below its floor without acceptance.
    Stalled,
    /// The iteration budget ran out.
    MaxIterations,
}
