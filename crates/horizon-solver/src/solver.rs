//! Common solver surface
//!
//! Both solver families expose the same entry points so MPC-style callers
//! can swap them freely.

use std::sync::Arc;

use horizon_core::error::{SolverError, TerminationReason};
use horizon_core::performance::PerformanceIndex;
use horizon_core::reference::ReferenceManager;
use horizon_core::solution::PrimalSolution;
use horizon_core::types::{Scalar, Vector};

/// Uniform optimal-control solver interface.
pub trait Solver {
    /// Clears the internal solution, iteration log and warm-start state.
    fn reset(&mut self);

    /// Solves the problem over `[t0, tf]`. `partitioning_times` mark the
    /// horizon segmentation an MPC supervisor works with; they must bracket
    /// the horizon.
    fn run(
        &mut self,
        t0: Scalar,
        x0: &Vector,
        tf: Scalar,
        partitioning_times: &[Scalar],
    ) -> Result<TerminationReason, SolverError>;

    /// Primal solution truncated at `final_time`.
    fn primal_solution(&self, final_time: Scalar) -> PrimalSolution;

    /// Performance of the last accepted iterate.
    fn performance_index(&self) -> &PerformanceIndex;

    /// Per-iteration performance history of the last run.
    fn iterations_log(&self) -> &[PerformanceIndex];

    /// Installs the shared reference manager.
    fn set_reference_manager(&mut self, reference_manager: Arc<ReferenceManager>);
}

/// Validates the horizon and partitioning arguments shared by both solver
/// families.
pub fn validate_run_arguments(
    t0: Scalar,
    x0: &Vector,
    tf: Scalar,
    partitioning_times: &[Scalar],
) -> Result<(), SolverError> {
    if !x0.iter().all(|v| v.is_finite()) {
        return Err(SolverError::InvalidConfiguration(
            "initial state is not finite".into(),
        ));
    }
    if tf < t0 {
        return Err(SolverError::InvalidConfiguration(
            "final time precedes initial time".into(),
        ));
    }
    if partitioning_times.is_empty() {
        return Err(SolverError::InvalidConfiguration(
            "there must be at least one partitioning time".into(),
        ));
    }
    if partitioning_times.windows(2).any(|w| w[1] <= w[0]) {
        return Err(SolverError::InvalidConfiguration(
            "partitioning times must be strictly increasing".into(),
        ));
    }
    Ok(())
}
