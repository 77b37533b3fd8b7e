//! Solver configuration
//!
//! Settings structs for both solver families. Contradictory values are
//! rejected at solver construction with
//! [`SolverError::InvalidConfiguration`].

use serde::{Deserialize, Serialize};

use horizon_core::error::SolverError;
use horizon_core::integrator::IntegratorType;
use horizon_core::penalty::RelaxedBarrierPenalty;
use horizon_core::rollout::RolloutSettings;
use horizon_core::types::Scalar;

use crate::hessian::HessianCorrectionStrategy;

/// DDP algorithm variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DdpAlgorithm {
    /// Sequential linear-quadratic: higher-order sensitivity discretization
    /// of the node models.
    Slq,
    /// Iterative LQR: first-order (Euler) discretization of the node
    /// models.
    Ilqr,
}

/// Step-search strategy of the DDP outer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchStrategyType {
    LineSearch,
    LevenbergMarquardt,
}

/// Line-search strategy parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LineSearchSettings {
    /// Smallest admissible step length.
    pub min_step_length: Scalar,
    /// Largest (initial) step length.
    pub max_step_length: Scalar,
    /// Geometric shrink factor between trials.
    pub contraction_rate: Scalar,
    /// Armijo coefficient on the controller-update measure.
    pub armijo_coefficient: Scalar,
    /// PD-repair policy for the Hamiltonian Hessian.
    pub hessian_correction_strategy: HessianCorrectionStrategy,
    /// Shift magnitude used by the repair policy.
    pub hessian_correction_multiple: Scalar,
}

impl Default for LineSearchSettings {
    fn default() -> Self {
        Self {
            min_step_length: 0.05,
            max_step_length: 1.0,
            contraction_rate: 0.5,
            armijo_coefficient: 1e-4,
            hessian_correction_strategy: HessianCorrectionStrategy::CholeskyModification,
            hessian_correction_multiple: 1e-3,
        }
    }
}

/// Levenberg-Marquardt strategy parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LevenbergMarquardtSettings {
    /// Smallest nonzero Riccati multiple (floor of the Tikhonov term).
    pub riccati_multiple_default: Scalar,
    /// Geometric adaptation rate of the Riccati multiple.
    pub riccati_multiple_adaptive_ratio: Scalar,
    /// Smallest reduction ratio ρ that still accepts the step.
    pub accepted_ratio: Scalar,
    /// Successive rejections tolerated before the iteration fails.
    pub max_successive_rejections: usize,
}

impl Default for LevenbergMarquardtSettings {
    fn default() -> Self {
        Self {
            riccati_multiple_default: 1e-6,
            riccati_multiple_adaptive_ratio: 10.0,
            accepted_ratio: 0.25,
            max_successive_rejections: 5,
        }
    }
}

/// Configuration of the DDP solvers (SLQ and ILQR).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdpSettings {
    pub algorithm: DdpAlgorithm,
    pub strategy: SearchStrategyType,
    pub n_threads: usize,
    /// Advisory worker priority; ignored on platforms without support.
    pub thread_priority: Option<i32>,

    pub max_num_iterations: usize,
    /// Convergence threshold on the absolute change of cost + penalty.
    pub min_rel_cost: Scalar,
    /// Tolerance on the constraint ISE measures.
    pub constraint_tolerance: Scalar,

    /// Initial augmented-Lagrangian penalty coefficient (> 1).
    pub constraint_penalty_initial: Scalar,
    /// Growth rate of the penalty coefficients (> 1).
    pub constraint_penalty_increase_rate: Scalar,
    /// Relaxed-barrier parameters of the inequality penalty.
    pub inequality_penalty: RelaxedBarrierPenalty,

    /// Precompute shared Riccati products in the backward recursion.
    pub pre_compute_riccati_terms: bool,
    /// Run the backward pass on the nominal (rather than the trial) time
    /// grid; with node-aligned trajectories both coincide.
    pub use_nominal_time_for_backward_pass: bool,
    /// Emit an affine feedback policy instead of a feed-forward sequence.
    pub use_feedback_policy: bool,
    /// Enable finite/PSD checks on intermediate quantities.
    pub check_numerical_stability: bool,

    /// Node spacing of the time grid.
    pub time_step: Scalar,
    /// Rollout integration settings.
    pub rollout: RolloutSettings,

    pub line_search: LineSearchSettings,
    pub levenberg_marquardt: LevenbergMarquardtSettings,

    /// Emit per-iteration info events.
    pub display_info: bool,
    /// Emit a timing summary when the solver is dropped.
    pub print_solver_statistics: bool,
}

impl Default for DdpSettings {
    fn default() -> Self {
        Self {
            algorithm: DdpAlgorithm::Slq,
            strategy: SearchStrategyType::LineSearch,
            n_threads: 1,
            thread_priority: None,
            max_num_iterations: 15,
            min_rel_cost: 1e-3,
            constraint_tolerance: 1e-5,
            constraint_penalty_initial: 2.0,
            constraint_penalty_increase_rate: 2.0,
            inequality_penalty: RelaxedBarrierPenalty::default(),
            pre_compute_riccati_terms: true,
            use_nominal_time_for_backward_pass: true,
            use_feedback_policy: true,
            check_numerical_stability: false,
            time_step: 1e-2,
            rollout: RolloutSettings::default(),
            line_search: LineSearchSettings::default(),
            levenberg_marquardt: LevenbergMarquardtSettings::default(),
            display_info: false,
            print_solver_statistics: false,
        }
    }
}

impl DdpSettings {
    pub fn validate(&self) -> Result<(), SolverError> {
        if self.n_threads == 0 {
            return Err(SolverError::InvalidConfiguration(
                "n_threads must be at least 1".into(),
            ));
        }
        if self.time_step <= 0.0 {
            return Err(SolverError::InvalidConfiguration(
                "time_step must be positive".into(),
            ));
        }
        if self.line_search.max_step_length < self.line_search.min_step_length {
            return Err(SolverError::InvalidConfiguration(
                "line-search maximum step length is smaller than the minimum".into(),
            ));
        }
        if !(0.0 < self.line_search.contraction_rate && self.line_search.contraction_rate < 1.0) {
            return Err(SolverError::InvalidConfiguration(
                "line-search contraction rate must lie in (0, 1)".into(),
            ));
        }
        if self.constraint_penalty_initial <= 1.0 || self.constraint_penalty_increase_rate <= 1.0 {
            return Err(SolverError::InvalidConfiguration(
                "constraint penalty coefficients must exceed 1".into(),
            ));
        }
        self.rollout.validate()
    }
}

/// Configuration of the multiple-shooting SQP solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqpSettings {
    /// Node spacing of the time grid.
    pub dt: Scalar,
    /// Outer SQP iteration budget.
    pub sqp_iterations: usize,
    pub n_threads: usize,
    /// Advisory worker priority; ignored on platforms without support.
    pub thread_priority: Option<i32>,

    /// Step shrink factor of the filter line search.
    pub alpha_decay: Scalar,
    /// Step-size floor of the filter line search.
    pub alpha_min: Scalar,
    /// Sufficient-decrease mixing factor γ_c.
    pub gamma_c: Scalar,
    /// Largest admissible constraint violation θ_max.
    pub g_max: Scalar,
    /// Violation level θ_min below which the Armijo branch applies.
    pub g_min: Scalar,
    /// Convergence tolerance on the merit decrease.
    pub cost_tol: Scalar,
    /// Convergence tolerance on the scaled step norm.
    pub delta_tol: Scalar,
    /// Armijo slope factor.
    pub armijo_factor: Scalar,

    /// Eliminate state-input equality constraints by projection.
    pub project_state_input_equality_constraints: bool,
    /// Emit an affine feedback policy from the QP Riccati gains.
    pub use_feedback_policy: bool,

    /// Sensitivity discretization scheme of the shooting intervals.
    pub integrator: IntegratorType,
    /// Relaxed-barrier parameters of the inequality penalty.
    pub inequality_penalty: RelaxedBarrierPenalty,

    /// Emit per-trial line-search events.
    pub print_linesearch: bool,
    /// Emit per-iteration status events.
    pub print_solver_status: bool,
    /// Emit a timing summary when the solver is dropped.
    pub print_solver_statistics: bool,
}

impl Default for SqpSettings {
    fn default() -> Self {
        Self {
            dt: 1e-2,
            sqp_iterations: 10,
            n_threads: 1,
            thread_priority: None,
            alpha_decay: 0.5,
            alpha_min: 1e-4,
            gamma_c: 1e-6,
            g_max: 1e6,
            g_min: 1e-6,
            cost_tol: 1e-4,
            delta_tol: 1e-6,
            armijo_factor: 1e-4,
            project_state_input_equality_constraints: true,
            use_feedback_policy: false,
            integrator: IntegratorType::Rk2,
            inequality_penalty: RelaxedBarrierPenalty::default(),
            print_linesearch: false,
            print_solver_status: false,
            print_solver_statistics: false,
        }
    }
}

impl SqpSettings {
    pub fn validate(&self) -> Result<(), SolverError> {
        if self.dt <= 0.0 {
            return Err(SolverError::InvalidConfiguration(
                "dt must be positive".into(),
            ));
        }
        if self.sqp_iterations == 0 {
            return Err(SolverError::InvalidConfiguration(
                "sqp_iterations must be at least 1".into(),
            ));
        }
        if self.n_threads == 0 {
            return Err(SolverError::InvalidConfiguration(
                "n_threads must be at least 1".into(),
            ));
        }
        if !(0.0 < self.alpha_decay && self.alpha_decay < 1.0) {
            return Err(SolverError::InvalidConfiguration(
                "alpha_decay must lie in (0, 1)".into(),
            ));
        }
        if self.alpha_min <= 0.0 || self.alpha_min >= 1.0 {
            return Err(SolverError::InvalidConfiguration(
                "alpha_min must lie in (0, 1)".into(),
            ));
        }
        if self.g_min >= self.g_max {
            return Err(SolverError::InvalidConfiguration(
                "g_min must be smaller than g_max".into(),
            ));
        }
        Ok(())
    }
}
