//! DDP search strategies
//!
//! Step acceptance for the outer DDP loop. The line search races step
//! lengths `max_step·rate^k` across the worker pool and keeps the largest
//! accepted one; Levenberg-Marquardt performs a single full-step trial and
//! adapts its Riccati multiple from the achieved-to-predicted reduction
//! ratio.

use horizon_core::performance::PerformanceIndex;
use horizon_core::types::{Matrix, Scalar, Vector};

use crate::ddp::backward::{RiccatiHooks, RiccatiModification, RiccatiNode};
use crate::hessian::HessianCorrectionStrategy;
use crate::settings::{DdpSettings, LevenbergMarquardtSettings, LineSearchSettings};

/// Number of line-search trials spanned by `[min_step, max_step]` at the
/// configured contraction rate.
pub fn num_line_search_trials(settings: &LineSearchSettings) -> usize {
    if (settings.max_step_length - settings.min_step_length).abs() < 1e-12 {
        return 1;
    }
    let ratio = settings.min_step_length / settings.max_step_length;
    // epsilon guards the exact-power-of-rate boundary
    (ratio.ln() / settings.contraction_rate.ln() + 1e-9).floor() as usize + 1
}

/// Armijo acceptance of one line-search trial: the merit must fall below
/// the baseline by a fraction of the controller-update measure.
pub fn line_search_accepts(
    settings: &LineSearchSettings,
    baseline_merit: Scalar,
    trial_merit: Scalar,
    step_length: Scalar,
    controller_update_ise: Scalar,
) -> bool {
    trial_merit < baseline_merit - settings.armijo_coefficient * step_length * controller_update_ise
}

/// Line-search Riccati hooks: no recursion modification, Hessian correction
/// per the configured policy.
pub struct LineSearchHooks {
    pub settings: LineSearchSettings,
}

impl RiccatiHooks for LineSearchHooks {
    fn riccati_modification(&self, _node: &RiccatiNode) -> RiccatiModification {
        RiccatiModification::default()
    }

    fn hessian_correction(&self) -> Option<(HessianCorrectionStrategy, Scalar)> {
        Some((
            self.settings.hessian_correction_strategy,
            self.settings.hessian_correction_multiple,
        ))
    }
}

/// Levenberg-Marquardt strategy state carried across iterations.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardtModule {
    /// Current reduction ratio ρ.
    pub rho: Scalar,
    /// Tikhonov multiple μ on the Hamiltonian Hessian.
    pub riccati_multiple: Scalar,
    /// Adaptive scaling applied to μ between iterations.
    pub adaptive_ratio: Scalar,
    /// Rejected steps since the last acceptance.
    pub successive_rejections: usize,
}

impl Default for LevenbergMarquardtModule {
    fn default() -> Self {
        Self {
            rho: 1.0,
            riccati_multiple: 0.0,
            adaptive_ratio: 1.0,
            successive_rejections: 0,
        }
    }
}

impl LevenbergMarquardtModule {
    /// Computes ρ from the achieved and predicted merit reductions,
    /// guarding the degenerate cases.
    pub fn reduction_ratio(
        actual_reduction: Scalar,
        predicted_reduction: Scalar,
        min_rel_cost: Scalar,
    ) -> Scalar {
        if actual_reduction.abs() < min_rel_cost || predicted_reduction <= min_rel_cost {
            1.0
        } else if actual_reduction < 0.0 {
            0.0
        } else {
            actual_reduction / predicted_reduction
        }
    }

    /// Adapts μ from ρ with the bounded geometric scheme: grow below
    /// ρ = 0.25, shrink above ρ = 0.75, freeze in between.
    pub fn adapt(&mut self, rho: Scalar, settings: &LevenbergMarquardtSettings) {
        self.rho = rho;
        if rho < 0.25 {
            self.adaptive_ratio =
                self.adaptive_ratio.max(1.0) * settings.riccati_multiple_adaptive_ratio;
            let candidate = self.adaptive_ratio * self.riccati_multiple;
            self.riccati_multiple = candidate.max(settings.riccati_multiple_default);
        } else if rho > 0.75 {
            self.adaptive_ratio =
                self.adaptive_ratio.min(1.0) / settings.riccati_multiple_adaptive_ratio;
            let candidate = self.adaptive_ratio * self.riccati_multiple;
            self.riccati_multiple = if candidate > settings.riccati_multiple_default {
                candidate
            } else {
                0.0
            };
        } else {
            self.adaptive_ratio = 1.0;
        }
    }

    /// Records acceptance/rejection; returns true when the step is
    /// accepted.
    pub fn register_trial(&mut self, rho: Scalar, settings: &LevenbergMarquardtSettings) -> bool {
        if rho >= settings.accepted_ratio {
            self.successive_rejections = 0;
            true
        } else {
            self.successive_rejections += 1;
            false
        }
    }
}

/// Levenberg-Marquardt Riccati hooks: Tikhonov augmentation of `Q_uu` and
/// the matching gradient shifts.
pub struct LevenbergMarquardtHooks {
    pub riccati_multiple: Scalar,
}

impl RiccatiHooks for LevenbergMarquardtHooks {
    fn riccati_modification(&self, node: &RiccatiNode) -> RiccatiModification {
        if self.riccati_multiple == 0.0 {
            return RiccatiModification::default();
        }
        let b = &node.dynamics.dfdu;
        let a = &node.dynamics.dfdx;
        let bias = &node.dynamics.f;
        RiccatiModification {
            delta_quu: Some(b.transpose() * b * self.riccati_multiple),
            delta_gv: Some(b.transpose() * bias * self.riccati_multiple),
            delta_gm: Some(b.transpose() * a * self.riccati_multiple),
        }
    }

    fn hessian_correction(&self) -> Option<(HessianCorrectionStrategy, Scalar)> {
        None
    }
}

/// Shared convergence test of both strategies.
///
/// Converged when the merit change fell below `min_rel_cost` (or, for the
/// line search, the accepted step length reached zero with a reliable
/// controller) while the state-input constraint ISE is within tolerance.
pub fn check_convergence(
    settings: &DdpSettings,
    previous: &PerformanceIndex,
    current: &PerformanceIndex,
    step_length_star: Scalar,
    unreliable_controller: bool,
) -> Option<String> {
    let rel_cost = ((current.total_cost + current.inequality_penalty)
        - (previous.total_cost + previous.inequality_penalty))
        .abs();
    let cost_converged = rel_cost <= settings.min_rel_cost;
    let step_zero = step_length_star == 0.0 && !unreliable_controller;
    let constraints_satisfied = current.state_input_eq_ise <= settings.constraint_tolerance;

    if (cost_converged || step_zero) && constraints_satisfied {
        let mut info = String::from("optimization converged:");
        if step_zero {
            info.push_str(" step length reduced to zero;");
        }
        if cost_converged {
            info.push_str(&format!(
                " relative cost change {rel_cost:.3e} below {:.3e};",
                settings.min_rel_cost
            ));
        }
        Some(info)
    } else {
        None
    }
}

/// Returns per-iteration Matrix/Vector norms of the controller update used
/// in the display path.
pub fn controller_update_norms(gains: &[Matrix], increments: &[Vector]) -> (Scalar, Scalar) {
    let max_gain = gains.iter().map(|g| g.norm()).fold(0.0, Scalar::max);
    let max_increment = increments.iter().map(|v| v.norm()).fold(0.0, Scalar::max);
    (max_gain, max_increment)
}
