//! Discrete Riccati backward pass
//!
//! Sweeps the per-node LQ models from the terminal cost to the initial
//! node, producing the affine feedback law, the quadratic value-function
//! model, and the expected cost reduction of the new policy. Event nodes
//! propagate the value function through the linearized jump; intermediate
//! nodes minimize over the (possibly projected) input.

use horizon_core::error::SolverError;
use horizon_core::projection::{expand_gain, ConstraintProjection};
use horizon_core::types::{Matrix, Scalar, ScalarQuadraticApproximation, Vector, VectorLinearApproximation};

use crate::hessian::{repair_cholesky, shift_hessian, HessianCorrectionStrategy};

/// Upper bound on PD-repair attempts per node before the pass fails.
const MAX_PD_REPAIRS: usize = 8;

/// Discretized model of one backward-pass node.
pub struct RiccatiNode {
    /// `δx_{i+1} = A δx + B δu` (intermediate) or `δx⁺ = J δx` (event).
    pub dynamics: VectorLinearApproximation,
    /// Stage cost model (interval-scaled for intermediate nodes).
    pub cost: ScalarQuadraticApproximation,
    /// Input substitution eliminating the stage equality constraint.
    pub projection: Option<ConstraintProjection>,
    /// True for a pre-event node (no input, jump propagation).
    pub is_event: bool,
}

/// Strategy-supplied modification of the Riccati recursion at one node.
#[derive(Debug, Clone, Default)]
pub struct RiccatiModification {
    /// Added to `Q_uu` (e.g. the Levenberg-Marquardt Tikhonov term).
    pub delta_quu: Option<Matrix>,
    /// Added to `Q_u`.
    pub delta_gv: Option<Vector>,
    /// Added to `Q_ux`.
    pub delta_gm: Option<Matrix>,
}

/// Per-node hooks the search strategies plug into the recursion.
pub trait RiccatiHooks {
    /// Modification applied to the Hamiltonian blocks of an intermediate
    /// node, given its (projected) model.
    fn riccati_modification(&self, node: &RiccatiNode) -> RiccatiModification;

    /// Hessian correction applied to `Q_uu` before factorization; `None`
    /// leaves the repair to the bounded Cholesky fallback.
    fn hessian_correction(&self) -> Option<(HessianCorrectionStrategy, Scalar)>;
}

/// Output of one backward sweep.
pub struct BackwardPassOutput {
    /// Feedback gains in original input coordinates, one per node (empty at
    /// event nodes).
    pub gains: Vec<Matrix>,
    /// Feed-forward increments in original input coordinates.
    pub increments: Vec<Vector>,
    /// Value-function Hessian trajectory.
    pub s_mat: Vec<Matrix>,
    /// Value-function gradient trajectory.
    pub s_vec: Vec<Vector>,
    /// Value-function constant trajectory.
    pub s0: Vec<Scalar>,
    /// Linear coefficient of the predicted cost reduction
    /// `ΔV(α) = α·dv1 + α²·dv2`.
    pub dv1: Scalar,
    /// Quadratic coefficient of the predicted cost reduction.
    pub dv2: Scalar,
}

impl BackwardPassOutput {
    /// Predicted cost change for a step of length `alpha` (negative for a
    /// descent policy).
    pub fn expected_reduction(&self, alpha: Scalar) -> Scalar {
        alpha * self.dv1 + alpha * alpha * self.dv2
    }
}

/// Runs the sweep. `nodes[i]` models the transition from node `i`;
/// `terminal` is the quadratic terminal cost. Strictly sequential in the
/// node index.
pub fn riccati_sweep(
    nodes: &[RiccatiNode],
    terminal: &ScalarQuadraticApproximation,
    hooks: &dyn RiccatiHooks,
    pre_compute_terms: bool,
) -> Result<BackwardPassOutput, SolverError> {
    let n = nodes.len();
    let mut output = BackwardPassOutput {
        gains: vec![Matrix::zeros(0, 0); n],
        increments: vec![Vector::zeros(0); n],
        s_mat: vec![Matrix::zeros(0, 0); n + 1],
        s_vec: vec![Vector::zeros(0); n + 1],
        s0: vec![0.0; n + 1],
        dv1: 0.0,
        dv2: 0.0,
    };

    output.s_mat[n] = terminal.fxx.clone();
    output.s_vec[n] = terminal.fx.clone();
    output.s0[n] = terminal.f;

    for i in (0..n).rev() {
        let node = &nodes[i];
        let s_next_mat = &output.s_mat[i + 1];
        let s_next_vec = &output.s_vec[i + 1];
        let s_next_0 = output.s0[i + 1];

        if node.is_event {
            // transversality through the linearized jump
            let j = &node.dynamics.dfdx;
            let s_mat_new = &node.cost.fxx + j.transpose() * s_next_mat * j;
            let s_vec_new = &node.cost.fx + j.transpose() * s_next_vec;
            output.s_mat[i] = s_mat_new;
            output.s_vec[i] = s_vec_new;
            output.s0[i] = node.cost.f + s_next_0;
            continue;
        }

        // work in projected coordinates when a substitution is present
        let (dynamics, cost);
        let (dynamics_ref, cost_ref) = match &node.projection {
            Some(projection) => {
                dynamics = horizon_core::projection::project_dynamics(&node.dynamics, projection);
                cost = horizon_core::projection::project_cost(&node.cost, projection);
                (&dynamics, &cost)
            }
            None => (&node.dynamics, &node.cost),
        };

        let a = &dynamics_ref.dfdx;
        let b = &dynamics_ref.dfdu;
        let bias = &dynamics_ref.f;

        // Hamiltonian blocks; the precomputed path shares B'S across the
        // three input blocks.
        let s_bias = s_next_mat * bias + s_next_vec;
        let q_x = &cost_ref.fx + a.transpose() * &s_bias;
        let q_xx = &cost_ref.fxx + a.transpose() * s_next_mat * a;
        let (mut q_u, mut q_uu, mut q_ux) = if pre_compute_terms {
            let bt_s = b.transpose() * s_next_mat;
            (
                &cost_ref.fu + b.transpose() * &s_bias,
                &cost_ref.fuu + &bt_s * b,
                &cost_ref.fux + &bt_s * a,
            )
        } else {
            (
                &cost_ref.fu + b.transpose() * &s_bias,
                &cost_ref.fuu + b.transpose() * s_next_mat * b,
                &cost_ref.fux + b.transpose() * s_next_mat * a,
            )
        };

        // strategy modification (Tikhonov augmentation, gradient shifts)
        let modification = hooks.riccati_modification(node);
        if let Some(delta) = modification.delta_quu {
            q_uu += delta;
        }
        if let Some(delta) = modification.delta_gv {
            q_u += delta;
        }
        if let Some(delta) = modification.delta_gm {
            q_ux += delta;
        }

        // keep Q_uu positive definite
        if let Some((strategy, multiple)) = hooks.hessian_correction() {
            shift_hessian(strategy, &mut q_uu, multiple);
        }
        let (chol, _) = repair_cholesky(&q_uu, 1e-8, MAX_PD_REPAIRS)
            .ok_or(SolverError::BackwardPassFailed { node: i })?;

        let mut gain = -&q_ux;
        chol.solve_mut(&mut gain);
        let mut increment = -&q_u;
        chol.solve_mut(&mut increment);

        output.dv1 += increment.dot(&q_u);
        output.dv2 += 0.5 * increment.dot(&(&q_uu * &increment));

        let s_vec_new = &q_x + q_ux.transpose() * &increment;
        let s_mat_new = {
            let s = &q_xx + q_ux.transpose() * &gain;
            (&s + s.transpose()) * 0.5
        };
        let s0_new = s_next_0 + cost_ref.f + s_next_vec.dot(bias)
            + 0.5 * bias.dot(&(s_next_mat * bias))
            + increment.dot(&q_u)
            + 0.5 * increment.dot(&(&q_uu * &increment));

        output.s_vec[i] = s_vec_new;
        output.s_mat[i] = s_mat_new;
        output.s0[i] = s0_new;

        // expand back to original input coordinates
        match &node.projection {
            Some(projection) => {
                output.gains[i] = expand_gain(projection, &gain);
                output.increments[i] = &projection.f + &projection.dfdu * &increment;
            }
            None => {
                output.gains[i] = gain;
                output.increments[i] = increment;
            }
        }
    }

    Ok(output)
}
