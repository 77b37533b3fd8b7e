//! Soft inequality-constraint penalties
//!
//! Inequality constraints `h ≥ 0` enter the cost through a relaxed
//! logarithmic barrier: `-mu·ln(h)` on the interior, switched to a quadratic
//! extension below `delta` so the penalty stays defined (and twice
//! differentiable) for infeasible iterates.

use serde::{Deserialize, Serialize};

use crate::types::{
    Scalar, ScalarQuadraticApproximation, Vector, VectorLinearApproximation,
    VectorQuadraticApproximation,
};

/// Relaxed log-barrier parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RelaxedBarrierPenalty {
    /// Barrier scale.
    pub mu: Scalar,
    /// Relaxation threshold below which the quadratic extension is used.
    pub delta: Scalar,
}

impl Default for RelaxedBarrierPenalty {
    fn default() -> Self {
        Self {
            mu: 1e-2,
            delta: 1e-3,
        }
    }
}

impl RelaxedBarrierPenalty {
    /// Penalty value at constraint value `h`.
    pub fn value(&self, h: Scalar) -> Scalar {
        if h > self.delta {
            -self.mu * h.ln()
        } else {
            let z = (h - 2.0 * self.delta) / self.delta;
            self.mu * (0.5 * (z * z - 1.0) - self.delta.ln())
        }
    }

    /// First derivative dp/dh.
    pub fn derivative(&self, h: Scalar) -> Scalar {
        if h > self.delta {
            -self.mu / h
        } else {
            self.mu * (h - 2.0 * self.delta) / (self.delta * self.delta)
        }
    }

    /// Second derivative d²p/dh².
    pub fn second_derivative(&self, h: Scalar) -> Scalar {
        if h > self.delta {
            self.mu / (h * h)
        } else {
            self.mu / (self.delta * self.delta)
        }
    }

    /// Summed penalty of a stacked constraint vector.
    pub fn total_value(&self, h: &Vector) -> Scalar {
        h.iter().map(|&hi| self.value(hi)).sum()
    }

    /// Squared violation of a stacked constraint vector (`h ≥ 0`
    /// convention): `Σ min(0, h_i)²`.
    pub fn violation_squared(h: &Vector) -> Scalar {
        h.iter().map(|&hi| hi.min(0.0).powi(2)).sum()
    }

    /// Gauss-Newton quadratic model of the summed penalty, built from the
    /// constraint linearization. Second-order constraint terms are dropped;
    /// the barrier curvature `p''·∇h'∇h` dominates near the boundary.
    pub fn quadratic_approximation(
        &self,
        constraint: &VectorLinearApproximation,
    ) -> ScalarQuadraticApproximation {
        let nx = constraint.dfdx.ncols();
        let nu = constraint.dfdu.ncols();
        let mut penalty = ScalarQuadraticApproximation::zero(nx, nu);

        for i in 0..constraint.f.len() {
            let h = constraint.f[i];
            let p = self.value(h);
            let dp = self.derivative(h);
            let ddp = self.second_derivative(h);

            let hx = constraint.dfdx.row(i).transpose();
            let hu = constraint.dfdu.row(i).transpose();

            penalty.f += p;
            penalty.fx += &hx * dp;
            penalty.fu += &hu * dp;
            penalty.fxx += &hx * hx.transpose() * ddp;
            penalty.fuu += &hu * hu.transpose() * ddp;
            penalty.fux += &hu * hx.transpose() * ddp;
        }
        penalty
    }

    /// Quadratic model of the summed penalty from a second-order constraint
    /// model: the Gauss-Newton part plus the constraint-curvature terms
    /// `p'·∇²h`.
    pub fn quadratic_approximation_second_order(
        &self,
        constraint: &VectorQuadraticApproximation,
    ) -> ScalarQuadraticApproximation {
        let mut penalty = self.quadratic_approximation(&constraint.linear_part());
        for i in 0..constraint.f.len() {
            let dp = self.derivative(constraint.f[i]);
            penalty.fxx += &constraint.dfdxx[i] * dp;
            penalty.fux += &constraint.dfdux[i] * dp;
            penalty.fuu += &constraint.dfduu[i] * dp;
        }
        penalty
    }
}
