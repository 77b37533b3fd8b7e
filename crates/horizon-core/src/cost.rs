//! Cost term interfaces
//!
//! Costs are registered by name in collections and summed in insertion
//! order. Intermediate terms see state and input; pre-jump and terminal
//! terms see state only. Targets are passed at evaluation time so a term
//! never caches references into the reference manager.

use crate::precomputation::PreComputation;
use crate::reference::TargetTrajectories;
use crate::types::{Matrix, Scalar, ScalarQuadraticApproximation, Vector};

/// Intermediate cost term `L(t, x, u)`.
pub trait StateInputCost: Send + Sync {
    fn value(
        &self,
        t: Scalar,
        x: &Vector,
        u: &Vector,
        target: &TargetTrajectories,
        pre: &dyn PreComputation,
    ) -> Scalar;

    fn quadratic_approximation(
        &self,
        t: Scalar,
        x: &Vector,
        u: &Vector,
        target: &TargetTrajectories,
        pre: &dyn PreComputation,
    ) -> ScalarQuadraticApproximation;

    fn clone_boxed(&self) -> Box<dyn StateInputCost>;
}

/// State-only cost term `Φ(t, x)` (pre-jump or terminal).
pub trait StateCost: Send + Sync {
    fn value(
        &self,
        t: Scalar,
        x: &Vector,
        target: &TargetTrajectories,
        pre: &dyn PreComputation,
    ) -> Scalar;

    /// Quadratic model with zero input blocks (`nu = 0`).
    fn quadratic_approximation(
        &self,
        t: Scalar,
        x: &Vector,
        target: &TargetTrajectories,
        pre: &dyn PreComputation,
    ) -> ScalarQuadraticApproximation;

    fn clone_boxed(&self) -> Box<dyn StateCost>;
}

/// Quadratic tracking cost
/// `L = 1/2 (x - x_ref)' Q (x - x_ref) + 1/2 (u - u_ref)' R (u - u_ref)`.
#[derive(Debug, Clone)]
pub struct QuadraticStateInputCost {
    pub q: Matrix,
    pub r: Matrix,
}

impl QuadraticStateInputCost {
    pub fn new(q: Matrix, r: Matrix) -> Self {
        assert_eq!(q.nrows(), q.ncols());
        assert_eq!(r.nrows(), r.ncols());
        Self { q, r }
    }
}

impl StateInputCost for QuadraticStateInputCost {
    fn value(
        &self,
        t: Scalar,
        x: &Vector,
        u: &Vector,
        target: &TargetTrajectories,
        _pre: &dyn PreComputation,
    ) -> Scalar {
        let dx = target.state_deviation(t, x);
        let du = target.input_deviation(t, u);
        0.5 * dx.dot(&(&self.q * &dx)) + 0.5 * du.dot(&(&self.r * &du))
    }

    fn quadratic_approximation(
        &self,
        t: Scalar,
        x: &Vector,
        u: &Vector,
        target: &TargetTrajectories,
        _pre: &dyn PreComputation,
    ) -> ScalarQuadraticApproximation {
        let dx = target.state_deviation(t, x);
        let du = target.input_deviation(t, u);
        let qdx = &self.q * &dx;
        let rdu = &self.r * &du;
        ScalarQuadraticApproximation {
            f: 0.5 * dx.dot(&qdx) + 0.5 * du.dot(&rdu),
            fx: qdx,
            fu: rdu,
            fxx: self.q.clone(),
            fux: Matrix::zeros(u.len(), x.len()),
            fuu: self.r.clone(),
        }
    }

    fn clone_boxed(&self) -> Box<dyn StateInputCost> {
        Box::new(self.clone())
    }
}

/// Quadratic state-only cost `Φ = 1/2 (x - x_ref)' Q (x - x_ref)`.
#[derive(Debug, Clone)]
pub struct QuadraticStateCost {
    pub q: Matrix,
}

impl QuadraticStateCost {
    pub fn new(q: Matrix) -> Self {
        assert_eq!(q.nrows(), q.ncols());
        Self { q }
    }
}

impl StateCost for QuadraticStateCost {
    fn value(
        &self,
        t: Scalar,
        x: &Vector,
        target: &TargetTrajectories,
        _pre: &dyn PreComputation,
    ) -> Scalar {
        let dx = target.state_deviation(t, x);
        0.5 * dx.dot(&(&self.q * &dx))
    }

    fn quadratic_approximation(
        &self,
        t: Scalar,
        x: &Vector,
        target: &TargetTrajectories,
        _pre: &dyn PreComputation,
    ) -> ScalarQuadraticApproximation {
        let dx = target.state_deviation(t, x);
        let qdx = &self.q * &dx;
        ScalarQuadraticApproximation {
            f: 0.5 * dx.dot(&qdx),
            fx: qdx,
            fu: Vector::zeros(0),
            fxx: self.q.clone(),
            fux: Matrix::zeros(0, x.len()),
            fuu: Matrix::zeros(0, 0),
        }
    }

    fn clone_boxed(&self) -> Box<dyn StateCost> {
        Box::new(self.clone())
    }
}
