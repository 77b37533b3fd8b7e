//! System dynamics interface
//!
//! A hybrid system is described by its flow map between events, a jump map
//! applied at events, and optional guard surfaces whose zero crossings mark
//! state-triggered events. Derivatives may come from analytic expressions,
//! finite differences or an AD backend; the solvers only see the local
//! models.

use crate::precomputation::PreComputation;
use crate::types::{Matrix, Scalar, Vector, VectorLinearApproximation};

/// Continuous-time (possibly hybrid) controlled system.
pub trait SystemDynamics: Send + Sync {
    /// Flow map `ẋ = f(t, x, u)`.
    fn flow_map(&self, t: Scalar, x: &Vector, u: &Vector, pre: &dyn PreComputation) -> Vector;

    /// Jump map applied at an event; defaults to the identity.
    fn jump_map(&self, _t: Scalar, x: &Vector, _pre: &dyn PreComputation) -> Vector {
        x.clone()
    }

    /// Guard surfaces for state-triggered events; empty when the system has
    /// none (events then come from the mode schedule only).
    fn guard(&self, _t: Scalar, _x: &Vector) -> Vector {
        Vector::zeros(0)
    }

    /// First-order model of the flow map at `(t, x, u)`.
    fn flow_map_linearization(
        &self,
        t: Scalar,
        x: &Vector,
        u: &Vector,
        pre: &dyn PreComputation,
    ) -> VectorLinearApproximation;

    /// First-order model of the jump map at `(t, x)`; defaults to the
    /// identity jump.
    fn jump_map_linearization(
        &self,
        t: Scalar,
        x: &Vector,
        pre: &dyn PreComputation,
    ) -> VectorLinearApproximation {
        let nx = x.len();
        VectorLinearApproximation {
            dfdx: Matrix::identity(nx, nx),
            dfdu: Matrix::zeros(nx, 0),
            f: self.jump_map(t, x, pre),
        }
    }

    fn clone_boxed(&self) -> Box<dyn SystemDynamics>;
}

/// Time-invariant linear system `ẋ = A x + B u` with an optional linear
/// jump `x⁺ = G x`.
#[derive(Debug, Clone)]
pub struct LinearSystemDynamics {
    pub a: Matrix,
    pub b: Matrix,
    pub g: Option<Matrix>,
}

impl LinearSystemDynamics {
    pub fn new(a: Matrix, b: Matrix) -> Self {
        assert_eq!(a.nrows(), a.ncols());
        assert_eq!(a.nrows(), b.nrows());
        Self { a, b, g: None }
    }

    pub fn with_jump(mut self, g: Matrix) -> Self {
        assert_eq!(g.nrows(), self.a.nrows());
        self.g = Some(g);
        self
    }
}

impl SystemDynamics for LinearSystemDynamics {
    fn flow_map(&self, _t: Scalar, x: &Vector, u: &Vector, _pre: &dyn PreComputation) -> Vector {
        &self.a * x + &self.b * u
    }

    fn jump_map(&self, _t: Scalar, x: &Vector, _pre: &dyn PreComputation) -> Vector {
        match &self.g {
            Some(g) => g * x,
            None => x.clone(),
        }
    }

    fn flow_map_linearization(
        &self,
        _t: Scalar,
        x: &Vector,
        u: &Vector,
        _pre: &dyn PreComputation,
    ) -> VectorLinearApproximation {
        VectorLinearApproximation {
            dfdx: self.a.clone(),
            dfdu: self.b.clone(),
            f: &self.a * x + &self.b * u,
        }
    }

    fn jump_map_linearization(
        &self,
        _t: Scalar,
        x: &Vector,
        _pre: &dyn PreComputation,
    ) -> VectorLinearApproximation {
        let nx = x.len();
        match &self.g {
            Some(g) => VectorLinearApproximation {
                dfdx: g.clone(),
                dfdu: Matrix::zeros(nx, 0),
                f: g * x,
            },
            None => VectorLinearApproximation {
                dfdx: Matrix::identity(nx, nx),
                dfdu: Matrix::zeros(nx, 0),
                f: x.clone(),
            },
        }
    }

    fn clone_boxed(&self) -> Box<dyn SystemDynamics> {
        Box::new(self.clone())
    }
}
