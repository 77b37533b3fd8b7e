//! Shared benchmark problems for the solver integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use horizon_core::constraint::StateInputConstraint;
use horizon_core::cost::{QuadraticStateCost, QuadraticStateInputCost, StateInputCost};
use horizon_core::dynamics::SystemDynamics;
use horizon_core::precomputation::PreComputation;
use horizon_core::problem::OptimalControlProblem;
use horizon_core::reference::{ModeSchedule, ReferenceManager, TargetTrajectories};
use horizon_core::types::{
    Matrix, Scalar, ScalarQuadraticApproximation, Vector, VectorLinearApproximation,
};

/// Planar point kinematics `ẋ = u` tracking a unit-speed motion around the
/// unit circle. The cost penalizes drift off the circle and deviation from
/// unit tangential speed; the equality constraint pins the radial input to
/// zero.
#[derive(Debug, Clone)]
pub struct CircularKinematicsDynamics;

impl SystemDynamics for CircularKinematicsDynamics {
    fn flow_map(&self, _t: Scalar, _x: &Vector, u: &Vector, _pre: &dyn PreComputation) -> Vector {
        u.clone()
    }

    fn flow_map_linearization(
        &self,
        _t: Scalar,
        x: &Vector,
        u: &Vector,
        _pre: &dyn PreComputation,
    ) -> VectorLinearApproximation {
        VectorLinearApproximation {
            dfdx: Matrix::zeros(x.len(), x.len()),
            dfdu: Matrix::identity(u.len(), u.len()),
            f: u.clone(),
        }
    }

    fn clone_boxed(&self) -> Box<dyn SystemDynamics> {
        Box::new(self.clone())
    }
}

/// `L = 1/2 (x'x − 1)² + 1/2 (x₀u₁ − x₁u₀ − 1)² + 0.005 u'u`, with
/// Gauss-Newton curvature.
#[derive(Debug, Clone)]
pub struct CircularKinematicsCost;

impl StateInputCost for CircularKinematicsCost {
    fn value(
        &self,
        _t: Scalar,
        x: &Vector,
        u: &Vector,
        _target: &TargetTrajectories,
        _pre: &dyn PreComputation,
    ) -> Scalar {
        let radial = x.dot(x) - 1.0;
        let tangential = x[0] * u[1] - x[1] * u[0] - 1.0;
        0.5 * radial * radial + 0.5 * tangential * tangential + 0.005 * u.dot(u)
    }

    fn quadratic_approximation(
        &self,
        _t: Scalar,
        x: &Vector,
        u: &Vector,
        _target: &TargetTrajectories,
        _pre: &dyn PreComputation,
    ) -> ScalarQuadraticApproximation {
        let radial = x.dot(x) - 1.0;
        let tangential = x[0] * u[1] - x[1] * u[0] - 1.0;

        let radial_x = x * 2.0;
        let tangential_x = Vector::from_vec(vec![u[1], -u[0]]);
        let tangential_u = Vector::from_vec(vec![-x[1], x[0]]);

        let mut q = ScalarQuadraticApproximation::zero(2, 2);
        q.f = 0.5 * radial * radial + 0.5 * tangential * tangential + 0.005 * u.dot(u);
        q.fx = &radial_x * radial + &tangential_x * tangential;
        q.fu = &tangential_u * tangential + u * 0.01;
        q.fxx = &radial_x * radial_x.transpose() + &tangential_x * tangential_x.transpose();
        q.fuu = &tangential_u * tangential_u.transpose() + Matrix::identity(2, 2) * 0.01;
        q.fux = &tangential_u * tangential_x.transpose();
        q
    }

    fn clone_boxed(&self) -> Box<dyn StateInputCost> {
        Box::new(self.clone())
    }
}

/// Radial-velocity constraint `x·u = 0`.
#[derive(Debug, Clone)]
pub struct RadialInputConstraint;

impl StateInputConstraint for RadialInputConstraint {
    fn num_constraints(&self, _t: Scalar) -> usize {
        1
    }

    fn value(&self, _t: Scalar, x: &Vector, u: &Vector, _pre: &dyn PreComputation) -> Vector {
        Vector::from_vec(vec![x.dot(u)])
    }

    fn linear_approximation(
        &self,
        _t: Scalar,
        x: &Vector,
        u: &Vector,
        _pre: &dyn PreComputation,
    ) -> VectorLinearApproximation {
        VectorLinearApproximation {
            dfdx: Matrix::from_row_slice(1, 2, &[u[0], u[1]]),
            dfdu: Matrix::from_row_slice(1, 2, &[x[0], x[1]]),
            f: Vector::from_vec(vec![x.dot(u)]),
        }
    }

    fn clone_boxed(&self) -> Box<dyn StateInputConstraint> {
        Box::new(self.clone())
    }
}

/// Builds the circular-kinematics problem, starting on the circle at
/// `x0 = (1, 0)`.
pub fn circular_kinematics_problem() -> OptimalControlProblem {
    let mut problem = OptimalControlProblem::new(Box::new(CircularKinematicsDynamics));
    problem
        .cost
        .add("tracking", Box::new(CircularKinematicsCost))
        .unwrap();
    problem
        .equality
        .add("radial-velocity", Box::new(RadialInputConstraint))
        .unwrap();
    problem
}

/// Two-mode switched linear system used by the hybrid tests. Mode 0 is
/// active before the switch time, mode 1 after; the state is continuous
/// across the switch (identity jump).
#[derive(Debug, Clone)]
pub struct TwoModeDynamics {
    pub a1: Matrix,
    pub b1: Matrix,
    pub a2: Matrix,
    pub b2: Matrix,
    pub switch_time: Scalar,
}

impl TwoModeDynamics {
    fn system(&self, t: Scalar) -> (&Matrix, &Matrix) {
        if t < self.switch_time {
            (&self.a1, &self.b1)
        } else {
            (&self.a2, &self.b2)
        }
    }
}

impl SystemDynamics for TwoModeDynamics {
    fn flow_map(&self, t: Scalar, x: &Vector, u: &Vector, _pre: &dyn PreComputation) -> Vector {
        let (a, b) = self.system(t);
        a * x + b * u
    }

    fn flow_map_linearization(
        &self,
        t: Scalar,
        x: &Vector,
        u: &Vector,
        _pre: &dyn PreComputation,
    ) -> VectorLinearApproximation {
        let (a, b) = self.system(t);
        VectorLinearApproximation {
            dfdx: a.clone(),
            dfdu: b.clone(),
            f: a * x + b * u,
        }
    }

    fn clone_boxed(&self) -> Box<dyn SystemDynamics> {
        Box::new(self.clone())
    }
}

/// Switch time of the hybrid benchmark.
pub const HYBRID_SWITCH_TIME: Scalar = 0.1897;

/// Builds the two-mode hybrid benchmark: unstable switched dynamics, a
/// velocity-tracking stage cost and a full-state terminal cost pulling the
/// state to `(4, 2)`.
pub fn hybrid_problem() -> OptimalControlProblem {
    let dynamics = TwoModeDynamics {
        a1: Matrix::from_row_slice(2, 2, &[0.6, 1.2, -0.8, 3.4]),
        b1: Matrix::from_row_slice(2, 1, &[1.0, 1.0]),
        a2: Matrix::from_row_slice(2, 2, &[4.0, 3.0, -1.0, 0.0]),
        b2: Matrix::from_row_slice(2, 1, &[2.0, -1.0]),
        switch_time: HYBRID_SWITCH_TIME,
    };
    let mut problem = OptimalControlProblem::new(Box::new(dynamics));
    problem
        .cost
        .add(
            "stage",
            Box::new(QuadraticStateInputCost::new(
                Matrix::from_row_slice(2, 2, &[0.0, 0.0, 0.0, 1.0]),
                Matrix::from_row_slice(1, 1, &[1.0]),
            )),
        )
        .unwrap();
    problem
        .final_cost
        .add(
            "terminal",
            Box::new(QuadraticStateCost::new(Matrix::identity(2, 2))),
        )
        .unwrap();
    problem
}

/// Reference manager of the hybrid benchmark: one event at the switch time
/// and a constant target `(4, 2)` with zero input.
pub fn hybrid_reference_manager() -> Arc<ReferenceManager> {
    ReferenceManager::new(
        ModeSchedule::new(vec![HYBRID_SWITCH_TIME], vec![0, 1]),
        TargetTrajectories::constant(
            Vector::from_vec(vec![4.0, 2.0]),
            Vector::from_vec(vec![0.0]),
        ),
    )
}

/// Input-tracking constraint `u₀ − sin(t) = 0` for the projection test.
#[derive(Debug, Clone)]
pub struct SineInputConstraint;

impl StateInputConstraint for SineInputConstraint {
    fn num_constraints(&self, _t: Scalar) -> usize {
        1
    }

    fn value(&self, t: Scalar, _x: &Vector, u: &Vector, _pre: &dyn PreComputation) -> Vector {
        Vector::from_vec(vec![u[0] - t.sin()])
    }

    fn linear_approximation(
        &self,
        t: Scalar,
        x: &Vector,
        u: &Vector,
        _pre: &dyn PreComputation,
    ) -> VectorLinearApproximation {
        VectorLinearApproximation {
            dfdx: Matrix::zeros(1, x.len()),
            dfdu: Matrix::from_row_slice(1, 2, &[1.0, 0.0]),
            f: Vector::from_vec(vec![u[0] - t.sin()]),
        }
    }

    fn clone_boxed(&self) -> Box<dyn StateInputConstraint> {
        Box::new(self.clone())
    }
}

/// Integrator dynamics `ẋ = u` with an LQ cost and the sine input-tracking
/// equality constraint.
pub fn sine_tracking_problem() -> OptimalControlProblem {
    let mut problem = OptimalControlProblem::new(Box::new(CircularKinematicsDynamics));
    problem
        .cost
        .add(
            "lq",
            Box::new(QuadraticStateInputCost::new(
                Matrix::identity(2, 2),
                Matrix::identity(2, 2) * 0.1,
            )),
        )
        .unwrap();
    problem
        .equality
        .add("sine-input", Box::new(SineInputConstraint))
        .unwrap();
    problem
}
