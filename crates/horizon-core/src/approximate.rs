//! Linear-quadratic approximation of the problem at a trajectory point
//!
//! Produces the per-node local models the solvers consume: linearized
//! (continuous-time) dynamics, quadratic cost, and linearized constraints,
//! evaluated through the problem's capability objects after issuing the
//! matching pre-computation request.

use crate::constraint::{
    stack_state_input_linearizations, stack_state_input_quadratics, stack_state_input_values,
    stack_state_linearizations, stack_state_values,
};
use crate::error::SolverError;
use crate::precomputation::Request;
use crate::problem::OptimalControlProblem;
use crate::types::{
    Scalar, ScalarQuadraticApproximation, Vector, VectorLinearApproximation,
    VectorQuadraticApproximation,
};

/// Local models of one node.
#[derive(Debug, Clone)]
pub struct ModelData {
    pub time: Scalar,
    pub state_dim: usize,
    pub input_dim: usize,
    /// Linearized flow map (intermediate nodes) or jump map (event nodes).
    pub dynamics: VectorLinearApproximation,
    /// Quadratic cost model.
    pub cost: ScalarQuadraticApproximation,
    /// State-only equality constraint linearization.
    pub state_eq_constraint: VectorLinearApproximation,
    /// State-input equality constraint linearization.
    pub state_input_eq_constraint: VectorLinearApproximation,
    /// Inequality constraint second-order model (`h ≥ 0`).
    pub ineq_constraint: VectorQuadraticApproximation,
}

impl ModelData {
    pub fn zero(time: Scalar, nx: usize, nu: usize) -> Self {
        Self {
            time,
            state_dim: nx,
            input_dim: nu,
            dynamics: VectorLinearApproximation::zero(nx, nx, nu),
            cost: ScalarQuadraticApproximation::zero(nx, nu),
            state_eq_constraint: VectorLinearApproximation::zero(0, nx, 0),
            state_input_eq_constraint: VectorLinearApproximation::zero(0, nx, nu),
            ineq_constraint: VectorQuadraticApproximation::zero(0, nx, nu),
        }
    }

    /// Checks shape contracts against the node dimensions.
    pub fn check_sizes(&self) -> Result<(), SolverError> {
        let checks: [(&'static str, usize, usize); 4] = [
            ("dynamics.dfdx rows", self.dynamics.dfdx.nrows(), self.dynamics.f.len()),
            ("dynamics.dfdx cols", self.dynamics.dfdx.ncols(), self.state_dim),
            ("cost.fx", self.cost.fx.len(), self.state_dim),
            ("cost.fu", self.cost.fu.len(), self.input_dim),
        ];
        for (what, got, expected) in checks {
            if got != expected {
                return Err(SolverError::DimensionMismatch {
                    what,
                    expected,
                    got,
                });
            }
        }
        Ok(())
    }

    /// Checks that every model coefficient is finite.
    pub fn check_finite(&self) -> Result<(), SolverError> {
        if self.dynamics.is_finite()
            && self.cost.is_finite()
            && self.state_eq_constraint.is_finite()
            && self.state_input_eq_constraint.is_finite()
            && self.ineq_constraint.is_finite()
        {
            Ok(())
        } else {
            Err(SolverError::DimensionMismatch {
                what: "non-finite model data",
                expected: 0,
                got: 0,
            })
        }
    }
}

/// Sums the intermediate cost terms at `(t, x, u)`.
pub fn compute_cost(
    problem: &OptimalControlProblem,
    t: Scalar,
    x: &Vector,
    u: &Vector,
) -> Scalar {
    let pre = problem.pre_computation.as_ref();
    let target = &problem.target_trajectories;
    let mut cost: Scalar = problem
        .cost
        .iter()
        .map(|term| term.value(t, x, u, target, pre))
        .sum();
    cost += problem
        .state_cost
        .iter()
        .map(|term| term.value(t, x, target, pre))
        .sum::<Scalar>();
    cost
}

/// Sums the pre-jump cost terms at `(t, x)`.
pub fn compute_event_cost(problem: &OptimalControlProblem, t: Scalar, x: &Vector) -> Scalar {
    let pre = problem.pre_computation.as_ref();
    let target = &problem.target_trajectories;
    problem
        .pre_jump_cost
        .iter()
        .map(|term| term.value(t, x, target, pre))
        .sum()
}

/// Sums the terminal cost terms at `(t, x)`.
pub fn compute_final_cost(problem: &OptimalControlProblem, t: Scalar, x: &Vector) -> Scalar {
    let pre = problem.pre_computation.as_ref();
    let target = &problem.target_trajectories;
    problem
        .final_cost
        .iter()
        .map(|term| term.value(t, x, target, pre))
        .sum()
}

/// Quadratic model of the summed intermediate cost.
pub fn approximate_cost(
    problem: &OptimalControlProblem,
    t: Scalar,
    x: &Vector,
    u: &Vector,
) -> ScalarQuadraticApproximation {
    let pre = problem.pre_computation.as_ref();
    let target = &problem.target_trajectories;
    let mut cost = ScalarQuadraticApproximation::zero(x.len(), u.len());
    for term in problem.cost.iter() {
        cost += &term.quadratic_approximation(t, x, u, target, pre);
    }
    for term in problem.state_cost.iter() {
        cost.add_state_only(&term.quadratic_approximation(t, x, target, pre));
    }
    cost
}

/// Quadratic model of the summed state-only cost of the given collection,
/// widened to the node's input dimension (zero input blocks).
fn approximate_state_cost(
    problem: &OptimalControlProblem,
    collection: &crate::collection::Collection<dyn crate::cost::StateCost>,
    t: Scalar,
    x: &Vector,
    nu: usize,
) -> ScalarQuadraticApproximation {
    let pre = problem.pre_computation.as_ref();
    let target = &problem.target_trajectories;
    let mut cost = ScalarQuadraticApproximation::zero(x.len(), nu);
    for term in collection.iter() {
        cost.add_state_only(&term.quadratic_approximation(t, x, target, pre));
    }
    cost
}

/// Full LQ model of an intermediate node.
///
/// The dynamics entry is the continuous-time flow linearization; the caller
/// discretizes it (or feeds it to the sensitivity discretizer directly).
pub fn approximate_intermediate_node(
    problem: &mut OptimalControlProblem,
    t: Scalar,
    x: &Vector,
    u: &Vector,
) -> Result<ModelData, SolverError> {
    let flags = Request::DYNAMICS
        | Request::COST
        | Request::CONSTRAINT
        | Request::SOFT_CONSTRAINT
        | Request::APPROXIMATION;
    problem.pre_computation.request(flags, t, x, u);
    let pre = problem.pre_computation.as_ref();

    let mut model = ModelData::zero(t, x.len(), u.len());
    model.dynamics = problem.dynamics.flow_map_linearization(t, x, u, pre);
    model.cost = approximate_cost(problem, t, x, u);
    model.state_input_eq_constraint = stack_state_input_linearizations(&problem.equality, t, x, u, pre);
    model.state_eq_constraint = stack_state_linearizations(&problem.state_equality, t, x, pre);
    model.ineq_constraint = stack_state_input_quadratics(&problem.inequality, t, x, u, pre);

    if model.state_input_eq_constraint.f.len() > u.len() {
        return Err(SolverError::DimensionMismatch {
            what: "state-input equality constraint rows",
            expected: u.len(),
            got: model.state_input_eq_constraint.f.len(),
        });
    }

    model.check_sizes()?;
    Ok(model)
}

/// LQ model of a pre-jump (event) node: linearized jump map, event cost,
/// event constraint. The node carries no input.
pub fn approximate_event_node(
    problem: &mut OptimalControlProblem,
    t: Scalar,
    x: &Vector,
) -> Result<ModelData, SolverError> {
    let flags = Request::DYNAMICS | Request::COST | Request::CONSTRAINT | Request::APPROXIMATION;
    problem.pre_computation.request_pre_jump(flags, t, x);
    let pre = problem.pre_computation.as_ref();

    let mut model = ModelData::zero(t, x.len(), 0);
    model.dynamics = problem.dynamics.jump_map_linearization(t, x, pre);
    model.cost = approximate_state_cost(problem, &problem.pre_jump_cost, t, x, 0);
    model.state_eq_constraint = stack_state_linearizations(&problem.pre_jump_equality, t, x, pre);
    model.check_sizes()?;
    Ok(model)
}

/// LQ model of the terminal node: terminal cost and constraint, no
/// dynamics.
pub fn approximate_final_node(
    problem: &mut OptimalControlProblem,
    t: Scalar,
    x: &Vector,
) -> Result<ModelData, SolverError> {
    let flags = Request::COST | Request::CONSTRAINT | Request::APPROXIMATION;
    problem.pre_computation.request_final(flags, t, x);
    let pre = problem.pre_computation.as_ref();

    let mut model = ModelData::zero(t, x.len(), 0);
    model.dynamics = VectorLinearApproximation::zero(0, x.len(), 0);
    model.cost = approximate_state_cost(problem, &problem.final_cost, t, x, 0);
    model.state_eq_constraint = stack_state_linearizations(&problem.final_equality, t, x, pre);
    Ok(model)
}

/// Constraint values of an intermediate node, for performance evaluation.
pub struct ConstraintValues {
    pub state_input_eq: Vector,
    pub state_eq: Vector,
    pub inequality: Vector,
}

/// Evaluates the raw constraint values at `(t, x, u)`.
pub fn evaluate_constraints(
    problem: &mut OptimalControlProblem,
    t: Scalar,
    x: &Vector,
    u: &Vector,
) -> ConstraintValues {
    let flags = Request::CONSTRAINT | Request::SOFT_CONSTRAINT;
    problem.pre_computation.request(flags, t, x, u);
    let pre = problem.pre_computation.as_ref();
    ConstraintValues {
        state_input_eq: stack_state_input_values(&problem.equality, t, x, u, pre),
        state_eq: stack_state_values(&problem.state_equality, t, x, pre),
        inequality: stack_state_input_values(&problem.inequality, t, x, u, pre),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::{QuadraticStateCost, QuadraticStateInputCost};
    use crate::dynamics::LinearSystemDynamics;
    use crate::reference::TargetTrajectories;
    use crate::types::Matrix;
    use approx::assert_relative_eq;

    fn example_problem() -> OptimalControlProblem {
        let mut problem = OptimalControlProblem::new(Box::new(LinearSystemDynamics::new(
            Matrix::from_row_slice(2, 2, &[0.0, 1.0, 0.0, 0.0]),
            Matrix::from_row_slice(2, 1, &[0.0, 1.0]),
        )));
        problem
            .cost
            .add(
                "lq",
                Box::new(QuadraticStateInputCost::new(
                    Matrix::identity(2, 2),
                    Matrix::identity(1, 1),
                )),
            )
            .unwrap();
        problem
            .final_cost
            .add("terminal", Box::new(QuadraticStateCost::new(Matrix::identity(2, 2))))
            .unwrap();
        problem.target_trajectories =
            TargetTrajectories::constant(Vector::zeros(2), Vector::zeros(1));
        problem
    }

    #[test]
    fn test_intermediate_model_shapes() {
        let mut problem = example_problem();
        let x = Vector::from_vec(vec![1.0, -1.0]);
        let u = Vector::from_vec(vec![0.5]);
        let model = approximate_intermediate_node(&mut problem, 0.0, &x, &u).unwrap();
        assert_eq!(model.dynamics.dfdx.shape(), (2, 2));
        assert_eq!(model.dynamics.dfdu.shape(), (2, 1));
        assert_eq!(model.cost.fxx.shape(), (2, 2));
        assert_relative_eq!(model.cost.f, 0.5 * (1.0 + 1.0) + 0.5 * 0.25);
    }

    #[test]
    fn test_event_node_has_no_input_columns() {
        let mut problem = example_problem();
        let x = Vector::from_vec(vec![1.0, 0.0]);
        let model = approximate_event_node(&mut problem, 0.5, &x).unwrap();
        assert_eq!(model.dynamics.dfdu.ncols(), 0);
        assert_eq!(model.input_dim, 0);
    }

    #[test]
    fn test_final_node_cost() {
        let mut problem = example_problem();
        let x = Vector::from_vec(vec![2.0, 0.0]);
        let model = approximate_final_node(&mut problem, 1.0, &x).unwrap();
        assert_relative_eq!(model.cost.f, 2.0);
        assert_eq!(model.dynamics.f.len(), 0);
    }
}
