//! Multiple-shooting transcription
//!
//! Builds the per-node pieces of the structured QP: defect dynamics from a
//! sensitivity-aware discretization, stage costs scaled by the interval
//! length, linearized stage equality constraints (optionally eliminated by
//! projection), and inequality constraints folded into the cost through the
//! relaxed barrier. Each node also contributes its share of the
//! [`PerformanceIndex`].

use horizon_core::approximate::{
    approximate_event_node, approximate_final_node, approximate_intermediate_node, compute_cost,
    compute_event_cost, compute_final_cost, evaluate_constraints,
};
use horizon_core::constraint::stack_state_values;
use horizon_core::error::SolverError;
use horizon_core::integrator::{fixed_step, sensitivity_discretize, IntegratorType};
use horizon_core::penalty::RelaxedBarrierPenalty;
use horizon_core::performance::PerformanceIndex;
use horizon_core::problem::OptimalControlProblem;
use horizon_core::projection::{compute_projection, ConstraintProjection};
use horizon_core::types::{
    Scalar, ScalarQuadraticApproximation, Vector, VectorLinearApproximation,
};

/// Quadratic penalty coefficient folding state-only equality constraints
/// into the stage cost. The filter line search tracks the violation itself
/// through `state_eq_ise`.
const STATE_EQ_PENALTY: Scalar = 1e3;

/// LQ pieces of one transcribed node.
pub struct TranscribedNode {
    pub performance: PerformanceIndex,
    /// Defect dynamics in delta coordinates:
    /// `δx_{i+1} = A δx_i + B δu_i + c`, `c = Φ(x_i, u_i) − x_{i+1}`.
    pub dynamics: VectorLinearApproximation,
    pub cost: ScalarQuadraticApproximation,
    /// Stage state-input equality constraints handed to the QP (empty when
    /// projected away).
    pub constraints: VectorLinearApproximation,
    pub projection: Option<ConstraintProjection>,
}

/// Assembles an intermediate shooting node.
pub fn setup_intermediate_node(
    problem: &mut OptimalControlProblem,
    scheme: IntegratorType,
    penalty: &RelaxedBarrierPenalty,
    project_equalities: bool,
    t: Scalar,
    dt: Scalar,
    x: &Vector,
    x_next: &Vector,
    u: &Vector,
) -> Result<TranscribedNode, SolverError> {
    let model = approximate_intermediate_node(problem, t, x, u)?;

    // discretize the flow sensitivities over the interval
    let dynamics_obj = &problem.dynamics;
    let pre = problem.pre_computation.as_ref();
    let flow = |ti: Scalar, xi: &Vector, ui: &Vector| dynamics_obj.flow_map(ti, xi, ui, pre);
    let linearize = |ti: Scalar, xi: &Vector, ui: &Vector| {
        let lin = dynamics_obj.flow_map_linearization(ti, xi, ui, pre);
        (lin.dfdx, lin.dfdu)
    };
    let (ad, bd, cd) = sensitivity_discretize(scheme, t, x, u, dt, &flow, &linearize);

    let defect = &cd - x_next;
    let dynamics = VectorLinearApproximation {
        dfdx: ad,
        dfdu: bd,
        f: defect.clone(),
    };

    let mut performance = PerformanceIndex::default();
    performance.total_cost = dt * model.cost.f;
    performance.state_eq_ise = dt * defect.norm_squared();

    // stage cost, scaled to the interval
    let mut cost = model.cost;
    cost.f *= dt;
    cost.fx *= dt;
    cost.fu *= dt;
    cost.fxx *= dt;
    cost.fux *= dt;
    cost.fuu *= dt;

    // inequality constraints enter through the relaxed barrier
    if model.ineq_constraint.num_outputs() > 0 {
        performance.inequality_ise +=
            dt * RelaxedBarrierPenalty::violation_squared(&model.ineq_constraint.f);
        performance.inequality_penalty += dt * penalty.total_value(&model.ineq_constraint.f);
        let mut barrier = penalty.quadratic_approximation_second_order(&model.ineq_constraint);
        barrier.f *= dt;
        barrier.fx *= dt;
        barrier.fu *= dt;
        barrier.fxx *= dt;
        barrier.fux *= dt;
        barrier.fuu *= dt;
        cost += &barrier;
    }

    // state-only equality constraints fold into the cost quadratically
    if model.state_eq_constraint.num_outputs() > 0 {
        let h = &model.state_eq_constraint.f;
        let hx = &model.state_eq_constraint.dfdx;
        performance.state_eq_ise += dt * h.norm_squared();
        cost.f += 0.5 * STATE_EQ_PENALTY * dt * h.norm_squared();
        cost.fx += hx.transpose() * h * (STATE_EQ_PENALTY * dt);
        cost.fxx += hx.transpose() * hx * (STATE_EQ_PENALTY * dt);
    }

    // state-input equality constraints: project or hand to the QP
    let stage_eq = model.state_input_eq_constraint;
    performance.state_input_eq_ise += dt * stage_eq.f.norm_squared();

    let (constraints, projection) = if stage_eq.num_outputs() == 0 {
        (VectorLinearApproximation::zero(0, x.len(), u.len()), None)
    } else if project_equalities {
        match compute_projection(&stage_eq) {
            Some(projection) => (
                VectorLinearApproximation::zero(0, x.len(), u.len()),
                Some(projection),
            ),
            // a projection needs full row rank; rank-deficient rows stay
            // explicit and the QP backend carries them
            None => (stage_eq, None),
        }
    } else {
        (stage_eq, None)
    };

    Ok(TranscribedNode {
        performance,
        dynamics,
        cost,
        constraints,
        projection,
    })
}

/// Assembles a (zero-duration) event node: linearized jump dynamics and the
/// pre-jump cost. The node carries no input.
pub fn setup_event_node(
    problem: &mut OptimalControlProblem,
    t: Scalar,
    x: &Vector,
    x_next: &Vector,
) -> Result<TranscribedNode, SolverError> {
    let model = approximate_event_node(problem, t, x)?;

    let defect = &model.dynamics.f - x_next;
    let dynamics = VectorLinearApproximation {
        dfdx: model.dynamics.dfdx.clone(),
        dfdu: nalgebra::DMatrix::zeros(x.len(), 0),
        f: defect.clone(),
    };

    let mut performance = PerformanceIndex::default();
    performance.total_cost = model.cost.f;
    performance.state_eq_ise = defect.norm_squared();

    let mut cost = model.cost;
    if model.state_eq_constraint.num_outputs() > 0 {
        let h = &model.state_eq_constraint.f;
        let hx = &model.state_eq_constraint.dfdx;
        performance.state_eq_ise += h.norm_squared();
        cost.f += 0.5 * STATE_EQ_PENALTY * h.norm_squared();
        cost.fx += hx.transpose() * h * STATE_EQ_PENALTY;
        cost.fxx += hx.transpose() * hx * STATE_EQ_PENALTY;
    }

    Ok(TranscribedNode {
        performance,
        dynamics,
        cost,
        constraints: VectorLinearApproximation::zero(0, x.len(), 0),
        projection: None,
    })
}

/// Terminal cost and constraint of the last node.
pub struct TerminalNode {
    pub performance: PerformanceIndex,
    pub cost: ScalarQuadraticApproximation,
}

/// Assembles the terminal node.
pub fn setup_terminal_node(
    problem: &mut OptimalControlProblem,
    t: Scalar,
    x: &Vector,
) -> Result<TerminalNode, SolverError> {
    let model = approximate_final_node(problem, t, x)?;

    let mut performance = PerformanceIndex::default();
    performance.total_cost = model.cost.f;

    let mut cost = model.cost;
    if model.state_eq_constraint.num_outputs() > 0 {
        let h = &model.state_eq_constraint.f;
        let hx = &model.state_eq_constraint.dfdx;
        performance.state_eq_final_sse += h.norm_squared();
        performance.state_eq_ise += h.norm_squared();
        cost.f += 0.5 * STATE_EQ_PENALTY * h.norm_squared();
        cost.fx += hx.transpose() * h * STATE_EQ_PENALTY;
        cost.fxx += hx.transpose() * hx * STATE_EQ_PENALTY;
    }

    Ok(TerminalNode { performance, cost })
}

/// Performance contribution of an intermediate node without building
/// models; used by the line-search sweep.
pub fn compute_intermediate_performance(
    problem: &mut OptimalControlProblem,
    scheme: IntegratorType,
    penalty: &RelaxedBarrierPenalty,
    t: Scalar,
    dt: Scalar,
    x: &Vector,
    x_next: &Vector,
    u: &Vector,
) -> PerformanceIndex {
    let mut performance = PerformanceIndex::default();
    performance.total_cost = dt * compute_cost(problem, t, x, u);

    // propagate the nominal point to measure the defect
    let dynamics_obj = &problem.dynamics;
    let pre = problem.pre_computation.as_ref();
    let propagated = fixed_step(scheme, x, t, dt, &|ti, xi| {
        dynamics_obj.flow_map(ti, xi, u, pre)
    });
    performance.state_eq_ise = dt * (&propagated - x_next).norm_squared();

    let values = evaluate_constraints(problem, t, x, u);
    performance.state_input_eq_ise = dt * values.state_input_eq.norm_squared();
    performance.state_eq_ise += dt * values.state_eq.norm_squared();
    if values.inequality.len() > 0 {
        performance.inequality_ise =
            dt * RelaxedBarrierPenalty::violation_squared(&values.inequality);
        performance.inequality_penalty = dt * penalty.total_value(&values.inequality);
    }
    performance
}

/// Performance contribution of an event node.
pub fn compute_event_performance(
    problem: &mut OptimalControlProblem,
    t: Scalar,
    x: &Vector,
    x_next: &Vector,
) -> PerformanceIndex {
    let mut performance = PerformanceIndex::default();
    performance.total_cost = compute_event_cost(problem, t, x);
    let jumped = problem
        .dynamics
        .jump_map(t, x, problem.pre_computation.as_ref());
    performance.state_eq_ise = (&jumped - x_next).norm_squared();
    let h = stack_state_values(
        &problem.pre_jump_equality,
        t,
        x,
        problem.pre_computation.as_ref(),
    );
    performance.state_eq_ise += h.norm_squared();
    performance
}

/// Performance contribution of the terminal node.
pub fn compute_terminal_performance(
    problem: &mut OptimalControlProblem,
    t: Scalar,
    x: &Vector,
) -> PerformanceIndex {
    let mut performance = PerformanceIndex::default();
    performance.total_cost = compute_final_cost(problem, t, x);
    let h = stack_state_values(
        &problem.final_equality,
        t,
        x,
        problem.pre_computation.as_ref(),
    );
    performance.state_eq_final_sse = h.norm_squared();
    performance.state_eq_ise += h.norm_squared();
    performance
}

#[cfg(test)]
mod tests {
    use super::*;
    use horizon_core::constraint::LinearStateInputConstraint;
    use horizon_core::cost::QuadraticStateInputCost;
    use horizon_core::dynamics::LinearSystemDynamics;
    use horizon_core::reference::TargetTrajectories;
    use horizon_core::types::Matrix;
    use approx::assert_relative_eq;

    fn double_integrator() -> OptimalControlProblem {
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
        problem.target_trajectories =
            TargetTrajectories::constant(Vector::zeros(2), Vector::zeros(1));
        problem
    }

    #[test]
    fn test_defect_vanishes_on_consistent_pair() {
        let mut problem = double_integrator();
        let x = Vector::from_vec(vec![1.0, 0.0]);
        let u = Vector::from_vec(vec![0.0]);
        let dt = 0.1;

        // propagate exactly with the same scheme
        let pre = horizon_core::precomputation::NoOpPreComputation;
        let x_next = fixed_step(IntegratorType::Rk2, &x, 0.0, dt, &|t, s| {
            problem.dynamics.flow_map(t, s, &u, &pre)
        });

        let node = setup_intermediate_node(
            &mut problem,
            IntegratorType::Rk2,
            &RelaxedBarrierPenalty::default(),
            false,
            0.0,
            dt,
            &x,
            &x_next,
            &u,
        )
        .unwrap();
        assert_relative_eq!(node.dynamics.f.norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(node.performance.state_eq_ise, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_projection_produced_when_enabled() {
        let mut problem = double_integrator();
        problem
            .equality
            .add(
                "input-lock",
                Box::new(LinearStateInputConstraint::new(
                    Matrix::zeros(1, 2),
                    Matrix::from_row_slice(1, 1, &[1.0]),
                    Vector::from_vec(vec![-0.3]),
                )),
            )
            .unwrap();

        let x = Vector::from_vec(vec![0.0, 0.0]);
        let node = setup_intermediate_node(
            &mut problem,
            IntegratorType::Rk2,
            &RelaxedBarrierPenalty::default(),
            true,
            0.0,
            0.1,
            &x,
            &x,
            &Vector::from_vec(vec![0.0]),
        )
        .unwrap();
        assert!(node.projection.is_some());
        assert_eq!(node.constraints.num_outputs(), 0);
        assert!(node.performance.state_input_eq_ise > 0.0);
    }

    #[test]
    fn test_rank_deficient_rows_stay_explicit() {
        // two linearly dependent constraint rows: no projection exists, so
        // the rows must be handed to the QP instead of failing the node
        let mut problem = OptimalControlProblem::new(Box::new(LinearSystemDynamics::new(
            Matrix::from_row_slice(2, 2, &[0.0, 1.0, 0.0, 0.0]),
            Matrix::identity(2, 2),
        )));
        problem
            .cost
            .add(
                "lq",
                Box::new(QuadraticStateInputCost::new(
                    Matrix::identity(2, 2),
                    Matrix::identity(2, 2),
                )),
            )
            .unwrap();
        problem
            .equality
            .add(
                "dependent-pair",
                Box::new(LinearStateInputConstraint::new(
                    Matrix::zeros(2, 2),
                    Matrix::from_row_slice(2, 2, &[1.0, 0.0, 2.0, 0.0]),
                    Vector::from_vec(vec![0.1, 0.2]),
                )),
            )
            .unwrap();

        let x = Vector::from_vec(vec![0.0, 0.0]);
        let node = setup_intermediate_node(
            &mut problem,
            IntegratorType::Rk2,
            &RelaxedBarrierPenalty::default(),
            true,
            0.0,
            0.1,
            &x,
            &x,
            &Vector::from_vec(vec![0.0, 0.0]),
        )
        .unwrap();
        assert!(node.projection.is_none());
        assert_eq!(node.constraints.num_outputs(), 2);
    }

    #[test]
    fn test_event_node_defect() {
        let mut problem = double_integrator();
        let x = Vector::from_vec(vec![1.0, 1.0]);
        // identity jump, mismatched next state
        let x_next = Vector::from_vec(vec![1.0, 0.0]);
        let node = setup_event_node(&mut problem, 0.5, &x, &x_next).unwrap();
        assert_relative_eq!(node.performance.state_eq_ise, 1.0);
        assert_eq!(node.dynamics.dfdu.ncols(), 0);
    }
}
