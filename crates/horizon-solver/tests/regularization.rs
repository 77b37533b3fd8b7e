//! Levenberg-Marquardt recovery from an indefinite Hamiltonian Hessian.
//!
//! The stage cost has concave input curvature at the zero-input initial
//! rollout, so the unregularized `Q_uu` starts indefinite. The strategy
//! must regularize, keep the backward pass alive, and still converge in a
//! bounded number of iterations.

use horizon_core::cost::{QuadraticStateCost, StateInputCost};
use horizon_core::dynamics::LinearSystemDynamics;
use horizon_core::initializer::DefaultInitializer;
use horizon_core::precomputation::PreComputation;
use horizon_core::problem::OptimalControlProblem;
use horizon_core::reference::TargetTrajectories;
use horizon_core::types::{Matrix, Scalar, ScalarQuadraticApproximation, Vector};
use horizon_solver::settings::{DdpAlgorithm, DdpSettings, SearchStrategyType};
use horizon_solver::solver::Solver;
use horizon_solver::DdpSolver;

/// `L = 1/2 x² + 1/4 u⁴ − 1/2 u²` with exact derivatives: the input
/// curvature `3u² − 1` is negative around `u = 0`.
#[derive(Debug, Clone)]
struct QuarticInputCost;

impl StateInputCost for QuarticInputCost {
    fn value(
        &self,
        _t: Scalar,
        x: &Vector,
        u: &Vector,
        _target: &TargetTrajectories,
        _pre: &dyn PreComputation,
    ) -> Scalar {
        0.5 * x[0] * x[0] + 0.25 * u[0].powi(4) - 0.5 * u[0] * u[0]
    }

    fn quadratic_approximation(
        &self,
        _t: Scalar,
        x: &Vector,
        u: &Vector,
        _target: &TargetTrajectories,
        _pre: &dyn PreComputation,
    ) -> ScalarQuadraticApproximation {
        let mut q = ScalarQuadraticApproximation::zero(1, 1);
        q.f = 0.5 * x[0] * x[0] + 0.25 * u[0].powi(4) - 0.5 * u[0] * u[0];
        q.fx[0] = x[0];
        q.fxx[(0, 0)] = 1.0;
        q.fu[0] = u[0].powi(3) - u[0];
        q.fuu[(0, 0)] = 3.0 * u[0] * u[0] - 1.0;
        q
    }

    fn clone_boxed(&self) -> Box<dyn StateInputCost> {
        Box::new(self.clone())
    }
}

fn indefinite_problem() -> OptimalControlProblem {
    let mut problem = OptimalControlProblem::new(Box::new(LinearSystemDynamics::new(
        Matrix::from_row_slice(1, 1, &[-1.0]),
        Matrix::from_row_slice(1, 1, &[1.0]),
    )));
    problem
        .cost
        .add("quartic", Box::new(QuarticInputCost))
        .unwrap();
    problem
        .final_cost
        .add(
            "terminal",
            Box::new(QuadraticStateCost::new(Matrix::from_row_slice(1, 1, &[1.0]))),
        )
        .unwrap();
    problem
}

#[test]
fn levenberg_marquardt_recovers_from_indefinite_quu() {
    let settings = DdpSettings {
        algorithm: DdpAlgorithm::Slq,
        strategy: SearchStrategyType::LevenbergMarquardt,
        n_threads: 1,
        max_num_iterations: 30,
        min_rel_cost: 1e-4,
        time_step: 0.01,
        ..Default::default()
    };
    let problem = indefinite_problem();
    let mut solver =
        DdpSolver::new(settings, &problem, Box::new(DefaultInitializer::new(1))).unwrap();

    let x0 = Vector::from_vec(vec![1.5]);
    let result = solver.run(0.0, &x0, 1.0, &[0.0, 1.0]);
    assert!(result.is_ok(), "LM run failed: {result:?}");

    let log = solver.iterations_log();
    assert!(
        log.len() <= 2 * 30 + 2,
        "iteration count unbounded: {}",
        log.len()
    );
    assert!(solver.performance_index().is_finite());

    // the quartic pushes toward |u| ≈ 1; the cost must drop below the
    // zero-input rollout cost
    let first = log.first().unwrap().total_cost;
    let last = solver.performance_index().total_cost;
    assert!(
        last < first,
        "no cost improvement: {first} -> {last}"
    );
}

/// The line search with the eigenvalue-clamp correction handles the same
/// problem.
#[test]
fn line_search_with_eigenvalue_correction() {
    let mut settings = DdpSettings {
        algorithm: DdpAlgorithm::Ilqr,
        strategy: SearchStrategyType::LineSearch,
        n_threads: 1,
        max_num_iterations: 30,
        time_step: 0.01,
        ..Default::default()
    };
    settings.line_search.hessian_correction_strategy =
        horizon_solver::hessian::HessianCorrectionStrategy::EigenvalueModification;
    settings.line_search.hessian_correction_multiple = 1e-2;

    let problem = indefinite_problem();
    let mut solver =
        DdpSolver::new(settings, &problem, Box::new(DefaultInitializer::new(1))).unwrap();

    let x0 = Vector::from_vec(vec![1.5]);
    let result = solver.run(0.0, &x0, 1.0, &[0.0, 1.0]);
    assert!(result.is_ok(), "line-search run failed: {result:?}");
    assert!(solver.performance_index().is_finite());
}
