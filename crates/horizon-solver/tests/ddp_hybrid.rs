//! DDP validation on the two-mode hybrid benchmark: a 2-state, 1-input
//! switched linear system with one event inside the horizon. The optimal
//! cost of this problem is 9.766.

mod common;

use horizon_core::controller::Controller;
use horizon_core::initializer::DefaultInitializer;
use horizon_core::precomputation::NoOpPreComputation;
use horizon_core::rollout::{Rollout, RolloutSettings};
use horizon_core::time_discretization::time_discretization_with_events;
use horizon_core::types::Vector;
use horizon_solver::settings::{DdpAlgorithm, DdpSettings, SearchStrategyType};
use horizon_solver::solver::Solver;
use horizon_solver::DdpSolver;

const START_TIME: f64 = 0.0;
const FINAL_TIME: f64 = 2.0;
const EXPECTED_COST: f64 = 9.766;

fn settings(strategy: SearchStrategyType, n_threads: usize) -> DdpSettings {
    let mut settings = DdpSettings {
        algorithm: DdpAlgorithm::Slq,
        strategy,
        n_threads,
        max_num_iterations: 30,
        min_rel_cost: 1e-3,
        constraint_tolerance: 1e-5,
        time_step: 0.01,
        use_feedback_policy: true,
        ..Default::default()
    };
    settings.rollout.time_step = 1e-3;
    settings.rollout.abs_tol = 1e-10;
    settings.rollout.rel_tol = 1e-7;
    settings.line_search.min_step_length = 1e-4;
    settings
}

fn partitioning() -> Vec<f64> {
    vec![START_TIME, common::HYBRID_SWITCH_TIME, FINAL_TIME]
}

fn solve(strategy: SearchStrategyType, n_threads: usize) -> DdpSolver {
    let problem = common::hybrid_problem();
    let mut solver = DdpSolver::new(
        settings(strategy, n_threads),
        &problem,
        Box::new(DefaultInitializer::new(1)),
    )
    .unwrap();
    solver.set_reference_manager(common::hybrid_reference_manager());

    let x0 = Vector::from_vec(vec![0.0, 2.0]);
    solver
        .run(START_TIME, &x0, FINAL_TIME, &partitioning())
        .unwrap();
    solver
}

fn check_performance(solver: &DdpSolver, label: &str) {
    let performance = solver.performance_index();
    assert!(
        (performance.total_cost - EXPECTED_COST).abs() < 1e-2,
        "{label}: total cost {} deviates from {EXPECTED_COST}",
        performance.total_cost
    );
    assert!(
        performance.state_input_eq_ise < 1e-4,
        "{label}: state-input ISE {}",
        performance.state_input_eq_ise
    );
    assert!(
        performance.state_eq_ise < 1e-4,
        "{label}: state-only ISE {}",
        performance.state_eq_ise
    );
}

#[test]
fn line_search_single_thread() {
    let solver = solve(SearchStrategyType::LineSearch, 1);
    check_performance(&solver, "line search, 1 thread");
}

#[test]
fn line_search_multi_thread() {
    let solver = solve(SearchStrategyType::LineSearch, 3);
    check_performance(&solver, "line search, 3 threads");
}

#[test]
fn levenberg_marquardt_single_thread() {
    let solver = solve(SearchStrategyType::LevenbergMarquardt, 1);
    check_performance(&solver, "Levenberg-Marquardt, 1 thread");
}

#[test]
fn levenberg_marquardt_multi_thread() {
    let solver = solve(SearchStrategyType::LevenbergMarquardt, 3);
    check_performance(&solver, "Levenberg-Marquardt, 3 threads");
}

/// With `use_feedback_policy` the controller is affine feedback; without it
/// a feed-forward sequence. In both cases the policy covers the final time
/// exactly.
#[test]
fn policy_shape_follows_settings() {
    let problem = common::hybrid_problem();
    let x0 = Vector::from_vec(vec![0.0, 2.0]);

    for use_feedback in [true, false] {
        let mut config = settings(SearchStrategyType::LineSearch, 1);
        config.use_feedback_policy = use_feedback;
        let mut solver =
            DdpSolver::new(config, &problem, Box::new(DefaultInitializer::new(1))).unwrap();
        solver.set_reference_manager(common::hybrid_reference_manager());
        solver
            .run(START_TIME, &x0, FINAL_TIME, &partitioning())
            .unwrap();

        let solution = solver.primal_solution(FINAL_TIME);
        match (&solution.controller, use_feedback) {
            (Controller::Linear(c), true) => {
                assert_eq!(*c.times.last().unwrap(), FINAL_TIME);
            }
            (Controller::Feedforward(c), false) => {
                assert_eq!(*c.times.last().unwrap(), FINAL_TIME);
            }
            (other, _) => panic!("unexpected policy shape: {other:?}"),
        }
        assert_eq!(*solution.time_trajectory.last().unwrap(), FINAL_TIME);
    }
}

/// Re-simulating the affine feedback policy from the initial state must
/// reproduce the solver's state trajectory.
#[test]
fn feedback_policy_reproduces_trajectory() {
    let solver = solve(SearchStrategyType::LineSearch, 1);
    let solution = solver.primal_solution(FINAL_TIME);
    let controller = match &solution.controller {
        Controller::Linear(c) => c.clone(),
        other => panic!("expected a feedback policy, got {other:?}"),
    };

    let dynamics = common::hybrid_problem().dynamics.clone_boxed();
    let rollout = Rollout::new(RolloutSettings {
        time_step: 1e-3,
        ..Default::default()
    });
    let grid = time_discretization_with_events(
        START_TIME,
        FINAL_TIME,
        0.01,
        &[common::HYBRID_SWITCH_TIME],
    );
    let x0 = Vector::from_vec(vec![0.0, 2.0]);
    let data = rollout
        .run(&grid, &x0, dynamics.as_ref(), &NoOpPreComputation, &|t, x| {
            controller.compute_input(t, x)
        })
        .unwrap();

    assert_eq!(data.states.len(), solution.state_trajectory.len());
    let max_deviation = data
        .states
        .iter()
        .zip(&solution.state_trajectory)
        .map(|(a, b)| (a - b).norm())
        .fold(0.0, f64::max);
    assert!(
        max_deviation < 1e-2,
        "re-simulated trajectory deviates by {max_deviation}"
    );
}

/// The event enters the grid as a back-to-back node pair and the jump
/// (identity here) keeps the state continuous.
#[test]
fn event_pair_in_solution() {
    let solver = solve(SearchStrategyType::LineSearch, 1);
    let solution = solver.primal_solution(FINAL_TIME);

    let pairs: Vec<usize> = solution
        .time_trajectory
        .windows(2)
        .enumerate()
        .filter(|(_, w)| (w[0] - common::HYBRID_SWITCH_TIME).abs() < 1e-9 && w[0] == w[1])
        .map(|(i, _)| i)
        .collect();
    assert_eq!(pairs.len(), 1, "expected exactly one event pair");

    let i = pairs[0];
    let jump = (&solution.state_trajectory[i + 1] - &solution.state_trajectory[i]).norm();
    assert!(jump < 1e-9, "identity jump altered the state by {jump}");
}

/// MPC-style repeated solves with shifted horizons must not error.
#[test]
fn repeated_solves_with_shifted_horizon() {
    let problem = common::hybrid_problem();
    let mut solver = DdpSolver::new(
        settings(SearchStrategyType::LineSearch, 2),
        &problem,
        Box::new(DefaultInitializer::new(1)),
    )
    .unwrap();
    solver.set_reference_manager(common::hybrid_reference_manager());

    let x0 = Vector::from_vec(vec![0.0, 2.0]);
    for (t0, tf) in [(0.0, 0.7), (0.1, 0.9), (0.15, 1.2)] {
        solver.run(t0, &x0, tf, &partitioning()).unwrap();
        assert!(solver.performance_index().is_finite());
    }
}
