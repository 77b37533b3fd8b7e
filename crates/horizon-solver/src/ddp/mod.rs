//! DDP solvers (SLQ and ILQR)
//!
//! Gauss-Newton differential dynamic programming over the node grid:
//! forward rollout of the current policy, linear-quadratic approximation at
//! every node, a sequential Riccati backward pass, and a search strategy
//! (parallel line search or Levenberg-Marquardt) deciding step acceptance.
//! State-only equality constraints enter through growing quadratic
//! penalties, state-input equality constraints through projection in the
//! backward pass, and inequality constraints through the relaxed barrier.

pub mod backward;
pub mod search;

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use horizon_core::approximate::{
    approximate_event_node, approximate_final_node, approximate_intermediate_node, compute_cost,
    compute_event_cost, compute_final_cost, ModelData,
};
use horizon_core::constraint::{stack_state_input_values, stack_state_values};
use horizon_core::controller::{Controller, FeedforwardController, LinearController};
use horizon_core::error::{SolverError, TerminationReason};
use horizon_core::initializer::Initializer;
use horizon_core::penalty::RelaxedBarrierPenalty;
use horizon_core::performance::PerformanceIndex;
use horizon_core::precomputation::Request;
use horizon_core::problem::OptimalControlProblem;
use horizon_core::projection::compute_projection;
use horizon_core::reference::{ModeSchedule, ReferenceManager};
use horizon_core::rollout::{Rollout, RolloutData};
use horizon_core::solution::PrimalSolution;
use horizon_core::time_discretization::{
    time_discretization_with_events, AnnotatedTime, TimeType,
};
use horizon_core::types::{Matrix, Scalar, ScalarQuadraticApproximation, Vector};

use crate::hessian::shift_hessian;
use crate::settings::{DdpAlgorithm, DdpSettings, SearchStrategyType};
use crate::solver::{validate_run_arguments, Solver};
use crate::workers::{merge_by_index, WorkIndex, WorkerLocal, WorkerPool};

use backward::{riccati_sweep, BackwardPassOutput, RiccatiNode};
use search::{
    check_convergence, controller_update_norms, line_search_accepts, num_line_search_trials,
    LevenbergMarquardtHooks, LevenbergMarquardtModule, LineSearchHooks,
};

/// Augmented-Lagrangian penalty coefficients carried across iterations.
#[derive(Debug, Clone, Copy)]
struct ConstraintPenalties {
    state_eq_coeff: Scalar,
    final_eq_coeff: Scalar,
    state_input_eq_coeff: Scalar,
    state_input_eq_tol: Scalar,
}

/// Gauss-Newton DDP solver; the algorithm variant picks the node-model
/// discretization order.
pub struct DdpSolver {
    settings: DdpSettings,
    pool: WorkerPool,
    problems: WorkerLocal<OptimalControlProblem>,
    rollout: Rollout,
    initializer: Box<dyn Initializer>,
    reference_manager: Arc<ReferenceManager>,

    penalties: ConstraintPenalties,
    lm: LevenbergMarquardtModule,

    // nominal iterate (valid between iterations)
    grid: Vec<AnnotatedTime>,
    nominal: RolloutData,
    controller: LinearController,
    mode_schedule: ModeSchedule,
    init_state: Vector,

    model_data: Vec<ModelData>,
    heuristics: ScalarQuadraticApproximation,
    backward_output: Option<BackwardPassOutput>,

    performance: PerformanceIndex,
    performance_log: Vec<PerformanceIndex>,
    total_iterations: usize,
    primal_solution_cache: PrimalSolution,
}

impl DdpSolver {
    pub fn new(
        settings: DdpSettings,
        problem: &OptimalControlProblem,
        initializer: Box<dyn Initializer>,
    ) -> Result<Self, SolverError> {
        settings.validate()?;
        let pool = WorkerPool::new(settings.n_threads)?;
        let problems =
            WorkerLocal::new((0..settings.n_threads).map(|_| problem.clone()).collect());
        let rollout = Rollout::new(settings.rollout);
        let penalties = initial_penalties(&settings);

        Ok(Self {
            settings,
            pool,
            problems,
            rollout,
            initializer,
            reference_manager: ReferenceManager::new(Default::default(), Default::default()),
            penalties,
            lm: LevenbergMarquardtModule::default(),
            grid: Vec::new(),
            nominal: RolloutData::default(),
            controller: LinearController::default(),
            mode_schedule: ModeSchedule::default(),
            init_state: Vector::zeros(0),
            model_data: Vec::new(),
            heuristics: ScalarQuadraticApproximation::zero(0, 0),
            backward_output: None,
            performance: PerformanceIndex::default(),
            performance_log: Vec::new(),
            total_iterations: 0,
            primal_solution_cache: empty_solution(),
        })
    }

    pub fn settings(&self) -> &DdpSettings {
        &self.settings
    }

    /// Warm-started run: installs the given controller as the nominal
    /// policy before solving.
    pub fn run_with_controller(
        &mut self,
        t0: Scalar,
        x0: &Vector,
        tf: Scalar,
        partitioning_times: &[Scalar],
        controller: LinearController,
    ) -> Result<TerminationReason, SolverError> {
        self.controller = controller;
        self.run(t0, x0, tf, partitioning_times)
    }

    /// Merit of a rollout: cost plus the penalized constraint violations.
    fn merit(&self, performance: &PerformanceIndex) -> Scalar {
        performance.total_cost
            + self.penalties.state_eq_coeff * performance.state_eq_ise
            + self.penalties.final_eq_coeff * performance.state_eq_final_sse
            + self.penalties.state_input_eq_coeff * performance.state_input_eq_ise.sqrt()
            + performance.inequality_penalty
    }

    /// Grows the penalty coefficients where violations exceed tolerance.
    fn update_penalties(&mut self, performance: &PerformanceIndex) {
        let settings = &self.settings;
        if performance.state_eq_ise > settings.constraint_tolerance {
            self.penalties.state_eq_coeff *= settings.constraint_penalty_increase_rate;
        }
        if performance.state_eq_final_sse > settings.constraint_tolerance {
            self.penalties.final_eq_coeff *= settings.constraint_penalty_increase_rate;
        }
        if performance.state_input_eq_ise < self.penalties.state_input_eq_tol {
            self.penalties.state_input_eq_tol /=
                self.penalties.state_input_eq_coeff.powf(0.9);
        } else {
            self.penalties.state_input_eq_coeff *= settings.constraint_penalty_increase_rate;
            self.penalties.state_input_eq_tol /=
                self.penalties.state_input_eq_coeff.powf(0.1);
        }
        self.penalties.state_input_eq_tol = self
            .penalties
            .state_input_eq_tol
            .max(settings.constraint_tolerance);
    }

    /// Rolls the given controller out over the grid; falls back to the
    /// initializer when the controller is empty (first solve).
    fn rollout_policy(
        &self,
        worker_id: usize,
        controller: &LinearController,
    ) -> Result<RolloutData, SolverError> {
        let problem = self.problems.lock(worker_id);
        let initializer = self.initializer.as_ref();
        if controller.is_empty() {
            self.rollout.run(
                &self.grid,
                &self.init_state,
                problem.dynamics.as_ref(),
                problem.pre_computation.as_ref(),
                &|t, x| initializer.compute_input(t, x),
            )
        } else {
            self.rollout.run(
                &self.grid,
                &self.init_state,
                problem.dynamics.as_ref(),
                problem.pre_computation.as_ref(),
                &|t, x| controller.compute_input(t, x),
            )
        }
    }

    /// Performance of a rollout, integrating cost and violation measures
    /// trapezoidally over the grid.
    fn evaluate_rollout(&self, worker_id: usize, data: &RolloutData) -> PerformanceIndex {
        let mut problem = self.problems.lock(worker_id);
        let mut performance = compute_rollout_performance(
            &mut problem,
            &self.settings.inequality_penalty,
            &self.grid,
            data,
        );
        performance.merit = self.merit(&performance);
        performance
    }

    /// Populates the per-node LQ models and the terminal (heuristics)
    /// model. Fully parallel over nodes.
    fn approximate_problem(&mut self) -> Result<(), SolverError> {
        let n = self.grid.len() - 1;
        let grid = &self.grid;
        let states = &self.nominal.states;
        let inputs = &self.nominal.inputs;
        let problems = &self.problems;
        let settings = &self.settings;
        let penalties = self.penalties;
        let work = WorkIndex::new();
        let line_search_correction = matches!(settings.strategy, SearchStrategyType::LineSearch);

        let worker_results: Vec<Result<Vec<(usize, ModelData)>, SolverError>> =
            self.pool.run(|worker_id| {
                let mut problem = problems.lock(worker_id);
                let mut nodes = Vec::new();
                loop {
                    let i = work.next();
                    if i > n {
                        break;
                    }
                    let t = grid[i].time;
                    let mut model = if i == n {
                        let mut model = approximate_final_node(&mut problem, t, &states[i])?;
                        augment_state_equality_penalty(&mut model, penalties.final_eq_coeff);
                        if line_search_correction {
                            shift_hessian(
                                settings.line_search.hessian_correction_strategy,
                                &mut model.cost.fxx,
                                settings.line_search.hessian_correction_multiple,
                            );
                        }
                        model
                    } else if grid[i].event == TimeType::PreEvent {
                        let mut model = approximate_event_node(&mut problem, t, &states[i])?;
                        augment_state_equality_penalty(&mut model, penalties.final_eq_coeff);
                        if line_search_correction {
                            shift_hessian(
                                settings.line_search.hessian_correction_strategy,
                                &mut model.cost.fxx,
                                settings.line_search.hessian_correction_multiple,
                            );
                        }
                        model
                    } else {
                        let mut model = approximate_intermediate_node(
                            &mut problem,
                            t,
                            &states[i],
                            &inputs[i],
                        )?;
                        augment_state_equality_penalty(&mut model, penalties.state_eq_coeff);
                        if model.ineq_constraint.num_outputs() > 0 {
                            let barrier = settings
                                .inequality_penalty
                                .quadratic_approximation_second_order(&model.ineq_constraint);
                            model.cost += &barrier;
                        }
                        model
                    };
                    if settings.check_numerical_stability {
                        model.check_finite()?;
                    }
                    model.time = t;
                    nodes.push((i, model));
                }
                Ok(nodes)
            });

        let mut batches = Vec::with_capacity(worker_results.len());
        for result in worker_results {
            batches.push(result?);
        }
        let mut merged = merge_by_index(n + 1, batches);
        self.heuristics = merged.pop().unwrap().cost;
        self.model_data = merged;
        Ok(())
    }

    /// Discretizes the node models and runs the Riccati sweep.
    fn backward_pass(&mut self) -> Result<(), SolverError> {
        let n = self.grid.len() - 1;
        let mut nodes = Vec::with_capacity(n);
        for i in 0..n {
            let model = &self.model_data[i];
            if self.grid[i].event == TimeType::PreEvent {
                nodes.push(RiccatiNode {
                    dynamics: model.dynamics.clone(),
                    cost: model.cost.clone(),
                    projection: None,
                    is_event: true,
                });
                continue;
            }

            let dt = self.grid[i + 1].time - self.grid[i].time;
            let nx = model.state_dim;
            let a = &model.dynamics.dfdx;
            let b = &model.dynamics.dfdu;
            let identity = Matrix::identity(nx, nx);
            let (ad, bd) = match self.settings.algorithm {
                DdpAlgorithm::Ilqr => (&identity + a * dt, b * dt),
                DdpAlgorithm::Slq => {
                    // midpoint-consistent second-order expansion
                    let a_dt = a * dt;
                    (
                        &identity + &a_dt + &a_dt * &a_dt * 0.5,
                        (&identity + &a_dt * 0.5) * b * dt,
                    )
                }
            };

            let mut cost = model.cost.clone();
            cost.f *= dt;
            cost.fx *= dt;
            cost.fu *= dt;
            cost.fxx *= dt;
            cost.fux *= dt;
            cost.fuu *= dt;

            let projection = if model.state_input_eq_constraint.num_outputs() > 0 {
                Some(
                    compute_projection(&model.state_input_eq_constraint).ok_or(
                        SolverError::DimensionMismatch {
                            what: "state-input equality constraint is rank deficient",
                            expected: model.state_input_eq_constraint.num_outputs(),
                            got: 0,
                        },
                    )?,
                )
            } else {
                None
            };

            nodes.push(RiccatiNode {
                dynamics: horizon_core::types::VectorLinearApproximation {
                    dfdx: ad,
                    dfdu: bd,
                    f: Vector::zeros(nx),
                },
                cost,
                projection,
                is_event: false,
            });
        }

        let output = match self.settings.strategy {
            SearchStrategyType::LineSearch => {
                let hooks = LineSearchHooks {
                    settings: self.settings.line_search,
                };
                riccati_sweep(
                    &nodes,
                    &self.heuristics,
                    &hooks,
                    self.settings.pre_compute_riccati_terms,
                )?
            }
            SearchStrategyType::LevenbergMarquardt => {
                let hooks = LevenbergMarquardtHooks {
                    riccati_multiple: self.lm.riccati_multiple,
                };
                riccati_sweep(
                    &nodes,
                    &self.heuristics,
                    &hooks,
                    self.settings.pre_compute_riccati_terms,
                )?
            }
        };

        if self.settings.check_numerical_stability {
            for (i, s) in output.s_mat.iter().enumerate() {
                if !s.iter().all(|v| v.is_finite()) {
                    warn!(node = i, "value-function Hessian is not finite");
                    return Err(SolverError::BackwardPassFailed { node: i });
                }
            }
        }

        self.backward_output = Some(output);
        Ok(())
    }

    /// Rebuilds the nominal controller from the backward-pass gains:
    /// `u(x) = bias + K x`, `bias = u_nom − K x_nom`, with the feed-forward
    /// increments staged in `delta_biases`.
    fn update_controller(&mut self) {
        let output = self.backward_output.as_ref().unwrap();
        let n = self.grid.len() - 1;

        let mut controller = LinearController {
            times: self.grid.iter().map(|node| node.time).collect(),
            gains: Vec::with_capacity(n + 1),
            biases: Vec::with_capacity(n + 1),
            delta_biases: Vec::with_capacity(n + 1),
        };

        for i in 0..n {
            if self.grid[i].event == TimeType::PreEvent && i > 0 {
                controller.gains.push(controller.gains[i - 1].clone());
                controller.biases.push(controller.biases[i - 1].clone());
                controller
                    .delta_biases
                    .push(controller.delta_biases[i - 1].clone());
                continue;
            }
            let gain = output.gains[i].clone();
            let bias = &self.nominal.inputs[i] - &gain * &self.nominal.states[i];
            controller.gains.push(gain);
            controller.biases.push(bias);
            controller.delta_biases.push(output.increments[i].clone());
        }
        // repeat the last stage entry so the controller covers the final time
        controller.gains.push(controller.gains[n - 1].clone());
        controller.biases.push(controller.biases[n - 1].clone());
        controller
            .delta_biases
            .push(controller.delta_biases[n - 1].clone());

        self.controller = controller;
    }

    /// Parallel line search over step lengths; returns the accepted step
    /// length (zero when every trial was rejected).
    fn run_line_search(&mut self) -> Scalar {
        let settings = self.settings.line_search;
        let trials = num_line_search_trials(&settings);
        let update_ise = self.controller.increment_squared_integral();
        let baseline_merit = self.performance.merit;
        let base_controller = self.controller.clone();

        struct SearchState {
            best_step: Scalar,
            best: Option<(RolloutData, PerformanceIndex, LinearController)>,
            processed: Vec<bool>,
            stop: bool,
        }
        let shared = Mutex::new(SearchState {
            best_step: 0.0,
            best: None,
            processed: vec![false; trials],
            stop: false,
        });
        let work = WorkIndex::new();

        self.pool.run(|worker_id| {
            loop {
                let exp = work.next();
                if exp >= trials {
                    break;
                }
                let step = settings.max_step_length * settings.contraction_rate.powi(exp as i32);
                if step < settings.min_step_length - 1e-12 {
                    break;
                }
                {
                    let state = shared.lock().unwrap();
                    if state.stop || (state.best.is_some() && step < state.best_step) {
                        break;
                    }
                }

                let mut trial_controller = base_controller.clone();
                trial_controller.apply_increment(step);

                let trial = self
                    .rollout_policy(worker_id, &trial_controller)
                    .map(|data| {
                        let performance = self.evaluate_rollout(worker_id, &data);
                        (data, performance)
                    });

                let mut state = shared.lock().unwrap();
                match trial {
                    Ok((data, performance)) if performance.is_finite() => {
                        let accepted = line_search_accepts(
                            &settings,
                            baseline_merit,
                            performance.merit,
                            step,
                            update_ise,
                        );
                        if accepted && step > state.best_step {
                            state.best_step = step;
                            state.best = Some((data, performance, trial_controller));
                            // stop once every larger step has been ruled out
                            if state.processed[..exp].iter().all(|&p| p) {
                                state.stop = true;
                            }
                        }
                    }
                    _ => {
                        debug!(step, "line-search rollout rejected");
                    }
                }
                state.processed[exp] = true;
                if state.stop {
                    break;
                }
            }
        });

        let state = shared.into_inner().unwrap();
        match state.best {
            Some((data, performance, mut controller)) => {
                controller.clear_increments();
                self.nominal = data;
                self.controller = controller;
                self.performance = performance;
                state.best_step
            }
            None => {
                // keep the previous nominal; drop the unusable increments
                self.controller.clear_increments();
                0.0
            }
        }
    }

    /// Single-trial Levenberg-Marquardt step; returns whether the step was
    /// accepted.
    fn run_levenberg_marquardt(&mut self) -> Result<bool, SolverError> {
        let settings = self.settings.levenberg_marquardt;
        let predicted_reduction = -self
            .backward_output
            .as_ref()
            .map(|output| output.expected_reduction(1.0))
            .unwrap_or(0.0);

        let step: Scalar = if predicted_reduction.abs() < 1e-14 { 0.0 } else { 1.0 };
        let mut trial_controller = self.controller.clone();
        trial_controller.apply_increment(step);

        let prev_merit = self.performance.merit;
        let trial = self.rollout_policy(0, &trial_controller).map(|data| {
            let performance = self.evaluate_rollout(0, &data);
            (data, performance)
        });

        let (rho, accepted_payload) = match trial {
            Ok((data, performance)) if performance.is_finite() => {
                let actual_reduction = prev_merit - performance.merit;
                let rho = LevenbergMarquardtModule::reduction_ratio(
                    actual_reduction,
                    predicted_reduction,
                    self.settings.min_rel_cost,
                );
                (rho, Some((data, performance)))
            }
            _ => {
                debug!("Levenberg-Marquardt trial rollout diverged");
                (0.0, None)
            }
        };

        self.lm.adapt(rho, &settings);
        let accepted = self.lm.register_trial(rho, &settings);

        if self.settings.display_info {
            info!(
                rho,
                mu = self.lm.riccati_multiple,
                rejections = self.lm.successive_rejections,
                accepted,
                "Levenberg-Marquardt trial"
            );
        }

        if accepted {
            if let Some((data, performance)) = accepted_payload {
                let mut controller = trial_controller;
                controller.clear_increments();
                self.nominal = data;
                self.controller = controller;
                self.performance = performance;
            }
        } else if self.lm.successive_rejections > settings.max_successive_rejections {
            return Err(SolverError::BackwardPassFailed {
                node: self.grid.len() - 1,
            });
        }
        Ok(accepted)
    }

    /// One search-strategy invocation. Returns the accepted step length
    /// (zero when the iterate is kept) or the terminal stall condition.
    fn run_search_strategy(&mut self) -> Result<Scalar, SolverError> {
        // the penalty coefficients may have changed since the baseline was
        // evaluated; its merit must use the current ones
        let mut baseline = self.performance;
        baseline.merit = self.merit(&baseline);
        self.performance = baseline;

        match self.settings.strategy {
            SearchStrategyType::LineSearch => Ok(self.run_line_search()),
            SearchStrategyType::LevenbergMarquardt => {
                let accepted = self.run_levenberg_marquardt()?;
                Ok(if accepted { 1.0 } else { 0.0 })
            }
        }
    }

    fn set_primal_solution(&mut self) {
        let times: Vec<Scalar> = self.grid.iter().map(|node| node.time).collect();
        let controller = if self.settings.use_feedback_policy {
            Controller::Linear(self.controller.clone())
        } else {
            Controller::Feedforward(FeedforwardController::new(
                times.clone(),
                self.nominal.inputs.clone(),
            ))
        };
        self.primal_solution_cache = PrimalSolution {
            time_trajectory: times,
            state_trajectory: self.nominal.states.clone(),
            input_trajectory: self.nominal.inputs.clone(),
            mode_schedule: self.mode_schedule.clone(),
            controller,
        };
    }

    fn approximate_backward_controller(&mut self) -> Result<(), SolverError> {
        self.approximate_problem()?;
        self.backward_pass()?;
        self.update_controller();
        Ok(())
    }

    fn nominal_input_dim(&self) -> usize {
        self.nominal
            .inputs
            .first()
            .map(|u| u.len())
            .unwrap_or_else(|| {
                self.initializer
                    .compute_input(self.grid[0].time, &self.init_state)
                    .len()
            })
    }
}

impl Solver for DdpSolver {
    fn reset(&mut self) {
        self.controller.clear();
        self.nominal = RolloutData::default();
        self.grid.clear();
        self.model_data.clear();
        self.backward_output = None;
        self.performance = PerformanceIndex::default();
        self.performance_log.clear();
        self.total_iterations = 0;
        self.penalties = initial_penalties(&self.settings);
        self.lm = LevenbergMarquardtModule::default();
        self.primal_solution_cache = empty_solution();
    }

    fn run(
        &mut self,
        t0: Scalar,
        x0: &Vector,
        tf: Scalar,
        partitioning_times: &[Scalar],
    ) -> Result<TerminationReason, SolverError> {
        validate_run_arguments(t0, x0, tf, partitioning_times)?;

        if self.settings.display_info {
            info!(
                algorithm = ?self.settings.algorithm,
                strategy = ?self.settings.strategy,
                t0,
                tf,
                "DDP solver initialized"
            );
        }

        // snapshot the references once per run
        self.mode_schedule = self.reference_manager.mode_schedule();
        let target_trajectories = self.reference_manager.target_trajectories();
        for problem in self.problems.iter_mut() {
            problem.target_trajectories = target_trajectories.clone();
        }

        self.grid = time_discretization_with_events(
            t0,
            tf,
            self.settings.time_step,
            &self.mode_schedule.event_times,
        );
        self.init_state = x0.clone();

        if self.grid.len() < 2 {
            let input = self.initializer.compute_input(t0, x0);
            self.nominal = RolloutData {
                states: vec![x0.clone()],
                inputs: vec![input.clone()],
                post_event_indices: Vec::new(),
            };
            self.controller.clear();
            self.performance = PerformanceIndex::default();
            self.primal_solution_cache = PrimalSolution {
                time_trajectory: vec![t0],
                state_trajectory: vec![x0.clone()],
                input_trajectory: vec![input.clone()],
                mode_schedule: self.mode_schedule.clone(),
                controller: Controller::Feedforward(FeedforwardController::new(
                    vec![t0],
                    vec![input],
                )),
            };
            return Ok(TerminationReason::Converged("degenerate horizon".into()));
        }

        // a warm-started controller from a different horizon is unusable
        let unreliable_controller = self.controller.is_empty()
            || self.controller.times.first().copied() != Some(self.grid[0].time)
            || self.controller.biases[0].len() != self.nominal_input_dim();

        if unreliable_controller {
            self.controller.clear();
        }

        // initial rollout with the warm-start policy (or the initializer)
        let controller = self.controller.clone();
        self.nominal = self.rollout_policy(0, &controller)?;
        self.performance = self.evaluate_rollout(0, &self.nominal);
        self.performance_log.clear();

        self.approximate_backward_controller()?;
        self.total_iterations += 1;

        let mut reason = TerminationReason::MaxIterations;
        let mut iteration = 1usize;
        while iteration < self.settings.max_num_iterations {
            if self.settings.display_info {
                info!(iteration, performance = %self.performance, "DDP iteration");
                if let Some(output) = &self.backward_output {
                    let (max_gain, max_increment) =
                        controller_update_norms(&output.gains, &output.increments);
                    debug!(max_gain, max_increment, "controller update norms");
                }
            }
            self.performance_log.push(self.performance);

            let step_length = match self.run_search_strategy() {
                Ok(step) => step,
                Err(SolverError::BackwardPassFailed { .. })
                    if matches!(
                        self.settings.strategy,
                        SearchStrategyType::LevenbergMarquardt
                    ) =>
                {
                    // too many successive rejections: clean stall
                    reason = TerminationReason::Stalled;
                    break;
                }
                Err(e) => return Err(e),
            };

            let accepted_performance = self.performance;
            self.update_penalties(&accepted_performance);
            self.approximate_backward_controller()?;
            self.total_iterations += 1;
            iteration += 1;

            // a rejected Levenberg-Marquardt trial leaves the merit
            // unchanged; that must not read as convergence
            let lm_rejected = step_length == 0.0
                && matches!(
                    self.settings.strategy,
                    SearchStrategyType::LevenbergMarquardt
                );
            if lm_rejected {
                continue;
            }

            if let Some(info) = check_convergence(
                &self.settings,
                self.performance_log.last().unwrap(),
                &self.performance,
                step_length,
                unreliable_controller && iteration == 2,
            ) {
                reason = TerminationReason::Converged(info);
                break;
            }
        }

        // final search with the last backward-pass policy
        if !matches!(reason, TerminationReason::Stalled) {
            self.performance_log.push(self.performance);
            match self.run_search_strategy() {
                Ok(_) => {}
                Err(SolverError::BackwardPassFailed { .. })
                    if matches!(
                        self.settings.strategy,
                        SearchStrategyType::LevenbergMarquardt
                    ) =>
                {
                    reason = TerminationReason::Stalled;
                }
                Err(e) => return Err(e),
            }
        }
        self.performance_log.push(self.performance);

        self.set_primal_solution();

        if self.settings.display_info {
            info!(
                iterations = self.total_iterations,
                performance = %self.performance,
                "DDP solver terminated"
            );
        }
        Ok(reason)
    }

    fn primal_solution(&self, final_time: Scalar) -> PrimalSolution {
        self.primal_solution_cache.truncated(final_time)
    }

    fn performance_index(&self) -> &PerformanceIndex {
        &self.performance
    }

    fn iterations_log(&self) -> &[PerformanceIndex] {
        &self.performance_log
    }

    fn set_reference_manager(&mut self, reference_manager: Arc<ReferenceManager>) {
        self.reference_manager = reference_manager;
    }
}

fn initial_penalties(settings: &DdpSettings) -> ConstraintPenalties {
    ConstraintPenalties {
        state_eq_coeff: settings.constraint_penalty_initial,
        final_eq_coeff: settings.constraint_penalty_initial,
        state_input_eq_coeff: settings.constraint_penalty_initial,
        state_input_eq_tol: 1.0 / settings.constraint_penalty_initial.powf(0.1),
    }
}

/// Folds a state-only equality constraint into the node cost as a quadratic
/// penalty with the given coefficient.
fn augment_state_equality_penalty(model: &mut ModelData, coeff: Scalar) {
    if model.state_eq_constraint.num_outputs() == 0 {
        return;
    }
    let h = &model.state_eq_constraint.f;
    let hx = &model.state_eq_constraint.dfdx;
    model.cost.f += 0.5 * coeff * h.norm_squared();
    model.cost.fx += hx.transpose() * h * coeff;
    model.cost.fxx += hx.transpose() * hx * coeff;
}

/// Trapezoidal performance of a rollout over the node grid.
fn compute_rollout_performance(
    problem: &mut OptimalControlProblem,
    penalty: &RelaxedBarrierPenalty,
    grid: &[AnnotatedTime],
    data: &RolloutData,
) -> PerformanceIndex {
    let n = grid.len() - 1;
    let mut performance = PerformanceIndex::default();

    // per-node integrands
    let mut cost_integrand = vec![0.0; n + 1];
    let mut state_eq_integrand = vec![0.0; n + 1];
    let mut state_input_eq_integrand = vec![0.0; n + 1];
    let mut ineq_violation_integrand = vec![0.0; n + 1];
    let mut ineq_penalty_integrand = vec![0.0; n + 1];

    for i in 0..=n {
        let t = grid[i].time;
        let x = &data.states[i];
        let u = &data.inputs[i];
        let flags = Request::COST | Request::CONSTRAINT | Request::SOFT_CONSTRAINT;
        problem.pre_computation.request(flags, t, x, u);

        cost_integrand[i] = compute_cost(problem, t, x, u);
        let pre = problem.pre_computation.as_ref();
        let g = stack_state_input_values(&problem.equality, t, x, u, pre);
        let h = stack_state_values(&problem.state_equality, t, x, pre);
        let ineq = stack_state_input_values(&problem.inequality, t, x, u, pre);
        state_input_eq_integrand[i] = g.norm_squared();
        state_eq_integrand[i] = h.norm_squared();
        if ineq.len() > 0 {
            ineq_violation_integrand[i] = RelaxedBarrierPenalty::violation_squared(&ineq);
            ineq_penalty_integrand[i] = penalty.total_value(&ineq);
        }
    }

    // trapezoidal integration; zero-duration event intervals drop out
    for i in 0..n {
        let dt = grid[i + 1].time - grid[i].time;
        if dt <= 0.0 {
            continue;
        }
        performance.total_cost += 0.5 * dt * (cost_integrand[i] + cost_integrand[i + 1]);
        performance.state_eq_ise += 0.5 * dt * (state_eq_integrand[i] + state_eq_integrand[i + 1]);
        performance.state_input_eq_ise +=
            0.5 * dt * (state_input_eq_integrand[i] + state_input_eq_integrand[i + 1]);
        performance.inequality_ise +=
            0.5 * dt * (ineq_violation_integrand[i] + ineq_violation_integrand[i + 1]);
        performance.inequality_penalty +=
            0.5 * dt * (ineq_penalty_integrand[i] + ineq_penalty_integrand[i + 1]);
    }

    // event and terminal contributions
    for i in 0..n {
        if grid[i].event == TimeType::PreEvent {
            let t = grid[i].time;
            let x = &data.states[i];
            problem
                .pre_computation
                .request_pre_jump(Request::COST | Request::CONSTRAINT, t, x);
            performance.total_cost += compute_event_cost(problem, t, x);
            let h = stack_state_values(
                &problem.pre_jump_equality,
                t,
                x,
                problem.pre_computation.as_ref(),
            );
            performance.state_eq_ise += h.norm_squared();
        }
    }
    let tf = grid[n].time;
    let xf = &data.states[n];
    problem
        .pre_computation
        .request_final(Request::COST | Request::CONSTRAINT, tf, xf);
    performance.total_cost += compute_final_cost(problem, tf, xf);
    let h = stack_state_values(
        &problem.final_equality,
        tf,
        xf,
        problem.pre_computation.as_ref(),
    );
    performance.state_eq_final_sse = h.norm_squared();

    performance
}

fn empty_solution() -> PrimalSolution {
    PrimalSolution {
        time_trajectory: Vec::new(),
        state_trajectory: Vec::new(),
        input_trajectory: Vec::new(),
        mode_schedule: Default::default(),
        controller: Controller::Feedforward(FeedforwardController::default()),
    }
}
