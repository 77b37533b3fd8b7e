//! Multiple-shooting SQP solver
//!
//! Transcribes the horizon into a structured QP at every iteration, solves
//! it through the [`StructuredQpSolver`] interface, and accepts or shrinks
//! the step with a filter line search in the style of Wächter-Biegler.

pub mod qp;
pub mod transcription;

use std::sync::Arc;

use tracing::{debug, info};

use horizon_core::controller::{Controller, FeedforwardController, LinearController};
use horizon_core::error::{SolverError, TerminationReason};
use horizon_core::initializer::Initializer;
use horizon_core::interpolation::interpolate_vector;
use horizon_core::performance::PerformanceIndex;
use horizon_core::problem::OptimalControlProblem;
use horizon_core::projection::{expand_gain, expand_input, ConstraintProjection};
use horizon_core::reference::ReferenceManager;
use horizon_core::solution::PrimalSolution;
use horizon_core::time_discretization::{
    interval_duration, interval_start, time_discretization_with_events, AnnotatedTime, TimeType,
};
use horizon_core::types::{Scalar, ScalarQuadraticApproximation, Vector, VectorLinearApproximation};

use crate::settings::SqpSettings;
use crate::solver::{validate_run_arguments, Solver};
use crate::workers::{merge_by_index, WorkIndex, WorkerLocal, WorkerPool};

use qp::{QpSolution, RiccatiQpSolver, StructuredQpSolver};
use transcription::{
    compute_event_performance, compute_intermediate_performance, compute_terminal_performance,
    setup_event_node, setup_intermediate_node, setup_terminal_node,
};

/// Step direction returned by the QP stage.
struct SubproblemSolution {
    delta: QpSolution,
    /// `Σ_i ∇C_i·δ`, evaluated in the original input coordinates.
    armijo_descent_metric: Scalar,
}

/// Multiple-shooting SQP solver over the common problem abstraction.
pub struct SqpSolver {
    settings: SqpSettings,
    pool: WorkerPool,
    problems: WorkerLocal<OptimalControlProblem>,
    initializer: Box<dyn Initializer>,
    qp_solver: Box<dyn StructuredQpSolver>,
    reference_manager: Arc<ReferenceManager>,
    project_equalities: bool,

    // LQ storage of the current iteration, indexed by node
    dynamics: Vec<VectorLinearApproximation>,
    cost: Vec<ScalarQuadraticApproximation>,
    constraints: Vec<VectorLinearApproximation>,
    projections: Vec<Option<ConstraintProjection>>,

    primal_solution: PrimalSolution,
    performance: PerformanceIndex,
    performance_log: Vec<PerformanceIndex>,
    total_iterations: usize,
}

impl SqpSolver {
    pub fn new(
        settings: SqpSettings,
        problem: &OptimalControlProblem,
        initializer: Box<dyn Initializer>,
    ) -> Result<Self, SolverError> {
        settings.validate()?;
        let pool = WorkerPool::new(settings.n_threads)?;

        // projection makes no sense without state-input equality constraints
        let project_equalities = settings.project_state_input_equality_constraints
            && problem.has_state_input_equality_constraints();

        let problems =
            WorkerLocal::new((0..settings.n_threads).map(|_| problem.clone()).collect());

        Ok(Self {
            settings,
            pool,
            problems,
            initializer,
            qp_solver: Box::new(RiccatiQpSolver::new()),
            reference_manager: ReferenceManager::new(Default::default(), Default::default()),
            project_equalities,
            dynamics: Vec::new(),
            cost: Vec::new(),
            constraints: Vec::new(),
            projections: Vec::new(),
            primal_solution: empty_solution(),
            performance: PerformanceIndex::default(),
            performance_log: Vec::new(),
            total_iterations: 0,
        })
    }

    /// Replaces the structured QP backend.
    pub fn with_qp_solver(mut self, qp_solver: Box<dyn StructuredQpSolver>) -> Self {
        self.qp_solver = qp_solver;
        self
    }

    pub fn settings(&self) -> &SqpSettings {
        &self.settings
    }

    /// Initializes the state and input trajectories on the node grid, using
    /// the previous primal solution where it overlaps the horizon and the
    /// initializer beyond it.
    fn initialize_state_input_trajectories(
        &self,
        x0: &Vector,
        grid: &[AnnotatedTime],
    ) -> (Vec<Vector>, Vec<Vector>) {
        let n = grid.len() - 1;
        let mut x = Vec::with_capacity(n + 1);
        let mut u = Vec::with_capacity(n);

        let interpolate_till = if self.total_iterations > 0 {
            self.primal_solution
                .time_trajectory
                .last()
                .copied()
                .unwrap_or(grid[0].time)
        } else {
            grid[0].time
        };

        x.push(x0.clone());
        for i in 0..n {
            if grid[i].event == TimeType::PreEvent {
                u.push(Vector::zeros(0));
                // identity-jump guess for the post-event state
                x.push(x[i].clone());
                continue;
            }
            let t = grid[i].time;
            let t_next = grid[i + 1].time;
            if t < interpolate_till {
                let input = interpolate_vector(
                    t,
                    &self.primal_solution.time_trajectory,
                    &self.primal_solution.input_trajectory,
                );
                let next_state = interpolate_vector(
                    t_next,
                    &self.primal_solution.time_trajectory,
                    &self.primal_solution.state_trajectory,
                );
                u.push(input);
                x.push(next_state);
            } else {
                let input = self.initializer.compute_input(t, &x[i]);
                u.push(input);
                x.push(x[i].clone());
            }
        }
        (x, u)
    }

    /// Builds the LQ subproblem around the iterate and returns its
    /// performance. Nodes are claimed by the workers through a shared
    /// counter; outputs land indexed by node order.
    fn setup_quadratic_subproblem(
        &mut self,
        grid: &[AnnotatedTime],
        x0: &Vector,
        x: &[Vector],
        u: &[Vector],
    ) -> Result<PerformanceIndex, SolverError> {
        let n = grid.len() - 1;
        enum NodeOutput {
            Stage(transcription::TranscribedNode),
            Terminal(transcription::TerminalNode),
        }

        let work = WorkIndex::new();
        let settings = &self.settings;
        let project = self.project_equalities;
        let problems = &self.problems;

        let worker_results: Vec<
            Result<(Vec<(usize, NodeOutput)>, PerformanceIndex), SolverError>,
        > = self.pool.run(|worker_id| {
            let mut problem = problems.lock(worker_id);
            let mut nodes = Vec::new();
            let mut performance = PerformanceIndex::default();
            loop {
                let i = work.next();
                if i > n {
                    break;
                }
                if i == n {
                    // exactly one worker lands on the terminal node
                    let terminal = setup_terminal_node(&mut problem, grid[n].time, &x[n])?;
                    performance += terminal.performance;
                    nodes.push((i, NodeOutput::Terminal(terminal)));
                } else if grid[i].event == TimeType::PreEvent {
                    let node = setup_event_node(&mut problem, grid[i].time, &x[i], &x[i + 1])?;
                    performance += node.performance;
                    nodes.push((i, NodeOutput::Stage(node)));
                } else {
                    let t = interval_start(&grid[i]);
                    let dt = interval_duration(&grid[i], &grid[i + 1]);
                    let node = setup_intermediate_node(
                        &mut problem,
                        settings.integrator,
                        &settings.inequality_penalty,
                        project,
                        t,
                        dt,
                        &x[i],
                        &x[i + 1],
                        &u[i],
                    )?;
                    performance += node.performance;
                    nodes.push((i, NodeOutput::Stage(node)));
                }
            }
            Ok((nodes, performance))
        });

        let mut batches = Vec::with_capacity(worker_results.len());
        let mut total = PerformanceIndex::default();
        for result in worker_results {
            let (nodes, performance) = result?;
            total += performance;
            batches.push(nodes);
        }

        let merged = merge_by_index(n + 1, batches);
        self.dynamics.clear();
        self.cost.clear();
        self.constraints.clear();
        self.projections.clear();
        for (i, output) in merged.into_iter().enumerate() {
            match output {
                NodeOutput::Stage(node) => {
                    debug_assert!(i < n);
                    self.dynamics.push(node.dynamics);
                    self.cost.push(node.cost);
                    self.constraints.push(node.constraints);
                    self.projections.push(node.projection);
                }
                NodeOutput::Terminal(terminal) => {
                    debug_assert_eq!(i, n);
                    self.cost.push(terminal.cost);
                }
            }
        }

        total.state_eq_ise += (x0 - &x[0]).norm_squared();
        total.merit = total.total_cost + total.inequality_penalty;
        Ok(total)
    }

    /// Solves the structured QP and expands the step back to the original
    /// input coordinates.
    fn solve_subproblem(&mut self, dx0: &Vector) -> Result<SubproblemSolution, SolverError> {
        let n = self.dynamics.len();

        let mut delta = if self.project_equalities {
            // eliminate the stage equalities, solve in tilde coordinates
            let mut projected_dynamics = Vec::with_capacity(n);
            let mut projected_cost = Vec::with_capacity(n + 1);
            for i in 0..n {
                match &self.projections[i] {
                    Some(projection) => {
                        projected_dynamics.push(horizon_core::projection::project_dynamics(
                            &self.dynamics[i],
                            projection,
                        ));
                        projected_cost.push(horizon_core::projection::project_cost(
                            &self.cost[i],
                            projection,
                        ));
                    }
                    None => {
                        projected_dynamics.push(self.dynamics[i].clone());
                        projected_cost.push(self.cost[i].clone());
                    }
                }
            }
            projected_cost.push(self.cost[n].clone());

            // stages whose rows could not be projected (rank-deficient)
            // keep their constraints explicit; those stages are still in
            // original input coordinates
            let has_explicit = self.constraints.iter().any(|c| c.num_outputs() > 0);
            let constraints = if has_explicit {
                Some(&self.constraints[..])
            } else {
                None
            };

            let mut solution =
                self.qp_solver
                    .solve(dx0, &projected_dynamics, &projected_cost, constraints)?;

            // remap the tilde delta u to real delta u
            for i in 0..n {
                if let Some(projection) = &self.projections[i] {
                    solution.delta_u[i] =
                        expand_input(projection, &solution.delta_u[i], &solution.delta_x[i]);
                }
            }
            solution
        } else {
            let has_constraints = self.constraints.iter().any(|c| c.num_outputs() > 0);
            let constraints = if has_constraints {
                Some(&self.constraints[..])
            } else {
                None
            };
            self.qp_solver
                .solve(dx0, &self.dynamics, &self.cost, constraints)?
        };

        // descent metric of the cost along the step, in original coordinates
        let mut armijo_descent_metric = 0.0;
        for i in 0..=n {
            armijo_descent_metric += self.cost[i].fx.dot(&delta.delta_x[i]);
            if i < n && delta.delta_u[i].len() > 0 {
                armijo_descent_metric += self.cost[i].fu.dot(&delta.delta_u[i]);
            }
        }

        // guard against a non-finite step slipping into the line search
        if delta
            .delta_x
            .iter_mut()
            .chain(delta.delta_u.iter_mut())
            .any(|v| !v.iter().all(|e| e.is_finite()))
        {
            return Err(SolverError::QpFailed(horizon_core::error::QpStatus::NumericalFailure));
        }

        Ok(SubproblemSolution {
            delta,
            armijo_descent_metric,
        })
    }

    /// Performance of a candidate iterate (parallel sweep, values only).
    fn compute_performance(
        &self,
        grid: &[AnnotatedTime],
        x0: &Vector,
        x: &[Vector],
        u: &[Vector],
    ) -> PerformanceIndex {
        let n = grid.len() - 1;
        let work = WorkIndex::new();
        let settings = &self.settings;
        let problems = &self.problems;

        let locals: Vec<PerformanceIndex> = self.pool.run(|worker_id| {
            let mut problem = problems.lock(worker_id);
            let mut performance = PerformanceIndex::default();
            loop {
                let i = work.next();
                if i > n {
                    break;
                }
                if i == n {
                    performance += compute_terminal_performance(&mut problem, grid[n].time, &x[n]);
                } else if grid[i].event == TimeType::PreEvent {
                    performance +=
                        compute_event_performance(&mut problem, grid[i].time, &x[i], &x[i + 1]);
                } else {
                    let t = interval_start(&grid[i]);
                    let dt = interval_duration(&grid[i], &grid[i + 1]);
                    performance += compute_intermediate_performance(
                        &mut problem,
                        settings.integrator,
                        &settings.inequality_penalty,
                        t,
                        dt,
                        &x[i],
                        &x[i + 1],
                        &u[i],
                    );
                }
            }
            performance
        });

        let mut total = PerformanceIndex::default();
        for local in locals {
            total += local;
        }
        total.state_eq_ise += (x0 - &x[0]).norm_squared();
        total.merit = total.total_cost + total.inequality_penalty;
        total
    }

    /// Filter line search: accepts a step when it improves the merit or the
    /// violation, with an Armijo test in the low-violation regime.
    fn take_step(
        &mut self,
        baseline: &PerformanceIndex,
        grid: &[AnnotatedTime],
        x0: &Vector,
        subproblem: &SubproblemSolution,
        x: &mut Vec<Vector>,
        u: &mut Vec<Vector>,
    ) -> (bool, PerformanceIndex) {
        let settings = &self.settings;
        let dx = &subproblem.delta.delta_x;
        let du = &subproblem.delta.delta_u;
        let armijo_descent_metric = subproblem.armijo_descent_metric;

        let baseline_violation = baseline.constraint_violation();
        let delta_u_norm = trajectory_norm(du);
        let delta_x_norm = trajectory_norm(dx);

        if settings.print_linesearch {
            info!(
                merit = baseline.merit,
                violation = baseline_violation,
                descent = armijo_descent_metric,
                "linesearch baseline"
            );
        }

        let mut alpha = 1.0;
        loop {
            // candidate iterate; event nodes carry no input entry to update
            let mut x_new: Vec<Vector> = Vec::with_capacity(x.len());
            for i in 0..x.len() {
                x_new.push(&x[i] + &dx[i] * alpha);
            }
            let mut u_new: Vec<Vector> = Vec::with_capacity(u.len());
            for i in 0..u.len() {
                if du[i].len() > 0 {
                    u_new.push(&u[i] + &du[i] * alpha);
                } else {
                    u_new.push(u[i].clone());
                }
            }

            let performance_new = self.compute_performance(grid, x0, &x_new, &u_new);
            let new_violation = performance_new.constraint_violation();

            let step_accepted = if !performance_new.is_finite() {
                false
            } else if new_violation > settings.g_max {
                false
            } else if new_violation < settings.g_min
                && baseline_violation < settings.g_min
                && armijo_descent_metric < 0.0
            {
                // low violation + descent direction: Armijo on the merit
                performance_new.merit
                    < baseline.merit + settings.armijo_factor * alpha * armijo_descent_metric
            } else {
                // either merit or violation must decrease sufficiently
                performance_new.merit < baseline.merit - settings.gamma_c * baseline_violation
                    || new_violation < (1.0 - settings.gamma_c) * baseline_violation
            };

            if settings.print_linesearch {
                info!(
                    alpha,
                    accepted = step_accepted,
                    merit = performance_new.merit,
                    violation = new_violation,
                    "linesearch trial"
                );
            }

            let step_below_tol = alpha * delta_u_norm < settings.delta_tol
                && alpha * delta_x_norm < settings.delta_tol;

            if step_accepted {
                *x = x_new;
                *u = u_new;
                let improvement_below_tol = (baseline.merit - performance_new.merit).abs()
                    < settings.cost_tol
                    && new_violation < settings.g_min;
                return (step_below_tol || improvement_below_tol, performance_new);
            } else if step_below_tol {
                debug!("step size below deltaTol without acceptance");
                return (true, *baseline);
            }

            alpha *= settings.alpha_decay;
            if alpha < settings.alpha_min {
                return (true, *baseline);
            }
        }
    }

    /// Assembles the primal solution, repeating inputs at event nodes and
    /// attaching the requested policy shape.
    fn set_primal_solution(
        &mut self,
        grid: &[AnnotatedTime],
        mut x: Vec<Vector>,
        mut u: Vec<Vector>,
    ) {
        let n = grid.len() - 1;

        // inputs are missing at pre-event nodes; repeat the predecessor
        for i in 0..u.len() {
            if grid[i].event == TimeType::PreEvent && i > 0 {
                u[i] = u[i - 1].clone();
            }
        }

        let times: Vec<Scalar> = grid.iter().map(|node| node.time).collect();

        let controller = if self.settings.use_feedback_policy {
            // u = u_ff + K x; expand projected gains to original coordinates
            let qp_gains = self.qp_solver.riccati_feedback();
            let mut gains: Vec<horizon_core::types::Matrix> = Vec::with_capacity(n + 1);
            let mut biases: Vec<Vector> = Vec::with_capacity(n + 1);
            for i in 0..n {
                if grid[i].event == TimeType::PreEvent && i > 0 {
                    gains.push(gains[i - 1].clone());
                    biases.push(biases[i - 1].clone());
                    continue;
                }
                let gain = match &self.projections[i] {
                    Some(projection) => expand_gain(projection, &qp_gains[i]),
                    None => qp_gains[i].clone(),
                };
                let bias = &u[i] - &gain * &x[i];
                gains.push(gain);
                biases.push(bias);
            }
            gains.push(gains[n - 1].clone());
            biases.push(biases[n - 1].clone());
            let nu = biases[0].len();
            Controller::Linear(LinearController {
                times: times.clone(),
                gains,
                biases,
                delta_biases: vec![Vector::zeros(nu); n + 1],
            })
        } else {
            let mut inputs = u.clone();
            inputs.push(u[n - 1].clone());
            Controller::Feedforward(FeedforwardController::new(times.clone(), inputs))
        };

        u.push(u[n - 1].clone()); // equal-length trajectories
        x.truncate(n + 1);
        self.primal_solution = PrimalSolution {
            time_trajectory: times,
            state_trajectory: x,
            input_trajectory: u,
            mode_schedule: self.reference_manager.mode_schedule(),
            controller,
        };
    }
}

impl Solver for SqpSolver {
    fn reset(&mut self) {
        self.primal_solution = empty_solution();
        self.performance = PerformanceIndex::default();
        self.performance_log.clear();
        self.total_iterations = 0;
        self.dynamics.clear();
        self.cost.clear();
        self.constraints.clear();
        self.projections.clear();
    }

    fn run(
        &mut self,
        t0: Scalar,
        x0: &Vector,
        tf: Scalar,
        partitioning_times: &[Scalar],
    ) -> Result<TerminationReason, SolverError> {
        validate_run_arguments(t0, x0, tf, partitioning_times)?;

        if self.settings.print_solver_status {
            info!(t0, tf, "SQP solver initialized");
        }

        // snapshot the references once per run
        let mode_schedule = self.reference_manager.mode_schedule();
        let target_trajectories = self.reference_manager.target_trajectories();
        for problem in self.problems.iter_mut() {
            problem.target_trajectories = target_trajectories.clone();
        }

        let grid =
            time_discretization_with_events(t0, tf, self.settings.dt, &mode_schedule.event_times);

        if grid.len() < 2 {
            // degenerate horizon: a single node, no decision variables
            self.primal_solution = PrimalSolution {
                time_trajectory: vec![t0],
                state_trajectory: vec![x0.clone()],
                input_trajectory: vec![self.initializer.compute_input(t0, x0)],
                mode_schedule,
                controller: Controller::Feedforward(FeedforwardController::new(
                    vec![t0],
                    vec![self.initializer.compute_input(t0, x0)],
                )),
            };
            self.performance = PerformanceIndex::default();
            return Ok(TerminationReason::Converged("degenerate horizon".into()));
        }

        let (mut x, mut u) = self.initialize_state_input_trajectories(x0, &grid);

        self.performance_log.clear();
        let mut reason = TerminationReason::MaxIterations;

        for iteration in 0..self.settings.sqp_iterations {
            if self.settings.print_solver_status {
                info!(iteration, "SQP iteration");
            }

            let baseline = self.setup_quadratic_subproblem(&grid, x0, &x, &u)?;
            let dx0 = x0 - &x[0];
            let subproblem = self.solve_subproblem(&dx0)?;
            let (converged, performance) =
                self.take_step(&baseline, &grid, x0, &subproblem, &mut x, &mut u);

            self.performance_log.push(performance);
            self.performance = performance;
            self.total_iterations += 1;

            if converged {
                reason = TerminationReason::Converged(format!(
                    "filter line search converged at iteration {iteration}"
                ));
                break;
            }
        }

        self.set_primal_solution(&grid, x, u);

        if self.settings.print_solver_status {
            info!(iterations = self.performance_log.len(), "SQP solver terminated");
        }
        Ok(reason)
    }

    fn primal_solution(&self, final_time: Scalar) -> PrimalSolution {
        self.primal_solution.truncated(final_time)
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

fn empty_solution() -> PrimalSolution {
    PrimalSolution {
        time_trajectory: Vec::new(),
        state_trajectory: Vec::new(),
        input_trajectory: Vec::new(),
        mode_schedule: Default::default(),
        controller: Controller::Feedforward(FeedforwardController::default()),
    }
}

/// 2-norm over a trajectory: `sqrt(Σ_i ‖v_i‖²)`.
fn trajectory_norm(trajectory: &[Vector]) -> Scalar {
    trajectory
        .iter()
        .map(|v| v.norm_squared())
        .sum::<Scalar>()
        .sqrt()
}
