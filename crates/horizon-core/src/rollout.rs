//! Trajectory rollout
//!
//! Integrates the flow map over each inter-event interval of the node grid,
//! applies the jump map where an interval closes on an event, and records
//! the state and realized input at every node. Event times come from the
//! mode schedule (time-triggered rollout); guard surfaces on the dynamics
//! are available to callers that detect crossings themselves.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dynamics::SystemDynamics;
use crate::error::SolverError;
use crate::integrator::{adaptive_step, fixed_step, IntegratorType};
use crate::precomputation::PreComputation;
use crate::time_discretization::{AnnotatedTime, TimeType};
use crate::types::{Scalar, Vector};

/// Rollout configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RolloutSettings {
    /// Integration scheme between nodes.
    pub integrator: IntegratorType,
    /// Absolute tolerance of the adaptive integrator.
    pub abs_tol: Scalar,
    /// Relative tolerance of the adaptive integrator.
    pub rel_tol: Scalar,
    /// Nominal internal step size.
    pub time_step: Scalar,
    /// Integration-step budget per second of horizon.
    pub max_steps_per_second: usize,
}

impl Default for RolloutSettings {
    fn default() -> Self {
        Self {
            integrator: IntegratorType::Rk4,
            abs_tol: 1e-9,
            rel_tol: 1e-6,
            time_step: 1e-2,
            max_steps_per_second: 10_000,
        }
    }
}

impl RolloutSettings {
    pub fn validate(&self) -> Result<(), SolverError> {
        if self.time_step <= 0.0 {
            return Err(SolverError::InvalidConfiguration(
                "rollout time step must be positive".into(),
            ));
        }
        if self.max_steps_per_second == 0 {
            return Err(SolverError::InvalidConfiguration(
                "rollout step budget must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Node-aligned result of a rollout.
#[derive(Debug, Clone, Default)]
pub struct RolloutData {
    pub states: Vec<Vector>,
    pub inputs: Vec<Vector>,
    /// Indices of the post-event nodes at which the jump map fired.
    pub post_event_indices: Vec<usize>,
}

/// Time-triggered rollout engine.
#[derive(Debug, Clone)]
pub struct Rollout {
    settings: RolloutSettings,
}

impl Rollout {
    pub fn new(settings: RolloutSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RolloutSettings {
        &self.settings
    }

    /// Rolls the system out over the node grid from `x0`, querying
    /// `input_policy(t, x)` for the input at every integrator stage.
    ///
    /// At a PreEvent node the pre-jump state is recorded (with the input
    /// repeated from the preceding node), the jump map is applied, and the
    /// PostEvent node receives the post-jump state.
    pub fn run(
        &self,
        grid: &[AnnotatedTime],
        x0: &Vector,
        dynamics: &dyn SystemDynamics,
        pre: &dyn PreComputation,
        input_policy: &dyn Fn(Scalar, &Vector) -> Vector,
    ) -> Result<RolloutData, SolverError> {
        assert!(!grid.is_empty());
        let horizon = grid.last().unwrap().time - grid[0].time;
        let step_budget = ((horizon * self.settings.max_steps_per_second as Scalar).ceil()
            as usize)
            .max(self.settings.max_steps_per_second / 100)
            .max(1);
        let mut steps_taken = 0usize;

        let mut data = RolloutData {
            states: Vec::with_capacity(grid.len()),
            inputs: Vec::with_capacity(grid.len()),
            post_event_indices: Vec::new(),
        };

        let mut x = x0.clone();
        let u0 = input_policy(grid[0].time, &x);
        data.states.push(x.clone());
        data.inputs.push(u0);

        for i in 1..grid.len() {
            let node = &grid[i];
            let prev = &grid[i - 1];

            if node.event == TimeType::PostEvent {
                // zero-duration interval: apply the jump
                x = dynamics.jump_map(node.time, &x, pre);
                if !x.iter().all(|v| v.is_finite()) {
                    return Err(SolverError::RolloutDiverged { time: node.time });
                }
                data.post_event_indices.push(i);
                data.states.push(x.clone());
                // no input across the event; repeat the preceding one
                let u_prev = data.inputs.last().unwrap().clone();
                data.inputs.push(u_prev);
                continue;
            }

            let t_start = prev.time;
            let t_end = node.time;
            x = self.integrate_interval(
                t_start,
                t_end,
                x,
                dynamics,
                pre,
                input_policy,
                &mut steps_taken,
                step_budget,
            )?;

            data.states.push(x.clone());
            data.inputs.push(input_policy(t_end, &x));
        }

        Ok(data)
    }

    #[allow(clippy::too_many_arguments)]
    fn integrate_interval(
        &self,
        t_start: Scalar,
        t_end: Scalar,
        mut x: Vector,
        dynamics: &dyn SystemDynamics,
        pre: &dyn PreComputation,
        input_policy: &dyn Fn(Scalar, &Vector) -> Vector,
        steps_taken: &mut usize,
        step_budget: usize,
    ) -> Result<Vector, SolverError> {
        if t_end - t_start <= 0.0 {
            return Ok(x);
        }
        let closed_loop = |t: Scalar, state: &Vector| -> Vector {
            let u = input_policy(t, state);
            dynamics.flow_map(t, state, &u, pre)
        };

        let mut t = t_start;
        let mut dt = self.settings.time_step.min(t_end - t_start);
        while t < t_end - 1e-12 {
            *steps_taken += 1;
            if *steps_taken > step_budget {
                return Err(SolverError::RolloutDiverged { time: t });
            }

            let step = (t_end - t).min(dt);
            match self.settings.integrator {
                IntegratorType::DormandPrince45 => {
                    let (x_new, dt_used, dt_next) = adaptive_step(
                        &x,
                        t,
                        step,
                        self.settings.abs_tol,
                        self.settings.rel_tol,
                        &closed_loop,
                    );
                    x = x_new;
                    t += dt_used;
                    dt = dt_next;
                }
                scheme => {
                    x = fixed_step(scheme, &x, t, step, &closed_loop);
                    t += step;
                }
            }

            if !x.iter().all(|v| v.is_finite()) {
                warn!(time = t, "state became non-finite during rollout");
                return Err(SolverError::RolloutDiverged { time: t });
            }
        }
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::LinearSystemDynamics;
    use crate::precomputation::NoOpPreComputation;
    use crate::time_discretization::time_discretization_with_events;
    use crate::types::Matrix;
    use approx::assert_relative_eq;

    fn decay_system() -> LinearSystemDynamics {
        LinearSystemDynamics::new(
            Matrix::from_row_slice(1, 1, &[-1.0]),
            Matrix::from_row_slice(1, 1, &[0.0]),
        )
    }

    #[test]
    fn test_rollout_matches_exponential_decay() {
        let rollout = Rollout::new(RolloutSettings {
            time_step: 1e-3,
            ..Default::default()
        });
        let grid = time_discretization_with_events(0.0, 1.0, 0.1, &[]);
        let data = rollout
            .run(
                &grid,
                &Vector::from_vec(vec![1.0]),
                &decay_system(),
                &NoOpPreComputation,
                &|_t, _x| Vector::zeros(1),
            )
            .unwrap();
        assert_eq!(data.states.len(), grid.len());
        assert_relative_eq!(
            data.states.last().unwrap()[0],
            (-1.0_f64).exp(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_jump_applied_at_event() {
        let sys = LinearSystemDynamics::new(
            Matrix::from_row_slice(1, 1, &[0.0]),
            Matrix::from_row_slice(1, 1, &[0.0]),
        )
        .with_jump(Matrix::from_row_slice(1, 1, &[2.0]));

        let rollout = Rollout::new(RolloutSettings::default());
        let grid = time_discretization_with_events(0.0, 1.0, 0.25, &[0.5]);
        let data = rollout
            .run(
                &grid,
                &Vector::from_vec(vec![1.0]),
                &sys,
                &NoOpPreComputation,
                &|_t, _x| Vector::zeros(1),
            )
            .unwrap();

        assert_eq!(data.post_event_indices.len(), 1);
        let post = data.post_event_indices[0];
        assert_relative_eq!(data.states[post - 1][0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(data.states[post][0], 2.0, epsilon = 1e-9);
        // trajectory lengths stay aligned to the grid
        assert_eq!(data.states.len(), grid.len());
        assert_eq!(data.inputs.len(), grid.len());
    }

    #[test]
    fn test_divergence_detected() {
        // unstable system with a tiny step budget
        let sys = LinearSystemDynamics::new(
            Matrix::from_row_slice(1, 1, &[100.0]),
            Matrix::from_row_slice(1, 1, &[0.0]),
        );
        let rollout = Rollout::new(RolloutSettings {
            time_step: 1e-4,
            max_steps_per_second: 10,
            ..Default::default()
        });
        let grid = time_discretization_with_events(0.0, 1.0, 0.1, &[]);
        let result = rollout.run(
            &grid,
            &Vector::from_vec(vec![1.0]),
            &sys,
            &NoOpPreComputation,
            &|_t, _x| Vector::zeros(1),
        );
        assert!(matches!(
            result,
            Err(SolverError::RolloutDiverged { .. })
        ));
    }
}
