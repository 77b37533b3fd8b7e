//! Primal solution container

use crate::controller::Controller;
use crate::reference::ModeSchedule;
use crate::types::{Scalar, Vector};

/// State/input trajectories and the policy produced by a solver.
#[derive(Debug, Clone)]
pub struct PrimalSolution {
    pub time_trajectory: Vec<Scalar>,
    pub state_trajectory: Vec<Vector>,
    pub input_trajectory: Vec<Vector>,
    pub mode_schedule: ModeSchedule,
    pub controller: Controller,
}

impl PrimalSolution {
    /// Truncates the solution at `final_time`, keeping at least one node.
    /// The controller is kept intact; its stamps beyond `final_time` are
    /// simply never queried by an MPC consumer.
    pub fn truncated(&self, final_time: Scalar) -> PrimalSolution {
        let keep = self
            .time_trajectory
            .partition_point(|&t| t <= final_time)
            .max(1);
        PrimalSolution {
            time_trajectory: self.time_trajectory[..keep].to_vec(),
            state_trajectory: self.state_trajectory[..keep].to_vec(),
            input_trajectory: self.input_trajectory[..keep].to_vec(),
            mode_schedule: self.mode_schedule.clone(),
            controller: self.controller.clone(),
        }
    }
}
