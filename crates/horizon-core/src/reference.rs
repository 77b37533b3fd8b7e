//! Mode schedules and target trajectories
//!
//! The reference manager owns the hybrid mode schedule and the tracking
//! targets. Solvers take a snapshot at the top of each outer iteration and
//! treat it as immutable within that iteration.

use std::sync::{Arc, RwLock};

use crate::interpolation::interpolate_vector;
use crate::types::{Scalar, Vector};

/// Identifier of a discrete system mode.
pub type ModeId = usize;

/// Event times and the mode active between consecutive events.
///
/// `event_times` is strictly increasing and `mode_sequence.len() ==
/// event_times.len() + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeSchedule {
    pub event_times: Vec<Scalar>,
    pub mode_sequence: Vec<ModeId>,
}

impl ModeSchedule {
    pub fn new(event_times: Vec<Scalar>, mode_sequence: Vec<ModeId>) -> Self {
        assert_eq!(
            mode_sequence.len(),
            event_times.len() + 1,
            "mode sequence must have one more entry than the event times"
        );
        debug_assert!(event_times.windows(2).all(|w| w[0] < w[1]));
        Self {
            event_times,
            mode_sequence,
        }
    }

    /// Single-mode schedule with no events.
    pub fn single_mode(mode: ModeId) -> Self {
        Self {
            event_times: Vec::new(),
            mode_sequence: vec![mode],
        }
    }

    /// Mode active at time `t` (intervals are closed on the left).
    pub fn mode_at(&self, t: Scalar) -> ModeId {
        let idx = self.event_times.partition_point(|&e| e <= t);
        self.mode_sequence[idx]
    }
}

impl Default for ModeSchedule {
    fn default() -> Self {
        Self::single_mode(0)
    }
}

/// Time-stamped state and input targets, interpolated linearly by the cost
/// terms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetTrajectories {
    pub times: Vec<Scalar>,
    pub states: Vec<Vector>,
    pub inputs: Vec<Vector>,
}

impl TargetTrajectories {
    /// Constant target held over the whole horizon.
    pub fn constant(state: Vector, input: Vector) -> Self {
        Self {
            times: vec![0.0],
            states: vec![state],
            inputs: vec![input],
        }
    }

    pub fn state_at(&self, t: Scalar) -> Vector {
        interpolate_vector(t, &self.times, &self.states)
    }

    pub fn input_at(&self, t: Scalar) -> Vector {
        interpolate_vector(t, &self.times, &self.inputs)
    }

    /// `x − x_ref(t)`; an empty target tracks the origin.
    pub fn state_deviation(&self, t: Scalar, x: &Vector) -> Vector {
        if self.states.is_empty() {
            x.clone()
        } else {
            x - self.state_at(t)
        }
    }

    /// `u − u_ref(t)`; an empty target tracks zero input.
    pub fn input_deviation(&self, t: Scalar, u: &Vector) -> Vector {
        if self.inputs.is_empty() {
            u.clone()
        } else {
            u - self.input_at(t)
        }
    }
}

/// Shared owner of the mode schedule and target trajectories.
///
/// Updates (e.g. from an MPC supervisor) happen between solver iterations;
/// solvers read snapshots only.
#[derive(Debug, Default)]
pub struct ReferenceManager {
    inner: RwLock<ReferenceState>,
}

#[derive(Debug, Clone, Default)]
struct ReferenceState {
    mode_schedule: ModeSchedule,
    target_trajectories: TargetTrajectories,
}

impl ReferenceManager {
    pub fn new(mode_schedule: ModeSchedule, target_trajectories: TargetTrajectories) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(ReferenceState {
                mode_schedule,
                target_trajectories,
            }),
        })
    }

    /// Snapshot of the current mode schedule.
    pub fn mode_schedule(&self) -> ModeSchedule {
        self.inner.read().unwrap().mode_schedule.clone()
    }

    /// Snapshot of the current target trajectories.
    pub fn target_trajectories(&self) -> TargetTrajectories {
        self.inner.read().unwrap().target_trajectories.clone()
    }

    pub fn set_mode_schedule(&self, mode_schedule: ModeSchedule) {
        self.inner.write().unwrap().mode_schedule = mode_schedule;
    }

    pub fn set_target_trajectories(&self, target_trajectories: TargetTrajectories) {
        self.inner.write().unwrap().target_trajectories = target_trajectories;
    }
}
