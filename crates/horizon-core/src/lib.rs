//! horizon-core
//!
//! Problem abstraction and numerics shared by the horizon optimal-control
//! solvers: dense approximation value types, the hybrid optimal-control
//! problem interface, time discretization with event nodes, ODE integration
//! and trajectory rollout, constraint projection, and the linear-quadratic
//! approximation pipeline.
//!
//! The solvers themselves (DDP family and multiple-shooting SQP) live in
//! the `horizon-solver` crate.
//!
//! # Components
//!
//! - [`types`]: scalar/vector/matrix aliases and approximation value types
//! - [`problem`]: the [`problem::OptimalControlProblem`] capability bundle
//! - [`dynamics`], [`cost`], [`constraint`]: capability traits and common
//!   concrete terms
//! - [`time_discretization`]: event-annotated node grids
//! - [`integrator`], [`rollout`]: Runge-Kutta schemes and the
//!   time-triggered rollout
//! - [`approximate`]: per-node LQ models
//! - [`projection`]: state-input equality-constraint elimination
//! - [`penalty`]: relaxed-barrier folding of inequality constraints
//! - [`reference`]: mode schedules and target trajectories
//! - [`controller`], [`solution`]: policies and the primal solution

pub mod approximate;
pub mod collection;
pub mod constraint;
pub mod controller;
pub mod cost;
pub mod dynamics;
pub mod error;
pub mod initializer;
pub mod integrator;
pub mod interpolation;
pub mod penalty;
pub mod performance;
pub mod precomputation;
pub mod problem;
pub mod projection;
pub mod reference;
pub mod rollout;
pub mod solution;
pub mod time_discretization;
pub mod types;

pub use controller::{Controller, FeedforwardController, LinearController};
pub use error::{QpStatus, SolverError, TerminationReason};
pub use performance::PerformanceIndex;
pub use problem::OptimalControlProblem;
pub use reference::{ModeSchedule, ReferenceManager, TargetTrajectories};
pub use solution::PrimalSolution;
pub use types::{Matrix, Scalar, Vector};
