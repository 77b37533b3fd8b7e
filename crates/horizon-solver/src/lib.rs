//! horizon-solver
//!
//! Numerical engines computing locally optimal state/input trajectories for
//! continuous-time, possibly hybrid systems over a finite horizon. Two
//! solver families share the `horizon-core` problem abstraction:
//!
//! - **DDP family** ([`ddp::DdpSolver`], SLQ or ILQR): forward rollout,
//!   sequential Riccati backward pass, and a search strategy — parallel
//!   line search or Levenberg-Marquardt.
//! - **Multiple-shooting SQP** ([`sqp::SqpSolver`]): structured-QP
//!   transcription of the horizon, an exchangeable QP backend, and a
//!   Wächter-Biegler filter line search.
//!
//! Both implement the [`solver::Solver`] facade:
//!
//! ```text
//! reset → run(t0, x0, tf, partitioningTimes) → primal_solution(t)
//! ```
//!
//! Parallelism lives in the per-node approximation sweep, the SQP
//! performance recomputation, and the DDP line-search trials; one
//! long-lived worker pool per solver, sized by `n_threads`.

pub mod ddp;
pub mod hessian;
pub mod settings;
pub mod solver;
pub mod sqp;
pub mod workers;

pub use ddp::DdpSolver;
pub use settings::{
    DdpAlgorithm, DdpSettings, LevenbergMarquardtSettings, LineSearchSettings, SearchStrategyType,
    SqpSettings,
};
pub use solver::Solver;
pub use sqp::qp::{QpSolution, RiccatiQpSolver, StructuredQpSolver};
pub use sqp::SqpSolver;
