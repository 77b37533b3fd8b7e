//! Optimal control problem definition
//!
//! Aggregates the capability objects a solver consumes: dynamics, cost and
//! constraint collections, the pre-computation cache, and the current target
//! snapshot. Cloning produces a fully independent instance (each worker
//! thread owns one), so evaluation never synchronizes.

use crate::collection::Collection;
use crate::constraint::{StateConstraint, StateInputConstraint};
use crate::cost::{StateCost, StateInputCost};
use crate::dynamics::SystemDynamics;
use crate::precomputation::{NoOpPreComputation, PreComputation};
use crate::reference::TargetTrajectories;

/// A nonlinear optimal control problem over a finite horizon.
pub struct OptimalControlProblem {
    /// Hybrid system dynamics.
    pub dynamics: Box<dyn SystemDynamics>,

    /// Intermediate state-input cost terms.
    pub cost: Collection<dyn StateInputCost>,
    /// Intermediate state-only cost terms.
    pub state_cost: Collection<dyn StateCost>,
    /// Cost terms evaluated at the pre-jump state of each event.
    pub pre_jump_cost: Collection<dyn StateCost>,
    /// Terminal cost terms.
    pub final_cost: Collection<dyn StateCost>,

    /// State-input equality constraints (`g = 0`).
    pub equality: Collection<dyn StateInputConstraint>,
    /// State-only equality constraints.
    pub state_equality: Collection<dyn StateConstraint>,
    /// Inequality constraints (`h ≥ 0`), folded into the cost by a penalty.
    pub inequality: Collection<dyn StateInputConstraint>,
    /// Pre-jump equality constraints.
    pub pre_jump_equality: Collection<dyn StateConstraint>,
    /// Terminal equality constraints.
    pub final_equality: Collection<dyn StateConstraint>,

    /// Shared evaluation cache of this problem instance.
    pub pre_computation: Box<dyn PreComputation>,

    /// Target snapshot, refreshed by the solver once per outer iteration.
    pub target_trajectories: TargetTrajectories,
}

impl OptimalControlProblem {
    pub fn new(dynamics: Box<dyn SystemDynamics>) -> Self {
        Self {
            dynamics,
            cost: Collection::new(|t| t.clone_boxed()),
            state_cost: Collection::new(|t| t.clone_boxed()),
            pre_jump_cost: Collection::new(|t| t.clone_boxed()),
            final_cost: Collection::new(|t| t.clone_boxed()),
            equality: Collection::new(|t| t.clone_boxed()),
            state_equality: Collection::new(|t| t.clone_boxed()),
            inequality: Collection::new(|t| t.clone_boxed()),
            pre_jump_equality: Collection::new(|t| t.clone_boxed()),
            final_equality: Collection::new(|t| t.clone_boxed()),
            pre_computation: Box::new(NoOpPreComputation),
            target_trajectories: TargetTrajectories::default(),
        }
    }

    /// True when no state-input equality constraint is registered; the
    /// solvers then disable the projection automatically.
    pub fn has_state_input_equality_constraints(&self) -> bool {
        !self.equality.is_empty()
    }
}

impl Clone for OptimalControlProblem {
    fn clone(&self) -> Self {
        Self {
            dynamics: self.dynamics.clone_boxed(),
            cost: self.cost.clone(),
            state_cost: self.state_cost.clone(),
            pre_jump_cost: self.pre_jump_cost.clone(),
            final_cost: self.final_cost.clone(),
            equality: self.equality.clone(),
            state_equality: self.state_equality.clone(),
            inequality: self.inequality.clone(),
            pre_jump_equality: self.pre_jump_equality.clone(),
            final_equality: self.final_equality.clone(),
            pre_computation: self.pre_computation.clone_boxed(),
            target_trajectories: self.target_trajectories.clone(),
        }
    }
}

impl std::fmt::Debug for OptimalControlProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimalControlProblem")
            .field("cost", &self.cost)
            .field("equality", &self.equality)
            .field("inequality", &self.inequality)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::QuadraticStateInputCost;
    use crate::dynamics::LinearSystemDynamics;
    use crate::types::Matrix;

    fn example_problem() -> OptimalControlProblem {
        let mut problem = OptimalControlProblem::new(Box::new(LinearSystemDynamics::new(
            Matrix::identity(2, 2),
            Matrix::identity(2, 2),
        )));
        problem
            .cost
            .add(
                "tracking",
                Box::new(QuadraticStateInputCost::new(
                    Matrix::identity(2, 2),
                    Matrix::identity(2, 2),
                )),
            )
            .unwrap();
        problem
    }

    #[test]
    fn test_clone_is_independent() {
        let problem = example_problem();
        let clone = problem.clone();
        assert_eq!(clone.cost.len(), 1);
        assert!(!clone.has_state_input_equality_constraints());
    }

    #[test]
    fn test_duplicate_cost_name() {
        let mut problem = example_problem();
        let err = problem.cost.add(
            "tracking",
            Box::new(QuadraticStateInputCost::new(
                Matrix::identity(2, 2),
                Matrix::identity(2, 2),
            )),
        );
        assert!(err.is_err());
    }
}
