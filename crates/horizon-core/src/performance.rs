//! Per-iteration performance metrics
//!
//! A [`PerformanceIndex`] summarizes one candidate trajectory: the integrated
//! cost, the merit used for step acceptance, and the integral-squared-error
//! measures of each constraint class. Workers accumulate node contributions
//! into thread-local values which are reduced at the pool join.

use crate::types::Scalar;

/// Cost and constraint-violation summary of a rollout or transcription.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PerformanceIndex {
    /// Integrated intermediate cost plus event and terminal costs.
    pub total_cost: Scalar,
    /// Merit value used by the search strategies; derived from the cost and
    /// the penalized violations, never accumulated directly.
    pub merit: Scalar,
    /// ISE of state-only equality constraints (and dynamics defects in the
    /// multiple-shooting transcription).
    pub state_eq_ise: Scalar,
    /// Squared violation of the final-state equality constraint.
    pub state_eq_final_sse: Scalar,
    /// ISE of state-input equality constraints.
    pub state_input_eq_ise: Scalar,
    /// ISE of violated inequality constraints.
    pub inequality_ise: Scalar,
    /// Accumulated soft-penalty value of the inequality constraints.
    pub inequality_penalty: Scalar,
}

impl PerformanceIndex {
    /// Total constraint violation measure `θ = sqrt(Σ ISE)` used by the
    /// filter line search.
    pub fn constraint_violation(&self) -> Scalar {
        (self.state_eq_ise + self.state_input_eq_ise + self.inequality_ise).sqrt()
    }

    /// True when every entry is finite.
    pub fn is_finite(&self) -> bool {
        self.total_cost.is_finite()
            && self.merit.is_finite()
            && self.state_eq_ise.is_finite()
            && self.state_eq_final_sse.is_finite()
            && self.state_input_eq_ise.is_finite()
            && self.inequality_ise.is_finite()
            && self.inequality_penalty.is_finite()
    }
}

impl std::ops::AddAssign for PerformanceIndex {
    fn add_assign(&mut self, rhs: Self) {
        self.total_cost += rhs.total_cost;
        self.state_eq_ise += rhs.state_eq_ise;
        self.state_eq_final_sse += rhs.state_eq_final_sse;
        self.state_input_eq_ise += rhs.state_input_eq_ise;
        self.inequality_ise += rhs.inequality_ise;
        self.inequality_penalty += rhs.inequality_penalty;
        // merit is recomputed by the owner after accumulation
    }
}

impl std::fmt::Display for PerformanceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cost: {:.6e}  merit: {:.6e}  stateEqISE: {:.3e}  stateInputEqISE: {:.3e}  ineqISE: {:.3e}  penalty: {:.3e}",
            self.total_cost,
            self.merit,
            self.state_eq_ise,
            self.state_input_eq_ise,
            self.inequality_ise,
            self.inequality_penalty
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_accumulation() {
        let mut total = PerformanceIndex::default();
        let a = PerformanceIndex {
            total_cost: 1.0,
            state_eq_ise: 0.25,
            ..Default::default()
        };
        let b = PerformanceIndex {
            total_cost: 2.0,
            state_input_eq_ise: 0.75,
            ..Default::default()
        };
        total += a;
        total += b;
        assert_relative_eq!(total.total_cost, 3.0);
        assert_relative_eq!(total.constraint_violation(), 1.0);
    }
}
