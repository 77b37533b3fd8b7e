//! Structured QP interface
//!
//! The SQP driver hands the horizon-structured QP to an external solver
//! through [`StructuredQpSolver`]. One reference backend ships with the
//! crate: a Riccati sweep that solves the equality-constrained LQ problem
//! exactly, eliminating stage constraints internally when they are present.

use horizon_core::error::{QpStatus, SolverError};
use horizon_core::projection::{compute_projection, expand_gain, expand_input};
use horizon_core::types::{Matrix, ScalarQuadraticApproximation, Vector, VectorLinearApproximation};

/// Solution of the structured QP in delta coordinates.
#[derive(Debug, Clone, Default)]
pub struct QpSolution {
    pub delta_x: Vec<Vector>,
    pub delta_u: Vec<Vector>,
}

/// Horizon-structured QP backend.
///
/// The problem has variables `δx_0..N`, `δu_0..N-1`, dynamics equalities
/// `δx_{i+1} = A_i δx_i + B_i δu_i + c_i`, the pinned head `δx_0 = dx0`,
/// optional stage equality constraints `C δx + D δu + e = 0`, quadratic
/// stage costs, and a terminal quadratic cost at index `N`.
pub trait StructuredQpSolver: Send {
    /// Solves the QP. `dynamics.len() == N`, `cost.len() == N + 1`;
    /// `constraints`, when given, has `N` entries (possibly with zero
    /// rows). The workspace is resized from the node dimensions on every
    /// call.
    fn solve(
        &mut self,
        dx0: &Vector,
        dynamics: &[VectorLinearApproximation],
        cost: &[ScalarQuadraticApproximation],
        constraints: Option<&[VectorLinearApproximation]>,
    ) -> Result<QpSolution, SolverError>;

    /// Feedback gains of the last solve, one per stage, in the input
    /// coordinates the QP was fed.
    fn riccati_feedback(&self) -> &[Matrix];
}

/// Exact Riccati-sweep backend for the equality-constrained LQ problem.
#[derive(Debug, Default)]
pub struct RiccatiQpSolver {
    gains: Vec<Matrix>,
    feedforward: Vec<Vector>,
}

impl RiccatiQpSolver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StructuredQpSolver for RiccatiQpSolver {
    fn solve(
        &mut self,
        dx0: &Vector,
        dynamics: &[VectorLinearApproximation],
        cost: &[ScalarQuadraticApproximation],
        constraints: Option<&[VectorLinearApproximation]>,
    ) -> Result<QpSolution, SolverError> {
        let n = dynamics.len();
        assert_eq!(cost.len(), n + 1);
        if let Some(c) = constraints {
            assert_eq!(c.len(), n);
        }

        // Stage-wise elimination of equality constraints: substitute
        // δu = p0 + Px δx + Pu δũ and solve the unconstrained problem in δũ.
        let mut stage_cost: Vec<ScalarQuadraticApproximation> = Vec::with_capacity(n);
        let mut stage_dynamics: Vec<VectorLinearApproximation> = Vec::with_capacity(n);
        let mut eliminations: Vec<Option<horizon_core::projection::ConstraintProjection>> =
            Vec::with_capacity(n);
        for i in 0..n {
            let constraint = constraints.and_then(|c| {
                if c[i].num_outputs() > 0 {
                    Some(&c[i])
                } else {
                    None
                }
            });
            match constraint {
                Some(g) => {
                    let projection = compute_projection(g)
                        .ok_or(SolverError::QpFailed(QpStatus::NumericalFailure))?;
                    stage_dynamics.push(horizon_core::projection::project_dynamics(
                        &dynamics[i],
                        &projection,
                    ));
                    stage_cost.push(horizon_core::projection::project_cost(
                        &cost[i],
                        &projection,
                    ));
                    eliminations.push(Some(projection));
                }
                None => {
                    stage_dynamics.push(dynamics[i].clone());
                    stage_cost.push(cost[i].clone());
                    eliminations.push(None);
                }
            }
        }

        // backward Riccati sweep with affine terms
        self.gains.clear();
        self.feedforward.clear();
        self.gains.resize(n, Matrix::zeros(0, 0));
        self.feedforward.resize(n, Vector::zeros(0));

        let mut s_mat = cost[n].fxx.clone();
        let mut s_vec = cost[n].fx.clone();

        for i in (0..n).rev() {
            let a = &stage_dynamics[i].dfdx;
            let b = &stage_dynamics[i].dfdu;
            let c = &stage_dynamics[i].f;
            let q = &stage_cost[i];
            let nu = b.ncols();

            let s_next_c = &s_mat * c + &s_vec;
            let q_x = &q.fx + a.transpose() * &s_next_c;
            let q_xx = &q.fxx + a.transpose() * &s_mat * a;

            if nu == 0 {
                // event stage: no input, pure propagation
                s_vec = q_x;
                s_mat = q_xx;
                continue;
            }

            let q_u = &q.fu + b.transpose() * &s_next_c;
            let q_uu = &q.fuu + b.transpose() * &s_mat * b;
            let q_ux = &q.fux + b.transpose() * &s_mat * a;

            let chol = q_uu
                .clone()
                .cholesky()
                .ok_or(SolverError::QpFailed(QpStatus::NumericalFailure))?;
            let mut gain = -&q_ux;
            chol.solve_mut(&mut gain);
            let mut ff = -&q_u;
            chol.solve_mut(&mut ff);

            s_vec = &q_x + q_ux.transpose() * &ff;
            s_mat = &q_xx + q_ux.transpose() * &gain;
            // symmetrize against drift
            s_mat = (&s_mat + s_mat.transpose()) * 0.5;

            self.gains[i] = gain;
            self.feedforward[i] = ff;
        }

        // forward sweep
        let mut solution = QpSolution {
            delta_x: Vec::with_capacity(n + 1),
            delta_u: Vec::with_capacity(n),
        };
        let mut dx = dx0.clone();
        for i in 0..n {
            let nu = stage_dynamics[i].dfdu.ncols();
            let du_tilde = if nu == 0 {
                Vector::zeros(0)
            } else {
                &self.feedforward[i] + &self.gains[i] * &dx
            };
            let dx_next =
                &stage_dynamics[i].dfdx * &dx + &stage_dynamics[i].dfdu * &du_tilde + &stage_dynamics[i].f;

            // expand eliminated inputs back to the original coordinates
            let du = match &eliminations[i] {
                Some(projection) => expand_input(projection, &du_tilde, &dx),
                None => du_tilde,
            };
            if let Some(projection) = &eliminations[i] {
                let expanded = expand_gain(projection, &self.gains[i]);
                self.gains[i] = expanded;
            }

            solution.delta_x.push(dx.clone());
            solution.delta_u.push(du);
            dx = dx_next;
        }
        solution.delta_x.push(dx);

        if solution
            .delta_x
            .iter()
            .chain(solution.delta_u.iter())
            .any(|v| !v.iter().all(|e| e.is_finite()))
        {
            return Err(SolverError::QpFailed(QpStatus::NumericalFailure));
        }

        Ok(solution)
    }

    fn riccati_feedback(&self) -> &[Matrix] {
        &self.gains
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// One-step LQ problem with an analytic solution:
    /// min ½δx₁² + ½δu² s.t. δx₁ = δx₀ + δu, δx₀ = 1
    /// → δu = −1/2.
    #[test]
    fn test_scalar_lq() {
        let dynamics = vec![VectorLinearApproximation {
            dfdx: Matrix::from_row_slice(1, 1, &[1.0]),
            dfdu: Matrix::from_row_slice(1, 1, &[1.0]),
            f: Vector::zeros(1),
        }];
        let mut stage = ScalarQuadraticApproximation::zero(1, 1);
        stage.fuu[(0, 0)] = 1.0;
        let mut terminal = ScalarQuadraticApproximation::zero(1, 0);
        terminal.fxx[(0, 0)] = 1.0;

        let mut qp = RiccatiQpSolver::new();
        let solution = qp
            .solve(
                &Vector::from_vec(vec![1.0]),
                &dynamics,
                &[stage, terminal],
                None,
            )
            .unwrap();
        assert_relative_eq!(solution.delta_u[0][0], -0.5, epsilon = 1e-12);
        assert_relative_eq!(solution.delta_x[1][0], 0.5, epsilon = 1e-12);
    }

    /// Dynamics equalities must hold exactly along the returned solution.
    #[test]
    fn test_dynamics_feasibility() {
        let dynamics: Vec<VectorLinearApproximation> = (0..5)
            .map(|i| VectorLinearApproximation {
                dfdx: Matrix::from_row_slice(2, 2, &[1.0, 0.1, 0.0, 1.0]),
                dfdu: Matrix::from_row_slice(2, 1, &[0.0, 0.1]),
                f: Vector::from_vec(vec![0.01 * i as f64, -0.02]),
            })
            .collect();
        let mut stage = ScalarQuadraticApproximation::zero(2, 1);
        stage.fxx = Matrix::identity(2, 2);
        stage.fuu = Matrix::identity(1, 1) * 0.1;
        let mut terminal = ScalarQuadraticApproximation::zero(2, 0);
        terminal.fxx = Matrix::identity(2, 2) * 10.0;

        let mut cost: Vec<ScalarQuadraticApproximation> = vec![stage; 5];
        cost.push(terminal);

        let mut qp = RiccatiQpSolver::new();
        let solution = qp
            .solve(&Vector::from_vec(vec![0.5, -0.5]), &dynamics, &cost, None)
            .unwrap();

        for i in 0..5 {
            let predicted = &dynamics[i].dfdx * &solution.delta_x[i]
                + &dynamics[i].dfdu * &solution.delta_u[i]
                + &dynamics[i].f;
            assert_relative_eq!((&predicted - &solution.delta_x[i + 1]).norm(), 0.0, epsilon = 1e-10);
        }
        assert_eq!(qp.riccati_feedback().len(), 5);
    }

    /// Stage equality constraints are satisfied exactly after internal
    /// elimination.
    #[test]
    fn test_stage_constraint_elimination() {
        let dynamics = vec![VectorLinearApproximation {
            dfdx: Matrix::identity(2, 2),
            dfdu: Matrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]),
            f: Vector::zeros(2),
        }];
        let mut stage = ScalarQuadraticApproximation::zero(2, 2);
        stage.fxx = Matrix::identity(2, 2);
        stage.fuu = Matrix::identity(2, 2);
        let mut terminal = ScalarQuadraticApproximation::zero(2, 0);
        terminal.fxx = Matrix::identity(2, 2);

        // constraint: δu_0 = 0.7
        let constraints = vec![VectorLinearApproximation {
            dfdx: Matrix::zeros(1, 2),
            dfdu: Matrix::from_row_slice(1, 2, &[1.0, 0.0]),
            f: Vector::from_vec(vec![-0.7]),
        }];

        let mut qp = RiccatiQpSolver::new();
        let solution = qp
            .solve(
                &Vector::from_vec(vec![0.0, 0.0]),
                &dynamics,
                &[stage, terminal],
                Some(&constraints),
            )
            .unwrap();
        assert_relative_eq!(solution.delta_u[0][0], 0.7, epsilon = 1e-12);
    }
}
