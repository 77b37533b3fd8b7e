//! Constraint term interfaces
//!
//! Equality constraints are driven to zero; inequality constraints use the
//! convention `h(t, x, u) ≥ 0` and are folded into the cost through a soft
//! penalty. Terms stack in insertion order when a collection is evaluated.

use crate::collection::Collection;
use crate::precomputation::PreComputation;
use crate::types::{
    Matrix, Scalar, Vector, VectorLinearApproximation, VectorQuadraticApproximation,
};

/// State-input constraint term `g(t, x, u)`.
pub trait StateInputConstraint: Send + Sync {
    /// Number of active constraint rows at `t`.
    fn num_constraints(&self, t: Scalar) -> usize;

    fn value(&self, t: Scalar, x: &Vector, u: &Vector, pre: &dyn PreComputation) -> Vector;

    fn linear_approximation(
        &self,
        t: Scalar,
        x: &Vector,
        u: &Vector,
        pre: &dyn PreComputation,
    ) -> VectorLinearApproximation;

    /// Second-order model; defaults to the linear model with zero Hessian
    /// blocks. Terms with significant curvature (used through the soft
    /// penalty) should override this.
    fn quadratic_approximation(
        &self,
        t: Scalar,
        x: &Vector,
        u: &Vector,
        pre: &dyn PreComputation,
    ) -> VectorQuadraticApproximation {
        let lin = self.linear_approximation(t, x, u, pre);
        let nv = lin.f.len();
        VectorQuadraticApproximation {
            dfdxx: vec![Matrix::zeros(x.len(), x.len()); nv],
            dfdux: vec![Matrix::zeros(u.len(), x.len()); nv],
            dfduu: vec![Matrix::zeros(u.len(), u.len()); nv],
            dfdx: lin.dfdx,
            dfdu: lin.dfdu,
            f: lin.f,
        }
    }

    fn clone_boxed(&self) -> Box<dyn StateInputConstraint>;
}

/// State-only constraint term `h(t, x)`.
pub trait StateConstraint: Send + Sync {
    fn num_constraints(&self, t: Scalar) -> usize;

    fn value(&self, t: Scalar, x: &Vector, pre: &dyn PreComputation) -> Vector;

    fn linear_approximation(
        &self,
        t: Scalar,
        x: &Vector,
        pre: &dyn PreComputation,
    ) -> VectorLinearApproximation;

    fn clone_boxed(&self) -> Box<dyn StateConstraint>;
}

/// Affine state-input constraint `g = C x + D u + e`.
#[derive(Debug, Clone)]
pub struct LinearStateInputConstraint {
    pub c: Matrix,
    pub d: Matrix,
    pub e: Vector,
}

impl LinearStateInputConstraint {
    pub fn new(c: Matrix, d: Matrix, e: Vector) -> Self {
        assert_eq!(c.nrows(), d.nrows());
        assert_eq!(c.nrows(), e.len());
        Self { c, d, e }
    }
}

impl StateInputConstraint for LinearStateInputConstraint {
    fn num_constraints(&self, _t: Scalar) -> usize {
        self.e.len()
    }

    fn value(&self, _t: Scalar, x: &Vector, u: &Vector, _pre: &dyn PreComputation) -> Vector {
        &self.c * x + &self.d * u + &self.e
    }

    fn linear_approximation(
        &self,
        t: Scalar,
        x: &Vector,
        u: &Vector,
        pre: &dyn PreComputation,
    ) -> VectorLinearApproximation {
        VectorLinearApproximation {
            dfdx: self.c.clone(),
            dfdu: self.d.clone(),
            f: self.value(t, x, u, pre),
        }
    }

    fn clone_boxed(&self) -> Box<dyn StateInputConstraint> {
        Box::new(self.clone())
    }
}

/// Stacks the values of every term of a state-input constraint collection.
pub fn stack_state_input_values(
    collection: &Collection<dyn StateInputConstraint>,
    t: Scalar,
    x: &Vector,
    u: &Vector,
    pre: &dyn PreComputation,
) -> Vector {
    let total: usize = collection.iter().map(|c| c.num_constraints(t)).sum();
    let mut stacked = Vector::zeros(total);
    let mut row = 0;
    for term in collection.iter() {
        let v = term.value(t, x, u, pre);
        stacked.rows_mut(row, v.len()).copy_from(&v);
        row += v.len();
    }
    stacked
}

/// Stacks the linear models of every term of a state-input constraint
/// collection.
pub fn stack_state_input_linearizations(
    collection: &Collection<dyn StateInputConstraint>,
    t: Scalar,
    x: &Vector,
    u: &Vector,
    pre: &dyn PreComputation,
) -> VectorLinearApproximation {
    let total: usize = collection.iter().map(|c| c.num_constraints(t)).sum();
    let mut stacked = VectorLinearApproximation::zero(total, x.len(), u.len());
    let mut row = 0;
    for term in collection.iter() {
        let lin = term.linear_approximation(t, x, u, pre);
        let n = lin.f.len();
        stacked.f.rows_mut(row, n).copy_from(&lin.f);
        stacked.dfdx.rows_mut(row, n).copy_from(&lin.dfdx);
        stacked.dfdu.rows_mut(row, n).copy_from(&lin.dfdu);
        row += n;
    }
    stacked
}

/// Stacks the quadratic models of every term of a state-input constraint
/// collection.
pub fn stack_state_input_quadratics(
    collection: &Collection<dyn StateInputConstraint>,
    t: Scalar,
    x: &Vector,
    u: &Vector,
    pre: &dyn PreComputation,
) -> VectorQuadraticApproximation {
    let total: usize = collection.iter().map(|c| c.num_constraints(t)).sum();
    let mut stacked = VectorQuadraticApproximation::zero(total, x.len(), u.len());
    let mut row = 0;
    for term in collection.iter() {
        let quad = term.quadratic_approximation(t, x, u, pre);
        let n = quad.f.len();
        stacked.f.rows_mut(row, n).copy_from(&quad.f);
        stacked.dfdx.rows_mut(row, n).copy_from(&quad.dfdx);
        stacked.dfdu.rows_mut(row, n).copy_from(&quad.dfdu);
        for k in 0..n {
            stacked.dfdxx[row + k] = quad.dfdxx[k].clone();
            stacked.dfdux[row + k] = quad.dfdux[k].clone();
            stacked.dfduu[row + k] = quad.dfduu[k].clone();
        }
        row += n;
    }
    stacked
}

/// Stacks the values of every term of a state-only constraint collection.
pub fn stack_state_values(
    collection: &Collection<dyn StateConstraint>,
    t: Scalar,
    x: &Vector,
    pre: &dyn PreComputation,
) -> Vector {
    let total: usize = collection.iter().map(|c| c.num_constraints(t)).sum();
    let mut stacked = Vector::zeros(total);
    let mut row = 0;
    for term in collection.iter() {
        let v = term.value(t, x, pre);
        stacked.rows_mut(row, v.len()).copy_from(&v);
        row += v.len();
    }
    stacked
}

/// Stacks the linear models of every term of a state-only constraint
/// collection.
pub fn stack_state_linearizations(
    collection: &Collection<dyn StateConstraint>,
    t: Scalar,
    x: &Vector,
    pre: &dyn PreComputation,
) -> VectorLinearApproximation {
    let total: usize = collection.iter().map(|c| c.num_constraints(t)).sum();
    let mut stacked = VectorLinearApproximation::zero(total, x.len(), 0);
    let mut row = 0;
    for term in collection.iter() {
        let lin = term.linear_approximation(t, x, pre);
        let n = lin.f.len();
        stacked.f.rows_mut(row, n).copy_from(&lin.f);
        stacked.dfdx.rows_mut(row, n).copy_from(&lin.dfdx);
        row += n;
    }
    stacked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::precomputation::NoOpPreComputation;
    use approx::assert_relative_eq;

    #[test]
    fn test_linear_constraint_value() {
        let g = LinearStateInputConstraint::new(
            Matrix::from_row_slice(1, 2, &[1.0, 0.0]),
            Matrix::from_row_slice(1, 1, &[2.0]),
            Vector::from_vec(vec![-1.0]),
        );
        let v = g.value(
            0.0,
            &Vector::from_vec(vec![3.0, 7.0]),
            &Vector::from_vec(vec![0.5]),
            &NoOpPreComputation,
        );
        assert_relative_eq!(v[0], 3.0 + 1.0 - 1.0);
    }

    #[test]
    fn test_stacking_preserves_order() {
        let mut collection: Collection<dyn StateInputConstraint> =
            Collection::new(|c| c.clone_boxed());
        collection
            .add(
                "first",
                Box::new(LinearStateInputConstraint::new(
                    Matrix::zeros(1, 1),
                    Matrix::zeros(1, 1),
                    Vector::from_vec(vec![1.0]),
                )),
            )
            .unwrap();
        collection
            .add(
                "second",
                Box::new(LinearStateInputConstraint::new(
                    Matrix::zeros(2, 1),
                    Matrix::zeros(2, 1),
                    Vector::from_vec(vec![2.0, 3.0]),
                )),
            )
            .unwrap();

        let stacked = stack_state_input_values(
            &collection,
            0.0,
            &Vector::zeros(1),
            &Vector::zeros(1),
            &NoOpPreComputation,
        );
        assert_eq!(stacked.len(), 3);
        assert_relative_eq!(stacked[0], 1.0);
        assert_relative_eq!(stacked[2], 3.0);
    }
}
