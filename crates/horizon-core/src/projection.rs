//! State-input equality-constraint projection
//!
//! For a full-row-rank constraint `g ≈ C dx + D du + e = 0` the input is
//! substituted as `du = p0 + Px dx + Pu dũ` where `Pu` spans the null space
//! of `D`. Enforcing the constraint then disappears from the subproblem and
//! the remaining input coordinate `dũ` is unconstrained.

use crate::types::{Matrix, Scalar, ScalarQuadraticApproximation, Vector, VectorLinearApproximation};

/// Change-of-variables data of one node:
/// `du = f + dfdx·dx + dfdu·dũ`.
pub type ConstraintProjection = VectorLinearApproximation;

/// Builds the projection from the constraint linearization.
///
/// Returns `None` when the constraint is empty or `D` is rank deficient
/// (detected through the pivot magnitude of the normal equations).
pub fn compute_projection(constraint: &VectorLinearApproximation) -> Option<ConstraintProjection> {
    let nc = constraint.f.len();
    let nu = constraint.dfdu.ncols();
    if nc == 0 || nc > nu {
        return None;
    }

    let d = &constraint.dfdu;

    // right pseudo-inverse through the (small, nc x nc) normal equations
    let ddt = d * d.transpose();
    let chol = ddt.clone().cholesky()?;
    let d_pinv = d.transpose() * chol.inverse();

    // orthonormal null-space basis of D by Gram-Schmidt: orthonormalize the
    // rows of D, then complete with coordinate directions
    let mut basis: Vec<Vector> = Vec::with_capacity(nu);
    for i in 0..nc {
        let mut v = d.row(i).transpose();
        for b in &basis {
            let proj = b.dot(&v);
            v -= b * proj;
        }
        let norm = v.norm();
        if norm < 1e-9 {
            return None; // rank deficient
        }
        basis.push(v / norm);
    }
    let mut null_basis: Vec<Vector> = Vec::with_capacity(nu - nc);
    for j in 0..nu {
        if basis.len() == nu {
            break;
        }
        let mut v = Vector::zeros(nu);
        v[j] = 1.0;
        for b in &basis {
            let proj = b.dot(&v);
            v -= b * proj;
        }
        let norm = v.norm();
        if norm > 1e-9 {
            let v = v / norm;
            null_basis.push(v.clone());
            basis.push(v);
        }
    }

    let mut pu = Matrix::zeros(nu, nu - nc);
    for (j, v) in null_basis.iter().enumerate() {
        pu.column_mut(j).copy_from(v);
    }

    Some(ConstraintProjection {
        dfdu: pu,
        dfdx: -&d_pinv * &constraint.dfdx,
        f: -&d_pinv * &constraint.f,
    })
}

/// Rewrites a linear dynamics model under the input substitution
/// `du = p0 + Px dx + Pu dũ`.
pub fn project_dynamics(
    dynamics: &VectorLinearApproximation,
    projection: &ConstraintProjection,
) -> VectorLinearApproximation {
    VectorLinearApproximation {
        dfdx: &dynamics.dfdx + &dynamics.dfdu * &projection.dfdx,
        dfdu: &dynamics.dfdu * &projection.dfdu,
        f: &dynamics.f + &dynamics.dfdu * &projection.f,
    }
}

/// Rewrites a quadratic cost model under the input substitution
/// `du = p0 + Px dx + Pu dũ`.
pub fn project_cost(
    cost: &ScalarQuadraticApproximation,
    projection: &ConstraintProjection,
) -> ScalarQuadraticApproximation {
    let pu = &projection.dfdu;
    let px = &projection.dfdx;
    let p0 = &projection.f;

    let fuu_p0 = &cost.fuu * p0;
    let fu_plus = &cost.fu + &fuu_p0;

    let f = cost.f + cost.fu.dot(p0) + 0.5 * p0.dot(&fuu_p0);
    let fx = &cost.fx
        + px.transpose() * &cost.fu
        + cost.fux.transpose() * p0
        + px.transpose() * &fuu_p0;
    let fxx = &cost.fxx
        + px.transpose() * &cost.fux
        + cost.fux.transpose() * px
        + px.transpose() * &cost.fuu * px;
    let fu = pu.transpose() * &fu_plus;
    let fux = pu.transpose() * (&cost.fux + &cost.fuu * px);
    let fuu = pu.transpose() * &cost.fuu * pu;

    ScalarQuadraticApproximation {
        fxx,
        fux,
        fuu,
        fx,
        fu,
        f,
    }
}

/// Expands a gain computed in projected coordinates back to the original
/// input space: `K = Px + Pu·K̃`.
pub fn expand_gain(projection: &ConstraintProjection, projected_gain: &Matrix) -> Matrix {
    &projection.dfdx + &projection.dfdu * projected_gain
}

/// Expands an input increment: `du = p0 + Pu·dũ (+ Px·dx)`.
pub fn expand_input(
    projection: &ConstraintProjection,
    projected_input: &Vector,
    dx: &Vector,
) -> Vector {
    &projection.f + &projection.dfdu * projected_input + &projection.dfdx * dx
}

/// Residual norms used to validate a projection:
/// (`‖D·Pu‖`, `‖D·p0 + e‖`).
pub fn projection_residuals(
    constraint: &VectorLinearApproximation,
    projection: &ConstraintProjection,
) -> (Scalar, Scalar) {
    let d = &constraint.dfdu;
    let null_residual = (d * &projection.dfdu).norm();
    let offset_residual = (d * &projection.f + &constraint.f).norm();
    (null_residual, offset_residual)
}
