//! Hessian correction
//!
//! The Gauss-Newton Hamiltonian Hessian `Q_uu` can lose positive
//! definiteness away from the solution. Three repair policies are offered;
//! the line-search strategy additionally applies the chosen policy to the
//! event and terminal cost Hessians.

use nalgebra::SymmetricEigen;
use serde::{Deserialize, Serialize};

use horizon_core::types::{Matrix, Scalar};

/// Positive-definiteness repair policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HessianCorrectionStrategy {
    /// Add `multiple · I` unconditionally.
    DiagonalShift,
    /// Add increasing diagonal shifts until a Cholesky factorization
    /// succeeds.
    CholeskyModification,
    /// Clamp eigenvalues from below at `multiple`.
    EigenvalueModification,
}

impl Default for HessianCorrectionStrategy {
    fn default() -> Self {
        HessianCorrectionStrategy::CholeskyModification
    }
}

/// Applies the repair policy to a symmetric matrix in place.
pub fn shift_hessian(strategy: HessianCorrectionStrategy, matrix: &mut Matrix, multiple: Scalar) {
    match strategy {
        HessianCorrectionStrategy::DiagonalShift => {
            for i in 0..matrix.nrows() {
                matrix[(i, i)] += multiple;
            }
        }
        HessianCorrectionStrategy::CholeskyModification => {
            if matrix.nrows() == 0 {
                return;
            }
            let mut shift = multiple.max(Scalar::EPSILON);
            while matrix.clone().cholesky().is_none() {
                for i in 0..matrix.nrows() {
                    matrix[(i, i)] += shift;
                }
                shift *= 10.0;
            }
        }
        HessianCorrectionStrategy::EigenvalueModification => {
            if matrix.nrows() == 0 {
                return;
            }
            let mut eigen = SymmetricEigen::new(matrix.clone());
            for v in eigen.eigenvalues.iter_mut() {
                if *v < multiple {
                    *v = multiple;
                }
            }
            *matrix = eigen.recompose();
        }
    }
}

/// Repairs `matrix` until it admits a Cholesky factorization, starting from
/// the given shift and growing it geometrically. Returns `None` when
/// `max_attempts` shifts were not enough.
pub fn repair_cholesky(
    matrix: &Matrix,
    initial_shift: Scalar,
    max_attempts: usize,
) -> Option<(nalgebra::Cholesky<Scalar, nalgebra::Dyn>, usize)> {
    if let Some(chol) = matrix.clone().cholesky() {
        return Some((chol, 0));
    }
    let mut shifted = matrix.clone();
    let mut shift = initial_shift.max(1e-10);
    for attempt in 1..=max_attempts {
        for i in 0..shifted.nrows() {
            shifted[(i, i)] += shift;
        }
        if let Some(chol) = shifted.clone().cholesky() {
            return Some((chol, attempt));
        }
        shift *= 10.0;
    }
    None
}
