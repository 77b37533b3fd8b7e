//! Core scalar, vector and approximation types
//!
//! All numerics run on 64-bit floats with dynamically sized, column-major
//! dense storage. Trajectories are plain `Vec`s of per-node values, strictly
//! aligned to the time grid.

use nalgebra::{DMatrix, DVector};

/// Scalar type used throughout the solvers.
pub type Scalar = f64;

/// Dynamically sized column vector.
pub type Vector = DVector<Scalar>;

/// Dynamically sized dense matrix (column-major).
pub type Matrix = DMatrix<Scalar>;

/// Quadratic model of a scalar function of state and input:
///
/// ```text
/// f(dx, du) ≈ 1/2 dx' fxx dx + du' fux dx + 1/2 du' fuu du + fx' dx + fu' du + f
/// ```
///
/// `fxx` (nx×nx) and `fuu` (nu×nu) are kept symmetric; `fux` is nu×nx.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarQuadraticApproximation {
    /// Second derivative w.r.t. state.
    pub fxx: Matrix,
    /// Mixed second derivative, input (rows) by state (columns).
    pub fux: Matrix,
    /// Second derivative w.r.t. input.
    pub fuu: Matrix,
    /// Gradient w.r.t. state.
    pub fx: Vector,
    /// Gradient w.r.t. input.
    pub fu: Vector,
    /// Constant term.
    pub f: Scalar,
}

impl ScalarQuadraticApproximation {
    /// Zero-initialized approximation of the given dimensions.
    pub fn zero(nx: usize, nu: usize) -> Self {
        Self {
            fxx: Matrix::zeros(nx, nx),
            fux: Matrix::zeros(nu, nx),
            fuu: Matrix::zeros(nu, nu),
            fx: Vector::zeros(nx),
            fu: Vector::zeros(nu),
            f: 0.0,
        }
    }

    /// Resize all members, keeping existing coefficients where they fit.
    pub fn resize(&mut self, nx: usize, nu: usize) {
        self.fxx.resize_mut(nx, nx, 0.0);
        self.fux.resize_mut(nu, nx, 0.0);
        self.fuu.resize_mut(nu, nu, 0.0);
        self.fx.resize_vertically_mut(nx, 0.0);
        self.fu.resize_vertically_mut(nu, 0.0);
    }

    /// State dimension of the model.
    pub fn state_dim(&self) -> usize {
        self.fx.len()
    }

    /// Input dimension of the model.
    pub fn input_dim(&self) -> usize {
        self.fu.len()
    }

    /// Accumulates the state-only part of `rhs` (used when summing
    /// state-only cost terms into a state-input model).
    pub fn add_state_only(&mut self, rhs: &ScalarQuadraticApproximation) {
        self.f += rhs.f;
        self.fx += &rhs.fx;
        self.fxx += &rhs.fxx;
    }

    /// True when every coefficient is finite.
    pub fn is_finite(&self) -> bool {
        self.f.is_finite()
            && self.fx.iter().all(|v| v.is_finite())
            && self.fu.iter().all(|v| v.is_finite())
            && self.fxx.iter().all(|v| v.is_finite())
            && self.fux.iter().all(|v| v.is_finite())
            && self.fuu.iter().all(|v| v.is_finite())
    }
}

impl std::ops::AddAssign<&ScalarQuadraticApproximation> for ScalarQuadraticApproximation {
    fn add_assign(&mut self, rhs: &ScalarQuadraticApproximation) {
        self.fxx += &rhs.fxx;
        self.fux += &rhs.fux;
        self.fuu += &rhs.fuu;
        self.fx += &rhs.fx;
        self.fu += &rhs.fu;
        self.f += rhs.f;
    }
}

/// Linear model of a vector-valued function:
///
/// ```text
/// f(dx, du) ≈ dfdx dx + dfdu du + f
/// ```
///
/// Dimension contract: `dfdx` is nv×nx, `dfdu` is nv×nu, `f` is nv.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorLinearApproximation {
    /// Derivative w.r.t. state.
    pub dfdx: Matrix,
    /// Derivative w.r.t. input.
    pub dfdu: Matrix,
    /// Constant term.
    pub f: Vector,
}

impl VectorLinearApproximation {
    /// Zero-initialized approximation of the given dimensions.
    pub fn zero(nv: usize, nx: usize, nu: usize) -> Self {
        Self {
            dfdx: Matrix::zeros(nv, nx),
            dfdu: Matrix::zeros(nv, nu),
            f: Vector::zeros(nv),
        }
    }

    /// Resize all members, zero-filling new entries.
    pub fn resize(&mut self, nv: usize, nx: usize, nu: usize) {
        self.dfdx.resize_mut(nv, nx, 0.0);
        self.dfdu.resize_mut(nv, nu, 0.0);
        self.f.resize_vertically_mut(nv, 0.0);
    }

    /// Number of outputs of the modeled function.
    pub fn num_outputs(&self) -> usize {
        self.f.len()
    }

    /// True when every coefficient is finite.
    pub fn is_finite(&self) -> bool {
        self.f.iter().all(|v| v.is_finite())
            && self.dfdx.iter().all(|v| v.is_finite())
            && self.dfdu.iter().all(|v| v.is_finite())
    }
}

/// Quadratic model of a vector-valued function: the linear part plus one
/// symmetric second-order block per output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorQuadraticApproximation {
    /// Per-output second derivative w.r.t. state.
    pub dfdxx: Vec<Matrix>,
    /// Per-output mixed second derivative.
    pub dfdux: Vec<Matrix>,
    /// Per-output second derivative w.r.t. input.
    pub dfduu: Vec<Matrix>,
    /// Derivative w.r.t. state.
    pub dfdx: Matrix,
    /// Derivative w.r.t. input.
    pub dfdu: Matrix,
    /// Constant term.
    pub f: Vector,
}

impl VectorQuadraticApproximation {
    /// Zero-initialized approximation of the given dimensions.
    pub fn zero(nv: usize, nx: usize, nu: usize) -> Self {
        Self {
            dfdxx: vec![Matrix::zeros(nx, nx); nv],
            dfdux: vec![Matrix::zeros(nu, nx); nv],
            dfduu: vec![Matrix::zeros(nu, nu); nv],
            dfdx: Matrix::zeros(nv, nx),
            dfdu: Matrix::zeros(nv, nu),
            f: Vector::zeros(nv),
        }
    }

    /// Number of outputs of the modeled function.
    pub fn num_outputs(&self) -> usize {
        self.f.len()
    }

    /// True when every coefficient is finite.
    pub fn is_finite(&self) -> bool {
        self.f.iter().all(|v| v.is_finite())
            && self.dfdx.iter().all(|v| v.is_finite())
            && self.dfdu.iter().all(|v| v.is_finite())
            && self.dfdxx.iter().flat_map(|m| m.iter()).all(|v| v.is_finite())
            && self.dfdux.iter().flat_map(|m| m.iter()).all(|v| v.is_finite())
            && self.dfduu.iter().flat_map(|m| m.iter()).all(|v| v.is_finite())
    }

    /// The linear part of the model.
    pub fn linear_part(&self) -> VectorLinearApproximation {
        VectorLinearApproximation {
            dfdx: self.dfdx.clone(),
            dfdu: self.dfdu.clone(),
            f: self.f.clone(),
        }
    }
}
