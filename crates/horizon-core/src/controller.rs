//! Control policies
//!
//! The two concrete policy shapes the solvers emit: a feed-forward input
//! sequence interpolated piecewise-linearly, and an affine feedback law
//! `u(t) = u_ff(t) + K(t)·x` with piecewise-constant gains between stamps.

use crate::interpolation::{interpolate_vector, time_segment};
use crate::types::{Matrix, Scalar, Vector};

/// Feed-forward input sequence `(t_i, u_i)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedforwardController {
    pub times: Vec<Scalar>,
    pub inputs: Vec<Vector>,
}

impl FeedforwardController {
    pub fn new(times: Vec<Scalar>, inputs: Vec<Vector>) -> Self {
        debug_assert_eq!(times.len(), inputs.len());
        Self { times, inputs }
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn compute_input(&self, t: Scalar, _x: &Vector) -> Vector {
        interpolate_vector(t, &self.times, &self.inputs)
    }
}

/// Affine feedback law `u(t) = bias(t) + K(t)·x`.
///
/// Biases interpolate linearly; gains are held constant over each stamp
/// interval. `delta_bias` stores the feed-forward increment of the most
/// recent backward pass, applied by the search strategies as
/// `bias += α·delta_bias`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearController {
    pub times: Vec<Scalar>,
    pub gains: Vec<Matrix>,
    pub biases: Vec<Vector>,
    pub delta_biases: Vec<Vector>,
}

impl LinearController {
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn clear(&mut self) {
        self.times.clear();
        self.gains.clear();
        self.biases.clear();
        self.delta_biases.clear();
    }

    pub fn compute_input(&self, t: Scalar, x: &Vector) -> Vector {
        let bias = interpolate_vector(t, &self.times, &self.biases);
        let (i, _) = time_segment(t, &self.times);
        bias + &self.gains[i] * x
    }

    /// Shifts every bias by `alpha` times its feed-forward increment.
    pub fn apply_increment(&mut self, alpha: Scalar) {
        for (bias, delta) in self.biases.iter_mut().zip(&self.delta_biases) {
            *bias += delta * alpha;
        }
    }

    /// Drops the feed-forward increments after a step has been accepted.
    pub fn clear_increments(&mut self) {
        for delta in &mut self.delta_biases {
            delta.fill(0.0);
        }
    }

    /// Squared-integral of the feed-forward increments over the stamp grid
    /// (trapezoidal), the update measure the line search's Armijo condition
    /// is built on.
    pub fn increment_squared_integral(&self) -> Scalar {
        let mut total = 0.0;
        for k in 0..self.times.len().saturating_sub(1) {
            let dt = self.times[k + 1] - self.times[k];
            let a = self.delta_biases[k].norm_squared();
            let b = self.delta_biases[k + 1].norm_squared();
            total += 0.5 * dt * (a + b);
        }
        total
    }

    /// Largest feed-forward increment norm over all stamps.
    pub fn max_increment_norm(&self) -> Scalar {
        self.delta_biases
            .iter()
            .map(|d| d.norm())
            .fold(0.0, Scalar::max)
    }
}

/// Tagged policy handed out through the primal solution.
#[derive(Debug, Clone, PartialEq)]
pub enum Controller {
    Feedforward(FeedforwardController),
    Linear(LinearController),
}

impl Controller {
    pub fn compute_input(&self, t: Scalar, x: &Vector) -> Vector {
        match self {
            Controller::Feedforward(c) => c.compute_input(t, x),
            Controller::Linear(c) => c.compute_input(t, x),
        }
    }

    /// Final stamp of the policy.
    pub fn final_time(&self) -> Option<Scalar> {
        match self {
            Controller::Feedforward(c) => c.times.last().copied(),
            Controller::Linear(c) => c.times.last().copied(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_feedforward_interpolates() {
        let c = FeedforwardController::new(
            vec![0.0, 1.0],
            vec![Vector::from_vec(vec![0.0]), Vector::from_vec(vec![2.0])],
        );
        let u = c.compute_input(0.25, &Vector::zeros(1));
        assert_relative_eq!(u[0], 0.5);
    }

    #[test]
    fn test_linear_feedback() {
        let c = LinearController {
            times: vec![0.0, 1.0],
            gains: vec![
                Matrix::from_row_slice(1, 1, &[-2.0]),
                Matrix::from_row_slice(1, 1, &[-2.0]),
            ],
            biases: vec![Vector::from_vec(vec![1.0]), Vector::from_vec(vec![1.0])],
            delta_biases: vec![Vector::zeros(1), Vector::zeros(1)],
        };
        let u = c.compute_input(0.5, &Vector::from_vec(vec![3.0]));
        assert_relative_eq!(u[0], 1.0 - 6.0);
    }

    #[test]
    fn test_apply_increment() {
        let mut c = LinearController {
            times: vec![0.0, 1.0],
            gains: vec![Matrix::zeros(1, 1), Matrix::zeros(1, 1)],
            biases: vec![Vector::zeros(1), Vector::zeros(1)],
            delta_biases: vec![Vector::from_vec(vec![2.0]), Vector::from_vec(vec![2.0])],
        };
        c.apply_increment(0.5);
        assert_relative_eq!(c.biases[0][0], 1.0);
        assert_relative_eq!(c.increment_squared_integral(), 4.0);
    }
}
