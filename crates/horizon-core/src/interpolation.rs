//! Piecewise-linear interpolation over time-stamped trajectories

use crate::types::{Matrix, Scalar, Vector};

/// Index of the interval containing `t` plus the interpolation weight of its
/// right endpoint. Times outside the stamp range clamp to the boundary
/// samples.
pub fn time_segment(t: Scalar, times: &[Scalar]) -> (usize, Scalar) {
    if times.len() < 2 {
        return (0, 0.0);
    }
    if t <= times[0] {
        return (0, 0.0);
    }
    if t >= *times.last().unwrap() {
        return (times.len() - 2, 1.0);
    }
    // first index with times[i] > t
    let upper = times.partition_point(|&ti| ti <= t);
    let i = upper - 1;
    let dt = times[i + 1] - times[i];
    let alpha = if dt > 0.0 { (t - times[i]) / dt } else { 0.0 };
    (i, alpha)
}

/// Linear interpolation of a vector trajectory at `t`.
pub fn interpolate_vector(t: Scalar, times: &[Scalar], values: &[Vector]) -> Vector {
    debug_assert_eq!(times.len(), values.len());
    if values.len() == 1 {
        return values[0].clone();
    }
    let (i, alpha) = time_segment(t, times);
    &values[i] * (1.0 - alpha) + &values[i + 1] * alpha
}

/// Linear interpolation of a matrix trajectory at `t`.
pub fn interpolate_matrix(t: Scalar, times: &[Scalar], values: &[Matrix]) -> Matrix {
    debug_assert_eq!(times.len(), values.len());
    if values.len() == 1 {
        return values[0].clone();
    }
    let (i, alpha) = time_segment(t, times);
    &values[i] * (1.0 - alpha) + &values[i + 1] * alpha
}
