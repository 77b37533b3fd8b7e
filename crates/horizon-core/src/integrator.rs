//! Explicit Runge-Kutta integration
//!
//! All fixed-step schemes run through one tableau-driven stage loop, so a
//! scheme is a data item rather than a hand-written formula. The adaptive
//! path pairs the Dormand-Prince 5(4) embedded tableau with an error
//! controller that mixes the absolute and relative tolerances of the
//! rollout settings. Sensitivity discretization propagates the flow-map
//! Jacobians through the classic RK4 stages by the chain rule, yielding
//! the discrete `(A, B, c)` models the shooting transcription consumes.

use serde::{Deserialize, Serialize};

use crate::types::{Matrix, Scalar, Vector};

/// Selectable integration scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegratorType {
    /// Explicit Euler (order 1).
    Euler,
    /// Explicit midpoint (order 2).
    Rk2,
    /// Classic Runge-Kutta (order 4).
    Rk4,
    /// Adaptive Dormand-Prince 5(4).
    DormandPrince45,
}

impl Default for IntegratorType {
    fn default() -> Self {
        IntegratorType::Rk4
    }
}

/// Coefficients of an explicit Runge-Kutta scheme. `a` holds the strictly
/// lower-triangular stage rows, `b` the solution weights, `b_embedded` the
/// lower-order weights of an embedded pair when the scheme carries one.
pub struct ButcherTableau {
    pub order: u32,
    pub c: &'static [Scalar],
    pub a: &'static [&'static [Scalar]],
    pub b: &'static [Scalar],
    pub b_embedded: Option<&'static [Scalar]>,
}

pub const EULER: ButcherTableau = ButcherTableau {
    order: 1,
    c: &[0.0],
    a: &[&[]],
    b: &[1.0],
    b_embedded: None,
};

pub const MIDPOINT: ButcherTableau = ButcherTableau {
    order: 2,
    c: &[0.0, 0.5],
    a: &[&[], &[0.5]],
    b: &[0.0, 1.0],
    b_embedded: None,
};

pub const CLASSIC_RK4: ButcherTableau = ButcherTableau {
    order: 4,
    c: &[0.0, 0.5, 0.5, 1.0],
    a: &[&[], &[0.5], &[0.0, 0.5], &[0.0, 0.0, 1.0]],
    b: &[1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
    b_embedded: None,
};

/// Dormand-Prince 5(4): the fifth-order weights advance the state, the
/// embedded fourth-order weights estimate the local error.
pub const DORMAND_PRINCE_45: ButcherTableau = ButcherTableau {
    order: 5,
    c: &[0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0],
    a: &[
        &[],
        &[1.0 / 5.0],
        &[3.0 / 40.0, 9.0 / 40.0],
        &[44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0],
        &[
            19372.0 / 6561.0,
            -25360.0 / 2187.0,
            64448.0 / 6561.0,
            -212.0 / 729.0,
        ],
        &[
            9017.0 / 3168.0,
            -355.0 / 33.0,
            46732.0 / 5247.0,
            49.0 / 176.0,
            -5103.0 / 18656.0,
        ],
        &[
            35.0 / 384.0,
            0.0,
            500.0 / 1113.0,
            125.0 / 192.0,
            -2187.0 / 6784.0,
            11.0 / 84.0,
        ],
    ],
    b: &[
        35.0 / 384.0,
        0.0,
        500.0 / 1113.0,
        125.0 / 192.0,
        -2187.0 / 6784.0,
        11.0 / 84.0,
        0.0,
    ],
    b_embedded: Some(&[
        5179.0 / 57600.0,
        0.0,
        7571.0 / 16695.0,
        393.0 / 640.0,
        -92097.0 / 339200.0,
        187.0 / 2100.0,
        1.0 / 40.0,
    ]),
};

impl IntegratorType {
    /// Tableau backing this scheme in the fixed-step path.
    pub fn tableau(self) -> &'static ButcherTableau {
        match self {
            IntegratorType::Euler => &EULER,
            IntegratorType::Rk2 => &MIDPOINT,
            IntegratorType::Rk4 => &CLASSIC_RK4,
            IntegratorType::DormandPrince45 => &DORMAND_PRINCE_45,
        }
    }
}

/// Stage derivatives `k_i = f(t + c_i dt, x + dt Σ_j a_ij k_j)`.
fn stage_derivatives<F>(
    tableau: &ButcherTableau,
    x: &Vector,
    t: Scalar,
    dt: Scalar,
    f: &F,
) -> Vec<Vector>
where
    F: Fn(Scalar, &Vector) -> Vector,
{
    let mut stages: Vec<Vector> = Vec::with_capacity(tableau.b.len());
    for (i, row) in tableau.a.iter().enumerate() {
        let mut xi = x.clone();
        for (j, &a_ij) in row.iter().enumerate() {
            if a_ij != 0.0 {
                xi += &stages[j] * (a_ij * dt);
            }
        }
        stages.push(f(t + tableau.c[i] * dt, &xi));
    }
    stages
}

/// Single step of the scheme described by `tableau`.
pub fn explicit_step<F>(
    tableau: &ButcherTableau,
    x: &Vector,
    t: Scalar,
    dt: Scalar,
    f: &F,
) -> Vector
where
    F: Fn(Scalar, &Vector) -> Vector,
{
    let stages = stage_derivatives(tableau, x, t, dt, f);
    let mut x_next = x.clone();
    for (stage, &weight) in stages.iter().zip(tableau.b) {
        if weight != 0.0 {
            x_next += stage * (weight * dt);
        }
    }
    x_next
}

/// Single step plus the embedded-pair error estimate
/// `‖dt Σ_i (b_i − b̂_i) k_i‖`.
fn embedded_step<F>(
    tableau: &ButcherTableau,
    x: &Vector,
    t: Scalar,
    dt: Scalar,
    f: &F,
) -> (Vector, Scalar)
where
    F: Fn(Scalar, &Vector) -> Vector,
{
    let b_embedded = tableau
        .b_embedded
        .expect("error estimation needs an embedded pair");
    let stages = stage_derivatives(tableau, x, t, dt, f);

    let mut x_next = x.clone();
    let mut error = Vector::zeros(x.len());
    for (i, stage) in stages.iter().enumerate() {
        if tableau.b[i] != 0.0 {
            x_next += stage * (tableau.b[i] * dt);
        }
        let weight_gap = tableau.b[i] - b_embedded[i];
        if weight_gap != 0.0 {
            error += stage * (weight_gap * dt);
        }
    }
    (x_next, error.norm())
}

/// Step-size controller constants: safety factor and bounded per-step
/// rescaling.
const STEP_SAFETY: Scalar = 0.9;
const STEP_SHRINK_LIMIT: Scalar = 0.2;
const STEP_GROWTH_LIMIT: Scalar = 5.0;
const MAX_STEP_ATTEMPTS: usize = 12;

/// One accepted Dormand-Prince step, shrinking `dt` until the local error
/// passes `abs_tol + rel_tol·‖x‖`.
///
/// Returns `(new_state, dt_used, suggested_next_dt)`. When the attempt
/// budget runs out the last (smallest-step) result is returned; the caller
/// detects persistent trouble through its own step budget and finiteness
/// checks.
pub fn adaptive_step<F>(
    x: &Vector,
    t: Scalar,
    dt_init: Scalar,
    abs_tol: Scalar,
    rel_tol: Scalar,
    f: &F,
) -> (Vector, Scalar, Scalar)
where
    F: Fn(Scalar, &Vector) -> Vector,
{
    let inv_order = 1.0 / DORMAND_PRINCE_45.order as Scalar;
    let mut dt = dt_init;
    let mut fallback = None;

    for _ in 0..MAX_STEP_ATTEMPTS {
        let (x_next, error) = embedded_step(&DORMAND_PRINCE_45, x, t, dt, f);
        if !error.is_finite() {
            dt *= STEP_SHRINK_LIMIT;
            continue;
        }
        let tolerance = abs_tol + rel_tol * x.norm().max(x_next.norm());
        let ratio = error / tolerance;

        let scale = if ratio > 0.0 {
            (STEP_SAFETY * ratio.powf(-inv_order)).clamp(STEP_SHRINK_LIMIT, STEP_GROWTH_LIMIT)
        } else {
            STEP_GROWTH_LIMIT
        };

        if ratio <= 1.0 {
            return (x_next, dt, dt * scale);
        }
        fallback = Some((x_next, dt));
        dt *= scale;
    }

    match fallback {
        Some((x_next, dt_used)) => (x_next, dt_used, dt),
        None => {
            let (x_next, _) = embedded_step(&DORMAND_PRINCE_45, x, t, dt, f);
            (x_next, dt, dt)
        }
    }
}

/// Single fixed step of the selected scheme (`DormandPrince45` advances
/// with its fifth-order weights; the error estimate is unused here).
pub fn fixed_step<F>(scheme: IntegratorType, x: &Vector, t: Scalar, dt: Scalar, f: &F) -> Vector
where
    F: Fn(Scalar, &Vector) -> Vector,
{
    explicit_step(scheme.tableau(), x, t, dt, f)
}

/// Discretizes the flow linearization over one interval of length `dt`,
/// returning `(A_d, B_d, c_d)` such that
/// `x_{k+1} ≈ A_d dx_k + B_d du_k + c_d` with `c_d` the propagated state.
///
/// The scheme order matches the requested integrator; the adaptive variant
/// shares the RK4 sensitivity propagation.
pub fn sensitivity_discretize<F, G>(
    scheme: IntegratorType,
    t: Scalar,
    x: &Vector,
    u: &Vector,
    dt: Scalar,
    flow: &F,
    linearize: &G,
) -> (Matrix, Matrix, Vector)
where
    F: Fn(Scalar, &Vector, &Vector) -> Vector,
    G: Fn(Scalar, &Vector, &Vector) -> (Matrix, Matrix),
{
    let nx = x.len();
    match scheme {
        IntegratorType::Euler => {
            let (a, b) = linearize(t, x, u);
            let k1 = flow(t, x, u);
            let ad = Matrix::identity(nx, nx) + &a * dt;
            let bd = b * dt;
            let cd = x + k1 * dt;
            (ad, bd, cd)
        }
        IntegratorType::Rk2 => {
            // midpoint: chain rule through the intermediate stage
            let k1 = flow(t, x, u);
            let (a1, b1) = linearize(t, x, u);
            let x_mid = x + &k1 * (dt / 2.0);
            let k2 = flow(t + dt / 2.0, &x_mid, u);
            let (a2, b2) = linearize(t + dt / 2.0, &x_mid, u);

            let da_mid = Matrix::identity(nx, nx) + &a1 * (dt / 2.0);
            let ad = Matrix::identity(nx, nx) + &a2 * dt * &da_mid;
            let bd = (&a2 * (dt / 2.0) * &b1 + &b2) * dt;
            let cd = x + k2 * dt;
            (ad, bd, cd)
        }
        IntegratorType::Rk4 | IntegratorType::DormandPrince45 => {
            let identity = Matrix::identity(nx, nx);

            let k1 = flow(t, x, u);
            let (a1, b1) = linearize(t, x, u);
            let dk1_dx = a1.clone();
            let dk1_du = b1;

            let x2 = x + &k1 * (dt / 2.0);
            let k2 = flow(t + dt / 2.0, &x2, u);
            let (a2, b2) = linearize(t + dt / 2.0, &x2, u);
            let dk2_dx = &a2 * (&identity + &dk1_dx * (dt / 2.0));
            let dk2_du = &a2 * (&dk1_du * (dt / 2.0)) + b2;

            let x3 = x + &k2 * (dt / 2.0);
            let k3 = flow(t + dt / 2.0, &x3, u);
            let (a3, b3) = linearize(t + dt / 2.0, &x3, u);
            let dk3_dx = &a3 * (&identity + &dk2_dx * (dt / 2.0));
            let dk3_du = &a3 * (&dk2_du * (dt / 2.0)) + b3;

            let x4 = x + &k3 * dt;
            let k4 = flow(t + dt, &x4, u);
            let (a4, b4) = linearize(t + dt, &x4, u);
            let dk4_dx = &a4 * (&identity + &dk3_dx * dt);
            let dk4_du = &a4 * (&dk3_du * dt) + b4;

            let ad = identity + (dk1_dx + &dk2_dx * 2.0 + &dk3_dx * 2.0 + dk4_dx) * (dt / 6.0);
            let bd = (dk1_du + &dk2_du * 2.0 + &dk3_du * 2.0 + dk4_du) * (dt / 6.0);
            let cd = x + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0);
            (ad, bd, cd)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_tableaus_are_consistent() {
        for tableau in [&EULER, &MIDPOINT, &CLASSIC_RK4, &DORMAND_PRINCE_45] {
            assert_relative_eq!(tableau.b.iter().sum::<Scalar>(), 1.0, epsilon = 1e-12);
            assert_eq!(tableau.a.len(), tableau.b.len());
            assert_eq!(tableau.c.len(), tableau.b.len());
            // each stage abscissa equals its row sum
            for (i, row) in tableau.a.iter().enumerate() {
                assert_relative_eq!(row.iter().sum::<Scalar>(), tableau.c[i], epsilon = 1e-12);
            }
            if let Some(b_embedded) = tableau.b_embedded {
                assert_relative_eq!(b_embedded.iter().sum::<Scalar>(), 1.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_single_stage_scheme_is_forward_euler() {
        // one stage, unit weight: the tableau machinery must reduce to
        // x + dt f(t, x) identically
        let x = Vector::from_vec(vec![0.4, -1.1]);
        let f = |t: Scalar, s: &Vector| s * 0.3 + Vector::from_vec(vec![t, 1.0]);
        let stepped = explicit_step(&EULER, &x, 2.0, 0.1, &f);
        let expected = &x + f(2.0, &x) * 0.1;
        assert_relative_eq!((stepped - expected).norm(), 0.0, epsilon = 1e-15);
    }

    #[test]
    fn test_convergence_orders() {
        // time-varying growth ẋ = t·x, x(0) = 1, x(1) = e^{1/2}; halving
        // the step must cut the error by roughly 2^order
        fn final_error(tableau: &ButcherTableau, steps: usize) -> Scalar {
            let dt = 1.0 / steps as Scalar;
            let mut x = Vector::from_vec(vec![1.0]);
            let mut t = 0.0;
            for _ in 0..steps {
                x = explicit_step(tableau, &x, t, dt, &|ti, s: &Vector| s * ti);
                t += dt;
            }
            (x[0] - (0.5 as Scalar).exp()).abs()
        }

        let ratio_midpoint = final_error(&MIDPOINT, 40) / final_error(&MIDPOINT, 80);
        assert!(
            ratio_midpoint > 3.0,
            "midpoint below second order: ratio {ratio_midpoint}"
        );
        let ratio_rk4 = final_error(&CLASSIC_RK4, 40) / final_error(&CLASSIC_RK4, 80);
        assert!(
            ratio_rk4 > 12.0,
            "classic RK4 below fourth order: ratio {ratio_rk4}"
        );
    }

    #[test]
    fn test_scalar_riccati_flow_reaches_equilibrium() {
        // value-function flow ṡ = q − s²/r with q = r = 1 has the closed
        // form s(t) = tanh(t) from s(0) = 0
        let mut s = Vector::from_vec(vec![0.0]);
        let mut t = 0.0;
        let dt = 0.01;
        for _ in 0..300 {
            s = explicit_step(&CLASSIC_RK4, &s, t, dt, &|_t, v: &Vector| {
                Vector::from_vec(vec![1.0 - v[0] * v[0]])
            });
            t += dt;
        }
        assert_relative_eq!(s[0], (3.0 as Scalar).tanh(), epsilon = 1e-8);
    }

    #[test]
    fn test_adaptive_step_tracks_damped_rotation() {
        // spiral with closed-form radius e^{-t/2}
        let field = |_t: Scalar, s: &Vector| {
            Vector::from_vec(vec![-0.5 * s[0] + 2.0 * s[1], -2.0 * s[0] - 0.5 * s[1]])
        };
        let mut x = Vector::from_vec(vec![1.0, 0.0]);
        let mut t = 0.0;
        let mut dt: Scalar = 0.2;
        while t < 2.0 - 1e-12 {
            let (x_new, dt_used, dt_next) =
                adaptive_step(&x, t, dt.min(2.0 - t), 1e-10, 1e-8, &field);
            x = x_new;
            t += dt_used;
            dt = dt_next;
        }
        assert_relative_eq!(x.norm(), (-1.0 as Scalar).exp(), epsilon = 1e-6);
    }

    #[test]
    fn test_adaptive_step_shrinks_under_tight_tolerance() {
        // a stiff growth direction with a far-too-large trial step must be
        // rejected and retried with a smaller one
        let field = |_t: Scalar, s: &Vector| s * 40.0;
        let x = Vector::from_vec(vec![1.0]);
        let (x_new, dt_used, _) = adaptive_step(&x, 0.0, 0.5, 1e-12, 1e-12, &field);
        assert!(dt_used < 0.5);
        assert!(x_new[0].is_finite());
    }

    #[test]
    fn test_adaptive_step_grows_on_smooth_field() {
        // nearly-constant derivative: the controller should suggest a
        // larger next step
        let field = |_t: Scalar, _s: &Vector| Vector::from_vec(vec![1e-3]);
        let x = Vector::from_vec(vec![0.0]);
        let (_, dt_used, dt_next) = adaptive_step(&x, 0.0, 0.01, 1e-8, 1e-6, &field);
        assert_relative_eq!(dt_used, 0.01);
        assert!(dt_next > dt_used);
    }

    #[test]
    fn test_sensitivity_matches_linear_system() {
        // linear system: the discretization must reproduce itself exactly
        // in the sense x_{k+1} = c_d when dx = du = 0, and the Jacobians
        // must match a finite-difference probe.
        let a = Matrix::from_row_slice(2, 2, &[0.0, 1.0, -1.0, 0.0]);
        let b = Matrix::from_row_slice(2, 1, &[0.0, 1.0]);
        let flow = |_t: Scalar, x: &Vector, u: &Vector| &a * x + &b * u;
        let linearize = |_t: Scalar, _x: &Vector, _u: &Vector| (a.clone(), b.clone());

        let x = Vector::from_vec(vec![0.3, -0.2]);
        let u = Vector::from_vec(vec![0.7]);
        let dt = 0.05;
        let (ad, bd, cd) = sensitivity_discretize(IntegratorType::Rk4, 0.0, &x, &u, dt, &flow, &linearize);

        // c_d equals the RK4 propagation of the nominal point
        let x_next = explicit_step(&CLASSIC_RK4, &x, 0.0, dt, &|t, s: &Vector| flow(t, s, &u));
        assert_relative_eq!((&cd - &x_next).norm(), 0.0, epsilon = 1e-12);

        // finite difference in x
        let eps = 1e-6;
        for j in 0..2 {
            let mut xp = x.clone();
            xp[j] += eps;
            let (_, _, cp) = sensitivity_discretize(IntegratorType::Rk4, 0.0, &xp, &u, dt, &flow, &linearize);
            let fd = (&cp - &cd) / eps;
            for i in 0..2 {
                assert_relative_eq!(ad[(i, j)], fd[i], epsilon = 1e-5);
            }
        }

        // finite difference in u
        let mut up = u.clone();
        up[0] += eps;
        let (_, _, cp) = sensitivity_discretize(IntegratorType::Rk4, 0.0, &x, &up, dt, &flow, &linearize);
        let fd = (&cp - &cd) / eps;
        for i in 0..2 {
            assert_relative_eq!(bd[(i, 0)], fd[i], epsilon = 1e-5);
        }
    }
}
