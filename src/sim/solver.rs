//! Polynomial root finding for collision timing
//!
//! Collision times reduce to the earliest positive real root of a quadratic
//! (ship against a wall face) or a quartic (ship against a ship or a wall
//! corner under constant acceleration). Missing or complex roots are reported
//! as NaN so candidates can be reduced with [`positive_minimum`].

use std::ops::{Add, Div, Mul, Sub};

use thiserror::Error;

/// Iteration cap for the simultaneous and safeguarded solvers
pub const MAX_ITERATIONS: usize = 1000;

const CONVERGENCE_EPS_REL: f64 = 1e-12;
const CONVERGENCE_EPS_ABS: f64 = 1e-12;
const REAL_EPS_REL: f64 = 1e-9;
const REAL_EPS_ABS: f64 = 1e-9;

/// The cubic or quartic iteration did not settle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SolveError {
    #[error("root iteration did not converge in {MAX_ITERATIONS} iterations")]
    NotConverged,
}

/// Failure signals from [`newton_bisect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RootError {
    #[error("function has the same sign at both ends of the bracket")]
    NoSignChange,
    #[error("safeguarded Newton iteration did not converge")]
    NotConverged,
}

/// Minimal complex arithmetic for the simultaneous iteration
#[derive(Debug, Clone, Copy, PartialEq)]
struct Complex {
    re: f64,
    im: f64,
}

impl Complex {
    const fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    fn real(re: f64) -> Self {
        Self { re, im: 0.0 }
    }

    fn norm(self) -> f64 {
        self.re.hypot(self.im)
    }
}

impl Add for Complex {
    type Output = Self;
    fn add(self, o: Self) -> Self {
        Self::new(self.re + o.re, self.im + o.im)
    }
}

impl Sub for Complex {
    type Output = Self;
    fn sub(self, o: Self) -> Self {
        Self::new(self.re - o.re, self.im - o.im)
    }
}

impl Mul for Complex {
    type Output = Self;
    fn mul(self, o: Self) -> Self {
        Self::new(
            self.re * o.re - self.im * o.im,
            self.re * o.im + self.im * o.re,
        )
    }
}

impl Div for Complex {
    type Output = Self;
    fn div(self, o: Self) -> Self {
        let d = o.re * o.re + o.im * o.im;
        Self::new(
            (self.re * o.re + self.im * o.im) / d,
            (self.im * o.re - self.re * o.im) / d,
        )
    }
}

/// Real roots of `a·t² + b·t + c`, NaN where a root does not exist
///
/// Uses the cancellation-free form `q = -½(b + sgn(b)·√disc)`, giving roots
/// `q/a` and `c/q`. A double root is returned once; `a == 0` degrades to the
/// linear case.
pub fn solve_quadratic(a: f64, b: f64, c: f64) -> [f64; 2] {
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        [f64::NAN; 2]
    } else if disc > 0.0 && a.abs() > 0.0 {
        let sign = if b >= 0.0 { 1.0 } else { -1.0 };
        let q = -0.5 * (b + sign * disc.sqrt());
        [q / a, c / q]
    } else if disc == 0.0 && a.abs() > 0.0 {
        [-0.5 * b / a, f64::NAN]
    } else if a == 0.0 && b.abs() > 0.0 {
        [-c / b, f64::NAN]
    } else {
        [f64::NAN; 2]
    }
}

/// Real roots of `a·t³ + b·t² + c·t + d`
///
/// Falls back to [`solve_quadratic`] when `a == 0`.
pub fn solve_cubic(a: f64, b: f64, c: f64, d: f64) -> Result<[f64; 3], SolveError> {
    if a == 0.0 {
        let [t1, t2] = solve_quadratic(b, c, d);
        return Ok([t1, t2, f64::NAN]);
    }
    let monic = [b / a, c / a, d / a];
    let roots = simultaneous_roots::<3>(&monic)?;
    Ok(roots.map(approx_real))
}

/// Real roots of `a·t⁴ + b·t³ + c·t² + d·t + e`
///
/// Falls back to [`solve_cubic`] when `a == 0`.
pub fn solve_quartic(a: f64, b: f64, c: f64, d: f64, e: f64) -> Result<[f64; 4], SolveError> {
    if a == 0.0 {
        let [t1, t2, t3] = solve_cubic(b, c, d, e)?;
        return Ok([t1, t2, t3, f64::NAN]);
    }
    let monic = [b / a, c / a, d / a, e / a];
    let roots = simultaneous_roots::<4>(&monic)?;
    Ok(roots.map(approx_real))
}

/// Simultaneous (Durand-Kerner) iteration on a monic polynomial of degree N
///
/// `coeffs` holds the non-leading coefficients from highest to lowest degree.
fn simultaneous_roots<const N: usize>(coeffs: &[f64; N]) -> Result<[Complex; N], SolveError> {
    let seed = Complex::new(0.5, 0.1);
    let mut z = [Complex::real(1.0); N];
    let mut power = Complex::real(1.0);
    for root in z.iter_mut().skip(1) {
        power = power * seed;
        *root = power;
    }

    let eval = |x: Complex| {
        coeffs
            .iter()
            .fold(Complex::real(1.0), |acc, &k| acc * x + Complex::real(k))
    };

    for _ in 0..=MAX_ITERATIONS {
        let mut converged = true;
        for i in 0..N {
            let old = z[i];
            let mut denom = Complex::real(1.0);
            for (j, other) in z.iter().enumerate() {
                if j != i {
                    denom = denom * (old - *other);
                }
            }
            let next = old - eval(old) / denom;
            if !next.re.is_finite() || !next.im.is_finite() {
                return Err(SolveError::NotConverged);
            }
            if (next - old).norm() >= CONVERGENCE_EPS_REL * next.norm() + CONVERGENCE_EPS_ABS {
                converged = false;
            }
            z[i] = next;
        }
        if converged {
            return Ok(z);
        }
    }
    Err(SolveError::NotConverged)
}

/// Real part of `z` if its imaginary part is negligible, else NaN
fn approx_real(z: Complex) -> f64 {
    if z.im.abs() < REAL_EPS_REL * z.norm() + REAL_EPS_ABS {
        z.re
    } else {
        f64::NAN
    }
}

/// Smallest strictly positive candidate, NaN if there is none
pub fn positive_minimum(candidates: &[f64]) -> f64 {
    candidates
        .iter()
        .copied()
        .filter(|t| *t > 0.0)
        .fold(f64::NAN, f64::min)
}

/// Safeguarded Newton-Raphson with bisection fallback
///
/// `f` returns the function value and its derivative. The bracket must
/// straddle a sign change; the Newton step is replaced by bisection whenever
/// it would leave the bracket or fails to halve the previous step.
pub fn newton_bisect<F>(
    mut f: F,
    bracket: (f64, f64),
    eps_rel: f64,
    eps_abs: f64,
) -> Result<f64, RootError>
where
    F: FnMut(f64) -> (f64, f64),
{
    let (x1, x2) = bracket;
    let (fl, _) = f(x1);
    let (fh, _) = f(x2);
    if fl * fh > 0.0 || fl.is_nan() || fh.is_nan() {
        return Err(RootError::NoSignChange);
    }
    if fl == 0.0 {
        return Ok(x1);
    }
    if fh == 0.0 {
        return Ok(x2);
    }

    let (mut xl, mut xh) = if fl < 0.0 { (x1, x2) } else { (x2, x1) };
    let mut rts = 0.5 * (xl + xh);
    let mut dx_old = (xh - xl).abs();
    let mut dx = dx_old;
    let (mut fv, mut df) = f(rts);

    for _ in 0..=MAX_ITERATIONS {
        let leaves_bracket = ((rts - xh) * df - fv) * ((rts - xl) * df - fv) > 0.0;
        let too_slow = (2.0 * fv).abs() > (dx_old * df).abs();
        if leaves_bracket || too_slow {
            dx_old = dx;
            dx = 0.5 * (xh - xl);
            rts = xl + dx;
            if xl == rts {
                return Ok(rts);
            }
        } else {
            dx_old = dx;
            dx = fv / df;
            let prev = rts;
            rts -= dx;
            if prev == rts {
                return Ok(rts);
            }
        }
        if dx.abs() < eps_abs + eps_rel * rts.abs() {
            return Ok(rts);
        }
        (fv, df) = f(rts);
        if fv < 0.0 {
            xl = rts;
        } else {
            xh = rts;
        }
    }
    Err(RootError::NotConverged)
}
