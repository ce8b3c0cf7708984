//! Adaptive Simpson quadrature for the angular diffraction integrals.
//!
//! The vectorial field calculators integrate Bessel-weighted angular
//! functions over the aperture half-angle for every output pixel. The
//! integrands are smooth, so recursive Simpson subdivision with a
//! per-interval error estimate converges quickly.

/// Default relative tolerance used by the beam field calculators.
pub const DEFAULT_TOLERANCE: f64 = 1e-10;

/// Maximum recursion depth before an interval is accepted as-is.
const MAX_DEPTH: u32 = 20;

/// Integrate `f` over `[a, b]` with adaptive Simpson subdivision.
///
/// The error estimate follows the classic Richardson comparison between one
/// Simpson step over the interval and the sum of two half-interval steps.
pub fn adaptive_simpson<F>(f: &F, a: f64, b: f64, tolerance: f64) -> f64
where
    F: Fn(f64) -> f64,
{
    let fa = f(a);
    let fb = f(b);
    let m = 0.5 * (a + b);
    let fm = f(m);
    let whole = simpson(a, b, fa, fm, fb);
    subdivide(f, a, b, fa, fm, fb, whole, tolerance, MAX_DEPTH)
}

fn simpson(a: f64, b: f64, fa: f64, fm: f64, fb: f64) -> f64 {
    (b - a) / 6.0 * (fa + 4.0 * fm + fb)
}

#[allow(clippy::too_many_arguments)]
fn subdivide<F>(
    f: &F,
    a: f64,
    b: f64,
    fa: f64,
    fm: f64,
    fb: f64,
    whole: f64,
    tolerance: f64,
    depth: u32,
) -> f64
where
    F: Fn(f64) -> f64,
{
    let m = 0.5 * (a + b);
    let lm = 0.5 * (a + m);
    let rm = 0.5 * (m + b);
    let flm = f(lm);
    let frm = f(rm);
    let left = simpson(a, m, fa, flm, fm);
    let right = simpson(m, b, fm, frm, fb);
    let delta = left + right - whole;

    // 15 is the Richardson factor for Simpson's rule.
    if depth == 0 || delta.abs() <= 15.0 * tolerance {
        return left + right + delta / 15.0;
    }
    subdivide(f, a, m, fa, flm, fm, left, tolerance / 2.0, depth - 1)
        + subdivide(f, m, b, fm, frm, fb, right, tolerance / 2.0, depth - 1)
}
