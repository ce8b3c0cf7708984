//! Small numeric helpers shared by the optical field calculators.

pub mod quadrature;

pub use quadrature::adaptive_simpson;

use crate::error::MicroscopeError;

/// Convert cartesian offsets to polar coordinates.
///
/// Returns `(theta, rho)` with `theta = atan2(y, x)`.
pub fn cart2pol(x: f64, y: f64) -> (f64, f64) {
    (y.atan2(x), (x * x + y * y).sqrt())
}

/// Full width at half maximum of a Gaussian-shaped profile, in samples.
///
/// Scans from the left edge for the first crossing of half the peak value
/// and doubles the distance from the crossing to the peak. Fails when the
/// profile never reaches half maximum, which indicates the field is not
/// bell-shaped.
pub fn fwhm(values: &[f64]) -> Result<f64, MicroscopeError> {
    let peak = values.iter().fold(f64::NEG_INFINITY, |m, &v| m.max(v));
    let half = peak / 2.0;
    let idx_max = argmax(values);
    for i in 0..values.len().saturating_sub(1) {
        if values[i + 1] >= half {
            return Ok((idx_max as i64 - i as i64) as f64 * 2.0);
        }
    }
    Err(MicroscopeError::FwhmUndefined)
}

/// Outer and inner half-maximum radii of a donut-shaped profile, in samples.
///
/// The profile is expected to peak on the ring and dip at the dark center.
/// Returns `(outer, inner)` distances measured from the central minimum.
pub fn fwhm_donut(values: &[f64]) -> Result<(f64, f64), MicroscopeError> {
    let peak = values.iter().fold(f64::NEG_INFINITY, |m, &v| m.max(v));
    let half = peak / 2.0;
    let idx_max = argmax(values) as i64;
    let idx_min = argmin(values) as i64;
    for i in 0..values.len().saturating_sub(1) {
        if values[i + 1] >= half {
            let i = i as i64;
            let outer = idx_min - i;
            let inner = idx_min - (2 * idx_max - i);
            return Ok((outer as f64, inner as f64));
        }
    }
    Err(MicroscopeError::FwhmUndefined)
}

fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

fn argmin(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v < values[best] {
            best = i;
        }
    }
    best
}
