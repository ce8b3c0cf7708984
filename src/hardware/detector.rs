//! Photon-counting detector with pinhole, binomial thinning and optional
//! noise sources.
//!
//! Detection is a two-stage process: emitted photons are thinned by a
//! binomial draw whose success probability is the product of the collection
//! and detection efficiency factors, scaled by the dwell time; the result is
//! then optionally re-sampled through a Poisson distribution and topped up
//! with Poisson background and dark counts.

use ndarray::{Array2, Zip};
use rand::Rng;
use rand_distr::{Binomial, Distribution, Normal, Poisson};
use serde::{Deserialize, Serialize};

use crate::image_proc::{convolve2d, pinhole, ConvolveOptions};

/// Largest trial count handed to the exact binomial sampler. Above this the
/// normal approximation is both faster and numerically safe.
const EXACT_BINOMIAL_LIMIT: u64 = 1 << 31;

/// Photon detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detector {
    /// Number of airy disks for the pinhole radius `r = n_airy * 0.61 * lambda / NA`.
    pub n_airy: f64,
    /// Whether to re-sample the detected signal through Poisson noise.
    pub noise: bool,
    /// Background photon counts per second.
    pub background: f64,
    /// Dark counts per second.
    pub darkcount: f64,
    /// Photon collection efficiency factor, in [0, 1].
    pub pcef: f64,
    /// Photon detection efficiency factor, in [0, 1].
    pub pdef: f64,
}

impl Default for Detector {
    fn default() -> Self {
        Self {
            n_airy: 0.7,
            noise: false,
            background: 0.0,
            darkcount: 0.0,
            pcef: 0.1,
            pdef: 0.5,
        }
    }
}

impl Detector {
    /// Compute the detection PSF: the fluorescence PSF convolved with the
    /// circular pinhole mask, peak-normalized and scaled by the objective
    /// transmission.
    pub fn detection_psf(
        &self,
        wavelength: f64,
        psf: &Array2<f64>,
        na: f64,
        transmission: f64,
        pixelsize: f64,
    ) -> Array2<f64> {
        let radius = self.n_airy * 0.61 * wavelength / na;
        let mask = pinhole(radius, pixelsize, Some(psf.nrows()));
        let mut detection = convolve2d(psf, &mask, ConvolveOptions::default());
        let peak = detection.iter().fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        detection.mapv_inplace(|v| v / peak * transmission);
        detection
    }

    /// Detect an emitted-photon image with a uniform dwell time.
    pub fn detect<R: Rng>(&self, photons: &Array2<f64>, dwell: f64, rng: &mut R) -> Array2<f64> {
        let mut signal = Array2::zeros(photons.dim());
        Zip::from(&mut signal).and(photons).for_each(|out, &emitted| {
            *out = self.detect_one(emitted, dwell, rng);
        });
        signal
    }

    /// Detect an emitted-photon image with a per-pixel dwell time grid of
    /// the same shape.
    pub fn detect_with_dwell_map<R: Rng>(
        &self,
        photons: &Array2<f64>,
        dwell: &Array2<f64>,
        rng: &mut R,
    ) -> Array2<f64> {
        let mut signal = Array2::zeros(photons.dim());
        Zip::from(&mut signal)
            .and(photons)
            .and(dwell)
            .for_each(|out, &emitted, &dwell| {
                *out = self.detect_one(emitted, dwell, rng);
            });
        signal
    }

    /// Detect a single emitted-photon count.
    pub fn detect_one<R: Rng>(&self, photons: f64, dwell: f64, rng: &mut R) -> f64 {
        let trials = photons.max(0.0).floor() as u64;
        let efficiency = self.pcef * self.pdef;
        let mut signal = sample_binomial(rng, trials, efficiency) as f64 * dwell;

        if self.noise && signal > 0.0 {
            let resampled = Poisson::new(signal)
                .expect("Poisson parameter must be valid (signal > 0)")
                .sample(rng);
            signal = resampled;
        }
        if self.background > 0.0 {
            let counts = Poisson::new(self.background)
                .expect("Poisson parameter must be valid (background > 0)")
                .sample(rng);
            signal += (counts * dwell).floor();
        }
        if self.darkcount > 0.0 {
            let counts = Poisson::new(self.darkcount)
                .expect("Poisson parameter must be valid (darkcount > 0)")
                .sample(rng);
            signal += (counts * dwell).floor();
        }
        signal
    }
}

/// Draw from a binomial distribution, switching to the normal approximation
/// above the exact-sampling limit.
pub(crate) fn sample_binomial<R: Rng>(rng: &mut R, n: u64, p: f64) -> u64 {
    if n == 0 || p <= 0.0 {
        return 0;
    }
    if p >= 1.0 {
        return n;
    }
    if n > EXACT_BINOMIAL_LIMIT {
        return approx_binomial(rng, n, p);
    }
    Binomial::new(n, p)
        .expect("binomial probability must be in [0, 1]")
        .sample(rng)
}

/// Sample a binomial distribution through its normal approximation.
///
/// Uses a Gaussian with the binomial mean and variance, clamped to zero,
/// with a continuity correction so each integer bin is sampled at its
/// midpoint.
pub fn approx_binomial<R: Rng>(rng: &mut R, n: u64, p: f64) -> u64 {
    let mean = n as f64 * p;
    let std_dev = (n as f64 * p * (1.0 - p)).sqrt();
    let sample = Normal::new(mean, std_dev)
        .expect("normal parameters must be valid (std_dev >= 0)")
        .sample(rng)
        .max(0.0);
    (sample + 0.5) as u64
}
