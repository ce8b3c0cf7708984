//! Fluorescent molecule model.
//!
//! A fluorophore carries the photophysical parameters needed by the
//! acquisition loop: absorption and stimulated-emission cross sections per
//! wavelength, lifetimes of the excited, vibrational and triplet states,
//! quantum yield, and the intersystem-crossing parameters that drive
//! triplet-state photobleaching.
//!
//! Bleaching follows the steady-state triplet occupancy under constant
//! illumination: with absorption cross section σ and photon flux I,
//!
//! ```text
//! T1 = k_isc σ I / (σ I (1/τ_tri + k_isc) + τ_tri τ_fluo)
//! k  = T1 · I · σ_tri · p_react
//! ```
//!
//! yielding a first-order rate constant whose exponential decay over the
//! dwell time gives the per-molecule survival probability.

use std::collections::HashMap;

use ndarray::Array2;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::MicroscopeError;
use crate::hardware::wavelength_key;
use crate::photometry::photon_energy;

/// Field diameter factor shared with the beam calculators.
const DIAMETER_FACTOR: f64 = 2.233;

/// Simpson weights over a pixel edge, samples at the edges and the center.
const SIMPSON_WEIGHTS: [f64; 3] = [1.0 / 6.0, 4.0 / 6.0, 1.0 / 6.0];

/// Fluorescent molecule parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fluorophore {
    /// Emission wavelength (m).
    pub wavelength: f64,
    /// Stimulated-emission cross sections (m²) keyed by integer nm.
    pub sigma_ste: HashMap<u32, f64>,
    /// Absorption cross sections (m²) keyed by integer nm.
    pub sigma_abs: HashMap<u32, f64>,
    /// Triplet-triplet absorption cross section (m²).
    pub sigma_tri: f64,
    /// Fluorescence lifetime (s).
    pub tau: f64,
    /// Vibrational relaxation time (s).
    pub tau_vib: f64,
    /// Triplet state lifetime (s).
    pub tau_tri: f64,
    /// Quantum yield.
    pub qy: f64,
    /// Photoreaction probability from the triplet state, keyed by integer nm.
    pub phy_react: HashMap<u32, f64>,
    /// Intersystem crossing rate (s⁻¹).
    pub k_isc: f64,
}

impl Fluorophore {
    /// Stimulated-emission cross section for the given wavelength (m).
    pub fn sigma_ste_at(&self, wavelength: f64) -> Result<f64, MicroscopeError> {
        lookup(&self.sigma_ste, wavelength)
    }

    /// Absorption cross section for the given wavelength (m).
    pub fn sigma_abs_at(&self, wavelength: f64) -> Result<f64, MicroscopeError> {
        lookup(&self.sigma_abs, wavelength)
    }

    /// Photoreaction probability for the given wavelength (m).
    pub fn phy_react_at(&self, wavelength: f64) -> Result<f64, MicroscopeError> {
        lookup(&self.phy_react, wavelength)
    }

    /// Number of whole photons carried by the given intensity (W) at the
    /// emission wavelength.
    pub fn photon_count(&self, intensity: f64) -> f64 {
        (intensity / photon_energy(self.wavelength)).floor()
    }

    /// Elementwise [`photon_count`](Self::photon_count) over an intensity
    /// field.
    pub fn photon_counts(&self, intensity: &Array2<f64>) -> Array2<f64> {
        intensity.mapv(|v| self.photon_count(v))
    }

    /// First-order bleaching rate constant (s⁻¹) under the given photon
    /// flux at the given illumination wavelength.
    pub fn bleach_rate(&self, wavelength: f64, photon_flux: f64) -> Result<f64, MicroscopeError> {
        let sigma_abs = self.sigma_abs_at(wavelength)?;
        let phy_react = self.phy_react_at(wavelength)?;
        Ok(self.bleach_rate_inner(sigma_abs, phy_react, photon_flux))
    }

    /// Elementwise [`bleach_rate`](Self::bleach_rate) over a photon-flux
    /// field; the wavelength lookups are resolved once.
    pub fn bleach_rates(
        &self,
        wavelength: f64,
        photon_flux: &Array2<f64>,
    ) -> Result<Array2<f64>, MicroscopeError> {
        let sigma_abs = self.sigma_abs_at(wavelength)?;
        let phy_react = self.phy_react_at(wavelength)?;
        Ok(photon_flux.mapv(|flux| self.bleach_rate_inner(sigma_abs, phy_react, flux)))
    }

    fn bleach_rate_inner(&self, sigma_abs: f64, phy_react: f64, photon_flux: f64) -> f64 {
        let triplet = self.k_isc * sigma_abs * photon_flux
            / (sigma_abs * photon_flux * (1.0 / self.tau_tri + self.k_isc)
                + self.tau_tri * self.tau);
        triplet * photon_flux * self.sigma_tri * phy_react
    }

    /// Gaussian-shaped fluorescence PSF at the emission wavelength,
    /// peak-normalized.
    ///
    /// The FWHM is the diffraction limit `lambda / (2 NA)`; each pixel value
    /// integrates the Gaussian amplitude over the pixel area with a 3x3
    /// Simpson product rule.
    pub fn fluorescence_psf(&self, na: f64, pixelsize: f64) -> Array2<f64> {
        let diameter = DIAMETER_FACTOR * self.wavelength / (na * pixelsize);
        let n_pixels = (diameter / 2.0) as usize * 2 + 1;
        let center = (n_pixels / 2) as i64;

        let fwhm = self.wavelength / (2.0 * na);
        let width = 4.0 * 2.0_f64.ln() / (fwhm * fwhm);
        let half_pixel = pixelsize / 2.0;
        let offsets = [-half_pixel, 0.0, half_pixel];

        let mut psf = Array2::from_shape_fn((n_pixels, n_pixels), |(y, x)| {
            let h_rel = (center - y as i64) as f64 * pixelsize;
            let w_rel = (x as i64 - center) as f64 * pixelsize;
            let mut value = 0.0;
            for (wy, dy) in SIMPSON_WEIGHTS.iter().zip(offsets.iter()) {
                for (wx, dx) in SIMPSON_WEIGHTS.iter().zip(offsets.iter()) {
                    let r2 = (h_rel + dy).powi(2) + (w_rel + dx).powi(2);
                    value += wy * wx * (-width * r2).exp();
                }
            }
            value
        });
        let peak = psf.iter().fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        psf.mapv_inplace(|v| v / peak);
        psf
    }
}

impl Default for Fluorophore {
    fn default() -> Self {
        models::EGFP.clone()
    }
}

fn lookup(table: &HashMap<u32, f64>, wavelength: f64) -> Result<f64, MicroscopeError> {
    let key = wavelength_key(wavelength);
    table
        .get(&key)
        .copied()
        .ok_or(MicroscopeError::UnknownWavelength { wavelength_nm: key })
}

/// Standard fluorophore models.
pub mod models {
    use super::*;

    /// Enhanced green fluorescent protein, excited at 488 nm and depleted
    /// at 575 nm.
    pub static EGFP: Lazy<Fluorophore> = Lazy::new(|| Fluorophore {
        wavelength: 535e-9,
        sigma_ste: HashMap::from([(575, 1e-21)]),
        sigma_abs: HashMap::from([(488, 3e-20)]),
        sigma_tri: 1e-21,
        tau: 3e-9,
        tau_vib: 1e-12,
        tau_tri: 5e-6,
        qy: 0.6,
        phy_react: HashMap::from([(488, 1e-3), (575, 1e-5)]),
        k_isc: 0.26e6,
    });
}
