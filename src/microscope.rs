//! The assembled microscope: beams, objective, detector and fluorophore,
//! plus the per-pixel-size field cache and the effective-PSF composer.
//!
//! Field computation is expensive (one adaptive quadrature per pixel per
//! integral), so the unit-power excitation field, depletion field and
//! detection PSF are computed once per pixel size and memoized. The cache is
//! keyed by the pixel size rounded to integer nanometres and must be cleared
//! explicitly whenever any optical component changes; nothing tracks
//! component mutation automatically.

use std::collections::HashMap;

use ndarray::Array2;

use crate::error::MicroscopeError;
use crate::hardware::{Detector, DonutBeam, GaussianBeam, Objective};
use crate::image_proc::resize_to_largest;
use crate::photometry::{photon_energy, Fluorophore};

/// Unit-power fields cached for one pixel size.
///
/// All three arrays are square, odd-sided and zero-padded to the shape of
/// the largest, so they overlay pixel-for-pixel.
#[derive(Debug, Clone)]
pub struct CachedFields {
    /// Excitation intensity at 1 W (W/m²).
    pub excitation: Array2<f64>,
    /// Depletion intensity at 1 W (W/m²).
    pub depletion: Array2<f64>,
    /// Detection PSF, peak scaled to the objective transmission.
    pub detection_psf: Array2<f64>,
}

/// A microscopy setup: excitation beam, depletion beam, detector, objective
/// and fluorophore.
#[derive(Debug)]
pub struct Microscope {
    /// Excitation laser.
    pub excitation: GaussianBeam,
    /// Depletion (STED) laser.
    pub sted: DonutBeam,
    /// Photon-counting detector.
    pub detector: Detector,
    /// Objective lens.
    pub objective: Objective,
    /// Fluorescent molecule model.
    pub fluo: Fluorophore,
    cache: HashMap<u32, CachedFields>,
}

impl Microscope {
    /// Assemble a microscope from its components.
    pub fn new(
        excitation: GaussianBeam,
        sted: DonutBeam,
        detector: Detector,
        objective: Objective,
        fluo: Fluorophore,
    ) -> Self {
        Self {
            excitation,
            sted,
            detector,
            objective,
            fluo,
            cache: HashMap::new(),
        }
    }

    fn pixelsize_key(pixelsize: f64) -> u32 {
        (pixelsize * 1e9).round() as u32
    }

    /// Whether unit fields are already cached for the given pixel size.
    pub fn is_cached(&self, pixelsize: f64) -> bool {
        self.cache.contains_key(&Self::pixelsize_key(pixelsize))
    }

    /// Compute (or fetch) the unit-power fields for the given pixel size.
    ///
    /// The excitation and depletion fields are computed at 1 W so they can
    /// be rescaled to any power; the detection PSF is the fluorescence PSF
    /// convolved with the pinhole.
    pub fn cache(&mut self, pixelsize: f64) -> Result<&CachedFields, MicroscopeError> {
        let key = Self::pixelsize_key(pixelsize);
        if !self.cache.contains_key(&key) {
            let excitation = self
                .excitation
                .intensity_field(1.0, &self.objective, pixelsize)?;
            let depletion = self.sted.intensity_field(1.0, &self.objective, pixelsize)?;
            let psf = self.fluo.fluorescence_psf(self.objective.na, pixelsize);
            let transmission = self.objective.transmission_at(self.fluo.wavelength)?;
            let detection_psf = self.detector.detection_psf(
                self.fluo.wavelength,
                &psf,
                self.objective.na,
                transmission,
                pixelsize,
            );
            let (excitation, depletion, detection_psf) =
                resize_to_largest(excitation, depletion, detection_psf);
            self.cache.insert(
                key,
                CachedFields {
                    excitation,
                    depletion,
                    detection_psf,
                },
            );
        }
        Ok(&self.cache[&key])
    }

    /// Drop every cached field set.
    ///
    /// Required whenever the beams, detector, objective or fluorophore are
    /// modified or replaced; the cache does not observe such changes.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Effective detection intensity of a single molecule (W) for the given
    /// pixel size and beam powers.
    ///
    /// Combines the power-scaled cached fields with the depletion
    /// saturation model: the STED intensity relative to the saturation
    /// intensity sets the stimulated decay rate, and averaging the
    /// surviving fluorescence over one pulse period yields the depletion
    /// efficiency that multiplies the excitation probability and the
    /// detection PSF.
    pub fn effective_kernel(
        &mut self,
        pixelsize: f64,
        p_ex: f64,
        p_sted: f64,
    ) -> Result<Array2<f64>, MicroscopeError> {
        let sigma_ste = self.fluo.sigma_ste_at(self.sted.wavelength)?;
        let sigma_abs = self.fluo.sigma_abs_at(self.excitation.wavelength)?;
        let qy = self.fluo.qy;
        let k_vib = 1.0 / self.fluo.tau_vib;
        let k_s1 = 1.0 / self.fluo.tau;
        let tau_sted = self.sted.tau;
        let period = 1.0 / self.sted.rate;

        // Saturation intensity of the depletion transition (W/m²).
        let i_s = photon_energy(self.sted.wavelength) / (self.fluo.tau * sigma_ste);

        let fields = self.cache(pixelsize)?;
        let i_ex = &fields.excitation * p_ex;
        let i_sted = &fields.depletion * p_sted;

        // Time-averaged probability that a molecule still fluoresces under
        // the depletion beam.
        let eta = i_sted.mapv(|i| {
            let zeta = i / i_s;
            let gamma = (zeta * k_vib) / (zeta * k_s1 + k_vib);
            (((1.0 + gamma * (-k_s1 * tau_sted * (1.0 + gamma)).exp()) / (1.0 + gamma))
                - (-k_s1 * (gamma * tau_sted + period)).exp())
                / (1.0 - (-k_s1 * period).exp())
        });

        let excitation_probability = i_ex.mapv(|i| sigma_abs * i * qy);
        Ok(excitation_probability * eta * &fields.detection_psf)
    }
}
