//! Microscope objective configuration.
//!
//! The objective contributes three optical constants to the field
//! calculations (focal length, refractive index, numerical aperture) and a
//! wavelength-indexed transmission table. Transmission lookups are strict:
//! querying a wavelength without an entry is a configuration error, never a
//! silent default.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::MicroscopeError;
use crate::hardware::wavelength_key;

/// Objective lens parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Objective {
    /// Focal length (m).
    pub focal_length: f64,
    /// Refractive index of the immersion medium.
    pub refractive_index: f64,
    /// Numerical aperture.
    pub na: f64,
    /// Transmission factor per wavelength, keyed by integer nanometres.
    pub transmission: HashMap<u32, f64>,
}

impl Objective {
    /// Create an objective with the given optical constants and
    /// transmission table.
    pub fn new(
        focal_length: f64,
        refractive_index: f64,
        na: f64,
        transmission: HashMap<u32, f64>,
    ) -> Self {
        Self {
            focal_length,
            refractive_index,
            na,
            transmission,
        }
    }

    /// Transmission factor for the given wavelength (m).
    pub fn transmission_at(&self, wavelength: f64) -> Result<f64, MicroscopeError> {
        let key = wavelength_key(wavelength);
        self.transmission
            .get(&key)
            .copied()
            .ok_or(MicroscopeError::UnknownWavelength { wavelength_nm: key })
    }

    /// Half-angle of the focused cone, `arcsin(NA / n)`.
    ///
    /// Fails when the numerical aperture reaches or exceeds the refractive
    /// index, which puts the arcsin argument outside its domain.
    pub fn aperture_half_angle(&self) -> Result<f64, MicroscopeError> {
        let ratio = self.na / self.refractive_index;
        if ratio >= 1.0 {
            return Err(MicroscopeError::ApertureExceedsIndex {
                na: self.na,
                n: self.refractive_index,
            });
        }
        Ok(ratio.asin())
    }
}

impl Default for Objective {
    fn default() -> Self {
        models::LEICA_100X.clone()
    }
}

/// Standard objective models.
pub mod models {
    use super::*;

    /// Leica 100x tube lens with transmission measured at the wavelengths
    /// used by the default dyes.
    pub static LEICA_100X: Lazy<Objective> = Lazy::new(|| {
        Objective::new(
            2e-3,
            1.5,
            1.4,
            HashMap::from([
                (488, 0.84),
                (535, 0.85),
                (550, 0.86),
                (575, 0.85),
                (585, 0.85),
            ]),
        )
    });
}
