use thiserror::Error;

/// Errors produced by the microscope simulation.
#[derive(Error, Debug)]
pub enum MicroscopeError {
    /// No transmission or cross-section entry for the requested wavelength.
    #[error("no entry for wavelength {wavelength_nm} nm")]
    UnknownWavelength {
        /// Requested wavelength, rounded to integer nanometres.
        wavelength_nm: u32,
    },

    /// Numerical aperture over refractive index leaves the arcsin domain.
    #[error("numerical aperture {na} must be smaller than refractive index {n}")]
    ApertureExceedsIndex {
        /// Numerical aperture of the objective.
        na: f64,
        /// Refractive index of the immersion medium.
        n: f64,
    },

    /// Acquisition pixel size is not an integer multiple of the datamap pixel size.
    #[error("pixel size {image_nm} nm is not an integer multiple of the datamap pixel size {datamap_nm} nm")]
    PixelSizeRatio {
        /// Acquisition pixel size in integer nanometres.
        image_nm: u32,
        /// Datamap pixel size in integer nanometres.
        datamap_nm: u32,
    },

    /// Per-pixel dwell time grid does not match the datamap shape.
    #[error("dwell time grid shape {found:?} does not match datamap shape {expected:?}")]
    DwellShapeMismatch {
        /// Datamap shape (rows, cols).
        expected: (usize, usize),
        /// Supplied dwell grid shape.
        found: (usize, usize),
    },

    /// The computed intensity field kept a non-negligible imaginary part.
    #[error("imaginary intensity residual {residual:.3e} exceeds tolerance {tolerance:.3e}")]
    ImaginaryResidual {
        /// Largest imaginary magnitude found, relative to the field peak.
        residual: f64,
        /// Accepted relative tolerance.
        tolerance: f64,
    },

    /// No half-maximum crossing found in an intensity profile.
    #[error("intensity profile has no half-maximum crossing, FWHM is undefined")]
    FwhmUndefined,
}
