//! STED super-resolution microscope acquisition simulation.
//!
//! This crate models a stimulated-emission-depletion microscope imaging a
//! fluorescent sample: the excitation and depletion beams focused by the
//! objective, the photophysics of the fluorophores (excitation, stimulated
//! emission, triplet-state bleaching), and the photon-counting detector.
//! Assembling the components into a [`Microscope`] and scanning it over a
//! [`Datamap`] produces synthetic confocal and STED images, including the
//! photobleaching the acquisition itself inflicts on the sample.
//!
//! ```no_run
//! use ndarray::Array2;
//! use nanoscope::{
//!     Datamap, Detector, DonutBeam, Fluorophore, GaussianBeam, Microscope,
//!     Objective, ScanConfig,
//! };
//!
//! let mut microscope = Microscope::new(
//!     GaussianBeam::new(488e-9),
//!     DonutBeam::new(575e-9).with_zero_residual(0.04),
//!     Detector::default(),
//!     Objective::default(),
//!     Fluorophore::default(),
//! );
//!
//! let mut sample = Datamap::new(Array2::zeros((64, 64)), 10e-9);
//! let mut config = ScanConfig::new(10e-9, 1e-6, 30e-3, 10e-6);
//! config.seed = Some(42);
//!
//! let acquisition = microscope.acquire(&mut sample, &config).unwrap();
//! println!("peak counts: {:?}", acquisition.image.iter().cloned().fold(0.0, f64::max));
//! ```

pub mod algo;
pub mod datamap;
pub mod error;
pub mod hardware;
pub mod image_proc;
pub mod microscope;
pub mod photometry;
pub mod scan;

// Re-exports for easier access
pub use datamap::Datamap;
pub use error::MicroscopeError;
pub use hardware::{Detector, DonutBeam, GaussianBeam, Objective};
pub use microscope::{CachedFields, Microscope};
pub use photometry::Fluorophore;
pub use scan::{Acquisition, DwellPolicy, DwellTime, RescuePolicy, ScanConfig};
