//! The scanning acquisition engine.
//!
//! An acquisition drives the lasers over the sample in a configurable pixel
//! order. The laser sits on a coarser grid than the molecule map whenever
//! the acquisition pixel size is a multiple of the datamap pixel size, so a
//! validity grid restricts which molecule-grid pixels can be visited. At
//! each visited pixel the engine first accumulates the detected signal from
//! the surrounding molecules weighted by the effective kernel, then, when
//! bleaching is enabled, deepens the cumulative survival-probability maps
//! under the local beam exposure and redraws the local molecule counts.
//!
//! The two effects are deliberately order-dependent: a pixel visited early
//! bleaches molecules that a later, spatially overlapping pixel then sees
//! with reduced counts. Reproducing a scan therefore requires the same
//! visit order and the same seed.

use log::warn;
use ndarray::{s, Array2, Zip};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::datamap::Datamap;
use crate::error::MicroscopeError;
use crate::hardware::detector::sample_binomial;
use crate::image_proc::zero_pad;
use crate::microscope::Microscope;

/// Time spent on each visited pixel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DwellTime {
    /// The same dwell time everywhere (s).
    Uniform(f64),
    /// One dwell time per molecule-grid pixel (s); must match the datamap
    /// shape.
    PerPixel(Array2<f64>),
}

/// Parameters of one acquisition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Acquisition pixel size (m); must be an integer multiple of the
    /// datamap pixel size.
    pub pixelsize: f64,
    /// Excitation beam power (W).
    pub p_ex: f64,
    /// Depletion beam power (W).
    pub p_sted: f64,
    /// Dwell time per pixel.
    pub dwell: DwellTime,
    /// Optional visit order over molecule-grid coordinates. Pixels outside
    /// the validity grid are dropped; an empty intersection falls back to a
    /// full raster scan.
    pub pixel_list: Option<Vec<(usize, usize)>>,
    /// Whether the lasers bleach the sample while scanning.
    pub bleach: bool,
    /// Seed for all stochastic draws of this acquisition. A random seed is
    /// drawn when absent.
    pub seed: Option<u64>,
}

impl ScanConfig {
    /// Full-raster configuration with a uniform dwell time and bleaching
    /// enabled.
    pub fn new(pixelsize: f64, p_ex: f64, p_sted: f64, dwell: f64) -> Self {
        Self {
            pixelsize,
            p_ex,
            p_sted,
            dwell: DwellTime::Uniform(dwell),
            pixel_list: None,
            bleach: true,
            seed: None,
        }
    }
}

/// Result of one acquisition.
#[derive(Debug, Clone)]
pub struct Acquisition {
    /// Detected photon counts, one cell per acquisition pixel.
    pub image: Array2<f64>,
    /// Dwell time actually spent per acquisition pixel (s).
    pub dwell: Array2<f64>,
}

/// Policy deciding how long to stay on a pixel in adaptive acquisitions.
pub trait DwellPolicy {
    /// Choose the dwell time given the photons detected during a full-dwell
    /// probe of the pixel.
    fn dwell(&self, detected: f64, full_dwell: f64) -> f64;
}

/// RESCUe-style adaptive dwell: leave dim pixels quickly, cap the exposure
/// of bright ones.
///
/// The thresholds are experimental defaults, not a calibrated contract;
/// tune them per sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescuePolicy {
    /// Dwell divisor applied below the lower count threshold.
    pub lower_divisor: f64,
    /// Detected counts below which the pixel is abandoned early.
    pub lower_count: f64,
    /// Detected counts above which the dwell is shortened proportionally.
    pub upper_count: f64,
}

impl Default for RescuePolicy {
    fn default() -> Self {
        Self {
            lower_divisor: 10.0,
            lower_count: 10.0,
            upper_count: 25.0,
        }
    }
}

impl DwellPolicy for RescuePolicy {
    fn dwell(&self, detected: f64, full_dwell: f64) -> f64 {
        if detected >= self.lower_count && detected <= self.upper_count {
            full_dwell
        } else if detected > self.upper_count {
            self.upper_count * full_dwell / detected
        } else {
            full_dwell / self.lower_divisor
        }
    }
}

/// Integer ratio between the acquisition and datamap pixel sizes.
///
/// Both sizes are rounded to integer nanometres first; a non-integer ratio
/// is a configuration error.
pub(crate) fn pixel_ratio(
    image_pixelsize: f64,
    datamap_pixelsize: f64,
) -> Result<usize, MicroscopeError> {
    let image_nm = (image_pixelsize * 1e9).round() as u32;
    let datamap_nm = (datamap_pixelsize * 1e9).round() as u32;
    if datamap_nm == 0 || image_nm < datamap_nm || image_nm % datamap_nm != 0 {
        return Err(MicroscopeError::PixelSizeRatio {
            image_nm,
            datamap_nm,
        });
    }
    Ok((image_nm / datamap_nm) as usize)
}

fn raster(shape: (usize, usize), ratio: usize) -> Vec<(usize, usize)> {
    let mut pixels = Vec::with_capacity(shape.0.div_ceil(ratio) * shape.1.div_ceil(ratio));
    for row in (0..shape.0).step_by(ratio) {
        for col in (0..shape.1).step_by(ratio) {
            pixels.push((row, col));
        }
    }
    pixels
}

/// Resolve the visit order: intersect a requested pixel list with the
/// validity grid, preserving the caller's order, or raster over the whole
/// grid.
fn scan_order(
    shape: (usize, usize),
    ratio: usize,
    requested: Option<&[(usize, usize)]>,
) -> Vec<(usize, usize)> {
    match requested {
        None => raster(shape, ratio),
        Some(list) => {
            let filtered: Vec<(usize, usize)> = list
                .iter()
                .copied()
                .filter(|&(row, col)| {
                    row < shape.0 && col < shape.1 && row % ratio == 0 && col % ratio == 0
                })
                .collect();
            if filtered.is_empty() {
                warn!(
                    "none of the {} requested pixels lies on the {}x laser grid, \
                     falling back to a full raster scan",
                    list.len(),
                    ratio
                );
                raster(shape, ratio)
            } else {
                filtered
            }
        }
    }
}

fn dwell_grid(dwell: &DwellTime, shape: (usize, usize)) -> Result<Array2<f64>, MicroscopeError> {
    match dwell {
        DwellTime::Uniform(t) => Ok(Array2::from_elem(shape, *t)),
        DwellTime::PerPixel(grid) => {
            if grid.dim() == shape {
                Ok(grid.clone())
            } else {
                Err(MicroscopeError::DwellShapeMismatch {
                    expected: shape,
                    found: grid.dim(),
                })
            }
        }
    }
}

fn subsample_dwell(dwell: &Array2<f64>, ratio: usize, out_shape: (usize, usize)) -> Array2<f64> {
    Array2::from_shape_fn(out_shape, |(row, col)| dwell[[row * ratio, col * ratio]])
}

/// Per-acquisition bleach-rate fields derived from the cached unit fields.
struct BleachRates {
    k_ex: Array2<f64>,
    k_sted: Array2<f64>,
}

impl Microscope {
    fn bleach_rate_fields(
        &mut self,
        pixelsize: f64,
        p_ex: f64,
        p_sted: f64,
    ) -> Result<BleachRates, MicroscopeError> {
        let lambda_ex = self.excitation.wavelength;
        let lambda_sted = self.sted.wavelength;
        let duty_cycle = self.sted.duty_cycle();
        let (unit_ex, unit_sted) = {
            let fields = self.cache(pixelsize)?;
            (fields.excitation.clone(), fields.depletion.clone())
        };

        let photons_ex = self.fluo.photon_counts(&(&unit_ex * p_ex));
        let k_ex = self.fluo.bleach_rates(lambda_ex, &photons_ex)?;

        // The depletion beam is pulsed, so its time-averaged photon flux is
        // the peak flux scaled by the duty cycle.
        let photons_sted = self
            .fluo
            .photon_counts(&(&unit_sted * (p_sted * duty_cycle)));
        let k_sted = self.fluo.bleach_rates(lambda_sted, &photons_sted)?;

        Ok(BleachRates { k_ex, k_sted })
    }

    /// Run one scanning acquisition over the datamap.
    ///
    /// Returns the detected image on the acquisition grid and mutates the
    /// datamap in place when bleaching is enabled. All configuration errors
    /// surface before any pixel is visited.
    pub fn acquire(
        &mut self,
        datamap: &mut Datamap,
        config: &ScanConfig,
    ) -> Result<Acquisition, MicroscopeError> {
        let shape = datamap.shape();
        let datamap_pixelsize = datamap.pixelsize();
        let ratio = pixel_ratio(config.pixelsize, datamap_pixelsize)?;
        let dwell = dwell_grid(&config.dwell, shape)?;
        let kernel = self.effective_kernel(datamap_pixelsize, config.p_ex, config.p_sted)?;
        let rates = if config.bleach {
            Some(self.bleach_rate_fields(datamap_pixelsize, config.p_ex, config.p_sted)?)
        } else {
            None
        };

        let (kernel_rows, kernel_cols) = kernel.dim();
        let pad = kernel_rows / 2;
        let order = scan_order(shape, ratio, config.pixel_list.as_deref());
        let out_shape = (shape.0.div_ceil(ratio), shape.1.div_ceil(ratio));

        let mut acquired = Array2::<f64>::zeros(out_shape);
        let mut padded = zero_pad(datamap.molecules(), pad);
        let dwell_padded = zero_pad(&dwell, pad);
        let mut prob_ex = zero_pad(&Array2::from_elem(shape, 1.0), pad);
        let mut prob_sted = zero_pad(&Array2::from_elem(shape, 1.0), pad);

        let seed = config.seed.unwrap_or_else(|| rand::thread_rng().next_u64());
        let mut rng = StdRng::seed_from_u64(seed);

        for (row, col) in order {
            let mut signal = 0.0;
            Zip::from(&kernel)
                .and(padded.slice(s![row..row + kernel_rows, col..col + kernel_cols]))
                .for_each(|&k, &m| signal += k * m as f64);
            acquired[[row / ratio, col / ratio]] += signal;

            if let Some(rates) = &rates {
                let window = s![row..row + kernel_rows, col..col + kernel_cols];
                let dwell_w = dwell_padded.slice(window);
                Zip::from(prob_ex.slice_mut(window))
                    .and(&rates.k_ex)
                    .and(&dwell_w)
                    .for_each(|p, &k, &t| *p *= (-k * t).exp());
                Zip::from(prob_sted.slice_mut(window))
                    .and(&rates.k_sted)
                    .and(&dwell_w)
                    .for_each(|p, &k, &t| *p *= (-k * t).exp());
                Zip::from(padded.slice_mut(window))
                    .and(prob_ex.slice(window))
                    .and(prob_sted.slice(window))
                    .for_each(|m, &p_ex, &p_sted| {
                        *m = sample_binomial(&mut rng, *m, p_ex * p_sted);
                    });
            }
        }

        datamap
            .molecules_mut()
            .assign(&padded.slice(s![pad..pad + shape.0, pad..pad + shape.1]));

        let photons = self.fluo.photon_counts(&acquired);
        let dwell_out = subsample_dwell(&dwell, ratio, out_shape);
        let image = self
            .detector
            .detect_with_dwell_map(&photons, &dwell_out, &mut rng);
        Ok(Acquisition {
            image,
            dwell: dwell_out,
        })
    }

    /// Run one acquisition with a per-pixel adaptive dwell time.
    ///
    /// Each visited pixel is probed at the full dwell time; the policy then
    /// decides how long the lasers actually stay, which scales both the
    /// reported signal and the bleaching exposure. The dwell time actually
    /// spent per acquisition pixel is returned alongside the image.
    pub fn acquire_adaptive(
        &mut self,
        datamap: &mut Datamap,
        config: &ScanConfig,
        policy: &dyn DwellPolicy,
    ) -> Result<Acquisition, MicroscopeError> {
        let shape = datamap.shape();
        let datamap_pixelsize = datamap.pixelsize();
        let ratio = pixel_ratio(config.pixelsize, datamap_pixelsize)?;
        let dwell = dwell_grid(&config.dwell, shape)?;
        // The configured dwell bounds the stay; the policy shortens it.
        let full_dwell = dwell.iter().fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        let kernel = self.effective_kernel(datamap_pixelsize, config.p_ex, config.p_sted)?;
        let rates = if config.bleach {
            Some(self.bleach_rate_fields(datamap_pixelsize, config.p_ex, config.p_sted)?)
        } else {
            None
        };

        let (kernel_rows, kernel_cols) = kernel.dim();
        let pad = kernel_rows / 2;
        let order = scan_order(shape, ratio, config.pixel_list.as_deref());
        let out_shape = (shape.0.div_ceil(ratio), shape.1.div_ceil(ratio));

        let mut image = Array2::<f64>::zeros(out_shape);
        let mut dwell_spent = Array2::<f64>::zeros(out_shape);
        let mut padded = zero_pad(datamap.molecules(), pad);
        let mut prob_ex = zero_pad(&Array2::from_elem(shape, 1.0), pad);
        let mut prob_sted = zero_pad(&Array2::from_elem(shape, 1.0), pad);

        let seed = config.seed.unwrap_or_else(|| rand::thread_rng().next_u64());
        let mut rng = StdRng::seed_from_u64(seed);

        for (row, col) in order {
            let mut signal = 0.0;
            Zip::from(&kernel)
                .and(padded.slice(s![row..row + kernel_rows, col..col + kernel_cols]))
                .for_each(|&k, &m| signal += k * m as f64);

            let emitted = self.fluo.photon_count(signal);
            let probe = self.detector.detect_one(emitted, full_dwell, &mut rng);
            let stay = policy.dwell(probe, full_dwell);
            dwell_spent[[row / ratio, col / ratio]] = stay;
            image[[row / ratio, col / ratio]] = self.detector.detect_one(emitted, stay, &mut rng);

            if let Some(rates) = &rates {
                let window = s![row..row + kernel_rows, col..col + kernel_cols];
                Zip::from(prob_ex.slice_mut(window))
                    .and(&rates.k_ex)
                    .for_each(|p, &k| *p *= (-k * stay).exp());
                Zip::from(prob_sted.slice_mut(window))
                    .and(&rates.k_sted)
                    .for_each(|p, &k| *p *= (-k * stay).exp());
                Zip::from(padded.slice_mut(window))
                    .and(prob_ex.slice(window))
                    .and(prob_sted.slice(window))
                    .for_each(|m, &p_ex, &p_sted| {
                        *m = sample_binomial(&mut rng, *m, p_ex * p_sted);
                    });
            }
        }

        datamap
            .molecules_mut()
            .assign(&padded.slice(s![pad..pad + shape.0, pad..pad + shape.1]));

        Ok(Acquisition {
            image,
            dwell: dwell_spent,
        })
    }

    /// Expose the sample to the lasers without acquiring an image.
    ///
    /// Survival probabilities accumulate over the whole scan and the
    /// molecule counts are redrawn once at the end, so the outcome is
    /// independent of the visit order.
    pub fn bleach(
        &mut self,
        datamap: &mut Datamap,
        config: &ScanConfig,
    ) -> Result<(), MicroscopeError> {
        let shape = datamap.shape();
        let datamap_pixelsize = datamap.pixelsize();
        let ratio = pixel_ratio(config.pixelsize, datamap_pixelsize)?;
        let dwell = dwell_grid(&config.dwell, shape)?;
        let rates = self.bleach_rate_fields(datamap_pixelsize, config.p_ex, config.p_sted)?;

        let (kernel_rows, kernel_cols) = rates.k_ex.dim();
        let pad = kernel_rows / 2;
        let order = scan_order(shape, ratio, config.pixel_list.as_deref());

        let dwell_padded = zero_pad(&dwell, pad);
        let mut prob_ex = zero_pad(&Array2::from_elem(shape, 1.0), pad);
        let mut prob_sted = zero_pad(&Array2::from_elem(shape, 1.0), pad);

        for (row, col) in order {
            let window = s![row..row + kernel_rows, col..col + kernel_cols];
            let dwell_w = dwell_padded.slice(window);
            Zip::from(prob_ex.slice_mut(window))
                .and(&rates.k_ex)
                .and(&dwell_w)
                .for_each(|p, &k, &t| *p *= (-k * t).exp());
            Zip::from(prob_sted.slice_mut(window))
                .and(&rates.k_sted)
                .and(&dwell_w)
                .for_each(|p, &k, &t| *p *= (-k * t).exp());
        }

        let seed = config.seed.unwrap_or_else(|| rand::thread_rng().next_u64());
        let mut rng = StdRng::seed_from_u64(seed);
        let interior = s![pad..pad + shape.0, pad..pad + shape.1];
        Zip::from(datamap.molecules_mut())
            .and(prob_ex.slice(interior))
            .and(prob_sted.slice(interior))
            .for_each(|m, &p_ex, &p_sted| {
                *m = sample_binomial(&mut rng, *m, p_ex * p_sted);
            });
        Ok(())
    }
}
