//! 2D array operations backing the optical simulation: pinhole masks,
//! zero padding, field resizing and the reference kernel-stacking
//! computation.

pub mod convolve2d;

pub use convolve2d::{convolve2d, ConvolveOptions};

use ndarray::{s, Array2};
use num_traits::Zero;

/// Build a circular pinhole mask.
///
/// The mask is 1.0 inside `radius` (metres) of the center pixel and 0.0
/// outside. When `n_pixels` is omitted the mask is sized to the pinhole,
/// with an odd pixel count so a single center pixel exists.
pub fn pinhole(radius: f64, pixelsize: f64, n_pixels: Option<usize>) -> Array2<f64> {
    let n_pixels = n_pixels.unwrap_or((radius / pixelsize) as usize * 2 + 1);
    let center = (n_pixels / 2) as f64;
    let limit = radius / pixelsize;
    Array2::from_shape_fn((n_pixels, n_pixels), |(y, x)| {
        let dy = y as f64 - center;
        let dx = x as f64 - center;
        if (dy * dy + dx * dx).sqrt() <= limit {
            1.0
        } else {
            0.0
        }
    })
}

/// Pad a square odd-sided image with zeros up to `side` pixels, keeping the
/// center pixel centered.
pub fn pad_to(image: &Array2<f64>, side: usize) -> Array2<f64> {
    let small = image.nrows();
    debug_assert!(side >= small && side % 2 == 1 && small % 2 == 1);
    let pad = side / 2 - small / 2;
    let mut padded = Array2::zeros((side, side));
    padded
        .slice_mut(s![pad..pad + small, pad..pad + small])
        .assign(image);
    padded
}

/// Pad the three cached fields with zeros to the size of the largest.
pub fn resize_to_largest(
    a: Array2<f64>,
    b: Array2<f64>,
    c: Array2<f64>,
) -> (Array2<f64>, Array2<f64>, Array2<f64>) {
    let side = a.nrows().max(b.nrows()).max(c.nrows());
    let fit = |img: Array2<f64>| {
        if img.nrows() == side {
            img
        } else {
            pad_to(&img, side)
        }
    };
    (fit(a), fit(b), fit(c))
}

/// Zero-pad an array by `pad` elements on every edge.
pub fn zero_pad<T: Copy + Zero>(array: &Array2<T>, pad: usize) -> Array2<T> {
    let (rows, cols) = array.dim();
    let mut padded = Array2::zeros((rows + 2 * pad, cols + 2 * pad));
    padded
        .slice_mut(s![pad..pad + rows, pad..pad + cols])
        .assign(array);
    padded
}

/// Replicate `kernel` at every occupied datamap position, weighted by the
/// molecule count.
///
/// This is the direct-convolution reference for the scanning acquisition: a
/// full raster scan at pixel ratio 1 with bleaching disabled accumulates
/// exactly this field.
pub fn stack(datamap: &Array2<u64>, kernel: &Array2<f64>) -> Array2<f64> {
    let (kh, kw) = kernel.dim();
    let pad_r = kh / 2;
    let pad_c = kw / 2;
    let (rows, cols) = datamap.dim();
    let mut frame = Array2::zeros((rows + 2 * pad_r, cols + 2 * pad_c));
    for ((y, x), &count) in datamap.indexed_iter() {
        if count == 0 {
            continue;
        }
        let mut window = frame.slice_mut(s![y..y + kh, x..x + kw]);
        window.scaled_add(count as f64, kernel);
    }
    frame.slice(s![pad_r..pad_r + rows, pad_c..pad_c + cols]).to_owned()
}
