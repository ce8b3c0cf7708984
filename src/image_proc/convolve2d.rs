//! 2D convolution for ndarray, used to build the detection PSF.

use ndarray::{Array2, Zip};

/// Options controlling the convolution.
#[derive(Debug, Clone, Copy)]
pub struct ConvolveOptions {
    /// Whether to process output pixels in parallel with rayon.
    pub parallel: bool,
    /// Value assumed for pixels outside the input bounds.
    pub fill: f64,
}

impl Default for ConvolveOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            fill: 0.0,
        }
    }
}

/// Convolve a 2D array with a kernel, returning an output of the same shape.
///
/// The kernel is not flipped, which is irrelevant for the symmetric pinhole
/// and PSF kernels this crate produces.
pub fn convolve2d(input: &Array2<f64>, kernel: &Array2<f64>, options: ConvolveOptions) -> Array2<f64> {
    let mut output = Array2::zeros(input.dim());
    let accumulate = |(i, j): (usize, usize), out: &mut f64| {
        *out = convolve_at(input, kernel, i, j, options.fill);
    };

    if options.parallel {
        Zip::indexed(&mut output).par_for_each(accumulate);
    } else {
        Zip::indexed(&mut output).for_each(accumulate);
    }
    output
}

fn convolve_at(input: &Array2<f64>, kernel: &Array2<f64>, i: usize, j: usize, fill: f64) -> f64 {
    let (rows, cols) = input.dim();
    let (kernel_rows, kernel_cols) = kernel.dim();
    let kr = kernel_rows / 2;
    let kc = kernel_cols / 2;

    let mut sum = 0.0;
    for ki in 0..kernel_rows {
        for kj in 0..kernel_cols {
            let ii = i as isize + ki as isize - kr as isize;
            let jj = j as isize + kj as isize - kc as isize;
            let value = if ii >= 0 && ii < rows as isize && jj >= 0 && jj < cols as isize {
                input[[ii as usize, jj as usize]]
            } else {
                fill
            };
            sum += value * kernel[[ki, kj]];
        }
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn identity_kernel_preserves_input() {
        let input = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
        let kernel = array![[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]];
        let output = convolve2d(&input, &kernel, ConvolveOptions::default());
        for (a, b) in input.iter().zip(output.iter()) {
            assert_relative_eq!(a, b);
        }
    }

    #[test]
    fn box_kernel_sums_neighbourhood_with_zero_edges() {
        let input = array![[1.0, 1.0], [1.0, 1.0]];
        let kernel = Array2::from_elem((3, 3), 1.0);
        let output = convolve2d(&input, &kernel, ConvolveOptions::default());
        // Every output pixel sees all four input pixels, the rest is zero fill.
        for v in output.iter() {
            assert_relative_eq!(*v, 4.0);
        }
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let input = Array2::from_shape_fn((16, 16), |(i, j)| (i * 31 + j * 7) as f64);
        let kernel = Array2::from_shape_fn((5, 5), |(i, j)| 1.0 / (1.0 + (i + j) as f64));
        let parallel = convolve2d(
            &input,
            &kernel,
            ConvolveOptions {
                parallel: true,
                fill: 0.0,
            },
        );
        let sequential = convolve2d(
            &input,
            &kernel,
            ConvolveOptions {
                parallel: false,
                fill: 0.0,
            },
        );
        for (a, b) in parallel.iter().zip(sequential.iter()) {
            assert_relative_eq!(a, b);
        }
    }
}
