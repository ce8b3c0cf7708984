//! The simulated sample: a grid of molecule counts and its pixel size.

use ndarray::Array2;

/// Molecule disposition of the sample.
///
/// The grid is created once per sample, mutated in place by the bleaching
/// step of each acquisition, and never resized.
#[derive(Debug, Clone, PartialEq)]
pub struct Datamap {
    molecules: Array2<u64>,
    pixelsize: f64,
}

impl Datamap {
    /// Create a datamap from a molecule-count grid and its physical pixel
    /// size (m).
    pub fn new(molecules: Array2<u64>, pixelsize: f64) -> Self {
        Self {
            molecules,
            pixelsize,
        }
    }

    /// Grid shape as (rows, cols).
    pub fn shape(&self) -> (usize, usize) {
        self.molecules.dim()
    }

    /// Physical size of one grid pixel (m).
    pub fn pixelsize(&self) -> f64 {
        self.pixelsize
    }

    /// Molecule counts per pixel.
    pub fn molecules(&self) -> &Array2<u64> {
        &self.molecules
    }

    pub(crate) fn molecules_mut(&mut self) -> &mut Array2<u64> {
        &mut self.molecules
    }

    /// Total number of molecules in the sample.
    pub fn total(&self) -> u64 {
        self.molecules.iter().sum()
    }

    /// Fraction of molecules surviving relative to an earlier state of the
    /// same sample.
    pub fn survival_ratio(&self, pre_bleach: &Datamap) -> f64 {
        let before = pre_bleach.total();
        if before == 0 {
            return 1.0;
        }
        self.total() as f64 / before as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn totals_and_survival() {
        let mut grid = Array2::<u64>::zeros((8, 8));
        grid[[2, 2]] = 10;
        grid[[5, 5]] = 6;
        let pre = Datamap::new(grid.clone(), 20e-9);
        assert_eq!(pre.total(), 16);

        grid[[2, 2]] = 5;
        let post = Datamap::new(grid, 20e-9);
        assert_relative_eq!(post.survival_ratio(&pre), 11.0 / 16.0);
    }

    #[test]
    fn empty_sample_survival_is_one() {
        let pre = Datamap::new(Array2::zeros((4, 4)), 20e-9);
        let post = pre.clone();
        assert_relative_eq!(post.survival_ratio(&pre), 1.0);
    }
}
