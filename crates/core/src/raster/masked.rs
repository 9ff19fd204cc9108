//! Value grid paired with an explicit validity bitmap
//!
//! Sentinel-2 arithmetic in the pipeline never compares against a sentinel
//! nodata value mid-computation. Values are lifted into a [`MaskedGrid`] once,
//! combined with invalidity propagating through every operation, and lowered
//! back to a nodata-filled array at the end.

use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView2, Zip};

/// `f32` values plus a same-shape `valid` bitmap.
///
/// A cell is valid only if its bit is set *and* its value is finite.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedGrid {
    values: Array2<f32>,
    valid: Array2<bool>,
}

impl MaskedGrid {
    /// Pair values with a validity bitmap; non-finite values are forced invalid.
    pub fn new(values: Array2<f32>, valid: Array2<bool>) -> Result<Self> {
        if values.dim() != valid.dim() {
            let (er, ec) = values.dim();
            let (ar, ac) = valid.dim();
            return Err(Error::SizeMismatch { er, ec, ar, ac });
        }
        let valid = Zip::from(&values).and(&valid).map_collect(|v, &ok| ok && v.is_finite());
        Ok(Self { values, valid })
    }

    /// Lift a band, treating `nodata` (and NaN) as invalid.
    pub fn from_nodata(values: ArrayView2<'_, f32>, nodata: Option<f32>) -> Self {
        let valid = values.mapv(|v| v.is_finite() && nodata.map_or(true, |nd| v != nd));
        Self {
            values: values.to_owned(),
            valid,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    pub fn valid(&self) -> &Array2<bool> {
        &self.valid
    }

    /// Value at a cell, `None` when invalid or out of bounds
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        match self.valid.get((row, col)) {
            Some(true) => self.values.get((row, col)).copied(),
            _ => None,
        }
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    /// Fraction of valid cells; 0 for an empty grid
    pub fn valid_fraction(&self) -> f64 {
        let n = self.valid.len();
        if n == 0 {
            return 0.0;
        }
        self.valid_count() as f64 / n as f64
    }

    /// Apply `f` to valid cells; invalid stays invalid, non-finite results become invalid.
    pub fn map(&self, f: impl Fn(f32) -> f32) -> MaskedGrid {
        let values = self.values.mapv(&f);
        let valid = Zip::from(&values)
            .and(&self.valid)
            .map_collect(|v, &ok| ok && v.is_finite());
        MaskedGrid { values, valid }
    }

    /// Combine two grids cell by cell. A result is valid only when both
    /// operands are valid and `f` returns a finite value.
    pub fn zip_with(&self, other: &MaskedGrid, f: impl Fn(f32, f32) -> f32) -> Result<MaskedGrid> {
        if self.shape() != other.shape() {
            let (er, ec) = self.shape();
            let (ar, ac) = other.shape();
            return Err(Error::SizeMismatch { er, ec, ar, ac });
        }
        let values = Zip::from(&self.values).and(&other.values).map_collect(|&a, &b| f(a, b));
        let valid = Zip::from(&values)
            .and(&self.valid)
            .and(&other.valid)
            .map_collect(|v, &va, &vb| va && vb && v.is_finite());
        Ok(MaskedGrid { values, valid })
    }

    /// `(a - b) / (a + b)`; a zero denominator yields an invalid cell.
    pub fn normalized_difference(a: &MaskedGrid, b: &MaskedGrid) -> Result<MaskedGrid> {
        a.zip_with(b, |x, y| {
            let sum = x + y;
            if sum == 0.0 {
                f32::NAN
            } else {
                (x - y) / sum
            }
        })
    }

    /// Boolean grid of valid cells satisfying `pred`; invalid cells are false.
    pub fn test(&self, pred: impl Fn(f32) -> bool) -> Array2<bool> {
        Zip::from(&self.values)
            .and(&self.valid)
            .map_collect(|&v, &ok| ok && pred(v))
    }

    /// Invalidate every cell where `mask` is true.
    pub fn invalidate(&mut self, mask: &Array2<bool>) -> Result<()> {
        if mask.dim() != self.shape() {
            let (er, ec) = self.shape();
            let (ar, ac) = mask.dim();
            return Err(Error::SizeMismatch { er, ec, ar, ac });
        }
        Zip::from(&mut self.valid).and(mask).for_each(|ok, &m| *ok = *ok && !m);
        Ok(())
    }

    /// Lower to a plain array with `nodata` in every invalid cell.
    pub fn fill(&self, nodata: f32) -> Array2<f32> {
        Zip::from(&self.values)
            .and(&self.valid)
            .map_collect(|&v, &ok| if ok { v } else { nodata })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_nodata_lifting() {
        let values = array![[0.1f32, -9999.0], [f32::NAN, 0.4]];
        let g = MaskedGrid::from_nodata(values.view(), Some(-9999.0));
        assert_eq!(g.valid_count(), 2);
        assert_eq!(g.get(0, 1), None);
        assert_eq!(g.get(1, 1), Some(0.4));
        assert_relative_eq!(g.valid_fraction(), 0.5);
    }

    #[test]
    fn test_zip_propagates_invalidity() {
        let a = MaskedGrid::new(array![[1.0f32, 2.0]], array![[true, false]]).unwrap();
        let b = MaskedGrid::new(array![[3.0f32, 4.0]], array![[true, true]]).unwrap();
        let sum = a.zip_with(&b, |x, y| x + y).unwrap();
        assert_eq!(sum.get(0, 0), Some(4.0));
        assert_eq!(sum.get(0, 1), None);
    }

    #[test]
    fn test_normalized_difference_zero_denominator() {
        let nir = MaskedGrid::new(array![[0.4f32, 0.0]], array![[true, true]]).unwrap();
        let red = MaskedGrid::new(array![[0.1f32, 0.0]], array![[true, true]]).unwrap();
        let ndvi = MaskedGrid::normalized_difference(&nir, &red).unwrap();
        assert_relative_eq!(ndvi.get(0, 0).unwrap(), 0.6, epsilon = 1e-6);
        assert_eq!(ndvi.get(0, 1), None);
        assert_eq!(ndvi.fill(-9999.0)[[0, 1]], -9999.0);
    }

    #[test]
    fn test_shape_mismatch() {
        let a = MaskedGrid::from_nodata(Array2::<f32>::zeros((2, 2)).view(), None);
        let b = MaskedGrid::from_nodata(Array2::<f32>::zeros((2, 3)).view(), None);
        assert!(a.zip_with(&b, |x, _| x).is_err());
        assert!(MaskedGrid::new(Array2::zeros((2, 2)), Array2::from_elem((1, 2), true)).is_err());
    }

    #[test]
    fn test_invalidate_and_test() {
        let mut g = MaskedGrid::from_nodata(array![[0.2f32, 0.5], [0.9, 0.1]].view(), None);
        g.invalidate(&array![[false, true], [false, false]]).unwrap();
        let bright = g.test(|v| v > 0.3);
        assert_eq!(bright, array![[false, false], [true, false]]);
    }
}
