//! Per-pixel temporal statistics that skip missing samples

use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};

use crate::maybe_rayon::*;
use clearsky_core::{Error, Result};

/// Statistic taken across scenes at each pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    /// Median of the valid samples; the mean of the middle pair for even counts
    #[default]
    Median,
    /// Arithmetic mean of the valid samples
    Mean,
}

impl Statistic {
    /// Reduce the finite entries of `values`; `None` when there are none.
    ///
    /// `values` is reordered in place.
    pub fn reduce(self, values: &mut [f32]) -> Option<f32> {
        let mut n = 0;
        for i in 0..values.len() {
            if values[i].is_finite() {
                values.swap(n, i);
                n += 1;
            }
        }
        let valid = &mut values[..n];
        if valid.is_empty() {
            return None;
        }
        match self {
            Statistic::Median => {
                valid.sort_unstable_by(f32::total_cmp);
                let mid = n / 2;
                if n % 2 == 1 {
                    Some(valid[mid])
                } else {
                    Some(((valid[mid - 1] as f64 + valid[mid] as f64) / 2.0) as f32)
                }
            }
            Statistic::Mean => {
                let sum: f64 = valid.iter().map(|&v| v as f64).sum();
                Some((sum / n as f64) as f32)
            }
        }
    }
}

/// Replace `nodata` with NaN so the kernels see it as missing
pub fn mark_missing(data: &mut Array3<f32>, nodata: Option<f32>) {
    if let Some(nd) = nodata {
        data.mapv_inplace(|v| if v == nd { f32::NAN } else { v });
    }
}

/// Reduce same-shape `(band, row, col)` layers along time.
///
/// Non-finite samples are missing. A pixel with no valid sample in any
/// layer is written as `nodata`.
pub fn composite_layers(layers: &[ArrayView3<'_, f32>], statistic: Statistic, nodata: f32) -> Result<Array3<f32>> {
    let first = layers
        .first()
        .ok_or_else(|| Error::Algorithm("composite needs at least one layer".into()))?;
    let (bands, rows, cols) = first.dim();
    if let Some(bad) = layers.iter().find(|l| l.dim() != (bands, rows, cols)) {
        return Err(Error::GridMismatch(format!(
            "layer shape {:?} differs from {:?}",
            bad.dim(),
            (bands, rows, cols)
        )));
    }

    let data: Vec<f32> = (0..bands * rows)
        .into_par_iter()
        .flat_map(|line| {
            let (b, r) = (line / rows, line % rows);
            let mut samples = vec![0.0f32; layers.len()];
            (0..cols)
                .map(|c| {
                    for (slot, layer) in samples.iter_mut().zip(layers) {
                        *slot = layer[[b, r, c]];
                    }
                    statistic.reduce(&mut samples).unwrap_or(nodata)
                })
                .collect::<Vec<_>>()
        })
        .collect();

    Ok(Array3::from_shape_vec((bands, rows, cols), data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_median_skips_missing() {
        let mut v = [2.0, 4.0, 8.0, 2.0, 0.0, f32::NAN, 2.0];
        assert_relative_eq!(Statistic::Median.reduce(&mut v).unwrap(), 2.0);
        let mut v = [1.0, f32::NAN, 3.0];
        assert_relative_eq!(Statistic::Median.reduce(&mut v).unwrap(), 2.0);
        let mut v = [f32::NAN, f32::NAN];
        assert_eq!(Statistic::Median.reduce(&mut v), None);
    }

    #[test]
    fn test_mean_skips_missing() {
        let mut v = [2.0, 4.0, 8.0, 2.0, 0.0, f32::NAN, 2.0];
        assert_relative_eq!(Statistic::Mean.reduce(&mut v).unwrap(), 18.0 / 6.0, epsilon = 1e-6);
        assert_eq!(Statistic::Mean.reduce(&mut []), None);
    }

    #[test]
    fn test_three_scene_median_and_all_masked() {
        let a = Array3::from_elem((1, 1, 2), 0.2f32);
        let mut b = Array3::from_elem((1, 1, 2), 0.9f32);
        let c = Array3::from_elem((1, 1, 2), 0.4f32);
        b[[0, 0, 0]] = f32::NAN;
        let mut layers = vec![a, b, c];
        for l in &mut layers {
            l[[0, 0, 1]] = f32::NAN;
        }
        let views: Vec<_> = layers.iter().map(|l| l.view()).collect();
        let out = composite_layers(&views, Statistic::Median, -9999.0).unwrap();
        assert_relative_eq!(out[[0, 0, 0]], 0.3, epsilon = 1e-6);
        assert_eq!(out[[0, 0, 1]], -9999.0);
    }

    #[test]
    fn test_mark_missing_and_shape_check() {
        let mut a = Array3::from_elem((2, 2, 2), -9999.0f32);
        a[[1, 1, 1]] = 0.5;
        mark_missing(&mut a, Some(-9999.0));
        assert_eq!(a.iter().filter(|v| v.is_nan()).count(), 7);

        let b = Array3::<f32>::zeros((2, 2, 3));
        assert!(composite_layers(&[a.view(), b.view()], Statistic::Median, 0.0).is_err());
        assert!(composite_layers(&[], Statistic::Median, 0.0).is_err());
    }
}
