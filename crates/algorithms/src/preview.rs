//! 8-bit RGB previews of composites
//!
//! Each band is clipped to its own low/high percentiles, rescaled to
//! `0..=scale` and truncated to a byte. Nodata becomes a reserved byte value.

use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use clearsky_core::raster::RasterStack;
use clearsky_core::Result;

/// Stretch settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewParams {
    pub low_percentile: f64,
    pub high_percentile: f64,
    /// Byte value the high percentile maps to
    pub scale: f32,
    /// Byte written where the source is nodata
    pub nodata: u8,
}

impl Default for PreviewParams {
    fn default() -> Self {
        Self {
            low_percentile: 1.0,
            high_percentile: 99.0,
            scale: 254.0,
            nodata: 255,
        }
    }
}

/// Percentile `q` (0..=100) of sorted values, linearly interpolated
pub fn percentile(sorted: &[f32], q: f64) -> Option<f32> {
    if sorted.is_empty() {
        return None;
    }
    let pos = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some((sorted[lo] as f64 + (sorted[hi] as f64 - sorted[lo] as f64) * frac) as f32)
}

/// Stretch one band to bytes
pub fn stretch_band(band: ArrayView2<'_, f32>, nodata: Option<f32>, params: &PreviewParams) -> Array2<u8> {
    let is_valid = |v: f32| v.is_finite() && nodata != Some(v);
    let mut values: Vec<f32> = band.iter().copied().filter(|&v| is_valid(v)).collect();
    values.sort_unstable_by(f32::total_cmp);

    let (Some(low), Some(high)) = (
        percentile(&values, params.low_percentile),
        percentile(&values, params.high_percentile),
    ) else {
        return Array2::from_elem(band.dim(), params.nodata);
    };
    let span = high - low;

    band.mapv(|v| {
        if !is_valid(v) {
            return params.nodata;
        }
        if span <= 0.0 {
            return 0;
        }
        let unit = (v.clamp(low, high) - low) / span;
        (unit * params.scale) as u8
    })
}

/// RGB byte stack from three bands of `stack` (red, green, blue order)
pub fn rgb_preview(stack: &RasterStack<f32>, rgb: [usize; 3], params: &PreviewParams) -> Result<RasterStack<u8>> {
    let (_, rows, cols) = stack.shape();
    let mut data = Array3::from_elem((3, rows, cols), params.nodata);
    for (i, &band) in rgb.iter().enumerate() {
        let stretched = stretch_band(stack.band(band)?, stack.nodata(), params);
        data.index_axis_mut(Axis(0), i).assign(&stretched);
    }

    let mut out = RasterStack::from_array(data).with_band_names(["red", "green", "blue"])?;
    out.set_transform(*stack.transform());
    out.set_crs(stack.crs().cloned());
    out.set_nodata(Some(params.nodata));
    Ok(out)
}
