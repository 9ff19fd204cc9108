//! Rule-based spectral cloud test
//!
//! Bright, white-ish pixels are flagged as cloud:
//!
//! ```text
//! (green > T_green AND ndgr > 0) OR green > T_absolute
//! ndgr = (green - red) / (green + red)
//! ```
//!
//! Thresholds are L2A digital numbers (reflectance x 10000).

use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use clearsky_core::raster::MaskedGrid;
use clearsky_core::Result;

/// Digital-number thresholds of the spectral test
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralThresholds {
    /// Green DN above which a positive green/red difference is cloud
    pub green: f32,
    /// Green DN above which a pixel is cloud unconditionally
    pub green_absolute: f32,
}

impl Default for SpectralThresholds {
    fn default() -> Self {
        Self {
            green: 1750.0,
            green_absolute: 3900.0,
        }
    }
}

/// Spectral cloud mask.
///
/// `dn_scale` is the stored value of one digital number: 1 for raw DN,
/// `1 / saturation` for normalized bands. Invalid cells are never cloud.
pub fn spectral_cloud_mask(
    green: &MaskedGrid,
    red: &MaskedGrid,
    thresholds: &SpectralThresholds,
    dn_scale: f32,
) -> Result<Array2<bool>> {
    let ndgr = MaskedGrid::normalized_difference(green, red)?;
    let bright = green.test(|g| g > thresholds.green * dn_scale);
    let greenish = ndgr.test(|v| v > 0.0);
    let very_bright = green.test(|g| g > thresholds.green_absolute * dn_scale);

    Ok(Zip::from(&bright)
        .and(&greenish)
        .and(&very_bright)
        .map_collect(|&b, &g, &v| (b && g) || v))
}
