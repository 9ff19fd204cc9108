//! Sentinel-2 Scene Classification Layer lookups
//!
//! The L2A SCL band labels each 20 m pixel with one of twelve classes.
//! Stacks carry it as `f32` next to the reflectance bands, so lookups round
//! the stored value back to its class code.

use ndarray::{Array2, ArrayView2, Zip};

/// SCL class codes
pub mod class {
    pub const NO_DATA: u8 = 0;
    pub const SATURATED_OR_DEFECTIVE: u8 = 1;
    pub const DARK_AREA: u8 = 2;
    pub const CLOUD_SHADOW: u8 = 3;
    pub const VEGETATION: u8 = 4;
    pub const NOT_VEGETATED: u8 = 5;
    pub const WATER: u8 = 6;
    pub const UNCLASSIFIED: u8 = 7;
    pub const CLOUD_MEDIUM_PROBABILITY: u8 = 8;
    pub const CLOUD_HIGH_PROBABILITY: u8 = 9;
    pub const THIN_CIRRUS: u8 = 10;
    pub const SNOW: u8 = 11;
}

/// Classes treated as cloud
pub const CLOUD_CLASSES: [u8; 3] = [
    class::CLOUD_MEDIUM_PROBABILITY,
    class::CLOUD_HIGH_PROBABILITY,
    class::THIN_CIRRUS,
];

/// Classes treated as unusable regardless of cloud
pub const BAD_PIXEL_CLASSES: [u8; 4] = [
    class::NO_DATA,
    class::SATURATED_OR_DEFECTIVE,
    class::UNCLASSIFIED,
    class::SNOW,
];

/// Class code of a stored SCL sample, `None` for nodata or non-codes.
pub fn class_of(value: f32, nodata: Option<f32>) -> Option<u8> {
    if !value.is_finite() || nodata == Some(value) {
        return None;
    }
    let code = value.round();
    if (0.0..=255.0).contains(&code) {
        Some(code as u8)
    } else {
        None
    }
}

/// True where the SCL class is one of `classes`. Nodata cells are false.
pub fn class_mask(scl: ArrayView2<'_, f32>, classes: &[u8], nodata: Option<f32>) -> Array2<bool> {
    scl.mapv(|v| class_of(v, nodata).is_some_and(|c| classes.contains(&c)))
}

/// True where the SCL band carries a class at all
pub fn data_mask(scl: ArrayView2<'_, f32>, nodata: Option<f32>) -> Array2<bool> {
    scl.mapv(|v| class_of(v, nodata).is_some())
}

/// `a | b`, cell by cell. Shapes must already agree.
pub(crate) fn union(a: &Array2<bool>, b: &Array2<bool>) -> Array2<bool> {
    Zip::from(a).and(b).map_collect(|&x, &y| x || y)
}
