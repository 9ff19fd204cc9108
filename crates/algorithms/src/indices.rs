//! Spectral indices of composites
//!
//! Bands are lifted into [`MaskedGrid`]s so nodata on either operand, or a
//! zero denominator, makes the index cell nodata.

use clearsky_core::raster::{MaskedGrid, Raster, RasterStack};
use clearsky_core::Result;

/// `(a - b) / (a + b)` of two stack bands, as a masked grid
pub fn normalized_difference(stack: &RasterStack<f32>, a: usize, b: usize) -> Result<MaskedGrid> {
    let nodata = stack.nodata();
    let ga = MaskedGrid::from_nodata(stack.band(a)?, nodata);
    let gb = MaskedGrid::from_nodata(stack.band(b)?, nodata);
    MaskedGrid::normalized_difference(&ga, &gb)
}

/// Normalized Difference Vegetation Index
///
/// `NDVI = (NIR - Red) / (NIR + Red)`, georeferenced like `stack`.
pub fn ndvi(stack: &RasterStack<f32>, nir: usize, red: usize, nodata: f32) -> Result<Raster<f32>> {
    let grid = normalized_difference(stack, nir, red)?;
    Ok(Raster::with_meta(
        grid.fill(nodata),
        *stack.transform(),
        stack.crs().cloned(),
        Some(nodata),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use ndarray::Array3;

    #[test]
    fn test_ndvi_propagates_nodata() {
        let mut data = Array3::<f32>::zeros((2, 2, 2));
        data.index_axis_mut(ndarray::Axis(0), 0).assign(&array![[0.1, 0.2], [-9999.0, 0.0]]);
        data.index_axis_mut(ndarray::Axis(0), 1).assign(&array![[0.5, 0.2], [0.4, 0.0]]);
        let mut stack = RasterStack::from_array(data);
        stack.set_nodata(Some(-9999.0));

        let out = ndvi(&stack, 1, 0, -9999.0).unwrap();
        assert_relative_eq!(out.get(0, 0).unwrap(), 0.4 / 0.6, epsilon = 1e-6);
        assert_relative_eq!(out.get(0, 1).unwrap(), 0.0);
        assert_eq!(out.get(1, 0).unwrap(), -9999.0);
        assert_eq!(out.get(1, 1).unwrap(), -9999.0);
        assert_eq!(out.nodata(), Some(-9999.0));
        assert!(ndvi(&stack, 5, 0, -9999.0).is_err());
    }
}
