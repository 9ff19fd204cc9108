//! Analysis grid shared by every scene of a window
//!
//! The canvas spans the whole request bbox at the analysis resolution. Scene
//! rasters are warped onto sub-grids of it, so any two of them differ only
//! by a whole-pixel offset, and merging onto the canvas gives every scene
//! the same shape and transform.

use clearsky_core::bbox::BBox;
use clearsky_core::crs::CRS;
use clearsky_core::raster::{GeoTransform, RasterStack};
use clearsky_core::{Error, Result};

/// Roughly 10 m expressed in degrees at the equator
pub const DEFAULT_RESOLUTION: f64 = 10.0 / (111.32 * 1000.0);

/// Pixel offsets are accepted when within this fraction of a pixel
const ALIGN_TOLERANCE: f64 = 1e-3;

/// A north-up grid: transform, dimensions and CRS
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
    pub transform: GeoTransform,
    pub rows: usize,
    pub cols: usize,
    pub crs: CRS,
}

impl Canvas {
    /// Grid covering `bbox` at square resolution `res`
    pub fn for_bbox(bbox: &BBox, res: f64, crs: CRS) -> Result<Self> {
        if !(res > 0.0 && res.is_finite()) {
            return Err(Error::InvalidParameter {
                name: "resolution",
                value: res.to_string(),
                reason: "must be positive".into(),
            });
        }
        let (transform, rows, cols) = GeoTransform::for_bounds(bbox, res);
        if rows == 0 || cols == 0 {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }
        Ok(Self {
            transform,
            rows,
            cols,
            crs,
        })
    }

    pub fn resolution(&self) -> f64 {
        self.transform.pixel_width
    }

    pub fn bbox(&self) -> BBox {
        self.transform.bbox(self.cols, self.rows)
    }

    /// Sub-grid of pixels touching `bbox`, snapped outward to canvas pixels.
    pub fn subgrid(&self, bbox: &BBox) -> Option<Canvas> {
        let window = self.transform.window_for_bbox(bbox, self.cols, self.rows)?;
        Some(Canvas {
            transform: self.transform.window_origin(window.col_off, window.row_off),
            rows: window.rows,
            cols: window.cols,
            crs: self.crs.clone(),
        })
    }

    /// A nodata-filled stack on this grid
    pub fn blank_stack(&self, bands: usize, nodata: f32) -> RasterStack<f32> {
        let mut stack = RasterStack::filled(bands, self.rows, self.cols, nodata);
        stack.set_transform(self.transform);
        stack.set_crs(Some(self.crs.clone()));
        stack.set_nodata(Some(nodata));
        stack
    }

    /// Whether `transform` with the given shape is exactly this grid
    pub fn matches(&self, transform: &GeoTransform, rows: usize, cols: usize) -> bool {
        rows == self.rows
            && cols == self.cols
            && transform.approx_eq(&self.transform, self.resolution().abs() * ALIGN_TOLERANCE)
    }

    /// Whole-pixel `(row, col)` position of a grid's origin on this canvas.
    ///
    /// Fails when the resolutions differ or the origin is off the pixel lattice.
    pub fn offset_of(&self, transform: &GeoTransform) -> Result<(isize, isize)> {
        let res = self.resolution();
        let same_res = (transform.pixel_width - res).abs() <= res.abs() * ALIGN_TOLERANCE
            && (transform.pixel_height - self.transform.pixel_height).abs() <= res.abs() * ALIGN_TOLERANCE;
        if !same_res {
            return Err(Error::GridMismatch(format!(
                "pixel size {}x{} differs from canvas {}x{}",
                transform.pixel_width, transform.pixel_height, res, self.transform.pixel_height
            )));
        }

        let col = (transform.origin_x - self.transform.origin_x) / res;
        let row = (transform.origin_y - self.transform.origin_y) / self.transform.pixel_height;
        if (col - col.round()).abs() > ALIGN_TOLERANCE || (row - row.round()).abs() > ALIGN_TOLERANCE {
            return Err(Error::GridMismatch(format!(
                "origin ({}, {}) is not on the canvas pixel lattice",
                transform.origin_x, transform.origin_y
            )));
        }
        Ok((row.round() as isize, col.round() as isize))
    }
}
