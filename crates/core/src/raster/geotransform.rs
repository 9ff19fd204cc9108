//! Affine pixel/world mapping

use crate::bbox::BBox;
use crate::raster::PixelWindow;
use serde::{Deserialize, Serialize};

/// Affine mapping from pixel `(col, row)` to world `(x, y)`:
///
/// ```text
/// x = origin_x + col * pixel_width  + row * row_rotation
/// y = origin_y + col * col_rotation + row * pixel_height
/// ```
///
/// Every grid the pipeline produces is north-up (no rotation, negative
/// `pixel_height`); the rotation terms only survive so that GeoTIFF
/// transformation matrices round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
    pub row_rotation: f64,
    pub col_rotation: f64,
}

impl GeoTransform {
    /// North-up transform
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
            row_rotation: 0.0,
            col_rotation: 0.0,
        }
    }

    /// North-up transform covering `bbox` at square resolution `res`.
    ///
    /// Returns the transform and `(rows, cols)`; each dimension is
    /// `int(extent / res + 0.5)` so grids built from the same bbox and
    /// resolution are always identical.
    pub fn for_bounds(bbox: &BBox, res: f64) -> (Self, usize, usize) {
        let cells = |extent: f64| (extent / res + 0.5).floor().max(0.0) as usize;
        (Self::new(bbox.min_x, bbox.max_y, res, -res), cells(bbox.height()), cells(bbox.width()))
    }

    fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width + row * self.row_rotation,
            self.origin_y + col * self.col_rotation + row * self.pixel_height,
        )
    }

    /// World coordinates of the centre of pixel `(col, row)`
    pub fn pixel_to_geo(&self, col: usize, row: usize) -> (f64, f64) {
        self.apply(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// World coordinates of the top-left corner of pixel `(col, row)`
    pub fn pixel_to_geo_corner(&self, col: usize, row: usize) -> (f64, f64) {
        self.apply(col as f64, row as f64)
    }

    /// Fractional `(col, row)` of a world point; NaN for a singular transform
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let det = self.pixel_width * self.pixel_height - self.row_rotation * self.col_rotation;
        if det.abs() < 1e-10 {
            return (f64::NAN, f64::NAN);
        }
        let (dx, dy) = (x - self.origin_x, y - self.origin_y);
        (
            (self.pixel_height * dx - self.row_rotation * dy) / det,
            (self.pixel_width * dy - self.col_rotation * dx) / det,
        )
    }

    pub fn cell_size(&self) -> f64 {
        self.pixel_width.abs()
    }

    /// Transform of a sub-window whose top-left pixel is `(col_off, row_off)`
    pub fn window_origin(&self, col_off: usize, row_off: usize) -> Self {
        let (x, y) = self.pixel_to_geo_corner(col_off, row_off);
        Self { origin_x: x, origin_y: y, ..*self }
    }

    /// Pixel window covering `bbox`, clipped to a `width` x `height` image.
    ///
    /// Edges are snapped outward to whole pixels. `None` when the bbox does
    /// not overlap the image.
    pub fn window_for_bbox(&self, bbox: &BBox, width: usize, height: usize) -> Option<PixelWindow> {
        let corners = bbox.corners().map(|(x, y)| self.geo_to_pixel(x, y));
        let (mut c_lo, mut r_lo) = (f64::INFINITY, f64::INFINITY);
        let (mut c_hi, mut r_hi) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (c, r) in corners {
            c_lo = c_lo.min(c);
            c_hi = c_hi.max(c);
            r_lo = r_lo.min(r);
            r_hi = r_hi.max(r);
        }
        if ![c_lo, c_hi, r_lo, r_hi].iter().all(|v| v.is_finite()) {
            return None;
        }

        // Grid-aligned edges must not grow by a pixel through float noise
        const EPS: f64 = 1e-6;
        let lower = |v: f64| (v + EPS).floor().max(0.0) as usize;
        let upper = |v: f64, limit: usize| ((v - EPS).ceil().max(0.0) as usize).min(limit);
        let (c0, c1) = (lower(c_lo), upper(c_hi, width));
        let (r0, r1) = (lower(r_lo), upper(r_hi, height));
        (c0 < c1 && r0 < r1).then(|| PixelWindow::new(c0, r0, c1 - c0, r1 - r0))
    }

    fn coefficients(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.origin_y,
            self.pixel_width,
            self.pixel_height,
            self.row_rotation,
            self.col_rotation,
        ]
    }

    /// All six coefficients within `tol`
    pub fn approx_eq(&self, other: &GeoTransform, tol: f64) -> bool {
        self.coefficients()
            .iter()
            .zip(other.coefficients())
            .all(|(a, b)| (a - b).abs() <= tol)
    }

    pub fn bbox(&self, width: usize, height: usize) -> BBox {
        BBox::from(self.bounds(width, height))
    }

    /// `(min_x, min_y, max_x, max_y)` of a `width` x `height` image
    pub fn bounds(&self, width: usize, height: usize) -> (f64, f64, f64, f64) {
        [(0, 0), (width, 0), (0, height), (width, height)]
            .iter()
            .map(|&(c, r)| self.pixel_to_geo_corner(c, r))
            .fold(
                (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
                |(x0, y0, x1, y1), (x, y)| (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            )
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, -1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pixel_centre_inverts() {
        let gt = GeoTransform::new(700_000.0, 9_860_000.0, 10.0, -10.0);
        let (x, y) = gt.pixel_to_geo(5, 10);
        assert_relative_eq!(x, 700_055.0);
        assert_relative_eq!(y, 9_859_895.0);

        let (col, row) = gt.geo_to_pixel(x, y);
        assert_relative_eq!(col, 5.5, epsilon = 1e-10);
        assert_relative_eq!(row, 10.5, epsilon = 1e-10);
    }

    #[test]
    fn test_singular_transform_is_nan() {
        let gt = GeoTransform::new(0.0, 0.0, 0.0, -1.0);
        assert!(gt.geo_to_pixel(1.0, 1.0).0.is_nan());
    }

    #[test]
    fn test_bounds() {
        let gt = GeoTransform::new(36.8, -1.28, 1e-4, -1e-4);
        let bbox = gt.bbox(200, 100);
        assert_relative_eq!(bbox.min_x, 36.8, epsilon = 1e-12);
        assert_relative_eq!(bbox.max_x, 36.82, epsilon = 1e-12);
        assert_relative_eq!(bbox.min_y, -1.29, epsilon = 1e-12);
        assert_relative_eq!(bbox.max_y, -1.28, epsilon = 1e-12);
    }

    #[test]
    fn test_for_bounds_rounds_half_up() {
        let res = 10.0 / (111.32 * 1000.0);
        let bbox = BBox::new(36.80, -1.32, 36.82, -1.30);
        let (gt, rows, cols) = GeoTransform::for_bounds(&bbox, res);
        assert_eq!(cols, (0.02 / res + 0.5) as usize);
        assert_eq!(rows, cols);
        assert_relative_eq!(gt.origin_x, 36.80);
        assert_relative_eq!(gt.origin_y, -1.30);
        assert_relative_eq!(gt.pixel_height, -res);
    }

    #[test]
    fn test_window_for_bbox() {
        let gt = GeoTransform::new(500_000.0, 4_000_000.0, 10.0, -10.0);
        let bbox = BBox::new(500_100.0, 3_999_500.0, 500_300.0, 3_999_900.0);
        let w = gt.window_for_bbox(&bbox, 1000, 1000).unwrap();
        assert_eq!(w, PixelWindow::new(10, 10, 20, 40));

        let partial = BBox::new(499_000.0, 3_999_950.0, 500_050.0, 4_001_000.0);
        let w = gt.window_for_bbox(&partial, 1000, 1000).unwrap();
        assert_eq!(w, PixelWindow::new(0, 0, 5, 5));

        let outside = BBox::new(0.0, 0.0, 10.0, 10.0);
        assert!(gt.window_for_bbox(&outside, 1000, 1000).is_none());
    }

    #[test]
    fn test_window_origin() {
        let gt = GeoTransform::new(500_000.0, 4_000_000.0, 10.0, -10.0);
        let sub = gt.window_origin(10, 20);
        assert_relative_eq!(sub.origin_x, 500_100.0);
        assert_relative_eq!(sub.origin_y, 3_999_800.0);
        assert!(gt.approx_eq(&gt.window_origin(0, 0), 0.0));
        assert!(!gt.approx_eq(&sub, 1.0));
    }
}
