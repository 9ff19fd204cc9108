//! Nearest-neighbour reprojection onto the analysis grid
//!
//! Each target pixel centre is projected back into the source CRS and takes
//! the value of the source pixel it lands in. Nearest neighbour keeps SCL
//! class codes intact.

use ndarray::Array3;

use crate::maybe_rayon::*;
use crate::mosaic::Canvas;
use clearsky_core::crs::{transform_bbox, transform_point, CRS};
use clearsky_core::raster::RasterStack;
use clearsky_core::{Error, Result};

fn projection_of(crs: Option<&CRS>) -> Result<clearsky_core::Projection> {
    crs.ok_or_else(|| Error::Algorithm("source raster has no CRS".into()))?
        .projection()
}

/// Resample `src` onto `target`. Target pixels outside the source get nodata.
pub fn warp_stack(src: &RasterStack<f32>, target: &Canvas) -> Result<RasterStack<f32>> {
    let from = projection_of(src.crs())?;
    let to = target.crs.projection()?;
    let (bands, src_rows, src_cols) = src.shape();
    let nodata = src.nodata().unwrap_or(f32::NAN);
    let src_transform = *src.transform();
    let (rows, cols) = (target.rows, target.cols);

    // Source pixel of every target pixel, row-major
    let lookup: Vec<Option<(usize, usize)>> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            (0..cols)
                .map(|col| {
                    let (x, y) = target.transform.pixel_to_geo(col, row);
                    let (sx, sy) = transform_point(&to, &from, x, y);
                    let (c, r) = src_transform.geo_to_pixel(sx, sy);
                    if c >= 0.0 && r >= 0.0 && (c as usize) < src_cols && (r as usize) < src_rows {
                        Some((r as usize, c as usize))
                    } else {
                        None
                    }
                })
                .collect::<Vec<_>>()
        })
        .collect();

    let src_data = src.data();
    let mut data = Array3::from_elem((bands, rows, cols), nodata);
    for (i, hit) in lookup.iter().enumerate() {
        if let Some((r, c)) = *hit {
            let (row, col) = (i / cols, i % cols);
            for b in 0..bands {
                data[[b, row, col]] = src_data[[b, r, c]];
            }
        }
    }

    let mut out = RasterStack::from_array(data);
    out.set_transform(target.transform);
    out.set_crs(Some(target.crs.clone()));
    out.set_nodata(Some(nodata));
    if src.band_names().len() == bands {
        out = out.with_band_names(src.band_names().iter().cloned())?;
    }
    Ok(out)
}

/// Warp `src` onto the part of `canvas` it covers.
///
/// The target is the canvas sub-grid enclosing the source footprint, so the
/// result is pixel-aligned with the canvas. `None` when they do not overlap.
pub fn warp_to_canvas(src: &RasterStack<f32>, canvas: &Canvas) -> Result<Option<RasterStack<f32>>> {
    let from = projection_of(src.crs())?;
    let to = canvas.crs.projection()?;
    let footprint = transform_bbox(&src.bbox(), &from, &to);
    match canvas.subgrid(&footprint) {
        Some(target) => warp_stack(src, &target).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clearsky_core::bbox::BBox;
    use clearsky_core::crs::Projection;
    use clearsky_core::GeoTransform;
    use crate::mosaic::DEFAULT_RESOLUTION;

    const ND: f32 = -9999.0;

    /// 10 m UTM 37S stack around Nairobi whose value encodes the source row
    fn utm_stack() -> RasterStack<f32> {
        let utm = Projection::from_epsg(32737).unwrap();
        let (x0, y0) = utm.forward(36.80, -1.282);
        let (rows, cols) = (220, 220);
        let data = Array3::from_shape_fn((2, rows, cols), |(b, r, _)| if b == 0 { r as f32 } else { 4.0 });
        let mut s = RasterStack::from_array(data).with_band_names(["B04", "SCL"]).unwrap();
        let (left, top) = ((x0 / 10.0).floor() * 10.0 - 50.0, (y0 / 10.0).ceil() * 10.0 + 50.0);
        s.set_transform(GeoTransform::new(left, top, 10.0, -10.0));
        s.set_crs(Some(CRS::from_epsg(32737)));
        s.set_nodata(Some(ND));
        s
    }

    fn canvas() -> Canvas {
        Canvas::for_bbox(&BBox::new(36.80, -1.30, 36.818, -1.282), DEFAULT_RESOLUTION, CRS::wgs84()).unwrap()
    }

    #[test]
    fn test_warp_covers_canvas() {
        let src = utm_stack();
        let c = canvas();
        let out = warp_to_canvas(&src, &c).unwrap().unwrap();
        assert!(c.offset_of(out.transform()).is_ok());
        assert_eq!(out.crs(), Some(&CRS::wgs84()));
        assert_eq!(out.band_names(), &["B04", "SCL"]);

        // The canvas lies inside the source, so its own pixels are all filled
        let own = c.subgrid(&c.bbox()).unwrap();
        let inside = warp_stack(&src, &own).unwrap();
        assert!(inside.data().iter().all(|&v| v != ND));
        assert!(inside.band(1).unwrap().iter().all(|&v| v == 4.0));

        // Source rows increase southwards, so do warped rows
        let b = inside.band(0).unwrap();
        assert!(b[[0, 100]] < b[[199, 100]]);
    }

    #[test]
    fn test_warp_outside_source_is_nodata() {
        let src = utm_stack();
        let far = Canvas::for_bbox(&BBox::new(37.5, -1.0, 37.51, -0.99), DEFAULT_RESOLUTION, CRS::wgs84()).unwrap();
        let out = warp_stack(&src, &far).unwrap();
        assert!(out.data().iter().all(|&v| v == ND));
        assert!(warp_to_canvas(&src, &far).unwrap().is_none());
    }

    #[test]
    fn test_missing_crs_is_an_error() {
        let mut src = utm_stack();
        src.set_crs(None);
        assert!(warp_stack(&src, &canvas()).is_err());
    }
}
