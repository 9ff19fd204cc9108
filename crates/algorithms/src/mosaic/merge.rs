//! Mosaicking aligned stacks onto a canvas

use serde::{Deserialize, Serialize};
use tracing::debug;

use clearsky_core::raster::RasterStack;
use clearsky_core::{Error, Result};

use super::canvas::Canvas;

/// How overlapping valid samples combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMethod {
    /// The first source with a valid sample wins
    #[default]
    First,
    /// Valid samples are added
    Sum,
}

/// Result of aligning one stack to the canvas
#[derive(Debug, Clone)]
pub enum Alignment {
    /// The stack already covers the canvas exactly
    Unchanged,
    /// The stack merged onto the full canvas extent
    Merged(RasterStack<f32>),
}

fn is_valid(v: f32, nodata: Option<f32>) -> bool {
    v.is_finite() && nodata != Some(v)
}

/// Merge `sources` onto `canvas`. Cells no source covers hold `nodata`.
///
/// Every source must sit on the canvas pixel lattice and carry the same
/// band count. Band names come from the first source.
pub fn mosaic(
    sources: &[&RasterStack<f32>],
    canvas: &Canvas,
    method: MergeMethod,
    nodata: f32,
) -> Result<RasterStack<f32>> {
    let first = sources
        .first()
        .ok_or_else(|| Error::Algorithm("mosaic needs at least one source".into()))?;
    let bands = first.band_count();

    let mut out = canvas.blank_stack(bands, nodata);
    for (i, src) in sources.iter().enumerate() {
        if src.band_count() != bands {
            return Err(Error::GridMismatch(format!(
                "source {} has {} bands, expected {}",
                i,
                src.band_count(),
                bands
            )));
        }
        let (row_off, col_off) = canvas.offset_of(src.transform())?;
        let (_, rows, cols) = src.shape();
        let src_nodata = src.nodata();

        // Overlap of the source with the canvas, in source pixel coordinates
        let r0 = (-row_off).max(0) as usize;
        let c0 = (-col_off).max(0) as usize;
        let r1 = (canvas.rows as isize - row_off).clamp(0, rows as isize) as usize;
        let c1 = (canvas.cols as isize - col_off).clamp(0, cols as isize) as usize;
        if r0 >= r1 || c0 >= c1 {
            debug!(source = i, "source does not overlap the canvas");
            continue;
        }

        let out_data = out.data_mut();
        let src_data = src.data();
        for b in 0..bands {
            for r in r0..r1 {
                let orow = (r as isize + row_off) as usize;
                for c in c0..c1 {
                    let v = src_data[[b, r, c]];
                    if !is_valid(v, src_nodata) {
                        continue;
                    }
                    let cell = &mut out_data[[b, orow, (c as isize + col_off) as usize]];
                    *cell = match method {
                        _ if !is_valid(*cell, Some(nodata)) => v,
                        MergeMethod::First => *cell,
                        MergeMethod::Sum => *cell + v,
                    };
                }
            }
        }
    }

    if first.band_names().len() == bands {
        out = out.with_band_names(first.band_names().iter().cloned())?;
    }
    Ok(out)
}

/// Bring a scene stack to the full canvas extent.
///
/// A stack that already matches the canvas grid is left alone; otherwise it
/// is mosaicked, first, over a blank canvas.
pub fn align_to_canvas(stack: &RasterStack<f32>, canvas: &Canvas, method: MergeMethod) -> Result<Alignment> {
    let (_, rows, cols) = stack.shape();
    if canvas.matches(stack.transform(), rows, cols) {
        return Ok(Alignment::Unchanged);
    }
    let nodata = stack.nodata().unwrap_or(f32::NAN);
    let merged = mosaic(&[stack], canvas, method, nodata)?;
    Ok(Alignment::Merged(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clearsky_core::bbox::BBox;
    use clearsky_core::crs::CRS;
    use ndarray::Array3;

    const ND: f32 = -9999.0;

    fn canvas() -> Canvas {
        Canvas::for_bbox(&BBox::new(0.0, 0.0, 10.0, 8.0), 1.0, CRS::wgs84()).unwrap()
    }

    fn patch(canvas: &Canvas, row: usize, col: usize, rows: usize, cols: usize, value: f32) -> RasterStack<f32> {
        let mut s = RasterStack::from_array(Array3::from_elem((2, rows, cols), value))
            .with_band_names(["B02", "SCL"])
            .unwrap();
        s.set_transform(canvas.transform.window_origin(col, row));
        s.set_nodata(Some(ND));
        s
    }

    #[test]
    fn test_partial_scene_is_padded_to_canvas() {
        let c = canvas();
        let scene = patch(&c, 2, 3, 4, 5, 0.5);
        let Alignment::Merged(full) = align_to_canvas(&scene, &c, MergeMethod::First).unwrap() else {
            panic!("expected a merge");
        };
        assert_eq!(full.shape(), (2, 8, 10));
        assert!(c.matches(full.transform(), 8, 10));
        assert_eq!(full.band_names(), &["B02", "SCL"]);
        let valid = full.data().iter().filter(|&&v| v != ND).count();
        assert_eq!(valid, 2 * 4 * 5);
        assert_eq!(full.data()[[0, 2, 3]], 0.5);
        assert_eq!(full.data()[[1, 5, 7]], 0.5);
        assert_eq!(full.data()[[0, 6, 3]], ND);
    }

    #[test]
    fn test_fast_path_for_full_extent() {
        let c = canvas();
        let scene = patch(&c, 0, 0, 8, 10, 0.1);
        assert!(matches!(align_to_canvas(&scene, &c, MergeMethod::First).unwrap(), Alignment::Unchanged));
    }

    #[test]
    fn test_first_and_sum() {
        let c = canvas();
        let mut a = patch(&c, 0, 0, 2, 2, 1.0);
        a.data_mut()[[0, 0, 0]] = ND;
        let b = patch(&c, 0, 1, 2, 2, 2.0);

        let first = mosaic(&[&a, &b], &c, MergeMethod::First, ND).unwrap();
        assert_eq!(first.data()[[0, 0, 0]], ND);
        assert_eq!(first.data()[[0, 0, 1]], 1.0);
        assert_eq!(first.data()[[0, 0, 2]], 2.0);

        let sum = mosaic(&[&a, &b], &c, MergeMethod::Sum, ND).unwrap();
        assert_eq!(sum.data()[[0, 0, 1]], 3.0);
        assert_eq!(sum.data()[[0, 1, 0]], 1.0);
    }

    #[test]
    fn test_source_clipped_to_canvas() {
        let c = canvas();
        let mut s = patch(&c, 0, 0, 3, 3, 4.0);
        let mut t = c.transform;
        t.origin_x -= 1.0;
        t.origin_y += 1.0;
        s.set_transform(t);
        let out = mosaic(&[&s], &c, MergeMethod::First, ND).unwrap();
        assert_eq!(out.data().iter().filter(|&&v| v == 4.0).count(), 2 * 2 * 2);
    }

    #[test]
    fn test_band_count_mismatch() {
        let c = canvas();
        let a = patch(&c, 0, 0, 2, 2, 1.0);
        let mut b = RasterStack::from_array(Array3::from_elem((3, 2, 2), 1.0f32));
        b.set_transform(c.transform);
        assert!(mosaic(&[&a, &b], &c, MergeMethod::First, ND).is_err());
        assert!(mosaic(&[], &c, MergeMethod::First, ND).is_err());
    }
}
