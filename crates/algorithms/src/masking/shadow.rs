//! Cloud shadow projection from sun geometry
//!
//! A cloud at height `h` casts its shadow `tan(zenith) * h` metres away
//! along the sun azimuth. The cloud mask is shifted once per assumed cloud
//! height and the shifted masks are unioned. Cells shifted in from outside
//! the grid are clear; nothing wraps around.

use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

use clearsky_core::crs::{metres_per_degree, CRS};
use clearsky_core::raster::MaskedGrid;
use clearsky_core::GeoTransform;

use super::scl;

/// Scene-mean solar angles in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SunGeometry {
    pub azimuth: f64,
    pub zenith: f64,
}

/// Ground size of one pixel in metres along each grid axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroundPixel {
    pub x: f64,
    pub y: f64,
}

impl GroundPixel {
    pub fn square(size: f64) -> Self {
        Self { x: size, y: size }
    }

    /// Pixel size of a `rows`-high grid. Geographic grids are measured at
    /// their centre latitude; `None` without a CRS.
    pub fn of_grid(transform: &GeoTransform, crs: Option<&CRS>, rows: usize) -> Option<Self> {
        let (w, h) = (transform.pixel_width.abs(), transform.pixel_height.abs());
        if !crs?.is_geographic() {
            return Some(Self { x: w, y: h });
        }
        let centre_lat = transform.origin_y + transform.pixel_height * rows as f64 / 2.0;
        let (per_lon, per_lat) = metres_per_degree(centre_lat);
        Some(Self {
            x: w * per_lon,
            y: h * per_lat,
        })
    }
}

/// Parameters of the shadow projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowParams {
    /// Assumed cloud-base heights in metres
    pub cloud_heights: Vec<f64>,
    /// Subtracted from the sun azimuth before projecting. Turns the
    /// illumination direction into the shadow direction in grid axes.
    pub azimuth_offset: f64,
    /// Pixel size used when the scene grid does not provide one
    pub pixel_size: GroundPixel,
    /// Keep only projected shadow cells that are also dark
    pub dark_pixel_refinement: bool,
    /// NIR digital number below which a pixel counts as dark
    pub dark_nir_threshold: f32,
    /// SCL class excluded from the dark-pixel test
    pub water_class: u8,
}

impl Default for ShadowParams {
    fn default() -> Self {
        Self {
            cloud_heights: vec![400.0, 600.0, 800.0, 1000.0],
            azimuth_offset: 270.0,
            pixel_size: GroundPixel::square(10.0),
            dark_pixel_refinement: true,
            dark_nir_threshold: 1500.0,
            water_class: scl::class::WATER,
        }
    }
}

/// `(row_shift, col_shift)` in pixels for one cloud height.
///
/// Angles are radians, after the azimuth offset. The shadow length is
/// rounded to whole metres first, then each component to whole pixels of
/// its own axis, both with ties to even.
pub fn shadow_shift(height: f64, azimuth_rad: f64, zenith_rad: f64, pixel: GroundPixel) -> (isize, isize) {
    let length = (zenith_rad.tan() * height).round_ties_even();
    let dx = (azimuth_rad.cos() * length / pixel.x).round_ties_even();
    let dy = (azimuth_rad.sin() * length / pixel.y).round_ties_even();
    (dy as isize, dx as isize)
}

/// Shift a mask by `(dy, dx)` cells; positive values move content down/right.
pub fn shift_mask(mask: ArrayView2<'_, bool>, dy: isize, dx: isize) -> Array2<bool> {
    let (rows, cols) = mask.dim();
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let sr = r as isize - dy;
        let sc = c as isize - dx;
        sr >= 0 && sc >= 0 && (sr as usize) < rows && (sc as usize) < cols && mask[[sr as usize, sc as usize]]
    })
}

/// Union of the cloud mask shifted for every cloud height
pub fn potential_shadow(cloud: &Array2<bool>, sun: SunGeometry, params: &ShadowParams) -> Array2<bool> {
    let azimuth = (sun.azimuth - params.azimuth_offset).to_radians();
    let zenith = sun.zenith.to_radians();

    let mut shadow = Array2::from_elem(cloud.dim(), false);
    for &height in &params.cloud_heights {
        let (dy, dx) = shadow_shift(height, azimuth, zenith, params.pixel_size);
        let shifted = shift_mask(cloud.view(), dy, dx);
        Zip::from(&mut shadow).and(&shifted).for_each(|s, &v| *s = *s || v);
    }
    shadow
}

/// Dark, non-water pixels: `nir < threshold AND scl != water`.
pub fn dark_pixels(
    nir: &MaskedGrid,
    scl_band: ArrayView2<'_, f32>,
    nodata: Option<f32>,
    params: &ShadowParams,
    dn_scale: f32,
) -> Array2<bool> {
    let dark = nir.test(|v| v < params.dark_nir_threshold * dn_scale);
    let water = scl::class_mask(scl_band, &[params.water_class], nodata);
    Zip::from(&dark).and(&water).map_collect(|&d, &w| d && !w)
}

/// Shadow mask of a scene: projected shadow, optionally refined by darkness.
pub fn shadow_mask(
    cloud: &Array2<bool>,
    sun: SunGeometry,
    nir: &MaskedGrid,
    scl_band: ArrayView2<'_, f32>,
    nodata: Option<f32>,
    params: &ShadowParams,
    dn_scale: f32,
) -> Array2<bool> {
    let shadow = potential_shadow(cloud, sun, params);
    if !params.dark_pixel_refinement {
        return shadow;
    }
    let dark = dark_pixels(nir, scl_band, nodata, params, dn_scale);
    Zip::from(&shadow).and(&dark).map_collect(|&s, &d| s && d)
}
