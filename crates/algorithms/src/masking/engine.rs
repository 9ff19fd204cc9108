//! Per-scene invalid mask: cloud, bad pixels, shadow, buffering
//!
//! ```text
//! invalid = dilate(cloud | bad | shadow(cloud), disk(buffer_radius))
//! ```
//!
//! `cloud` comes from the configured classifier, `bad` from SCL codes and
//! `shadow` from projecting `cloud` along the sun direction.

use std::sync::Arc;

use ndarray::{Array2, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};

use clearsky_core::raster::{MaskedGrid, RasterStack};
use clearsky_core::{Error, Result};

use super::neural::{segment_clouds, SegmentationModel};
use super::scl::{self, BAD_PIXEL_CLASSES, CLOUD_CLASSES};
use super::shadow::{shadow_mask, GroundPixel, ShadowParams, SunGeometry};
use super::spectral::{spectral_cloud_mask, SpectralThresholds};
use super::SATURATION_DN;
use crate::morphology::{dilate, StructuringElement};

/// Which cloud classifier feeds the mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudClassifier {
    /// SCL cloud and cirrus codes only
    Scl,
    /// Green/red spectral rule only
    Spectral,
    /// Union of the SCL lookup and the spectral rule
    #[default]
    SclAndSpectral,
    /// Neural segmentation model
    Neural,
}

/// Names of the stack bands the masking rules read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandRoles {
    pub green: String,
    pub red: String,
    pub nir: String,
    pub scl: String,
}

impl Default for BandRoles {
    fn default() -> Self {
        Self {
            green: "B03".into(),
            red: "B04".into(),
            nir: "B08".into(),
            scl: "SCL".into(),
        }
    }
}

/// Masking configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskingParams {
    pub classifier: CloudClassifier,
    pub bands: BandRoles,
    pub scl_cloud_classes: Vec<u8>,
    pub scl_bad_classes: Vec<u8>,
    pub spectral: SpectralThresholds,
    pub shadow: ShadowParams,
    /// Radius in pixels of the disk the final mask is dilated with
    pub buffer_radius: usize,
    /// Scenes with a larger invalid fraction are excluded
    pub max_invalid_fraction: f64,
    /// Stored band value of one L2A digital number. Spectral and dark-pixel
    /// thresholds are digital numbers and are multiplied by this before use.
    pub dn_scale: f32,
    /// Sigmoid probability above which the neural classifier marks cloud
    pub probability_threshold: f32,
}

impl Default for MaskingParams {
    fn default() -> Self {
        Self {
            classifier: CloudClassifier::default(),
            bands: BandRoles::default(),
            scl_cloud_classes: CLOUD_CLASSES.to_vec(),
            scl_bad_classes: BAD_PIXEL_CLASSES.to_vec(),
            spectral: SpectralThresholds::default(),
            shadow: ShadowParams::default(),
            buffer_radius: 12,
            max_invalid_fraction: 0.85,
            dn_scale: 1.0 / SATURATION_DN,
            probability_threshold: 0.5,
        }
    }
}

/// Borrowed bands of one scene
#[derive(Debug, Clone)]
pub struct SceneBands<'a> {
    /// Every non-SCL band in stack order; the neural classifier's input
    pub channels: Vec<ArrayView2<'a, f32>>,
    pub green: ArrayView2<'a, f32>,
    pub red: ArrayView2<'a, f32>,
    pub nir: ArrayView2<'a, f32>,
    pub scl: ArrayView2<'a, f32>,
    pub nodata: Option<f32>,
    /// Pixel size of the grid the bands sit on, when it is georeferenced
    pub ground_pixel: Option<GroundPixel>,
}

impl<'a> SceneBands<'a> {
    /// Look the bands up by name in a named stack
    pub fn from_stack(stack: &'a RasterStack<f32>, roles: &BandRoles) -> Result<Self> {
        let channels = stack
            .band_names()
            .iter()
            .filter(|name| **name != roles.scl)
            .map(|name| stack.band_by_name(name))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            channels,
            green: stack.band_by_name(&roles.green)?,
            red: stack.band_by_name(&roles.red)?,
            nir: stack.band_by_name(&roles.nir)?,
            scl: stack.band_by_name(&roles.scl)?,
            nodata: stack.nodata(),
            ground_pixel: GroundPixel::of_grid(stack.transform(), stack.crs(), stack.rows()),
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.scl.dim()
    }

    fn grid(&self, band: ArrayView2<'_, f32>) -> MaskedGrid {
        MaskedGrid::from_nodata(band, self.nodata)
    }
}

/// The invalid mask of one scene plus its summary
#[derive(Debug, Clone, PartialEq)]
pub struct SceneMask {
    /// True where the pixel must not enter the composite
    pub invalid: Array2<bool>,
    /// Invalid share of the pixels the scene has data for; 1 when it has none
    pub invalid_fraction: f64,
}

/// Computes scene masks from a fixed configuration
#[derive(Clone)]
pub struct CloudMasker {
    params: MaskingParams,
    model: Option<Arc<dyn SegmentationModel>>,
}

impl std::fmt::Debug for CloudMasker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudMasker")
            .field("params", &self.params)
            .field("model", &self.model.as_ref().map(|m| m.in_channels()))
            .finish()
    }
}

impl CloudMasker {
    pub fn new(params: MaskingParams) -> Self {
        Self { params, model: None }
    }

    /// Attach the network used by [`CloudClassifier::Neural`]
    pub fn with_model(mut self, model: Arc<dyn SegmentationModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn params(&self) -> &MaskingParams {
        &self.params
    }

    /// Cloud pixels according to the configured classifier
    pub fn cloud_mask(&self, bands: &SceneBands<'_>) -> Result<Array2<bool>> {
        let p = &self.params;
        let scl_cloud = || scl::class_mask(bands.scl, &p.scl_cloud_classes, bands.nodata);
        let spectral = || {
            spectral_cloud_mask(
                &bands.grid(bands.green),
                &bands.grid(bands.red),
                &p.spectral,
                p.dn_scale,
            )
        };

        match p.classifier {
            CloudClassifier::Scl => Ok(scl_cloud()),
            CloudClassifier::Spectral => spectral(),
            CloudClassifier::SclAndSpectral => Ok(scl::union(&scl_cloud(), &spectral()?)),
            CloudClassifier::Neural => {
                let model = self
                    .model
                    .as_deref()
                    .ok_or_else(|| Error::Algorithm("neural classifier selected but no model loaded".into()))?;
                segment_clouds(model, &bands.channels, bands.nodata, p.probability_threshold)
            }
        }
    }

    /// Full invalid mask of a scene
    pub fn mask(&self, bands: &SceneBands<'_>, sun: SunGeometry) -> Result<SceneMask> {
        let p = &self.params;
        let shape = bands.shape();
        for band in [bands.green, bands.red, bands.nir] {
            if band.dim() != shape {
                let (ar, ac) = band.dim();
                return Err(Error::SizeMismatch { er: shape.0, ec: shape.1, ar, ac });
            }
        }

        let cloud = self.cloud_mask(bands)?;
        let bad = scl::class_mask(bands.scl, &p.scl_bad_classes, bands.nodata);
        let shadow_params = ShadowParams {
            pixel_size: bands.ground_pixel.unwrap_or(p.shadow.pixel_size),
            ..p.shadow.clone()
        };
        let shadow = shadow_mask(
            &cloud,
            sun,
            &bands.grid(bands.nir),
            bands.scl,
            bands.nodata,
            &shadow_params,
            p.dn_scale,
        );

        let combined = Zip::from(&cloud)
            .and(&bad)
            .and(&shadow)
            .map_collect(|&c, &b, &s| c || b || s);
        let invalid = dilate(&combined, &StructuringElement::Disk(p.buffer_radius))?;

        let has_data = scl::data_mask(bands.scl, bands.nodata);
        let data_count = has_data.iter().filter(|&&d| d).count();
        let invalid_count = Zip::from(&invalid)
            .and(&has_data)
            .fold(0usize, |n, &i, &d| n + usize::from(i && d));
        let invalid_fraction = if data_count == 0 {
            1.0
        } else {
            invalid_count as f64 / data_count as f64
        };

        Ok(SceneMask {
            invalid,
            invalid_fraction,
        })
    }

    /// Whether a masked scene is clear enough to composite
    pub fn is_usable(&self, mask: &SceneMask) -> bool {
        mask.invalid_fraction <= self.params.max_invalid_fraction
    }
}

/// Write nodata into every band where `invalid` is set and drop `drop_band`.
///
/// Returns a new named stack; the input is untouched.
pub fn apply_mask(
    stack: &RasterStack<f32>,
    invalid: &Array2<bool>,
    nodata: f32,
    drop_band: Option<&str>,
) -> Result<RasterStack<f32>> {
    let (_, rows, cols) = stack.shape();
    if invalid.dim() != (rows, cols) {
        let (ar, ac) = invalid.dim();
        return Err(Error::SizeMismatch { er: rows, ec: cols, ar, ac });
    }

    let names = stack.band_names();
    let keep: Vec<usize> = (0..stack.band_count())
        .filter(|&i| match (drop_band, names.get(i)) {
            (Some(drop), Some(name)) => name != drop,
            _ => true,
        })
        .collect();

    let mut data = stack.data().select(Axis(0), &keep);
    let old_nodata = stack.nodata();
    for mut band in data.axis_iter_mut(Axis(0)) {
        Zip::from(&mut band).and(invalid).for_each(|v, &bad| {
            if bad || Some(*v) == old_nodata || !v.is_finite() {
                *v = nodata;
            }
        });
    }

    let mut out = RasterStack::from_array(data);
    out.set_transform(*stack.transform());
    out.set_crs(stack.crs().cloned());
    out.set_nodata(Some(nodata));
    if names.len() == stack.band_count() {
        out = out.with_band_names(keep.iter().map(|&i| names[i].clone()))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use clearsky_core::GeoTransform;
    use ndarray::Array3;

    const ND: f32 = -9999.0;

    /// B02, B03, B04, B08, SCL with uniform values, normalized by 4095
    fn scene(rows: usize, cols: usize, green: f32, red: f32, nir: f32, scl: f32) -> RasterStack<f32> {
        let mut data = Array3::from_elem((5, rows, cols), 0.05f32);
        data.index_axis_mut(Axis(0), 1).fill(green);
        data.index_axis_mut(Axis(0), 2).fill(red);
        data.index_axis_mut(Axis(0), 3).fill(nir);
        data.index_axis_mut(Axis(0), 4).fill(scl);
        let mut stack = RasterStack::from_array(data)
            .with_band_names(["B02", "B03", "B04", "B08", "SCL"])
            .unwrap();
        stack.set_nodata(Some(ND));
        stack.set_transform(GeoTransform::new(0.0, rows as f64, 1.0, -1.0));
        stack
    }

    fn sun() -> SunGeometry {
        SunGeometry { azimuth: 120.0, zenith: 30.0 }
    }

    #[test]
    fn test_all_cloud_scl_is_fully_invalid() {
        let stack = scene(40, 40, 0.05, 0.04, 0.5, 9.0);
        let bands = SceneBands::from_stack(&stack, &BandRoles::default()).unwrap();
        let masker = CloudMasker::new(MaskingParams::default());
        let mask = masker.mask(&bands, sun()).unwrap();
        assert!(mask.invalid.iter().all(|&v| v));
        assert_relative_eq!(mask.invalid_fraction, 1.0);
        assert!(!masker.is_usable(&mask));
    }

    #[test]
    fn test_all_clear_scene_is_valid() {
        let stack = scene(40, 40, 0.05, 0.04, 0.5, 4.0);
        let bands = SceneBands::from_stack(&stack, &BandRoles::default()).unwrap();
        let masker = CloudMasker::new(MaskingParams::default());
        assert!(masker.cloud_mask(&bands).unwrap().iter().all(|&v| !v));
        let mask = masker.mask(&bands, sun()).unwrap();
        assert!(mask.invalid.iter().all(|&v| !v));
        assert_relative_eq!(mask.invalid_fraction, 0.0);
        assert!(masker.is_usable(&mask));
    }

    #[test]
    fn test_single_cloud_is_buffered() {
        let mut stack = scene(41, 41, 0.05, 0.04, 0.5, 4.0);
        stack.band_mut(4).unwrap()[[20, 20]] = 8.0;
        let bands = SceneBands::from_stack(&stack, &BandRoles::default()).unwrap();
        let params = MaskingParams {
            buffer_radius: 3,
            ..MaskingParams::default()
        };
        let mask = CloudMasker::new(params).mask(&bands, sun()).unwrap();
        // NIR is bright, so the dark-pixel test removes all shadow
        let expected = StructuringElement::Disk(3).offsets().len();
        assert_eq!(mask.invalid.iter().filter(|&&v| v).count(), expected);
        assert!(mask.invalid[[20, 23]]);
        assert!(!mask.invalid[[20, 24]]);
    }

    #[test]
    fn test_spectral_rule_and_nodata_fraction() {
        let mut stack = scene(10, 10, 0.05, 0.04, 0.5, 4.0);
        // Left half has no data at all
        for b in 0..5 {
            stack.band_mut(b).unwrap().slice_mut(ndarray::s![.., ..5]).fill(ND);
        }
        // One very bright pixel in the right half
        stack.band_mut(1).unwrap()[[0, 9]] = 0.5;
        let bands = SceneBands::from_stack(&stack, &BandRoles::default()).unwrap();
        let params = MaskingParams {
            buffer_radius: 0,
            classifier: CloudClassifier::Spectral,
            ..MaskingParams::default()
        };
        let mask = CloudMasker::new(params).mask(&bands, sun()).unwrap();
        assert!(mask.invalid[[0, 9]]);
        assert_relative_eq!(mask.invalid_fraction, 1.0 / 50.0);
    }

    #[test]
    fn test_vegetation_is_not_cloud() {
        // Green above red, as over crops and forest, at ordinary brightness
        let dn = |v: f32| v / SATURATION_DN;
        let mut stack = scene(30, 30, dn(1000.0), dn(600.0), dn(3000.0), 4.0);
        stack.band_mut(0).unwrap().fill(dn(500.0));
        let bands = SceneBands::from_stack(&stack, &BandRoles::default()).unwrap();
        let masker = CloudMasker::new(MaskingParams::default());
        assert!(masker.cloud_mask(&bands).unwrap().iter().all(|&v| !v));
        assert!(masker.is_usable(&masker.mask(&bands, sun()).unwrap()));

        // The same rule on raw digital numbers
        let raw = scene(30, 30, 1000.0, 600.0, 3000.0, 4.0);
        let params = MaskingParams {
            dn_scale: 1.0,
            ..MaskingParams::default()
        };
        let bands = SceneBands::from_stack(&raw, &BandRoles::default()).unwrap();
        assert!(CloudMasker::new(params).cloud_mask(&bands).unwrap().iter().all(|&v| !v));

        // A bright green-leaning pixel is still cloud
        stack.band_mut(1).unwrap()[[3, 3]] = dn(1800.0);
        let bands = SceneBands::from_stack(&stack, &BandRoles::default()).unwrap();
        let cloud = masker.cloud_mask(&bands).unwrap();
        assert_eq!(cloud.iter().filter(|&&v| v).count(), 1);
    }

    #[test]
    fn test_shadow_follows_grid_pixel_size() {
        // Sun due south-east of a cloud at 60 N on a 0.0001 degree grid
        let mut stack = scene(120, 120, 0.05, 0.04, 0.05, 4.0);
        stack.set_transform(GeoTransform::new(10.0, 60.006, 0.0001, -0.0001));
        stack.set_crs(Some(clearsky_core::CRS::wgs84()));
        stack.band_mut(4).unwrap()[[10, 10]] = 9.0;
        let params = MaskingParams {
            buffer_radius: 0,
            classifier: CloudClassifier::Scl,
            shadow: ShadowParams {
                cloud_heights: vec![600.0],
                ..ShadowParams::default()
            },
            ..MaskingParams::default()
        };
        let sun = SunGeometry { azimuth: 315.0, zenith: 45.0 };
        let bands = SceneBands::from_stack(&stack, &BandRoles::default()).unwrap();
        let ground = bands.ground_pixel.unwrap();
        assert!(ground.x < 6.0 && ground.y > 11.0);

        // 424 m along each axis is 76 columns but only 38 rows
        let mask = CloudMasker::new(params).mask(&bands, sun).unwrap();
        assert!(mask.invalid[[48, 86]]);
        assert_eq!(mask.invalid.iter().filter(|&&v| v).count(), 2);
    }

    #[test]
    fn test_neural_without_model_fails() {
        let stack = scene(8, 8, 0.05, 0.04, 0.5, 4.0);
        let bands = SceneBands::from_stack(&stack, &BandRoles::default()).unwrap();
        let params = MaskingParams {
            classifier: CloudClassifier::Neural,
            ..MaskingParams::default()
        };
        assert!(CloudMasker::new(params).mask(&bands, sun()).is_err());
    }

    #[test]
    fn test_neural_with_model() {
        use crate::masking::PixelwiseModel;
        let stack = scene(8, 8, 0.6, 0.04, 0.5, 4.0);
        let bands = SceneBands::from_stack(&stack, &BandRoles::default()).unwrap();
        assert_eq!(bands.channels.len(), 4);
        let model = PixelwiseModel { weights: vec![0.0, 10.0, 0.0, 0.0], bias: -3.0 };
        let params = MaskingParams {
            classifier: CloudClassifier::Neural,
            ..MaskingParams::default()
        };
        let masker = CloudMasker::new(params).with_model(Arc::new(model));
        assert!(masker.cloud_mask(&bands).unwrap().iter().all(|&v| v));
    }

    #[test]
    fn test_apply_mask_drops_scl() {
        let stack = scene(4, 4, 0.05, 0.04, 0.5, 4.0);
        let mut invalid = Array2::from_elem((4, 4), false);
        invalid[[1, 2]] = true;
        let masked = apply_mask(&stack, &invalid, ND, Some("SCL")).unwrap();
        assert_eq!(masked.band_count(), 4);
        assert_eq!(masked.band_names(), &["B02", "B03", "B04", "B08"]);
        for b in 0..4 {
            let band = masked.band(b).unwrap();
            assert_eq!(band[[1, 2]], ND);
            assert_ne!(band[[0, 0]], ND);
        }
        assert_eq!(masked.nodata(), Some(ND));
        assert!(apply_mask(&stack, &Array2::from_elem((3, 4), false), ND, None).is_err());
    }
}
