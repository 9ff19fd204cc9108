//! Cloud, cloud-shadow and bad-pixel masking of Sentinel-2 scenes
//!
//! - **scl**: Scene Classification Layer lookups
//! - **spectral**: green/red brightness rule
//! - **neural**: segmentation model adapter (padding, sigmoid, threshold)
//! - **onnx**: exported segmentation networks, behind the `onnx` feature
//! - **shadow**: sun-geometry shadow projection with dark-pixel refinement
//! - **engine**: combines the above into one buffered invalid mask

/// Sentinel-2 L2A digital number treated as full-scale when bands are normalized
pub const SATURATION_DN: f32 = 4095.0;

mod engine;
mod neural;
#[cfg(feature = "onnx")]
mod onnx;
pub mod scl;
mod shadow;
mod spectral;

pub use engine::{apply_mask, BandRoles, CloudClassifier, CloudMasker, MaskingParams, SceneBands, SceneMask};
pub use neural::{padded_len, reflect_pad, segment_clouds, sigmoid, PixelwiseModel, SegmentationModel, PAD_MULTIPLE};
#[cfg(feature = "onnx")]
pub use onnx::OnnxModel;
pub use shadow::{
    dark_pixels, potential_shadow, shadow_mask, shadow_shift, shift_mask, GroundPixel, ShadowParams, SunGeometry,
};
pub use spectral::{spectral_cloud_mask, SpectralThresholds};
