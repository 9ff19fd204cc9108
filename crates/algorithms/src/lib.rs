//! # Clearsky Algorithms
//!
//! Pixel kernels of the clearsky compositing pipeline.
//!
//! ## Modules
//!
//! - **masking**: SCL, spectral and neural cloud masks, cloud shadows, buffering
//! - **morphology**: binary dilation with square, disk or custom elements
//! - **mosaic**: analysis canvas and merging of scene stacks onto it
//! - **warp**: nearest-neighbour reprojection onto the canvas
//! - **compositing**: nodata-aware median/mean along time, row batched
//! - **indices**: NDVI and other normalized differences of composites
//! - **preview**: percentile-stretched 8-bit RGB quicklooks

pub mod compositing;
pub mod indices;
pub mod masking;
pub(crate) mod maybe_rayon;
pub mod morphology;
pub mod mosaic;
pub mod preview;
pub mod warp;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::compositing::{Compositor, CompositeSummary, Statistic};
    pub use crate::indices::{ndvi, normalized_difference};
    pub use crate::masking::{
        apply_mask, BandRoles, CloudClassifier, CloudMasker, MaskingParams, SceneBands, SceneMask,
        SegmentationModel, SunGeometry,
    };
    pub use crate::morphology::{dilate, StructuringElement};
    pub use crate::mosaic::{align_to_canvas, mosaic, Alignment, Canvas, MergeMethod, DEFAULT_RESOLUTION};
    pub use crate::preview::{rgb_preview, PreviewParams};
    pub use crate::warp::{warp_stack, warp_to_canvas};
    pub use clearsky_core::prelude::*;
}
