//! Temporal compositing
//!
//! Masked, canvas-aligned scene stacks are reduced pixel by pixel along
//! time with a nodata-aware median (or mean). Pixels masked in every scene
//! stay nodata.

mod compositor;
mod kernels;

pub use compositor::{CompositeSummary, Compositor, DEFAULT_BATCH_ROWS};
pub use kernels::{composite_layers, mark_missing, Statistic};
