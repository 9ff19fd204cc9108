//! Blank-canvas alignment
//!
//! Scenes rarely cover the whole request bbox. Each scene stack is merged
//! over a nodata canvas spanning the bbox, so that every stack of a window
//! shares one shape and transform before masking and compositing.

mod canvas;
mod merge;

pub use canvas::{Canvas, DEFAULT_RESOLUTION};
pub use merge::{align_to_canvas, mosaic, Alignment, MergeMethod};
