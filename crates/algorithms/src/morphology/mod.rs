//! Binary morphology for validity masks
//!
//! Masked regions are buffered by dilating them with a structuring element
//! (a disk by default) so that cloud edges and thin haze around them are
//! masked as well.

mod dilate;
mod element;

pub use dilate::{dilate, Dilate, DilateParams};
pub use element::{Run, StructuringElement};
