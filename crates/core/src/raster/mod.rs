//! Raster data structures and operations

mod element;
mod geotransform;
mod grid;
mod masked;
mod stack;
mod window;

pub use element::{sample_format, RasterElement};
pub use geotransform::GeoTransform;
pub use grid::{Raster, RasterStatistics};
pub use masked::MaskedGrid;
pub use stack::RasterStack;
pub use window::PixelWindow;
