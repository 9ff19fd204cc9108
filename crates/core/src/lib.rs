//! # Clearsky Core
//!
//! Core types, traits and I/O for the clearsky Sentinel-2 compositing pipeline.
//!
//! This crate provides:
//! - `Raster<T>` and `RasterStack<T>`: single and multi-band georeferenced grids
//! - `MaskedGrid`: a value grid paired with a validity bitmap
//! - `GeoTransform`, `CRS`, `BBox` and the projections the pipeline needs
//!   (geographic, UTM, EPSG:6933 equal-area)
//! - A GeoTIFF codec: windowed reader and tiled, compressed writer
//! - Algorithm traits for consistent API

pub mod bbox;
pub mod crs;
pub mod error;
pub mod io;
pub mod raster;

pub use bbox::BBox;
pub use crs::{Projection, CRS};
pub use error::{Error, Result};
pub use raster::{GeoTransform, MaskedGrid, Raster, RasterElement, RasterStack};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::bbox::BBox;
    pub use crate::crs::{Projection, CRS};
    pub use crate::error::{Error, Result};
    pub use crate::raster::{GeoTransform, MaskedGrid, Raster, RasterElement, RasterStack};
    pub use crate::Algorithm;
}

/// Core trait for the pixel algorithms of the pipeline.
///
/// Algorithms are pure functions that transform input data according to parameters.
pub trait Algorithm {
    /// Input type for the algorithm
    type Input;
    /// Output type for the algorithm
    type Output;
    /// Parameters controlling algorithm behavior
    type Params: Default;
    /// Error type for algorithm execution
    type Error: std::error::Error;

    /// Returns the algorithm name
    fn name(&self) -> &'static str;

    /// Returns a description of what the algorithm does
    fn description(&self) -> &'static str;

    /// Execute the algorithm
    fn execute(&self, input: Self::Input, params: Self::Params) -> std::result::Result<Self::Output, Self::Error>;

    /// Execute with default parameters
    fn execute_default(&self, input: Self::Input) -> std::result::Result<Self::Output, Self::Error> {
        self.execute(input, Self::Params::default())
    }
}
