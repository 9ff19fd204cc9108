//! # Clearsky Cloud
//!
//! Remote access for the clearsky pipeline: Cloud Optimized GeoTIFF reads
//! over HTTP Range requests, STAC Item Search, and Sentinel-2 tile metadata.
//!
//! Remote COG reads fetch only the blocks a window needs, concurrently and
//! through an LRU cache. Headers are parsed with the IFD and block codecs of
//! `clearsky-core`; local files go through the `tiff` crate instead.
//!
//! ## Features
//!
//! - `native` (default): blocking wrappers that own a Tokio runtime

pub mod cache;
pub mod cog_reader;
pub mod error;
pub mod http;
pub mod stac_client;
pub mod stac_models;
pub mod sun_angles;

pub mod sync_api;

pub use cog_reader::{CogMetadata, CogReader, CogReaderOptions};
pub use error::{CloudError, Result};
pub use http::HttpClient;
pub use stac_client::{StacCatalog, StacClient, StacClientOptions};
pub use stac_models::{SortDirection, StacAsset, StacItem, StacItemCollection, StacSearchParams};
pub use sun_angles::{parse_sun_angles, SunAngles};

/// Blocking API re-exported as `blocking` module (native only).
#[cfg(feature = "native")]
pub mod blocking {
    pub use crate::sync_api::*;
}
