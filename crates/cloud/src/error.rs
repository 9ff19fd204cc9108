//! Error types for remote reads and catalog access.

use thiserror::Error;

/// Errors produced by the cloud layer.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server does not support Range requests for {url}")]
    RangeNotSupported { url: String },

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid catalog response: {0}")]
    Catalog(String),

    #[error("invalid scene metadata: {0}")]
    Metadata(String),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("no IFD entries found in TIFF")]
    NoIfd,

    #[error("overview {index} out of range (have {count})")]
    OverviewOutOfRange { index: usize, count: usize },

    #[error("bbox does not intersect raster extent")]
    BBoxOutside,

    #[error("core error: {0}")]
    Core(#[from] clearsky_core::Error),
}

/// Result alias for cloud operations.
pub type Result<T> = std::result::Result<T, CloudError>;
