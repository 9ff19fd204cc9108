//! Error taxonomy of the acquisition pipeline
//!
//! Catalog errors are recoverable by relaxing cloud cover. Download and
//! masking errors abort the scene (and with it the window). Compositing
//! errors abort the window.

use chrono::NaiveDate;
use thiserror::Error;

use clearsky_cloud::CloudError;

/// The catalog could not produce a usable collection
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("no scenes with cloud cover below {max_cloud_cover}% over bbox {bbox:?}")]
    EmptyCollection { max_cloud_cover: f64, bbox: [f64; 4] },

    #[error("only {count} scenes for grid tile {tile} with cloud cover below {max_cloud_cover}%")]
    InsufficientTileCount {
        tile: String,
        count: usize,
        max_cloud_cover: f64,
    },

    #[error("scenes cover {coverage}% of bbox {bbox:?}")]
    IncompleteCoverage { coverage: u32, bbox: [f64; 4] },

    #[error("catalog search failed: {0}")]
    Search(#[from] CloudError),

    #[error("scene {id} is malformed: {reason}")]
    InvalidScene { id: String, reason: String },
}

impl CatalogError {
    /// Whether a wider cloud-cover limit could fix this
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::EmptyCollection { .. } | Self::InsufficientTileCount { .. } | Self::IncompleteCoverage { .. }
        )
    }
}

/// Fetching or preparing one scene's bands failed
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("scene {scene} has no asset for band {band}")]
    MissingAsset { scene: String, band: String },

    #[error("scene {scene} does not overlap the bbox")]
    NoOverlap { scene: String },

    #[error("scene {scene}: remote read failed: {source}")]
    Remote {
        scene: String,
        #[source]
        source: CloudError,
    },

    #[error("scene {scene}: {source}")]
    Raster {
        scene: String,
        #[source]
        source: clearsky_core::Error,
    },

    #[error("scene {scene}: {source}")]
    Io {
        scene: String,
        #[source]
        source: std::io::Error,
    },
}

/// Classifying one scene failed
#[derive(Error, Debug)]
pub enum MaskingError {
    #[error("cloud model {path}: {reason}")]
    Model { path: String, reason: String },

    #[error("scene {scene}: {source}")]
    Scene {
        scene: String,
        #[source]
        source: clearsky_core::Error,
    },
}

/// Reducing a window's scenes failed
#[derive(Error, Debug)]
pub enum CompositingError {
    #[error("no valid scenes to composite in window {window}")]
    NoValidScenes { window: String },

    #[error("compositing window {window}: {source}")]
    Raster {
        window: String,
        #[source]
        source: clearsky_core::Error,
    },
}

/// Top-level pipeline error
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid date range: end {end} is not after start {start}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("cloud cover relaxed up to {ceiling}% without a usable collection: {last}")]
    BackoffExhausted {
        ceiling: f64,
        #[source]
        last: CatalogError,
    },

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Masking(#[from] MaskingError),

    #[error(transparent)]
    Compositing(#[from] CompositingError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("task API error: {0}")]
    Task(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("raster error: {0}")]
    Raster(#[from] clearsky_core::Error),

    #[error("remote error: {0}")]
    Cloud(#[from] CloudError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl PipelineError {
    /// Short explanation suitable for the task status shown to users
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidDateRange { .. } => "The end date must be after the start date.".to_string(),
            Self::BackoffExhausted { last, .. } | Self::Catalog(last) => match last {
                CatalogError::EmptyCollection { .. } => {
                    "No satellite imagery with low enough cloud cover was found for this region and period."
                        .to_string()
                }
                CatalogError::InsufficientTileCount { .. } => {
                    "Too few cloud-free satellite images were found for part of this region.".to_string()
                }
                CatalogError::IncompleteCoverage { coverage, .. } => {
                    format!("Available imagery covers only {coverage}% of the region.")
                }
                _ => "The imagery catalog could not be searched.".to_string(),
            },
            Self::Compositing(CompositingError::NoValidScenes { .. }) => {
                "Every image of the period was too cloudy to use.".to_string()
            }
            Self::Download(_) | Self::Cloud(_) => "Satellite imagery could not be downloaded.".to_string(),
            _ => "Processing failed unexpectedly.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_catalog_errors() {
        let empty = CatalogError::EmptyCollection {
            max_cloud_cover: 30.0,
            bbox: [0.0, 0.0, 1.0, 1.0],
        };
        assert!(empty.is_recoverable());
        let bad = CatalogError::InvalidScene {
            id: "x".into(),
            reason: "no geometry".into(),
        };
        assert!(!bad.is_recoverable());
    }

    #[test]
    fn test_user_messages() {
        let err = PipelineError::BackoffExhausted {
            ceiling: 50.0,
            last: CatalogError::IncompleteCoverage {
                coverage: 87,
                bbox: [0.0, 0.0, 1.0, 1.0],
            },
        };
        assert_eq!(err.user_message(), "Available imagery covers only 87% of the region.");
        let err = PipelineError::Compositing(CompositingError::NoValidScenes { window: "after".into() });
        assert!(err.user_message().contains("too cloudy"));
    }
}
