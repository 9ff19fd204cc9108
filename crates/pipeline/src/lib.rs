//! # Clearsky Pipeline
//!
//! Sentinel-2 acquisition and compositing for one region and date range:
//!
//! 1. search the STAC catalog, keeping the clearest scenes per grid tile and
//!    relaxing cloud cover until the bbox is fully covered;
//! 2. read each scene's bands over the bbox only, resample them onto a
//!    shared geographic grid and pad them to the full canvas;
//! 3. mask cloud, cloud shadow and bad pixels, excluding scenes that are
//!    mostly invalid;
//! 4. reduce the masked scenes to a per-pixel median composite.
//!
//! Every step takes its settings from an explicit [`PipelineConfig`].
//! Intermediate files are reused on a second run, so interrupted windows
//! resume.
//!
//! ```no_run
//! use clearsky_pipeline::prelude::*;
//! use chrono::NaiveDate;
//!
//! let config = PipelineConfig::load(None)?;
//! let mut pipeline = Pipeline::from_config(config)?;
//! let end = NaiveDate::from_ymd_opt(2022, 6, 1).unwrap();
//! let window = AcquisitionWindow::ending_at("after", end, 70, 24.0);
//! let output = pipeline.run_window(&window, &BBox::new(36.80, -1.30, 36.82, -1.28))?;
//! println!("{}", output.composite.display());
//! # Ok::<(), clearsky_pipeline::PipelineError>(())
//! ```

pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod geometry;
pub mod pipeline;
pub mod scene;
pub mod task;

pub use catalog::{
    build_collection, fetch_collection, search_with_backoff, CollectionFilter, SceneCatalog, SearchRequest,
    StacSceneCatalog,
};
pub use config::{CloudCoverBackoff, Normalization, PipelineConfig};
pub use download::{read_named_stack, AssetReader, DownloadedScene, Downloader, RemoteAssetReader};
pub use error::{CatalogError, CompositingError, DownloadError, MaskingError, PipelineError, Result};
pub use pipeline::{build_masker, AcquisitionWindow, Pipeline, SceneReport, WindowOutput};
pub use scene::{BandId, Collection, Scene};
pub use task::{run_task, HttpTaskControl, TaskControl, TaskOutcome, TaskParams, TaskResults, TaskStatus};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::PipelineConfig;
    pub use crate::error::{PipelineError, Result};
    pub use crate::pipeline::{AcquisitionWindow, Pipeline, WindowOutput};
    pub use crate::scene::{BandId, Collection, Scene};
    pub use clearsky_core::BBox;
}
