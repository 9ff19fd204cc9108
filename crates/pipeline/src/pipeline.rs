//! Acquisition window runner
//!
//! One window goes search -> download -> align -> mask -> composite. Scenes
//! are processed one at a time, and every scene is masked before the
//! compositor starts. Any scene error aborts the window.
//!
//! Window directory layout:
//!
//! ```text
//! <work_dir>/<name>_<start>_<end>/
//!     collection.json
//!     scenes/<scene id>/{B02.tif, ..., SCL.tif, sun.json, stack.tif,
//!                        stack_merged.tif, mask.json, stack_masked.tif}
//!     composite.tif
//!     ndvi.tif
//!     preview.tif
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use clearsky_algorithms::compositing::{CompositeSummary, Compositor};
use clearsky_algorithms::indices::ndvi;
#[cfg(feature = "onnx")]
use clearsky_algorithms::masking::OnnxModel;
use clearsky_algorithms::masking::{
    apply_mask, CloudClassifier, CloudMasker, PixelwiseModel, SceneBands, SegmentationModel,
};
use clearsky_algorithms::mosaic::{align_to_canvas, Alignment, Canvas};
use clearsky_algorithms::preview::{rgb_preview, PreviewParams};
use clearsky_core::crs::CRS;
use clearsky_core::io::{write_atomic, write_geotiff, write_stack, GeoTiffOptions};
use clearsky_core::BBox;

use crate::catalog::{search_with_backoff, CollectionFilter, SceneCatalog, SearchRequest, StacSceneCatalog};
use crate::config::{Normalization, PipelineConfig};
use crate::download::{is_complete, read_named_stack, AssetReader, DownloadedScene, Downloader, RemoteAssetReader};
use crate::error::{CompositingError, MaskingError, PipelineError, Result};
use crate::scene::{BandId, Collection, Scene};

pub const COLLECTION_FILE: &str = "collection.json";
pub const MERGED_FILE: &str = "stack_merged.tif";
pub const MASKED_FILE: &str = "stack_masked.tif";
pub const MASK_REPORT_FILE: &str = "mask.json";
pub const COMPOSITE_FILE: &str = "composite.tif";
pub const NDVI_FILE: &str = "ndvi.tif";
pub const PREVIEW_FILE: &str = "preview.tif";

/// Date range and starting cloud cover of one composite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionWindow {
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub initial_cloud_cover: f64,
}

impl AcquisitionWindow {
    pub fn new(name: impl Into<String>, start: NaiveDate, end: NaiveDate, initial_cloud_cover: f64) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            initial_cloud_cover,
        }
    }

    /// `[end - days_buffer, end]`
    pub fn ending_at(name: impl Into<String>, end: NaiveDate, days_buffer: i64, initial_cloud_cover: f64) -> Self {
        Self::new(name, end - Duration::days(days_buffer), end, initial_cloud_cover)
    }

    /// Directory name under the working directory
    pub fn dir_name(&self) -> String {
        format!("{}_{}_{}", self.name, self.start.format("%Y%m%d"), self.end.format("%Y%m%d"))
    }
}

/// Masking outcome of one scene, persisted as `mask.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneReport {
    pub scene_id: String,
    pub invalid_fraction: f64,
    pub usable: bool,
    /// Masked stack; absent for unusable scenes
    pub masked_path: Option<PathBuf>,
}

/// Everything one window produced
#[derive(Debug, Clone)]
pub struct WindowOutput {
    pub window: AcquisitionWindow,
    pub dir: PathBuf,
    pub collection: Collection,
    pub scenes: Vec<SceneReport>,
    pub composite: PathBuf,
    pub summary: CompositeSummary,
    pub ndvi: PathBuf,
    /// Only written when B02, B03 and B04 are all composited
    pub preview: Option<PathBuf>,
}

/// Cloud masker for `config`, with the model loaded for the neural classifier
pub fn build_masker(config: &PipelineConfig) -> Result<CloudMasker> {
    let mut params = config.masking.clone();
    params.dn_scale = match config.download.normalization {
        Normalization::Reflectance => 1.0 / config.download.saturation,
        Normalization::ScaledIntegers => 1.0,
    };
    let masker = CloudMasker::new(params);
    if config.masking.classifier != CloudClassifier::Neural {
        return Ok(masker);
    }

    let path = config.model_path.as_ref().ok_or_else(|| MaskingError::Model {
        path: String::new(),
        reason: "neural classifier selected without a model path".into(),
    })?;
    let channels = BandId::stack_order(&config.catalog.bands)
        .iter()
        .filter(|b| b.is_spectral())
        .count();
    let model = load_model(path, channels).map_err(|e| MaskingError::Model {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    info!(model = %path.display(), channels, "cloud model loaded");
    Ok(masker.with_model(model))
}

/// `.onnx` files are exported networks; anything else is a JSON pixelwise model.
fn load_model(path: &Path, channels: usize) -> clearsky_core::Result<Arc<dyn SegmentationModel>> {
    let is_onnx = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"));
    if !is_onnx {
        return Ok(Arc::new(PixelwiseModel::load(path)?));
    }
    #[cfg(feature = "onnx")]
    {
        Ok(Arc::new(OnnxModel::load(path, channels)?))
    }
    #[cfg(not(feature = "onnx"))]
    {
        let _ = channels;
        Err(clearsky_core::Error::Algorithm("built without the onnx feature".into()))
    }
}

/// Sequential acquisition pipeline over an explicit configuration
pub struct Pipeline {
    config: PipelineConfig,
    catalog: Box<dyn SceneCatalog>,
    reader: Box<dyn AssetReader>,
    downloader: Downloader,
    masker: CloudMasker,
    options: GeoTiffOptions,
}

impl Pipeline {
    /// Build from explicit catalog and reader implementations.
    ///
    /// Loads the cloud model when the neural classifier is configured.
    pub fn new(config: PipelineConfig, catalog: Box<dyn SceneCatalog>, reader: Box<dyn AssetReader>) -> Result<Self> {
        config.validate()?;

        let masker = build_masker(&config)?;
        let downloader = Downloader::new(&config.catalog.bands, config.download.clone(), config.grid.nodata);
        Ok(Self {
            config,
            catalog,
            reader,
            downloader,
            masker,
            options: GeoTiffOptions::default(),
        })
    }

    /// Pipeline over the configured STAC catalog and remote COGs
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let catalog = StacSceneCatalog::new(&config.catalog, &config.http)?;
        let reader = RemoteAssetReader::new(&config.http)?;
        Self::new(config, Box::new(catalog), Box::new(reader))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn masker(&self) -> &CloudMasker {
        &self.masker
    }

    pub fn window_dir(&self, window: &AcquisitionWindow) -> PathBuf {
        self.config.work_dir.join(window.dir_name())
    }

    pub fn scene_dir(&self, window: &AcquisitionWindow, scene: &Scene) -> PathBuf {
        self.window_dir(window).join("scenes").join(&scene.id)
    }

    /// Analysis grid over `bbox`
    pub fn canvas(&self, bbox: &BBox) -> Result<Canvas> {
        Ok(Canvas::for_bbox(bbox, self.config.grid.resolution, CRS::wgs84())?)
    }

    /// Search with cloud-cover backoff starting at the window's level
    pub fn search(&self, window: &AcquisitionWindow, bbox: &BBox) -> Result<Collection> {
        let request = SearchRequest::new(window.start, window.end, *bbox, window.initial_cloud_cover)?;
        let backoff = self.config.backoff.starting_at(window.initial_cloud_cover);
        info!(
            window = %window.name,
            start = %window.start,
            end = %window.end,
            levels = ?backoff.levels(),
            "searching catalog"
        );
        search_with_backoff(
            self.catalog.as_ref(),
            &request,
            CollectionFilter::from(&self.config.catalog),
            backoff,
        )
    }

    /// Download one scene into `dir`
    pub fn download(&mut self, scene: &Scene, bbox: &BBox, canvas: &Canvas, dir: &Path) -> Result<DownloadedScene> {
        Ok(self
            .downloader
            .download(self.reader.as_mut(), scene, bbox, canvas, dir)?)
    }

    /// Bring a downloaded stack to the full canvas extent as `stack_merged.tif`
    pub fn align(&self, scene: &DownloadedScene, canvas: &Canvas) -> Result<PathBuf> {
        let merged_path = scene.dir.join(MERGED_FILE);
        if is_complete(&merged_path) {
            return Ok(merged_path);
        }
        let stack = scene.load_stack()?;
        match align_to_canvas(&stack, canvas, self.config.grid.merge_method)? {
            Alignment::Unchanged => {
                write_atomic(&merged_path, |out| {
                    std::io::copy(&mut File::open(&scene.stack_path)?, out)?;
                    Ok(())
                })?;
                debug!(scene = %scene.scene_id, "stack already on canvas");
            }
            Alignment::Merged(merged) => {
                write_stack(&merged, &merged_path, &self.options)?;
                debug!(scene = %scene.scene_id, "stack merged onto canvas");
            }
        }
        Ok(merged_path)
    }

    /// Mask an aligned scene and write `stack_masked.tif` when it is usable
    pub fn mask_scene(&self, scene: &DownloadedScene, merged_path: &Path) -> Result<SceneReport> {
        let report_path = scene.dir.join(MASK_REPORT_FILE);
        let previous = std::fs::read_to_string(&report_path)
            .ok()
            .and_then(|text| serde_json::from_str::<SceneReport>(&text).ok());
        if let Some(report) = previous {
            if report.masked_path.as_deref().map_or(true, is_complete) {
                debug!(scene = %scene.scene_id, "mask report present, skipping");
                return Ok(report);
            }
        }

        let scene_err = |source: clearsky_core::Error| MaskingError::Scene {
            scene: scene.scene_id.clone(),
            source,
        };
        let stack = read_named_stack(merged_path, &scene.band_names()).map_err(scene_err)?;
        let bands = SceneBands::from_stack(&stack, &self.masker.params().bands).map_err(scene_err)?;
        let mask = self.masker.mask(&bands, scene.sun).map_err(scene_err)?;
        let usable = self.masker.is_usable(&mask);

        let masked_path = if usable {
            let path = scene.dir.join(MASKED_FILE);
            let masked = apply_mask(&stack, &mask.invalid, self.config.grid.nodata, Some(BandId::Scl.name()))
                .map_err(scene_err)?;
            write_stack(&masked, &path, &self.options).map_err(scene_err)?;
            Some(path)
        } else {
            warn!(
                scene = %scene.scene_id,
                invalid_fraction = mask.invalid_fraction,
                ceiling = self.masker.params().max_invalid_fraction,
                "scene too cloudy, excluded"
            );
            None
        };

        let report = SceneReport {
            scene_id: scene.scene_id.clone(),
            invalid_fraction: mask.invalid_fraction,
            usable,
            masked_path,
        };
        write_atomic(&report_path, |out| {
            serde_json::to_writer_pretty(out, &report).map_err(std::io::Error::from)?;
            Ok(())
        })?;
        info!(scene = %scene.scene_id, invalid_fraction = report.invalid_fraction, usable, "scene masked");
        Ok(report)
    }

    /// Composite the usable masked stacks of a window into `output`
    pub fn composite(&self, window: &str, reports: &[SceneReport], output: &Path) -> Result<CompositeSummary> {
        let inputs: Vec<&PathBuf> = reports.iter().filter_map(|r| r.masked_path.as_ref()).collect();
        if inputs.is_empty() {
            return Err(CompositingError::NoValidScenes {
                window: window.to_string(),
            }
            .into());
        }
        let compositor = Compositor::new(self.config.compositing.statistic, self.config.grid.nodata)
            .with_batch_rows(self.config.compositing.batch_rows);
        let summary = compositor
            .composite_files(&inputs, output)
            .map_err(|source| CompositingError::Raster {
                window: window.to_string(),
                source,
            })?;
        Ok(summary)
    }

    /// Run one window end to end
    pub fn run_window(&mut self, window: &AcquisitionWindow, bbox: &BBox) -> Result<WindowOutput> {
        let collection = self.search(window, bbox)?;
        let dir = self.window_dir(window);
        std::fs::create_dir_all(&dir)?;
        collection.save_snapshot(&dir.join(COLLECTION_FILE))?;

        let canvas = self.canvas(bbox)?;

        let mut reports = Vec::with_capacity(collection.len());
        for (i, scene) in collection.scenes.iter().enumerate() {
            info!(window = %window.name, scene = %scene.id, n = i + 1, of = collection.len(), "processing scene");
            let scene_dir = self.scene_dir(window, scene);
            let downloaded = self.download(scene, bbox, &canvas, &scene_dir)?;
            let merged = self.align(&downloaded, &canvas)?;
            reports.push(self.mask_scene(&downloaded, &merged)?);
        }

        let composite = dir.join(COMPOSITE_FILE);
        let summary = self.composite(&window.name, &reports, &composite)?;
        info!(
            window = %window.name,
            scenes = summary.scenes,
            nodata_fraction = summary.nodata_fraction,
            path = %composite.display(),
            "composite written"
        );

        let (ndvi_path, preview) = self.derive_products(&composite, &dir)?;
        Ok(WindowOutput {
            window: window.clone(),
            dir,
            collection,
            scenes: reports,
            composite,
            summary,
            ndvi: ndvi_path,
            preview,
        })
    }

    /// NDVI and, when the visible bands are present, an RGB preview
    pub fn derive_products(&self, composite: &Path, dir: &Path) -> Result<(PathBuf, Option<PathBuf>)> {
        let spectral = self.config.spectral_bands();
        let stack = read_named_stack(composite, &BandId::names(&spectral))?;
        let position = |band: BandId| spectral.iter().position(|&b| b == band);

        let (Some(nir), Some(red)) = (position(BandId::B08), position(BandId::B04)) else {
            return Err(PipelineError::Config("NDVI needs B08 and B04".into()));
        };
        let ndvi_path = dir.join(NDVI_FILE);
        write_geotiff(&ndvi(&stack, nir, red, self.config.grid.nodata)?, &ndvi_path, &self.options)?;

        let preview = match (position(BandId::B04), position(BandId::B03), position(BandId::B02)) {
            (Some(r), Some(g), Some(b)) => {
                let path = dir.join(PREVIEW_FILE);
                write_stack(&rgb_preview(&stack, [r, g, b], &PreviewParams::default())?, &path, &self.options)?;
                Some(path)
            }
            _ => None,
        };
        Ok((ndvi_path, preview))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clearsky_core::{GeoTransform, Raster, RasterStack};
    use ndarray::Array2;

    #[test]
    fn test_window_ending_at() {
        let end = NaiveDate::from_ymd_opt(2022, 6, 1).unwrap();
        let w = AcquisitionWindow::ending_at("after", end, 70, 24.0);
        assert_eq!(w.start, NaiveDate::from_ymd_opt(2022, 3, 23).unwrap());
        assert_eq!(w.dir_name(), "after_20220323_20220601");
    }

    #[test]
    fn test_neural_classifier_needs_a_model() {
        let mut config = PipelineConfig::default();
        config.masking.classifier = CloudClassifier::Neural;
        assert!(matches!(build_masker(&config), Err(PipelineError::Masking(MaskingError::Model { .. }))));

        config.model_path = Some(PathBuf::from("/nonexistent/model.json"));
        assert!(matches!(build_masker(&config), Err(PipelineError::Masking(MaskingError::Model { .. }))));
    }

    #[test]
    fn test_model_format_follows_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("model.json");
        std::fs::write(&json, r#"{"weights": [0.0, 10.0, 0.0, 0.0], "bias": -3.0}"#).unwrap();
        let onnx = dir.path().join("model.ONNX");
        std::fs::write(&onnx, r#"{"weights": [0.0, 10.0, 0.0, 0.0], "bias": -3.0}"#).unwrap();

        let mut config = PipelineConfig::default();
        config.masking.classifier = CloudClassifier::Neural;
        config.model_path = Some(json);
        build_masker(&config).unwrap();

        // JSON under an .onnx name goes to the network loader and fails there
        config.model_path = Some(onnx);
        match build_masker(&config) {
            Err(PipelineError::Masking(MaskingError::Model { reason, .. })) => assert!(reason.contains("onnx")),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_threshold_scale_follows_normalization() {
        let mut config = PipelineConfig::default();
        assert_eq!(build_masker(&config).unwrap().params().dn_scale, 1.0 / 4095.0);
        config.download.normalization = Normalization::ScaledIntegers;
        assert_eq!(build_masker(&config).unwrap().params().dn_scale, 1.0);
    }

    /// Downloaded vegetation: B02=500, B03=1000, B04=600, B08=3000 DN under SCL 4
    fn vegetation_stack(config: &PipelineConfig) -> RasterStack<f32> {
        let downloader = Downloader::new(&config.catalog.bands, config.download.clone(), config.grid.nodata);
        let dn = |band: BandId| match band {
            BandId::B02 => 500.0,
            BandId::B03 => 1000.0,
            BandId::B04 => 600.0,
            BandId::B08 => 3000.0,
            BandId::Scl => 4.0,
            _ => 800.0,
        };
        let rasters: Vec<Raster<f32>> = downloader
            .bands()
            .iter()
            .map(|&band| {
                let raw = Raster::with_meta(
                    Array2::from_elem((40, 40), dn(band)),
                    GeoTransform::new(36.8, -1.28, 0.0001, -0.0001),
                    Some(CRS::wgs84()),
                    Some(0.0),
                );
                downloader.normalize(&raw, band)
            })
            .collect();
        RasterStack::from_bands(&rasters)
            .unwrap()
            .with_band_names(BandId::names(downloader.bands()))
            .unwrap()
    }

    #[test]
    fn test_clear_vegetation_survives_default_masking() {
        for normalization in [Normalization::Reflectance, Normalization::ScaledIntegers] {
            let mut config = PipelineConfig::default();
            config.download.normalization = normalization;
            let stack = vegetation_stack(&config);
            let masker = build_masker(&config).unwrap();
            let bands = SceneBands::from_stack(&stack, &masker.params().bands).unwrap();

            assert!(masker.cloud_mask(&bands).unwrap().iter().all(|&v| !v));
            let sun = clearsky_algorithms::masking::SunGeometry {
                azimuth: 120.0,
                zenith: 35.0,
            };
            let mask = masker.mask(&bands, sun).unwrap();
            assert_eq!(mask.invalid_fraction, 0.0);
            assert!(masker.is_usable(&mask));
        }
    }

    #[test]
    fn test_scene_report_json() {
        let report = SceneReport {
            scene_id: "S2A".into(),
            invalid_fraction: 0.25,
            usable: true,
            masked_path: Some(PathBuf::from("/tmp/x/stack_masked.tif")),
        };
        let back: SceneReport = serde_json::from_str(&serde_json::to_string(&report).unwrap()).unwrap();
        assert_eq!(back, report);
    }
}
