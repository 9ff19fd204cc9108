//! Pipeline configuration
//!
//! One [`PipelineConfig`] is built at startup, from a YAML file or the
//! defaults, then patched from `CLEARSKY_*` environment variables (a `.env`
//! file is honoured). It is passed explicitly to every pipeline step.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use clearsky_algorithms::compositing::{Statistic, DEFAULT_BATCH_ROWS};
use clearsky_algorithms::masking::{MaskingParams, SATURATION_DN};
use clearsky_algorithms::mosaic::{MergeMethod, DEFAULT_RESOLUTION};
use clearsky_cloud::{CogReaderOptions, StacCatalog, StacClientOptions};

use crate::error::{PipelineError, Result};
use crate::scene::BandId;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "CLEARSKY_";

/// Where scenes come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// `earth-search-v0`, `earth-search` or a STAC API URL
    pub endpoint: String,
    pub collection: String,
    /// Bands to download; stacked spectral first, SCL last
    pub bands: Vec<BandId>,
    /// Scenes kept per grid tile, best cloud cover first
    pub max_tile_count: usize,
    /// Fewest scenes a present grid tile may have
    pub min_tile_count: usize,
    /// Cap on items fetched across result pages
    pub max_items: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            endpoint: "earth-search-v0".to_string(),
            collection: "sentinel-s2-l2a-cogs".to_string(),
            bands: vec![BandId::B02, BandId::B03, BandId::B04, BandId::B08, BandId::Scl],
            max_tile_count: 6,
            min_tile_count: 3,
            max_items: 500,
        }
    }
}

impl CatalogConfig {
    pub fn catalog(&self) -> StacCatalog {
        StacCatalog::from_str_or_url(&self.endpoint)
    }
}

/// Analysis grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Pixel size in degrees (about 10 m at the equator)
    pub resolution: f64,
    pub nodata: f32,
    /// Merge semantics against the blank canvas
    pub merge_method: MergeMethod,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            resolution: DEFAULT_RESOLUTION,
            nodata: -9999.0,
            merge_method: MergeMethod::First,
        }
    }
}

/// How digital numbers are stored after download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// DN / saturation, clamped to [0, 1]
    #[default]
    Reflectance,
    /// Raw DN kept as floats
    ScaledIntegers,
}

/// Band download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub normalization: Normalization,
    /// DN mapped to reflectance 1.0
    pub saturation: f32,
    /// UTM read windows are snapped to multiples of this many metres
    pub window_snap: f64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            normalization: Normalization::Reflectance,
            saturation: SATURATION_DN,
            window_snap: 10.0,
        }
    }
}

/// Widening of the cloud-cover limit after recoverable catalog errors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudCoverBackoff {
    pub initial: f64,
    pub step: f64,
    pub ceiling: f64,
}

impl Default for CloudCoverBackoff {
    fn default() -> Self {
        Self {
            initial: 30.0,
            step: 10.0,
            ceiling: 50.0,
        }
    }
}

impl CloudCoverBackoff {
    pub fn starting_at(self, initial: f64) -> Self {
        Self { initial, ..self }
    }

    /// Cloud-cover limits to try, in order
    pub fn levels(&self) -> Vec<f64> {
        let mut levels = vec![self.initial];
        if self.step > 0.0 {
            let mut next = self.initial + self.step;
            while next <= self.ceiling {
                levels.push(next);
                next += self.step;
            }
        }
        levels
    }
}

/// The "before" and "after" acquisition windows of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window length: each window is `[date - days_buffer, date]`
    pub days_buffer: i64,
    pub before_cloud_cover: f64,
    pub after_cloud_cover: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            days_buffer: 70,
            before_cloud_cover: 30.0,
            after_cloud_cover: 24.0,
        }
    }
}

/// Temporal compositing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositingConfig {
    pub statistic: Statistic,
    pub batch_rows: usize,
}

impl Default for CompositingConfig {
    fn default() -> Self {
        Self {
            statistic: Statistic::Median,
            batch_rows: DEFAULT_BATCH_ROWS,
        }
    }
}

/// Remote access
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Concurrent tile fetches per COG window read
    pub max_concurrent_fetches: usize,
    /// COG tiles kept in the LRU cache
    pub cache_capacity: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            max_retries: 3,
            max_concurrent_fetches: 16,
            cache_capacity: 256,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cog_options(&self) -> CogReaderOptions {
        CogReaderOptions {
            max_concurrent_fetches: self.max_concurrent_fetches,
            cache_capacity: self.cache_capacity,
            request_timeout: self.timeout(),
            max_retries: self.max_retries,
        }
    }

    pub fn stac_options(&self, max_items: usize) -> StacClientOptions {
        StacClientOptions {
            request_timeout: self.timeout(),
            max_retries: self.max_retries,
            max_items,
        }
    }
}

/// Task-control API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskApiConfig {
    pub base_url: String,
    pub task_type: String,
}

impl Default for TaskApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.smartcarte.earth".to_string(),
            task_type: "forest_change".to_string(),
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub catalog: CatalogConfig,
    pub grid: GridConfig,
    pub download: DownloadConfig,
    pub backoff: CloudCoverBackoff,
    pub windows: WindowConfig,
    pub masking: MaskingParams,
    pub compositing: CompositingConfig,
    pub http: HttpConfig,
    pub task_api: TaskApiConfig,
    /// Root of window, scene and task directories
    pub work_dir: PathBuf,
    /// Weights of the neural cloud classifier
    pub model_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            catalog: CatalogConfig::default(),
            grid: GridConfig::default(),
            download: DownloadConfig::default(),
            backoff: CloudCoverBackoff::default(),
            windows: WindowConfig::default(),
            masking: MaskingParams::default(),
            compositing: CompositingConfig::default(),
            http: HttpConfig::default(),
            task_api: TaskApiConfig::default(),
            work_dir: std::env::temp_dir().join("clearsky"),
            model_path: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml_str(&text)
    }

    /// File (or defaults) plus `.env` and `CLEARSKY_*` overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Ok(env_file) = dotenvy::dotenv() {
            debug!(path = %env_file.display(), "loaded .env");
        }
        let mut config = match path {
            Some(p) => Self::from_yaml_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides found through `lookup` (called with full variable names)
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
            value
                .trim()
                .parse()
                .map_err(|_| PipelineError::Config(format!("{ENV_PREFIX}{key}: cannot parse {value:?}")))
        }
        let get = |key: &str| lookup(&format!("{ENV_PREFIX}{key}"));

        if let Some(v) = get("WORK_DIR") {
            self.work_dir = PathBuf::from(v);
        }
        if let Some(v) = get("MODEL_PATH") {
            self.model_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("CATALOG_URL") {
            self.catalog.endpoint = v;
        }
        if let Some(v) = get("TASK_API_URL") {
            self.task_api.base_url = v;
        }
        if let Some(v) = get("BANDS") {
            self.catalog.bands = v
                .split(',')
                .map(|b| b.trim().parse())
                .collect::<Result<Vec<BandId>>>()?;
        }
        if let Some(v) = get("RESOLUTION") {
            self.grid.resolution = parse("RESOLUTION", &v)?;
        }
        if let Some(v) = get("NODATA") {
            self.grid.nodata = parse("NODATA", &v)?;
        }
        if let Some(v) = get("BUFFER_RADIUS") {
            self.masking.buffer_radius = parse("BUFFER_RADIUS", &v)?;
        }
        if let Some(v) = get("MAX_INVALID_FRACTION") {
            self.masking.max_invalid_fraction = parse("MAX_INVALID_FRACTION", &v)?;
        }
        if let Some(v) = get("HTTP_TIMEOUT_SECS") {
            self.http.timeout_secs = parse("HTTP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("BATCH_ROWS") {
            self.compositing.batch_rows = parse("BATCH_ROWS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(PipelineError::Config(msg));
        if !self.catalog.bands.contains(&BandId::Scl) {
            return fail("catalog.bands must include SCL".into());
        }
        for band in [BandId::B03, BandId::B04, BandId::B08] {
            if !self.catalog.bands.contains(&band) {
                return fail(format!("catalog.bands must include {band} for masking"));
            }
        }
        if self.catalog.min_tile_count > self.catalog.max_tile_count {
            return fail(format!(
                "catalog.min_tile_count {} exceeds max_tile_count {}",
                self.catalog.min_tile_count, self.catalog.max_tile_count
            ));
        }
        if !(self.grid.resolution > 0.0 && self.grid.resolution.is_finite()) {
            return fail(format!("grid.resolution must be positive, got {}", self.grid.resolution));
        }
        if !(0.0..=1.0).contains(&self.masking.max_invalid_fraction) {
            return fail(format!(
                "masking.max_invalid_fraction must lie in [0, 1], got {}",
                self.masking.max_invalid_fraction
            ));
        }
        if self.download.saturation <= 0.0 {
            return fail("download.saturation must be positive".into());
        }
        if self.windows.days_buffer <= 0 {
            return fail("windows.days_buffer must be positive".into());
        }
        Ok(())
    }

    /// Spectral bands in stack order, i.e. the bands of a composite
    pub fn spectral_bands(&self) -> Vec<BandId> {
        BandId::stack_order(&self.catalog.bands)
            .into_iter()
            .filter(|b| b.is_spectral())
            .collect()
    }
}
