//! Catalog search and collection filtering
//!
//! The catalog is queried sorted by ascending cloud cover. At most
//! `max_tile_count` scenes are kept per grid tile, first seen first, and the
//! result must be non-empty, have at least `min_tile_count` scenes on every
//! tile present, and cover the whole bbox. The filter never retries; the
//! caller relaxes cloud cover through [`search_with_backoff`].

use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use clearsky_cloud::blocking::StacClientBlocking;
use clearsky_cloud::{SortDirection, StacSearchParams};
use clearsky_core::BBox;

use crate::config::{CatalogConfig, CloudCoverBackoff, HttpConfig};
use crate::error::{CatalogError, PipelineError, Result};
use crate::geometry::coverage_percent;
use crate::scene::{tile_counts, BandId, Collection, Scene};

/// One catalog query
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Geographic (min_lon, min_lat, max_lon, max_lat)
    pub bbox: BBox,
    /// Exclusive upper bound on `eo:cloud_cover`, in percent
    pub max_cloud_cover: f64,
}

impl SearchRequest {
    pub fn new(start: NaiveDate, end: NaiveDate, bbox: BBox, max_cloud_cover: f64) -> Result<Self> {
        if end <= start {
            return Err(PipelineError::InvalidDateRange { start, end });
        }
        if !bbox.is_valid() {
            return Err(PipelineError::Config(format!("invalid bbox {bbox}")));
        }
        Ok(Self {
            start,
            end,
            bbox,
            max_cloud_cover,
        })
    }

    pub fn with_cloud_cover(&self, max_cloud_cover: f64) -> Self {
        Self {
            max_cloud_cover,
            ..self.clone()
        }
    }

    /// STAC datetime interval, midnight to midnight UTC
    pub fn datetime(&self) -> String {
        format!(
            "{}T00:00:00Z/{}T00:00:00Z",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

/// Source of candidate scenes, sorted by ascending cloud cover
pub trait SceneCatalog {
    fn search(&self, request: &SearchRequest) -> std::result::Result<Vec<Scene>, CatalogError>;
}

/// [`SceneCatalog`] over a STAC API
pub struct StacSceneCatalog {
    client: StacClientBlocking,
    collection: String,
    bands: Vec<BandId>,
}

impl StacSceneCatalog {
    pub fn new(catalog: &CatalogConfig, http: &HttpConfig) -> Result<Self> {
        let client = StacClientBlocking::new(catalog.catalog(), http.stac_options(catalog.max_items))?;
        Ok(Self {
            client,
            collection: catalog.collection.clone(),
            bands: catalog.bands.clone(),
        })
    }
}

impl SceneCatalog for StacSceneCatalog {
    fn search(&self, request: &SearchRequest) -> std::result::Result<Vec<Scene>, CatalogError> {
        let b = request.bbox;
        let params = StacSearchParams::new()
            .bbox(b.min_x, b.min_y, b.max_x, b.max_y)
            .datetime(&request.datetime())
            .collections(&[self.collection.as_str()])
            .cloud_cover_below(request.max_cloud_cover)
            .sort_by("properties.eo:cloud_cover", SortDirection::Asc)
            .limit(100);
        let items = self.client.search_all(&params)?;
        debug!(items = items.len(), "catalog returned items");

        items.iter().map(|item| Scene::from_stac_item(item, &self.bands)).collect()
    }
}

/// Tile-count limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionFilter {
    pub max_tile_count: usize,
    pub min_tile_count: usize,
}

impl From<&CatalogConfig> for CollectionFilter {
    fn from(c: &CatalogConfig) -> Self {
        Self {
            max_tile_count: c.max_tile_count,
            min_tile_count: c.min_tile_count,
        }
    }
}

/// Deduplicate per tile and validate search results.
///
/// `scenes` are (stably) ordered by cloud cover before deduplication.
pub fn build_collection(
    mut scenes: Vec<Scene>,
    request: &SearchRequest,
    filter: CollectionFilter,
) -> std::result::Result<Collection, CatalogError> {
    scenes.sort_by(|a, b| a.cloud_cover.total_cmp(&b.cloud_cover));

    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    let kept: Vec<Scene> = scenes
        .into_iter()
        .filter(|scene| {
            let count = seen.entry(scene.tile.clone()).or_insert(0);
            if *count < filter.max_tile_count {
                *count += 1;
                true
            } else {
                false
            }
        })
        .collect();

    let bbox = request.bbox.as_array();
    if kept.is_empty() {
        return Err(CatalogError::EmptyCollection {
            max_cloud_cover: request.max_cloud_cover,
            bbox,
        });
    }

    let counts = tile_counts(&kept);
    if let Some((tile, &count)) = counts.iter().find(|(_, &n)| n < filter.min_tile_count) {
        return Err(CatalogError::InsufficientTileCount {
            tile: tile.clone(),
            count,
            max_cloud_cover: request.max_cloud_cover,
        });
    }

    let footprints: Vec<_> = kept.iter().map(|s| s.footprint.clone()).collect();
    let coverage = coverage_percent(&footprints, &request.bbox);
    if coverage < 100 {
        return Err(CatalogError::IncompleteCoverage { coverage, bbox });
    }

    info!(scenes = kept.len(), tiles = ?counts, max_cloud_cover = request.max_cloud_cover, "collection validated");
    Ok(Collection {
        scenes: kept,
        max_cloud_cover: request.max_cloud_cover,
        coverage,
    })
}

/// Search once and validate
pub fn fetch_collection(
    catalog: &dyn SceneCatalog,
    request: &SearchRequest,
    filter: CollectionFilter,
) -> std::result::Result<Collection, CatalogError> {
    let scenes = catalog.search(request)?;
    build_collection(scenes, request, filter)
}

/// Search at increasing cloud-cover limits until a collection validates.
///
/// Only recoverable catalog errors trigger a retry. When every level fails
/// the last error is returned inside [`PipelineError::BackoffExhausted`].
pub fn search_with_backoff(
    catalog: &dyn SceneCatalog,
    request: &SearchRequest,
    filter: CollectionFilter,
    backoff: CloudCoverBackoff,
) -> Result<Collection> {
    let mut last = None;
    for level in backoff.levels() {
        match fetch_collection(catalog, &request.with_cloud_cover(level), filter) {
            Ok(collection) => return Ok(collection),
            Err(e) if e.is_recoverable() => {
                warn!(max_cloud_cover = level, error = %e, "collection rejected, relaxing cloud cover");
                last = Some(e);
            }
            Err(e) => return Err(e.into()),
        }
    }
    let ceiling = backoff.levels().last().copied().unwrap_or(backoff.initial);
    Err(match last {
        Some(last) => PipelineError::BackoffExhausted { ceiling, last },
        None => PipelineError::Config("cloud-cover backoff has no levels".into()),
    })
}
