//! Scenes, bands and validated collections

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use geo_types::MultiPolygon;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use clearsky_cloud::{StacAsset, StacItem, StacItemCollection};

use crate::error::{CatalogError, PipelineError, Result};
use crate::geometry::{parse_geometry, to_geojson};

/// Sentinel-2 L2A band used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BandId {
    B02,
    B03,
    B04,
    B08,
    B8A,
    /// Scene Classification Layer
    #[serde(rename = "SCL")]
    Scl,
}

impl BandId {
    pub const ALL: [BandId; 6] = [Self::B02, Self::B03, Self::B04, Self::B08, Self::B8A, Self::Scl];

    pub fn name(self) -> &'static str {
        match self {
            Self::B02 => "B02",
            Self::B03 => "B03",
            Self::B04 => "B04",
            Self::B08 => "B08",
            Self::B8A => "B8A",
            Self::Scl => "SCL",
        }
    }

    /// Asset key in `sentinel-s2-l2a-cogs` items
    pub fn asset_key(self) -> &'static str {
        self.name()
    }

    /// Reflectance band, as opposed to the SCL class layer
    pub fn is_spectral(self) -> bool {
        self != Self::Scl
    }

    /// Native ground sampling distance in metres
    pub fn native_resolution(self) -> f64 {
        match self {
            Self::B02 | Self::B03 | Self::B04 | Self::B08 => 10.0,
            Self::B8A | Self::Scl => 20.0,
        }
    }

    /// Stack order: spectral bands as given, SCL last
    pub fn stack_order(bands: &[BandId]) -> Vec<BandId> {
        let mut order: Vec<BandId> = Vec::with_capacity(bands.len());
        for &band in bands.iter().filter(|b| b.is_spectral()) {
            if !order.contains(&band) {
                order.push(band);
            }
        }
        if bands.contains(&Self::Scl) {
            order.push(Self::Scl);
        }
        order
    }

    /// Names of `bands` in order, for labelling stacks
    pub fn names(bands: &[BandId]) -> Vec<&'static str> {
        bands.iter().map(|b| b.name()).collect()
    }
}

impl fmt::Display for BandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BandId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|b| b.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| PipelineError::Config(format!("unknown band {s}")))
    }
}

/// One catalog scene, immutable once fetched
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub id: String,
    pub datetime: Option<DateTime<Utc>>,
    /// Geographic footprint
    pub footprint: MultiPolygon<f64>,
    /// Native UTM projection
    pub epsg: u32,
    /// Grid tile, e.g. `37MBU`
    pub tile: String,
    pub cloud_cover: f64,
    pub assets: BTreeMap<BandId, String>,
    /// Tile metadata XML carrying the mean sun angles
    pub metadata_href: String,
}

impl Scene {
    /// Build a scene from a catalog item, requiring an asset for every band
    pub fn from_stac_item(item: &StacItem, bands: &[BandId]) -> std::result::Result<Self, CatalogError> {
        let invalid = |reason: &str| CatalogError::InvalidScene {
            id: item.id.clone(),
            reason: reason.to_string(),
        };

        let footprint = item
            .geometry
            .as_ref()
            .and_then(parse_geometry)
            .ok_or_else(|| invalid("missing or unsupported geometry"))?;
        let epsg = item.epsg().ok_or_else(|| invalid("missing proj:epsg"))?;
        let tile = item.tile_id().ok_or_else(|| invalid("missing sentinel:grid_square"))?;
        let cloud_cover = item.cloud_cover().ok_or_else(|| invalid("missing eo:cloud_cover"))?;
        let metadata_href = item
            .asset_href(&["metadata"])
            .ok_or_else(|| invalid("missing metadata asset"))?
            .to_string();

        let mut assets = BTreeMap::new();
        for &band in bands {
            let href = item
                .asset_href(&[band.asset_key()])
                .ok_or_else(|| invalid(&format!("missing asset {band}")))?;
            assets.insert(band, href.to_string());
        }

        let datetime = item
            .properties
            .datetime
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc));

        Ok(Self {
            id: item.id.clone(),
            datetime,
            footprint,
            epsg,
            tile,
            cloud_cover,
            assets,
            metadata_href,
        })
    }

    /// Catalog item carrying everything [`Scene::from_stac_item`] reads back
    pub fn to_stac_item(&self) -> StacItem {
        let mut extra = HashMap::new();
        extra.insert("proj:epsg".to_string(), json!(self.epsg));
        match split_tile(&self.tile) {
            Some((zone, band, square)) => {
                extra.insert("sentinel:utm_zone".to_string(), json!(zone));
                extra.insert("sentinel:latitude_band".to_string(), json!(band));
                extra.insert("sentinel:grid_square".to_string(), json!(square));
            }
            None => {
                extra.insert("sentinel:grid_square".to_string(), json!(self.tile));
            }
        }

        let asset = |href: &str| StacAsset {
            href: href.to_string(),
            type_: None,
            roles: None,
            extra: HashMap::new(),
        };
        let mut assets: HashMap<String, StacAsset> = self
            .assets
            .iter()
            .map(|(band, href)| (band.asset_key().to_string(), asset(href)))
            .collect();
        assets.insert("metadata".to_string(), asset(&self.metadata_href));

        StacItem {
            type_: "Feature".to_string(),
            id: self.id.clone(),
            geometry: Some(to_geojson(&self.footprint)),
            bbox: None,
            properties: clearsky_cloud::stac_models::StacItemProperties {
                datetime: self.datetime.map(|d| d.to_rfc3339()),
                eo_cloud_cover: Some(self.cloud_cover),
                platform: None,
                extra,
            },
            assets,
            collection: None,
            links: Vec::new(),
        }
    }

    pub fn asset(&self, band: BandId) -> Option<&str> {
        self.assets.get(&band).map(String::as_str)
    }
}

/// `37MBU` -> (`37`, `M`, `BU`)
fn split_tile(tile: &str) -> Option<(u32, String, String)> {
    let digits = tile.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 || tile.len() < digits + 3 {
        return None;
    }
    let zone = tile[..digits].parse().ok()?;
    Some((zone, tile[digits..digits + 1].to_string(), tile[digits + 1..].to_string()))
}

/// Scenes of one acquisition window, validated by the catalog filter
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub scenes: Vec<Scene>,
    /// Cloud-cover limit the collection was found with
    pub max_cloud_cover: f64,
    /// Rounded percentage of the bbox covered by footprints
    pub coverage: u32,
}

impl Collection {
    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    /// Scenes per grid tile
    pub fn tile_counts(&self) -> BTreeMap<String, usize> {
        tile_counts(&self.scenes)
    }

    pub fn to_item_collection(&self) -> StacItemCollection {
        let mut fc = StacItemCollection::from_items(self.scenes.iter().map(Scene::to_stac_item).collect());
        fc.context = Some(json!({
            "max_cloud_cover": self.max_cloud_cover,
            "coverage": self.coverage,
        }));
        fc
    }

    /// Write the collection as a GeoJSON FeatureCollection
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.to_item_collection())?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Read a snapshot written by [`Collection::save_snapshot`]
    pub fn load_snapshot(path: &Path, bands: &[BandId]) -> Result<Self> {
        let fc: StacItemCollection = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        let scenes = fc
            .features
            .iter()
            .map(|item| Scene::from_stac_item(item, bands))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let context = fc.context.unwrap_or(Value::Null);
        Ok(Self {
            scenes,
            max_cloud_cover: context["max_cloud_cover"].as_f64().unwrap_or(f64::NAN),
            coverage: context["coverage"].as_u64().unwrap_or(0) as u32,
        })
    }
}

pub(crate) fn tile_counts(scenes: &[Scene]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for scene in scenes {
        *counts.entry(scene.tile.clone()).or_insert(0) += 1;
    }
    counts
}
