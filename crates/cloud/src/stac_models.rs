//! STAC (SpatioTemporal Asset Catalog) data types.
//!
//! Serde models for Item Search requests and responses, covering what the
//! Sentinel-2 pipeline needs: bbox/datetime/collection filters, the `query`
//! and `sortby` extensions, pagination via `links`, and the Sentinel-2
//! properties (`sentinel:grid_square`, `proj:epsg`, `eo:cloud_cover`).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Search request
// ---------------------------------------------------------------------------

/// Sort direction of a `sortby` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// One `sortby` clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortBy {
    pub field: String,
    pub direction: SortDirection,
}

/// Body for `POST /search` (STAC API Item Search).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StacSearchParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    /// Query extension: `{"property": {"op": value}}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sortby: Option<Vec<SortBy>>,

    /// Pagination token (next page).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Pagination page number (sat-api style catalogs).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

impl StacSearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bounding box `[west, south, east, north]`.
    pub fn bbox(mut self, west: f64, south: f64, east: f64, north: f64) -> Self {
        self.bbox = Some(vec![west, south, east, north]);
        self
    }

    /// Set datetime or datetime range (e.g. `"2024-06-01T00:00:00Z/2024-06-30T00:00:00Z"`).
    pub fn datetime(mut self, dt: &str) -> Self {
        self.datetime = Some(dt.to_string());
        self
    }

    pub fn collections(mut self, cols: &[&str]) -> Self {
        self.collections = Some(cols.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Set maximum items per page.
    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    /// Add a query-extension predicate, e.g. `("eo:cloud_cover", "lt", 30)`.
    pub fn query(mut self, property: &str, op: &str, value: Value) -> Self {
        let mut query = self.query.take().unwrap_or_else(|| json!({}));
        if let Some(obj) = query.as_object_mut() {
            let entry = obj.entry(property.to_string()).or_insert_with(|| json!({}));
            if let Some(ops) = entry.as_object_mut() {
                ops.insert(op.to_string(), value);
            }
        }
        self.query = Some(query);
        self
    }

    /// Only items with `eo:cloud_cover` strictly below `max`.
    pub fn cloud_cover_below(self, max: f64) -> Self {
        self.query("eo:cloud_cover", "lt", json!(max))
    }

    pub fn sort_by(mut self, field: &str, direction: SortDirection) -> Self {
        self.sortby.get_or_insert_with(Vec::new).push(SortBy {
            field: field.to_string(),
            direction,
        });
        self
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// A STAC Item Collection (GeoJSON FeatureCollection).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacItemCollection {
    #[serde(rename = "type")]
    pub type_: String,

    pub features: Vec<StacItem>,

    #[serde(default)]
    pub links: Vec<StacLink>,

    /// Earth Search v0 paging counters (`page`, `limit`, `matched`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl StacItemCollection {
    /// Wrap items in a FeatureCollection, e.g. for a snapshot file.
    pub fn from_items(features: Vec<StacItem>) -> Self {
        Self {
            type_: "FeatureCollection".to_string(),
            features,
            links: Vec::new(),
            context: None,
        }
    }

    /// Find the `"next"` pagination link, if any.
    pub fn next_link(&self) -> Option<&StacLink> {
        self.links.iter().find(|l| l.rel == "next")
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// A single STAC Item (GeoJSON Feature).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacItem {
    #[serde(rename = "type")]
    pub type_: String,

    pub id: String,

    /// GeoJSON geometry, parsed by the caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,

    pub properties: StacItemProperties,

    pub assets: HashMap<String, StacAsset>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,

    #[serde(default)]
    pub links: Vec<StacLink>,
}

impl StacItem {
    pub fn asset(&self, key: &str) -> Option<&StacAsset> {
        self.assets.get(key)
    }

    /// Href of the first asset present among `keys`.
    pub fn asset_href(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.assets.get(*k)).map(|a| a.href.as_str())
    }

    fn extra_str(&self, key: &str) -> Option<String> {
        match self.properties.extra.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// EPSG code from the projection extension.
    pub fn epsg(&self) -> Option<u32> {
        self.properties
            .extra
            .get("proj:epsg")
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok())
    }

    pub fn cloud_cover(&self) -> Option<f64> {
        self.properties.eo_cloud_cover
    }

    /// Two-letter MGRS grid square, e.g. `"VK"`.
    pub fn grid_square(&self) -> Option<String> {
        self.extra_str("sentinel:grid_square")
            .or_else(|| self.extra_str("mgrs:grid_square"))
    }

    /// Full MGRS tile id, e.g. `"30TVK"`; falls back to the bare grid square.
    pub fn tile_id(&self) -> Option<String> {
        let square = self.grid_square()?;
        let zone = self
            .extra_str("sentinel:utm_zone")
            .or_else(|| self.extra_str("mgrs:utm_zone"));
        let band = self
            .extra_str("sentinel:latitude_band")
            .or_else(|| self.extra_str("mgrs:latitude_band"));
        match (zone, band) {
            (Some(z), Some(b)) => Some(format!("{}{}{}", z, b, square)),
            _ => Some(square),
        }
    }
}

/// STAC Item properties.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacItemProperties {
    /// ISO 8601 datetime.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,

    #[serde(rename = "eo:cloud_cover", skip_serializing_if = "Option::is_none")]
    pub eo_cloud_cover: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    /// All other properties.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// A single STAC Asset (file reference).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacAsset {
    pub href: String,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,

    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// A STAC Link (used for pagination and related resources).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacLink {
    /// Relationship: `"self"`, `"root"`, `"next"`, `"prev"`, etc.
    pub rel: String,

    pub href: String,

    /// HTTP method for the link (default GET).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Request body for POST-based pagination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    /// If true, merge `body` into the previous request body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge: Option<bool>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
