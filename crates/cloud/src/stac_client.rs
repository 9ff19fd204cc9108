//! Async STAC client for Item Search.
//!
//! Earth Search (v0 and v1) are known endpoints; any other STAC API is
//! reachable through [`StacCatalog::Custom`].

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{CloudError, Result};
use crate::http::HttpClient;
use crate::stac_models::{StacItem, StacItemCollection, StacLink, StacSearchParams};

// ---------------------------------------------------------------------------
// Catalog enum
// ---------------------------------------------------------------------------

/// Known STAC catalogs plus custom endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StacCatalog {
    /// Earth Search v0 (sat-api), home of `sentinel-s2-l2a-cogs`.
    EarthSearchV0,
    /// Earth Search v1.
    EarthSearch,
    /// Any STAC API root or `/search` URL.
    Custom(String),
}

impl StacCatalog {
    /// Full POST `/search` URL for this catalog.
    pub fn search_url(&self) -> String {
        match self {
            Self::EarthSearchV0 => "https://earth-search.aws.element84.com/v0/search".to_string(),
            Self::EarthSearch => "https://earth-search.aws.element84.com/v1/search".to_string(),
            Self::Custom(base) => {
                let base = base.trim_end_matches('/');
                if base.ends_with("/search") {
                    base.to_string()
                } else {
                    format!("{}/search", base)
                }
            }
        }
    }

    /// Parse a shorthand (`"es0"`, `"earth-search-v0"`, `"es"`, `"earth-search"`)
    /// or treat the string as a custom URL.
    pub fn from_str_or_url(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "es0" | "earth-search-v0" | "earthsearch-v0" => Self::EarthSearchV0,
            "es" | "earth-search" | "earthsearch" => Self::EarthSearch,
            _ => Self::Custom(s.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Configuration for [`StacClient`].
#[derive(Debug, Clone)]
pub struct StacClientOptions {
    /// Per-request timeout (default 30 s).
    pub request_timeout: Duration,
    /// Maximum retries on transient failures (default 3).
    pub max_retries: u32,
    /// Maximum total items fetched across pages (default 500).
    pub max_items: usize,
}

impl Default for StacClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            max_items: 500,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Async client for STAC Item Search.
///
/// Requests go through [`HttpClient::execute_with_retry`], so timeouts and
/// 5xx answers are retried while 4xx answers fail at once.
pub struct StacClient {
    catalog: StacCatalog,
    http: HttpClient,
    max_items: usize,
}

impl StacClient {
    pub fn new(catalog: StacCatalog, options: StacClientOptions) -> Result<Self> {
        Ok(Self {
            catalog,
            http: HttpClient::new(options.request_timeout, options.max_retries)?,
            max_items: options.max_items,
        })
    }

    pub fn catalog(&self) -> &StacCatalog {
        &self.catalog
    }

    /// One page of results for `params`
    pub async fn search(&self, params: &StacSearchParams) -> Result<StacItemCollection> {
        let url = self.catalog.search_url();
        self.page(self.http.inner().post(&url).json(params), &url).await
    }

    /// Follows `next` links until `max_items` items are collected or the
    /// catalog runs out; items keep catalog order.
    pub async fn search_all(&self, params: &StacSearchParams) -> Result<Vec<StacItem>> {
        let mut items: Vec<StacItem> = Vec::new();
        let mut page = self.search(params).await?;

        loop {
            let next = page.next_link().cloned();
            let fetched = page.features.len();
            items.append(&mut page.features);
            debug!(fetched, total = items.len(), "STAC page");

            let Some(link) = next.filter(|_| fetched > 0 && items.len() < self.max_items) else {
                break;
            };
            page = self.follow(&link, params).await?;
        }

        items.truncate(self.max_items);
        Ok(items)
    }

    /// POST links (optionally merging their body) or plain GET links
    async fn follow(&self, link: &StacLink, original: &StacSearchParams) -> Result<StacItemCollection> {
        let client = self.http.inner();
        let request = if link.method.as_deref().is_some_and(|m| m.eq_ignore_ascii_case("POST")) {
            client.post(&link.href).json(&next_page_params(link, original)?)
        } else {
            client.get(&link.href)
        };
        self.page(request, &link.href).await
    }

    async fn page(&self, request: reqwest::RequestBuilder, url: &str) -> Result<StacItemCollection> {
        let resp = self.http.execute_with_retry(request).await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            warn!(%status, url, "STAC search failed");
            let excerpt: String = body.chars().take(500).collect();
            return Err(CloudError::Catalog(format!("STAC search returned HTTP {status}: {excerpt}")));
        }
        serde_json::from_str(&body).map_err(|e| CloudError::Catalog(format!("parsing STAC response: {e}")))
    }
}

/// Request body for a POST `next` link.
///
/// With `merge: true` the link body is overlaid on the original request;
/// otherwise the link body replaces it.
pub fn next_page_params(link: &StacLink, original: &StacSearchParams) -> Result<StacSearchParams> {
    let serialize_err = |e: serde_json::Error| CloudError::Catalog(format!("pagination body: {e}"));

    let body = match (&link.body, link.merge.unwrap_or(false)) {
        (Some(link_body), true) => {
            let mut base = serde_json::to_value(original).map_err(serialize_err)?;
            if let (Some(base_obj), Some(link_obj)) = (base.as_object_mut(), link_body.as_object()) {
                for (k, v) in link_obj {
                    base_obj.insert(k.clone(), v.clone());
                }
            }
            base
        }
        (Some(link_body), false) => link_body.clone(),
        (None, _) => serde_json::to_value(original).map_err(serialize_err)?,
    };
    serde_json::from_value(body).map_err(serialize_err)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
