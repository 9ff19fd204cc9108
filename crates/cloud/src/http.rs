//! HTTP client wrapper with Range request support and retry logic.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use crate::error::{CloudError, Result};

/// Base delay of the exponential retry backoff.
const BACKOFF_BASE_MS: u64 = 200;

/// HTTP client for byte ranges and small documents.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    max_retries: u32,
}

/// Response from a HEAD request.
pub struct HeadInfo {
    /// Total file size in bytes, if reported by the server.
    pub content_length: Option<u64>,
    /// Whether the server advertises Range support.
    pub accept_ranges: bool,
}

impl HttpClient {
    pub fn new(request_timeout: Duration, max_retries: u32) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client, max_retries })
    }

    /// Underlying reqwest client, for callers that build their own requests.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Send a HEAD request to discover file size and Range support.
    pub async fn head(&self, url: &str) -> Result<HeadInfo> {
        let resp = self.execute_with_retry(self.client.head(url)).await?;

        let accept_ranges = resp
            .headers()
            .get("accept-ranges")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("bytes"));

        let content_length = resp
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        Ok(HeadInfo {
            content_length,
            accept_ranges,
        })
    }

    /// Fetch `[offset, offset + length)` of a remote file.
    pub async fn fetch_range(&self, url: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let range = format!("bytes={}-{}", offset, offset + length - 1);
        let resp = self
            .execute_with_retry(self.client.get(url).header("Range", range))
            .await?;

        let status = resp.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE
            || (status.is_success() && status != StatusCode::PARTIAL_CONTENT)
        {
            return Err(CloudError::RangeNotSupported { url: url.to_string() });
        }
        if !status.is_success() {
            return Err(CloudError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(resp.bytes().await?.to_vec())
    }

    /// Fetch several ranges of one file concurrently, results in input order.
    pub async fn fetch_ranges(&self, url: &str, ranges: &[(u64, u64)]) -> Result<Vec<Vec<u8>>> {
        use futures::stream::{FuturesOrdered, StreamExt};

        let mut futs = FuturesOrdered::new();
        for &(offset, length) in ranges {
            futs.push_back(self.fetch_range(url, offset, length));
        }

        let mut results = Vec::with_capacity(ranges.len());
        while let Some(res) = futs.next().await {
            results.push(res?);
        }
        Ok(results)
    }

    /// GET a small text document such as a scene metadata XML.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let resp = self.execute_with_retry(self.client.get(url)).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CloudError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(resp.text().await?)
    }

    /// Send with exponential backoff on timeouts, connection errors and 5xx.
    ///
    /// 4xx responses are returned to the caller untouched.
    pub async fn execute_with_retry(&self, request: RequestBuilder) -> Result<Response> {
        let mut last_err: Option<CloudError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(BACKOFF_BASE_MS << (attempt - 1));
                debug!(attempt, ?delay, "retrying request");
                tokio::time::sleep(delay).await;
            }

            let Some(cloned) = request.try_clone() else {
                return Ok(request.send().await?);
            };

            match cloned.send().await {
                Ok(resp) if resp.status().is_server_error() => {
                    warn!(status = %resp.status(), url = %resp.url(), "server error");
                    last_err = Some(CloudError::Status {
                        status: resp.status().as_u16(),
                        url: resp.url().to_string(),
                    });
                }
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_timeout() || e.is_connect() => {
                    warn!(error = %e, "transient network error");
                    last_err = Some(CloudError::Http(e));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_err.unwrap_or_else(|| CloudError::Network("request failed".into())))
    }
}
