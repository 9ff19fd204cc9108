//! Blocking facade over the async clients.
//!
//! The pipeline processes one scene at a time, so each wrapper owns a
//! current-thread Tokio runtime and drives its async clients to completion.

#[cfg(feature = "native")]
mod inner {
    use std::future::Future;
    use std::num::NonZeroUsize;

    use lru::LruCache;

    use clearsky_core::bbox::BBox;
    use clearsky_core::raster::{Raster, RasterElement};

    use crate::cog_reader::{CogMetadata, CogReader, CogReaderOptions};
    use crate::error::{CloudError, Result};
    use crate::http::HttpClient;
    use crate::stac_client::{StacCatalog, StacClient, StacClientOptions};
    use crate::stac_models::{StacItem, StacSearchParams};
    use crate::sun_angles::{self, SunAngles};

    /// An async client plus the runtime that drives it
    struct Driven<C> {
        rt: tokio::runtime::Runtime,
        client: C,
    }

    fn runtime() -> Result<tokio::runtime::Runtime> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| CloudError::Network(format!("runtime: {e}")))
    }

    impl<C> Driven<C> {
        fn new(client: C) -> Result<Self> {
            Ok(Self { rt: runtime()?, client })
        }

        fn block_on<F: Future>(&self, fut: F) -> F::Output {
            self.rt.block_on(fut)
        }
    }

    /// Paged catalog search
    pub struct StacClientBlocking(Driven<StacClient>);

    impl StacClientBlocking {
        pub fn new(catalog: StacCatalog, options: StacClientOptions) -> Result<Self> {
            Ok(Self(Driven::new(StacClient::new(catalog, options)?)?))
        }

        /// Every page of the search, up to the client's item limit
        pub fn search_all(&self, params: &StacSearchParams) -> Result<Vec<StacItem>> {
            self.0.block_on(self.0.client.search_all(params))
        }
    }

    /// Remote COG windows and scene metadata behind one runtime.
    ///
    /// Readers are kept per URL, so each COG header is fetched once and its
    /// block cache serves later windows. All requests share one connection
    /// pool.
    pub struct RemoteSession {
        rt: tokio::runtime::Runtime,
        http: HttpClient,
        options: CogReaderOptions,
        readers: LruCache<String, CogReader>,
    }

    impl RemoteSession {
        /// Keep at most `max_readers` COGs open.
        pub fn new(options: CogReaderOptions, max_readers: usize) -> Result<Self> {
            let http = HttpClient::new(options.request_timeout, options.max_retries)?;
            let capacity = NonZeroUsize::new(max_readers).unwrap_or(NonZeroUsize::MIN);
            Ok(Self {
                rt: runtime()?,
                http,
                options,
                readers: LruCache::new(capacity),
            })
        }

        fn ensure_open(&mut self, url: &str) -> Result<()> {
            if !self.readers.contains(url) {
                let open = CogReader::open_with(self.http.clone(), url, self.options.clone());
                let reader = self.rt.block_on(open)?;
                self.readers.put(url.to_string(), reader);
            }
            Ok(())
        }

        /// Reads `band` of the COG at `url` over `bbox`, given in the raster's own CRS
        pub fn read_bbox<T: RasterElement>(
            &mut self,
            url: &str,
            band: usize,
            bbox: &BBox,
            overview: Option<usize>,
        ) -> Result<Raster<T>> {
            self.ensure_open(url)?;
            let Self { rt, readers, .. } = self;
            let reader = readers.get_mut(url).ok_or(CloudError::NoIfd)?;
            rt.block_on(reader.read_bbox(band, bbox, overview))
        }

        pub fn metadata(&mut self, url: &str) -> Result<CogMetadata> {
            self.ensure_open(url)?;
            self.readers.peek(url).map(CogReader::metadata).ok_or(CloudError::NoIfd)
        }

        /// Number of COGs currently open
        pub fn open_readers(&self) -> usize {
            self.readers.len()
        }

        /// Mean sun angles from a granule metadata XML
        pub fn sun_angles(&self, href: &str) -> Result<SunAngles> {
            self.rt.block_on(sun_angles::fetch_sun_angles(&self.http, href))
        }
    }
}

#[cfg(feature = "native")]
pub use inner::*;
