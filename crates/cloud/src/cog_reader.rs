//! Remote Cloud Optimized GeoTIFF reader: open once, read windows on demand.

use std::time::Duration;

use clearsky_core::bbox::BBox;
use clearsky_core::crs::CRS;
use clearsky_core::io::ifd::{self, RawIfd, TagSet, TiffByteOrder};
use clearsky_core::io::{GeoTiffMeta, ImageLayout};
use clearsky_core::raster::{GeoTransform, PixelWindow, Raster, RasterElement};
use ndarray::Array2;
use tracing::debug;

use crate::cache::{BlockCache, BlockKey};
use crate::error::{CloudError, Result};
use crate::http::HttpClient;

/// Bytes fetched up front; covers the header and IFDs of a typical COG.
const INITIAL_FETCH: u64 = 64 * 1024;

/// Upper bound on IFDs followed, guards against cyclic chains.
const MAX_IFDS: usize = 32;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Options for configuring a [`CogReader`].
#[derive(Debug, Clone)]
pub struct CogReaderOptions {
    /// Maximum number of concurrent HTTP fetches (default: 8).
    pub max_concurrent_fetches: usize,
    /// Number of blocks kept in the LRU cache (default: 128).
    pub cache_capacity: usize,
    /// Timeout per HTTP request (default: 30 s).
    pub request_timeout: Duration,
    /// Maximum retries on transient failures (default: 3).
    pub max_retries: u32,
}

impl Default for CogReaderOptions {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 8,
            cache_capacity: 128,
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

/// Metadata exposed by [`CogReader::metadata`].
#[derive(Debug, Clone)]
pub struct CogMetadata {
    pub url: String,
    pub width: usize,
    pub height: usize,
    pub block_width: usize,
    pub block_height: usize,
    pub bands: usize,
    pub bits_per_sample: u16,
    pub sample_format: u16,
    pub compression: u16,
    pub geo_transform: GeoTransform,
    pub crs: Option<CRS>,
    pub nodata: Option<f64>,
    pub num_overviews: usize,
}

/// Cloud Optimized GeoTIFF reader.
///
/// Blocks are fetched with HTTP Range requests and kept in an LRU cache, so
/// repeated windows over the same area cost no extra requests.
pub struct CogReader {
    url: String,
    client: HttpClient,
    byte_order: TiffByteOrder,
    ifds: Vec<ImageLayout>,
    meta: GeoTiffMeta,
    cache: BlockCache,
    options: CogReaderOptions,
}

// ---------------------------------------------------------------------------
// Implementation
// ---------------------------------------------------------------------------

impl CogReader {
    /// Open a remote COG by URL.
    ///
    /// Fetches the first 64 KiB once and resolves the full IFD chain
    /// (full resolution plus overviews), issuing extra Range requests only
    /// for tag data that lies beyond that prefix.
    pub async fn open(url: &str, options: CogReaderOptions) -> Result<Self> {
        let client = HttpClient::new(options.request_timeout, options.max_retries)?;
        Self::open_with(client, url, options).await
    }

    /// Open a remote COG through an existing client and its connection pool.
    pub async fn open_with(client: HttpClient, url: &str, options: CogReaderOptions) -> Result<Self> {
        let file_size = client.head(url).await?.content_length.unwrap_or(0);
        let fetch_size = if file_size > 0 {
            INITIAL_FETCH.min(file_size)
        } else {
            INITIAL_FETCH
        };
        let prefix = client.fetch_range(url, 0, fetch_size).await?;

        let header = ifd::parse_header(&prefix)?;
        let byte_order = header.byte_order;

        let mut ifds = Vec::new();
        let mut meta = None;
        let mut offset = header.first_ifd_offset as u64;

        while offset > 0 && ifds.len() < MAX_IFDS {
            let count_bytes = slice_or_fetch(&client, url, &prefix, offset, 2).await?;
            let count = ifd::ifd_entry_count(byte_order, &count_bytes)?;
            let ifd_bytes = slice_or_fetch(&client, url, &prefix, offset, RawIfd::byte_len(count) as u64).await?;
            let raw = ifd::parse_ifd(byte_order, &ifd_bytes)?;

            let mut set = TagSet::from_inline(byte_order, &raw);
            for entry in raw.external_entries() {
                let data =
                    slice_or_fetch(&client, url, &prefix, entry.value_or_offset as u64, entry.value_size()).await?;
                set.insert_external(entry, data);
            }

            if meta.is_none() {
                meta = Some(GeoTiffMeta::from_tags(&set));
            }
            ifds.push(ImageLayout::from_tags(&set)?);
            offset = raw.next_ifd_offset as u64;
        }

        let meta = meta.ok_or(CloudError::NoIfd)?;
        debug!(url, ifds = ifds.len(), "opened COG");

        Ok(Self {
            url: url.to_string(),
            client,
            byte_order,
            ifds,
            meta,
            cache: BlockCache::new(options.cache_capacity),
            options,
        })
    }

    /// Return metadata about the full-resolution image.
    pub fn metadata(&self) -> CogMetadata {
        let full = &self.ifds[0];
        CogMetadata {
            url: self.url.clone(),
            width: full.width,
            height: full.height,
            block_width: full.block_width,
            block_height: full.block_height,
            bands: full.samples_per_pixel,
            bits_per_sample: full.bits_per_sample,
            sample_format: full.sample_format,
            compression: full.compression,
            geo_transform: self.meta.geo_transform,
            crs: self.meta.crs.clone(),
            nodata: self.meta.nodata,
            num_overviews: self.ifds.len().saturating_sub(1),
        }
    }

    /// GeoTransform of an IFD level; overviews scale the full-resolution pixel size.
    pub fn geo_transform_for(&self, ifd_idx: usize) -> GeoTransform {
        let gt = self.meta.geo_transform;
        match (self.ifds.first(), self.ifds.get(ifd_idx)) {
            (Some(full), Some(ovr)) if ifd_idx > 0 => {
                let sx = full.width as f64 / ovr.width as f64;
                let sy = full.height as f64 / ovr.height as f64;
                GeoTransform::new(gt.origin_x, gt.origin_y, gt.pixel_width * sx, gt.pixel_height * sy)
            }
            _ => gt,
        }
    }

    /// Read one band (0-based) inside a pixel window.
    ///
    /// Only the blocks the window touches are requested; uncached blocks are
    /// fetched concurrently in batches of `max_concurrent_fetches`.
    pub async fn read_window<T: RasterElement>(
        &mut self,
        band: usize,
        window: &PixelWindow,
        overview: Option<usize>,
    ) -> Result<Array2<T>> {
        let ifd_idx = overview.unwrap_or(0);
        let layout = self.layout(ifd_idx)?;
        if band >= layout.samples_per_pixel {
            return Err(clearsky_core::Error::InvalidParameter {
                name: "band",
                value: band.to_string(),
                reason: format!("image has {} bands", layout.samples_per_pixel),
            }
            .into());
        }
        if !window.fits(layout.width, layout.height) {
            return Err(CloudError::BBoxOutside);
        }

        let fill = self
            .meta
            .nodata
            .and_then(|v| <T as num_traits::NumCast>::from(v))
            .unwrap_or_else(T::zero);
        let mut out = Array2::from_elem(window.shape(), fill);
        let (plane, sample) = layout.band_location(band);

        let mut missing = Vec::new();
        for block in layout.blocks_for_window(window) {
            let block_idx = layout.block_index(plane, block);
            let key = BlockKey { ifd_idx, block_idx };
            if let Some(bytes) = self.cache.get(&key) {
                let decoded: Vec<T> = layout.decode_block(bytes, self.byte_order, block.block_row)?;
                layout.copy_block(&decoded, block, sample, window, &mut out.view_mut());
            } else if let Some(range) = layout.block_range(block_idx) {
                missing.push((block, key, range));
            }
        }

        debug!(url = %self.url, blocks = missing.len(), "fetching blocks");
        for chunk in missing.chunks(self.options.max_concurrent_fetches.max(1)) {
            let ranges: Vec<(u64, u64)> = chunk.iter().map(|&(_, _, r)| r).collect();
            let fetched = self.client.fetch_ranges(&self.url, &ranges).await?;
            for (&(block, key, _), bytes) in chunk.iter().zip(fetched) {
                let decoded: Vec<T> = layout.decode_block(&bytes, self.byte_order, block.block_row)?;
                layout.copy_block(&decoded, block, sample, window, &mut out.view_mut());
                self.cache.insert(key, bytes);
            }
        }

        Ok(out)
    }

    /// Read the part of a band covered by `bbox`, given in the raster's CRS.
    ///
    /// The window is snapped outward to whole pixels; the returned raster
    /// carries the window's own transform.
    pub async fn read_bbox<T: RasterElement>(
        &mut self,
        band: usize,
        bbox: &BBox,
        overview: Option<usize>,
    ) -> Result<Raster<T>> {
        let ifd_idx = overview.unwrap_or(0);
        let layout = self.layout(ifd_idx)?;
        let gt = self.geo_transform_for(ifd_idx);
        let window = gt
            .window_for_bbox(bbox, layout.width, layout.height)
            .ok_or(CloudError::BBoxOutside)?;

        let data = self.read_window::<T>(band, &window, overview).await?;
        let nodata = self.meta.nodata.and_then(|v| <T as num_traits::NumCast>::from(v));
        Ok(Raster::with_meta(
            data,
            gt.window_origin(window.col_off, window.row_off),
            self.meta.crs.clone(),
            nodata,
        ))
    }

    /// Number of blocks currently cached.
    pub fn cached_blocks(&self) -> usize {
        self.cache.len()
    }

    // Cloned so the layout can be used while `self` is borrowed mutably
    fn layout(&self, ifd_idx: usize) -> Result<ImageLayout> {
        self.ifds.get(ifd_idx).cloned().ok_or(CloudError::OverviewOutOfRange {
            index: ifd_idx,
            count: self.ifds.len().saturating_sub(1),
        })
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Bytes `[offset, offset + len)` from the prefetched prefix, or a Range request.
async fn slice_or_fetch(client: &HttpClient, url: &str, prefix: &[u8], offset: u64, len: u64) -> Result<Vec<u8>> {
    let start = offset as usize;
    let end = start + len as usize;
    if end <= prefix.len() {
        Ok(prefix[start..end].to_vec())
    } else {
        client.fetch_range(url, offset, len).await
    }
}
