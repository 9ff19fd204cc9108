//! Block layout of a TIFF image: tiles or strips, chunky or planar.
//!
//! Shared by the local reader and the remote COG reader: both resolve an
//! IFD into an [`ImageLayout`], ask it which blocks a window touches, fetch
//! those blocks their own way and hand the bytes back for decoding.

use ndarray::ArrayViewMut2;

use crate::error::{Error, Result};
use crate::io::codec::{self, predictor};
use crate::io::ifd::{tags, TagSet, TiffByteOrder};
use crate::raster::{PixelWindow, RasterElement};

/// Everything needed to locate and decode the blocks of one IFD.
#[derive(Debug, Clone)]
pub struct ImageLayout {
    pub width: usize,
    pub height: usize,
    pub block_width: usize,
    pub block_height: usize,
    pub tiled: bool,
    pub block_offsets: Vec<u64>,
    pub block_byte_counts: Vec<u64>,
    pub bits_per_sample: u16,
    pub sample_format: u16,
    pub compression: u16,
    pub predictor: u16,
    pub samples_per_pixel: usize,
    /// PlanarConfiguration = 2: one block set per sample
    pub planar: bool,
    /// NewSubfileType bit 0: this IFD is an overview
    pub reduced_resolution: bool,
}

/// A block that intersects a requested window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    pub block_row: usize,
    pub block_col: usize,
}

fn missing(tag: &str) -> Error {
    Error::InvalidTiff(format!("missing required tag {}", tag))
}

impl ImageLayout {
    pub fn from_tags(set: &TagSet) -> Result<Self> {
        let width = set.u64(tags::IMAGE_WIDTH).ok_or_else(|| missing("ImageWidth"))? as usize;
        let height = set.u64(tags::IMAGE_LENGTH).ok_or_else(|| missing("ImageLength"))? as usize;
        let samples_per_pixel = set.u64(tags::SAMPLES_PER_PIXEL).unwrap_or(1).max(1) as usize;

        let bits = set.u64_values(tags::BITS_PER_SAMPLE).unwrap_or_else(|| vec![1]);
        let bits_per_sample = bits.first().copied().unwrap_or(1) as u16;
        if bits.iter().any(|&b| b as u16 != bits_per_sample) {
            return Err(Error::UnsupportedDataType("mixed bits per sample".into()));
        }
        let sample_format = set.u64(tags::SAMPLE_FORMAT).unwrap_or(1) as u16;

        let compression = set.u64(tags::COMPRESSION).unwrap_or(codec::compression::NONE as u64) as u16;
        let predictor = set.u64(tags::PREDICTOR).unwrap_or(predictor::NONE as u64) as u16;
        let planar = set.u64(tags::PLANAR_CONFIG).unwrap_or(1) == 2;
        let reduced_resolution = set.u64(tags::NEW_SUBFILE_TYPE).unwrap_or(0) & 1 == 1;

        let tiled = set.contains(tags::TILE_WIDTH);
        let (block_width, block_height, offsets_tag, counts_tag) = if tiled {
            let tw = set.u64(tags::TILE_WIDTH).ok_or_else(|| missing("TileWidth"))? as usize;
            let th = set.u64(tags::TILE_LENGTH).ok_or_else(|| missing("TileLength"))? as usize;
            (tw, th, tags::TILE_OFFSETS, tags::TILE_BYTE_COUNTS)
        } else {
            let rps = set.u64(tags::ROWS_PER_STRIP).unwrap_or(height as u64) as usize;
            (width, rps.clamp(1, height.max(1)), tags::STRIP_OFFSETS, tags::STRIP_BYTE_COUNTS)
        };
        if block_width == 0 || block_height == 0 {
            return Err(Error::InvalidTiff("zero block size".into()));
        }

        let block_offsets = set.u64_values(offsets_tag).ok_or_else(|| missing("block offsets"))?;
        let block_byte_counts = set.u64_values(counts_tag).ok_or_else(|| missing("block byte counts"))?;

        let layout = Self {
            width,
            height,
            block_width,
            block_height,
            tiled,
            block_offsets,
            block_byte_counts,
            bits_per_sample,
            sample_format,
            compression,
            predictor,
            samples_per_pixel,
            planar,
            reduced_resolution,
        };

        let expected = layout.blocks_per_plane() * layout.planes();
        if layout.block_offsets.len() < expected || layout.block_byte_counts.len() < expected {
            return Err(Error::InvalidTiff(format!(
                "expected {} blocks, found {} offsets and {} byte counts",
                expected,
                layout.block_offsets.len(),
                layout.block_byte_counts.len()
            )));
        }
        Ok(layout)
    }

    pub fn blocks_across(&self) -> usize {
        self.width.div_ceil(self.block_width)
    }

    pub fn blocks_down(&self) -> usize {
        self.height.div_ceil(self.block_height)
    }

    pub fn blocks_per_plane(&self) -> usize {
        self.blocks_across() * self.blocks_down()
    }

    /// Separate block sets stored in the file.
    pub fn planes(&self) -> usize {
        if self.planar {
            self.samples_per_pixel
        } else {
            1
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample as usize).div_ceil(8)
    }

    /// Interleaved samples per pixel inside one block.
    pub fn block_samples(&self) -> usize {
        if self.planar {
            1
        } else {
            self.samples_per_pixel
        }
    }

    /// Rows stored in a block; the last strip of a stripped image may be short.
    pub fn block_rows(&self, block_row: usize) -> usize {
        if self.tiled {
            self.block_height
        } else {
            self.block_height.min(self.height.saturating_sub(block_row * self.block_height))
        }
    }

    /// Uncompressed size of a block in bytes.
    pub fn block_raw_size(&self, block_row: usize) -> usize {
        self.block_width * self.block_rows(block_row) * self.block_samples() * self.bytes_per_sample()
    }

    /// Plane holding `band` and the sample index of `band` inside a block.
    pub fn band_location(&self, band: usize) -> (usize, usize) {
        if self.planar {
            (band, 0)
        } else {
            (0, band)
        }
    }

    /// Linear block index in the offsets array.
    pub fn block_index(&self, plane: usize, block: BlockRef) -> usize {
        plane * self.blocks_per_plane() + block.block_row * self.blocks_across() + block.block_col
    }

    /// File byte range `(offset, length)` of a block; `None` for sparse blocks.
    pub fn block_range(&self, index: usize) -> Option<(u64, u64)> {
        let offset = *self.block_offsets.get(index)?;
        let length = *self.block_byte_counts.get(index)?;
        if length == 0 {
            None
        } else {
            Some((offset, length))
        }
    }

    /// Blocks that intersect `window`, row-major.
    pub fn blocks_for_window(&self, window: &PixelWindow) -> Vec<BlockRef> {
        if window.is_empty() {
            return Vec::new();
        }
        let col_min = window.col_off / self.block_width;
        let col_max = window.col_end().div_ceil(self.block_width).min(self.blocks_across());
        let row_min = window.row_off / self.block_height;
        let row_max = window.row_end().div_ceil(self.block_height).min(self.blocks_down());

        let mut blocks = Vec::with_capacity((col_max - col_min) * (row_max - row_min));
        for block_row in row_min..row_max {
            for block_col in col_min..col_max {
                blocks.push(BlockRef { block_row, block_col });
            }
        }
        blocks
    }

    /// Decompress, undo the predictor and decode one block into samples.
    pub fn decode_block<T: RasterElement>(
        &self,
        compressed: &[u8],
        byte_order: TiffByteOrder,
        block_row: usize,
    ) -> Result<Vec<T>> {
        let expected = self.block_raw_size(block_row);
        let mut raw = codec::decompress_block(compressed, self.compression, expected)?;
        // Some writers pad the final block; decode only what the block holds
        raw.truncate(expected);

        match self.predictor {
            predictor::NONE => {}
            predictor::HORIZONTAL => {
                let row_len = self.block_width * self.block_samples();
                codec::undo_horizontal_predictor(
                    &mut raw,
                    byte_order,
                    self.bits_per_sample,
                    row_len,
                    self.block_samples(),
                )?;
            }
            other => {
                return Err(Error::InvalidTiff(format!("unsupported predictor {}", other)));
            }
        }

        codec::decode_samples(&raw, byte_order, self.bits_per_sample, self.sample_format)
    }

    /// Copy the part of a decoded block that falls inside `window` into `out`.
    ///
    /// `out` has the window's shape; `sample` selects the interleaved sample
    /// for chunky blocks (always 0 for planar).
    pub fn copy_block<T: Copy>(
        &self,
        block: &[T],
        at: BlockRef,
        sample: usize,
        window: &PixelWindow,
        out: &mut ArrayViewMut2<'_, T>,
    ) {
        let samples = self.block_samples();
        let block_y = at.block_row * self.block_height;
        let block_x = at.block_col * self.block_width;

        let row_start = window.row_off.max(block_y);
        let row_end = window.row_end().min(block_y + self.block_rows(at.block_row)).min(self.height);
        let col_start = window.col_off.max(block_x);
        let col_end = window.col_end().min(block_x + self.block_width).min(self.width);

        for img_row in row_start..row_end {
            let block_r = img_row - block_y;
            let out_r = img_row - window.row_off;
            for img_col in col_start..col_end {
                let idx = (block_r * self.block_width + (img_col - block_x)) * samples + sample;
                if let Some(&v) = block.get(idx) {
                    out[[out_r, img_col - window.col_off]] = v;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ifd::{RawIfd, RawTagEntry};
    use ndarray::Array2;

    fn short(tag: u16, values: &[u16]) -> (RawTagEntry, Vec<u8>) {
        let entry = RawTagEntry {
            tag,
            type_id: 3,
            count: values.len() as u32,
            value_or_offset: 0,
            inline_bytes: [0; 4],
            inline: false,
        };
        (entry, values.iter().flat_map(|v| v.to_le_bytes()).collect())
    }

    fn long(tag: u16, values: &[u32]) -> (RawTagEntry, Vec<u8>) {
        let entry = RawTagEntry {
            tag,
            type_id: 4,
            count: values.len() as u32,
            value_or_offset: 0,
            inline_bytes: [0; 4],
            inline: false,
        };
        (entry, values.iter().flat_map(|v| v.to_le_bytes()).collect())
    }

    fn set(values: Vec<(RawTagEntry, Vec<u8>)>) -> TagSet {
        let empty = RawIfd {
            entries: vec![],
            next_ifd_offset: 0,
        };
        let mut s = TagSet::from_inline(TiffByteOrder::LittleEndian, &empty);
        for (e, d) in values {
            s.insert_external(&e, d);
        }
        s
    }

    /// 600x500 image, 256x256 tiles, 2 planar bands.
    fn tiled_planar() -> ImageLayout {
        let offsets: Vec<u32> = (0..12).map(|i| 1000 + i * 10).collect();
        let counts: Vec<u32> = vec![10; 12];
        ImageLayout::from_tags(&set(vec![
            long(tags::IMAGE_WIDTH, &[600]),
            long(tags::IMAGE_LENGTH, &[500]),
            short(tags::SAMPLES_PER_PIXEL, &[2]),
            short(tags::BITS_PER_SAMPLE, &[16, 16]),
            short(tags::PLANAR_CONFIG, &[2]),
            short(tags::TILE_WIDTH, &[256]),
            short(tags::TILE_LENGTH, &[256]),
            long(tags::TILE_OFFSETS, &offsets),
            long(tags::TILE_BYTE_COUNTS, &counts),
        ]))
        .unwrap()
    }

    #[test]
    fn test_tiled_planar_geometry() {
        let layout = tiled_planar();
        assert_eq!(layout.blocks_across(), 3);
        assert_eq!(layout.blocks_down(), 2);
        assert_eq!(layout.planes(), 2);
        assert_eq!(layout.band_location(1), (1, 0));
        assert_eq!(
            layout.block_index(1, BlockRef { block_row: 1, block_col: 2 }),
            6 + 3 + 2
        );
        assert_eq!(layout.block_raw_size(0), 256 * 256 * 2);
    }

    #[test]
    fn test_blocks_for_window() {
        let layout = tiled_planar();
        let blocks = layout.blocks_for_window(&PixelWindow::new(250, 250, 10, 10));
        assert_eq!(blocks.len(), 4);
        let blocks = layout.blocks_for_window(&PixelWindow::new(0, 0, 100, 100));
        assert_eq!(blocks, vec![BlockRef { block_row: 0, block_col: 0 }]);
    }

    #[test]
    fn test_block_count_validated() {
        let result = ImageLayout::from_tags(&set(vec![
            long(tags::IMAGE_WIDTH, &[600]),
            long(tags::IMAGE_LENGTH, &[500]),
            short(tags::TILE_WIDTH, &[256]),
            short(tags::TILE_LENGTH, &[256]),
            long(tags::TILE_OFFSETS, &[0, 1]),
            long(tags::TILE_BYTE_COUNTS, &[1, 1]),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_strips_last_is_short() {
        let layout = ImageLayout::from_tags(&set(vec![
            long(tags::IMAGE_WIDTH, &[4]),
            long(tags::IMAGE_LENGTH, &[5]),
            short(tags::BITS_PER_SAMPLE, &[8]),
            short(tags::ROWS_PER_STRIP, &[2]),
            long(tags::STRIP_OFFSETS, &[0, 8, 16]),
            long(tags::STRIP_BYTE_COUNTS, &[8, 8, 4]),
        ]))
        .unwrap();
        assert!(!layout.tiled);
        assert_eq!(layout.blocks_down(), 3);
        assert_eq!(layout.block_rows(2), 1);
        assert_eq!(layout.block_raw_size(2), 4);
    }

    #[test]
    fn test_copy_chunky_sample() {
        // 2x2 image as one 2x2 tile, 3 interleaved samples
        let layout = ImageLayout {
            width: 2,
            height: 2,
            block_width: 2,
            block_height: 2,
            tiled: true,
            block_offsets: vec![0],
            block_byte_counts: vec![12],
            bits_per_sample: 8,
            sample_format: 1,
            compression: 1,
            predictor: 1,
            samples_per_pixel: 3,
            planar: false,
            reduced_resolution: false,
        };
        let block: Vec<u8> = (0..12).collect();
        let window = PixelWindow::new(1, 0, 1, 2);
        let mut out = Array2::<u8>::zeros((2, 1));
        layout.copy_block(&block, BlockRef { block_row: 0, block_col: 0 }, 2, &window, &mut out.view_mut());
        // pixel (0,1) sample 2 -> index 5; pixel (1,1) sample 2 -> index 11
        assert_eq!(out, ndarray::array![[5], [11]]);
    }
}
