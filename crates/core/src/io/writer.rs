//! Tiled GeoTIFF writer.
//!
//! Bands are stored band-sequential (PlanarConfiguration = 2) in square
//! tiles, each tile deflate-compressed on its own. Edge tiles are padded
//! with nodata. Georeferencing is written as ModelPixelScale +
//! ModelTiepoint plus a GeoKeyDirectory when the CRS has an EPSG code.
//!
//! Rows are accepted in top-to-bottom blocks and tiles are emitted as soon
//! as a tile row is complete, so at most one tile row of every band is held
//! in memory. Files are written next to their destination and renamed into
//! place, so a path either holds a complete GeoTIFF or nothing new.

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use ndarray::{s, Array3, ArrayView3, Axis};
use tempfile::NamedTempFile;
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKindStandard};
use tiff::tags::Tag;

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::io::codec;
use crate::io::geokeys;
use crate::raster::{GeoTransform, Raster, RasterElement, RasterStack};

/// Block compression for written files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    #[cfg(feature = "deflate")]
    Deflate,
}

impl Compression {
    fn code(self) -> u16 {
        match self {
            Compression::None => codec::compression::NONE,
            #[cfg(feature = "deflate")]
            Compression::Deflate => codec::compression::DEFLATE,
        }
    }

    fn encode(self, raw: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(raw.to_vec()),
            #[cfg(feature = "deflate")]
            Compression::Deflate => codec::compress_deflate(raw),
        }
    }
}

/// Options for writing GeoTIFF files
#[derive(Debug, Clone)]
pub struct GeoTiffOptions {
    /// Tile edge in pixels; must be a multiple of 16
    pub tile_size: usize,
    pub compression: Compression,
}

impl Default for GeoTiffOptions {
    fn default() -> Self {
        Self {
            tile_size: 256,
            #[cfg(feature = "deflate")]
            compression: Compression::Deflate,
            #[cfg(not(feature = "deflate"))]
            compression: Compression::None,
        }
    }
}

/// Shape and georeferencing of a file whose pixels arrive later.
#[derive(Debug, Clone)]
pub struct StackHeader<T> {
    pub bands: usize,
    pub rows: usize,
    pub cols: usize,
    pub transform: GeoTransform,
    pub crs: Option<CRS>,
    pub nodata: Option<T>,
}

/// Receives row blocks for one image and writes finished tile rows.
pub struct RowSink<'a, T: RasterElement, W: Write + Seek> {
    dir: DirectoryEncoder<'a, W, TiffKindStandard>,
    header: StackHeader<T>,
    tile: usize,
    across: usize,
    down: usize,
    compression: Compression,
    fill: T,
    /// `(band, tile, cols)` rows of the tile row being assembled
    pending: Array3<T>,
    buffered: usize,
    received: usize,
    tile_row: usize,
    offsets: Vec<u32>,
    byte_counts: Vec<u32>,
    values: Vec<T>,
    raw: Vec<u8>,
}

impl<'a, T: RasterElement, W: Write + Seek> RowSink<'a, T, W> {
    fn new(dir: DirectoryEncoder<'a, W, TiffKindStandard>, header: StackHeader<T>, options: &GeoTiffOptions) -> Self {
        let tile = options.tile_size;
        let across = header.cols.div_ceil(tile);
        let down = header.rows.div_ceil(tile);
        let fill = header.nodata.unwrap_or_else(T::zero);
        let tiles = header.bands * across * down;
        Self {
            dir,
            pending: Array3::from_elem((header.bands, tile, header.cols), fill),
            header,
            tile,
            across,
            down,
            compression: options.compression,
            fill,
            buffered: 0,
            received: 0,
            tile_row: 0,
            offsets: vec![0; tiles],
            byte_counts: vec![0; tiles],
            values: vec![fill; tile * tile],
            raw: vec![0; tile * tile * (T::BITS / 8) as usize],
        }
    }

    /// Rows still expected before the image is complete.
    pub fn rows_remaining(&self) -> usize {
        self.header.rows - self.received
    }

    /// Append the next `(band, row, col)` block below the rows already pushed.
    pub fn push_rows(&mut self, block: ArrayView3<'_, T>) -> Result<()> {
        let (bands, rows, cols) = block.dim();
        if bands != self.header.bands || cols != self.header.cols || rows > self.rows_remaining() {
            return Err(Error::SizeMismatch {
                er: self.rows_remaining(),
                ec: self.header.cols,
                ar: rows,
                ac: cols,
            });
        }

        let mut start = 0;
        while start < rows {
            let take = (self.tile - self.buffered).min(rows - start);
            self.pending
                .slice_mut(s![.., self.buffered..self.buffered + take, ..])
                .assign(&block.slice(s![.., start..start + take, ..]));
            self.buffered += take;
            self.received += take;
            start += take;
            if self.buffered == self.tile || self.received == self.header.rows {
                self.flush_tile_row()?;
            }
        }
        Ok(())
    }

    fn flush_tile_row(&mut self) -> Result<()> {
        let (tile, cols) = (self.tile, self.header.cols);
        for band in 0..self.header.bands {
            for tile_col in 0..self.across {
                self.values.fill(self.fill);
                let x0 = tile_col * tile;
                for r in 0..self.buffered {
                    for c in 0..tile.min(cols - x0) {
                        self.values[r * tile + c] = self.pending[[band, r, x0 + c]];
                    }
                }
                T::write_native(&self.values, &mut self.raw);
                let block = self.compression.encode(&self.raw)?;
                let offset = self.dir.write_data(&block[..])?;

                // TileOffsets run band by band, then row-major within a band
                let index = (band * self.down + self.tile_row) * self.across + tile_col;
                self.offsets[index] = offset_u32(offset)?;
                self.byte_counts[index] = offset_u32(block.len() as u64)?;
            }
        }
        self.tile_row += 1;
        self.buffered = 0;
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        if self.received != self.header.rows {
            return Err(Error::Encode(format!(
                "image closed after {} of {} rows",
                self.received, self.header.rows
            )));
        }
        let StackHeader {
            bands,
            rows,
            cols,
            ref transform,
            ref crs,
            nodata,
        } = self.header;
        let dir = &mut self.dir;

        dir.write_tag(Tag::ImageWidth, cols as u32)?;
        dir.write_tag(Tag::ImageLength, rows as u32)?;
        dir.write_tag(Tag::BitsPerSample, &vec![T::BITS; bands][..])?;
        dir.write_tag(Tag::Compression, self.compression.code())?;
        // MinIsBlack
        dir.write_tag(Tag::PhotometricInterpretation, 1u16)?;
        dir.write_tag(Tag::SamplesPerPixel, bands as u16)?;
        dir.write_tag(Tag::PlanarConfiguration, 2u16)?;
        dir.write_tag(Tag::TileWidth, self.tile as u32)?;
        dir.write_tag(Tag::TileLength, self.tile as u32)?;
        dir.write_tag(Tag::TileOffsets, &self.offsets[..])?;
        dir.write_tag(Tag::TileByteCounts, &self.byte_counts[..])?;
        if bands > 1 {
            // Unspecified extra samples
            dir.write_tag(Tag::ExtraSamples, &vec![0u16; bands - 1][..])?;
        }
        dir.write_tag(Tag::SampleFormat, &vec![T::SAMPLE_FORMAT; bands][..])?;

        let scale = [transform.pixel_width, transform.pixel_height.abs(), 0.0];
        dir.write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
        let tiepoint = [0.0, 0.0, 0.0, transform.origin_x, transform.origin_y, 0.0];
        dir.write_tag(Tag::ModelTiepointTag, &tiepoint[..])?;

        if let Some(keys) = crs.as_ref().and_then(geokeys::geokey_directory) {
            dir.write_tag(Tag::GeoKeyDirectoryTag, &keys[..])?;
        }
        if let Some(nd) = nodata.and_then(|v| v.to_f64()) {
            let text = geokeys::format_nodata(nd);
            dir.write_tag(Tag::GdalNodata, text.as_str())?;
        }

        self.dir.finish()?;
        Ok(())
    }
}

/// Write a single-band raster.
pub fn write_geotiff<T, P>(raster: &Raster<T>, path: P, options: &GeoTiffOptions) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let (rows, cols) = raster.shape();
    let header = StackHeader {
        bands: 1,
        rows,
        cols,
        transform: *raster.transform(),
        crs: raster.crs().cloned(),
        nodata: raster.nodata(),
    };
    let planes = raster.data().view().insert_axis(Axis(0));
    write_stack_rows(path, &header, options, |sink| sink.push_rows(planes))
}

/// Write a multi-band stack, one plane per band.
pub fn write_stack<T, P>(stack: &RasterStack<T>, path: P, options: &GeoTiffOptions) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let (bands, rows, cols) = stack.data().dim();
    let header = StackHeader {
        bands,
        rows,
        cols,
        transform: *stack.transform(),
        crs: stack.crs().cloned(),
        nodata: stack.nodata(),
    };
    write_stack_rows(path, &header, options, |sink| sink.push_rows(stack.data().view()))
}

/// Write a stack whose rows `produce` pushes block by block.
///
/// The destination only appears once `produce` has pushed every row and
/// the directory is written; on any error the partial file is discarded.
pub fn write_stack_rows<T, P, F>(path: P, header: &StackHeader<T>, options: &GeoTiffOptions, produce: F) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
    F: FnOnce(&mut RowSink<'_, T, &mut BufWriter<File>>) -> Result<()>,
{
    write_atomic(path.as_ref(), |out| encode_rows(header, options, out, produce))
}

/// Run `write` against a temporary file beside `path`, then rename it over `path`.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let temp = NamedTempFile::new_in(parent)?;
    let mut out = BufWriter::new(temp.as_file().try_clone()?);
    write(&mut out)?;
    out.flush()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn offset_u32(offset: u64) -> Result<u32> {
    u32::try_from(offset).map_err(|_| Error::Encode("file exceeds 4 GiB, BigTIFF is not supported".into()))
}

fn encode_rows<T, W, F>(header: &StackHeader<T>, options: &GeoTiffOptions, writer: W, produce: F) -> Result<()>
where
    T: RasterElement,
    W: Write + Seek,
    F: FnOnce(&mut RowSink<'_, T, W>) -> Result<()>,
{
    if header.bands == 0 || header.rows == 0 || header.cols == 0 {
        return Err(Error::InvalidDimensions {
            width: header.cols,
            height: header.rows,
        });
    }
    let tile = options.tile_size;
    if tile == 0 || tile % 16 != 0 {
        return Err(Error::InvalidParameter {
            name: "tile_size",
            value: tile.to_string(),
            reason: "must be a positive multiple of 16".into(),
        });
    }

    let mut encoder = TiffEncoder::new(writer)?;
    let mut sink = RowSink::new(encoder.image_directory()?, header.clone(), options);
    produce(&mut sink)?;
    sink.finish()
}
