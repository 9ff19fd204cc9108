//! Windowed GeoTIFF reader built on `tiff::decoder`.
//!
//! Only the chunks (tiles or strips) that intersect a requested window are
//! decoded, so cropping a 10980x10980 Sentinel-2 band to an area of interest
//! costs a handful of tiles instead of the whole file.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use ndarray::{Array2, Array3};
use num_traits::NumCast;
use tiff::decoder::{ChunkType, Decoder, DecodingResult};
use tiff::tags::{PlanarConfiguration, Tag};

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::io::geokeys::GeoTiffMeta;
use crate::raster::{GeoTransform, PixelWindow, Raster, RasterElement, RasterStack};

/// How the full-resolution image is cut into chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    pub tiled: bool,
    /// Bands stored one plane after another
    pub planar: bool,
    pub chunk_width: usize,
    pub chunk_height: usize,
    pub bits_per_sample: u16,
}

/// A GeoTIFF opened for windowed reads of its full-resolution image.
pub struct GeoTiffReader<R: Read + Seek> {
    decoder: Decoder<R>,
    width: usize,
    height: usize,
    bands: usize,
    chunks: ChunkLayout,
    meta: GeoTiffMeta,
}

impl GeoTiffReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> GeoTiffReader<R> {
    /// Decode the header and first IFD of `source`.
    pub fn new(source: R) -> Result<Self> {
        let mut decoder = Decoder::new(source)?;
        let (width, height) = decoder.dimensions()?;
        let bands = decoder
            .find_tag_unsigned::<u16>(Tag::SamplesPerPixel)?
            .unwrap_or(1) as usize;
        let planar = decoder.find_tag_unsigned::<u16>(Tag::PlanarConfiguration)?
            == Some(PlanarConfiguration::Planar.to_u16());
        let bits_per_sample = decoder
            .find_tag_unsigned_vec::<u16>(Tag::BitsPerSample)?
            .and_then(|bits| bits.first().copied())
            .unwrap_or(1);
        let (chunk_width, chunk_height) = decoder.chunk_dimensions();
        let chunks = ChunkLayout {
            tiled: decoder.get_chunk_type() == ChunkType::Tile,
            planar: planar && bands > 1,
            chunk_width: chunk_width as usize,
            chunk_height: chunk_height as usize,
            bits_per_sample,
        };
        let meta = GeoTiffMeta::from_decoder(&mut decoder)?;

        Ok(Self {
            decoder,
            width: width as usize,
            height: height as usize,
            bands,
            chunks,
            meta,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn band_count(&self) -> usize {
        self.bands
    }

    pub fn chunk_layout(&self) -> ChunkLayout {
        self.chunks
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.meta.geo_transform
    }

    pub fn crs(&self) -> Option<&CRS> {
        self.meta.crs.as_ref()
    }

    pub fn nodata(&self) -> Option<f64> {
        self.meta.nodata
    }

    /// Read one band (0-based) inside `window`.
    pub fn read_window<T: RasterElement>(&mut self, band: usize, window: &PixelWindow) -> Result<Array2<T>> {
        if band >= self.bands {
            return Err(Error::InvalidParameter {
                name: "band",
                value: band.to_string(),
                reason: format!("image has {} bands", self.bands),
            });
        }
        self.check_window(window)?;

        let mut out = Array2::from_elem(window.shape(), self.fill_value::<T>());
        if self.chunks.planar {
            self.decode_window(band, window, |_, r, c, v| out[[r, c]] = v)?;
        } else {
            self.decode_window(0, window, |s, r, c, v| {
                if s == band {
                    out[[r, c]] = v;
                }
            })?;
        }
        Ok(out)
    }

    /// Read a full band as a georeferenced raster.
    pub fn read_band<T: RasterElement>(&mut self, band: usize) -> Result<Raster<T>> {
        let window = PixelWindow::full(self.width, self.height);
        let data = self.read_window(band, &window)?;
        Ok(Raster::with_meta(
            data,
            *self.transform(),
            self.meta.crs.clone(),
            self.typed_nodata(),
        ))
    }

    /// Read every band inside `window` into a `(band, row, col)` array.
    ///
    /// Interleaved files decode each chunk once for all bands.
    pub fn read_stack_window<T: RasterElement>(&mut self, window: &PixelWindow) -> Result<Array3<T>> {
        self.check_window(window)?;
        let (rows, cols) = window.shape();
        let mut out = Array3::from_elem((self.bands, rows, cols), self.fill_value::<T>());
        if self.chunks.planar {
            for band in 0..self.bands {
                self.decode_window(band, window, |_, r, c, v| out[[band, r, c]] = v)?;
            }
        } else {
            self.decode_window(0, window, |s, r, c, v| out[[s, r, c]] = v)?;
        }
        Ok(out)
    }

    /// Read all bands as a stack.
    pub fn read_stack<T: RasterElement>(&mut self) -> Result<RasterStack<T>> {
        let window = PixelWindow::full(self.width, self.height);
        let data = self.read_stack_window(&window)?;
        let mut stack = RasterStack::from_array(data);
        stack.set_transform(*self.transform());
        stack.set_crs(self.meta.crs.clone());
        stack.set_nodata(self.typed_nodata());
        Ok(stack)
    }

    /// Decode the last chunk of every plane.
    pub fn verify(&mut self) -> Result<()> {
        let ChunkLayout {
            chunk_width,
            chunk_height,
            planar,
            ..
        } = self.chunks;
        let per_plane = self.width.div_ceil(chunk_width) * self.height.div_ceil(chunk_height);
        let planes = if planar { self.bands } else { 1 };
        for plane in 1..=planes {
            self.decoder.read_chunk((plane * per_plane - 1) as u32)?;
        }
        Ok(())
    }

    fn check_window(&self, window: &PixelWindow) -> Result<()> {
        if window.fits(self.width, self.height) {
            return Ok(());
        }
        Err(Error::InvalidParameter {
            name: "window",
            value: format!("{:?}", window),
            reason: format!("outside {}x{} image", self.width, self.height),
        })
    }

    /// Decode the chunks of `plane` that meet `window` and hand every sample
    /// inside it to `put(sample, row, col, value)`, in window coordinates.
    fn decode_window<T: RasterElement>(
        &mut self,
        plane: usize,
        window: &PixelWindow,
        mut put: impl FnMut(usize, usize, usize, T),
    ) -> Result<()> {
        let ChunkLayout {
            chunk_width: cw,
            chunk_height: ch,
            planar,
            ..
        } = self.chunks;
        let samples = if planar { 1 } else { self.bands };
        let across = self.width.div_ceil(cw);
        let per_plane = across * self.height.div_ceil(ch);
        let (row_end, col_end) = (window.row_end(), window.col_end());
        let fill = self.fill_value::<T>();

        for chunk_row in window.row_off / ch..row_end.div_ceil(ch) {
            for chunk_col in window.col_off / cw..col_end.div_ceil(cw) {
                let index = plane * per_plane + chunk_row * across + chunk_col;
                let (data_width, _) = self.decoder.chunk_data_dimensions(index as u32);
                let values = cast_chunk::<T>(self.decoder.read_chunk(index as u32)?, fill);
                let stride = data_width as usize * samples;
                if stride == 0 {
                    continue;
                }

                for (r, line) in values.chunks_exact(stride).enumerate() {
                    let y = chunk_row * ch + r;
                    if y < window.row_off || y >= row_end {
                        continue;
                    }
                    for (c, pixel) in line.chunks_exact(samples).enumerate() {
                        let x = chunk_col * cw + c;
                        if x < window.col_off || x >= col_end {
                            continue;
                        }
                        for (s, &v) in pixel.iter().enumerate() {
                            put(s, y - window.row_off, x - window.col_off, v);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn typed_nodata<T: RasterElement>(&self) -> Option<T> {
        self.meta.nodata.and_then(|v| <T as NumCast>::from(v))
    }

    fn fill_value<T: RasterElement>(&self) -> T {
        self.typed_nodata().unwrap_or_else(T::zero)
    }
}

/// Convert a decoded chunk to `T`; values `T` cannot hold become `fill`.
fn cast_chunk<T: RasterElement>(chunk: DecodingResult, fill: T) -> Vec<T> {
    fn cast<S: NumCast, T: RasterElement>(buf: Vec<S>, fill: T) -> Vec<T> {
        buf.into_iter().map(|v| T::from(v).unwrap_or(fill)).collect()
    }
    match chunk {
        DecodingResult::U8(b) => cast(b, fill),
        DecodingResult::U16(b) => cast(b, fill),
        DecodingResult::U32(b) => cast(b, fill),
        DecodingResult::U64(b) => cast(b, fill),
        DecodingResult::I8(b) => cast(b, fill),
        DecodingResult::I16(b) => cast(b, fill),
        DecodingResult::I32(b) => cast(b, fill),
        DecodingResult::I64(b) => cast(b, fill),
        DecodingResult::F16(b) => cast(b.into_iter().map(<f32 as From<_>>::from).collect(), fill),
        DecodingResult::F32(b) => cast(b, fill),
        DecodingResult::F64(b) => cast(b, fill),
    }
}

/// Read one band of a GeoTIFF file.
pub fn read_geotiff<T: RasterElement, P: AsRef<Path>>(path: P, band: usize) -> Result<Raster<T>> {
    GeoTiffReader::open(path)?.read_band(band)
}

/// Whether `path` holds a complete, decodable GeoTIFF.
pub fn verify_geotiff<P: AsRef<Path>>(path: P) -> Result<()> {
    GeoTiffReader::open(path)?.verify()
}

/// Read every band of a GeoTIFF file.
pub fn read_stack<T: RasterElement, P: AsRef<Path>>(path: P) -> Result<RasterStack<T>> {
    GeoTiffReader::open(path)?.read_stack()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use std::io::Cursor;
    use tiff::encoder::{colortype, TiffEncoder};

    /// Striped, single-band u16 file written by the tiff crate's own encoder
    fn strip_tiff(rows: u32, cols: u32) -> Vec<u8> {
        let data: Vec<u16> = (0..rows * cols).map(|i| i as u16).collect();
        let mut buf = Cursor::new(Vec::new());
        let mut encoder = TiffEncoder::new(&mut buf).unwrap();
        let mut image = encoder.new_image::<colortype::Gray16>(cols, rows).unwrap();
        image.rows_per_strip(7).unwrap();
        image.write_data(&data).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_strip_window_read() {
        let mut reader = GeoTiffReader::new(Cursor::new(strip_tiff(30, 20))).unwrap();
        assert_eq!((reader.width(), reader.height(), reader.band_count()), (20, 30, 1));
        let layout = reader.chunk_layout();
        assert!(!layout.tiled);
        assert_eq!(layout.chunk_height, 7);

        let part: Array2<f32> = reader.read_window(0, &PixelWindow::new(3, 6, 4, 3)).unwrap();
        assert_eq!(part.dim(), (3, 4));
        assert_eq!(part[[0, 0]], 123.0);
        assert_eq!(part[[2, 3]], 166.0);
        assert!(reader.nodata().is_none());
        assert!(reader.crs().is_none());
    }

    #[test]
    fn test_interleaved_bands() {
        let (rows, cols) = (12u32, 9u32);
        let data: Vec<u8> = (0..rows * cols)
            .flat_map(|i| [i as u8, (i + 100) as u8, (i + 200) as u8])
            .collect();
        let mut buf = Cursor::new(Vec::new());
        let mut encoder = TiffEncoder::new(&mut buf).unwrap();
        let mut image = encoder.new_image::<colortype::RGB8>(cols, rows).unwrap();
        image.rows_per_strip(5).unwrap();
        image.write_data(&data).unwrap();

        let mut reader = GeoTiffReader::new(Cursor::new(buf.into_inner())).unwrap();
        assert_eq!(reader.band_count(), 3);
        assert!(!reader.chunk_layout().planar);

        // Pixel (row 6, col 2) is index 56
        let window = PixelWindow::new(2, 4, 3, 4);
        let green: Array2<u8> = reader.read_window(1, &window).unwrap();
        assert_eq!(green[[2, 0]], 156);
        let all: Array3<u8> = reader.read_stack_window(&window).unwrap();
        assert_eq!(all.dim(), (3, 4, 3));
        assert_eq!((all[[0, 2, 0]], all[[2, 2, 0]]), (56, 0));
    }

    #[test]
    fn test_verify_rejects_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strips.tif");
        let bytes = strip_tiff(30, 20);
        std::fs::write(&path, &bytes).unwrap();
        verify_geotiff(&path).unwrap();

        std::fs::write(&path, &bytes[..bytes.len() - 100]).unwrap();
        assert!(verify_geotiff(&path).is_err());

        std::fs::write(&path, &bytes[..4]).unwrap();
        assert!(verify_geotiff(&path).is_err());
        assert!(verify_geotiff(dir.path().join("missing.tif")).is_err());
    }

    #[test]
    fn test_window_outside_image() {
        let mut reader = GeoTiffReader::new(Cursor::new(strip_tiff(10, 10))).unwrap();
        assert!(reader.read_window::<u16>(0, &PixelWindow::new(8, 8, 4, 4)).is_err());
        assert!(reader.read_window::<u16>(1, &PixelWindow::new(0, 0, 2, 2)).is_err());
    }
}
