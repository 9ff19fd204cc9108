//! Block (tile or strip) compression and sample decoding.
//!
//! Supports DEFLATE (via `flate2`), LZW (via `weezl`), and uncompressed,
//! plus the horizontal differencing predictor.

use crate::error::{Error, Result};
use crate::io::ifd::TiffByteOrder;
use crate::raster::{sample_format, RasterElement};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// TIFF compression codes.
pub mod compression {
    pub const NONE: u16 = 1;
    pub const LZW: u16 = 5;
    pub const DEFLATE: u16 = 8;
    pub const ADOBE_DEFLATE: u16 = 32946;
}

/// TIFF predictor codes.
pub mod predictor {
    pub const NONE: u16 = 1;
    pub const HORIZONTAL: u16 = 2;
    pub const FLOATING_POINT: u16 = 3;
}

/// Decompress one block according to the compression method.
pub fn decompress_block(data: &[u8], compression_code: u16, expected_raw_size: usize) -> Result<Vec<u8>> {
    match compression_code {
        compression::NONE => Ok(data.to_vec()),

        #[cfg(feature = "deflate")]
        compression::DEFLATE | compression::ADOBE_DEFLATE => {
            use std::io::Read;
            // TIFF DEFLATE blocks are zlib streams; some writers emit raw deflate
            let mut decoder = flate2::read::ZlibDecoder::new(data);
            let mut out = Vec::with_capacity(expected_raw_size);
            match decoder.read_to_end(&mut out) {
                Ok(_) => Ok(out),
                Err(_) => {
                    out.clear();
                    let mut decoder = flate2::read::DeflateDecoder::new(data);
                    decoder
                        .read_to_end(&mut out)
                        .map_err(|e| Error::Decompress(format!("DEFLATE: {}", e)))?;
                    Ok(out)
                }
            }
        }

        #[cfg(feature = "lzw")]
        compression::LZW => {
            let mut decoder = weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8);
            decoder
                .decode(data)
                .map_err(|e| Error::Decompress(format!("LZW: {}", e)))
        }

        _ => Err(Error::UnsupportedCompression(compression_code)),
    }
}

/// Zlib-compress one block for writing.
#[cfg(feature = "deflate")]
pub fn compress_deflate(raw: &[u8]) -> Result<Vec<u8>> {
    use std::io::Write;
    let buf = Vec::with_capacity(raw.len() / 2);
    let mut encoder = flate2::write::ZlibEncoder::new(buf, flate2::Compression::default());
    encoder.write_all(raw)?;
    Ok(encoder.finish()?)
}

/// Undo horizontal differencing in place.
///
/// `row_len` is the number of samples per block row (width times samples
/// per pixel for chunky data) and `stride` the samples per pixel.
pub fn undo_horizontal_predictor(
    data: &mut [u8],
    byte_order: TiffByteOrder,
    bits_per_sample: u16,
    row_len: usize,
    stride: usize,
) -> Result<()> {
    let bytes = (bits_per_sample / 8) as usize;
    if bytes == 0 || row_len == 0 {
        return Err(Error::InvalidTiff(format!("predictor on {} bit samples", bits_per_sample)));
    }
    let row_bytes = row_len * bytes;

    for row in data.chunks_exact_mut(row_bytes) {
        match bytes {
            1 => {
                for i in stride..row_len {
                    row[i] = row[i].wrapping_add(row[i - stride]);
                }
            }
            2 => {
                for i in stride..row_len {
                    let prev = read_uint(byte_order, &row[(i - stride) * 2..], 2) as u16;
                    let cur = read_uint(byte_order, &row[i * 2..], 2) as u16;
                    write_uint(byte_order, &mut row[i * 2..], 2, cur.wrapping_add(prev) as u64);
                }
            }
            4 => {
                for i in stride..row_len {
                    let prev = read_uint(byte_order, &row[(i - stride) * 4..], 4) as u32;
                    let cur = read_uint(byte_order, &row[i * 4..], 4) as u32;
                    write_uint(byte_order, &mut row[i * 4..], 4, cur.wrapping_add(prev) as u64);
                }
            }
            _ => {
                return Err(Error::InvalidTiff(format!(
                    "horizontal predictor on {} bit samples",
                    bits_per_sample
                )))
            }
        }
    }
    Ok(())
}

fn read_uint(order: TiffByteOrder, data: &[u8], nbytes: usize) -> u64 {
    match order {
        TiffByteOrder::LittleEndian => LittleEndian::read_uint(data, nbytes),
        TiffByteOrder::BigEndian => BigEndian::read_uint(data, nbytes),
    }
}

fn write_uint(order: TiffByteOrder, data: &mut [u8], nbytes: usize, value: u64) {
    match order {
        TiffByteOrder::LittleEndian => LittleEndian::write_uint(data, value, nbytes),
        TiffByteOrder::BigEndian => BigEndian::write_uint(data, value, nbytes),
    }
}

/// Decode raw sample bytes into `T`, honouring the file byte order.
///
/// Values are converted through `f64`; anything not representable in `T`
/// becomes `T::default_nodata()`.
pub fn decode_samples<T: RasterElement>(
    raw: &[u8],
    byte_order: TiffByteOrder,
    bits_per_sample: u16,
    sample_fmt: u16,
) -> Result<Vec<T>> {
    macro_rules! decode {
        ($size:expr, $read:ident) => {{
            if raw.len() % $size != 0 {
                return Err(Error::Decompress(format!(
                    "raw data length {} not aligned to element size {}",
                    raw.len(),
                    $size
                )));
            }
            Ok(raw
                .chunks_exact($size)
                .map(|c| {
                    let v = match byte_order {
                        TiffByteOrder::LittleEndian => LittleEndian::$read(c),
                        TiffByteOrder::BigEndian => BigEndian::$read(c),
                    };
                    <T as num_traits::NumCast>::from(v).unwrap_or_else(T::default_nodata)
                })
                .collect())
        }};
    }

    match (bits_per_sample, sample_fmt) {
        (8, sample_format::UINT) => Ok(raw
            .iter()
            .map(|&b| <T as num_traits::NumCast>::from(b).unwrap_or_else(T::default_nodata))
            .collect()),
        (8, sample_format::INT) => Ok(raw
            .iter()
            .map(|&b| <T as num_traits::NumCast>::from(b as i8).unwrap_or_else(T::default_nodata))
            .collect()),
        (16, sample_format::UINT) => decode!(2, read_u16),
        (16, sample_format::INT) => decode!(2, read_i16),
        (32, sample_format::UINT) => decode!(4, read_u32),
        (32, sample_format::INT) => decode!(4, read_i32),
        (32, sample_format::IEEEFP) => decode!(4, read_f32),
        (64, sample_format::IEEEFP) => decode!(8, read_f64),
        (bps, sf) => Err(Error::UnsupportedDataType(format!(
            "{} bits per sample with sample format {}",
            bps, sf
        ))),
    }
}
