//! TIFF IFD (Image File Directory) parser.
//!
//! Works on raw byte slices rather than `Read + Seek`, so the same code
//! parses local files and byte ranges fetched over HTTP. Supports IFD chains
//! (overviews).

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Byte order of the TIFF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiffByteOrder {
    LittleEndian,
    BigEndian,
}

/// Well-known TIFF tag IDs.
pub mod tags {
    pub const NEW_SUBFILE_TYPE: u16 = 254;
    pub const IMAGE_WIDTH: u16 = 256;
    pub const IMAGE_LENGTH: u16 = 257;
    pub const BITS_PER_SAMPLE: u16 = 258;
    pub const COMPRESSION: u16 = 259;
    pub const PHOTOMETRIC: u16 = 262;
    pub const STRIP_OFFSETS: u16 = 273;
    pub const SAMPLES_PER_PIXEL: u16 = 277;
    pub const ROWS_PER_STRIP: u16 = 278;
    pub const STRIP_BYTE_COUNTS: u16 = 279;
    pub const PLANAR_CONFIG: u16 = 284;
    pub const PREDICTOR: u16 = 317;
    pub const TILE_WIDTH: u16 = 322;
    pub const TILE_LENGTH: u16 = 323;
    pub const TILE_OFFSETS: u16 = 324;
    pub const TILE_BYTE_COUNTS: u16 = 325;
    pub const EXTRA_SAMPLES: u16 = 338;
    pub const SAMPLE_FORMAT: u16 = 339;
    pub const MODEL_PIXEL_SCALE: u16 = 33550;
    pub const MODEL_TIEPOINT: u16 = 33922;
    pub const MODEL_TRANSFORMATION: u16 = 34264;
    pub const GEO_KEY_DIRECTORY: u16 = 34735;
    pub const GEO_DOUBLE_PARAMS: u16 = 34736;
    pub const GEO_ASCII_PARAMS: u16 = 34737;
    pub const GDAL_NODATA: u16 = 42113;

    /// Tags whose values the readers need; everything else is skipped.
    pub const READER_TAGS: &[u16] = &[
        NEW_SUBFILE_TYPE,
        IMAGE_WIDTH,
        IMAGE_LENGTH,
        BITS_PER_SAMPLE,
        COMPRESSION,
        STRIP_OFFSETS,
        SAMPLES_PER_PIXEL,
        ROWS_PER_STRIP,
        STRIP_BYTE_COUNTS,
        PLANAR_CONFIG,
        PREDICTOR,
        TILE_WIDTH,
        TILE_LENGTH,
        TILE_OFFSETS,
        TILE_BYTE_COUNTS,
        SAMPLE_FORMAT,
        MODEL_PIXEL_SCALE,
        MODEL_TIEPOINT,
        MODEL_TRANSFORMATION,
        GEO_KEY_DIRECTORY,
        GEO_DOUBLE_PARAMS,
        GEO_ASCII_PARAMS,
        GDAL_NODATA,
    ];
}

/// TIFF data type IDs and their byte sizes.
fn type_byte_size(type_id: u16) -> Option<usize> {
    match type_id {
        1 => Some(1),  // BYTE
        2 => Some(1),  // ASCII
        3 => Some(2),  // SHORT
        4 => Some(4),  // LONG
        5 => Some(8),  // RATIONAL
        6 => Some(1),  // SBYTE
        7 => Some(1),  // UNDEFINED
        8 => Some(2),  // SSHORT
        9 => Some(4),  // SLONG
        10 => Some(8), // SRATIONAL
        11 => Some(4), // FLOAT
        12 => Some(8), // DOUBLE
        16 => Some(8), // LONG8 (BigTIFF)
        _ => None,
    }
}

/// A raw IFD tag entry before value resolution.
#[derive(Debug, Clone)]
pub struct RawTagEntry {
    pub tag: u16,
    pub type_id: u16,
    pub count: u32,
    /// File offset of the value when it does not fit inline.
    pub value_or_offset: u32,
    /// The four value bytes exactly as stored, in file byte order.
    pub inline_bytes: [u8; 4],
    /// True if the value data is inline (fits in 4 bytes).
    pub inline: bool,
}

impl RawTagEntry {
    /// Total size in bytes of the tag's value.
    pub fn value_size(&self) -> u64 {
        type_byte_size(self.type_id).unwrap_or(1) as u64 * self.count as u64
    }
}

/// Parsed TIFF header.
#[derive(Debug, Clone)]
pub struct TiffHeader {
    pub byte_order: TiffByteOrder,
    pub first_ifd_offset: u32,
}

/// A single parsed IFD with all tag entries and the offset to the next IFD.
#[derive(Debug, Clone)]
pub struct RawIfd {
    pub entries: Vec<RawTagEntry>,
    pub next_ifd_offset: u32,
}

impl RawIfd {
    /// Byte length of an IFD with `entry_count` entries.
    pub fn byte_len(entry_count: usize) -> usize {
        2 + entry_count * 12 + 4
    }

    /// Entries the readers need whose value lives outside the IFD.
    pub fn external_entries(&self) -> impl Iterator<Item = &RawTagEntry> {
        self.entries
            .iter()
            .filter(|e| !e.inline && tags::READER_TAGS.contains(&e.tag))
    }
}

/// Parse the 8-byte TIFF header.
pub fn parse_header(data: &[u8]) -> Result<TiffHeader> {
    if data.len() < 8 {
        return Err(Error::InvalidTiff("header too short".into()));
    }

    let byte_order = match (data[0], data[1]) {
        (b'I', b'I') => TiffByteOrder::LittleEndian,
        (b'M', b'M') => TiffByteOrder::BigEndian,
        _ => return Err(Error::InvalidTiff("invalid byte order marker".into())),
    };

    let magic = read_u16(byte_order, &data[2..4]);
    if magic == 43 {
        return Err(Error::InvalidTiff("BigTIFF is not supported".into()));
    }
    if magic != 42 {
        return Err(Error::InvalidTiff(format!("expected magic 42, got {}", magic)));
    }

    let first_ifd_offset = read_u32(byte_order, &data[4..8]);

    Ok(TiffHeader {
        byte_order,
        first_ifd_offset,
    })
}

/// Number of entries declared at the start of an IFD.
pub fn ifd_entry_count(byte_order: TiffByteOrder, data: &[u8]) -> Result<usize> {
    if data.len() < 2 {
        return Err(Error::InvalidTiff("IFD too short".into()));
    }
    Ok(read_u16(byte_order, &data[0..2]) as usize)
}

/// Parse one IFD from raw bytes.
///
/// `data` must start at the IFD offset and contain enough bytes to parse
/// all entries plus the 4-byte next-IFD pointer.
pub fn parse_ifd(byte_order: TiffByteOrder, data: &[u8]) -> Result<RawIfd> {
    let entry_count = ifd_entry_count(byte_order, data)?;
    let needed = RawIfd::byte_len(entry_count);

    if data.len() < needed {
        return Err(Error::InvalidTiff(format!(
            "IFD needs {} bytes but only {} available",
            needed,
            data.len()
        )));
    }

    let mut entries = Vec::with_capacity(entry_count);
    for i in 0..entry_count {
        let offset = 2 + i * 12;
        let tag = read_u16(byte_order, &data[offset..offset + 2]);
        let type_id = read_u16(byte_order, &data[offset + 2..offset + 4]);
        let count = read_u32(byte_order, &data[offset + 4..offset + 8]);
        let value_or_offset = read_u32(byte_order, &data[offset + 8..offset + 12]);
        let mut inline_bytes = [0u8; 4];
        inline_bytes.copy_from_slice(&data[offset + 8..offset + 12]);

        let total_bytes = type_byte_size(type_id).unwrap_or(1) as u64 * count as u64;

        entries.push(RawTagEntry {
            tag,
            type_id,
            count,
            value_or_offset,
            inline_bytes,
            inline: total_bytes <= 4,
        });
    }

    let next_offset_pos = 2 + entry_count * 12;
    let next_ifd_offset = read_u32(byte_order, &data[next_offset_pos..next_offset_pos + 4]);

    Ok(RawIfd {
        entries,
        next_ifd_offset,
    })
}

/// Resolved tag values of one IFD.
///
/// Inline values are taken from the entry; out-of-line values are supplied
/// by the caller after it has read them (from disk or over HTTP).
#[derive(Debug, Clone)]
pub struct TagSet {
    byte_order: TiffByteOrder,
    values: HashMap<u16, (RawTagEntry, Vec<u8>)>,
}

impl TagSet {
    /// Collect all inline reader tags of `ifd`.
    pub fn from_inline(byte_order: TiffByteOrder, ifd: &RawIfd) -> Self {
        let mut values = HashMap::new();
        for entry in ifd.entries.iter().filter(|e| e.inline && tags::READER_TAGS.contains(&e.tag)) {
            let size = entry.value_size() as usize;
            values.insert(entry.tag, (entry.clone(), entry.inline_bytes[..size].to_vec()));
        }
        Self { byte_order, values }
    }

    /// Add an out-of-line value read from the file.
    pub fn insert_external(&mut self, entry: &RawTagEntry, data: Vec<u8>) {
        self.values.insert(entry.tag, (entry.clone(), data));
    }

    pub fn byte_order(&self) -> TiffByteOrder {
        self.byte_order
    }

    pub fn contains(&self, tag: u16) -> bool {
        self.values.contains_key(&tag)
    }

    /// Unsigned integer values (BYTE, SHORT, LONG, LONG8).
    pub fn u64_values(&self, tag: u16) -> Option<Vec<u64>> {
        let (entry, data) = self.values.get(&tag)?;
        let order = self.byte_order;
        let count = entry.count as usize;
        let values: Vec<u64> = match entry.type_id {
            1 | 7 => data.iter().take(count).map(|&b| b as u64).collect(),
            3 => data.chunks_exact(2).take(count).map(|c| read_u16(order, c) as u64).collect(),
            4 => data.chunks_exact(4).take(count).map(|c| read_u32(order, c) as u64).collect(),
            16 => data.chunks_exact(8).take(count).map(|c| read_u64(order, c)).collect(),
            _ => return None,
        };
        Some(values)
    }

    /// First unsigned value of a tag.
    pub fn u64(&self, tag: u16) -> Option<u64> {
        self.u64_values(tag).and_then(|v| v.first().copied())
    }

    /// Floating point values (FLOAT, DOUBLE).
    pub fn f64_values(&self, tag: u16) -> Option<Vec<f64>> {
        let (entry, data) = self.values.get(&tag)?;
        let order = self.byte_order;
        let count = entry.count as usize;
        let values: Vec<f64> = match entry.type_id {
            11 => data.chunks_exact(4).take(count).map(|c| read_f32(order, c) as f64).collect(),
            12 => data.chunks_exact(8).take(count).map(|c| read_f64(order, c)).collect(),
            _ => return None,
        };
        Some(values)
    }

    /// ASCII value, up to the first NUL.
    pub fn ascii(&self, tag: u16) -> Option<String> {
        let (entry, data) = self.values.get(&tag)?;
        if entry.type_id != 2 {
            return None;
        }
        let bytes = &data[..(entry.count as usize).min(data.len())];
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Some(String::from_utf8_lossy(&bytes[..end]).to_string())
    }
}

// ---- Byte order helpers ----

pub(crate) fn read_u16(order: TiffByteOrder, data: &[u8]) -> u16 {
    match order {
        TiffByteOrder::LittleEndian => LittleEndian::read_u16(data),
        TiffByteOrder::BigEndian => BigEndian::read_u16(data),
    }
}

pub(crate) fn read_u32(order: TiffByteOrder, data: &[u8]) -> u32 {
    match order {
        TiffByteOrder::LittleEndian => LittleEndian::read_u32(data),
        TiffByteOrder::BigEndian => BigEndian::read_u32(data),
    }
}

fn read_u64(order: TiffByteOrder, data: &[u8]) -> u64 {
    match order {
        TiffByteOrder::LittleEndian => LittleEndian::read_u64(data),
        TiffByteOrder::BigEndian => BigEndian::read_u64(data),
    }
}

fn read_f32(order: TiffByteOrder, data: &[u8]) -> f32 {
    match order {
        TiffByteOrder::LittleEndian => LittleEndian::read_f32(data),
        TiffByteOrder::BigEndian => BigEndian::read_f32(data),
    }
}

fn read_f64(order: TiffByteOrder, data: &[u8]) -> f64 {
    match order {
        TiffByteOrder::LittleEndian => LittleEndian::read_f64(data),
        TiffByteOrder::BigEndian => BigEndian::read_f64(data),
    }
}
