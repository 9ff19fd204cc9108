//! GeoTIFF georeferencing tags.
//!
//! Reads tags 33550 (ModelPixelScale), 33922 (ModelTiepoint),
//! 34264 (ModelTransformation), 34735 (GeoKeyDirectory) and
//! 42113 (GDAL_NODATA) into a `GeoTransform`, optional `CRS` and optional
//! nodata value, and builds the GeoKeyDirectory for writing.

use std::io::{Read, Seek};

use tiff::decoder::Decoder;
use tiff::tags::Tag;
use tiff::TiffResult;

use crate::crs::CRS;
use crate::error::Result;
use crate::io::ifd::{tags, TagSet};
use crate::raster::GeoTransform;

/// GTModelTypeGeoKey
const KEY_MODEL_TYPE: u16 = 1024;
/// GTRasterTypeGeoKey
const KEY_RASTER_TYPE: u16 = 1025;
/// GeographicTypeGeoKey
const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
/// ProjectedCSTypeGeoKey
const KEY_PROJECTED_TYPE: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

/// GeoTIFF metadata extracted from an IFD.
#[derive(Debug, Clone)]
pub struct GeoTiffMeta {
    pub geo_transform: GeoTransform,
    pub crs: Option<CRS>,
    pub nodata: Option<f64>,
}

impl GeoTiffMeta {
    /// From a hand-parsed tag set (remote range reads)
    pub fn from_tags(set: &TagSet) -> Self {
        Self::from_values(
            set.f64_values(tags::MODEL_PIXEL_SCALE),
            set.f64_values(tags::MODEL_TIEPOINT),
            set.f64_values(tags::MODEL_TRANSFORMATION),
            set.u64_values(tags::GEO_KEY_DIRECTORY),
            set.ascii(tags::GDAL_NODATA),
        )
    }

    /// From the current image of a `tiff` decoder (local files)
    pub fn from_decoder<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Self> {
        let mut f64s = |tag: Tag| -> TiffResult<Option<Vec<f64>>> {
            decoder.find_tag(tag)?.map(|v| v.into_f64_vec()).transpose()
        };
        let scale = f64s(Tag::ModelPixelScaleTag)?;
        let tiepoint = f64s(Tag::ModelTiepointTag)?;
        let transformation = f64s(Tag::ModelTransformationTag)?;
        let keys = decoder
            .find_tag(Tag::GeoKeyDirectoryTag)?
            .map(|v| v.into_u64_vec())
            .transpose()?;
        let nodata = decoder.find_tag(Tag::GdalNodata)?.map(|v| v.into_string()).transpose()?;
        Ok(Self::from_values(scale, tiepoint, transformation, keys, nodata))
    }

    fn from_values(
        scale: Option<Vec<f64>>,
        tiepoint: Option<Vec<f64>>,
        transformation: Option<Vec<f64>>,
        keys: Option<Vec<u64>>,
        nodata: Option<String>,
    ) -> Self {
        Self {
            geo_transform: geotransform(
                scale.as_deref(),
                tiepoint.as_deref(),
                transformation.as_deref(),
            ),
            crs: keys.as_deref().and_then(crs),
            nodata: nodata.and_then(|text| text.trim_end_matches('\0').trim().parse().ok()),
        }
    }
}

/// ModelPixelScale + ModelTiepoint, else ModelTransformation, else identity.
fn geotransform(
    scale: Option<&[f64]>,
    tiepoint: Option<&[f64]>,
    transformation: Option<&[f64]>,
) -> GeoTransform {
    if let (Some(scale), Some(tp)) = (scale, tiepoint) {
        if scale.len() >= 2 && tp.len() >= 6 {
            let origin_x = tp[3] - tp[0] * scale[0];
            let origin_y = tp[4] + tp[1] * scale[1];
            return GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]);
        }
    }

    // Row-major 4x4: x = t[3] + col * t[0] + row * t[1], y = t[7] + col * t[4] + row * t[5]
    if let Some(t) = transformation.filter(|t| t.len() >= 16) {
        return GeoTransform {
            origin_x: t[3],
            origin_y: t[7],
            pixel_width: t[0],
            pixel_height: t[5],
            row_rotation: t[1],
            col_rotation: t[4],
        };
    }

    GeoTransform::default()
}

/// EPSG from ProjectedCSTypeGeoKey or GeographicTypeGeoKey.
fn crs(dir: &[u64]) -> Option<CRS> {
    // [version, revision, minor, count, (key, location, count, value)*]
    if dir.len() < 4 {
        return None;
    }
    let num_keys = dir[3] as usize;

    let mut geographic = None;
    for key in dir[4..].chunks_exact(4).take(num_keys) {
        let (id, location, value) = (key[0] as u16, key[1], key[3] as u32);
        // location != 0 means the value lives in another tag; EPSG codes never do
        if location != 0 || value == 0 || value == 32767 {
            continue;
        }
        match id {
            KEY_PROJECTED_TYPE => return Some(CRS::from_epsg(value)),
            KEY_GEOGRAPHIC_TYPE => geographic = Some(CRS::from_epsg(value)),
            _ => {}
        }
    }
    geographic
}

/// GeoKeyDirectory values for a CRS with a known EPSG code.
///
/// Geographic systems get GeographicTypeGeoKey, everything else
/// ProjectedCSTypeGeoKey. Rasters are always PixelIsArea.
pub fn geokey_directory(crs: &CRS) -> Option<Vec<u16>> {
    let epsg = u16::try_from(crs.epsg()?).ok()?;
    let (model, key) = if crs.is_geographic() {
        (MODEL_TYPE_GEOGRAPHIC, KEY_GEOGRAPHIC_TYPE)
    } else {
        (MODEL_TYPE_PROJECTED, KEY_PROJECTED_TYPE)
    };
    Some(vec![
        1, 1, 0, 3, //
        KEY_MODEL_TYPE, 0, 1, model, //
        KEY_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA, //
        key, 0, 1, epsg,
    ])
}

/// Format a nodata value the way GDAL writes the GDAL_NODATA tag.
pub fn format_nodata(nodata: f64) -> String {
    if nodata.is_nan() {
        "nan".to_string()
    } else if nodata.fract() == 0.0 && nodata.abs() < 1e15 {
        format!("{}", nodata as i64)
    } else {
        format!("{}", nodata)
    }
}
