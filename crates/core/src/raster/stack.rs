//! Multi-band raster stack sharing one grid

use crate::bbox::BBox;
use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster, RasterElement};
use ndarray::{Array2, Array3, ArrayView2, ArrayViewMut2, Axis};

/// A georeferenced stack of bands stored as `(band, row, col)`.
///
/// All bands share transform, CRS and nodata. Bands may be named (for
/// Sentinel-2 stacks the names are `B02`, `B03`, ... `SCL`) so that callers
/// can look a band up without hard-coding its position.
#[derive(Debug, Clone)]
pub struct RasterStack<T: RasterElement> {
    data: Array3<T>,
    transform: GeoTransform,
    crs: Option<CRS>,
    nodata: Option<T>,
    band_names: Vec<String>,
}

impl<T: RasterElement> RasterStack<T> {
    /// Create a stack filled with a value
    pub fn filled(bands: usize, rows: usize, cols: usize, value: T) -> Self {
        Self {
            data: Array3::from_elem((bands, rows, cols), value),
            transform: GeoTransform::default(),
            crs: None,
            nodata: None,
            band_names: Vec::new(),
        }
    }

    /// Create a stack from an existing `(band, row, col)` array
    pub fn from_array(data: Array3<T>) -> Self {
        Self {
            data,
            transform: GeoTransform::default(),
            crs: None,
            nodata: None,
            band_names: Vec::new(),
        }
    }

    /// Stack single-band rasters. Georeferencing comes from the first band;
    /// every band must share its shape.
    pub fn from_bands(bands: &[Raster<T>]) -> Result<Self> {
        let first = bands.first().ok_or_else(|| Error::Other("cannot stack zero bands".into()))?;
        let (rows, cols) = first.shape();
        let mut data = Array3::from_elem((bands.len(), rows, cols), T::zero());
        for (i, band) in bands.iter().enumerate() {
            let (ar, ac) = band.shape();
            if (ar, ac) != (rows, cols) {
                return Err(Error::SizeMismatch { er: rows, ec: cols, ar, ac });
            }
            data.index_axis_mut(Axis(0), i).assign(band.data());
        }
        Ok(Self {
            data,
            transform: *first.transform(),
            crs: first.crs().cloned(),
            nodata: first.nodata(),
            band_names: Vec::new(),
        })
    }

    /// Attach band names; the count must match the band count
    pub fn with_band_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Result<Self> {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.len() != self.band_count() {
            return Err(Error::InvalidParameter {
                name: "band_names",
                value: names.join(","),
                reason: format!("expected {} names", self.band_count()),
            });
        }
        self.band_names = names;
        Ok(self)
    }

    pub fn band_count(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn rows(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn cols(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    /// Dimensions as (bands, rows, cols)
    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn band_names(&self) -> &[String] {
        &self.band_names
    }

    /// Position of a named band
    pub fn band_index(&self, name: &str) -> Option<usize> {
        self.band_names.iter().position(|n| n == name)
    }

    /// View of one band
    pub fn band(&self, index: usize) -> Result<ArrayView2<'_, T>> {
        self.check_band(index)?;
        Ok(self.data.index_axis(Axis(0), index))
    }

    /// Mutable view of one band
    pub fn band_mut(&mut self, index: usize) -> Result<ArrayViewMut2<'_, T>> {
        self.check_band(index)?;
        Ok(self.data.index_axis_mut(Axis(0), index))
    }

    /// View of a band looked up by name
    pub fn band_by_name(&self, name: &str) -> Result<ArrayView2<'_, T>> {
        let index = self
            .band_index(name)
            .ok_or_else(|| Error::Other(format!("band {name} not in stack")))?;
        self.band(index)
    }

    /// Copy one band out as a standalone raster
    pub fn band_raster(&self, index: usize) -> Result<Raster<T>> {
        let data: Array2<T> = self.band(index)?.to_owned();
        Ok(Raster::with_meta(data, self.transform, self.crs.clone(), self.nodata))
    }

    fn check_band(&self, index: usize) -> Result<()> {
        if index >= self.band_count() {
            return Err(Error::InvalidParameter {
                name: "band",
                value: index.to_string(),
                reason: format!("stack has {} bands", self.band_count()),
            });
        }
        Ok(())
    }

    pub fn data(&self) -> &Array3<T> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array3<T> {
        &mut self.data
    }

    pub fn into_array(self) -> Array3<T> {
        self.data
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn set_transform(&mut self, transform: GeoTransform) {
        self.transform = transform;
    }

    pub fn crs(&self) -> Option<&CRS> {
        self.crs.as_ref()
    }

    pub fn set_crs(&mut self, crs: Option<CRS>) {
        self.crs = crs;
    }

    pub fn nodata(&self) -> Option<T> {
        self.nodata
    }

    pub fn set_nodata(&mut self, nodata: Option<T>) {
        self.nodata = nodata;
    }

    pub fn bbox(&self) -> BBox {
        self.transform.bbox(self.cols(), self.rows())
    }

    /// Whether `other` has the same rows, cols and (within `tol`) transform
    pub fn same_grid<U: RasterElement>(&self, other: &RasterStack<U>, tol: f64) -> bool {
        self.rows() == other.rows() && self.cols() == other.cols() && self.transform.approx_eq(other.transform(), tol)
    }

    /// Element-wise conversion that keeps georeferencing and band names
    pub fn map<U: RasterElement>(&self, f: impl Fn(T) -> U, nodata: Option<U>) -> RasterStack<U> {
        RasterStack {
            data: self.data.mapv(f),
            transform: self.transform,
            crs: self.crs.clone(),
            nodata,
            band_names: self.band_names.clone(),
        }
    }
}
