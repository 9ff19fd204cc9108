//! Single-band georeferenced raster

use crate::bbox::BBox;
use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, RasterElement};
use ndarray::{Array2, ArrayView2, ArrayViewMut2};

/// One band on a georeferenced grid.
///
/// Cells are stored row-major as `(row, col)`; row 0 is the northern edge
/// when the transform has a negative pixel height.
///
/// ```ignore
/// use clearsky_core::{GeoTransform, Raster, CRS};
///
/// // A 10 m band in UTM 37S
/// let mut band: Raster<u16> = Raster::new(200, 200);
/// band.set_transform(GeoTransform::new(700_000.0, 9_860_000.0, 10.0, -10.0));
/// band.set_crs(Some(CRS::from_epsg(32737)));
/// band.set(10, 20, 1750)?;
/// ```
#[derive(Debug, Clone)]
pub struct Raster<T: RasterElement> {
    data: Array2<T>,
    transform: GeoTransform,
    crs: Option<CRS>,
    nodata: Option<T>,
}

impl<T: RasterElement> Raster<T> {
    /// Zero-filled raster without georeferencing
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::with_meta(Array2::zeros((rows, cols)), GeoTransform::default(), None, None)
    }

    /// Raster with every cell set to `value`
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self::with_meta(Array2::from_elem((rows, cols), value), GeoTransform::default(), None, None)
    }

    pub fn with_meta(data: Array2<T>, transform: GeoTransform, crs: Option<CRS>, nodata: Option<T>) -> Self {
        Self {
            data,
            transform,
            crs,
            nodata,
        }
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn out_of_bounds(&self, row: usize, col: usize) -> Error {
        Error::IndexOutOfBounds {
            row,
            col,
            rows: self.rows(),
            cols: self.cols(),
        }
    }

    pub fn get(&self, row: usize, col: usize) -> Result<T> {
        self.data
            .get((row, col))
            .copied()
            .ok_or_else(|| self.out_of_bounds(row, col))
    }

    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        let err = self.out_of_bounds(row, col);
        let cell = self.data.get_mut((row, col)).ok_or(err)?;
        *cell = value;
        Ok(())
    }

    pub fn view(&self) -> ArrayView2<'_, T> {
        self.data.view()
    }

    pub fn view_mut(&mut self) -> ArrayViewMut2<'_, T> {
        self.data.view_mut()
    }

    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array2<T> {
        &mut self.data
    }

    pub fn into_array(self) -> Array2<T> {
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

    /// Cell size in CRS units (square cells)
    pub fn cell_size(&self) -> f64 {
        self.transform.cell_size()
    }

    /// `(min_x, min_y, max_x, max_y)` of the outer cell edges
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.transform.bounds(self.cols(), self.rows())
    }

    pub fn bbox(&self) -> BBox {
        self.transform.bbox(self.cols(), self.rows())
    }

    /// Same shape, and transforms equal within `tol`
    pub fn same_grid<U: RasterElement>(&self, other: &Raster<U>, tol: f64) -> bool {
        self.shape() == other.shape() && self.transform.approx_eq(other.transform(), tol)
    }

    /// Converts every cell, keeping transform and CRS
    pub fn map<U: RasterElement>(&self, f: impl Fn(T) -> U, nodata: Option<U>) -> Raster<U> {
        Raster::with_meta(self.data.mapv(f), self.transform, self.crs.clone(), nodata)
    }

    pub fn is_nodata(&self, value: T) -> bool {
        value.is_nodata(self.nodata)
    }

    /// Min, max and mean over the cells that are not nodata
    pub fn statistics(&self) -> RasterStatistics<T>
    where
        T: PartialOrd,
    {
        let mut stats = RasterStatistics {
            min: None,
            max: None,
            mean: None,
            valid_count: 0,
            nodata_count: 0,
        };
        let mut sum = 0.0;

        for &value in self.data.iter().filter(|&&v| !self.is_nodata(v)) {
            if stats.min.map_or(true, |m| value < m) {
                stats.min = Some(value);
            }
            if stats.max.map_or(true, |m| value > m) {
                stats.max = Some(value);
            }
            if let Some(v) = value.to_f64() {
                sum += v;
                stats.valid_count += 1;
            }
        }

        if stats.valid_count > 0 {
            stats.mean = Some(sum / stats.valid_count as f64);
        }
        stats.nodata_count = self.len() - stats.valid_count;
        stats
    }
}

/// Summary of the valid cells of a raster
#[derive(Debug, Clone)]
pub struct RasterStatistics<T> {
    pub min: Option<T>,
    pub max: Option<T>,
    pub mean: Option<f64>,
    pub valid_count: usize,
    pub nodata_count: usize,
}

impl<T> RasterStatistics<T> {
    /// Share of cells holding nodata; 0 for an empty raster
    pub fn nodata_fraction(&self) -> f64 {
        match self.valid_count + self.nodata_count {
            0 => 0.0,
            total => self.nodata_count as f64 / total as f64,
        }
    }
}
