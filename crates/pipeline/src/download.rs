//! Windowed band download
//!
//! For each scene only the part of the request bbox inside its footprint is
//! read, in the scene's own UTM grid. Each band file keeps that native
//! window with its UTM transform. The bands are then resampled onto the
//! same sub-grid of the analysis canvas so that 10 m and 20 m bands stack,
//! and the per-scene stack is written next to the band files.
//!
//! Files are written to a temporary name and renamed into place. On a
//! later run an artifact is reused only if it decodes to the end, so an
//! interrupted run resumes where it stopped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use clearsky_algorithms::masking::SunGeometry;
use clearsky_algorithms::mosaic::Canvas;
use clearsky_algorithms::warp::warp_stack;
use clearsky_cloud::blocking::RemoteSession;
use clearsky_core::crs::{transform_bbox, Projection, CRS};
use clearsky_core::io::{
    read_geotiff, read_stack, verify_geotiff, write_atomic, write_geotiff, write_stack, GeoTiffOptions,
};
use clearsky_core::{BBox, Raster, RasterStack};

use crate::config::{DownloadConfig, HttpConfig, Normalization};
use crate::error::DownloadError;
use crate::geometry::scene_window;
use crate::scene::{BandId, Scene};

pub const STACK_FILE: &str = "stack.tif";
pub const SUN_FILE: &str = "sun.json";

/// COGs kept open by [`RemoteAssetReader`]
const OPEN_COGS: usize = 16;

/// Whether a GeoTIFF left by an earlier run can be reused
pub(crate) fn is_complete(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    match verify_geotiff(path) {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "discarding unreadable artifact");
            false
        }
    }
}

/// Remote access the downloader needs
pub trait AssetReader {
    /// Band 0 of the COG at `href` inside `window` (in the raster's CRS)
    fn read_band(&mut self, href: &str, window: &BBox) -> clearsky_cloud::Result<Raster<f32>>;

    /// Mean sun angles from the tile metadata document at `href`
    fn sun_angles(&mut self, href: &str) -> clearsky_cloud::Result<SunGeometry>;
}

/// [`AssetReader`] over HTTP range requests.
///
/// One session serves every scene, so COG headers and tiles fetched for a
/// band are reused by later windows over the same granule.
pub struct RemoteAssetReader {
    session: RemoteSession,
}

impl RemoteAssetReader {
    pub fn new(config: &HttpConfig) -> clearsky_cloud::Result<Self> {
        Ok(Self {
            session: RemoteSession::new(config.cog_options(), OPEN_COGS)?,
        })
    }
}

impl AssetReader for RemoteAssetReader {
    fn read_band(&mut self, href: &str, window: &BBox) -> clearsky_cloud::Result<Raster<f32>> {
        self.session.read_bbox(href, 0, window, None)
    }

    fn sun_angles(&mut self, href: &str) -> clearsky_cloud::Result<SunGeometry> {
        let angles = self.session.sun_angles(href)?;
        Ok(SunGeometry {
            azimuth: angles.azimuth,
            zenith: angles.zenith,
        })
    }
}

/// Files of one downloaded scene
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedScene {
    pub scene_id: String,
    pub dir: PathBuf,
    /// Bands in stack order, SCL last
    pub bands: Vec<BandId>,
    pub band_files: BTreeMap<BandId, PathBuf>,
    pub stack_path: PathBuf,
    pub sun: SunGeometry,
}

impl DownloadedScene {
    pub fn band_names(&self) -> Vec<&'static str> {
        BandId::names(&self.bands)
    }

    pub fn load_stack(&self) -> clearsky_core::Result<RasterStack<f32>> {
        read_named_stack(&self.stack_path, &self.band_names())
    }
}

/// Read a stack and label its bands. GeoTIFF stores no band names.
pub fn read_named_stack(path: &Path, names: &[&str]) -> clearsky_core::Result<RasterStack<f32>> {
    read_stack::<f32, _>(path)?.with_band_names(names.iter().copied())
}

/// Reads, normalizes and resamples scene bands onto the analysis canvas
#[derive(Debug, Clone)]
pub struct Downloader {
    bands: Vec<BandId>,
    config: DownloadConfig,
    nodata: f32,
    options: GeoTiffOptions,
}

impl Downloader {
    pub fn new(bands: &[BandId], config: DownloadConfig, nodata: f32) -> Self {
        Self {
            bands: BandId::stack_order(bands),
            config,
            nodata,
            options: GeoTiffOptions::default(),
        }
    }

    pub fn bands(&self) -> &[BandId] {
        &self.bands
    }

    /// Download one scene into `dir`.
    ///
    /// `bbox` is geographic; `canvas` is the window's analysis grid.
    pub fn download(
        &self,
        reader: &mut dyn AssetReader,
        scene: &Scene,
        bbox: &BBox,
        canvas: &Canvas,
        dir: &Path,
    ) -> Result<DownloadedScene, DownloadError> {
        let io_err = |source: std::io::Error| DownloadError::Io {
            scene: scene.id.clone(),
            source,
        };
        let raster_err = |source: clearsky_core::Error| DownloadError::Raster {
            scene: scene.id.clone(),
            source,
        };
        std::fs::create_dir_all(dir).map_err(io_err)?;

        let sun = self.sun_geometry(reader, scene, dir)?;
        let band_files: BTreeMap<BandId, PathBuf> = self
            .bands
            .iter()
            .map(|&b| (b, dir.join(format!("{}.tif", b.name()))))
            .collect();
        let downloaded = DownloadedScene {
            scene_id: scene.id.clone(),
            dir: dir.to_path_buf(),
            bands: self.bands.clone(),
            band_files,
            stack_path: dir.join(STACK_FILE),
            sun,
        };
        if is_complete(&downloaded.stack_path) {
            debug!(scene = %scene.id, "stack present, skipping download");
            return Ok(downloaded);
        }

        let utm = Projection::from_epsg(scene.epsg).map_err(raster_err)?;
        let window = scene_window(bbox, &scene.footprint, &utm, self.config.window_snap).ok_or_else(|| {
            DownloadError::NoOverlap {
                scene: scene.id.clone(),
            }
        })?;
        let canvas_proj = canvas.crs.projection().map_err(raster_err)?;
        let target = canvas
            .subgrid(&transform_bbox(&window, &utm, &canvas_proj))
            .ok_or_else(|| DownloadError::NoOverlap {
                scene: scene.id.clone(),
            })?;

        let mut rasters = Vec::with_capacity(self.bands.len());
        for &band in &self.bands {
            let path = &downloaded.band_files[&band];
            let native = if is_complete(path) {
                read_geotiff::<f32, _>(path, 0).map_err(raster_err)?
            } else {
                let native = self.fetch_band(reader, scene, band, &window)?;
                write_geotiff(&native, path, &self.options).map_err(raster_err)?;
                native
            };
            let warped = RasterStack::from_bands(std::slice::from_ref(&native))
                .and_then(|s| warp_stack(&s, &target))
                .and_then(|s| s.band_raster(0))
                .map_err(raster_err)?;
            rasters.push(warped);
        }

        let stack = RasterStack::from_bands(&rasters)
            .and_then(|s| s.with_band_names(downloaded.band_names()))
            .map_err(raster_err)?;
        write_stack(&stack, &downloaded.stack_path, &self.options).map_err(raster_err)?;
        info!(scene = %scene.id, rows = target.rows, cols = target.cols, "scene downloaded");
        Ok(downloaded)
    }

    /// Read and normalize one band over `window`, in the scene's UTM grid
    fn fetch_band(
        &self,
        reader: &mut dyn AssetReader,
        scene: &Scene,
        band: BandId,
        window: &BBox,
    ) -> Result<Raster<f32>, DownloadError> {
        let href = scene.asset(band).ok_or_else(|| DownloadError::MissingAsset {
            scene: scene.id.clone(),
            band: band.name().to_string(),
        })?;

        let mut raster = reader.read_band(href, window).map_err(|source| DownloadError::Remote {
            scene: scene.id.clone(),
            source,
        })?;
        if raster.crs().is_none() {
            raster.set_crs(Some(CRS::from_epsg(scene.epsg)));
        }
        let raster = self.normalize(&raster, band);
        debug!(scene = %scene.id, band = %band, shape = ?raster.shape(), "band read");
        Ok(raster)
    }

    /// Map raw samples to stored values.
    ///
    /// The raster's nodata becomes the pipeline nodata. Spectral DN 0 is
    /// also nodata; other DNs are scaled by the saturation value and
    /// clamped to [0, 1] under [`Normalization::Reflectance`]. SCL codes
    /// are kept as they are.
    pub fn normalize(&self, raster: &Raster<f32>, band: BandId) -> Raster<f32> {
        let nodata = self.nodata;
        let src_nodata = raster.nodata();
        let scale = match self.config.normalization {
            Normalization::Reflectance if band.is_spectral() => Some(self.config.saturation),
            _ => None,
        };
        raster.map(
            |v| {
                if !v.is_finite() || Some(v) == src_nodata || (band.is_spectral() && v == 0.0) {
                    nodata
                } else if let Some(sat) = scale {
                    (v / sat).clamp(0.0, 1.0)
                } else {
                    v
                }
            },
            Some(nodata),
        )
    }

    fn sun_geometry(
        &self,
        reader: &mut dyn AssetReader,
        scene: &Scene,
        dir: &Path,
    ) -> Result<SunGeometry, DownloadError> {
        let path = dir.join(SUN_FILE);
        if let Ok(text) = std::fs::read_to_string(&path) {
            if let Ok(sun) = serde_json::from_str(&text) {
                return Ok(sun);
            }
        }
        let sun = reader
            .sun_angles(&scene.metadata_href)
            .map_err(|source| DownloadError::Remote {
                scene: scene.id.clone(),
                source,
            })?;
        write_atomic(&path, |out| {
            serde_json::to_writer(out, &sun).map_err(std::io::Error::from)?;
            Ok(())
        })
        .map_err(|source| DownloadError::Raster {
            scene: scene.id.clone(),
            source,
        })?;
        Ok(sun)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::scene::tests::item;
    use approx::assert_relative_eq;
    use clearsky_algorithms::mosaic::DEFAULT_RESOLUTION;
    use clearsky_core::GeoTransform;
    use ndarray::Array2;

    /// Serves a synthetic UTM raster for every href and counts reads
    pub(crate) struct FakeReader {
        pub(crate) reads: usize,
        /// DN written into spectral bands
        pub(crate) dn: f32,
        /// SCL code by column: `scl(col, cols)`
        pub(crate) scl: fn(usize, usize) -> f32,
    }

    impl FakeReader {
        pub(crate) fn clear(dn: f32) -> Self {
            Self {
                reads: 0,
                dn,
                scl: |_, _| 4.0,
            }
        }
    }

    impl AssetReader for FakeReader {
        fn read_band(&mut self, href: &str, window: &BBox) -> clearsky_cloud::Result<Raster<f32>> {
            self.reads += 1;
            let res = if href.ends_with("SCL.tif") { 20.0 } else { 10.0 };
            let cols = (window.width() / res).ceil() as usize;
            let rows = (window.height() / res).ceil() as usize;
            let data = if href.ends_with("SCL.tif") {
                let f = self.scl;
                Array2::from_shape_fn((rows, cols), |(_, c)| f(c, cols))
            } else {
                Array2::from_elem((rows, cols), self.dn)
            };
            let transform = GeoTransform::new(window.min_x, window.max_y, res, -res);
            Ok(Raster::with_meta(data, transform, None, Some(0.0)))
        }

        fn sun_angles(&mut self, _href: &str) -> clearsky_cloud::Result<SunGeometry> {
            Ok(SunGeometry {
                azimuth: 120.0,
                zenith: 35.0,
            })
        }
    }

    fn setup() -> (Scene, BBox, Canvas) {
        let bbox = BBox::new(36.80, -1.30, 36.82, -1.28);
        let scene = Scene::from_stac_item(
            &item("S2A_37MBU_20220110_0_L2A", "37MBU", 5.0, BBox::new(36.5, -1.5, 37.5, -0.5)),
            &BandId::ALL,
        )
        .unwrap();
        let canvas = Canvas::for_bbox(&bbox, DEFAULT_RESOLUTION, CRS::wgs84()).unwrap();
        (scene, bbox, canvas)
    }

    #[test]
    fn test_normalize_reflectance() {
        let d = Downloader::new(&BandId::ALL, DownloadConfig::default(), -9999.0);
        let raster = Raster::with_meta(
            Array2::from_shape_vec((1, 4), vec![0.0, 2047.5, 8000.0, 65535.0]).unwrap(),
            GeoTransform::default(),
            None,
            Some(65535.0),
        );
        let out = d.normalize(&raster, BandId::B04);
        assert_eq!(out.get(0, 0).unwrap(), -9999.0);
        assert_relative_eq!(out.get(0, 1).unwrap(), 0.5);
        assert_eq!(out.get(0, 2).unwrap(), 1.0);
        assert_eq!(out.get(0, 3).unwrap(), -9999.0);

        let scl = Raster::with_meta(
            Array2::from_shape_vec((1, 2), vec![0.0, 9.0]).unwrap(),
            GeoTransform::default(),
            None,
            None,
        );
        let out = d.normalize(&scl, BandId::Scl);
        assert_eq!(out.get(0, 0).unwrap(), 0.0);
        assert_eq!(out.get(0, 1).unwrap(), 9.0);
    }

    #[test]
    fn test_download_stacks_on_canvas_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let (scene, bbox, canvas) = setup();
        let bands = [BandId::B02, BandId::B03, BandId::B04, BandId::B08, BandId::Scl];
        let downloader = Downloader::new(&bands, DownloadConfig::default(), -9999.0);
        let mut reader = FakeReader::clear(1000.0);

        let scene_dir = dir.path().join(&scene.id);
        let out = downloader.download(&mut reader, &scene, &bbox, &canvas, &scene_dir).unwrap();
        assert_eq!(reader.reads, 5);
        assert!(out.stack_path.exists());
        assert!(out.band_files.values().all(|p| p.exists()));
        assert_eq!(out.sun.azimuth, 120.0);

        let stack = out.load_stack().unwrap();
        assert_eq!(stack.band_names(), &["B02", "B03", "B04", "B08", "SCL"]);
        let (_, rows, cols) = stack.shape();
        canvas.offset_of(stack.transform()).unwrap();
        assert!(rows <= canvas.rows + 1 && cols <= canvas.cols + 1);
        let b04 = stack.band_by_name("B04").unwrap();
        let valid: Vec<f32> = b04.iter().copied().filter(|&v| v != -9999.0).collect();
        assert!(!valid.is_empty());
        assert!(valid.iter().all(|&v| (v - 1000.0 / 4095.0).abs() < 1e-6));
        let scl = stack.band_by_name("SCL").unwrap();
        assert!(scl.iter().all(|&v| v == 4.0 || v == -9999.0));

        // Band files keep the native UTM window
        let b04 = read_geotiff::<f32, _>(&out.band_files[&BandId::B04], 0).unwrap();
        assert_eq!(b04.crs().and_then(CRS::epsg), Some(32737));
        assert_eq!(b04.transform().pixel_width, 10.0);
        let scl = read_geotiff::<f32, _>(&out.band_files[&BandId::Scl], 0).unwrap();
        assert_eq!(scl.transform().pixel_width, 20.0);

        // Second run reads nothing
        downloader.download(&mut reader, &scene, &bbox, &canvas, &scene_dir).unwrap();
        assert_eq!(reader.reads, 5);
    }

    #[test]
    fn test_truncated_artifacts_are_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let (scene, bbox, canvas) = setup();
        let downloader = Downloader::new(&[BandId::B04, BandId::Scl], DownloadConfig::default(), -9999.0);
        let mut reader = FakeReader::clear(1000.0);
        let scene_dir = dir.path().join(&scene.id);
        let out = downloader.download(&mut reader, &scene, &bbox, &canvas, &scene_dir).unwrap();
        assert_eq!(reader.reads, 2);
        let expected = out.load_stack().unwrap();

        for path in [&out.stack_path, &out.band_files[&BandId::B04]] {
            let bytes = std::fs::read(path).unwrap();
            std::fs::write(path, &bytes[..bytes.len() / 2]).unwrap();
        }
        let again = downloader.download(&mut reader, &scene, &bbox, &canvas, &scene_dir).unwrap();
        assert_eq!(reader.reads, 3);
        let stack = again.load_stack().unwrap();
        assert_eq!(stack.shape(), expected.shape());
        assert_eq!(stack.band_by_name("B04").unwrap(), expected.band_by_name("B04").unwrap());
    }

    #[test]
    fn test_missing_asset_and_no_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scene, bbox, canvas) = setup();
        let downloader = Downloader::new(&[BandId::B04, BandId::Scl], DownloadConfig::default(), -9999.0);
        let mut reader = FakeReader::clear(1000.0);

        scene.assets.remove(&BandId::B04);
        let err = downloader
            .download(&mut reader, &scene, &bbox, &canvas, &dir.path().join("a"))
            .unwrap_err();
        assert!(matches!(err, DownloadError::MissingAsset { ref band, .. } if band == "B04"));

        let far = BBox::new(10.0, 10.0, 10.01, 10.01);
        let err = downloader
            .download(&mut reader, &scene, &far, &canvas, &dir.path().join("b"))
            .unwrap_err();
        assert!(matches!(err, DownloadError::NoOverlap { .. }));
    }
}
