//! Window pipeline over a fake catalog and fake remote storage

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;

use approx::assert_relative_eq;
use chrono::NaiveDate;
use geo_types::MultiPolygon;
use ndarray::Array2;

use clearsky_algorithms::masking::SunGeometry;
use clearsky_core::io::verify_geotiff;
use clearsky_core::{BBox, GeoTransform, Raster};
use clearsky_pipeline::catalog::{SceneCatalog, SearchRequest};
use clearsky_pipeline::download::AssetReader;
use clearsky_pipeline::{
    read_named_stack, AcquisitionWindow, BandId, CatalogError, Pipeline, PipelineConfig, PipelineError, Scene,
};

const ND: f32 = -9999.0;
const CLEAR_DN: f32 = 1000.0;
const CLOUDY_DN: f32 = 1200.0;

/// About 2 x 2 km near Nairobi, UTM zone 37S
fn bbox() -> BBox {
    BBox::new(36.800, -1.300, 36.818, -1.282)
}

fn scene(id: &str, footprint: BBox, cloud_cover: f64) -> Scene {
    let assets: BTreeMap<BandId, String> = BandId::ALL
        .iter()
        .map(|&b| (b, format!("https://example.com/{id}/{}.tif", b.asset_key())))
        .collect();
    Scene {
        id: id.to_string(),
        datetime: None,
        footprint: MultiPolygon::new(vec![footprint.to_polygon()]),
        epsg: 32737,
        tile: "37MBU".to_string(),
        cloud_cover,
        assets,
        metadata_href: format!("https://example.com/{id}/metadata.xml"),
    }
}

struct FixedCatalog(Vec<Scene>);

impl SceneCatalog for FixedCatalog {
    fn search(&self, request: &SearchRequest) -> Result<Vec<Scene>, CatalogError> {
        Ok(self
            .0
            .iter()
            .filter(|s| s.cloud_cover < request.max_cloud_cover)
            .cloned()
            .collect())
    }
}

/// "clear" scenes are land everywhere; "cloudy" scenes carry SCL cloud
/// over the western half of the window.
struct FakeStorage {
    reads: Rc<Cell<usize>>,
}

impl AssetReader for FakeStorage {
    fn read_band(&mut self, href: &str, window: &BBox) -> clearsky_cloud::Result<Raster<f32>> {
        self.reads.set(self.reads.get() + 1);
        let cloudy = href.contains("cloudy");
        let scl = href.ends_with("SCL.tif");
        let res = if scl { 20.0 } else { 10.0 };
        let cols = (window.width() / res).ceil() as usize;
        let rows = (window.height() / res).ceil() as usize;

        let data = Array2::from_shape_fn((rows, cols), |(_, c)| match (scl, cloudy) {
            (true, true) if c < cols / 2 => 9.0,
            (true, _) => 4.0,
            (false, true) => CLOUDY_DN,
            (false, false) => CLEAR_DN,
        });
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

fn config(dir: &std::path::Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.work_dir = dir.to_path_buf();
    config.catalog.min_tile_count = 1;
    config.compositing.batch_rows = 64;
    config
}

fn window() -> AcquisitionWindow {
    AcquisitionWindow::ending_at("after", NaiveDate::from_ymd_opt(2022, 6, 1).unwrap(), 70, 24.0)
}

#[test]
fn clear_and_half_cloudy_scene_composite_without_gaps() {
    let dir = tempfile::tempdir().unwrap();
    let large = BBox::new(36.5, -1.5, 37.5, -0.5);
    let catalog = FixedCatalog(vec![scene("cloudy", large, 12.0), scene("clear", large, 3.0)]);
    let reads = Rc::new(Cell::new(0));
    let storage = FakeStorage { reads: reads.clone() };
    let mut pipeline = Pipeline::new(config(dir.path()), Box::new(catalog), Box::new(storage)).unwrap();

    let out = pipeline.run_window(&window(), &bbox()).unwrap();
    assert_eq!(out.collection.len(), 2);
    assert_eq!(out.collection.scenes[0].id, "clear");
    assert_eq!(reads.get(), 10);

    let clear = out.scenes.iter().find(|r| r.scene_id == "clear").unwrap();
    let cloudy = out.scenes.iter().find(|r| r.scene_id == "cloudy").unwrap();
    assert!(clear.usable && cloudy.usable);
    assert_eq!(clear.invalid_fraction, 0.0);
    assert!(cloudy.invalid_fraction > 0.45 && cloudy.invalid_fraction < 0.85);

    let names = ["B02", "B03", "B04", "B08"];
    let composite = read_named_stack(&out.composite, &names).unwrap();
    let canvas = pipeline.canvas(&bbox()).unwrap();
    assert_eq!(composite.shape(), (4, canvas.rows, canvas.cols));
    assert!(composite.data().iter().all(|&v| v != ND && v.is_finite()));

    let (_, rows, cols) = composite.shape();
    let clear_value = CLEAR_DN / 4095.0;
    let mixed_value = (CLEAR_DN / 4095.0 + CLOUDY_DN / 4095.0) / 2.0;
    for b in 0..4 {
        let band = composite.band(b).unwrap();
        for r in 0..rows {
            // Masked in the cloudy scene: the clear scene alone
            for c in 0..cols / 4 {
                assert_relative_eq!(band[[r, c]], clear_value, epsilon = 1e-6);
            }
            // Clear in both: median of two
            for c in cols - 10..cols {
                assert_relative_eq!(band[[r, c]], mixed_value, epsilon = 1e-5);
            }
        }
    }

    assert!(out.ndvi.exists());
    assert!(out.preview.as_ref().is_some_and(|p| p.exists()));
    assert!(out.dir.join("collection.json").exists());

    // A second run reuses every artifact
    let again = pipeline.run_window(&window(), &bbox()).unwrap();
    assert_eq!(reads.get(), 10);
    assert_eq!(again.scenes, out.scenes);
}

#[test]
fn cut_short_artifacts_are_rebuilt_on_resume() {
    let dir = tempfile::tempdir().unwrap();
    let large = BBox::new(36.5, -1.5, 37.5, -0.5);
    let catalog = FixedCatalog(vec![scene("cloudy", large, 12.0), scene("clear", large, 3.0)]);
    let reads = Rc::new(Cell::new(0));
    let storage = FakeStorage { reads: reads.clone() };
    let mut pipeline = Pipeline::new(config(dir.path()), Box::new(catalog), Box::new(storage)).unwrap();
    let out = pipeline.run_window(&window(), &bbox()).unwrap();

    let scene_dir = out.dir.join("scenes").join("cloudy");
    for name in ["stack_merged.tif", "stack_masked.tif"] {
        let path = scene_dir.join(name);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 3]).unwrap();
    }
    std::fs::write(scene_dir.join("mask.json"), "{\"scene_id\": \"clou").unwrap();

    let again = pipeline.run_window(&window(), &bbox()).unwrap();
    assert_eq!(reads.get(), 10);
    assert_eq!(again.scenes, out.scenes);
    verify_geotiff(scene_dir.join("stack_merged.tif")).unwrap();
    verify_geotiff(scene_dir.join("stack_masked.tif")).unwrap();
    let leftovers = std::fs::read_dir(&scene_dir)
        .unwrap()
        .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with(".tmp"))
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn aligned_scenes_share_the_canvas_grid() {
    let dir = tempfile::tempdir().unwrap();
    // The second footprint covers only the eastern part of the bbox
    let catalog = FixedCatalog(vec![
        scene("clear_a", BBox::new(36.5, -1.5, 37.5, -0.5), 3.0),
        scene("clear_b", BBox::new(36.809, -1.5, 37.5, -0.5), 5.0),
    ]);
    let storage = FakeStorage {
        reads: Rc::new(Cell::new(0)),
    };
    let mut pipeline = Pipeline::new(config(dir.path()), Box::new(catalog), Box::new(storage)).unwrap();
    let out = pipeline.run_window(&window(), &bbox()).unwrap();

    let merged: Vec<_> = out
        .collection
        .scenes
        .iter()
        .map(|s| {
            let path = out.dir.join("scenes").join(&s.id).join("stack_merged.tif");
            read_named_stack(&path, &["B02", "B03", "B04", "B08", "SCL"]).unwrap()
        })
        .collect();
    assert_eq!(merged[0].shape(), merged[1].shape());
    assert_eq!(merged[0].transform(), merged[1].transform());

    // The partial scene is padded with nodata on its western side
    let b04 = merged[1].band_by_name("B04").unwrap();
    assert_eq!(b04[[0, 0]], ND);
    assert!(out.summary.nodata_fraction == 0.0);
}

#[test]
fn coverage_gap_exhausts_backoff() {
    let dir = tempfile::tempdir().unwrap();
    // Only the western half of the bbox is ever imaged
    let catalog = FixedCatalog(vec![scene("west", BBox::new(36.5, -1.5, 36.809, -0.5), 3.0)]);
    let storage = FakeStorage {
        reads: Rc::new(Cell::new(0)),
    };
    let mut pipeline = Pipeline::new(config(dir.path()), Box::new(catalog), Box::new(storage)).unwrap();

    let err = pipeline.run_window(&window(), &bbox()).unwrap_err();
    match err {
        PipelineError::BackoffExhausted { ceiling, last } => {
            assert_eq!(ceiling, 44.0);
            assert!(matches!(last, CatalogError::IncompleteCoverage { coverage: 50, .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn all_scenes_too_cloudy_is_a_compositing_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.masking.max_invalid_fraction = 0.1;
    let catalog = FixedCatalog(vec![scene("cloudy", BBox::new(36.5, -1.5, 37.5, -0.5), 3.0)]);
    let storage = FakeStorage {
        reads: Rc::new(Cell::new(0)),
    };
    let mut pipeline = Pipeline::new(config, Box::new(catalog), Box::new(storage)).unwrap();

    let err = pipeline.run_window(&window(), &bbox()).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Compositing(clearsky_pipeline::CompositingError::NoValidScenes { .. })
    ));
    assert!(err.user_message().contains("too cloudy"));
}
