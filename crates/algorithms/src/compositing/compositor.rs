//! Row-batched compositing of aligned scene files
//!
//! All inputs share one grid. The output is produced in batches of full-width
//! rows: the same window is read from every input, missing samples are
//! marked, and the kernel reduces them along time. Each reduced batch goes
//! straight to the tiled writer, so memory holds one batch per input plus
//! one tile row of output.

use std::fs::File;
use std::path::Path;

use tracing::{debug, info};

use clearsky_core::io::{write_atomic, write_stack_rows, GeoTiffOptions, GeoTiffReader, StackHeader};
use clearsky_core::raster::{PixelWindow, RasterStack};
use clearsky_core::{Error, Result};

use super::kernels::{composite_layers, mark_missing, Statistic};

/// Rows read per batch
pub const DEFAULT_BATCH_ROWS: usize = 1600;

/// What a compositing run did
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeSummary {
    pub scenes: usize,
    /// True when a single input was copied through unchanged
    pub copied: bool,
    /// Output pixels (over all bands) no scene contributed to
    pub nodata_fraction: f64,
}

/// Temporal compositor configuration
#[derive(Debug, Clone)]
pub struct Compositor {
    pub batch_rows: usize,
    pub statistic: Statistic,
    pub nodata: f32,
    pub options: GeoTiffOptions,
}

impl Default for Compositor {
    fn default() -> Self {
        Self {
            batch_rows: DEFAULT_BATCH_ROWS,
            statistic: Statistic::Median,
            nodata: -9999.0,
            options: GeoTiffOptions::default(),
        }
    }
}

impl Compositor {
    pub fn new(statistic: Statistic, nodata: f32) -> Self {
        Self {
            statistic,
            nodata,
            ..Self::default()
        }
    }

    pub fn with_batch_rows(mut self, rows: usize) -> Self {
        self.batch_rows = rows.max(1);
        self
    }

    /// Composite in-memory stacks that share one grid.
    pub fn composite_stacks(&self, stacks: &[&RasterStack<f32>]) -> Result<RasterStack<f32>> {
        let first = stacks.first().ok_or_else(no_scenes)?;
        let mut layers = Vec::with_capacity(stacks.len());
        for stack in stacks {
            check_grid(first.shape(), first.transform(), stack.shape(), stack.transform())?;
            let mut data = stack.data().to_owned();
            mark_missing(&mut data, stack.nodata());
            layers.push(data);
        }
        let views: Vec<_> = layers.iter().map(|l| l.view()).collect();
        let data = composite_layers(&views, self.statistic, self.nodata)?;

        let mut out = RasterStack::from_array(data);
        out.set_transform(*first.transform());
        out.set_crs(first.crs().cloned());
        out.set_nodata(Some(self.nodata));
        if first.band_names().len() == first.band_count() {
            out = out.with_band_names(first.band_names().iter().cloned())?;
        }
        Ok(out)
    }

    /// Composite GeoTIFF stacks from disk into `output`.
    ///
    /// A single input is copied byte for byte. Zero inputs is an error.
    pub fn composite_files<P: AsRef<Path>>(&self, inputs: &[P], output: &Path) -> Result<CompositeSummary> {
        match inputs {
            [] => return Err(no_scenes()),
            [only] => {
                write_atomic(output, |out| {
                    std::io::copy(&mut File::open(only.as_ref())?, out)?;
                    Ok(())
                })?;
                info!(output = %output.display(), "single scene copied as composite");
                return Ok(CompositeSummary {
                    scenes: 1,
                    copied: true,
                    nodata_fraction: 0.0,
                });
            }
            _ => {}
        }

        let mut readers = inputs
            .iter()
            .map(|p| GeoTiffReader::open(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let (width, height, bands) = (readers[0].width(), readers[0].height(), readers[0].band_count());
        let transform = *readers[0].transform();
        let crs = readers[0].crs().cloned();
        for (i, r) in readers.iter().enumerate().skip(1) {
            if (r.width(), r.height(), r.band_count()) != (width, height, bands)
                || !r.transform().approx_eq(&transform, transform.cell_size() * 1e-3)
            {
                return Err(Error::GridMismatch(format!(
                    "{} does not share the grid of {}",
                    inputs[i].as_ref().display(),
                    inputs[0].as_ref().display()
                )));
            }
        }

        let header = StackHeader {
            bands,
            rows: height,
            cols: width,
            transform,
            crs,
            nodata: Some(self.nodata),
        };
        let mut missing = 0usize;
        write_stack_rows(output, &header, &self.options, |sink| {
            let mut row = 0;
            while row < height {
                let rows = self.batch_rows.min(height - row);
                let window = PixelWindow::rows(row, rows, width);

                let mut batch = Vec::with_capacity(readers.len());
                for reader in readers.iter_mut() {
                    let nodata = reader.nodata().map(|v| v as f32);
                    let mut data = reader.read_stack_window::<f32>(&window)?;
                    mark_missing(&mut data, nodata);
                    batch.push(data);
                }
                let views: Vec<_> = batch.iter().map(|b| b.view()).collect();
                let reduced = composite_layers(&views, self.statistic, self.nodata)?;
                missing += reduced.iter().filter(|&&v| v == self.nodata).count();
                sink.push_rows(reduced.view())?;

                debug!(row, rows, "composited batch");
                row += rows;
            }
            Ok(())
        })?;
        let total = bands * height * width;
        let nodata_fraction = if total == 0 { 0.0 } else { missing as f64 / total as f64 };

        info!(
            scenes = inputs.len(),
            nodata_fraction,
            output = %output.display(),
            "composite written"
        );
        Ok(CompositeSummary {
            scenes: inputs.len(),
            copied: false,
            nodata_fraction,
        })
    }
}

fn no_scenes() -> Error {
    Error::InvalidParameter {
        name: "inputs",
        value: "0".into(),
        reason: "no valid scenes to composite".into(),
    }
}

fn check_grid(
    expected: (usize, usize, usize),
    expected_transform: &clearsky_core::GeoTransform,
    actual: (usize, usize, usize),
    actual_transform: &clearsky_core::GeoTransform,
) -> Result<()> {
    let tol = expected_transform.cell_size() * 1e-3;
    if expected != actual || !expected_transform.approx_eq(actual_transform, tol) {
        return Err(Error::GridMismatch(format!(
            "stack {:?} does not share the grid of {:?}",
            actual, expected
        )));
    }
    Ok(())
}
