//! Clearsky CLI - Sentinel-2 cloud masking and temporal compositing

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use clearsky_algorithms::compositing::{Compositor, Statistic};
use clearsky_algorithms::indices::ndvi;
use clearsky_algorithms::masking::{apply_mask, SceneBands, SunGeometry};
use clearsky_algorithms::preview::{rgb_preview, PreviewParams};
use clearsky_core::io::{write_geotiff, write_stack, GeoTiffOptions, GeoTiffReader};
use clearsky_core::{BBox, RasterStack};
use clearsky_pipeline::catalog::{fetch_collection, CollectionFilter, SearchRequest, StacSceneCatalog};
use clearsky_pipeline::{
    build_masker, read_named_stack, run_task, AcquisitionWindow, BandId, HttpTaskControl, Pipeline, PipelineConfig,
    PipelineError,
};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "clearsky")]
#[command(author, version, about = "Cloud-free Sentinel-2 composites", long_about = None)]
struct Cli {
    /// Verbose output (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// YAML configuration file
    #[arg(short, long, global = true, env = "CLEARSKY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Date range, region and starting cloud cover shared by catalog commands
#[derive(clap::Args)]
struct WindowArgs {
    /// First day of the window (YYYY-MM-DD)
    #[arg(long)]
    start: NaiveDate,
    /// Last day of the window (YYYY-MM-DD)
    #[arg(long)]
    end: NaiveDate,
    /// Region as min_lon,min_lat,max_lon,max_lat
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    bbox: Vec<f64>,
    /// Initial cloud-cover limit in percent
    #[arg(long, default_value = "30")]
    cloud_cover: f64,
    /// Window name, used for the output directory
    #[arg(long, default_value = "window")]
    name: String,
}

impl WindowArgs {
    fn bbox(&self) -> Result<BBox> {
        parse_bbox(&self.bbox)
    }

    fn window(&self) -> AcquisitionWindow {
        AcquisitionWindow::new(self.name.clone(), self.start, self.end, self.cloud_cover)
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StatisticArg {
    Median,
    Mean,
}

impl From<StatisticArg> for Statistic {
    fn from(s: StatisticArg) -> Self {
        match s {
            StatisticArg::Median => Statistic::Median,
            StatisticArg::Mean => Statistic::Mean,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
    /// Search the catalog once and validate the collection
    Search {
        #[command(flatten)]
        window: WindowArgs,
        /// Write the collection snapshot here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Search with backoff, then download and align every scene
    Download {
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Mask a local scene stack
    Mask {
        /// Stack with spectral bands and SCL
        input: PathBuf,
        /// Masked stack (SCL dropped)
        output: PathBuf,
        /// Band names of the input, in order
        #[arg(long, value_delimiter = ',', default_value = "B02,B03,B04,B08,SCL")]
        bands: Vec<String>,
        /// Mean sun azimuth in degrees
        #[arg(long)]
        sun_azimuth: f64,
        /// Mean sun zenith in degrees
        #[arg(long)]
        sun_zenith: f64,
    },
    /// Composite aligned, masked stacks
    Composite {
        /// Input stacks sharing one grid
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
        /// Per-pixel statistic
        #[arg(long, value_enum)]
        statistic: Option<StatisticArg>,
        /// Rows per batch
        #[arg(long)]
        batch_rows: Option<usize>,
    },
    /// Full window pipeline: search, download, mask, composite
    Run {
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Process a task from the task API
    Task {
        /// Task identifier
        task_uid: String,
    },
    /// NDVI from a composite
    Ndvi {
        /// Composite stack
        input: PathBuf,
        /// Output file
        output: PathBuf,
        /// Band names of the composite, in order
        #[arg(long, value_delimiter = ',', default_value = "B02,B03,B04,B08")]
        bands: Vec<String>,
    },
    /// 8-bit RGB preview of a composite
    Preview {
        /// Composite stack
        input: PathBuf,
        /// Output file
        output: PathBuf,
        /// Band names of the composite, in order
        #[arg(long, value_delimiter = ',', default_value = "B02,B03,B04,B08")]
        bands: Vec<String>,
        /// Lower stretch percentile
        #[arg(long, default_value = "1")]
        low: f64,
        /// Upper stretch percentile
        #[arg(long, default_value = "99")]
        high: f64,
    },
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn progress(len: usize, msg: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:30.cyan/blue}] {pos}/{len} ({elapsed})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb.set_message(msg.to_string());
    pb
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    PipelineConfig::load(path).context("Failed to load configuration")
}

fn parse_bbox(values: &[f64]) -> Result<BBox> {
    let [w, s, e, n] = values else {
        bail!("bbox needs 4 values: min_lon,min_lat,max_lon,max_lat");
    };
    BBox::try_new(*w, *s, *e, *n).context("Invalid bbox")
}

fn parse_bands(names: &[String]) -> Result<Vec<BandId>> {
    names
        .iter()
        .map(|n| n.trim().parse::<BandId>().context("Invalid band list"))
        .collect()
}

fn band_position(bands: &[BandId], band: BandId) -> Result<usize> {
    bands
        .iter()
        .position(|&b| b == band)
        .with_context(|| format!("band {} is not in the band list", band))
}

fn read_stack_named(path: &Path, bands: &[BandId]) -> Result<RasterStack<f32>> {
    let pb = spinner("Reading raster...");
    let stack = read_named_stack(path, &BandId::names(bands))
        .with_context(|| format!("Failed to read {}", path.display()))?;
    pb.finish_and_clear();
    let (b, rows, cols) = stack.shape();
    info!("Input: {} bands, {} x {}", b, cols, rows);
    Ok(stack)
}

fn write_result(stack: &RasterStack<f32>, path: &Path) -> Result<()> {
    let pb = spinner("Writing output...");
    write_stack(stack, path, &GeoTiffOptions::default()).context("Failed to write output")?;
    pb.finish_and_clear();
    Ok(())
}

fn done(name: &str, path: &Path, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

/// Task failures carry a user-facing message as well as the cause
fn describe(err: PipelineError) -> anyhow::Error {
    let message = err.user_message();
    anyhow::Error::new(err).context(message)
}

// ─── Commands ───────────────────────────────────────────────────────────

fn info_command(input: &Path) -> Result<()> {
    let mut reader = GeoTiffReader::open(input).context("Failed to open raster")?;
    let (width, height, bands) = (reader.width(), reader.height(), reader.band_count());
    let t = *reader.transform();
    let layout = reader.chunk_layout();

    println!("File: {}", input.display());
    println!("Dimensions: {} x {} x {} bands", width, height, bands);
    println!("Cell size: {} x {}", t.pixel_width, t.pixel_height);
    println!("Bounds: {}", t.bbox(width, height));
    if let Some(crs) = reader.crs() {
        println!("CRS: {}", crs);
    }
    if let Some(nodata) = reader.nodata() {
        println!("NoData: {}", nodata);
    }
    println!(
        "Layout: {} {}x{}, {} bits, {}",
        if layout.tiled { "tiles" } else { "strips" },
        layout.chunk_width,
        layout.chunk_height,
        layout.bits_per_sample,
        if layout.planar { "band sequential" } else { "pixel interleaved" }
    );

    let stack = reader.read_stack::<f32>().context("Failed to read raster")?;
    println!("\nStatistics:");
    for b in 0..bands {
        let stats = stack.band_raster(b)?.statistics();
        print!("  Band {}:", b + 1);
        if let (Some(min), Some(max), Some(mean)) = (stats.min, stats.max, stats.mean) {
            print!(" min {:.4}  max {:.4}  mean {:.4}", min, max, mean);
        }
        println!(
            "  valid {} ({:.1}%)",
            stats.valid_count,
            100.0 * (1.0 - stats.nodata_fraction())
        );
    }
    Ok(())
}

fn search_command(config: PipelineConfig, args: &WindowArgs, output: Option<&Path>) -> Result<()> {
    let bbox = args.bbox()?;
    let request = SearchRequest::new(args.start, args.end, bbox, args.cloud_cover)?;
    let catalog = StacSceneCatalog::new(&config.catalog, &config.http)?;

    let pb = spinner("Searching catalog...");
    let result = fetch_collection(&catalog, &request, CollectionFilter::from(&config.catalog));
    pb.finish_and_clear();
    let collection = result.context("Collection rejected")?;

    println!(
        "{} scenes, cloud cover < {}%, coverage {}%",
        collection.len(),
        collection.max_cloud_cover,
        collection.coverage
    );
    for scene in &collection.scenes {
        let date = scene
            .datetime
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        println!("  {}  {}  {:>5.1}%  {}", date, scene.tile, scene.cloud_cover, scene.id);
    }
    if let Some(path) = output {
        collection.save_snapshot(path)?;
        println!("Snapshot saved to: {}", path.display());
    }
    Ok(())
}

fn download_command(config: PipelineConfig, args: &WindowArgs) -> Result<()> {
    let bbox = args.bbox()?;
    let window = args.window();
    let mut pipeline = Pipeline::from_config(config)?;

    let pb = spinner("Searching catalog...");
    let collection = pipeline.search(&window, &bbox);
    pb.finish_and_clear();
    let collection = collection.map_err(describe)?;

    let canvas = pipeline.canvas(&bbox)?;
    let dir = pipeline.window_dir(&window);
    std::fs::create_dir_all(&dir)?;

    let start = Instant::now();
    let pb = progress(collection.len(), "Downloading");
    for scene in &collection.scenes {
        pb.set_message(scene.id.clone());
        let scene_dir = pipeline.scene_dir(&window, scene);
        let downloaded = pipeline
            .download(scene, &bbox, &canvas, &scene_dir)
            .with_context(|| format!("Failed to download {}", scene.id))?;
        pipeline.align(&downloaded, &canvas)?;
        pb.inc(1);
    }
    pb.finish_and_clear();
    done("Scenes", &dir, start.elapsed());
    Ok(())
}

fn mask_command(config: PipelineConfig, input: &Path, output: &Path, bands: &[BandId], sun: SunGeometry) -> Result<()> {
    let masker = build_masker(&config)?;
    let stack = read_stack_named(input, bands)?;

    let start = Instant::now();
    let scene = SceneBands::from_stack(&stack, &masker.params().bands).context("Missing masking bands")?;
    let mask = masker.mask(&scene, sun).context("Failed to mask scene")?;
    let masked = apply_mask(&stack, &mask.invalid, config.grid.nodata, Some(BandId::Scl.name()))?;
    let elapsed = start.elapsed();

    write_result(&masked, output)?;
    println!(
        "Invalid fraction: {:.3} ({})",
        mask.invalid_fraction,
        if masker.is_usable(&mask) { "usable" } else { "too cloudy" }
    );
    done("Masked stack", output, elapsed);
    Ok(())
}

fn composite_command(
    config: PipelineConfig,
    inputs: &[PathBuf],
    output: &Path,
    statistic: Option<StatisticArg>,
    batch_rows: Option<usize>,
) -> Result<()> {
    let statistic = statistic.map(Statistic::from).unwrap_or(config.compositing.statistic);
    let compositor = Compositor::new(statistic, config.grid.nodata)
        .with_batch_rows(batch_rows.unwrap_or(config.compositing.batch_rows));

    let start = Instant::now();
    let pb = spinner(&format!("Compositing {} scenes...", inputs.len()));
    let summary = compositor.composite_files(inputs, output);
    pb.finish_and_clear();
    let summary = summary.context("Failed to composite")?;

    println!(
        "{} scenes{}, nodata {:.1}%",
        summary.scenes,
        if summary.copied { " (copied)" } else { "" },
        100.0 * summary.nodata_fraction
    );
    done("Composite", output, start.elapsed());
    Ok(())
}

fn run_command(config: PipelineConfig, args: &WindowArgs) -> Result<()> {
    let bbox = args.bbox()?;
    let mut pipeline = Pipeline::from_config(config)?;

    let start = Instant::now();
    let out = pipeline.run_window(&args.window(), &bbox).map_err(describe)?;

    println!(
        "{} scenes at cloud cover < {}%",
        out.collection.len(),
        out.collection.max_cloud_cover
    );
    for report in &out.scenes {
        println!(
            "  {}  invalid {:.3}{}",
            report.scene_id,
            report.invalid_fraction,
            if report.usable { "" } else { "  (excluded)" }
        );
    }
    println!("NDVI saved to: {}", out.ndvi.display());
    if let Some(preview) = &out.preview {
        println!("Preview saved to: {}", preview.display());
    }
    done("Composite", &out.composite, start.elapsed());
    Ok(())
}

fn task_command(config: PipelineConfig, task_uid: &str) -> Result<()> {
    let control = HttpTaskControl::new(&config.task_api, &config.http)?;
    let mut pipeline = Pipeline::from_config(config)?;

    let start = Instant::now();
    let outcome = run_task(&mut pipeline, &control, task_uid).map_err(describe)?;
    println!("Before: {}", outcome.before.composite.display());
    println!("After: {}", outcome.after.composite.display());
    println!("  Processing time: {:.2?}", start.elapsed());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Info { input } => info_command(&input)?,

        Commands::Search { window, output } => search_command(config, &window, output.as_deref())?,

        Commands::Download { window } => download_command(config, &window)?,

        Commands::Mask {
            input,
            output,
            bands,
            sun_azimuth,
            sun_zenith,
        } => {
            let bands = parse_bands(&bands)?;
            let sun = SunGeometry {
                azimuth: sun_azimuth,
                zenith: sun_zenith,
            };
            mask_command(config, &input, &output, &bands, sun)?;
        }

        Commands::Composite {
            inputs,
            output,
            statistic,
            batch_rows,
        } => composite_command(config, &inputs, &output, statistic, batch_rows)?,

        Commands::Run { window } => run_command(config, &window)?,

        Commands::Task { task_uid } => task_command(config, &task_uid)?,

        Commands::Ndvi { input, output, bands } => {
            let bands = parse_bands(&bands)?;
            let stack = read_stack_named(&input, &bands)?;
            let start = Instant::now();
            let result = ndvi(
                &stack,
                band_position(&bands, BandId::B08)?,
                band_position(&bands, BandId::B04)?,
                config.grid.nodata,
            )
            .context("Failed to calculate NDVI")?;
            let elapsed = start.elapsed();
            write_geotiff(&result, &output, &GeoTiffOptions::default()).context("Failed to write output")?;
            done("NDVI", &output, elapsed);
        }

        Commands::Preview {
            input,
            output,
            bands,
            low,
            high,
        } => {
            let bands = parse_bands(&bands)?;
            let stack = read_stack_named(&input, &bands)?;
            let rgb = [
                band_position(&bands, BandId::B04)?,
                band_position(&bands, BandId::B03)?,
                band_position(&bands, BandId::B02)?,
            ];
            let params = PreviewParams {
                low_percentile: low,
                high_percentile: high,
                ..PreviewParams::default()
            };
            let start = Instant::now();
            let result = rgb_preview(&stack, rgb, &params).context("Failed to build preview")?;
            let elapsed = start.elapsed();
            write_stack(&result, &output, &GeoTiffOptions::default()).context("Failed to write output")?;
            done("Preview", &output, elapsed);
        }
    }

    Ok(())
}
