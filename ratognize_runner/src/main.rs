// THEORY:
// The runner drives the `ratognize` engine over a recording stored as a
// directory of still frames (one image per frame, in file-name order). It owns
// everything the engine deliberately leaves out: command-line parsing, file
// discovery, image decoding, cropping to the region of interest, optional
// pre-smoothing, HSV conversion, and the creation of the output files.
//
// Two modes exist. In live mode every frame is decoded and detected, and the
// `.blobs`, `.log` and (optionally) `.colors` files are written next to each
// other in the output directory. In replay mode the files of an earlier run are
// read back frame by frame instead, and light changes found in the old log
// drive color selection exactly as live classification would.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use image::{RgbImage, imageops};
use tracing::{debug, info};

use ratognize::config::{PipelineConfig, Roi};
use ratognize::core_modules::color_model::MAX_MARKERS;
use ratognize::core_modules::hsv::convert_rgb_to_hsv_into;
use ratognize::core_modules::smoothing::presmooth;
use ratognize::datetime::{days_since_last_paint, parse_paint_dates, parse_timestamp};
use ratognize::output::blob_file::{BlobFileWriter, FrameBlobs, MarkerLayout};
use ratognize::output::diagnostics::DiagnosticLog;
use ratognize::output::fade_report::write_fade_report;
use ratognize::replay::{BarcodeReader, BarcodeShape, BlobReader, LightLogReader};
use ratognize::{ColorQuery, FrameOrchestrator};

const FRAME_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "tif"];

#[derive(Parser, Debug)]
#[command(name = "ratognize")]
#[command(about = "Detect color-marked animals in a recording stored as still frames")]
#[command(version)]
struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Directory holding one image per frame. Its name may carry the recording
    /// start time (`YYYY-MM-DD_hh-mm-ss`).
    #[arg(long)]
    frames: PathBuf,

    /// Directory for the output files.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Days since the markers were last painted. Overrides the config file and
    /// the paint-date lookup.
    #[arg(long)]
    days_since_last_paint: Option<i32>,

    /// File with `PAINT <timestamp>` lines, used to derive the days since the
    /// last paint from the recording start time.
    #[arg(long)]
    paint_dates: Option<PathBuf>,

    /// Recording start time; parsed from the frames directory name if omitted.
    #[arg(long)]
    video_start: Option<String>,

    /// Read the `.blobs`, `.blobs.barcodes` and `.log` files of an earlier run
    /// instead of detecting.
    #[arg(long)]
    replay: bool,

    /// Also write the `.colors` fading-color report.
    #[arg(long)]
    fade_report: bool,

    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // --- 1. Configuration and color query ---
    let config = PipelineConfig::load(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    let stem = recording_name(&cli.frames)?;
    let query = color_query(&cli, &config, &stem)?;
    info!(recording = %stem, days_since_paint = query.days_since_paint, "starting run");

    // --- 2. Frame list ---
    let mut frames = list_frames(&cli.frames)?;
    if let Some(limit) = cli.max_frames {
        frames.truncate(limit);
    }
    if frames.is_empty() {
        bail!("no frames found in {}", cli.frames.display());
    }

    fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("creating output directory {}", cli.output_dir.display()))?;
    let output = |extension: &str| cli.output_dir.join(format!("{stem}.{extension}"));

    if cli.replay {
        return run_replay(config, query, &frames, &output);
    }

    // --- 3. Output files ---
    let mut log = DiagnosticLog::new(BufWriter::new(create(&output("log"))?));
    let created = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let invocation = std::env::args().collect::<Vec<_>>().join(" ");
    log.write_header(&created, &invocation)?;

    let mut blob_file = if config.output.blobs {
        let layout = if config.detection.ellipse_blobs { MarkerLayout::Ellipse } else { MarkerLayout::Circle };
        let mut writer = BlobFileWriter::new(BufWriter::new(create(&output("blobs"))?), layout, config.roi_origin());
        writer.write_header(config.motion.enabled)?;
        Some(writer)
    } else {
        None
    };

    let write_colors = cli.fade_report || config.output.fade_report;
    let mut orchestrator = FrameOrchestrator::new(config, query, log)?;
    if write_colors {
        let names: Vec<&str> = (0..MAX_MARKERS).map(|slot| orchestrator.config().marker_name(slot)).collect();
        let mut out = BufWriter::new(create(&output("colors"))?);
        write_fade_report(&mut out, orchestrator.color_model(), &names)?;
        out.flush()?;
    }

    // --- 4. Frame loop ---
    let roi = orchestrator.config().roi;
    let smoothing = orchestrator.config().detection.gauss_smoothing;
    let mut hsv = RgbImage::new(0, 0);
    orchestrator.log_mut().first_frame(0)?;
    for (index, path) in frames.iter().enumerate() {
        let frame_no = index as u64;
        let frame = presmooth(load_frame(path, roi)?, smoothing);
        if hsv.dimensions() != frame.dimensions() {
            hsv = RgbImage::new(frame.width(), frame.height());
        }
        convert_rgb_to_hsv_into(&frame, &mut hsv);

        let report = orchestrator
            .process_frame(frame_no, &frame, &hsv)
            .with_context(|| format!("processing frame {frame_no} ({})", path.display()))?;
        if let Some(writer) = blob_file.as_mut() {
            writer.write_frame(&FrameBlobs {
                frame: frame_no,
                motion: report.motion.as_deref(),
                creatures: &report.creatures,
                markers: &report.markers,
            })?;
        }
        debug!(frame = frame_no, markers = report.markers.len(), creatures = report.creatures.len(), "frame done");
    }
    let last = frames.len() as u64 - 1;
    orchestrator.log_mut().last_frame(last)?;
    orchestrator.log_mut().flush()?;
    if let Some(writer) = blob_file.as_mut() {
        writer.flush()?;
    }

    info!(frames = frames.len(), "run finished");
    Ok(())
}

/// Replays the output of an earlier run of the same recording.
fn run_replay(
    config: PipelineConfig,
    query: ColorQuery,
    frames: &[PathBuf],
    output: &dyn Fn(&str) -> PathBuf,
) -> Result<()> {
    let roi_origin = config.roi_origin();
    let shape = BarcodeShape {
        marker_diameter_min: config.detection.marker_diameter_min,
        marker_diameter_max: config.detection.marker_diameter_max,
        chips_per_marker: config.detection.chips_per_marker,
    };
    let mut barcodes = BarcodeReader::new(open(&output("blobs.barcodes"))?, shape, roi_origin);
    let mut blobs = BlobReader::new(open(&output("blobs"))?, roi_origin, config.motion.enabled);
    let mut lights = LightLogReader::new(open(&output("log"))?);

    let mut orchestrator = FrameOrchestrator::new(config, query, DiagnosticLog::new(io::sink()))?;
    let (mut full, mut contested, mut discarded) = (0usize, 0usize, 0usize);
    for frame_no in 0..frames.len() as u64 {
        let light = lights.next_frame(frame_no)?;
        let stored = blobs.next_frame(frame_no)?;
        let codes = barcodes.next_frame(frame_no)?;
        let report = orchestrator.replay_frame(frame_no, light, stored)?;

        full += codes.iter().filter(|c| c.fix.is_full()).count();
        contested += codes.iter().filter(|c| c.fix.is_contested()).count();
        discarded += codes.iter().filter(|c| c.fix.is_discarded()).count();
        debug!(
            frame = frame_no,
            light = %report.light,
            markers = report.markers.len(),
            barcodes = codes.len(),
            "replayed frame"
        );
    }

    info!(frames = frames.len(), full, contested, discarded, "replay finished");
    Ok(())
}

/// Recording name used as the stem of every output file.
fn recording_name(frames: &Path) -> Result<String> {
    frames
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no directory name", frames.display()))
}

fn color_query(cli: &Cli, config: &PipelineConfig, stem: &str) -> Result<ColorQuery> {
    let video_start = match &cli.video_start {
        Some(text) => Some(parse_timestamp(text)?),
        None => parse_timestamp(stem).ok(),
    };

    let days_since_paint = if let Some(days) = cli.days_since_last_paint {
        days
    } else if let Some(path) = &cli.paint_dates {
        let text = fs::read_to_string(path).with_context(|| format!("reading paint dates {}", path.display()))?;
        let dates = parse_paint_dates(&text)?;
        let start = video_start.context("paint dates need the recording start time")?;
        days_since_last_paint(&dates, start)?
    } else {
        config.colors.days_since_last_paint.unwrap_or(0)
    };

    Ok(ColorQuery { days_since_paint, video_start })
}

/// Image files of a frames directory, sorted by file name.
fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("listing frames in {}", dir.display()))? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if is_image {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

fn load_frame(path: &Path, roi: Option<Roi>) -> Result<RgbImage> {
    let frame = image::open(path).with_context(|| format!("decoding {}", path.display()))?.to_rgb8();
    let Some(roi) = roi else {
        return Ok(frame);
    };
    if roi.x + roi.width > frame.width() || roi.y + roi.height > frame.height() {
        bail!(
            "roi {}x{}+{}+{} does not fit frame {} of size {}x{}",
            roi.width,
            roi.height,
            roi.x,
            roi.y,
            path.display(),
            frame.width(),
            frame.height()
        );
    }
    Ok(imageops::crop_imm(&frame, roi.x, roi.y, roi.width, roi.height).to_image())
}

fn create(path: &Path) -> Result<File> {
    File::create(path).with_context(|| format!("creating {}", path.display()))
}

fn open(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(BufReader::new(file))
}
