use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use bytecount_rs::{
    CounterConfig, CountingPipeline, CsvDetectionSource, CsvSnapshotSink, Frame, FrameSource,
    SourceError,
};

#[derive(Parser, Debug)]
#[command(name = "bytecount", about = "Count objects crossing a line in recorded detections")]
struct Args {
    /// Detector dump: frame,timestamp,class_id,confidence,x1,y1,x2,y2
    #[arg(long, value_name = "PATH")]
    detections: PathBuf,
    /// Snapshot CSV to write
    #[arg(long, value_name = "PATH", default_value = "vehicle_line_counts.csv")]
    output: PathBuf,
    /// TOML config; defaults apply when omitted
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Override the crossing line position
    #[arg(long)]
    line_y: Option<f32>,
    /// Override the crossing band half-width
    #[arg(long)]
    band_halfwidth: Option<f32>,
    /// Override the snapshot interval in seconds
    #[arg(long)]
    interval: Option<f64>,
    /// Stop after this many frames
    #[arg(long)]
    max_frames: Option<u64>,
}

/// Ends the source after a fixed number of frames.
struct Limited<S> {
    inner: S,
    remaining: Option<u64>,
}

impl<S: FrameSource<Error = SourceError>> FrameSource for Limited<S> {
    type Error = SourceError;

    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        match &mut self.remaining {
            Some(0) => Ok(None),
            Some(n) => {
                *n -= 1;
                self.inner.next_frame()
            }
            None => self.inner.next_frame(),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => CounterConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => CounterConfig::default(),
    };
    if let Some(line_y) = args.line_y {
        config.counting.line_y = line_y;
    }
    if let Some(band) = args.band_halfwidth {
        config.counting.band_halfwidth = band;
    }
    if let Some(interval) = args.interval {
        config.counting.snapshot_interval_seconds = interval;
    }
    config.validate().context("invalid configuration")?;

    let whitelist = config.whitelist()?;
    let sink = CsvSnapshotSink::from_path(&args.output, &whitelist)
        .with_context(|| format!("opening {}", args.output.display()))?;
    let source = CsvDetectionSource::from_path(&args.detections)
        .with_context(|| format!("opening {}", args.detections.display()))?;

    let pipeline = CountingPipeline::new(&config, sink)?;
    let mut source = Limited {
        inner: source,
        remaining: args.max_frames,
    };
    let summary = pipeline.run(&mut source)?;

    println!("Final counts: {}", summary.final_counts);
    println!(
        "Frames: {}, dropped detections: {}, snapshots written: {}",
        summary.frames, summary.dropped_detections, summary.sink.written
    );
    if summary.sink.write_errors > 0 {
        eprintln!(
            "warning: {} snapshot write errors, {} snapshots lost",
            summary.sink.write_errors, summary.sink.abandoned
        );
    }
    Ok(())
}
