//! Connects frame sources (detectors, recorded dumps) to the tracker and counter.

mod builder;
mod csv_source;
mod pipeline;
mod source;

pub use builder::DetectionBuilder;
pub use csv_source::CsvDetectionSource;
pub use pipeline::{CountingPipeline, FrameOutput, RunSummary, StopHandle};
pub use source::{Frame, FrameSource};
