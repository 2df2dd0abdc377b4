//! Counts distinct objects of each class crossing a horizontal reference line.
//!
//! Detections from an external detector are tracked across frames with a
//! ByteTrack-style tracker (constant-velocity Kalman prediction, two-pass
//! confidence-tiered IOU association). Confirmed tracks whose centroid enters a
//! band around the line are counted once per track id, and cumulative counts are
//! snapshotted at fixed stream-time intervals.

pub mod config;
pub mod counting;
pub mod error;
pub mod integration;
pub mod tracker;

pub use config::{CounterConfig, CountingConfig};
pub use counting::{
    ClassCounts, ClassEntry, ClassWhitelist, CrossingCounter, CrossingEvent, CrossingLine,
    CsvSnapshotSink, MemorySink, SharedSink, Snapshot, SnapshotReporter, SnapshotSink,
};
pub use error::{ConfigError, DetectionError, PipelineError, SinkError, SourceError};
pub use integration::{
    CountingPipeline, CsvDetectionSource, DetectionBuilder, Frame, FrameOutput, FrameSource,
    RunSummary, StopHandle,
};
pub use tracker::{Detection, IdAllocator, Rect, Track, TrackManager, TrackState, TrackerConfig};
