//! CountingPipeline: the per-frame predict → associate → update → count → report loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{error, info, warn};

use super::{Frame, FrameSource};
use crate::config::CounterConfig;
use crate::counting::{
    ClassCounts, ClassWhitelist, CrossingCounter, CrossingEvent, CrossingLine, SinkReport,
    Snapshot, SnapshotReporter, SnapshotSink, SnapshotWriter,
};
use crate::error::PipelineError;
use crate::tracker::{FrameStats, IdAllocator, RenderTrack, TrackManager};

/// Cooperative stop signal, checked between frames.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Everything produced by one frame.
#[derive(Debug, Clone)]
pub struct FrameOutput {
    pub frame_id: u64,
    pub timestamp: f64,
    pub stats: FrameStats,
    /// Tentative and confirmed tracks, for overlay drawing
    pub render: Vec<RenderTrack>,
    pub crossings: Vec<CrossingEvent>,
    pub snapshot: Option<Snapshot>,
}

/// Final state of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub frames: u64,
    pub dropped_detections: u64,
    pub final_counts: ClassCounts,
    pub sink: SinkReport,
    /// The run ended on a stop request rather than an exhausted source.
    pub stopped: bool,
}

/// One video stream's tracker, counter and reporter, writing into a snapshot sink.
///
/// Streams never share a pipeline; to process several streams concurrently,
/// give each its own pipeline and share only the sink (see
/// [`SharedSink`](crate::counting::SharedSink)) and, optionally, the id allocator.
pub struct CountingPipeline<K: SnapshotSink> {
    tracker: TrackManager,
    counter: CrossingCounter,
    reporter: SnapshotReporter,
    writer: SnapshotWriter<K>,
    line: CrossingLine,
    stop: StopHandle,
    last_timestamp: Option<f64>,
    dropped: u64,
}

impl<K: SnapshotSink> CountingPipeline<K> {
    /// Validate `config` and build a pipeline with its own track id namespace.
    pub fn new(config: &CounterConfig, sink: K) -> Result<Self, PipelineError> {
        Self::with_id_allocator(config, sink, IdAllocator::new())
    }

    /// Like [`CountingPipeline::new`], drawing track ids from `ids`.
    pub fn with_id_allocator(
        config: &CounterConfig,
        sink: K,
        ids: IdAllocator,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let classes = Arc::new(ClassWhitelist::new(&config.classes)?);
        let counting = &config.counting;

        Ok(Self {
            tracker: TrackManager::with_id_allocator(config.tracker.clone(), classes.clone(), ids),
            counter: CrossingCounter::new(classes),
            reporter: SnapshotReporter::new(counting.snapshot_interval_seconds),
            writer: SnapshotWriter::new(sink),
            line: CrossingLine::new(counting.line_y, counting.band_halfwidth),
            stop: StopHandle::default(),
            last_timestamp: None,
            dropped: 0,
        })
    }

    /// Handle for requesting a stop from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn tracker(&self) -> &TrackManager {
        &self.tracker
    }

    pub fn counter(&self) -> &CrossingCounter {
        &self.counter
    }

    pub fn counts(&self) -> &ClassCounts {
        self.counter.counts()
    }

    /// Process a single frame.
    ///
    /// Fails only when a snapshot cannot be written and the sink has never
    /// accepted a write.
    pub fn process_frame(&mut self, frame: Frame) -> Result<FrameOutput, PipelineError> {
        let Frame {
            timestamp,
            detections,
        } = frame;

        if let Some(last) = self.last_timestamp {
            if timestamp < last {
                warn!(timestamp, last, "frame timestamp went backwards");
            }
        }
        self.last_timestamp = Some(timestamp);

        let stats = self.tracker.update(detections);
        self.dropped += stats.dropped as u64;

        let crossings = self
            .counter
            .observe(self.tracker.confirmed(), self.line, timestamp);

        let snapshot = self.reporter.maybe_emit(timestamp, self.counter.counts());
        if let Some(snapshot) = &snapshot {
            self.writer.submit(snapshot.clone())?;
        }

        Ok(FrameOutput {
            frame_id: self.tracker.frame_id(),
            timestamp,
            stats,
            render: self.tracker.render_feed(),
            crossings,
            snapshot,
        })
    }

    /// Pull frames from `source` until it is exhausted or a stop is requested,
    /// then flush a final snapshot and close the sink.
    pub fn run<S>(mut self, source: &mut S) -> Result<RunSummary, PipelineError>
    where
        S: FrameSource,
        S::Error: std::error::Error + Send + Sync + 'static,
    {
        let mut stopped = false;
        loop {
            if self.stop.is_stopped() {
                info!(frame = self.tracker.frame_id(), "stop requested");
                stopped = true;
                break;
            }
            match source.next_frame() {
                Ok(Some(frame)) => {
                    self.process_frame(frame)?;
                }
                Ok(None) => break,
                Err(err) => {
                    error!(frame = self.tracker.frame_id(), %err, "frame source failed");
                    match self.finish() {
                        Ok(summary) => info!(counts = %summary.final_counts, "partial run flushed"),
                        Err(flush_err) => error!(%flush_err, "final flush failed"),
                    }
                    return Err(PipelineError::Source(Box::new(err)));
                }
            }
        }

        let mut summary = self.finish()?;
        summary.stopped = stopped;
        Ok(summary)
    }

    /// Flush a final snapshot at the last seen timestamp and close the sink.
    pub fn finish(mut self) -> Result<RunSummary, PipelineError> {
        if let Some(now) = self.last_timestamp {
            if let Some(snapshot) = self.reporter.flush(now, self.counter.counts()) {
                self.writer.submit(snapshot)?;
            }
        }
        let (_, sink) = self.writer.finish()?;

        let summary = RunSummary {
            frames: self.tracker.frame_id(),
            dropped_detections: self.dropped,
            final_counts: self.counter.counts().clone(),
            sink,
            stopped: false,
        };
        info!(
            frames = summary.frames,
            dropped = summary.dropped_detections,
            written = sink.written,
            write_errors = sink.write_errors,
            abandoned = sink.abandoned,
            counts = %summary.final_counts,
            "run finished"
        );
        Ok(summary)
    }
}
