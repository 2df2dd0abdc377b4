//! Persistence of count snapshots.
//!
//! A [`SnapshotSink`] writes one row per snapshot. [`SnapshotWriter`] wraps a
//! sink with the failure policy of a run: the very first write must succeed,
//! later failures are retried once on the next emission, and whatever still
//! fails is counted and surfaced at shutdown.

use std::collections::VecDeque;
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{error, warn};

use crate::counting::classes::ClassWhitelist;
use crate::counting::snapshot::Snapshot;
use crate::error::SinkError;

/// Destination for count snapshots.
pub trait SnapshotSink {
    fn write(&mut self, snapshot: &Snapshot) -> Result<(), SinkError>;

    /// Flush and release the destination. Further writes fail.
    fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Collects snapshots in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub snapshots: Vec<Snapshot>,
}

impl SnapshotSink for MemorySink {
    fn write(&mut self, snapshot: &Snapshot) -> Result<(), SinkError> {
        self.snapshots.push(snapshot.clone());
        Ok(())
    }
}

/// Writes `Timestamp,<Class>,<Class>,...` rows, one column per whitelisted
/// class in whitelist order. The header is written on creation.
pub struct CsvSnapshotSink<W: io::Write> {
    writer: Option<csv::Writer<W>>,
}

impl CsvSnapshotSink<File> {
    /// Create (truncating) the CSV file at `path`.
    pub fn from_path<P: AsRef<Path>>(path: P, classes: &ClassWhitelist) -> Result<Self, SinkError> {
        let file = File::create(path)?;
        Self::from_writer(file, classes)
    }
}

impl<W: io::Write> CsvSnapshotSink<W> {
    pub fn from_writer(writer: W, classes: &ClassWhitelist) -> Result<Self, SinkError> {
        let mut writer = csv::Writer::from_writer(writer);
        let header = std::iter::once("Timestamp".to_string()).chain(classes.labels().map(column_name));
        writer.write_record(header)?;
        writer.flush()?;
        Ok(Self {
            writer: Some(writer),
        })
    }

    /// Recover the underlying writer, flushing buffered rows.
    pub fn into_inner(mut self) -> Result<W, SinkError> {
        let writer = self.writer.take().ok_or(SinkError::Closed)?;
        writer
            .into_inner()
            .map_err(|err| SinkError::Io(err.into_error()))
    }
}

fn column_name(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl<W: io::Write> SnapshotSink for CsvSnapshotSink<W> {
    fn write(&mut self, snapshot: &Snapshot) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        let row = std::iter::once(snapshot.timestamp().to_string())
            .chain(snapshot.counts().values().iter().map(|c| c.to_string()));
        writer.write_record(row)?;
        writer.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Sink handle shared by several streams. The lock is held for a single write.
pub struct SharedSink<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> Clone for SharedSink<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> SharedSink<S> {
    pub fn new(sink: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(sink)),
        }
    }

    /// Direct access to the shared sink, e.g. to close it once every stream is done.
    pub fn lock(&self) -> MutexGuard<'_, S> {
        self.inner.lock()
    }
}

impl<S: SnapshotSink> SnapshotSink for SharedSink<S> {
    fn write(&mut self, snapshot: &Snapshot) -> Result<(), SinkError> {
        self.inner.lock().write(snapshot)
    }

    /// Closing one handle leaves the shared sink open for the other streams.
    fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Outcome of a run's persistence, reported at shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkReport {
    /// Snapshots persisted
    pub written: u64,
    /// Failed write attempts, retries and close included
    pub write_errors: u64,
    /// Snapshots given up on after their retry failed
    pub abandoned: u64,
}

struct Pending {
    snapshot: Snapshot,
    attempts: u8,
}

/// Writes snapshots through a sink, retrying each failed one once.
pub struct SnapshotWriter<S> {
    sink: S,
    pending: VecDeque<Pending>,
    report: SinkReport,
}

impl<S: SnapshotSink> SnapshotWriter<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            pending: VecDeque::new(),
            report: SinkReport::default(),
        }
    }

    pub fn report(&self) -> SinkReport {
        self.report
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Queue `snapshot` behind any snapshot awaiting its retry and write in order.
    ///
    /// Returns an error only when the sink has never accepted a write; that
    /// failure ends the run.
    pub fn submit(&mut self, snapshot: Snapshot) -> Result<(), SinkError> {
        self.pending.push_back(Pending {
            snapshot,
            attempts: 0,
        });
        self.drain()
    }

    fn drain(&mut self) -> Result<(), SinkError> {
        while let Some(front) = self.pending.front_mut() {
            match self.sink.write(&front.snapshot) {
                Ok(()) => {
                    self.report.written += 1;
                    self.pending.pop_front();
                }
                Err(err) => {
                    self.report.write_errors += 1;
                    front.attempts += 1;
                    if self.report.written == 0 {
                        return Err(err);
                    }
                    if front.attempts >= 2 {
                        error!(
                            timestamp = front.snapshot.timestamp(),
                            %err,
                            "snapshot write failed after retry, abandoning"
                        );
                        self.report.abandoned += 1;
                        self.pending.pop_front();
                    } else {
                        warn!(
                            timestamp = front.snapshot.timestamp(),
                            %err,
                            "snapshot write failed, retrying on next emission"
                        );
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Give pending snapshots their retry, then close the sink.
    pub fn finish(mut self) -> Result<(S, SinkReport), SinkError> {
        if !self.pending.is_empty() {
            self.drain()?;
            for pending in self.pending.drain(..) {
                error!(
                    timestamp = pending.snapshot.timestamp(),
                    "snapshot still unwritten at shutdown"
                );
                self.report.abandoned += 1;
            }
        }
        if let Err(err) = self.sink.close() {
            warn!(%err, "closing snapshot sink failed");
            self.report.write_errors += 1;
        }
        Ok((self.sink, self.report))
    }
}
