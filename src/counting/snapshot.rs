//! Periodic, boundary-aligned count snapshots.

use tracing::info;

use crate::counting::classes::ClassCounts;

/// Immutable point-in-time copy of the cumulative per-class counts.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    timestamp: f64,
    counts: ClassCounts,
}

impl Snapshot {
    pub fn new(timestamp: f64, counts: ClassCounts) -> Self {
        Self { timestamp, counts }
    }

    /// Stream time, in seconds, of the frame that triggered the snapshot.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn counts(&self) -> &ClassCounts {
        &self.counts
    }
}

/// Emits a snapshot each time stream time crosses a multiple of the interval.
///
/// The check compares interval buckets (`floor(now / interval)`) rather than
/// testing `now % interval == 0`, so irregular polling neither skips nor
/// repeats a boundary. The first observed timestamp only sets the baseline.
#[derive(Debug, Clone)]
pub struct SnapshotReporter {
    interval: f64,
    last_bucket: Option<i64>,
    last_emitted: Option<f64>,
}

impl SnapshotReporter {
    /// `interval_seconds` must be positive and finite; the config layer checks it.
    pub fn new(interval_seconds: f64) -> Self {
        Self {
            interval: interval_seconds,
            last_bucket: None,
            last_emitted: None,
        }
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    fn bucket(&self, now: f64) -> i64 {
        (now / self.interval).floor() as i64
    }

    /// Emit a snapshot if `now` lies in a later interval than the previous call.
    pub fn maybe_emit(&mut self, now: f64, counts: &ClassCounts) -> Option<Snapshot> {
        let bucket = self.bucket(now);
        match self.last_bucket {
            None => {
                self.last_bucket = Some(bucket);
                None
            }
            Some(last) if bucket > last => {
                self.last_bucket = Some(bucket);
                Some(self.emit(now, counts))
            }
            Some(_) => None,
        }
    }

    /// Final snapshot at shutdown, unless one was already emitted at `now`.
    pub fn flush(&mut self, now: f64, counts: &ClassCounts) -> Option<Snapshot> {
        if self.last_emitted == Some(now) {
            return None;
        }
        self.last_bucket = Some(self.bucket(now));
        Some(self.emit(now, counts))
    }

    fn emit(&mut self, now: f64, counts: &ClassCounts) -> Snapshot {
        self.last_emitted = Some(now);
        info!(timestamp = now, counts = %counts, "snapshot");
        Snapshot::new(now, counts.clone())
    }
}
