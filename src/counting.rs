//! Line-crossing counts and their periodic persistence.

mod classes;
mod crossing;
mod sink;
mod snapshot;

pub use classes::{ClassCounts, ClassEntry, ClassWhitelist};
pub use crossing::{CrossingCounter, CrossingEvent, CrossingLine};
pub use sink::{
    CsvSnapshotSink, MemorySink, SharedSink, SinkReport, SnapshotSink, SnapshotWriter,
};
pub use snapshot::{Snapshot, SnapshotReporter};
