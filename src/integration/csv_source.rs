//! Replays a recorded detector dump as a [`FrameSource`].
//!
//! Expected columns: `frame,timestamp,class_id,confidence,x1,y1,x2,y2`.
//! Consecutive rows sharing a `frame` number form one frame. A row whose
//! `class_id` is empty marks a frame without detections.

use std::fs::File;
use std::io;
use std::iter::Peekable;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use super::{DetectionBuilder, Frame, FrameSource};
use crate::error::SourceError;
use crate::tracker::Detection;

#[derive(Debug, Clone, Deserialize)]
struct DetectionRow {
    frame: u64,
    timestamp: f64,
    class_id: Option<u32>,
    confidence: Option<f32>,
    x1: Option<f32>,
    y1: Option<f32>,
    x2: Option<f32>,
    y2: Option<f32>,
}

impl DetectionRow {
    fn detection(&self) -> Option<Detection> {
        match (
            self.class_id,
            self.confidence,
            self.x1,
            self.y1,
            self.x2,
            self.y2,
        ) {
            (Some(class_id), Some(confidence), Some(x1), Some(y1), Some(x2), Some(y2)) => Some(
                DetectionBuilder::new()
                    .tlbr(x1, y1, x2, y2)
                    .class_id(class_id)
                    .confidence(confidence)
                    .build(),
            ),
            _ => None,
        }
    }
}

type Rows<R> = csv::DeserializeRecordsIntoIter<R, DetectionRow>;

pub struct CsvDetectionSource<R: io::Read> {
    rows: Peekable<Rows<R>>,
    last_timestamp: Option<f64>,
}

impl CsvDetectionSource<File> {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)?;
        Ok(Self::from_csv(reader))
    }
}

impl<R: io::Read> CsvDetectionSource<R> {
    pub fn from_reader(reader: R) -> Self {
        Self::from_csv(
            csv::ReaderBuilder::new()
                .trim(csv::Trim::All)
                .from_reader(reader),
        )
    }

    fn from_csv(reader: csv::Reader<R>) -> Self {
        Self {
            rows: reader.into_deserialize().peekable(),
            last_timestamp: None,
        }
    }
}

impl<R: io::Read> FrameSource for CsvDetectionSource<R> {
    type Error = SourceError;

    fn next_frame(&mut self) -> Result<Option<Frame>, Self::Error> {
        let first = match self.rows.next() {
            Some(row) => row?,
            None => return Ok(None),
        };

        if let Some(last) = self.last_timestamp {
            if first.timestamp < last {
                return Err(SourceError::OutOfOrder {
                    frame: first.frame,
                    timestamp: first.timestamp,
                });
            }
        }
        self.last_timestamp = Some(first.timestamp);

        let number = first.frame;
        let mut frame = Frame::new(first.timestamp, Vec::new());
        let mut push = |row: &DetectionRow| match row.detection() {
            Some(det) => frame.detections.push(det),
            None if row.class_id.is_some() => {
                warn!(frame = row.frame, "skipping detection row with missing fields");
            }
            None => {}
        };

        push(&first);
        while let Some(row) = self
            .rows
            .next_if(|row| matches!(row, Ok(r) if r.frame == number))
        {
            push(&row?);
        }

        Ok(Some(frame))
    }
}
