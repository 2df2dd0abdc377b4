//! Trait for the external detector / video feed.

use std::convert::Infallible;

use crate::tracker::Detection;

/// One frame's worth of detector output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    /// Stream time in seconds
    pub timestamp: f64,
    pub detections: Vec<Detection>,
}

impl Frame {
    pub fn new(timestamp: f64, detections: Vec<Detection>) -> Self {
        Self {
            timestamp,
            detections,
        }
    }
}

/// Supplier of frames, in stream order.
///
/// Implement this to connect a detection model or a recorded dump to the
/// counting pipeline.
///
/// # Example
///
/// ```ignore
/// use bytecount_rs::{Frame, FrameSource};
///
/// struct MyDetector {
///     // Your model and video reader here
/// }
///
/// impl FrameSource for MyDetector {
///     type Error = std::io::Error;
///
///     fn next_frame(&mut self) -> Result<Option<Frame>, Self::Error> {
///         // Decode the next frame, run inference, return detections
///         Ok(None)
///     }
/// }
/// ```
pub trait FrameSource {
    /// Error type for source failures.
    type Error;

    /// The next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, Self::Error>;
}

impl FrameSource for std::vec::IntoIter<Frame> {
    type Error = Infallible;

    fn next_frame(&mut self) -> Result<Option<Frame>, Self::Error> {
        Ok(self.next())
    }
}
