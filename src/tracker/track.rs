//! A single tracked object and the id allocator that names it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ndarray::{Array1, Array2};
use tracing::{debug, warn};

use crate::tracker::kalman_filter::KalmanFilter;
use crate::tracker::matching::Detection;
use crate::tracker::rect::Rect;
use crate::tracker::track_state::TrackState;

/// Hands out monotonically increasing track ids, starting at 1.
///
/// Clones share the same counter, so several track managers can draw from one
/// namespace; a fresh allocator starts its own.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    last: Arc<AtomicU64>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle onto the same counter, for use by another stream.
    pub fn shared(&self) -> Self {
        self.clone()
    }

    pub fn next_id(&self) -> u64 {
        self.last.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Single object track.
#[derive(Debug, Clone)]
pub struct Track {
    /// Unique track identifier, never reused
    pub track_id: u64,
    /// Class id of the detection that created the track
    pub class_id: u32,
    /// Class name, fixed at creation
    pub class_label: Arc<str>,
    /// Current lifecycle state
    pub state: TrackState,
    /// Matches in a row without a missed frame
    pub consecutive_hits: u32,
    /// Frames since creation
    pub age: u32,
    /// Frames since the last matched detection
    pub time_since_update: u32,
    /// Confidence of the last matched detection
    pub last_confidence: f32,
    /// High-confidence matches whose class disagreed with `class_id`
    pub label_conflicts: u32,
    /// Kalman state mean `[cx, cy, w, h, vx, vy, vw, vh]`
    mean: Array1<f64>,
    /// Kalman state covariance (8x8)
    covariance: Array2<f64>,
    /// Box of the last matched detection
    observed: Rect,
}

fn measurement(rect: &Rect) -> [f64; 4] {
    rect.to_cxcywh().map(f64::from)
}

impl Track {
    /// Start a tentative track from an unmatched detection. With `min_hits <= 1`
    /// the creating detection alone confirms it.
    pub fn new(
        track_id: u64,
        detection: &Detection,
        class_label: Arc<str>,
        kalman_filter: &KalmanFilter,
        min_hits: u32,
    ) -> Self {
        let (mean, covariance) = kalman_filter.initiate(measurement(&detection.bbox));
        let state = if min_hits <= 1 {
            TrackState::Confirmed
        } else {
            TrackState::Tentative
        };

        Self {
            track_id,
            class_id: detection.class_id,
            class_label,
            state,
            consecutive_hits: 1,
            age: 0,
            time_since_update: 0,
            last_confidence: detection.confidence,
            label_conflicts: 0,
            mean,
            covariance,
            observed: detection.bbox,
        }
    }

    /// Box implied by the motion state.
    pub fn predicted_rect(&self) -> Rect {
        Rect::from_cxcywh(
            self.mean[0] as f32,
            self.mean[1] as f32,
            self.mean[2] as f32,
            self.mean[3] as f32,
        )
    }

    /// Box to report: the matched detection on frames with a match, the
    /// prediction while coasting.
    pub fn rect(&self) -> Rect {
        if self.time_since_update == 0 {
            self.observed
        } else {
            self.predicted_rect()
        }
    }

    /// Centroid of [`Track::rect`].
    pub fn center(&self) -> (f32, f32) {
        self.rect().center()
    }

    /// Motion state as `(cx, cy, w, h, vx, vy, vw, vh)`.
    pub fn motion_state(&self) -> [f64; 8] {
        std::array::from_fn(|i| self.mean[i])
    }

    /// Advance the motion state one frame and return the predicted box.
    pub fn predict(&mut self, kalman_filter: &KalmanFilter) -> Rect {
        let mut mean = self.mean.clone();
        if self.time_since_update > 0 {
            // Coasting tracks keep moving but stop growing or shrinking.
            mean[6] = 0.0;
            mean[7] = 0.0;
        }
        let (new_mean, new_cov) = kalman_filter.predict(&mean, &self.covariance);
        self.mean = new_mean;
        self.covariance = new_cov;
        self.age += 1;
        self.predicted_rect()
    }

    /// Correct the motion state with a matched detection and advance the lifecycle.
    pub fn update(
        &mut self,
        detection: &Detection,
        kalman_filter: &KalmanFilter,
        min_hits: u32,
        high_confidence: bool,
    ) {
        let z = measurement(&detection.bbox);
        match kalman_filter.update(&self.mean, &self.covariance, z) {
            Ok((mean, covariance)) => {
                self.mean = mean;
                self.covariance = covariance;
            }
            Err(err) => {
                warn!(track_id = self.track_id, %err, "motion update failed, reinitialising state");
                let (mean, covariance) = kalman_filter.initiate(z);
                self.mean = mean;
                self.covariance = covariance;
            }
        }

        if high_confidence && detection.class_id != self.class_id {
            self.label_conflicts += 1;
            debug!(
                track_id = self.track_id,
                label = %self.class_label,
                detected = detection.class_id,
                conflicts = self.label_conflicts,
                "detection class disagrees with track label"
            );
        }

        self.observed = detection.bbox;
        self.last_confidence = detection.confidence;
        self.time_since_update = 0;
        self.consecutive_hits += 1;

        self.state = match self.state {
            TrackState::Tentative if self.consecutive_hits >= min_hits => TrackState::Confirmed,
            TrackState::Lost => TrackState::Confirmed,
            state => state,
        };
    }

    /// Record a frame without a match. Tentative tracks are dropped at once;
    /// confirmed ones coast until `max_age` is exceeded.
    pub fn mark_missed(&mut self, max_age: u32) {
        self.time_since_update += 1;
        self.consecutive_hits = 0;

        self.state = match self.state {
            TrackState::Tentative => TrackState::Removed,
            _ if self.time_since_update > max_age => TrackState::Removed,
            TrackState::Confirmed => TrackState::Lost,
            state => state,
        };
    }

    pub fn is_removed(&self) -> bool {
        self.state == TrackState::Removed
    }
}
