//! Track collection and lifecycle: predict, associate, update, create, remove.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::counting::ClassWhitelist;
use crate::error::DetectionError;
use crate::tracker::kalman_filter::KalmanFilter;
use crate::tracker::matching::{self, AssociationParams, Detection, MatchPass};
use crate::tracker::rect::Rect;
use crate::tracker::track::{IdAllocator, Track};
use crate::tracker::track_state::TrackState;

/// Configuration for the [`TrackManager`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Detections at or above this confidence take part in the first pass
    pub high_thresh: f32,
    /// Detections below this confidence are discarded
    pub low_thresh: f32,
    /// IOU gate of the first pass
    pub min_iou_high: f32,
    /// IOU gate of the second pass
    pub min_iou_low: f32,
    /// Minimum confidence to start a track; `high_thresh` when unset
    pub new_track_thresh: Option<f32>,
    /// Consecutive matches needed to confirm a track
    pub min_hits: u32,
    /// Frames a track may go unmatched before removal
    pub max_age: u32,
    /// Only match detections of the track's own class
    pub class_aware_matching: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            high_thresh: 0.5,
            low_thresh: 0.1,
            min_iou_high: 0.2,
            min_iou_low: 0.1,
            new_track_thresh: None,
            min_hits: 3,
            max_age: 30,
            class_aware_matching: false,
        }
    }
}

impl TrackerConfig {
    fn association_params(&self) -> AssociationParams {
        AssociationParams {
            high_thresh: self.high_thresh,
            low_thresh: self.low_thresh,
            min_iou_high: self.min_iou_high,
            min_iou_low: self.min_iou_low,
            class_aware: self.class_aware_matching,
        }
    }

    fn new_track_thresh(&self) -> f32 {
        self.new_track_thresh.unwrap_or(self.high_thresh)
    }
}

/// One entry of the per-frame render feed.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTrack {
    pub track_id: u64,
    pub bbox: Rect,
    pub class_label: Arc<str>,
    pub state: TrackState,
}

/// What happened to the track set during one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Malformed or non-whitelisted detections that were dropped
    pub dropped: usize,
    pub matched: usize,
    pub created: usize,
    pub confirmed: usize,
    pub removed: usize,
}

pub struct TrackManager {
    tracks: Vec<Track>,
    frame_id: u64,
    config: TrackerConfig,
    classes: Arc<ClassWhitelist>,
    ids: IdAllocator,
    kalman_filter: KalmanFilter,
}

impl TrackManager {
    /// Create a manager with its own id namespace.
    pub fn new(config: TrackerConfig, classes: Arc<ClassWhitelist>) -> Self {
        Self::with_id_allocator(config, classes, IdAllocator::new())
    }

    /// Create a manager drawing ids from `ids`, which may be shared with other streams.
    pub fn with_id_allocator(
        config: TrackerConfig,
        classes: Arc<ClassWhitelist>,
        ids: IdAllocator,
    ) -> Self {
        Self {
            tracks: Vec::new(),
            frame_id: 0,
            config,
            classes,
            ids,
            kalman_filter: KalmanFilter::default(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Frames processed so far.
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// All live tracks, tentative ones included.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Confirmed tracks matched on the latest frame.
    pub fn confirmed(&self) -> impl Iterator<Item = &Track> {
        self.tracks
            .iter()
            .filter(|t| t.state == TrackState::Confirmed)
    }

    /// Tentative and confirmed tracks for overlay drawing. Coasting tracks are
    /// reported as `Confirmed` with their predicted box.
    pub fn render_feed(&self) -> Vec<RenderTrack> {
        self.tracks
            .iter()
            .map(|t| RenderTrack {
                track_id: t.track_id,
                bbox: t.rect(),
                class_label: t.class_label.clone(),
                state: match t.state {
                    TrackState::Lost => TrackState::Confirmed,
                    state => state,
                },
            })
            .collect()
    }

    fn check(&self, det: &Detection) -> Result<(), DetectionError> {
        det.check()?;
        if !self.classes.contains_id(det.class_id) {
            return Err(DetectionError::UnknownClass(det.class_id));
        }
        Ok(())
    }

    /// Process one frame of detections.
    pub fn update(&mut self, detections: Vec<Detection>) -> FrameStats {
        self.frame_id += 1;
        let mut stats = FrameStats::default();

        // Step 1: Drop malformed detections
        let detections: Vec<Detection> = detections
            .into_iter()
            .filter(|det| match self.check(det) {
                Ok(()) => true,
                Err(err) => {
                    warn!(frame = self.frame_id, %err, ?det, "dropping detection");
                    stats.dropped += 1;
                    false
                }
            })
            .collect();

        // Step 2: Predict every live track forward
        for track in self.tracks.iter_mut() {
            track.predict(&self.kalman_filter);
        }

        // Step 3: Two-pass association
        let association = matching::associate(
            &self.tracks,
            &detections,
            &self.config.association_params(),
        );

        let index: HashMap<u64, usize> = self
            .tracks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.track_id, i))
            .collect();

        for m in &association.matches {
            let track = &mut self.tracks[index[&m.track_id]];
            let was_confirmed = track.state.is_confirmed();
            track.update(
                &detections[m.detection_idx],
                &self.kalman_filter,
                self.config.min_hits,
                m.pass == MatchPass::High,
            );
            stats.matched += 1;
            if !was_confirmed && track.state.is_confirmed() {
                stats.confirmed += 1;
                debug!(
                    frame = self.frame_id,
                    track_id = track.track_id,
                    class = %track.class_label,
                    "track confirmed"
                );
            }
        }

        // Step 4: Age unmatched tracks
        for track_id in &association.unmatched_tracks {
            let track = &mut self.tracks[index[track_id]];
            let before = track.state;
            track.mark_missed(self.config.max_age);
            if before == TrackState::Confirmed && track.state == TrackState::Lost {
                debug!(frame = self.frame_id, track_id, "track lost");
            }
        }

        // Step 5: Init new tracks from unmatched high-confidence detections
        let new_track_thresh = self.config.new_track_thresh();
        for &idx in &association.unmatched_detections {
            let det = &detections[idx];
            if det.confidence < new_track_thresh {
                continue;
            }
            let Some(label) = self.classes.label(det.class_id) else {
                continue;
            };
            let track = Track::new(
                self.ids.next_id(),
                det,
                label.clone(),
                &self.kalman_filter,
                self.config.min_hits,
            );
            debug!(
                frame = self.frame_id,
                track_id = track.track_id,
                class = %track.class_label,
                state = %track.state,
                "track created"
            );
            stats.created += 1;
            if track.state.is_confirmed() {
                stats.confirmed += 1;
            }
            self.tracks.push(track);
        }

        // Step 6: Drop removed tracks for good
        let frame_id = self.frame_id;
        self.tracks.retain(|t| {
            if t.is_removed() {
                debug!(
                    frame = frame_id,
                    track_id = t.track_id,
                    age = t.age,
                    "track removed"
                );
                stats.removed += 1;
                false
            } else {
                true
            }
        });

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(min_hits: u32, max_age: u32) -> TrackManager {
        let classes = Arc::new(ClassWhitelist::new(&ClassWhitelist::vehicles()).unwrap());
        TrackManager::new(
            TrackerConfig {
                min_hits,
                max_age,
                ..TrackerConfig::default()
            },
            classes,
        )
    }

    fn car(y: f32, confidence: f32) -> Detection {
        Detection::new(100.0, y, 160.0, y + 60.0, 2, confidence)
    }

    #[test]
    fn test_malformed_detections_are_dropped() {
        let mut tracker = manager(1, 5);
        let stats = tracker.update(vec![
            Detection::new(0.0, 0.0, 0.0, 10.0, 2, 0.9),
            Detection::new(0.0, 0.0, 10.0, 10.0, 0, 0.9),
            Detection::new(0.0, 0.0, 10.0, 10.0, 2, -0.1),
            Detection::new(f32::NAN, 0.0, 10.0, 10.0, 2, 0.9),
            car(100.0, 0.9),
        ]);
        assert_eq!(stats.dropped, 4);
        assert_eq!(stats.created, 1);
        assert_eq!(tracker.tracks().len(), 1);
    }

    #[test]
    fn test_low_confidence_never_spawns() {
        let mut tracker = manager(1, 5);
        let stats = tracker.update(vec![car(100.0, 0.3), car(400.0, 0.05)]);
        assert_eq!(stats.dropped, 0);
        assert_eq!(stats.created, 0);
        assert!(tracker.tracks().is_empty());
    }

    #[test]
    fn test_new_track_thresh() {
        let classes = Arc::new(ClassWhitelist::new(&ClassWhitelist::vehicles()).unwrap());
        let mut tracker = TrackManager::new(
            TrackerConfig {
                new_track_thresh: Some(0.7),
                ..TrackerConfig::default()
            },
            classes,
        );
        tracker.update(vec![car(100.0, 0.6)]);
        assert!(tracker.tracks().is_empty());
        tracker.update(vec![car(100.0, 0.8)]);
        assert_eq!(tracker.tracks().len(), 1);
    }

    #[test]
    fn test_empty_frames_age_tracks() {
        let mut tracker = manager(1, 2);
        tracker.update(vec![car(100.0, 0.9)]);
        assert_eq!(tracker.confirmed().count(), 1);

        let stats = tracker.update(vec![]);
        assert_eq!(stats.matched, 0);
        assert_eq!(tracker.tracks()[0].state, TrackState::Lost);
        assert_eq!(tracker.confirmed().count(), 0);

        let feed = tracker.render_feed();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].state, TrackState::Confirmed);
        assert_eq!(feed[0].bbox, tracker.tracks()[0].predicted_rect());

        tracker.update(vec![]);
        let stats = tracker.update(vec![]);
        assert_eq!(stats.removed, 1);
        assert!(tracker.tracks().is_empty());
    }

    #[test]
    fn test_tentative_flicker_is_discarded() {
        let mut tracker = manager(3, 30);
        tracker.update(vec![car(100.0, 0.9)]);
        assert_eq!(tracker.tracks()[0].state, TrackState::Tentative);
        assert_eq!(tracker.confirmed().count(), 0);

        let stats = tracker.update(vec![]);
        assert_eq!(stats.removed, 1);

        tracker.update(vec![car(100.0, 0.9)]);
        assert_eq!(tracker.tracks()[0].track_id, 2);
    }

    #[test]
    fn test_render_feed_includes_tentative() {
        let mut tracker = manager(3, 30);
        tracker.update(vec![car(100.0, 0.9)]);
        let feed = tracker.render_feed();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].state, TrackState::Tentative);
        assert_eq!(&*feed[0].class_label, "car");
        assert_eq!(feed[0].bbox, car(100.0, 0.9).bbox);
    }

    #[test]
    fn test_shared_allocator_across_managers() {
        let classes = Arc::new(ClassWhitelist::new(&ClassWhitelist::vehicles()).unwrap());
        let ids = IdAllocator::new();
        let mut a = TrackManager::with_id_allocator(TrackerConfig::default(), classes.clone(), ids.shared());
        let mut b = TrackManager::with_id_allocator(TrackerConfig::default(), classes, ids.shared());

        a.update(vec![car(100.0, 0.9)]);
        b.update(vec![car(100.0, 0.9)]);
        a.update(vec![car(100.0, 0.9), car(400.0, 0.9)]);

        let mut seen: Vec<u64> = a
            .tracks()
            .iter()
            .chain(b.tracks())
            .map(|t| t.track_id)
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3]);
    }
}
