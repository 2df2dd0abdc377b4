//! Line-crossing counter with at-most-once semantics per track id.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use crate::counting::classes::{ClassCounts, ClassWhitelist};
use crate::tracker::{Track, TrackState};

/// Horizontal reference line and the band around it that counts as crossing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossingLine {
    pub y: f32,
    pub band_halfwidth: f32,
}

impl CrossingLine {
    pub fn new(y: f32, band_halfwidth: f32) -> Self {
        Self { y, band_halfwidth }
    }

    /// Open interval `(y - band, y + band)`.
    #[inline]
    pub fn contains(&self, cy: f32) -> bool {
        self.y - self.band_halfwidth < cy && cy < self.y + self.band_halfwidth
    }
}

/// Emitted the first (and only) time a track is seen inside the band.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossingEvent {
    pub track_id: u64,
    pub class_label: Arc<str>,
    pub timestamp: f64,
}

/// Counts distinct confirmed tracks whose centroid enters the crossing band.
///
/// Holds no track history beyond the set of ids already counted: each call
/// to [`CrossingCounter::observe`] depends only on the tracks passed in and
/// that set. Once counted, an id is never counted again, however often it
/// re-enters the band. The set grows for the lifetime of the counter.
#[derive(Debug, Clone)]
pub struct CrossingCounter {
    crossed_ids: HashSet<u64>,
    counts: ClassCounts,
}

impl CrossingCounter {
    pub fn new(classes: Arc<ClassWhitelist>) -> Self {
        Self {
            crossed_ids: HashSet::new(),
            counts: ClassCounts::new(classes),
        }
    }

    /// Evaluate one frame's confirmed tracks against `line`.
    ///
    /// Only `Confirmed` tracks of a whitelisted class are considered. Coasting
    /// `Lost` tracks are skipped, since their box is a prediction.
    pub fn observe<'a, I>(&mut self, tracks: I, line: CrossingLine, timestamp: f64) -> Vec<CrossingEvent>
    where
        I: IntoIterator<Item = &'a Track>,
    {
        let mut events = Vec::new();
        for track in tracks {
            if track.state != TrackState::Confirmed || self.crossed_ids.contains(&track.track_id) {
                continue;
            }
            let (_, cy) = track.center();
            if !line.contains(cy) {
                continue;
            }
            if !self.counts.increment(track.class_id) {
                continue;
            }
            self.crossed_ids.insert(track.track_id);

            info!(
                track_id = track.track_id,
                class = %track.class_label,
                cy,
                timestamp,
                total = self.counts.get(&track.class_label),
                "line crossed"
            );
            events.push(CrossingEvent {
                track_id: track.track_id,
                class_label: track.class_label.clone(),
                timestamp,
            });
        }
        events
    }

    pub fn counts(&self) -> &ClassCounts {
        &self.counts
    }

    pub fn crossed_ids(&self) -> &HashSet<u64> {
        &self.crossed_ids
    }

    pub fn has_crossed(&self, track_id: u64) -> bool {
        self.crossed_ids.contains(&track_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{Detection, KalmanFilter, TrackState};

    fn classes() -> Arc<ClassWhitelist> {
        Arc::new(ClassWhitelist::new(&ClassWhitelist::vehicles()).unwrap())
    }

    fn track(id: u64, class_id: u32, label: &str, cy: f32, min_hits: u32) -> Track {
        let det = Detection::new(0.0, cy - 20.0, 40.0, cy + 20.0, class_id, 0.9);
        Track::new(id, &det, label.into(), &KalmanFilter::new(), min_hits)
    }

    #[test]
    fn test_band_is_open_interval() {
        let line = CrossingLine::new(200.0, 5.0);
        assert!(line.contains(200.0));
        assert!(line.contains(195.5));
        assert!(line.contains(204.9));
        assert!(!line.contains(195.0));
        assert!(!line.contains(205.0));
    }

    #[test]
    fn test_counts_each_id_once() {
        let mut counter = CrossingCounter::new(classes());
        let line = CrossingLine::new(200.0, 5.0);
        let inside = track(1, 2, "car", 200.0, 1);

        let events = counter.observe([&inside], line, 1.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].track_id, 1);
        assert_eq!(&*events[0].class_label, "car");

        for t in 2..5 {
            assert!(counter.observe([&inside], line, t as f64).is_empty());
        }
        assert_eq!(counter.counts().get("car"), 1);
        assert!(counter.has_crossed(1));
    }

    #[test]
    fn test_ignores_tentative_and_outside() {
        let mut counter = CrossingCounter::new(classes());
        let line = CrossingLine::new(200.0, 5.0);
        let tentative = track(1, 2, "car", 200.0, 3);
        let outside = track(2, 2, "car", 150.0, 1);
        assert_eq!(tentative.state, TrackState::Tentative);

        assert!(counter.observe([&tentative, &outside], line, 0.0).is_empty());
        assert!(counter.crossed_ids().is_empty());
    }

    #[test]
    fn test_ignores_coasting_track_in_band() {
        let kf = KalmanFilter::new();
        let mut counter = CrossingCounter::new(classes());
        let line = CrossingLine::new(200.0, 5.0);
        let mut coasting = track(1, 2, "car", 200.0, 1);

        coasting.predict(&kf);
        coasting.mark_missed(30);
        assert_eq!(coasting.state, TrackState::Lost);
        assert!(line.contains(coasting.center().1));

        assert!(counter.observe([&coasting], line, 1.0).is_empty());
        assert_eq!(counter.counts().get("car"), 0);
        assert!(!counter.has_crossed(1));
    }

    #[test]
    fn test_counts_match_crossed_ids() {
        let mut counter = CrossingCounter::new(classes());
        let line = CrossingLine::new(200.0, 5.0);
        let tracks = vec![
            track(1, 2, "car", 199.0, 1),
            track(2, 7, "truck", 201.0, 1),
            track(3, 2, "car", 202.0, 1),
            track(4, 99, "tractor", 200.0, 1),
        ];

        let events = counter.observe(&tracks, line, 0.0);
        assert_eq!(events.len(), 3);
        assert_eq!(counter.counts().get("car"), 2);
        assert_eq!(counter.counts().get("truck"), 1);
        assert_eq!(counter.counts().total(), counter.crossed_ids().len() as u64);
    }
}
