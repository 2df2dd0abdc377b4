//! Detection-to-track association.
//!
//! Two passes over the frame's detections, split by confidence tier:
//! high-confidence boxes are matched against every live track first, then the
//! tracks that are still unmatched get a second chance against the
//! low-confidence boxes under a looser IOU gate. Only unmatched
//! high-confidence boxes are handed back as new-track candidates.

use ndarray::Array2;
use tracing::{debug, warn};

use crate::error::DetectionError;
use crate::tracker::rect::{Rect, iou_batch};
use crate::tracker::track::Track;

/// Cost assigned to forbidden pairs and to padding cells of the square matrix.
const INFEASIBLE: f64 = 1e6;

/// Per-row bias added to feasible cells. Rows are sorted by ascending track id,
/// so among equal-cost assignments the solver prefers the lower id.
const TIE_BREAK_STEP: f64 = 1e-7;

/// Detection input for the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Bounding box, stored as TLWH
    pub bbox: Rect,
    /// Detector class id
    pub class_id: u32,
    /// Detection confidence in [0, 1]
    pub confidence: f32,
}

impl Detection {
    /// Build a detection from TLBR coordinates.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, class_id: u32, confidence: f32) -> Self {
        Self {
            bbox: Rect::from_tlbr(x1, y1, x2, y2),
            class_id,
            confidence,
        }
    }

    pub fn from_rect(bbox: Rect, class_id: u32, confidence: f32) -> Self {
        Self {
            bbox,
            class_id,
            confidence,
        }
    }

    /// Geometric and confidence sanity checks. Class membership is checked by
    /// the track manager, which owns the whitelist.
    pub fn check(&self) -> Result<(), DetectionError> {
        if !self.bbox.to_tlwh().iter().all(|v| v.is_finite()) {
            return Err(DetectionError::NonFinite);
        }
        if !self.bbox.is_valid() {
            return Err(DetectionError::Degenerate {
                width: self.bbox.width,
                height: self.bbox.height,
            });
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(DetectionError::Confidence(self.confidence));
        }
        Ok(())
    }
}

/// Thresholds used by [`associate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssociationParams {
    pub high_thresh: f32,
    pub low_thresh: f32,
    pub min_iou_high: f32,
    pub min_iou_low: f32,
    /// Forbid pairs whose class ids differ.
    pub class_aware: bool,
}

/// Which association pass produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPass {
    /// High-confidence detections against all live tracks
    High,
    /// Low-confidence detections against tracks left over from the first pass
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub track_id: u64,
    pub detection_idx: usize,
    pub pass: MatchPass,
}

/// Result of associating one frame's detections with the live tracks.
///
/// Detection indices refer to the slice passed to [`associate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Association {
    pub matches: Vec<Match>,
    /// Track ids matched in neither pass
    pub unmatched_tracks: Vec<u64>,
    /// High-confidence detections matched to no track: new-track candidates
    pub unmatched_detections: Vec<usize>,
}

/// Compute IoU distance matrix between tracks and detections.
pub fn iou_distance(track_boxes: &[Rect], det_boxes: &[Rect]) -> Array2<f32> {
    iou_batch(track_boxes, det_boxes).mapv(|iou| 1.0 - iou)
}

#[derive(Debug, Clone)]
pub struct AssignmentResult {
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

/// Minimum-cost assignment over `cost_matrix` (rows: tracks, columns: detections).
///
/// Cells with cost above `thresh` are excluded before solving, so a forbidden
/// pair can never displace a permitted one. Rows are expected in ascending
/// track-id order; ties resolve toward the lower row.
pub fn linear_assignment(cost_matrix: &Array2<f32>, thresh: f32) -> AssignmentResult {
    let (num_rows, num_cols) = cost_matrix.dim();

    if num_rows == 0 || num_cols == 0 {
        return AssignmentResult {
            matches: vec![],
            unmatched_tracks: (0..num_rows).collect(),
            unmatched_detections: (0..num_cols).collect(),
        };
    }

    let feasible = |i: usize, j: usize| {
        let c = cost_matrix[[i, j]];
        c.is_finite() && c <= thresh
    };

    let size = num_rows.max(num_cols);
    let padded = Array2::<f64>::from_shape_fn((size, size), |(i, j)| {
        if i < num_rows && j < num_cols && feasible(i, j) {
            cost_matrix[[i, j]] as f64 + TIE_BREAK_STEP * i as f64
        } else {
            INFEASIBLE
        }
    });

    let mut matches = vec![];
    let mut unmatched_tracks = vec![];
    let mut unmatched_detections_mask: Vec<bool> = vec![true; num_cols];

    match lapjv::lapjv(&padded) {
        Ok((row_to_col, _)) => {
            for (row_idx, &col_idx) in row_to_col.iter().enumerate().take(num_rows) {
                if col_idx < num_cols && feasible(row_idx, col_idx) {
                    matches.push((row_idx, col_idx));
                    unmatched_detections_mask[col_idx] = false;
                } else {
                    unmatched_tracks.push(row_idx);
                }
            }
        }
        Err(err) => {
            warn!(?err, rows = num_rows, cols = num_cols, "assignment solver failed");
            unmatched_tracks = (0..num_rows).collect();
        }
    }

    let unmatched_detections: Vec<usize> = unmatched_detections_mask
        .iter()
        .enumerate()
        .filter_map(|(i, &u)| if u { Some(i) } else { None })
        .collect();

    AssignmentResult {
        matches,
        unmatched_tracks,
        unmatched_detections,
    }
}

/// Forbid every pair whose class ids differ.
pub fn gate_classes(cost_matrix: &mut Array2<f32>, track_classes: &[u32], det_classes: &[u32]) {
    for ((i, j), cost) in cost_matrix.indexed_iter_mut() {
        if track_classes[i] != det_classes[j] {
            *cost = f32::INFINITY;
        }
    }
}

/// Match one pass: `tracks` against the detections at `det_indices`.
///
/// Returns matched `(track position, detection index)` pairs plus the
/// unmatched track positions and detection indices.
fn match_pass(
    tracks: &[&Track],
    detections: &[Detection],
    det_indices: &[usize],
    min_iou: f32,
    class_aware: bool,
) -> AssignmentResult {
    let track_rects: Vec<Rect> = tracks.iter().map(|t| t.predicted_rect()).collect();
    let det_rects: Vec<Rect> = det_indices.iter().map(|&j| detections[j].bbox).collect();
    let mut dists = iou_distance(&track_rects, &det_rects);

    if class_aware {
        let track_classes: Vec<u32> = tracks.iter().map(|t| t.class_id).collect();
        let det_classes: Vec<u32> = det_indices.iter().map(|&j| detections[j].class_id).collect();
        gate_classes(&mut dists, &track_classes, &det_classes);
    }

    let result = linear_assignment(&dists, 1.0 - min_iou);
    AssignmentResult {
        matches: result
            .matches
            .into_iter()
            .map(|(i, j)| (i, det_indices[j]))
            .collect(),
        unmatched_tracks: result.unmatched_tracks,
        unmatched_detections: result
            .unmatched_detections
            .into_iter()
            .map(|j| det_indices[j])
            .collect(),
    }
}

/// Associate the current frame's detections with live (already predicted) tracks.
///
/// Detections below `low_thresh` take no part and appear in no output list.
pub fn associate(
    tracks: &[Track],
    detections: &[Detection],
    params: &AssociationParams,
) -> Association {
    let mut high = Vec::new();
    let mut low = Vec::new();
    for (idx, det) in detections.iter().enumerate() {
        if det.confidence >= params.high_thresh {
            high.push(idx);
        } else if det.confidence >= params.low_thresh {
            low.push(idx);
        }
    }

    let mut pool: Vec<&Track> = tracks.iter().collect();
    pool.sort_by_key(|t| t.track_id);

    // First association, with high confidence detections
    let first = match_pass(&pool, detections, &high, params.min_iou_high, params.class_aware);
    let mut matches: Vec<Match> = first
        .matches
        .iter()
        .map(|&(i, j)| Match {
            track_id: pool[i].track_id,
            detection_idx: j,
            pass: MatchPass::High,
        })
        .collect();

    // Second association, leftover tracks with low confidence detections
    let leftover: Vec<&Track> = first.unmatched_tracks.iter().map(|&i| pool[i]).collect();
    let second = match_pass(&leftover, detections, &low, params.min_iou_low, params.class_aware);
    matches.extend(second.matches.iter().map(|&(i, j)| Match {
        track_id: leftover[i].track_id,
        detection_idx: j,
        pass: MatchPass::Low,
    }));

    let unmatched_tracks: Vec<u64> = second
        .unmatched_tracks
        .iter()
        .map(|&i| leftover[i].track_id)
        .collect();

    debug!(
        tracks = pool.len(),
        high = high.len(),
        low = low.len(),
        matched_high = first.matches.len(),
        matched_low = second.matches.len(),
        "associated frame"
    );

    Association {
        matches,
        unmatched_tracks,
        unmatched_detections: first.unmatched_detections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::kalman_filter::KalmanFilter;
    use crate::tracker::track::IdAllocator;
    use ndarray::array;

    fn params() -> AssociationParams {
        AssociationParams {
            high_thresh: 0.5,
            low_thresh: 0.1,
            min_iou_high: 0.3,
            min_iou_low: 0.1,
            class_aware: false,
        }
    }

    fn track_at(ids: &IdAllocator, x: f32, y: f32) -> Track {
        let det = Detection::new(x, y, x + 50.0, y + 50.0, 2, 0.9);
        Track::new(ids.next_id(), &det, "car".into(), &KalmanFilter::new(), 3)
    }

    #[test]
    fn test_linear_assignment_gates_before_solving() {
        // Unconstrained, the diagonal is cheapest but (1, 1) fails the gate;
        // gating first yields two valid matches instead of one.
        let cost = array![[0.1_f32, 0.4], [0.45, 0.6]];
        let result = linear_assignment(&cost, 0.5);
        assert_eq!(result.matches, vec![(0, 1), (1, 0)]);
        assert!(result.unmatched_tracks.is_empty());
    }

    #[test]
    fn test_linear_assignment_excludes_over_threshold() {
        let cost = array![[0.9_f32], [0.95]];
        let result = linear_assignment(&cost, 0.5);
        assert!(result.matches.is_empty());
        assert_eq!(result.unmatched_tracks, vec![0, 1]);
        assert_eq!(result.unmatched_detections, vec![0]);
    }

    #[test]
    fn test_linear_assignment_tie_prefers_lower_row() {
        let cost = array![[0.4_f32], [0.4]];
        let result = linear_assignment(&cost, 0.8);
        assert_eq!(result.matches, vec![(0, 0)]);
        assert_eq!(result.unmatched_tracks, vec![1]);
    }

    #[test]
    fn test_linear_assignment_empty() {
        let cost = Array2::<f32>::zeros((0, 3));
        let result = linear_assignment(&cost, 0.5);
        assert_eq!(result.unmatched_detections, vec![0, 1, 2]);

        let cost = Array2::<f32>::zeros((2, 0));
        let result = linear_assignment(&cost, 0.5);
        assert_eq!(result.unmatched_tracks, vec![0, 1]);
    }

    #[test]
    fn test_two_pass_recovers_with_low_confidence() {
        let ids = IdAllocator::new();
        let tracks = vec![track_at(&ids, 0.0, 0.0), track_at(&ids, 200.0, 200.0)];
        let detections = vec![
            Detection::new(2.0, 2.0, 52.0, 52.0, 2, 0.9),
            Detection::new(203.0, 203.0, 253.0, 253.0, 2, 0.3),
            Detection::new(500.0, 500.0, 550.0, 550.0, 2, 0.8),
            Detection::new(700.0, 700.0, 750.0, 750.0, 2, 0.3),
            Detection::new(900.0, 900.0, 950.0, 950.0, 2, 0.05),
        ];

        let result = associate(&tracks, &detections, &params());
        assert_eq!(
            result.matches,
            vec![
                Match { track_id: 1, detection_idx: 0, pass: MatchPass::High },
                Match { track_id: 2, detection_idx: 1, pass: MatchPass::Low },
            ]
        );
        assert!(result.unmatched_tracks.is_empty());
        // Only the unmatched high-confidence box is a new-track candidate.
        assert_eq!(result.unmatched_detections, vec![2]);
    }

    #[test]
    fn test_equal_cost_prefers_lower_track_id() {
        let ids = IdAllocator::new();
        // Two tracks on the same spot; listed out of id order on purpose.
        let a = track_at(&ids, 0.0, 0.0);
        let b = track_at(&ids, 0.0, 0.0);
        let tracks = vec![b, a];
        let detections = vec![Detection::new(0.0, 0.0, 50.0, 50.0, 2, 0.9)];

        let result = associate(&tracks, &detections, &params());
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].track_id, 1);
        assert_eq!(result.unmatched_tracks, vec![2]);
    }

    #[test]
    fn test_class_aware_gating() {
        let ids = IdAllocator::new();
        let tracks = vec![track_at(&ids, 0.0, 0.0)];
        let detections = vec![Detection::new(0.0, 0.0, 50.0, 50.0, 7, 0.9)];

        let agnostic = associate(&tracks, &detections, &params());
        assert_eq!(agnostic.matches.len(), 1);

        let aware = associate(
            &tracks,
            &detections,
            &AssociationParams { class_aware: true, ..params() },
        );
        assert!(aware.matches.is_empty());
        assert_eq!(aware.unmatched_tracks, vec![1]);
        assert_eq!(aware.unmatched_detections, vec![0]);
    }

    #[test]
    fn test_empty_inputs() {
        let result = associate(&[], &[], &params());
        assert_eq!(result, Association::default());
    }

    #[test]
    fn test_detection_check() {
        assert!(Detection::new(0.0, 0.0, 10.0, 10.0, 2, 0.5).check().is_ok());
        assert_eq!(
            Detection::new(0.0, 0.0, 0.0, 10.0, 2, 0.5).check(),
            Err(DetectionError::Degenerate { width: 0.0, height: 10.0 })
        );
        assert_eq!(
            Detection::new(0.0, f32::NAN, 10.0, 10.0, 2, 0.5).check(),
            Err(DetectionError::NonFinite)
        );
        assert_eq!(
            Detection::new(0.0, 0.0, 10.0, 10.0, 2, 1.5).check(),
            Err(DetectionError::Confidence(1.5))
        );
    }
}
