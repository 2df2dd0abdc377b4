mod kalman_filter;
mod matching;
mod rect;
mod track;
mod track_manager;
mod track_state;

pub use kalman_filter::KalmanFilter;
pub use matching::{
    Association, AssociationParams, Detection, Match, MatchPass, associate, iou_distance,
    linear_assignment,
};
pub use rect::{Rect, iou_batch};
pub use track::{IdAllocator, Track};
pub use track_manager::{FrameStats, RenderTrack, TrackManager, TrackerConfig};
pub use track_state::TrackState;
