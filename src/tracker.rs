//! Multi-object tracking and track-lifecycle reaping.

mod byte_tracker;
mod continuity;
mod kalman_filter;
mod matching;
mod strack;

use std::collections::BTreeMap;

use crate::pipeline::DetectionTarget;

pub use byte_tracker::{ByteTracker, TrackerConfig};
pub use continuity::{TrackContinuity, TrackEntry};
pub use strack::{STrack, TrackState};

/// A multi-object tracker that links detections across frames.
pub trait ObjectTracker {
    /// Associate this frame's detections and return track id -> detection.
    fn track(&mut self, targets: Vec<DetectionTarget>) -> BTreeMap<u64, DetectionTarget>;

    /// How many frames an unseen track is kept alive by the tracker itself.
    fn buffer_depth(&self) -> u32;
}
