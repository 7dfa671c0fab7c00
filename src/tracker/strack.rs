//! Single tracked target inside the byte tracker.

use ndarray::{Array1, Array2};

use crate::geometry::Rect;
use crate::pipeline::DetectionTarget;

use super::kalman_filter::KalmanFilter;

/// Lifecycle of a track inside the byte tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackState {
    #[default]
    New,
    Tracked,
    Lost,
    Removed,
}

fn xyah(rect: &Rect) -> [f64; 4] {
    rect.to_xyah().map(f64::from)
}

#[derive(Debug, Clone)]
pub struct STrack {
    pub track_id: u64,
    pub state: TrackState,
    /// Confirmed tracks are reported to callers; fresh ones are not yet.
    pub is_activated: bool,
    pub score: f32,
    pub frame_id: u32,
    pub start_frame: u32,
    pub tracklet_len: u32,
    mean: Option<Array1<f64>>,
    covariance: Option<Array2<f64>>,
    /// Detection most recently associated with this track.
    pub target: DetectionTarget,
}

impl STrack {
    pub fn new(target: DetectionTarget) -> Self {
        Self {
            track_id: 0,
            state: TrackState::New,
            is_activated: false,
            score: target.confidence.unwrap_or(0.0),
            frame_id: 0,
            start_frame: 0,
            tracklet_len: 0,
            mean: None,
            covariance: None,
            target,
        }
    }

    /// Current box: the Kalman estimate once initiated, else the detection.
    pub fn rect(&self) -> Rect {
        match &self.mean {
            Some(mean) => Rect::from_xyah(
                mean[0] as f32,
                mean[1] as f32,
                mean[2] as f32,
                mean[3] as f32,
            ),
            None => self.target.rect,
        }
    }

    pub fn end_frame(&self) -> u32 {
        self.frame_id
    }

    pub fn activate(&mut self, kalman_filter: &KalmanFilter, track_id: u64, frame_id: u32) {
        self.track_id = track_id;

        let (mean, covariance) = kalman_filter.initiate(xyah(&self.target.rect));
        self.mean = Some(mean);
        self.covariance = Some(covariance);
        self.tracklet_len = 0;
        self.state = TrackState::Tracked;
        self.is_activated = frame_id == 1;
        self.frame_id = frame_id;
        self.start_frame = frame_id;
    }

    fn correct(&mut self, measurement: &Rect, kalman_filter: &KalmanFilter) {
        if let (Some(mean), Some(cov)) = (&self.mean, &self.covariance) {
            if let Some((mean, cov)) = kalman_filter.update(mean, cov, xyah(measurement)) {
                self.mean = Some(mean);
                self.covariance = Some(cov);
            }
        }
    }

    /// Resume a lost track with a new detection.
    pub fn re_activate(&mut self, new_track: &STrack, kalman_filter: &KalmanFilter, frame_id: u32) {
        self.correct(&new_track.target.rect, kalman_filter);
        self.tracklet_len = 0;
        self.state = TrackState::Tracked;
        self.is_activated = true;
        self.frame_id = frame_id;
        self.score = new_track.score;
        self.target = new_track.target.clone();
    }

    pub fn update(&mut self, new_track: &STrack, kalman_filter: &KalmanFilter, frame_id: u32) {
        self.frame_id = frame_id;
        self.tracklet_len += 1;
        self.correct(&new_track.target.rect, kalman_filter);
        self.state = TrackState::Tracked;
        self.is_activated = true;
        self.score = new_track.score;
        self.target = new_track.target.clone();
    }

    pub fn predict(&mut self, kalman_filter: &KalmanFilter) {
        if let (Some(mean), Some(cov)) = (&self.mean, &self.covariance) {
            let mut mean = mean.clone();
            if self.state != TrackState::Tracked {
                // freeze height velocity while the target is unseen
                mean[7] = 0.0;
            }
            let (mean, cov) = kalman_filter.predict(&mean, cov);
            self.mean = Some(mean);
            self.covariance = Some(cov);
        }
    }

    pub fn mark_lost(&mut self) {
        self.state = TrackState::Lost;
    }

    pub fn mark_removed(&mut self) {
        self.state = TrackState::Removed;
    }
}
