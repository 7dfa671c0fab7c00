//! BYTE association: high-confidence detections first, then low-confidence
//! ones against the leftover tracks.

use std::collections::{BTreeMap, HashSet};

use crate::geometry::Rect;
use crate::pipeline::DetectionTarget;

use super::ObjectTracker;
use super::kalman_filter::KalmanFilter;
use super::matching::{self, AssignmentResult, iou_batch};
use super::strack::{STrack, TrackState};

/// Detections below this score are discarded outright.
const MIN_SCORE: f32 = 0.1;

/// Configuration for the [`ByteTracker`].
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub track_thresh: f32,
    pub match_thresh: f32,
    pub track_buffer: u32,
    pub frame_rate: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            track_thresh: 0.5,
            match_thresh: 0.8,
            track_buffer: 30,
            frame_rate: 30.0,
        }
    }
}

impl TrackerConfig {
    /// Defaults with the frame rate implied by a frame interval in ms.
    pub fn from_frame_interval(frame_interval_ms: f64) -> Self {
        let frame_rate = if frame_interval_ms > 0.0 {
            (1000.0 / frame_interval_ms) as f32
        } else {
            30.0
        };
        Self {
            frame_rate,
            ..Self::default()
        }
    }

    /// Frames a lost track survives before removal.
    pub fn max_time_lost(&self) -> u32 {
        (self.frame_rate / 30.0 * self.track_buffer as f32) as u32
    }
}

pub struct ByteTracker {
    tracked_stracks: Vec<STrack>,
    lost_stracks: Vec<STrack>,
    frame_id: u32,
    next_id: u64,
    config: TrackerConfig,
    max_time_lost: u32,
    kalman_filter: KalmanFilter,
}

impl ByteTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            tracked_stracks: Vec::new(),
            lost_stracks: Vec::new(),
            frame_id: 0,
            next_id: 0,
            max_time_lost: config.max_time_lost(),
            config,
            kalman_filter: KalmanFilter::default(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Advance one frame and return the confirmed tracks.
    pub fn update(&mut self, detections: Vec<DetectionTarget>) -> Vec<STrack> {
        self.frame_id += 1;
        let frame_id = self.frame_id;
        let kf = self.kalman_filter.clone();

        let mut activated = Vec::new();
        let mut refound = Vec::new();
        let mut lost = Vec::new();

        let (high, low): (Vec<STrack>, Vec<STrack>) = detections
            .into_iter()
            .map(STrack::new)
            .filter(|t| t.score > MIN_SCORE)
            .partition(|t| t.score >= self.config.track_thresh);

        let (confirmed, mut unconfirmed): (Vec<STrack>, Vec<STrack>) = self
            .tracked_stracks
            .drain(..)
            .partition(|t| t.is_activated);

        let mut pool = joint_stracks(confirmed, &self.lost_stracks);
        pool.iter_mut().for_each(|t| t.predict(&kf));

        // First association with high score detections
        let mut dists = matching::iou_distance(&rects(&pool), &rects(&high));
        matching::fuse_score(&mut dists, &scores(&high));
        let first = matching::linear_assignment(&dists, self.config.match_thresh);

        for &(itrack, idet) in &first.matches {
            let mut track = pool[itrack].clone();
            if track.state == TrackState::Tracked {
                track.update(&high[idet], &kf, frame_id);
                activated.push(track);
            } else {
                track.re_activate(&high[idet], &kf, frame_id);
                refound.push(track);
            }
        }

        // Second association, remaining tracked against low score detections
        let remaining: Vec<STrack> = first
            .unmatched_tracks
            .iter()
            .map(|&i| &pool[i])
            .filter(|t| t.state == TrackState::Tracked)
            .cloned()
            .collect();
        let dists = matching::iou_distance(&rects(&remaining), &rects(&low));
        let AssignmentResult {
            matches,
            unmatched_tracks,
            ..
        } = matching::linear_assignment(&dists, 0.5);

        for (itrack, idet) in matches {
            let mut track = remaining[itrack].clone();
            track.update(&low[idet], &kf, frame_id);
            activated.push(track);
        }
        for itrack in unmatched_tracks {
            let mut track = remaining[itrack].clone();
            track.mark_lost();
            lost.push(track);
        }

        // Unconfirmed tracks, usually ones with a single starting frame
        let leftover: Vec<STrack> = first
            .unmatched_detections
            .iter()
            .map(|&i| high[i].clone())
            .collect();
        let mut dists = matching::iou_distance(&rects(&unconfirmed), &rects(&leftover));
        matching::fuse_score(&mut dists, &scores(&leftover));
        let third = matching::linear_assignment(&dists, 0.7);

        for &(itrack, idet) in &third.matches {
            unconfirmed[itrack].update(&leftover[idet], &kf, frame_id);
            activated.push(unconfirmed[itrack].clone());
        }

        // New tracks
        for idet in third.unmatched_detections {
            let mut track = leftover[idet].clone();
            if track.score < self.config.track_thresh + 0.1 {
                continue;
            }
            let id = self.allocate_id();
            track.activate(&kf, id, frame_id);
            activated.push(track);
        }

        // Age out lost tracks
        for track in self.lost_stracks.drain(..) {
            if frame_id - track.end_frame() <= self.max_time_lost {
                lost.push(track);
            }
        }

        self.tracked_stracks = activated
            .into_iter()
            .chain(refound)
            .filter(|t| t.state == TrackState::Tracked)
            .collect();
        let lost = sub_stracks(lost, &self.tracked_stracks);
        let (tracked, lost) = remove_duplicate_stracks(&self.tracked_stracks, &lost);
        self.tracked_stracks = tracked;
        self.lost_stracks = lost;

        self.tracked_stracks
            .iter()
            .filter(|t| t.is_activated)
            .cloned()
            .collect()
    }
}

impl ObjectTracker for ByteTracker {
    fn track(&mut self, targets: Vec<DetectionTarget>) -> BTreeMap<u64, DetectionTarget> {
        self.update(targets)
            .into_iter()
            .map(|t| (t.track_id, t.target))
            .collect()
    }

    fn buffer_depth(&self) -> u32 {
        self.max_time_lost
    }
}

fn rects(tracks: &[STrack]) -> Vec<Rect> {
    tracks.iter().map(STrack::rect).collect()
}

fn scores(tracks: &[STrack]) -> Vec<f32> {
    tracks.iter().map(|t| t.score).collect()
}

fn joint_stracks(tlista: Vec<STrack>, tlistb: &[STrack]) -> Vec<STrack> {
    let mut seen: HashSet<u64> = tlista.iter().map(|t| t.track_id).collect();
    let mut res = tlista;
    for t in tlistb {
        if seen.insert(t.track_id) {
            res.push(t.clone());
        }
    }
    res
}

fn sub_stracks(tlista: Vec<STrack>, tlistb: &[STrack]) -> Vec<STrack> {
    let b_ids: HashSet<u64> = tlistb.iter().map(|t| t.track_id).collect();
    tlista
        .into_iter()
        .filter(|t| !b_ids.contains(&t.track_id))
        .collect()
}

/// Drop the younger of any tracked/lost pair overlapping by IoU > 0.85.
fn remove_duplicate_stracks(
    stracksa: &[STrack],
    stracksb: &[STrack],
) -> (Vec<STrack>, Vec<STrack>) {
    if stracksa.is_empty() || stracksb.is_empty() {
        return (stracksa.to_vec(), stracksb.to_vec());
    }

    let ious = iou_batch(&rects(stracksa), &rects(stracksb));
    let mut dupa = vec![false; stracksa.len()];
    let mut dupb = vec![false; stracksb.len()];

    for ((i, j), &iou) in ious.indexed_iter() {
        if iou > 0.85 {
            let age_a = stracksa[i].frame_id - stracksa[i].start_frame;
            let age_b = stracksb[j].frame_id - stracksb[j].start_frame;
            if age_a > age_b {
                dupb[j] = true;
            } else {
                dupa[i] = true;
            }
        }
    }

    let keep = |tracks: &[STrack], dup: &[bool]| -> Vec<STrack> {
        tracks
            .iter()
            .zip(dup)
            .filter(|(_, d)| !**d)
            .map(|(t, _)| t.clone())
            .collect()
    };
    (keep(stracksa, &dupa), keep(stracksb, &dupb))
}
