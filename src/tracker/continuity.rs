use std::collections::{BTreeMap, HashMap};

use crate::pipeline::DetectionTarget;

use super::ObjectTracker;

/// Per-track bookkeeping kept alongside the caller's state.
#[derive(Debug, Clone)]
pub struct TrackEntry<S> {
    /// Consecutive frames the track has been absent.
    pub misses: u32,
    pub last_seen: DetectionTarget,
    pub state: S,
}

/// Wraps an [`ObjectTracker`] and reaps state for tracks that stay gone.
///
/// After each frame, ids absent from the tracker output accumulate misses
/// and ids present reset to zero. Once an id has missed more than
/// `max_retain` consecutive frames its entry, including the caller's
/// per-track state `S`, is dropped.
pub struct TrackContinuity<T, S> {
    tracker: T,
    entries: HashMap<u64, TrackEntry<S>>,
    max_retain: u32,
}

impl<T: ObjectTracker, S> TrackContinuity<T, S> {
    /// Retain state for one frame longer than the tracker's own buffer.
    pub fn new(tracker: T) -> Self {
        let max_retain = tracker.buffer_depth() + 1;
        Self::with_max_retain(tracker, max_retain)
    }

    pub fn with_max_retain(tracker: T, max_retain: u32) -> Self {
        Self {
            tracker,
            entries: HashMap::new(),
            max_retain,
        }
    }

    pub fn max_retain(&self) -> u32 {
        self.max_retain
    }

    /// Track one frame's targets.
    ///
    /// New ids get state from `init`. Returns the tracker's output for
    /// this frame; look per-track state up with [`Self::state_mut`].
    pub fn update<F>(
        &mut self,
        targets: Vec<DetectionTarget>,
        mut init: F,
    ) -> BTreeMap<u64, DetectionTarget>
    where
        F: FnMut(u64, &DetectionTarget) -> S,
    {
        let tracked = self.tracker.track(targets);
        self.reap(&tracked);

        for (&id, target) in &tracked {
            self.entries
                .entry(id)
                .and_modify(|e| e.last_seen = target.clone())
                .or_insert_with(|| TrackEntry {
                    misses: 0,
                    last_seen: target.clone(),
                    state: init(id, target),
                });
        }
        tracked
    }

    /// Age every known id against this frame's output and evict the stale.
    ///
    /// Runs once per [`Self::update`]; returns the evicted ids.
    fn reap(&mut self, present: &BTreeMap<u64, DetectionTarget>) -> Vec<u64> {
        let mut evicted = Vec::new();
        for (&id, entry) in self.entries.iter_mut() {
            if present.contains_key(&id) {
                entry.misses = 0;
            } else {
                entry.misses += 1;
            }
            if entry.misses > self.max_retain {
                evicted.push(id);
            }
        }
        evicted.sort_unstable();
        for id in &evicted {
            if let Some(entry) = self.entries.remove(id) {
                tracing::info!(
                    track_id = id,
                    last_seen = ?entry.last_seen.rect,
                    "target lost"
                );
            }
        }
        evicted
    }

    pub fn entry(&self, id: u64) -> Option<&TrackEntry<S>> {
        self.entries.get(&id)
    }

    pub fn state(&self, id: u64) -> Option<&S> {
        self.entries.get(&id).map(|e| &e.state)
    }

    pub fn state_mut(&mut self, id: u64) -> Option<&mut S> {
        self.entries.get_mut(&id).map(|e| &mut e.state)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use std::collections::VecDeque;

    /// Replays a fixed list of per-frame id sets.
    struct ScriptedTracker {
        frames: VecDeque<Vec<u64>>,
        depth: u32,
    }

    impl ObjectTracker for ScriptedTracker {
        fn track(&mut self, _targets: Vec<DetectionTarget>) -> BTreeMap<u64, DetectionTarget> {
            self.frames
                .pop_front()
                .unwrap_or_default()
                .into_iter()
                .map(|id| (id, DetectionTarget::new(Rect::new(0.0, 0.0, 1.0, 1.0))))
                .collect()
        }

        fn buffer_depth(&self) -> u32 {
            self.depth
        }
    }

    fn scripted(frames: Vec<Vec<u64>>) -> ScriptedTracker {
        ScriptedTracker {
            frames: frames.into(),
            depth: 2,
        }
    }

    #[test]
    fn test_max_retain_from_buffer_depth() {
        let continuity: TrackContinuity<_, ()> = TrackContinuity::new(scripted(vec![]));
        assert_eq!(continuity.max_retain(), 3);
    }

    #[test]
    fn test_absent_three_frames_is_retained() {
        let mut continuity = TrackContinuity::new(scripted(vec![
            vec![1],
            vec![],
            vec![],
            vec![],
        ]));
        for _ in 0..4 {
            continuity.update(vec![], |_, _| 0u32);
        }
        assert!(continuity.contains(1));
        assert_eq!(continuity.entry(1).unwrap().misses, 3);
    }

    #[test]
    fn test_absent_four_frames_is_evicted() {
        let mut continuity = TrackContinuity::new(scripted(vec![
            vec![1, 2],
            vec![2],
            vec![2],
            vec![2],
            vec![2],
        ]));
        for _ in 0..5 {
            continuity.update(vec![], |_, _| 0u32);
        }
        assert!(!continuity.contains(1));
        assert!(continuity.contains(2));
    }

    #[test]
    fn test_reappearance_resets_misses() {
        let mut continuity = TrackContinuity::new(scripted(vec![
            vec![1],
            vec![],
            vec![],
            vec![1],
            vec![],
            vec![],
            vec![],
        ]));
        for _ in 0..7 {
            continuity.update(vec![], |_, _| ());
        }
        assert!(continuity.contains(1));
    }

    #[test]
    fn test_state_survives_and_is_dropped_with_track() {
        let mut continuity = TrackContinuity::with_max_retain(
            scripted(vec![vec![7], vec![7], vec![], vec![]]),
            1,
        );
        continuity.update(vec![], |id, _| id * 10);
        *continuity.state_mut(7).unwrap() += 1;
        continuity.update(vec![], |_, _| 0);
        assert_eq!(continuity.state(7), Some(&71));

        continuity.update(vec![], |_, _| 0);
        assert!(continuity.contains(7));
        continuity.update(vec![], |_, _| 0);
        assert!(continuity.state(7).is_none());
    }

    #[test]
    fn test_misses_grow_by_one_per_update() {
        let mut continuity = TrackContinuity::new(scripted(vec![vec![4], vec![], vec![], vec![]]));
        continuity.update(vec![], |_, _| ());
        for expected in 1..=3 {
            continuity.update(vec![], |_, _| ());
            assert_eq!(continuity.entry(4).unwrap().misses, expected);
        }
    }
}
