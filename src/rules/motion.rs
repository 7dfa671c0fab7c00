use std::collections::BTreeSet;

use serde::Deserialize;

use crate::error::Result;
use crate::geometry::{AnchorStrategy, Rect};
use crate::pipeline::{
    AlertResult, Color, Decision, DetectionTarget, FilteredTargets, ModelOutput, Rule, RuleScope,
};
use crate::tracker::{ByteTracker, TrackContinuity};
use crate::window::{Observation, RatioWindow};

use super::track_continuity;

fn default_check_interval() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct MotionParams {
    /// IoU bound between the current box and the box `check_interval`
    /// seconds earlier.
    iou: f32,
    /// Ratio window length in frames.
    length: usize,
    /// Hits within the window needed to alert.
    threshold: f64,
    #[serde(default)]
    strategy: AnchorStrategy,
    #[serde(default = "default_check_interval")]
    check_interval: f64,
}

/// Per-track motion memory.
#[derive(Debug)]
struct MotionState {
    window: RatioWindow,
    hit: bool,
    reference: Option<(Rect, f64)>,
}

impl MotionState {
    fn new(params: &MotionParams) -> Self {
        Self {
            window: RatioWindow::with_min_hits(params.length, params.threshold),
            hit: false,
            reference: None,
        }
    }

    /// The remembered position, once it is older than `interval`.
    fn due_reference(&self, now: f64, interval: f64) -> Option<Rect> {
        self.reference
            .filter(|(_, taken)| now - taken > interval)
            .map(|(rect, _)| rect)
    }

    fn refresh(&mut self, rect: Rect, now: f64, interval: f64) {
        let stale = self
            .reference
            .is_none_or(|(_, taken)| now - taken > interval);
        if stale {
            self.reference = Some((rect, now));
        }
    }
}

/// Tracking plus per-track windowed judgement shared by the motion rules.
#[derive(Default)]
struct MotionTracker {
    params: Option<MotionParams>,
    continuity: Option<TrackContinuity<ByteTracker, MotionState>>,
}

impl MotionTracker {
    fn params(&mut self, scope: &RuleScope<'_>) -> Result<MotionParams> {
        if let Some(params) = self.params {
            return Ok(params);
        }
        let params: MotionParams = scope.params()?;
        tracing::info!(
            source_id = %scope.source_id(),
            alg_name = %scope.alg_name(),
            length = params.length,
            threshold = params.threshold,
            "motion window configured"
        );
        Ok(*self.params.insert(params))
    }

    /// Track this frame and feed every track's window.
    ///
    /// `judge` gets the track's earlier position and its current target once
    /// the check interval has elapsed; `Some(hit)` replaces the track's hit
    /// flag, `None` keeps the previous one. Returns each tracked target with
    /// the window's verdict.
    fn step<J>(
        &mut self,
        scope: &RuleScope<'_>,
        targets: Vec<DetectionTarget>,
        judge: J,
    ) -> Result<Vec<(u64, DetectionTarget, bool)>>
    where
        J: Fn(&Rect, &DetectionTarget) -> Option<bool>,
    {
        let params = self.params(scope)?;
        let continuity = self
            .continuity
            .get_or_insert_with(|| track_continuity(scope));

        let now = scope.time();
        let tracked = continuity.update(targets, |_, _| MotionState::new(&params));
        let mut verdicts = Vec::with_capacity(tracked.len());
        for (id, target) in tracked {
            let Some(state) = continuity.state_mut(id) else {
                continue;
            };
            if let Some(reference) = state.due_reference(now, params.check_interval) {
                if let Some(hit) = judge(&reference, &target) {
                    state.hit = hit;
                }
            }
            state.refresh(target.rect, now, params.check_interval);
            let alert = state.window.insert(Observation::new(now, state.hit));
            verdicts.push((id, target, alert));
        }
        Ok(verdicts)
    }
}

/// Alerts on tracks that keep moving around instead of passing through:
/// low IoU against their own position a check interval earlier, sustained
/// over the window.
#[derive(Default)]
pub struct PersonLoitering {
    motion: MotionTracker,
}

impl Rule for PersonLoitering {
    fn decide(&mut self, scope: &mut RuleScope<'_>, targets: FilteredTargets) -> Result<Decision> {
        let alert_label = scope.primary_alert_label()?.to_owned();
        let iou = self.motion.params(scope)?.iou;
        let targets = targets.into_first().map(|(_, t)| t).unwrap_or_default();

        let verdicts = self
            .motion
            .step(scope, targets, |earlier, current| {
                Some(earlier.iou(&current.rect) < iou)
            })?;

        let hit = verdicts.iter().any(|(_, _, alert)| *alert);
        let rectangles = verdicts.into_iter().map(|(id, target, alert)| {
            let target = target.with_ext("track_id", id);
            if alert {
                target.alerted(Some(&alert_label))
            } else {
                target.with_color(Color::NORMAL)
            }
        });

        Ok(Decision::Complete(
            AlertResult::new(hit)
                .with_rectangles(rectangles)
                .with_polygons(scope.annotated_polygons()),
        ))
    }
}

/// Alerts on tracks standing still inside a region: high IoU against their
/// own position a check interval earlier while inside, sustained over the
/// window.
#[derive(Default)]
pub struct CarMisplaced {
    motion: MotionTracker,
}

impl Rule for CarMisplaced {
    fn filter(
        &mut self,
        scope: &mut RuleScope<'_>,
        _model: &str,
        output: &ModelOutput,
    ) -> Result<Vec<DetectionTarget>> {
        let strategy = self.motion.params(scope)?.strategy;
        Ok(scope.standard_filter(output, strategy))
    }

    fn decide(&mut self, scope: &mut RuleScope<'_>, targets: FilteredTargets) -> Result<Decision> {
        let params = self.motion.params(scope)?;
        let targets = targets.into_first().map(|(_, t)| t).unwrap_or_default();
        let regions = scope.regions().clone();

        let verdicts = self.motion.step(scope, targets, |earlier, current| {
            regions
                .polygons
                .iter()
                .any(|r| r.contains(&current.rect, params.strategy))
                .then(|| earlier.iou(&current.rect) > params.iou)
        })?;

        let mut alerted_regions = BTreeSet::new();
        let mut hit = false;
        let mut rectangles = Vec::with_capacity(verdicts.len());
        for (id, target, alert) in verdicts {
            let target = target.with_ext("track_id", id);
            if alert {
                hit = true;
                alerted_regions.extend(
                    regions
                        .polygons
                        .iter()
                        .filter(|r| r.contains(&target.rect, params.strategy))
                        .map(|r| r.id.clone()),
                );
                rectangles.push(target.alerted(None));
            } else {
                rectangles.push(target.with_color(Color::NORMAL));
            }
        }

        let polygons = scope
            .annotated_polygons()
            .into_iter()
            .map(|(id, polygon)| {
                if alerted_regions.contains(&id) {
                    (id, polygon.with_color(Color::ALERT))
                } else {
                    (id, polygon)
                }
            })
            .collect();

        Ok(Decision::Complete(
            AlertResult::new(hit)
                .with_rectangles(rectangles)
                .with_polygons(polygons),
        ))
    }
}
