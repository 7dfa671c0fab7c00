use std::collections::{BTreeMap, VecDeque};

use serde::Deserialize;
use serde_json::json;

use crate::error::Result;
use crate::geometry::{AnchorStrategy, Rect};
use crate::pipeline::{
    AlertResult, AnnotatedPolygon, Decision, DetectionTarget, FilteredTargets, ImagePayload,
    ModelOutput, Rule, RuleScope,
};
use crate::reinfer::ReinferRequest;
use crate::tracker::{ByteTracker, TrackContinuity};
use crate::window::{Observation, RatioWindow};

use super::deferred::{Deferred, context_field};
use super::{clip_to_image, track_continuity};

/// Most positions a track remembers for the stillness check.
const MAX_HISTORY: usize = 5;

/// Seconds between remembered positions.
const CHECK_INTERVAL: f64 = 1.0;

#[derive(Debug, Clone, Copy, Deserialize)]
struct SleepParams {
    /// IoU every remembered position must exceed against the current box.
    iou: f32,
    /// Ratio window length in frames.
    length: usize,
    /// Hits within the window needed to ask the classifier.
    threshold: f64,
    #[serde(default)]
    strategy: AnchorStrategy,
}

impl SleepParams {
    fn history_depth(&self) -> usize {
        self.length.min(MAX_HISTORY)
    }
}

/// Per-track stillness memory.
#[derive(Debug)]
struct SleepState {
    window: RatioWindow,
    hit: bool,
    history: VecDeque<Rect>,
    /// When the newest remembered position was taken.
    taken: f64,
}

impl SleepState {
    fn new(params: &SleepParams, now: f64) -> Self {
        Self {
            window: RatioWindow::with_min_hits(params.length, params.threshold),
            hit: false,
            history: VecDeque::with_capacity(params.history_depth() + 1),
            taken: now,
        }
    }

    /// Judge `rect` against the remembered positions, if a full history is
    /// old enough, then remember it when due. `inside` false keeps the
    /// previous verdict.
    fn observe(&mut self, rect: Rect, inside: bool, now: f64, params: &SleepParams) {
        let depth = params.history_depth();
        let due = now - self.taken > CHECK_INTERVAL;
        if inside && due && self.history.len() == depth {
            self.hit = self.history.iter().all(|earlier| earlier.iou(&rect) > params.iou);
        }
        if self.history.len() < depth || due {
            self.taken = now;
            self.history.push_back(rect);
        }
        while self.history.len() > depth {
            self.history.pop_front();
        }
    }
}

#[derive(Debug)]
struct PendingFrame {
    image: Option<ImagePayload>,
    /// People that were not sent to the classifier.
    people: Vec<DetectionTarget>,
    polygons: BTreeMap<String, AnnotatedPolygon>,
}

/// Sleeping-person detection.
///
/// People who stay still inside a region for long enough are cropped and
/// re-inferred with a sleep classifier; those it confirms are flagged.
/// Without configured regions nothing is ever judged.
pub struct PersonSleep {
    person_model: String,
    classify_model: String,
    /// Classifier output index holding the "sleeping" score.
    class_index: usize,
    params: Option<SleepParams>,
    continuity: Option<TrackContinuity<ByteTracker, SleepState>>,
    deferred: Deferred<PendingFrame, (DetectionTarget, bool)>,
}

impl Default for PersonSleep {
    fn default() -> Self {
        Self {
            person_model: "person".into(),
            classify_model: "sleep_classify".into(),
            class_index: 0,
            params: None,
            continuity: None,
            deferred: Deferred::default(),
        }
    }
}

impl PersonSleep {
    fn params(&mut self, scope: &RuleScope<'_>) -> Result<SleepParams> {
        if let Some(params) = self.params {
            return Ok(params);
        }
        let params: SleepParams = scope.params()?;
        tracing::info!(
            source_id = %scope.source_id(),
            alg_name = %scope.alg_name(),
            length = params.length,
            threshold = params.threshold,
            "sleep window configured"
        );
        Ok(*self.params.insert(params))
    }

    /// Track this frame's people; returns those whose window fired and the
    /// rest.
    fn step(
        &mut self,
        scope: &RuleScope<'_>,
        params: &SleepParams,
        people: Vec<DetectionTarget>,
    ) -> (Vec<DetectionTarget>, Vec<DetectionTarget>) {
        let now = scope.time();
        let regions = scope.regions();
        let continuity = self
            .continuity
            .get_or_insert_with(|| track_continuity(scope));

        let tracked = continuity.update(people, |_, _| SleepState::new(params, now));
        let mut still = Vec::new();
        let mut rest = Vec::with_capacity(tracked.len());
        for (id, person) in tracked {
            let Some(state) = continuity.state_mut(id) else {
                continue;
            };
            let inside = regions
                .polygons
                .iter()
                .any(|r| r.contains(&person.rect, params.strategy));
            state.observe(person.rect, inside, now, params);
            if state.window.insert(Observation::new(now, state.hit)) {
                state.window.reset();
                still.push(person);
            } else {
                rest.push(person);
            }
        }
        (still, rest)
    }

    /// Send crops of `still`; returns how many the sink took. People it
    /// refused go back to `rest`.
    fn commission(
        &self,
        scope: &RuleScope<'_>,
        still: Vec<DetectionTarget>,
        rest: &mut Vec<DetectionTarget>,
    ) -> usize {
        let key = scope.frame().correlation_key();
        let mut sent = 0;
        for person in still {
            let request = ReinferRequest::new(scope.source_id(), key)
                .image(scope.frame().image.clone())
                .crop(clip_to_image(person.rect, scope.frame().image_size))
                .model(self.classify_model.clone())
                .context(json!({ "person": person }));
            match scope.dispatch(request) {
                Ok(()) => sent += 1,
                Err(_) => rest.push(person),
            }
        }
        sent
    }

    fn compose(alert_label: &str, pending: PendingFrame, verdicts: Vec<(DetectionTarget, bool)>) -> Decision {
        let hit = verdicts.iter().any(|(_, sleeping)| *sleeping);
        let judged = verdicts.into_iter().map(|(person, sleeping)| {
            if sleeping {
                person.alerted(Some(alert_label))
            } else {
                person
            }
        });
        Decision::Resumed {
            result: AlertResult::new(hit)
                .with_rectangles(judged)
                .with_rectangles(pending.people)
                .with_polygons(pending.polygons),
            image: pending.image,
        }
    }
}

impl Rule for PersonSleep {
    fn filter(
        &mut self,
        scope: &mut RuleScope<'_>,
        model: &str,
        output: &ModelOutput,
    ) -> Result<Vec<DetectionTarget>> {
        if model == self.classify_model {
            if scope.frame().continuation().is_none() {
                return Ok(Vec::new());
            }
            let sleeping = output
                .score(self.class_index)
                .filter(|score| *score >= output.model_conf.args.conf_thres);
            return Ok(sleeping
                .map(|score| DetectionTarget::new(Rect::default()).with_confidence(score))
                .into_iter()
                .collect());
        }
        let strategy = self.params(scope)?.strategy;
        Ok(scope.standard_filter(output, strategy))
    }

    fn decide(&mut self, scope: &mut RuleScope<'_>, mut targets: FilteredTargets) -> Result<Decision> {
        let params = self.params(scope)?;
        let alert_label = scope.primary_alert_label()?.to_owned();
        self.deferred.sweep(scope);

        let Some(continuation) = scope.frame().continuation() else {
            let people = targets.require(&self.person_model)?;
            let (still, mut rest) = self.step(scope, &params, people);
            let sent = self.commission(scope, still, &mut rest);
            if sent == 0 {
                return Ok(Decision::Complete(
                    AlertResult::new(false)
                        .with_rectangles(rest)
                        .with_polygons(scope.annotated_polygons()),
                ));
            }
            let pending = PendingFrame {
                image: scope.frame().image.clone(),
                people: rest,
                polygons: scope.annotated_polygons(),
            };
            self.deferred.open(scope, sent, pending)?;
            return Ok(Decision::Deferred);
        };

        let sleeping = !targets.require(&self.classify_model)?.is_empty();
        let person: DetectionTarget = context_field(continuation, "person")?;
        match self.deferred.collect(scope, (person, sleeping))? {
            Some(group) => Ok(Self::compose(&alert_label, group.context, group.parts)),
            None => Ok(Decision::Deferred),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::pipeline::{
        Color, FrameContext, ModelArgs, ModelConfig, ModelOutput, RegionConfig, SharedContext,
    };
    use crate::reinfer::ReinferContinuation;
    use crate::rules::test_support::{det, model, pipeline};

    fn params() -> SleepParams {
        SleepParams {
            iou: 0.8,
            length: 2,
            threshold: 2.0,
            strategy: AnchorStrategy::Center,
        }
    }

    fn room() -> RegionConfig {
        serde_json::from_value(json!({
            "polygons": [{"id": "ward", "polygon": [[0, 0], [200, 0], [200, 200], [0, 200]]}]
        }))
        .unwrap()
    }

    fn frame(step: u32, regions: RegionConfig) -> FrameContext {
        FrameContext::new(step as f64 * 0.5)
            .with_frame_interval(500.0)
            .with_alert_labels(["sleeping"])
            .with_regions(regions)
            .with_params(json!({"iou": 0.8, "length": 2, "threshold": 2}))
            .with_image(ImagePayload(format!("frame-{step}")))
            .with_model("person", model(&["person"], vec![det(50., 50., 90., 150., 0)]))
    }

    fn classifier(score: f32) -> ModelOutput {
        let model_conf = ModelConfig {
            args: ModelArgs { conf_thres: 0.5 },
            ..ModelConfig::default()
        };
        ModelOutput::scores(model_conf, vec![score, 1.0 - score])
    }

    #[test]
    fn test_history_waits_for_interval() {
        let params = params();
        let mut state = SleepState::new(&params, 0.0);
        let rect = Rect::new(0., 0., 10., 10.);

        state.observe(rect, true, 0.0, &params);
        state.observe(rect, true, 0.5, &params);
        assert_eq!(state.history.len(), 2);
        assert!(!state.hit);
        // full history but the newest position is too recent
        state.observe(rect, true, 1.0, &params);
        assert!(!state.hit);
        state.observe(rect, true, 1.6, &params);
        assert!(state.hit);
        assert_eq!(state.history.len(), 2);
        assert_eq!(state.taken, 1.6);
    }

    #[test]
    fn test_outside_regions_keeps_verdict() {
        let params = params();
        let mut state = SleepState::new(&params, 0.0);
        state.observe(Rect::new(0., 0., 10., 10.), true, 0.0, &params);
        state.observe(Rect::new(0., 0., 10., 10.), true, 0.5, &params);
        state.observe(Rect::new(50., 50., 60., 60.), false, 2.0, &params);
        assert!(!state.hit);
        assert_eq!(state.history.back(), Some(&Rect::new(50., 50., 60., 60.)));
    }

    #[test]
    fn test_still_person_is_classified() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut pipeline = pipeline("person_sleep", SharedContext::builder().sink(tx).build());
        for step in 0..5 {
            let outcome = pipeline.process(frame(step, room()));
            assert!(outcome.accepted, "step {step}");
            assert!(!outcome.result.hit);
        }
        assert!(rx.try_recv().is_err());

        // two consecutive judged-still frames fill the window
        assert!(!pipeline.process(frame(5, room())).accepted);
        let request = rx.try_recv().unwrap();
        assert_eq!(request.time, 2_500_000);
        assert_eq!(request.model_selector, vec!["sleep_classify".to_string()]);
        assert_eq!(request.crop, Some(Rect::new(50., 50., 90., 150.)));

        let answer = FrameContext::new(2.5)
            .with_continuation(ReinferContinuation {
                specified_model: request.model_selector.clone(),
                context: request.correlation_context.clone(),
            })
            .with_model("sleep_classify", classifier(0.9));
        let outcome = pipeline.process(answer);
        assert!(outcome.accepted);
        assert!(outcome.result.hit);
        assert_eq!(outcome.frame, Some(ImagePayload("frame-5".into())));
        let person = &outcome.result.data.bbox.rectangles[0];
        assert_eq!(person.color, Color::ALERT);
        assert_eq!(person.label.as_deref(), Some("sleeping"));
    }

    #[test]
    fn test_classifier_rejects() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut pipeline = pipeline("person_sleep", SharedContext::builder().sink(tx).build());
        for step in 0..6 {
            pipeline.process(frame(step, room()));
        }
        let request = rx.try_recv().unwrap();
        let answer = FrameContext::new(2.5)
            .with_continuation(ReinferContinuation {
                specified_model: request.model_selector,
                context: request.correlation_context,
            })
            .with_model("sleep_classify", classifier(0.1));
        let outcome = pipeline.process(answer);
        assert!(outcome.accepted);
        assert!(!outcome.result.hit);
        assert_eq!(outcome.result.data.bbox.rectangles.len(), 1);
    }

    #[test]
    fn test_no_regions_never_classifies() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut pipeline = pipeline("person_sleep", SharedContext::builder().sink(tx).build());
        for step in 0..12 {
            let outcome = pipeline.process(frame(step, RegionConfig::default()));
            assert!(outcome.accepted);
            assert_eq!(outcome.result.data.bbox.rectangles.len(), 1);
        }
        assert!(rx.try_recv().is_err());
    }
}
