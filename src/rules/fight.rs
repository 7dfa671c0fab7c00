use std::collections::{BTreeMap, VecDeque};

use crate::error::Result;
use crate::geometry::{AnchorStrategy, Rect};
use crate::pipeline::{
    AlertResult, AnnotatedPolygon, Decision, DetectionTarget, FilteredTargets, ImagePayload,
    ModelOutput, Rule, RuleScope,
};
use crate::reinfer::ReinferRequest;

use super::deferred::Deferred;
use super::{clip_to_image, neutral_targets};

/// Frames per clip sent to the fight model.
const CLIP_LEN: usize = 8;

/// Fewest people in view for a fight to be possible.
const MIN_PEOPLE: usize = 2;

#[derive(Debug)]
struct PendingFrame {
    image: Option<ImagePayload>,
    polygons: BTreeMap<String, AnnotatedPolygon>,
}

/// Fight detection over short clips.
///
/// Every frame with at least two people in the regions joins a sliding
/// clip of the last eight such frames. Once the clip is full it is sent,
/// cut to the regions' bounding box, to a clip classifier on every
/// qualifying frame; the frame alerts when the classifier confirms.
pub struct Fight {
    person_model: String,
    fight_model: String,
    /// Classifier output index holding the "fight" score.
    class_index: usize,
    clip: VecDeque<ImagePayload>,
    deferred: Deferred<PendingFrame, bool>,
}

impl Default for Fight {
    fn default() -> Self {
        Self {
            person_model: "person".into(),
            fight_model: "fight".into(),
            class_index: 1,
            clip: VecDeque::with_capacity(CLIP_LEN + 1),
            deferred: Deferred::default(),
        }
    }
}

impl Fight {
    /// Slide this frame into the clip and send it once full.
    fn commission(&mut self, scope: &RuleScope<'_>) -> bool {
        let Some(image) = scope.frame().image.clone() else {
            return false;
        };
        self.clip.push_back(image);
        while self.clip.len() > CLIP_LEN {
            self.clip.pop_front();
        }
        if self.clip.len() < CLIP_LEN {
            return false;
        }

        let mut request = ReinferRequest::new(scope.source_id(), scope.frame().correlation_key())
            .batch(self.clip.iter().cloned())
            .model(self.fight_model.clone());
        if let Some(roi) = scope.regions().bounding_rect() {
            request = request.crop(clip_to_image(roi, scope.frame().image_size));
        }
        scope.dispatch(request).is_ok()
    }
}

impl Rule for Fight {
    fn filter(
        &mut self,
        scope: &mut RuleScope<'_>,
        model: &str,
        output: &ModelOutput,
    ) -> Result<Vec<DetectionTarget>> {
        if model == self.fight_model {
            if scope.frame().continuation().is_none() {
                return Ok(Vec::new());
            }
            let fighting = output
                .score(self.class_index)
                .filter(|score| *score >= output.model_conf.args.conf_thres);
            return Ok(fighting
                .map(|score| DetectionTarget::new(Rect::default()).with_confidence(score))
                .into_iter()
                .collect());
        }
        Ok(neutral_targets(scope, output, Some(AnchorStrategy::Center)))
    }

    fn decide(&mut self, scope: &mut RuleScope<'_>, mut targets: FilteredTargets) -> Result<Decision> {
        self.deferred.sweep(scope);

        if scope.frame().continuation().is_none() {
            let people = targets.require(&self.person_model)?;
            if people.len() < MIN_PEOPLE || !self.commission(scope) {
                return Ok(Decision::Complete(
                    AlertResult::new(false).with_polygons(scope.annotated_polygons()),
                ));
            }
            let pending = PendingFrame {
                image: scope.frame().image.clone(),
                polygons: scope.annotated_polygons(),
            };
            self.deferred.open(scope, 1, pending)?;
            return Ok(Decision::Deferred);
        }

        let fighting = !targets.require(&self.fight_model)?.is_empty();
        match self.deferred.collect(scope, fighting)? {
            Some(group) => {
                let hit = group.parts.iter().any(|fighting| *fighting);
                Ok(Decision::Resumed {
                    result: AlertResult::new(hit).with_polygons(group.context.polygons),
                    image: group.context.image,
                })
            }
            None => Ok(Decision::Deferred),
        }
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::Receiver;
    use serde_json::json;

    use super::*;
    use crate::pipeline::{
        FrameContext, ModelArgs, ModelConfig, PostprocessingPipeline, RawDetection, RegionConfig,
        SharedContext,
    };
    use crate::reinfer::ReinferContinuation;
    use crate::rules::test_support::{det, model, pipeline};

    fn crowd() -> Vec<RawDetection> {
        vec![det(10., 10., 30., 60., 0), det(40., 10., 60., 60., 0)]
    }

    fn frame(step: u32, people: Vec<RawDetection>) -> FrameContext {
        let regions: RegionConfig = serde_json::from_value(json!({
            "polygons": [
                {"id": "a", "polygon": [[0, 0], [80, 0], [80, 80], [0, 80]]},
                {"id": "b", "polygon": [[60, 20], [120, 20], [120, 100]]}
            ]
        }))
        .unwrap();
        FrameContext::new(step as f64 * 0.2)
            .with_frame_interval(200.0)
            .with_regions(regions)
            .with_image_size(100, 90)
            .with_image(ImagePayload(format!("frame-{step}")))
            .with_model("person", model(&["person"], people))
    }

    fn answer(request: &ReinferRequest, score: f32) -> FrameContext {
        let model_conf = ModelConfig {
            args: ModelArgs { conf_thres: 0.5 },
            ..ModelConfig::default()
        };
        FrameContext::new(request.time as f64 / 1e6)
            .with_continuation(ReinferContinuation {
                specified_model: request.model_selector.clone(),
                context: request.correlation_context.clone(),
            })
            .with_model("fight", ModelOutput::scores(model_conf, vec![1.0 - score, score]))
    }

    fn setup() -> (PostprocessingPipeline, Receiver<ReinferRequest>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (pipeline("fight", SharedContext::builder().sink(tx).build()), rx)
    }

    #[test]
    fn test_clip_is_sent_once_full() {
        let (mut pipeline, rx) = setup();
        for step in 0..7 {
            let outcome = pipeline.process(frame(step, crowd()));
            assert!(outcome.accepted);
            assert!(!outcome.result.hit);
        }
        assert!(rx.try_recv().is_err());

        assert!(!pipeline.process(frame(7, crowd())).accepted);
        let request = rx.try_recv().unwrap();
        assert_eq!(request.model_selector, vec!["fight".to_string()]);
        assert_eq!(request.batch.len(), CLIP_LEN);
        assert_eq!(request.batch[0], ImagePayload("frame-0".into()));
        assert_eq!(request.crop, Some(Rect::new(0., 0., 100., 90.)));
        assert_eq!(request.image, None);

        let outcome = pipeline.process(answer(&request, 0.9));
        assert!(outcome.accepted);
        assert!(outcome.result.hit);
        assert_eq!(outcome.frame, Some(ImagePayload("frame-7".into())));
        assert!(outcome.result.data.bbox.rectangles.is_empty());
        assert_eq!(outcome.result.data.bbox.polygons.len(), 2);

        // the clip slides by one frame
        assert!(!pipeline.process(frame(8, crowd())).accepted);
        let next = rx.try_recv().unwrap();
        assert_eq!(next.batch[0], ImagePayload("frame-1".into()));
        assert_eq!(next.batch[CLIP_LEN - 1], ImagePayload("frame-8".into()));
        assert!(!pipeline.process(answer(&next, 0.2)).result.hit);
    }

    #[test]
    fn test_lone_person_skips_clip() {
        let (mut pipeline, rx) = setup();
        for step in 0..12 {
            let people = if step % 2 == 0 { crowd() } else { vec![det(10., 10., 30., 60., 0)] };
            assert!(pipeline.process(frame(step, people)).accepted);
        }
        // only six frames had company
        assert!(rx.try_recv().is_err());
    }
}
