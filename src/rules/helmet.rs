use std::collections::BTreeMap;

use serde_json::json;

use crate::error::Result;
use crate::geometry::{AnchorStrategy, Rect};
use crate::pipeline::{
    AlertResult, AnnotatedPolygon, Decision, DetectionTarget, FilteredTargets, ImagePayload,
    ModelOutput, Rule, RuleScope,
};
use crate::reinfer::ReinferRequest;

use super::deferred::{Deferred, context_field};
use super::{clip_to_image, neutral_targets};

/// Pixels added on every side of a helmet box before cropping it.
const CROP_MARGIN: f32 = 5.0;

/// Share of the helmet box that must lie inside the person box.
const MIN_CONTAINMENT: f32 = 0.8;

#[derive(Debug)]
struct PendingFrame {
    image: Option<ImagePayload>,
    people: Vec<DetectionTarget>,
    polygons: BTreeMap<String, AnnotatedPolygon>,
}

/// Classifier verdict for one helmet crop.
#[derive(Debug)]
struct Verdict {
    helmet: Rect,
    confirmed: bool,
}

/// Missing-helmet detection confirmed by a classifier.
///
/// Alert-labelled boxes from the helmet detector are cropped and
/// re-inferred with the classifier. Each confirmed box flags the person
/// whose box holds its bottom-centre and most of its area.
pub struct Helmet {
    helmet_model: String,
    person_model: String,
    classify_model: String,
    /// Classifier output index holding the "confirmed" score.
    class_index: usize,
    deferred: Deferred<PendingFrame, Verdict>,
}

impl Default for Helmet {
    fn default() -> Self {
        Self {
            helmet_model: "helmet".into(),
            person_model: "person".into(),
            classify_model: "helmet_classify".into(),
            class_index: 0,
            deferred: Deferred::default(),
        }
    }
}

impl Helmet {
    fn commission(&self, scope: &RuleScope<'_>, helmets: &[DetectionTarget]) -> usize {
        let key = scope.frame().correlation_key();
        helmets
            .iter()
            .filter(|h| scope.is_alert_label(h.label.as_deref()))
            .filter(|helmet| {
                let r = helmet.rect;
                let crop = crop_box(&r, scope.frame().image_size);
                let request = ReinferRequest::new(scope.source_id(), key)
                    .image(scope.frame().image.clone())
                    .crop(crop)
                    .model(self.classify_model.clone())
                    .context(json!({ "helmet": r }));
                scope.dispatch(request).is_ok()
            })
            .count()
    }

    /// Index of the person wearing `helmet`, if any.
    fn wearer(helmet: &Rect, people: &[DetectionTarget]) -> Option<usize> {
        let foot = helmet.anchor(AnchorStrategy::Bottom);
        people
            .iter()
            .enumerate()
            .filter(|(_, p)| p.rect.contains_point(foot))
            .map(|(i, p)| (i, helmet.containment_ratio(&p.rect)))
            .filter(|(_, ratio)| *ratio > 0.0)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .filter(|(_, ratio)| *ratio > MIN_CONTAINMENT)
            .map(|(i, _)| i)
    }

    fn compose(alert_label: &str, pending: PendingFrame, verdicts: Vec<Verdict>) -> Decision {
        let mut people = pending.people;
        let mut hit = false;
        for verdict in verdicts.iter().filter(|v| v.confirmed) {
            if let Some(i) = Self::wearer(&verdict.helmet, &people) {
                hit = true;
                people[i] = people[i].clone().alerted(Some(alert_label));
            }
        }
        Decision::Resumed {
            result: AlertResult::new(hit)
                .with_rectangles(people)
                .with_polygons(pending.polygons),
            image: pending.image,
        }
    }
}

/// `helmet` grown by [`CROP_MARGIN`] and kept inside the image.
fn crop_box(helmet: &Rect, image_size: Option<[u32; 2]>) -> Rect {
    let grown = Rect::new(
        helmet.x1 - CROP_MARGIN,
        helmet.y1 - CROP_MARGIN,
        helmet.x2 + CROP_MARGIN,
        helmet.y2 + CROP_MARGIN,
    );
    clip_to_image(grown, image_size)
}

impl Rule for Helmet {
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
            // one placeholder target when the classifier confirms the crop
            let confirmed = output
                .score(self.class_index)
                .filter(|score| *score >= output.model_conf.args.conf_thres);
            return Ok(confirmed
                .map(|score| DetectionTarget::new(Rect::default()).with_confidence(score))
                .into_iter()
                .collect());
        }
        if model == self.helmet_model || model == self.person_model {
            return Ok(neutral_targets(scope, output, Some(AnchorStrategy::Center)));
        }
        Ok(Vec::new())
    }

    fn decide(&mut self, scope: &mut RuleScope<'_>, mut targets: FilteredTargets) -> Result<Decision> {
        let alert_label = scope.primary_alert_label()?.to_owned();
        self.deferred.sweep(scope);

        let Some(continuation) = scope.frame().continuation() else {
            let helmets = targets.require(&self.helmet_model)?;
            let people = targets.require(&self.person_model)?;
            let sent = self.commission(scope, &helmets);
            if sent == 0 {
                return Ok(Decision::Complete(
                    AlertResult::new(false)
                        .with_rectangles(people)
                        .with_polygons(scope.annotated_polygons()),
                ));
            }
            let pending = PendingFrame {
                image: scope.frame().image.clone(),
                people,
                polygons: scope.annotated_polygons(),
            };
            self.deferred.open(scope, sent, pending)?;
            return Ok(Decision::Deferred);
        };

        let confirmed = !targets.require(&self.classify_model)?.is_empty();
        let helmet: Rect = context_field(continuation, "helmet")?;
        match self.deferred.collect(scope, Verdict { helmet, confirmed })? {
            Some(group) => Ok(Self::compose(&alert_label, group.context, group.parts)),
            None => Ok(Decision::Deferred),
        }
    }
}
