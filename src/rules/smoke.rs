use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use serde_json::json;

use crate::error::{PostprocessError, Result};
use crate::geometry::AnchorStrategy;
use crate::pipeline::{
    AlertResult, AnnotatedPolygon, Decision, DetectionTarget, FilteredTargets, ImagePayload,
    ModelOutput, Rule, RuleScope,
};
use crate::reinfer::ReinferRequest;

use super::deferred::{Deferred, context_field};

fn default_smoke_label() -> String {
    "smoke".into()
}

fn default_head_label() -> String {
    "head".into()
}

fn default_hand_label() -> String {
    "hand".into()
}

#[derive(Debug, Clone, Deserialize)]
struct SmokeParams {
    /// Re-inference budget per model name; `smoke` caps the person crops
    /// sent per frame.
    extra_model: HashMap<String, usize>,
    #[serde(default = "default_smoke_label")]
    smoke_label: String,
    #[serde(default = "default_head_label")]
    head_label: String,
    #[serde(default = "default_hand_label")]
    hand_label: String,
}

/// The commissioning frame, kept until every crop has been answered.
#[derive(Debug)]
struct PendingFrame {
    image: Option<ImagePayload>,
    polygons: BTreeMap<String, AnnotatedPolygon>,
}

/// One answered crop: the smoke model's boxes (crop coordinates) and the
/// person they were cut from.
#[derive(Debug)]
struct CropResult {
    person: DetectionTarget,
    detections: Vec<DetectionTarget>,
}

/// Smoking detection in two stages: the most confident people are cropped
/// and re-inferred with the smoke model, and a person is flagged when a
/// smoke box touches both a head box and a hand box.
pub struct Smoke {
    person_model: String,
    smoke_model: String,
    params: Option<SmokeParams>,
    deferred: Deferred<PendingFrame, CropResult>,
}

impl Default for Smoke {
    fn default() -> Self {
        Self {
            person_model: "person".into(),
            smoke_model: "smoke".into(),
            params: None,
            deferred: Deferred::default(),
        }
    }
}

impl Smoke {
    fn params(&mut self, scope: &RuleScope<'_>) -> Result<SmokeParams> {
        if let Some(params) = &self.params {
            return Ok(params.clone());
        }
        let params: SmokeParams = scope.params()?;
        if !params.extra_model.contains_key(&self.smoke_model) {
            return Err(PostprocessError::config(format!(
                "extra_model.{} is required",
                self.smoke_model
            )));
        }
        Ok(self.params.insert(params).clone())
    }

    /// Send crops for the `limit` most confident people; returns how many
    /// were accepted by the sink.
    fn commission(
        &self,
        scope: &RuleScope<'_>,
        mut people: Vec<DetectionTarget>,
        limit: usize,
    ) -> usize {
        people.sort_by(|a, b| {
            b.confidence
                .unwrap_or_default()
                .total_cmp(&a.confidence.unwrap_or_default())
        });
        let key = scope.frame().correlation_key();
        people
            .into_iter()
            .take(limit)
            .filter(|person| {
                let request = ReinferRequest::new(scope.source_id(), key)
                    .image(scope.frame().image.clone())
                    .crop(person.rect)
                    .model(self.smoke_model.clone())
                    .context(json!({ "person": person }));
                scope.dispatch(request).is_ok()
            })
            .count()
    }

    /// Heads touched by a smoke box that also touches a hand.
    fn smoking_heads(params: &SmokeParams, detections: &[DetectionTarget]) -> Vec<DetectionTarget> {
        let smokes: Vec<_> = with_label(detections, &params.smoke_label).collect();
        let hands: Vec<_> = with_label(detections, &params.hand_label).collect();
        with_label(detections, &params.head_label)
            .filter(|head| {
                smokes.iter().any(|smoke| {
                    smoke.rect.intersects(&head.rect)
                        && hands.iter().any(|hand| smoke.rect.intersects(&hand.rect))
                })
            })
            .cloned()
            .collect()
    }

    fn compose(
        params: &SmokeParams,
        alert_label: &str,
        pending: PendingFrame,
        crops: Vec<CropResult>,
    ) -> Decision {
        let mut people: Vec<DetectionTarget> = Vec::new();
        let mut heads = Vec::new();
        for crop in crops {
            let origin = crop.person.rect;
            let smoking = Self::smoking_heads(params, &crop.detections);
            let index = match people.iter().position(|p| p.rect == origin) {
                Some(index) => index,
                None => {
                    people.push(crop.person.clone());
                    people.len() - 1
                }
            };
            if smoking.is_empty() {
                continue;
            }
            people[index] = people[index].clone().alerted(None);
            heads.extend(smoking.into_iter().map(|head| {
                let rect = head.rect.translate(origin.x1, origin.y1);
                head.with_rect(rect).alerted(Some(alert_label))
            }));
        }

        let hit = !heads.is_empty();
        Decision::Resumed {
            result: AlertResult::new(hit)
                .with_rectangles(heads)
                .with_rectangles(people)
                .with_polygons(pending.polygons),
            image: pending.image,
        }
    }
}

fn with_label<'a>(
    detections: &'a [DetectionTarget],
    label: &'a str,
) -> impl Iterator<Item = &'a DetectionTarget> + 'a {
    detections.iter().filter(move |d| d.has_label(label))
}

impl Rule for Smoke {
    fn filter(
        &mut self,
        scope: &mut RuleScope<'_>,
        model: &str,
        output: &ModelOutput,
    ) -> Result<Vec<DetectionTarget>> {
        if model == self.person_model {
            return Ok(scope.standard_filter(output, AnchorStrategy::Center));
        }
        if model == self.smoke_model && scope.frame().continuation().is_none() {
            return Ok(Vec::new());
        }
        // crop coordinates: neither scaled nor region gated
        let kept: Vec<_> = output.labelled().collect();
        Ok(kept
            .into_iter()
            .map(|(d, label)| {
                let color = scope.color_for(&output.model_conf.label, &label);
                DetectionTarget::new(d.xyxy)
                    .with_confidence(d.conf)
                    .with_label(label)
                    .with_color(color)
            })
            .collect())
    }

    fn decide(&mut self, scope: &mut RuleScope<'_>, mut targets: FilteredTargets) -> Result<Decision> {
        let params = self.params(scope)?;
        let alert_label = scope.primary_alert_label()?.to_owned();
        self.deferred.sweep(scope);

        let Some(continuation) = scope.frame().continuation() else {
            let people = targets.require(&self.person_model)?;
            let limit = params.extra_model.get(&self.smoke_model).copied().unwrap_or(0);
            let sent = self.commission(scope, people, limit);
            if sent == 0 {
                return Ok(Decision::Complete(
                    AlertResult::new(false).with_polygons(scope.annotated_polygons()),
                ));
            }
            let pending = PendingFrame {
                image: scope.frame().image.clone(),
                polygons: scope.annotated_polygons(),
            };
            self.deferred.open(scope, sent, pending)?;
            return Ok(Decision::Deferred);
        };

        let detections = targets.require(&self.smoke_model)?;
        let person: DetectionTarget = context_field(continuation, "person")?;
        let fragment = CropResult { person, detections };
        match self.deferred.collect(scope, fragment)? {
            Some(group) => Ok(Self::compose(&params, &alert_label, group.context, group.parts)),
            None => Ok(Decision::Deferred),
        }
    }
}
