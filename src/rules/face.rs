use serde::Deserialize;
use serde_json::Value;

use crate::error::Result;
use crate::geometry::AnchorStrategy;
use crate::pipeline::{
    AlertResult, Color, Decision, DetectionTarget, FilteredTargets, GroupInfo, ModelOutput, Rule,
    RuleScope, SimilarityIndex,
};

/// Added to the raw similarity before it is shown as a confidence.
const SCORE_OFFSET: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum GroupType {
    /// Known faces alert.
    Blacklist,
    /// Unknown faces alert.
    Whitelist,
}

#[derive(Debug, Clone, Deserialize)]
struct FaceParams {
    group_id: String,
    group_type: GroupType,
    similarity: f32,
    /// Minimum face quality, as a fraction of the engine's 0-100 scale.
    threshold: f64,
}

impl FaceParams {
    fn min_score(&self) -> f32 {
        (self.similarity - SCORE_OFFSET).max(0.0)
    }
}

/// Face lookup against the similarity index registered for `group_id`.
#[derive(Default)]
pub struct FaceMatch {
    params: Option<FaceParams>,
}

impl FaceMatch {
    fn params(&mut self, scope: &RuleScope<'_>) -> Result<FaceParams> {
        if let Some(params) = &self.params {
            return Ok(params.clone());
        }
        let params: FaceParams = scope.params()?;
        tracing::info!(
            source_id = %scope.source_id(),
            alg_name = %scope.alg_name(),
            group_id = %params.group_id,
            group_type = ?params.group_type,
            "face group configured"
        );
        Ok(self.params.insert(params).clone())
    }

    /// Match one face, returning whether it alerts.
    fn judge(
        params: &FaceParams,
        index: Option<&dyn SimilarityIndex>,
        target: &mut DetectionTarget,
        feature: &[f32],
    ) -> bool {
        let found = index.and_then(|index| {
            let (id, score) = index.search(feature, params.min_score())?;
            index.query(&id).map(|record| (record, score))
        });
        match (params.group_type, found) {
            (GroupType::Blacklist, Some((record, score))) => {
                target.color = Color::ALERT;
                target.label = Some(record.name.clone());
                target.confidence = Some(displayed_confidence(score));
                target
                    .ext
                    .insert("face".into(), serde_json::to_value(record).unwrap_or_default());
                true
            }
            (GroupType::Blacklist, None) => {
                target.color = Color::NORMAL;
                false
            }
            (GroupType::Whitelist, Some((record, score))) => {
                target.color = Color::NORMAL;
                target.label = Some(record.name);
                target.confidence = Some(displayed_confidence(score));
                false
            }
            (GroupType::Whitelist, None) => {
                target.color = Color::ALERT;
                true
            }
        }
    }
}

fn displayed_confidence(score: f32) -> f32 {
    (score + SCORE_OFFSET).clamp(0.4, 0.95)
}

fn quality(extra: &serde_json::Map<String, Value>) -> f64 {
    extra.get("quality").and_then(Value::as_f64).unwrap_or_default()
}

impl Rule for FaceMatch {
    fn filter(
        &mut self,
        scope: &mut RuleScope<'_>,
        _model: &str,
        output: &ModelOutput,
    ) -> Result<Vec<DetectionTarget>> {
        let min_quality = self.params(scope)?.threshold * 100.0;
        Ok(output
            .confident()
            .filter(|d| quality(&d.extra) >= min_quality)
            .map(|d| (d, scope.scaled(&d.xyxy)))
            .filter(|(_, rect)| scope.admits(rect, AnchorStrategy::Center))
            .map(|(d, rect)| {
                let target = DetectionTarget::new(rect).with_confidence(d.conf);
                match d.extra.get("feature") {
                    Some(feature) => target.with_ext("feature", feature.clone()),
                    None => target,
                }
            })
            .collect())
    }

    fn decide(&mut self, scope: &mut RuleScope<'_>, targets: FilteredTargets) -> Result<Decision> {
        let params = self.params(scope)?;
        let index = scope.index(&params.group_id);
        if index.is_none() {
            tracing::debug!(
                source_id = %scope.source_id(),
                group_id = %params.group_id,
                "no similarity index for group"
            );
        }

        let mut faces = targets.into_first().map(|(_, t)| t).unwrap_or_default();
        let mut hit = false;
        for face in &mut faces {
            let feature = face
                .take_ext("feature")
                .and_then(|v| serde_json::from_value::<Vec<f32>>(v).ok());
            if let Some(feature) = feature {
                hit |= Self::judge(&params, index.as_deref(), face, &feature);
            }
        }

        let group = GroupInfo {
            id: index.as_ref().map(|i| i.group_id().to_owned()),
            name: index.as_ref().and_then(|i| i.group_name().map(str::to_owned)),
        };
        Ok(Decision::Complete(
            AlertResult::new(hit)
                .with_rectangles(faces)
                .with_polygons(scope.annotated_polygons())
                .with_group(group),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::geometry::Rect;
    use crate::pipeline::{FrameContext, IndexRecord, ModelConfig, RawDetection, SharedContext};
    use crate::rules::test_support::pipeline;

    /// Gallery scored by dot product.
    struct Gallery {
        members: Vec<(String, String, Vec<f32>)>,
    }

    impl SimilarityIndex for Gallery {
        fn group_id(&self) -> &str {
            "staff"
        }

        fn group_name(&self) -> Option<&str> {
            Some("Staff")
        }

        fn search(&self, feature: &[f32], min_score: f32) -> Option<(String, f32)> {
            self.members
                .iter()
                .map(|(id, _, v)| (id.clone(), v.iter().zip(feature).map(|(a, b)| a * b).sum::<f32>()))
                .filter(|(_, score)| *score >= min_score)
                .max_by(|a, b| a.1.total_cmp(&b.1))
        }

        fn query(&self, id: &str) -> Option<IndexRecord> {
            self.members.iter().find(|(i, _, _)| i == id).map(|(_, name, _)| IndexRecord {
                name: name.clone(),
                extra: Default::default(),
            })
        }
    }

    fn shared() -> SharedContext {
        let shared = SharedContext::default();
        shared.register_index(Arc::new(Gallery {
            members: vec![("a1".into(), "alice".into(), vec![1.0, 0.0])],
        }));
        shared
    }

    fn face(feature: [f32; 2], quality: f64) -> RawDetection {
        RawDetection::new(Rect::new(10., 10., 30., 30.), 0.9, 0)
            .with_extra("feature", json!(feature))
            .with_extra("quality", quality)
    }

    fn frame(group_type: &str, faces: Vec<RawDetection>) -> FrameContext {
        FrameContext::new(1.0)
            .with_params(json!({
                "group_id": "staff",
                "group_type": group_type,
                "similarity": 0.8,
                "threshold": 0.5,
            }))
            .with_model("face", ModelOutput::detections(ModelConfig::default(), faces))
    }

    #[test]
    fn test_blacklist_match_alerts() {
        let mut pipeline = pipeline("face", shared());
        let outcome = pipeline.process(frame("blacklist", vec![face([0.9, 0.1], 80.0)]));
        assert!(outcome.result.hit);

        let target = &outcome.result.data.bbox.rectangles[0];
        assert_eq!(target.color, Color::ALERT);
        assert_eq!(target.label.as_deref(), Some("alice"));
        assert_eq!(target.confidence, Some(0.95));
        assert_eq!(target.ext("face").unwrap()["name"], "alice");
        assert!(target.ext("feature").is_none());

        let group = outcome.result.data.group.unwrap();
        assert_eq!(group.id.as_deref(), Some("staff"));
        assert_eq!(group.name.as_deref(), Some("Staff"));
    }

    #[test]
    fn test_whitelist_stranger_alerts() {
        let mut pipeline = pipeline("face", shared());
        let outcome = pipeline.process(frame(
            "whitelist",
            vec![face([1.0, 0.0], 80.0), face([0.0, 1.0], 80.0)],
        ));
        assert!(outcome.result.hit);
        let rects = &outcome.result.data.bbox.rectangles;
        assert_eq!(rects[0].color, Color::NORMAL);
        assert_eq!(rects[0].label.as_deref(), Some("alice"));
        assert_eq!(rects[1].color, Color::ALERT);
        assert_eq!(rects[1].label, None);
    }

    #[test]
    fn test_low_quality_faces_are_dropped() {
        let mut pipeline = pipeline("face", shared());
        let outcome = pipeline.process(frame("whitelist", vec![face([0.0, 1.0], 20.0)]));
        assert!(!outcome.result.hit);
        assert!(outcome.result.data.bbox.rectangles.is_empty());
    }

    #[test]
    fn test_missing_index_leaves_group_empty() {
        let mut pipeline = pipeline("face", SharedContext::default());
        let outcome = pipeline.process(frame("blacklist", vec![face([1.0, 0.0], 80.0)]));
        assert!(!outcome.result.hit);
        assert_eq!(outcome.result.data.group, Some(GroupInfo::default()));
    }

    #[test]
    fn test_unknown_group_type_halts() {
        let mut pipeline = pipeline("face", shared());
        let outcome = pipeline.process(frame("greylist", vec![face([1.0, 0.0], 80.0)]));
        assert!(!outcome.accepted);
        assert!(pipeline.is_halted());
    }
}
