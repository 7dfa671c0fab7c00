use serde::Deserialize;

use crate::error::Result;
use crate::geometry::AnchorStrategy;
use crate::pipeline::{
    AlertResult, Color, Decision, DetectionTarget, FilteredTargets, ModelOutput, Rule, RuleScope,
};

use super::neutral_targets;

#[derive(Debug, Clone, Copy, Deserialize)]
struct GatheringParams {
    #[serde(default)]
    strategy: AnchorStrategy,
    threshold: usize,
}

/// Alerts on any region holding at least `threshold` anchored targets.
#[derive(Debug, Default)]
pub struct PersonGathering {
    params: Option<GatheringParams>,
}

impl Rule for PersonGathering {
    fn filter(
        &mut self,
        scope: &mut RuleScope<'_>,
        _model: &str,
        output: &ModelOutput,
    ) -> Result<Vec<DetectionTarget>> {
        Ok(neutral_targets(scope, output, None))
    }

    fn decide(&mut self, scope: &mut RuleScope<'_>, targets: FilteredTargets) -> Result<Decision> {
        let params = match self.params {
            Some(params) => params,
            None => *self.params.insert(scope.params()?),
        };
        let targets = targets.into_first().map(|(_, t)| t).unwrap_or_default();

        let mut crowded = vec![false; targets.len()];
        let mut polygons = scope.annotated_polygons();
        let mut hit = false;
        for region in &scope.regions().polygons {
            let inside: Vec<usize> = targets
                .iter()
                .enumerate()
                .filter(|(_, t)| region.contains(&t.rect, params.strategy))
                .map(|(i, _)| i)
                .collect();
            if inside.len() < params.threshold {
                continue;
            }
            hit = true;
            for i in &inside {
                crowded[*i] = true;
            }
            if let Some(polygon) = polygons.remove(&region.id) {
                let polygon = polygon
                    .with_color(Color::ALERT)
                    .with_ext("result", inside.len());
                polygons.insert(region.id.clone(), polygon);
            }
        }

        let rectangles = targets
            .into_iter()
            .zip(crowded)
            .map(|(t, crowded)| if crowded { t.alerted(None) } else { t });

        Ok(Decision::Complete(
            AlertResult::new(hit)
                .with_rectangles(rectangles)
                .with_polygons(polygons),
        ))
    }
}
