use crate::error::Result;
use crate::geometry::AnchorStrategy;
use crate::pipeline::{
    AlertResult, Decision, DetectionTarget, FilteredTargets, ModelOutput, Rule, RuleScope,
};

use super::neutral_targets;

/// Flags people whose box contains the centre of an alert-labelled face box
/// (e.g. "no mask") from a companion model.
#[derive(Debug, Clone)]
pub struct Mask {
    person_model: String,
    mask_model: String,
}

impl Default for Mask {
    fn default() -> Self {
        Self {
            person_model: "person".into(),
            mask_model: "mask".into(),
        }
    }
}

impl Rule for Mask {
    fn filter(
        &mut self,
        scope: &mut RuleScope<'_>,
        model: &str,
        output: &ModelOutput,
    ) -> Result<Vec<DetectionTarget>> {
        let gate = (model == self.person_model).then_some(AnchorStrategy::Center);
        Ok(neutral_targets(scope, output, gate))
    }

    fn decide(&mut self, scope: &mut RuleScope<'_>, mut targets: FilteredTargets) -> Result<Decision> {
        let alert_label = scope.primary_alert_label()?.to_owned();
        let faces = targets.require(&self.mask_model)?;
        let people = targets.require(&self.person_model)?;

        let offenders: Vec<_> = faces
            .iter()
            .filter(|f| f.has_label(&alert_label))
            .map(|f| f.rect.center())
            .collect();

        let mut hit = false;
        let rectangles: Vec<_> = people
            .into_iter()
            .map(|person| {
                if offenders.iter().any(|c| person.rect.contains_point(*c)) {
                    hit = true;
                    person.alerted(Some(&alert_label))
                } else {
                    person
                }
            })
            .collect();

        Ok(Decision::Complete(
            AlertResult::new(hit)
                .with_rectangles(rectangles)
                .with_polygons(scope.annotated_polygons()),
        ))
    }
}
