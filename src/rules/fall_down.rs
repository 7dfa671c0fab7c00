use serde::Deserialize;

use crate::error::Result;
use crate::pipeline::{AlertResult, Decision, DetectionTarget, FilteredTargets, Rule, RuleScope};

fn default_bottom_margin() -> f32 {
    10.0
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct FallDownParams {
    /// IoU a person box must exceed against a fall box.
    iou: f32,
    /// People whose box reaches within this many pixels of the image bottom
    /// are cut off by the frame edge and never judged.
    #[serde(default = "default_bottom_margin", alias = "distance")]
    bottom_margin: f32,
}

/// Flags people whose box overlaps a box from the fall detector.
pub struct FallDown {
    fall_model: String,
    person_model: String,
    params: Option<FallDownParams>,
}

impl Default for FallDown {
    fn default() -> Self {
        Self {
            fall_model: "fall_down".into(),
            person_model: "person".into(),
            params: None,
        }
    }
}

impl FallDown {
    fn params(&mut self, scope: &RuleScope<'_>) -> Result<FallDownParams> {
        if let Some(params) = self.params {
            return Ok(params);
        }
        Ok(*self.params.insert(scope.params()?))
    }

    fn has_fallen(person: &DetectionTarget, falls: &[DetectionTarget], iou: f32) -> bool {
        falls.iter().any(|fall| person.rect.iou(&fall.rect) > iou)
    }
}

impl Rule for FallDown {
    fn decide(&mut self, scope: &mut RuleScope<'_>, mut targets: FilteredTargets) -> Result<Decision> {
        let params = self.params(scope)?;
        let alert_label = scope.primary_alert_label()?.to_owned();
        let falls = targets.require(&self.fall_model)?;
        let people = targets.require(&self.person_model)?;
        let floor = scope
            .frame()
            .image_size
            .map(|[_, height]| height as f32 - params.bottom_margin);

        let mut hit = false;
        let rectangles: Vec<_> = people
            .into_iter()
            .map(|person| {
                let cut_off = floor.is_some_and(|floor| person.rect.y2 > floor);
                if !cut_off && Self::has_fallen(&person, &falls, params.iou) {
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
