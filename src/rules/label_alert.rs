use crate::error::Result;
use crate::pipeline::{AlertResult, Decision, FilteredTargets, Rule, RuleScope};

/// Alerts whenever a detection carries one of the alert labels.
///
/// Registered as `label_alert`, `intrusion` and `electric_vehicle_elevator`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LabelAlert;

impl Rule for LabelAlert {
    fn decide(&mut self, scope: &mut RuleScope<'_>, targets: FilteredTargets) -> Result<Decision> {
        let Some((_, targets)) = targets.into_first() else {
            return Ok(Decision::Complete(AlertResult::new(false)));
        };

        let mut hit = false;
        let rectangles: Vec<_> = targets
            .into_iter()
            .map(|target| {
                if scope.is_alert_label(target.label.as_deref()) {
                    hit = true;
                    target.alerted(None)
                } else {
                    target
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

#[cfg(test)]
mod tests {
    use crate::pipeline::{Color, FrameContext, SharedContext};
    use crate::rules::test_support::{det, model, pipeline};

    #[test]
    fn test_alert_label_hits() {
        let mut pipeline = pipeline("intrusion", SharedContext::default());
        let frame = FrameContext::new(1.0)
            .with_alert_labels(["person"])
            .with_model(
                "det",
                model(&["person", "car"], vec![det(0., 0., 5., 5., 0), det(5., 5., 9., 9., 1)]),
            );

        let outcome = pipeline.process(frame);
        assert!(outcome.accepted);
        assert!(outcome.result.hit);
        let rects = &outcome.result.data.bbox.rectangles;
        assert_eq!(rects[0].color, Color::ALERT);
        assert_ne!(rects[1].color, Color::ALERT);
    }

    #[test]
    fn test_no_models_is_a_quiet_miss() {
        let mut pipeline = pipeline("label_alert", SharedContext::default());
        let outcome = pipeline.process(FrameContext::new(1.0).with_alert_labels(["person"]));
        assert!(outcome.accepted);
        assert!(!outcome.result.hit);
    }
}
