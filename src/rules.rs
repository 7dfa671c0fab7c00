//! Built-in rules, registered by algorithm name.

mod cross_line_counting;
mod deferred;
mod face;
mod fall_down;
mod fight;
mod gathering;
mod helmet;
mod label_alert;
mod mask;
mod motion;
mod sleep;
mod smoke;

use crate::geometry::{AnchorStrategy, Rect};
use crate::pipeline::{Color, DetectionTarget, ModelOutput, RuleRegistry, RuleScope};
use crate::tracker::{ByteTracker, TrackContinuity};

pub use cross_line_counting::CrossLineCounting;
pub use face::FaceMatch;
pub use fall_down::FallDown;
pub use fight::Fight;
pub use gathering::PersonGathering;
pub use helmet::Helmet;
pub use label_alert::LabelAlert;
pub use mask::Mask;
pub use motion::{CarMisplaced, PersonLoitering};
pub use sleep::PersonSleep;
pub use smoke::Smoke;

pub(crate) fn register_builtin(registry: &mut RuleRegistry) {
    for name in ["label_alert", "intrusion", "electric_vehicle_elevator"] {
        registry.register(name, || Box::new(LabelAlert));
    }
    for name in ["cross_line_counting", "truck_counting"] {
        registry.register(name, || Box::new(CrossLineCounting::default()));
    }
    registry
        .register("mask", || Box::new(Mask::default()))
        .register("person_gathering", || Box::new(PersonGathering::default()))
        .register("person_loitering", || Box::new(PersonLoitering::default()))
        .register("car_misplaced", || Box::new(CarMisplaced::default()))
        .register("smoke", || Box::new(Smoke::default()))
        .register("helmet", || Box::new(Helmet::default()))
        .register("face", || Box::new(FaceMatch::default()))
        .register("fall_down", || Box::new(FallDown::default()))
        .register("person_sleep", || Box::new(PersonSleep::default()))
        .register("fight", || Box::new(Fight::default()));
}

/// A fresh ByteTrack-backed reaper sized from the source's frame interval.
fn track_continuity<S>(scope: &RuleScope<'_>) -> TrackContinuity<ByteTracker, S> {
    let continuity = TrackContinuity::new(ByteTracker::new(scope.tracker_config()));
    tracing::info!(
        source_id = %scope.source_id(),
        alg_name = %scope.alg_name(),
        max_retain = continuity.max_retain(),
        "tracker initialised"
    );
    continuity
}

/// Confidence and label gated, scaled targets in the non-alert colour,
/// optionally gated by the configured regions.
fn neutral_targets(
    scope: &RuleScope<'_>,
    output: &ModelOutput,
    region_gate: Option<AnchorStrategy>,
) -> Vec<DetectionTarget> {
    output
        .labelled()
        .map(|(d, label)| (scope.scaled(&d.xyxy), d.conf, label))
        .filter(|(rect, _, _)| region_gate.is_none_or(|strategy| scope.admits(rect, strategy)))
        .map(|(rect, conf, label)| {
            DetectionTarget::new(rect)
                .with_confidence(conf)
                .with_label(label)
                .with_color(Color::NORMAL)
        })
        .collect()
}

/// `rect` clipped to the frame image, or only to non-negative coordinates
/// when the host did not report the image size.
fn clip_to_image(rect: Rect, image_size: Option<[u32; 2]>) -> Rect {
    let [width, height] = image_size.map_or([f32::INFINITY; 2], |[w, h]| [w as f32, h as f32]);
    Rect::new(
        rect.x1.clamp(0.0, width),
        rect.y1.clamp(0.0, height),
        rect.x2.clamp(0.0, width),
        rect.y2.clamp(0.0, height),
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::geometry::Rect;
    use crate::pipeline::{
        LabelConfig, ModelArgs, ModelConfig, ModelOutput, PostprocessingPipeline, RawDetection,
        SharedContext,
    };

    /// Detection model whose class ids map, in order, to `labels`.
    pub fn model(labels: &[&str], detections: Vec<RawDetection>) -> ModelOutput {
        let mut label = LabelConfig::default();
        for (id, name) in labels.iter().enumerate() {
            label.class2label.insert(id.to_string(), (*name).to_owned());
        }
        let model_conf = ModelConfig {
            args: ModelArgs { conf_thres: 0.3 },
            label,
        };
        ModelOutput::detections(model_conf, detections)
    }

    pub fn det(x1: f32, y1: f32, x2: f32, y2: f32, class: i64) -> RawDetection {
        RawDetection::new(Rect::new(x1, y1, x2, y2), 0.9, class)
    }

    pub fn pipeline(alg_name: &str, shared: SharedContext) -> PostprocessingPipeline {
        PostprocessingPipeline::new("cam", alg_name, Arc::new(shared)).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names() {
        let registry = RuleRegistry::with_builtin();
        for name in [
            "label_alert",
            "intrusion",
            "electric_vehicle_elevator",
            "mask",
            "person_gathering",
            "person_loitering",
            "car_misplaced",
            "cross_line_counting",
            "truck_counting",
            "smoke",
            "helmet",
            "face",
            "fall_down",
            "person_sleep",
            "fight",
        ] {
            assert!(registry.create(name).is_ok(), "{name} not registered");
        }
    }
}
