use std::sync::Arc;

use crate::error::{PostprocessError, Result};

use super::context::SharedContext;
use super::frame::FrameContext;
use super::palette::LabelPalette;
use super::result::{Decision, FrameOutcome};
use super::rule::{FilteredTargets, Rule, RuleScope, SourceSettings};
use super::schedule::in_plan;

/// Per-source orchestrator: filter, decide and compose each frame.
///
/// Frames of one source must be fed sequentially to one instance. Every
/// per-frame failure is logged and turned into an empty, unaccepted
/// outcome; nothing escapes [`Self::process`]. A missing configuration
/// additionally halts the instance until [`Self::reconfigure`].
pub struct PostprocessingPipeline {
    source_id: String,
    alg_name: String,
    shared: Arc<SharedContext>,
    rule: Box<dyn Rule>,
    settings: Option<SourceSettings>,
    palette: LabelPalette,
    halted: bool,
}

impl PostprocessingPipeline {
    pub fn new(
        source_id: impl Into<String>,
        alg_name: impl Into<String>,
        shared: Arc<SharedContext>,
    ) -> Result<Self> {
        let source_id = source_id.into();
        let alg_name = alg_name.into();
        let rule = shared.registry().create(&alg_name)?;
        let palette = LabelPalette::new(shared.color_pool().to_vec());
        tracing::info!(source_id = %source_id, alg_name = %alg_name, "pipeline created");
        Ok(Self {
            source_id,
            alg_name,
            shared,
            rule,
            settings: None,
            palette,
            halted: false,
        })
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn alg_name(&self) -> &str {
        &self.alg_name
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Settings latched from the first processed frame.
    pub fn settings(&self) -> Option<&SourceSettings> {
        self.settings.as_ref()
    }

    /// Process one frame.
    ///
    /// `accepted` is true when the result is a decision to publish: either
    /// this frame's own, or an earlier frame's finalised by this one (in
    /// which case `frame` is that earlier frame's image).
    pub fn process(&mut self, frame: FrameContext) -> FrameOutcome {
        if self.halted {
            tracing::debug!(
                source_id = %self.source_id,
                alg_name = %self.alg_name,
                "halted, frame skipped"
            );
            return FrameOutcome::skipped(frame.image);
        }

        match self.run(&frame) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.report(&err);
                FrameOutcome::skipped(frame.image)
            }
        }
    }

    /// Drop latched settings and all rule state; the next frame configures
    /// the instance afresh.
    pub fn reconfigure(&mut self) -> Result<()> {
        self.rule = self.shared.registry().create(&self.alg_name)?;
        self.settings = None;
        self.palette = LabelPalette::new(self.shared.color_pool().to_vec());
        self.halted = false;
        tracing::info!(
            source_id = %self.source_id,
            alg_name = %self.alg_name,
            "pipeline reconfigured"
        );
        Ok(())
    }

    fn run(&mut self, frame: &FrameContext) -> Result<FrameOutcome> {
        let settings = self
            .settings
            .get_or_insert_with(|| SourceSettings::latch(frame));

        if !in_plan(frame.plan.as_ref(), frame.time) {
            tracing::debug!(
                source_id = %self.source_id,
                time = frame.time,
                "outside plan, frame skipped"
            );
            return Ok(FrameOutcome::skipped(frame.image.clone()));
        }

        let mut scope = RuleScope::new(
            &self.source_id,
            &self.alg_name,
            settings,
            frame,
            &mut self.palette,
            &self.shared,
        );

        let mut filtered = FilteredTargets::default();
        for (model, output) in &frame.models {
            let targets = self.rule.filter(&mut scope, model, output)?;
            filtered.insert(model.clone(), targets);
        }

        let outcome = match self.rule.decide(&mut scope, filtered)? {
            Decision::Complete(result) => FrameOutcome {
                accepted: true,
                result,
                frame: frame.image.clone(),
            },
            Decision::Deferred => {
                tracing::debug!(
                    source_id = %self.source_id,
                    time = frame.time,
                    "decision deferred"
                );
                FrameOutcome::skipped(frame.image.clone())
            }
            Decision::Resumed { result, image } => FrameOutcome {
                accepted: true,
                result,
                frame: image,
            },
        };
        Ok(outcome)
    }

    fn report(&mut self, err: &PostprocessError) {
        match err {
            PostprocessError::ConfigurationMissing { .. } => {
                self.halted = true;
                tracing::error!(
                    source_id = %self.source_id,
                    alg_name = %self.alg_name,
                    error = %err,
                    "configuration missing, pipeline halted"
                );
            }
            PostprocessError::ModelResultMissing { .. }
            | PostprocessError::CorrelationExpired { .. } => {
                tracing::warn!(
                    source_id = %self.source_id,
                    alg_name = %self.alg_name,
                    error = %err,
                    "frame decision dropped"
                );
            }
            _ => {
                tracing::error!(
                    source_id = %self.source_id,
                    alg_name = %self.alg_name,
                    error = %err,
                    "postprocess failed"
                );
            }
        }
    }
}

impl std::fmt::Debug for PostprocessingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostprocessingPipeline")
            .field("source_id", &self.source_id)
            .field("alg_name", &self.alg_name)
            .field("halted", &self.halted)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::rule::RuleRegistry;
    use crate::pipeline::result::AlertResult;
    use crate::pipeline::schedule::WeeklySchedule;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Params {
        flag: bool,
    }

    struct ParamEcho;

    impl Rule for ParamEcho {
        fn decide(
            &mut self,
            scope: &mut RuleScope<'_>,
            _targets: FilteredTargets,
        ) -> Result<Decision> {
            let params: Params = scope.params()?;
            Ok(Decision::Complete(AlertResult::new(params.flag)))
        }
    }

    fn pipeline() -> PostprocessingPipeline {
        let mut registry = RuleRegistry::new();
        registry.register("echo", || Box::new(ParamEcho));
        let shared = Arc::new(SharedContext::builder().registry(registry).build());
        PostprocessingPipeline::new("cam-1", "echo", shared).unwrap()
    }

    #[test]
    fn test_unknown_algorithm() {
        let err = PostprocessingPipeline::new("cam", "nope", Arc::new(SharedContext::default()))
            .err();
        assert!(matches!(err, Some(PostprocessError::UnknownAlgorithm(_))));
    }

    #[test]
    fn test_settings_latch_on_first_frame() {
        let mut pipeline = pipeline();
        let first = pipeline.process(FrameContext::new(1.0).with_params(json!({"flag": true})));
        assert!(first.accepted && first.result.hit);

        // later parameter changes are ignored until reconfigured
        let second = pipeline.process(FrameContext::new(2.0).with_params(json!({"flag": false})));
        assert!(second.result.hit);

        pipeline.reconfigure().unwrap();
        let third = pipeline.process(FrameContext::new(3.0).with_params(json!({"flag": false})));
        assert!(third.accepted && !third.result.hit);
    }

    #[test]
    fn test_missing_configuration_halts_until_reconfigured() {
        let mut pipeline = pipeline();
        let outcome = pipeline.process(FrameContext::new(1.0));
        assert!(!outcome.accepted);
        assert_eq!(outcome.result, AlertResult::default());
        assert!(pipeline.is_halted());

        let outcome = pipeline.process(FrameContext::new(2.0).with_params(json!({"flag": true})));
        assert!(!outcome.accepted);

        pipeline.reconfigure().unwrap();
        let outcome = pipeline.process(FrameContext::new(3.0).with_params(json!({"flag": true})));
        assert!(outcome.accepted);
        assert!(!pipeline.is_halted());
    }

    #[test]
    fn test_outside_plan_is_skipped() {
        let mut pipeline = pipeline();
        let frame = FrameContext::new(1.0)
            .with_params(json!({"flag": true}))
            .with_plan(WeeklySchedule::new());
        let outcome = pipeline.process(frame);
        assert!(!outcome.accepted);
        assert!(!pipeline.is_halted());
    }
}
