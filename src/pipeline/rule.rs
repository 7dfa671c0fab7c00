use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{PostprocessError, Result};
use crate::geometry::{AnchorStrategy, Rect};
use crate::reinfer::{ReinferRequest, ReinferSink};
use crate::tracker::TrackerConfig;

use super::context::{SharedContext, SimilarityIndex};
use super::frame::{FrameContext, LabelConfig, ModelOutput};
use super::palette::LabelPalette;
use super::region::{AnnotatedPolygon, RegionConfig};
use super::result::Decision;
use super::target::{Color, DetectionTarget};

/// Per-source configuration taken from the first frame and reused until
/// the pipeline is reconfigured.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub alert_labels: Vec<String>,
    pub regions: RegionConfig,
    pub scale: f32,
    pub frame_interval_ms: f64,
    pub alg_type: Option<String>,
    pub params: Value,
}

impl SourceSettings {
    pub fn latch(frame: &FrameContext) -> Self {
        Self {
            alert_labels: frame.alert_labels.clone(),
            regions: frame.regions.clone(),
            scale: frame.scale,
            frame_interval_ms: frame.frame_interval_ms,
            alg_type: frame.alg_type.clone(),
            params: frame.params.clone(),
        }
    }
}

/// Targets kept by the filter stage, per model name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilteredTargets {
    models: BTreeMap<String, Vec<DetectionTarget>>,
}

impl FilteredTargets {
    pub fn insert(&mut self, model: impl Into<String>, targets: Vec<DetectionTarget>) {
        self.models.insert(model.into(), targets);
    }

    pub fn get(&self, model: &str) -> Option<&[DetectionTarget]> {
        self.models.get(model).map(Vec::as_slice)
    }

    pub fn take(&mut self, model: &str) -> Option<Vec<DetectionTarget>> {
        self.models.remove(model)
    }

    /// Like [`Self::take`], failing with `ModelResultMissing`.
    pub fn require(&mut self, model: &str) -> Result<Vec<DetectionTarget>> {
        self.take(model)
            .ok_or_else(|| PostprocessError::model_missing(model))
    }

    /// Single-model rules read whichever model the frame carried.
    pub fn into_first(self) -> Option<(String, Vec<DetectionTarget>)> {
        self.models.into_iter().next()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Everything a [`Rule`] may look at or use while handling one frame.
pub struct RuleScope<'a> {
    pub(crate) source_id: &'a str,
    pub(crate) alg_name: &'a str,
    pub(crate) settings: &'a SourceSettings,
    pub(crate) frame: &'a FrameContext,
    pub(crate) palette: &'a mut LabelPalette,
    pub(crate) shared: &'a SharedContext,
}

impl<'a> RuleScope<'a> {
    pub fn new(
        source_id: &'a str,
        alg_name: &'a str,
        settings: &'a SourceSettings,
        frame: &'a FrameContext,
        palette: &'a mut LabelPalette,
        shared: &'a SharedContext,
    ) -> Self {
        Self {
            source_id,
            alg_name,
            settings,
            frame,
            palette,
            shared,
        }
    }

    pub fn source_id(&self) -> &str {
        self.source_id
    }

    pub fn alg_name(&self) -> &str {
        self.alg_name
    }

    pub fn frame(&self) -> &FrameContext {
        self.frame
    }

    pub fn settings(&self) -> &SourceSettings {
        self.settings
    }

    pub fn time(&self) -> f64 {
        self.frame.time
    }

    /// Deserialise the rule's parameters; any failure is
    /// `ConfigurationMissing`.
    pub fn params<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.settings.params.clone())
            .map_err(|e| PostprocessError::config(format!("{}: {e}", self.alg_name)))
    }

    pub fn alert_labels(&self) -> &[String] {
        &self.settings.alert_labels
    }

    pub fn is_alert_label(&self, label: Option<&str>) -> bool {
        label.is_some_and(|l| self.settings.alert_labels.iter().any(|a| a == l))
    }

    /// Label given to targets a rule flags; the first configured alert label.
    pub fn primary_alert_label(&self) -> Result<&str> {
        self.settings
            .alert_labels
            .first()
            .map(String::as_str)
            .ok_or_else(|| PostprocessError::config("alert_label is empty"))
    }

    pub fn regions(&self) -> &RegionConfig {
        &self.settings.regions
    }

    pub fn annotated_polygons(&self) -> BTreeMap<String, AnnotatedPolygon> {
        self.settings.regions.annotated_polygons()
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig::from_frame_interval(self.settings.frame_interval_ms)
    }

    /// Seconds a correlation group may stay incomplete: the `reinfer_timeout`
    /// parameter if set, else two frame intervals.
    pub fn reinfer_timeout(&self) -> f64 {
        self.settings
            .params
            .get("reinfer_timeout")
            .and_then(Value::as_f64)
            .unwrap_or(self.settings.frame_interval_ms / 1000.0 * 2.0)
    }

    /// Model coordinates to overlay coordinates.
    pub fn scaled(&self, rect: &Rect) -> Rect {
        rect.scale(self.settings.scale)
    }

    pub fn admits(&self, rect: &Rect, strategy: AnchorStrategy) -> bool {
        self.settings.regions.admits(rect, strategy)
    }

    pub fn color_for(&mut self, labels: &LabelConfig, label: &str) -> Color {
        self.palette.resolve(labels, label)
    }

    /// Confidence gate, label lookup, scaling and ROI gating by `strategy`,
    /// coloured per label.
    pub fn standard_filter(
        &mut self,
        output: &ModelOutput,
        strategy: AnchorStrategy,
    ) -> Vec<DetectionTarget> {
        let kept: Vec<(Rect, f32, String)> = output
            .labelled()
            .map(|(d, label)| (self.scaled(&d.xyxy), d.conf, label))
            .filter(|(rect, _, _)| self.admits(rect, strategy))
            .collect();
        kept.into_iter()
            .map(|(rect, conf, label)| {
                let color = self.color_for(&output.model_conf.label, &label);
                DetectionTarget::new(rect)
                    .with_confidence(conf)
                    .with_label(label)
                    .with_color(color)
            })
            .collect()
    }

    /// Hand a request to the shared sink, logging a rejection.
    pub fn dispatch(&self, request: ReinferRequest) -> Result<()> {
        self.shared.sink().submit(request).inspect_err(|err| {
            tracing::error!(
                source_id = %self.source_id,
                alg_name = %self.alg_name,
                error = %err,
                "re-inference dispatch failed"
            );
        })
    }

    pub fn index(&self, group_id: &str) -> Option<Arc<dyn SimilarityIndex>> {
        self.shared.index(group_id)
    }
}

/// One alerting algorithm.
///
/// A rule instance belongs to exactly one source and sees its frames in
/// order, so it may keep per-source state in `self`.
pub trait Rule: Send {
    /// Keep the relevant targets of one model's output.
    fn filter(
        &mut self,
        scope: &mut RuleScope<'_>,
        model: &str,
        output: &ModelOutput,
    ) -> Result<Vec<DetectionTarget>> {
        let _ = model;
        Ok(scope.standard_filter(output, AnchorStrategy::Center))
    }

    /// Turn the filtered targets into a decision for this frame.
    fn decide(&mut self, scope: &mut RuleScope<'_>, targets: FilteredTargets) -> Result<Decision>;
}

pub type RuleFactory = Arc<dyn Fn() -> Box<dyn Rule> + Send + Sync>;

/// Rule constructors by algorithm name.
#[derive(Clone, Default)]
pub struct RuleRegistry {
    factories: HashMap<String, RuleFactory>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in rule.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        crate::rules::register_builtin(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Rule> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn Rule>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| PostprocessError::UnknownAlgorithm(name.to_owned()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
