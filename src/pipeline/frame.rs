use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::geometry::Rect;
use crate::reinfer::{CorrelationKey, ReinferContinuation};

use super::region::RegionConfig;
use super::schedule::WeeklySchedule;
use super::target::Ext;

/// Encoded image passed through untouched (e.g. base64 JPEG).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImagePayload(pub String);

/// Class id to label mapping and per-label colours of one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelConfig {
    /// Class id (as a string) to raw label.
    #[serde(default)]
    pub class2label: HashMap<String, String>,
    /// Optional renaming of raw labels.
    #[serde(default)]
    pub label_map: HashMap<String, String>,
    /// Fixed colours; entries that are not three channels are ignored.
    #[serde(default)]
    pub label2color: HashMap<String, Vec<u8>>,
}

impl LabelConfig {
    /// Resolve a class id to its display label, `None` if not configured.
    pub fn resolve(&self, class_id: i64) -> Option<String> {
        let label = self.class2label.get(&class_id.to_string())?;
        Some(self.label_map.get(label).unwrap_or(label).clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArgs {
    #[serde(default)]
    pub conf_thres: f32,
}

impl Default for ModelArgs {
    fn default() -> Self {
        Self { conf_thres: 0.0 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub args: ModelArgs,
    #[serde(default)]
    pub label: LabelConfig,
}

/// One detection straight out of an inference engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub xyxy: Rect,
    pub conf: f32,
    #[serde(default)]
    pub label: i64,
    /// Anything else the engine attached (feature, landmark, quality, ...).
    #[serde(flatten)]
    pub extra: Ext,
}

impl RawDetection {
    pub fn new(xyxy: Rect, conf: f32, label: i64) -> Self {
        Self {
            xyxy,
            conf,
            label,
            extra: Ext::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Per-class scores from a classification model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassScores {
    pub output: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EngineResult {
    Detections(Vec<RawDetection>),
    Scores(ClassScores),
}

impl Default for EngineResult {
    fn default() -> Self {
        Self::Detections(Vec::new())
    }
}

/// A model's configuration together with its output for this frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelOutput {
    #[serde(default)]
    pub model_conf: ModelConfig,
    #[serde(default)]
    pub engine_result: EngineResult,
}

impl ModelOutput {
    pub fn detections(model_conf: ModelConfig, detections: Vec<RawDetection>) -> Self {
        Self {
            model_conf,
            engine_result: EngineResult::Detections(detections),
        }
    }

    pub fn scores(model_conf: ModelConfig, output: Vec<f32>) -> Self {
        Self {
            model_conf,
            engine_result: EngineResult::Scores(ClassScores { output }),
        }
    }

    /// Detections at or above `conf_thres`.
    pub fn confident(&self) -> impl Iterator<Item = &RawDetection> {
        let threshold = self.model_conf.args.conf_thres;
        let detections: &[RawDetection] = match &self.engine_result {
            EngineResult::Detections(d) => d,
            EngineResult::Scores(_) => &[],
        };
        detections.iter().filter(move |d| d.conf >= threshold)
    }

    /// Confident detections whose class id maps to a label, paired with
    /// that label.
    pub fn labelled(&self) -> impl Iterator<Item = (&RawDetection, String)> {
        let label = &self.model_conf.label;
        self.confident()
            .filter_map(move |d| label.resolve(d.label).map(|name| (d, name)))
    }

    /// Classifier score for `class`, if this output is a classification.
    pub fn score(&self, class: usize) -> Option<f32> {
        match &self.engine_result {
            EngineResult::Scores(s) => s.output.get(class).copied(),
            EngineResult::Detections(_) => None,
        }
    }
}

fn default_scale() -> f32 {
    1.0
}

/// Everything the pipeline receives for one frame of one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameContext {
    /// Frame time in seconds.
    pub time: f64,
    #[serde(default)]
    pub plan: Option<WeeklySchedule>,
    #[serde(rename = "model", default)]
    pub models: BTreeMap<String, ModelOutput>,
    #[serde(rename = "bbox", default)]
    pub regions: RegionConfig,
    /// Factor mapping model coordinates to overlay coordinates.
    #[serde(default = "default_scale")]
    pub scale: f32,
    #[serde(rename = "frame_interval", default)]
    pub frame_interval_ms: f64,
    #[serde(rename = "alert_label", default)]
    pub alert_labels: Vec<String>,
    #[serde(default)]
    pub alg_type: Option<String>,
    /// Algorithm parameters, interpreted by the rule.
    #[serde(rename = "reserved_args", default)]
    pub params: Value,
    #[serde(rename = "reserved_data", default)]
    pub continuation: Option<ReinferContinuation>,
    /// Image the overlay is drawn on.
    #[serde(rename = "draw_image", default)]
    pub image: Option<ImagePayload>,
    /// `[width, height]` of `image`, when the host reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size: Option<[u32; 2]>,
}

impl FrameContext {
    pub fn new(time: f64) -> Self {
        Self {
            time,
            plan: None,
            models: BTreeMap::new(),
            regions: RegionConfig::default(),
            scale: 1.0,
            frame_interval_ms: 0.0,
            alert_labels: Vec::new(),
            alg_type: None,
            params: Value::Null,
            continuation: None,
            image: None,
            image_size: None,
        }
    }

    pub fn with_model(mut self, name: impl Into<String>, output: ModelOutput) -> Self {
        self.models.insert(name.into(), output);
        self
    }

    pub fn with_regions(mut self, regions: RegionConfig) -> Self {
        self.regions = regions;
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_frame_interval(mut self, frame_interval_ms: f64) -> Self {
        self.frame_interval_ms = frame_interval_ms;
        self
    }

    pub fn with_alert_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alert_labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_plan(mut self, plan: WeeklySchedule) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn with_continuation(mut self, continuation: ReinferContinuation) -> Self {
        self.continuation = Some(continuation);
        self
    }

    pub fn with_image(mut self, image: ImagePayload) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_image_size(mut self, width: u32, height: u32) -> Self {
        self.image_size = Some([width, height]);
        self
    }

    /// The carried re-inference payload, if this frame continues one.
    ///
    /// An empty payload does not count as a continuation.
    pub fn continuation(&self) -> Option<&ReinferContinuation> {
        self.continuation
            .as_ref()
            .filter(|c| !c.specified_model.is_empty() || !c.context.is_null())
    }

    pub fn correlation_key(&self) -> CorrelationKey {
        CorrelationKey::from_seconds(self.time)
    }
}
