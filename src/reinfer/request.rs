use crossbeam_channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PostprocessError, Result};
use crate::geometry::Rect;
use crate::pipeline::ImagePayload;

use super::CorrelationKey;

/// A secondary inference pass commissioned mid-decision.
///
/// The core only builds these; a [`ReinferSink`] hands them to whatever
/// transport feeds the inference workers. The answer comes back as a new
/// frame for the same source whose `time` equals the originating frame's
/// and whose carried [`ReinferContinuation`] echoes `correlation_context`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReinferRequest {
    pub source_id: String,
    /// Originating frame time in microseconds.
    pub time: i64,
    /// Frame the sub-image is cut from.
    pub image: Option<ImagePayload>,
    /// Region of `image` to run inference on; `None` means the whole frame.
    ///
    /// Never negative. It is clipped to the image only when the frame
    /// carried `image_size`, so the receiver must clip it otherwise.
    pub crop: Option<Rect>,
    /// Consecutive frames inferred together as one clip, each cut to
    /// `crop`; takes the place of `image` when set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub batch: Vec<ImagePayload>,
    /// Models the continuation frame must be inferred with.
    pub model_selector: Vec<String>,
    pub correlation_context: Value,
}

impl ReinferRequest {
    pub fn new(source_id: impl Into<String>, key: CorrelationKey) -> Self {
        Self {
            source_id: source_id.into(),
            time: key.as_micros(),
            image: None,
            crop: None,
            batch: Vec::new(),
            model_selector: Vec::new(),
            correlation_context: Value::Null,
        }
    }

    pub fn image(mut self, image: Option<ImagePayload>) -> Self {
        self.image = image;
        self
    }

    pub fn crop(mut self, crop: Rect) -> Self {
        self.crop = Some(crop);
        self
    }

    pub fn batch(mut self, batch: impl IntoIterator<Item = ImagePayload>) -> Self {
        self.batch = batch.into_iter().collect();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model_selector.push(model.into());
        self
    }

    pub fn context(mut self, context: Value) -> Self {
        self.correlation_context = context;
        self
    }
}

/// Marks a frame as the answer to an earlier [`ReinferRequest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReinferContinuation {
    #[serde(default)]
    pub specified_model: Vec<String>,
    /// The request's `correlation_context`, returned untouched.
    #[serde(default)]
    pub context: Value,
}

/// Outbound submission channel for re-inference work.
///
/// Implementations must not block the calling pipeline.
pub trait ReinferSink: Send + Sync {
    fn submit(&self, request: ReinferRequest) -> Result<()>;
}

impl ReinferSink for Sender<ReinferRequest> {
    fn submit(&self, request: ReinferRequest) -> Result<()> {
        self.try_send(request).map_err(|e| match e {
            TrySendError::Full(_) => PostprocessError::Dispatch("submission queue full".into()),
            TrySendError::Disconnected(_) => {
                PostprocessError::Dispatch("submission queue disconnected".into())
            }
        })
    }
}

/// Sink that rejects every request; for hosts that never re-infer.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSink;

impl ReinferSink for DisabledSink {
    fn submit(&self, _request: ReinferRequest) -> Result<()> {
        Err(PostprocessError::Dispatch(
            "re-inference is not configured".into(),
        ))
    }
}
