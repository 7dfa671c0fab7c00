//! Error taxonomy shared by every stage of post-processing.

use thiserror::Error;

/// Errors raised while post-processing a frame.
///
/// None of these escape [`crate::PostprocessingPipeline::process`]; the
/// pipeline logs them and degrades the frame to an empty "no hit" result.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PostprocessError {
    /// A required parameter was absent on first use.
    #[error("configuration missing: {detail}")]
    ConfigurationMissing { detail: String },

    /// An upstream model output the rule depends on was not in the frame.
    #[error("model result missing: {model}")]
    ModelResultMissing { model: String },

    /// A fragment arrived for a correlation group that no longer exists.
    #[error("correlation group {key} expired or was never opened")]
    CorrelationExpired { key: i64 },

    /// Degenerate or malformed geometry in configuration.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// No rule is registered under the requested algorithm name.
    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    /// A correlation group was opened without any dispatched request.
    #[error("correlation group {key} opened with zero expected parts")]
    EmptyCorrelation { key: i64 },

    /// A correlation group with the same key is still pending.
    #[error("correlation group {key} is already pending")]
    DuplicateCorrelation { key: i64 },

    /// The re-inference submission channel rejected a request.
    #[error("re-inference dispatch failed: {0}")]
    Dispatch(String),
}

impl PostprocessError {
    pub(crate) fn config(detail: impl Into<String>) -> Self {
        Self::ConfigurationMissing {
            detail: detail.into(),
        }
    }

    pub(crate) fn model_missing(model: impl Into<String>) -> Self {
        Self::ModelResultMissing {
            model: model.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PostprocessError>;
