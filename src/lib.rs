//! Post-processing for video alerting.
//!
//! Each camera source gets a [`PostprocessingPipeline`] bound to one
//! algorithm. Per frame it filters the raw model outputs, hands them to the
//! algorithm's [`Rule`] and returns an [`AlertResult`] overlay. The crate
//! also carries the pieces rules are built from: geometry predicates,
//! [`RatioWindow`] smoothing, ByteTrack tracking with track reaping, line
//! crossing counters and a correlator for results that need a second
//! inference pass.
//!
//! ```no_run
//! use std::sync::Arc;
//! use vigil_rs::{FrameContext, PostprocessingPipeline, SharedContext};
//!
//! let shared = Arc::new(SharedContext::default());
//! let mut pipeline = PostprocessingPipeline::new("cam-1", "intrusion", shared)?;
//! let outcome = pipeline.process(FrameContext::new(0.0));
//! assert!(!outcome.result.hit);
//! # Ok::<(), vigil_rs::PostprocessError>(())
//! ```

pub mod counting;
pub mod error;
pub mod geometry;
pub mod pipeline;
pub mod reinfer;
pub mod rules;
pub mod tracker;
pub mod window;

pub use counting::{CrossLineCounter, Crossing, LineCount, LineDirection};
pub use error::{PostprocessError, Result};
pub use geometry::{AnchorStrategy, Point, Rect, Segment};
pub use pipeline::{
    AlertResult, DetectionTarget, FrameContext, FrameOutcome, PostprocessingPipeline, Rule,
    RuleRegistry, SharedContext,
};
pub use reinfer::{CorrelationKey, ReinferCorrelator, ReinferRequest, ReinferSink};
pub use tracker::{ByteTracker, ObjectTracker, TrackContinuity, TrackerConfig};
pub use window::{Observation, RatioWindow};
