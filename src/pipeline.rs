//! Per-source frame orchestration and the data it moves around.

mod context;
mod frame;
mod palette;
mod postprocessor;
mod region;
mod result;
mod rule;
mod schedule;
mod target;

pub use context::{IndexRecord, SharedContext, SharedContextBuilder, SimilarityIndex};
pub use frame::{
    ClassScores, EngineResult, FrameContext, ImagePayload, LabelConfig, ModelArgs, ModelConfig,
    ModelOutput, RawDetection,
};
pub use palette::{DEFAULT_COLOR_POOL, LabelPalette};
pub use postprocessor::PostprocessingPipeline;
pub use region::{AnnotatedLine, AnnotatedPolygon, LineOfInterest, RegionConfig, RegionOfInterest};
pub use result::{AlertResult, Decision, FrameOutcome, GroupInfo, Overlay, ResultData};
pub use rule::{FilteredTargets, Rule, RuleFactory, RuleRegistry, RuleScope, SourceSettings};
pub use schedule::{WeeklySchedule, in_plan};
pub use target::{Color, DetectionTarget, Ext};
