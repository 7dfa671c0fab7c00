//! Asynchronous multi-part re-inference.
//!
//! Some rules cannot decide from first-stage detections alone. They send
//! sub-images back for a second model pass and park the frame in a
//! [`ReinferCorrelator`] until every part has returned.

mod correlator;
mod request;

pub use correlator::{CompletedGroup, CorrelationKey, ReinferCorrelator, Submission};
pub use request::{DisabledSink, ReinferContinuation, ReinferRequest, ReinferSink};
