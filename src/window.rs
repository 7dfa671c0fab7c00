//! Temporal smoothing of per-frame boolean decisions.

mod ratio_window;

pub use ratio_window::{Observation, RatioWindow};
