//! Directional line-crossing counts.

mod direction;
mod line_counter;

pub use direction::{Crossing, LineDirection, classify_crossing};
pub use line_counter::{CrossLineCounter, LineCount};
