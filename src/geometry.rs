//! Geometric predicates behind region and line rules.
//!
//! Every predicate is total: degenerate shapes produce zero areas or
//! non-matches rather than errors.

mod point;
mod polygon;
mod rect;

pub use point::{Point, Segment, segment_intersect};
pub use polygon::point_in_polygon;
pub use rect::{AnchorStrategy, Rect};

/// Anchor `rect` with `strategy` and test the point against `polygon`.
pub fn rect_in_polygon(rect: &Rect, polygon: &[Point], strategy: AnchorStrategy) -> bool {
    point_in_polygon(rect.anchor(strategy), polygon)
}
