use serde::{Deserialize, Serialize};

/// 2D point in image coordinates. Serialises as `[x, y]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 2]", into = "[f32; 2]")]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    #[inline]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl From<[f32; 2]> for Point {
    fn from(v: [f32; 2]) -> Self {
        Self::new(v[0], v[1])
    }
}

impl From<Point> for [f32; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

impl From<(f32, f32)> for Point {
    fn from((x, y): (f32, f32)) -> Self {
        Self::new(x, y)
    }
}

impl From<Point> for (f32, f32) {
    fn from(p: Point) -> Self {
        (p.x, p.y)
    }
}

/// Line segment between two points. Serialises as `[[x, y], [x, y]]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[Point; 2]", into = "[Point; 2]")]
pub struct Segment {
    pub start: Point,
    pub end: Point,
}

impl Segment {
    #[inline]
    pub fn new(start: Point, end: Point) -> Self {
        Self { start, end }
    }

    /// True when `point` lies within the segment's bounding box.
    fn bounds_contain(&self, point: Point) -> bool {
        let (s, e) = (self.start, self.end);
        s.x.min(e.x) <= point.x
            && point.x <= s.x.max(e.x)
            && s.y.min(e.y) <= point.y
            && point.y <= s.y.max(e.y)
    }

    /// Exact on-segment test.
    ///
    /// Axis-aligned segments only need the bounding-box check; other
    /// segments additionally require the point to be collinear.
    pub fn contains(&self, point: Point) -> bool {
        if !self.bounds_contain(point) {
            return false;
        }
        let (s, e) = (self.start, self.end);
        if s.x == e.x || s.y == e.y {
            return true;
        }
        cross(s, e, point) == 0.0
    }

    /// Whether the two segments touch or cross.
    pub fn intersects(&self, other: &Segment) -> bool {
        segment_intersect(self, other)
    }
}

impl From<[Point; 2]> for Segment {
    fn from(v: [Point; 2]) -> Self {
        Self::new(v[0], v[1])
    }
}

impl From<Segment> for [Point; 2] {
    fn from(s: Segment) -> Self {
        [s.start, s.end]
    }
}

/// Cross product of `origin -> a` and `origin -> b`.
#[inline]
fn cross(origin: Point, a: Point, b: Point) -> f64 {
    let (x1, y1) = ((a.x - origin.x) as f64, (a.y - origin.y) as f64);
    let (x2, y2) = ((b.x - origin.x) as f64, (b.y - origin.y) as f64);
    x1 * y2 - x2 * y1
}

/// Segment intersection via bounding-box rejection then the straddle test.
///
/// Endpoints touching the other segment count as intersecting.
pub fn segment_intersect(a: &Segment, b: &Segment) -> bool {
    let (p1, p2, p3, p4) = (a.start, a.end, b.start, b.end);

    let boxes_overlap = p1.x.min(p2.x) <= p3.x.max(p4.x)
        && p3.x.min(p4.x) <= p1.x.max(p2.x)
        && p1.y.min(p2.y) <= p3.y.max(p4.y)
        && p3.y.min(p4.y) <= p1.y.max(p2.y);
    if !boxes_overlap {
        return false;
    }

    cross(p1, p2, p3) * cross(p1, p2, p4) <= 0.0 && cross(p3, p4, p1) * cross(p3, p4, p2) <= 0.0
}
