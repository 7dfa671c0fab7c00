use serde::{Deserialize, Serialize};

use super::point::Point;

/// Axis-aligned rectangle in XYXY form (top-left, bottom-right).
///
/// Also converts to and from the two formats the tracker works in:
/// - TLWH: Top-Left X, Top-Left Y, Width, Height
/// - XYAH: Center X, Center Y, Aspect Ratio (w/h), Height
///
/// Serialises as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct Rect {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl From<[f32; 4]> for Rect {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<Rect> for [f32; 4] {
    fn from(r: Rect) -> Self {
        r.to_xyxy()
    }
}

impl Rect {
    #[inline]
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Create a Rect from TLWH format.
    #[inline]
    pub fn from_tlwh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    /// Create a Rect from XYAH format (center x, center y, aspect ratio, height).
    #[inline]
    pub fn from_xyah(cx: f32, cy: f32, aspect_ratio: f32, height: f32) -> Self {
        let width = aspect_ratio * height;
        Self::from_tlwh(cx - width / 2.0, cy - height / 2.0, width, height)
    }

    #[inline]
    pub fn to_xyxy(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    /// Convert to XYAH format: (center_x, center_y, aspect_ratio, height).
    #[inline]
    pub fn to_xyah(&self) -> [f32; 4] {
        let (cx, cy) = self.center().into();
        let height = self.height();
        let aspect_ratio = if height > 0.0 {
            self.width() / height
        } else {
            0.0
        };
        [cx, cy, aspect_ratio, height]
    }

    #[inline]
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    #[inline]
    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    /// Area of the rectangle; inverted rectangles have zero area.
    #[inline]
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    #[inline]
    pub fn center(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Representative point of the rectangle for geometric tests.
    pub fn anchor(&self, strategy: AnchorStrategy) -> Point {
        let cx = (self.x1 + self.x2) / 2.0;
        let cy = (self.y1 + self.y2) / 2.0;
        match strategy {
            AnchorStrategy::Center => Point::new(cx, cy),
            AnchorStrategy::Bottom => Point::new(cx, self.y2),
            AnchorStrategy::Top => Point::new(cx, self.y1),
            AnchorStrategy::Left => Point::new(self.x1, cy),
            AnchorStrategy::Right => Point::new(self.x2, cy),
        }
    }

    /// Multiply every coordinate by `factor`, truncating to whole pixels.
    pub fn scale(&self, factor: f32) -> Self {
        Self::new(
            (self.x1 * factor).trunc(),
            (self.y1 * factor).trunc(),
            (self.x2 * factor).trunc(),
            (self.y2 * factor).trunc(),
        )
    }

    pub fn translate(&self, dx: f32, dy: f32) -> Self {
        Self::new(self.x1 + dx, self.y1 + dy, self.x2 + dx, self.y2 + dy)
    }

    /// Area shared by both rectangles, zero when they are disjoint.
    pub fn overlap_area(&self, other: &Rect) -> f32 {
        let inter_width = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let inter_height = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        inter_width * inter_height
    }

    /// Calculate Intersection over Union (IoU) with another rectangle.
    pub fn iou(&self, other: &Rect) -> f32 {
        let inter_area = self.overlap_area(other);
        let union_area = self.area() + other.area() - inter_area;

        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }

    /// Fraction of this rectangle's own area lying inside `container`.
    ///
    /// Unlike [`Rect::iou`] this is asymmetric: a head box fully inside a
    /// person box yields 1.0 regardless of how large the person box is.
    pub fn containment_ratio(&self, container: &Rect) -> f32 {
        let area = self.area();
        if area > 0.0 {
            self.overlap_area(container) / area
        } else {
            0.0
        }
    }

    /// True when the rectangles overlap or touch.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x1.max(other.x1) <= self.x2.min(other.x2)
            && self.y1.max(other.y1) <= self.y2.min(other.y2)
    }

    /// Inclusive point containment.
    pub fn contains_point(&self, point: Point) -> bool {
        self.x1 <= point.x && point.x <= self.x2 && self.y1 <= point.y && point.y <= self.y2
    }
}

/// Which point of a rectangle stands in for the whole box.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorStrategy {
    #[default]
    Center,
    /// Middle of the bottom edge, e.g. where a person's feet are.
    Bottom,
    Top,
    Left,
    Right,
}

impl AnchorStrategy {
    /// Parse a strategy name; anything unrecognised falls back to `Center`.
    pub fn parse_lenient(name: &str) -> Self {
        match name {
            "center" => Self::Center,
            "bottom" => Self::Bottom,
            "top" => Self::Top,
            "left" => Self::Left,
            "right" => Self::Right,
            other => {
                tracing::warn!(strategy = other, "invalid anchor strategy, using center");
                Self::Center
            }
        }
    }
}

impl<'de> Deserialize<'de> for AnchorStrategy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(Self::parse_lenient(&name))
    }
}
