use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::counting::LineCount;
use crate::geometry::{AnchorStrategy, Point, Rect, Segment, rect_in_polygon};

use super::target::{Color, Ext};

/// Configured polygon gating which detections count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionOfInterest {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub polygon: Vec<Point>,
}

impl RegionOfInterest {
    pub fn contains(&self, rect: &Rect, strategy: AnchorStrategy) -> bool {
        rect_in_polygon(rect, &self.polygon, strategy)
    }
}

/// Configured line used by counting rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineOfInterest {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub line: Segment,
    /// Direction code such as `l-r+`; see [`crate::LineDirection`].
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub action: Value,
    /// Running totals restored by the host, if it persists them.
    #[serde(default, alias = "result")]
    pub initial: Option<LineCount>,
}

/// Regions and lines configured for a source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    #[serde(default)]
    pub polygons: Vec<RegionOfInterest>,
    #[serde(default)]
    pub lines: Vec<LineOfInterest>,
}

impl RegionConfig {
    /// True when no polygons are configured or the anchor of `rect` lies in
    /// at least one of them.
    pub fn admits(&self, rect: &Rect, strategy: AnchorStrategy) -> bool {
        self.polygons.is_empty() || self.polygons.iter().any(|p| p.contains(rect, strategy))
    }

    /// Smallest box holding every polygon vertex; `None` without polygons.
    pub fn bounding_rect(&self) -> Option<Rect> {
        let mut points = self.polygons.iter().flat_map(|p| p.polygon.iter());
        let first = points.next()?;
        let seed = Rect::new(first.x, first.y, first.x, first.y);
        Some(points.fold(seed, |r, p| {
            Rect::new(r.x1.min(p.x), r.y1.min(p.y), r.x2.max(p.x), r.y2.max(p.y))
        }))
    }

    /// A fresh overlay copy of every configured polygon.
    pub fn annotated_polygons(&self) -> BTreeMap<String, AnnotatedPolygon> {
        self.polygons
            .iter()
            .map(|p| (p.id.clone(), AnnotatedPolygon::from_config(p)))
            .collect()
    }
}

/// Per-frame overlay copy of a [`RegionOfInterest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedPolygon {
    pub name: Option<String>,
    pub polygon: Vec<Point>,
    pub color: Color,
    #[serde(default)]
    pub ext: Ext,
}

impl AnnotatedPolygon {
    pub fn from_config(region: &RegionOfInterest) -> Self {
        Self {
            name: region.name.clone(),
            polygon: region.polygon.clone(),
            color: Color::MARKER,
            ext: Ext::new(),
        }
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn with_ext(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ext.insert(key.into(), value.into());
        self
    }
}

/// Per-frame overlay copy of a [`LineOfInterest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedLine {
    pub name: Option<String>,
    pub line: Segment,
    pub color: Color,
    #[serde(default)]
    pub ext: Ext,
}

impl AnnotatedLine {
    pub fn from_config(line: &LineOfInterest) -> Self {
        Self {
            name: line.name.clone(),
            line: line.line,
            color: Color::MARKER,
            ext: Ext::new(),
        }
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn with_ext(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ext.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> RegionConfig {
        serde_json::from_value(json!({
            "polygons": [
                {"id": "p1", "name": "door", "polygon": [[0, 0], [10, 0], [10, 10], [0, 10]]}
            ],
            "lines": [
                {"id": "l1", "name": "gate", "line": [[5, 0], [5, 10]], "direction": "l-r+"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_admits_by_anchor() {
        let regions = config();
        let inside = Rect::new(2.0, 2.0, 4.0, 4.0);
        let outside = Rect::new(20.0, 20.0, 30.0, 30.0);
        assert!(regions.admits(&inside, AnchorStrategy::Center));
        assert!(!regions.admits(&outside, AnchorStrategy::Center));
        assert!(RegionConfig::default().admits(&outside, AnchorStrategy::Center));
    }

    #[test]
    fn test_bounding_rect_spans_all_polygons() {
        let mut regions = config();
        assert_eq!(regions.bounding_rect(), Some(Rect::new(0.0, 0.0, 10.0, 10.0)));
        regions.polygons.push(RegionOfInterest {
            id: "p2".into(),
            name: None,
            polygon: vec![Point::new(30.0, 5.0), Point::new(40.0, -2.0), Point::new(35.0, 8.0)],
        });
        assert_eq!(regions.bounding_rect(), Some(Rect::new(0.0, -2.0, 40.0, 10.0)));
        assert_eq!(RegionConfig::default().bounding_rect(), None);
    }

    #[test]
    fn test_annotated_copies_leave_config_alone() {
        let regions = config();
        let polygons = regions.annotated_polygons();
        let alerted = polygons["p1"].clone().with_color(Color::ALERT);
        assert_eq!(alerted.color, Color::ALERT);
        assert_eq!(regions.annotated_polygons()["p1"].color, Color::MARKER);
        assert_eq!(regions.lines[0].direction.as_deref(), Some("l-r+"));
    }
}
