use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::frame::ImagePayload;
use super::region::{AnnotatedLine, AnnotatedPolygon};
use super::target::DetectionTarget;

/// Boxes, regions and lines to draw for a frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Overlay {
    pub rectangles: Vec<DetectionTarget>,
    pub polygons: BTreeMap<String, AnnotatedPolygon>,
    pub lines: BTreeMap<String, AnnotatedLine>,
}

/// Similarity group a face-style rule matched against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultData {
    pub bbox: Overlay,
    pub custom: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupInfo>,
}

/// Alert decision and overlay for one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertResult {
    pub hit: bool,
    pub data: ResultData,
}

impl AlertResult {
    pub fn new(hit: bool) -> Self {
        Self {
            hit,
            ..Self::default()
        }
    }

    pub fn with_rectangles(mut self, rectangles: impl IntoIterator<Item = DetectionTarget>) -> Self {
        self.data.bbox.rectangles.extend(rectangles);
        self
    }

    pub fn with_polygons(mut self, polygons: BTreeMap<String, AnnotatedPolygon>) -> Self {
        self.data.bbox.polygons.extend(polygons);
        self
    }

    pub fn with_lines(mut self, lines: BTreeMap<String, AnnotatedLine>) -> Self {
        self.data.bbox.lines.extend(lines);
        self
    }

    pub fn with_group(mut self, group: GroupInfo) -> Self {
        self.data.group = Some(group);
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.custom.insert(key.into(), value.into());
        self
    }
}

/// What a rule concluded for a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Final result for this frame.
    Complete(AlertResult),
    /// The frame is waiting on re-inference; no result this tick.
    Deferred,
    /// A completed correlation group finalised an earlier frame. The
    /// annotated frame is that earlier frame's image.
    Resumed {
        result: AlertResult,
        image: Option<ImagePayload>,
    },
}

/// Return value of [`super::PostprocessingPipeline::process`].
#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutcome {
    /// Whether `result` is a real decision that should be published.
    pub accepted: bool,
    pub result: AlertResult,
    /// The image the overlay belongs to.
    pub frame: Option<ImagePayload>,
}

impl FrameOutcome {
    /// Empty, unpublished outcome.
    pub fn skipped(frame: Option<ImagePayload>) -> Self {
        Self {
            accepted: false,
            result: AlertResult::default(),
            frame,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_result_shape() {
        let value = serde_json::to_value(AlertResult::default()).unwrap();
        assert_eq!(
            value,
            json!({
                "hit": false,
                "data": {
                    "bbox": {"rectangles": [], "polygons": {}, "lines": {}},
                    "custom": {}
                }
            })
        );
    }

    #[test]
    fn test_group_is_serialized_when_present() {
        let result = AlertResult::new(true).with_group(GroupInfo {
            id: Some("g1".into()),
            name: None,
        });
        let value = serde_json::to_value(result).unwrap();
        assert_eq!(value["data"]["group"]["id"], "g1");
    }
}
