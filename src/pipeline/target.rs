use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::geometry::Rect;

/// Open extension map carried by annotated entities.
pub type Ext = serde_json::Map<String, Value>;

/// Drawing colour in BGR order. Serialises as `[b, g, r]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color(pub u8, pub u8, pub u8);

impl Color {
    /// Red
    pub const ALERT: Color = Color(0, 0, 255);
    /// Green
    pub const NORMAL: Color = Color(0, 255, 0);
    /// Blue, used for configured regions and lines.
    pub const MARKER: Color = Color(255, 0, 0);
}

impl Default for Color {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl From<[u8; 3]> for Color {
    fn from(v: [u8; 3]) -> Self {
        Color(v[0], v[1], v[2])
    }
}

/// One detected object as it flows through a frame's decision stages.
///
/// Stages produce updated copies through the `with_*` builders instead of
/// editing a shared record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionTarget {
    #[serde(rename = "xyxy")]
    pub rect: Rect,
    #[serde(rename = "conf", default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub color: Color,
    #[serde(default)]
    pub ext: Ext,
}

impl DetectionTarget {
    pub fn new(rect: Rect) -> Self {
        Self {
            rect,
            confidence: None,
            label: None,
            color: Color::NORMAL,
            ext: Ext::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn with_rect(mut self, rect: Rect) -> Self {
        self.rect = rect;
        self
    }

    pub fn with_ext(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ext.insert(key.into(), value.into());
        self
    }

    /// Recolour as an alert, optionally relabelling.
    pub fn alerted(self, label: Option<&str>) -> Self {
        let target = self.with_color(Color::ALERT);
        match label {
            Some(label) => target.with_label(label),
            None => target,
        }
    }

    pub fn ext(&self, key: &str) -> Option<&Value> {
        self.ext.get(key)
    }

    /// Remove an auxiliary attribute so it is not echoed in the result.
    pub fn take_ext(&mut self, key: &str) -> Option<Value> {
        self.ext.remove(key)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.label.as_deref() == Some(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builders_do_not_touch_original() {
        let base = DetectionTarget::new(Rect::new(0.0, 0.0, 1.0, 1.0)).with_label("person");
        let alerted = base.clone().alerted(Some("intruder"));
        assert_eq!(base.color, Color::NORMAL);
        assert_eq!(alerted.color, Color::ALERT);
        assert_eq!(alerted.label.as_deref(), Some("intruder"));
    }

    #[test]
    fn test_serialized_shape() {
        let target = DetectionTarget::new(Rect::new(1.0, 2.0, 3.0, 4.0))
            .with_confidence(0.5)
            .with_label("car")
            .with_ext("track_id", 3);
        let value = serde_json::to_value(&target).unwrap();
        assert_eq!(
            value,
            json!({
                "xyxy": [1.0, 2.0, 3.0, 4.0],
                "conf": 0.5,
                "label": "car",
                "color": [0, 255, 0],
                "ext": {"track_id": 3}
            })
        );
    }

    #[test]
    fn test_take_ext() {
        let mut target =
            DetectionTarget::new(Rect::default()).with_ext("feature", json!([0.1, 0.2]));
        assert!(target.take_ext("feature").is_some());
        assert!(target.ext("feature").is_none());
    }
}
