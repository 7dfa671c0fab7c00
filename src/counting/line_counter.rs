use std::collections::BTreeMap;
use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::geometry::{AnchorStrategy, Rect};
use crate::pipeline::{AnnotatedLine, LineOfInterest};

use super::direction::{Crossing, LineDirection, classify_crossing};

/// Running totals for one line.
///
/// Totals only ever add, so merging partial counts is associative and
/// commutative and frames may be merged in any order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineCount {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub increase: u64,
    #[serde(default)]
    pub decrease: u64,
    /// `increase - decrease` over everything merged so far.
    #[serde(default)]
    pub delta: i64,
}

impl LineCount {
    pub fn apply(&mut self, crossing: Crossing) {
        *self += LineCount::from(crossing);
    }

    pub fn merge(&mut self, other: &LineCount) {
        *self += *other;
    }
}

impl From<Crossing> for LineCount {
    fn from(crossing: Crossing) -> Self {
        match crossing {
            Crossing::Count => Self {
                count: 1,
                ..Self::default()
            },
            Crossing::Increase => Self {
                increase: 1,
                delta: 1,
                ..Self::default()
            },
            Crossing::Decrease => Self {
                decrease: 1,
                delta: -1,
                ..Self::default()
            },
        }
    }
}

impl AddAssign for LineCount {
    fn add_assign(&mut self, rhs: Self) {
        self.count += rhs.count;
        self.increase += rhs.increase;
        self.decrease += rhs.decrease;
        self.delta += rhs.delta;
    }
}

#[derive(Debug, Clone)]
struct CountedLine {
    config: LineOfInterest,
    direction: LineDirection,
    count: LineCount,
}

/// Counts tracked targets crossing configured lines.
///
/// Lines are kept in the order they were configured; that order decides
/// which line a move counts against when it crosses several.
#[derive(Debug, Clone)]
pub struct CrossLineCounter {
    lines: Vec<CountedLine>,
    strategy: AnchorStrategy,
}

impl CrossLineCounter {
    pub fn new(strategy: AnchorStrategy) -> Self {
        Self {
            lines: Vec::new(),
            strategy,
        }
    }

    /// Build a counter over `lines`.
    ///
    /// Lines without a valid direction code are skipped with a warning.
    pub fn from_lines<'a>(
        lines: impl IntoIterator<Item = &'a LineOfInterest>,
        strategy: AnchorStrategy,
    ) -> Self {
        let mut counter = Self::new(strategy);
        for line in lines {
            if let Err(err) = counter.add_line(line.clone()) {
                tracing::warn!(line_id = %line.id, %err, "line skipped");
            }
        }
        counter
    }

    /// Append a line, or replace the line with the same id in place.
    pub fn add_line(&mut self, line: LineOfInterest) -> Result<()> {
        let direction: LineDirection = line.direction.as_deref().unwrap_or_default().parse()?;
        let counted = CountedLine {
            count: line.initial.unwrap_or_default(),
            config: line,
            direction,
        };
        match self.lines.iter_mut().find(|l| l.config.id == counted.config.id) {
            Some(slot) => *slot = counted,
            None => self.lines.push(counted),
        }
        Ok(())
    }

    /// Count the move `previous -> current` against the first line it
    /// crosses, in configured order.
    pub fn observe(&mut self, previous: &Rect, current: &Rect) -> Option<(&str, Crossing)> {
        let from = previous.anchor(self.strategy);
        let to = current.anchor(self.strategy);
        self.lines.iter_mut().find_map(|line| {
            let crossing = classify_crossing(from, to, &line.config.line, line.direction)?;
            line.count.apply(crossing);
            Some((line.config.id.as_str(), crossing))
        })
    }

    pub fn count(&self, line_id: &str) -> Option<&LineCount> {
        self.lines
            .iter()
            .find(|l| l.config.id == line_id)
            .map(|l| &l.count)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Fresh overlay entries for every line with its running result.
    pub fn annotated_lines(&self) -> BTreeMap<String, AnnotatedLine> {
        self.lines
            .iter()
            .map(|l| {
                let annotated = AnnotatedLine::from_config(&l.config)
                    .with_ext("direction", l.direction.code())
                    .with_ext("action", l.config.action.clone())
                    .with_ext("result", serde_json::to_value(l.count).unwrap_or_default());
                (l.config.id.clone(), annotated)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point, Segment};

    fn line(id: &str, direction: &str) -> LineOfInterest {
        LineOfInterest {
            id: id.to_string(),
            name: None,
            line: Segment::new(Point::new(5.0, 0.0), Point::new(5.0, 100.0)),
            direction: Some(direction.to_string()),
            action: serde_json::Value::Null,
            initial: None,
        }
    }

    fn box_at(x: f32) -> Rect {
        Rect::new(x - 1.0, 10.0, x + 1.0, 20.0)
    }

    #[test]
    fn test_increase_then_decrease_merges_to_zero_delta() {
        let mut counter = CrossLineCounter::from_lines([&line("a", "l-r+")], AnchorStrategy::Center);

        let first = counter.observe(&box_at(2.0), &box_at(8.0));
        assert_eq!(first, Some(("a", Crossing::Increase)));
        let second = counter.observe(&box_at(8.0), &box_at(2.0));
        assert_eq!(second, Some(("a", Crossing::Decrease)));

        let count = counter.count("a").unwrap();
        assert_eq!(count.increase, 1);
        assert_eq!(count.decrease, 1);
        assert_eq!(count.delta, 0);
        assert_eq!(count.count, 0);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let parts = [
            LineCount::from(Crossing::Increase),
            LineCount::from(Crossing::Decrease),
            LineCount::from(Crossing::Increase),
            LineCount::from(Crossing::Count),
        ];
        let mut forward = LineCount::default();
        parts.iter().for_each(|p| forward.merge(p));
        let mut backward = LineCount::default();
        parts.iter().rev().for_each(|p| backward.merge(p));

        assert_eq!(forward, backward);
        assert_eq!(
            forward,
            LineCount {
                count: 1,
                increase: 2,
                decrease: 1,
                delta: 1
            }
        );
    }

    #[test]
    fn test_invalid_direction_is_skipped() {
        let counter = CrossLineCounter::from_lines(
            [&line("ok", "r+"), &line("bad", "sideways")],
            AnchorStrategy::Center,
        );
        assert_eq!(counter.len(), 1);
        assert!(counter.count("bad").is_none());
    }

    #[test]
    fn test_first_configured_line_wins() {
        // both lines sit on x = 5; "9" is configured before "10"
        let mut counter = CrossLineCounter::from_lines(
            [&line("9", "l-r+"), &line("10", "r+")],
            AnchorStrategy::Center,
        );
        assert_eq!(counter.observe(&box_at(2.0), &box_at(8.0)), Some(("9", Crossing::Increase)));
        assert_eq!(counter.count("10").unwrap().count, 0);

        let mut reconfigured = line("9", "r+");
        reconfigured.initial = Some(LineCount {
            count: 3,
            ..LineCount::default()
        });
        counter.add_line(reconfigured).unwrap();
        assert_eq!(counter.len(), 2);
        assert_eq!(counter.observe(&box_at(2.0), &box_at(8.0)), Some(("9", Crossing::Count)));
        assert_eq!(counter.count("9").unwrap().count, 4);
    }

    #[test]
    fn test_count_only_line_and_seeded_total() {
        let mut seeded = line("a", "r+");
        seeded.initial = Some(LineCount {
            count: 41,
            ..LineCount::default()
        });
        let mut counter = CrossLineCounter::from_lines([&seeded], AnchorStrategy::Bottom);
        assert_eq!(counter.observe(&box_at(8.0), &box_at(2.0)), None);
        counter.observe(&box_at(2.0), &box_at(8.0));
        assert_eq!(counter.count("a").unwrap().count, 42);

        let lines = counter.annotated_lines();
        let result = &lines["a"].ext["result"];
        assert_eq!(result["count"], 42);
        assert_eq!(lines["a"].ext["direction"], "r+");
    }
}
