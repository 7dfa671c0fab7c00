use serde::Deserialize;

use crate::counting::CrossLineCounter;
use crate::error::Result;
use crate::geometry::{AnchorStrategy, Rect};
use crate::pipeline::{AlertResult, Color, Decision, FilteredTargets, Rule, RuleScope};
use crate::tracker::{ByteTracker, TrackContinuity};

use super::track_continuity;

#[derive(Debug, Default, Deserialize)]
struct CountingParams {
    #[serde(default)]
    strategy: AnchorStrategy,
}

/// Counts tracked targets crossing the configured lines.
///
/// Registered as `cross_line_counting` and `truck_counting`. A frame is a
/// hit when at least one target crossed a line on it.
#[derive(Default)]
pub struct CrossLineCounting {
    counter: Option<CrossLineCounter>,
    tracks: Option<TrackContinuity<ByteTracker, Option<Rect>>>,
}

fn build_counter(scope: &RuleScope<'_>) -> Result<CrossLineCounter> {
    let params: CountingParams = scope.params()?;
    let counter = CrossLineCounter::from_lines(&scope.regions().lines, params.strategy);
    tracing::info!(
        source_id = %scope.source_id(),
        alg_name = %scope.alg_name(),
        lines = counter.len(),
        "line counter configured"
    );
    Ok(counter)
}

impl Rule for CrossLineCounting {
    fn decide(&mut self, scope: &mut RuleScope<'_>, targets: FilteredTargets) -> Result<Decision> {
        let counter = match self.counter.take() {
            Some(counter) => counter,
            None => build_counter(scope)?,
        };
        let counter = self.counter.insert(counter);
        let targets = targets.into_first().map(|(_, t)| t).unwrap_or_default();
        let tracks = self.tracks.get_or_insert_with(|| track_continuity(scope));
        let tracked = tracks.update(targets, |_, _| None);

        let mut hit = false;
        let mut rectangles = Vec::with_capacity(tracked.len());
        for (id, target) in tracked {
            let Some(previous) = tracks.state_mut(id) else {
                continue;
            };
            let crossed = previous
                .replace(target.rect)
                .and_then(|before| counter.observe(&before, &target.rect))
                .is_some();
            let target = target.with_ext("track_id", id);
            if crossed {
                hit = true;
                rectangles.push(target.alerted(None));
            } else {
                rectangles.push(target.with_color(Color::NORMAL));
            }
        }

        Ok(Decision::Complete(
            AlertResult::new(hit)
                .with_rectangles(rectangles)
                .with_polygons(scope.annotated_polygons())
                .with_lines(counter.annotated_lines()),
        ))
    }
}
