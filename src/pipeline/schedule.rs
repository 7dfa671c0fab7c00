use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Local, Timelike};
use serde::{Deserialize, Serialize};

/// Weekly activation plan: ISO weekday (1 = Monday .. 7 = Sunday) to a list
/// of `[start, end)` second-of-day windows.
///
/// A weekday missing from the plan is inactive for the whole day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeeklySchedule {
    days: BTreeMap<u8, Vec<[f64; 2]>>,
}

impl WeeklySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(mut self, weekday: u8, start: f64, end: f64) -> Self {
        self.days.entry(weekday).or_default().push([start, end]);
        self
    }

    /// Whether the plan is active at unix time `timestamp`, in local time.
    pub fn is_active(&self, timestamp: f64) -> bool {
        let secs = timestamp.floor();
        let nanos = ((timestamp - secs) * 1e9) as u32;
        let Some(utc) = DateTime::from_timestamp(secs as i64, nanos) else {
            return false;
        };
        let local = utc.with_timezone(&Local);
        let weekday = local.weekday().number_from_monday() as u8;
        let day_second = f64::from(local.num_seconds_from_midnight())
            + f64::from(local.nanosecond()) / 1e9;
        self.is_active_at(weekday, day_second)
    }

    pub fn is_active_at(&self, weekday: u8, day_second: f64) -> bool {
        self.days.get(&weekday).is_some_and(|windows| {
            windows
                .iter()
                .any(|[start, end]| *start <= day_second && day_second < *end)
        })
    }
}

/// `None` means no plan was configured, which is always active.
pub fn in_plan(plan: Option<&WeeklySchedule>, timestamp: f64) -> bool {
    plan.is_none_or(|p| p.is_active(timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_windows_are_half_open() {
        let plan = WeeklySchedule::new().with_window(1, 3600.0, 7200.0);
        assert!(plan.is_active_at(1, 3600.0));
        assert!(plan.is_active_at(1, 7199.5));
        assert!(!plan.is_active_at(1, 7200.0));
        assert!(!plan.is_active_at(2, 5000.0));
    }

    #[test]
    fn test_deserialize_string_keys() {
        let plan: WeeklySchedule =
            serde_json::from_value(json!({"3": [[0, 43200]], "7": []})).unwrap();
        assert!(plan.is_active_at(3, 100.0));
        assert!(!plan.is_active_at(7, 100.0));
    }

    #[test]
    fn test_local_time_evaluation() {
        // Wednesday 2024-01-03 10:30:00 local
        let local = Local.with_ymd_and_hms(2024, 1, 3, 10, 30, 0).unwrap();
        let ts = local.timestamp() as f64;
        let plan = WeeklySchedule::new().with_window(3, 36000.0, 39600.0);
        assert!(plan.is_active(ts));
        assert!(!WeeklySchedule::new().with_window(4, 0.0, 86400.0).is_active(ts));
        assert!(in_plan(None, ts));
    }
}
