use serde::Serialize;
use time::{Duration, OffsetDateTime};

use super::repo_types::NutritionalInfo;

/// Number of records returned by a history request.
pub const HISTORY_LIMIT: i64 = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MacroTotals {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

impl MacroTotals {
    // fiber and sugar are not part of the totals
    fn add(&mut self, info: &NutritionalInfo) {
        self.calories += info.calories;
        self.protein += info.protein;
        self.carbs += info.carbs;
        self.fat += info.fat;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistorySummary {
    pub items: Vec<NutritionalInfo>,
    pub day_total: MacroTotals,
    pub week_total: MacroTotals,
}

/// Current time in the server's local zone, UTC when the offset can't be read.
pub fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Midnight of `now`'s calendar day, in `now`'s offset.
pub fn day_start(now: OffsetDateTime) -> OffsetDateTime {
    now.replace_time(time::Time::MIDNIGHT)
}

/// Midnight of the most recent Sunday (today if today is Sunday).
pub fn week_start(now: OffsetDateTime) -> OffsetDateTime {
    let back = i64::from(now.weekday().number_days_from_sunday());
    day_start(now) - Duration::days(back)
}

/// Sums calories/protein/carbs/fat for this week and today. A record counts
/// from the boundary instant onward, and only week records are considered
/// for the day total.
pub fn summarize(now: OffsetDateTime, items: Vec<NutritionalInfo>) -> HistorySummary {
    let day = day_start(now);
    let week = week_start(now);

    let mut day_total = MacroTotals::default();
    let mut week_total = MacroTotals::default();

    for info in &items {
        if info.created_at >= week {
            week_total.add(info);
            if info.created_at >= day {
                day_total.add(info);
            }
        }
    }

    HistorySummary {
        items,
        day_total,
        week_total,
    }
}
