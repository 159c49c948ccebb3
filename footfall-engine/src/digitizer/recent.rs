//! Most recent weekly value from a multi-year chart
//!
//! Each chart overlays one line per year. Only the current year's line stops
//! part-way through, so its last point is the newest figure.

use chrono::{Datelike, NaiveDate};
use footfall_common::time::monday_of_week;
use serde::{Deserialize, Serialize};
use tracing::info;

/// One line in data space: x is the week number, y the weekly total
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSeries {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl DataSeries {
    /// Single-point series used when a chart cannot be read
    pub fn fallback(value: f64) -> Self {
        Self {
            x: vec![1.0],
            y: vec![value],
        }
    }

    fn max_period(&self) -> Option<u32> {
        self.x
            .iter()
            .copied()
            .fold(None, |m: Option<f64>, v| Some(m.map_or(v, |m| m.max(v))))
            .map(|v| v.max(0.0).round() as u32)
    }
}

/// Newest weekly total for one sensor, truncated to a whole count
///
/// `None` when no series has any points.
pub fn extract_most_recent_measurement(
    sensor: &str,
    series: &[DataSeries],
    periods_per_cycle: u32,
    today: NaiveDate,
) -> Option<f64> {
    let usable: Vec<(&DataSeries, u32)> = series
        .iter()
        .filter(|s| !s.y.is_empty())
        .filter_map(|s| s.max_period().map(|p| (s, p)))
        .collect();
    if usable.is_empty() {
        return None;
    }

    let value = if usable.iter().all(|(_, p)| *p == periods_per_cycle) {
        // Every line spans the full year: the new year's line has not started.
        // Approximate from the turn-of-year figures of all past years.
        let ends: Vec<f64> = usable
            .iter()
            .flat_map(|(s, _)| [s.y[0], s.y[s.y.len() - 1]])
            .collect();
        info!(sensor, "Most recent value approximated from turn-of-year figures");
        (ends.iter().sum::<f64>() / ends.len() as f64).trunc()
    } else {
        let (newest, week) = usable
            .iter()
            .min_by_key(|(_, p)| *p)
            .copied()
            .unwrap_or(usable[0]);
        let value = newest.y[newest.y.len() - 1].trunc();
        match monday_of_week(week, today.year()) {
            Some(monday) => info!(
                sensor,
                week,
                commencing = %monday,
                age_days = (today - monday).num_days(),
                "Most recent value is from week {} commencing {}",
                week,
                monday
            ),
            None => info!(sensor, week, "Most recent value is from week {}", week),
        }
        value
    };

    info!(sensor, value, "Most recent value {} pax per period", value);
    Some(value)
}
