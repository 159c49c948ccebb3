//! Weekly totals to hourly flow
//!
//! The chart source reports one figure per week. An hourly value is the
//! daily share scaled by the relative activity for the hour, with separate
//! profiles for working days and weekends.

use chrono::{NaiveDateTime, Timelike};
use footfall_common::config::{OpticalConfig, HOURS_PER_DAY};
use footfall_common::time::is_weekend;
use footfall_common::{Error, Result};

/// 24 hourly weights normalized to sum to one
#[derive(Debug, Clone, PartialEq)]
pub struct DiurnalProfile {
    weights: [f64; HOURS_PER_DAY],
}

impl DiurnalProfile {
    /// Validate and normalize raw weights
    pub fn new(raw: &[f64]) -> Result<Self> {
        if raw.len() != HOURS_PER_DAY {
            return Err(Error::Config(format!(
                "diurnal profile needs {} weights, found {}",
                HOURS_PER_DAY,
                raw.len()
            )));
        }
        if raw.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(Error::Config("diurnal weights must be non-negative".to_string()));
        }
        let total: f64 = raw.iter().sum();
        if total <= 0.0 {
            return Err(Error::Config("diurnal weights sum to zero".to_string()));
        }

        let mut weights = [0.0; HOURS_PER_DAY];
        for (w, r) in weights.iter_mut().zip(raw) {
            *w = r / total;
        }
        Ok(Self { weights })
    }

    /// Share of the day's activity falling in `hour`
    pub fn weight(&self, hour: u32) -> f64 {
        self.weights[hour as usize % HOURS_PER_DAY]
    }
}

/// Weekday and weekend profiles plus the period length
#[derive(Debug, Clone, PartialEq)]
pub struct DiurnalCorrection {
    weekday: DiurnalProfile,
    weekend: DiurnalProfile,
    days_in_period: f64,
}

impl DiurnalCorrection {
    pub fn new(weekday: DiurnalProfile, weekend: DiurnalProfile, days_in_period: f64) -> Result<Self> {
        if days_in_period <= 0.0 || !days_in_period.is_finite() {
            return Err(Error::Config(format!(
                "days_in_period must be positive, got {}",
                days_in_period
            )));
        }
        Ok(Self {
            weekday,
            weekend,
            days_in_period,
        })
    }

    pub fn from_config(config: &OpticalConfig) -> Result<Self> {
        Self::new(
            DiurnalProfile::new(&config.weekday_diurnal)?,
            DiurnalProfile::new(&config.weekend_diurnal)?,
            config.days_in_period,
        )
    }

    pub fn profile_for(&self, at: NaiveDateTime) -> &DiurnalProfile {
        if is_weekend(at.date()) {
            &self.weekend
        } else {
            &self.weekday
        }
    }

    /// Convert a per-period total into flow for the hour containing `at`
    pub fn correct_for_diurnal(&self, value_per_period: f64, at: NaiveDateTime) -> f64 {
        let weight = self.profile_for(at).weight(at.hour());
        tracing::debug!(hour = at.hour(), weight, "Diurnal correction");
        value_per_period / self.days_in_period * weight
    }
}
