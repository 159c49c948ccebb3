//! Nowcast autorefresh
//!
//! Wakes once per nowcast ttl and regenerates the cache when local time is
//! inside the configured window, so users during busy hours never wait for a
//! cold regeneration. A failed iteration is logged and alerted; the loop
//! keeps going.

use crate::alerting::AlertSink;
use crate::nowcast::NowcastService;
use chrono::{Datelike, NaiveDateTime, Timelike};
use footfall_common::config::AutorefreshConfig;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Why an iteration did not regenerate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    OutsideHours { hour: u32 },
    OutsideWeekdays { weekday: u32 },
    NotReadSinceRefresh,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::OutsideHours { hour } => write!(f, "hour {} is outside the refresh window", hour),
            SkipReason::OutsideWeekdays { weekday } => {
                write!(f, "weekday {} is outside the refresh window", weekday)
            }
            SkipReason::NotReadSinceRefresh => write!(f, "cache was not read since the last refresh"),
        }
    }
}

/// Result of one scheduler iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    Refreshed,
    Skipped(SkipReason),
    Failed,
    Cancelled,
}

/// Check `now` against the inclusive hour and weekday windows
pub fn in_window(config: &AutorefreshConfig, now: NaiveDateTime) -> Result<(), SkipReason> {
    let hour = now.hour();
    if hour < config.first_hour || hour > config.last_hour {
        return Err(SkipReason::OutsideHours { hour });
    }
    let weekday = now.weekday().num_days_from_monday();
    if weekday < config.first_weekday || weekday > config.last_weekday {
        return Err(SkipReason::OutsideWeekdays { weekday });
    }
    Ok(())
}

/// Background task keeping the nowcast warm
pub struct Scheduler {
    service: NowcastService,
    config: AutorefreshConfig,
    period: Duration,
    alerts: Arc<dyn AlertSink>,
    destination: String,
}

impl Scheduler {
    pub fn new(
        service: NowcastService,
        config: AutorefreshConfig,
        period: Duration,
        alerts: Arc<dyn AlertSink>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            service,
            config,
            period,
            alerts,
            destination: destination.into(),
        }
    }

    /// Loop until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        debug!(period_secs = self.period.as_secs(), "Cache autorefresh started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.period) => {}
            }

            let now = footfall_common::time::local_now(self.config.timezone);
            if self.run_iteration(now, &cancel).await == IterationOutcome::Cancelled {
                break;
            }
        }
        debug!("Cache autorefresh stopped");
    }

    /// One wake-up at local time `now`
    pub async fn run_iteration(&self, now: NaiveDateTime, cancel: &CancellationToken) -> IterationOutcome {
        if let Err(reason) = in_window(&self.config, now) {
            debug!(%now, "Did not autorefresh cache: {}", reason);
            return IterationOutcome::Skipped(reason);
        }

        if self.config.only_when_read {
            match self.service.read_since_refresh().await {
                Ok(true) => {}
                Ok(false) => {
                    let reason = SkipReason::NotReadSinceRefresh;
                    debug!(%now, "Did not autorefresh cache: {}", reason);
                    return IterationOutcome::Skipped(reason);
                }
                Err(e) => {
                    self.report_failure(&format!("Could not check nowcast read marker: {}", e))
                        .await;
                    return IterationOutcome::Failed;
                }
            }
        }

        info!(%now, "Autorefreshing cache");
        tokio::select! {
            result = self.service.refresh() => match result {
                Ok(_) => IterationOutcome::Refreshed,
                Err(e) => {
                    let message = if e.is_retryable() {
                        format!("Nowcast autorefresh failed: {}", e)
                    } else {
                        format!("Nowcast autorefresh failed (not retryable): {}", e)
                    };
                    self.report_failure(&message).await;
                    IterationOutcome::Failed
                }
            },
            _ = cancel.cancelled() => {
                info!("Shutdown requested, abandoning nowcast regeneration");
                IterationOutcome::Cancelled
            }
        }
    }

    async fn report_failure(&self, message: &str) {
        error!("{}", message);
        if let Err(e) = self.alerts.send(message, &self.destination).await {
            error!("Could not deliver alert: {}", e);
        }
    }
}
