//! Council traffic-report poller
//!
//! Each council counter publishes a daily report page with an hourly table.
//! One value per sensor is taken: the row for the current hour on the
//! previous calendar day, since several counters report hours late.

use crate::browser::FetchOrchestrator;
use crate::html;
use crate::types::{Measurement, SensorDescriptor};
use chrono::{Days, NaiveDateTime, Timelike};
use chrono_tz::Tz;
use footfall_common::config::TabularConfig;
use footfall_common::{CacheNamespace, Error, Result, TtlCache};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Cache namespace for the per-sensor hourly counts
pub const TABULAR_NAMESPACE: &str = "tabular";

/// Why a sensor contributed no value this cycle
#[derive(Debug, Clone, PartialEq)]
enum SkipReason {
    TableMissing,
    ColumnMissing(String),
    RowMissing(String),
    NoData(String),
    NotNumeric(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TableMissing => write!(f, "could not find results table"),
            SkipReason::ColumnMissing(c) => write!(f, "table has no '{}' column", c),
            SkipReason::RowMissing(h) => write!(f, "no row for time {}", h),
            SkipReason::NoData(h) => write!(f, "no data reported for time {}", h),
            SkipReason::NotNumeric(v) => write!(f, "cell '{}' is not a count", v),
        }
    }
}

/// Polls hourly pedestrian counts from the council report tables
pub struct TabularPoller {
    orchestrator: FetchOrchestrator,
    cache: CacheNamespace,
    config: TabularConfig,
    timezone: Tz,
}

impl TabularPoller {
    pub fn new(
        orchestrator: FetchOrchestrator,
        cache: &TtlCache,
        config: TabularConfig,
        timezone: Tz,
    ) -> Self {
        let cache = cache.namespace(TABULAR_NAMESPACE, config.cache_ttl());
        Self {
            orchestrator,
            cache,
            config,
            timezone,
        }
    }

    /// Current-hour flow for every descriptor that reported one
    pub async fn poll(&self, descriptors: &[SensorDescriptor]) -> Result<Vec<Measurement>> {
        self.poll_at(descriptors, footfall_common::time::local_now(self.timezone))
            .await
    }

    /// As [`poll`](Self::poll) with an explicit local wall-clock time
    pub async fn poll_at(
        &self,
        descriptors: &[SensorDescriptor],
        now: NaiveDateTime,
    ) -> Result<Vec<Measurement>> {
        let counts = match self.cache.read::<BTreeMap<String, f64>>().await? {
            Some(cached) => {
                debug!("Using {} cached council counts", cached.len());
                cached
            }
            None => {
                let fresh = self.scrape(descriptors, now).await?;
                if fresh.is_empty() {
                    warn!("No council counts extracted this cycle, nothing cached");
                } else {
                    self.cache.write(&fresh).await?;
                }
                fresh
            }
        };

        Ok(counts
            .into_iter()
            .map(|(sensor, flow)| Measurement::flow(sensor, now, flow))
            .collect())
    }

    async fn scrape(
        &self,
        descriptors: &[SensorDescriptor],
        now: NaiveDateTime,
    ) -> Result<BTreeMap<String, f64>> {
        let hour = format!("{:02}:00", now.hour());
        let report_date = now
            .date()
            .checked_sub_days(Days::new(1))
            .ok_or_else(|| Error::Internal(format!("no day before {}", now.date())))?
            .format("%Y-%m-%d")
            .to_string();

        let mut queried = Vec::with_capacity(descriptors.len());
        let mut urls = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            match build_report_url(&self.config, descriptor, &report_date) {
                Some(url) => {
                    queried.push(descriptor.name.as_str());
                    urls.push(url);
                }
                None => warn!(
                    sensor = %descriptor.name,
                    "Sensor name carries no numeric site id, skipping"
                ),
            }
        }

        debug!("Querying council reports:\n{}", urls.join("\n"));
        let pages = self
            .orchestrator
            .fetch_pages(
                &urls,
                &self.config.ready_selector,
                self.orchestrator.default_timeout(),
            )
            .await?;

        let mut counts = BTreeMap::new();
        for (sensor, page) in queried.into_iter().zip(pages) {
            match extract_hour_value(&page, &self.config, &hour) {
                Ok(value) => {
                    debug!(sensor, value, hour = %hour, "Found council count");
                    counts.insert(sensor.to_string(), value);
                }
                Err(reason) => {
                    warn!(sensor, date = %report_date, "{}; ignoring", reason);
                }
            }
        }

        check_bounds(&counts, self.config.max_pax_per_hour)?;
        info!("Extracted {} council counts", counts.len());
        Ok(counts)
    }
}

/// Expand the URL template for one sensor, or `None` if its name has no site id
pub fn build_report_url(
    config: &TabularConfig,
    descriptor: &SensorDescriptor,
    report_date: &str,
) -> Option<String> {
    let site: u64 = descriptor
        .name
        .get(config.site_prefix_len..)?
        .parse()
        .ok()?;
    let site = format!("{:0width$}", site, width = config.site_id_width);

    Some(
        config
            .url_template
            .replace("{source}", &descriptor.source)
            .replace("{site}", &site)
            .replace("{date}", report_date),
    )
}

fn extract_hour_value(
    page: &str,
    config: &TabularConfig,
    hour: &str,
) -> std::result::Result<f64, SkipReason> {
    let table = html::find_table_by_id(page, &config.table_id).ok_or(SkipReason::TableMissing)?;
    let rows = html::table_rows(table);

    let header = rows.first().ok_or(SkipReason::TableMissing)?;
    let column = |name: &str| {
        header
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| SkipReason::ColumnMissing(name.to_string()))
    };
    let time_idx = column(&config.time_column)?;
    let value_idx = column(&config.value_column)?;

    let cell = rows
        .iter()
        .skip(1)
        .find(|row| row.get(time_idx).map(String::as_str) == Some(hour))
        .and_then(|row| row.get(value_idx))
        .ok_or_else(|| SkipReason::RowMissing(hour.to_string()))?;

    if *cell == config.no_data_sentinel {
        return Err(SkipReason::NoData(hour.to_string()));
    }
    cell.replace(',', "")
        .parse::<i64>()
        .map(|v| v as f64)
        .map_err(|_| SkipReason::NotNumeric(cell.clone()))
}

/// Fail the whole batch if any count is outside `[0, max]`
fn check_bounds(counts: &BTreeMap<String, f64>, max: f64) -> Result<()> {
    let offenders: Vec<String> = counts
        .iter()
        .filter(|(_, v)| !(0.0..=max).contains(*v))
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    if offenders.is_empty() {
        Ok(())
    } else {
        Err(Error::OutOfBounds(format!(
            "council counts outside [0, {}]: {}",
            max,
            offenders.join(", ")
        )))
    }
}
