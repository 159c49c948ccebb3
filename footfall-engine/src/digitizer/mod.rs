//! Optical chart digitizer
//!
//! The business-district source publishes weekly footfall only as chart
//! images and forbids republishing the figures, so values are recovered from
//! the pixels and only derived hourly flow leaves this module.
//!
//! Per poll:
//! 1. Weekly values come from the `optical` cache, or on a miss from
//!    rendering the stats page, downloading each configured chart,
//!    extracting its lines, calibrating them and picking the newest point.
//!    A chart that cannot be read contributes its configured fallback.
//! 2. Weekly values are spread onto the current hour with the diurnal
//!    profiles and bounds-checked. Freshly scraped values are cached only
//!    once they pass.

pub mod calibration;
pub mod components;
pub mod diurnal;
pub mod lines;
pub mod recent;

pub use calibration::CalibrationTransform;
pub use diurnal::{DiurnalCorrection, DiurnalProfile};
pub use lines::{ColorRankExtractor, LineExtractor, PixelSeries};
pub use recent::{extract_most_recent_measurement, DataSeries};

use crate::browser::{Downloader, FetchOrchestrator};
use crate::html;
use crate::types::Measurement;
use chrono::NaiveDateTime;
use chrono_tz::Tz;
use footfall_common::config::{ChartSeriesConfig, OpticalConfig};
use footfall_common::{CacheNamespace, Error, Result, TtlCache};
use reqwest::Url;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cache namespace for the weekly per-sensor values
pub const OPTICAL_NAMESPACE: &str = "optical";

struct ChartSeries {
    config: ChartSeriesConfig,
    transform: CalibrationTransform,
}

/// Polls hourly flow derived from the weekly charts
pub struct OpticalPoller {
    orchestrator: FetchOrchestrator,
    downloader: Arc<dyn Downloader>,
    extractor: Arc<dyn LineExtractor>,
    cache: CacheNamespace,
    series: Vec<ChartSeries>,
    correction: DiurnalCorrection,
    config: OpticalConfig,
    download_timeout: Duration,
    timezone: Tz,
}

impl OpticalPoller {
    /// Fails on a degenerate calibration or invalid diurnal profile
    pub fn new(
        orchestrator: FetchOrchestrator,
        downloader: Arc<dyn Downloader>,
        extractor: Arc<dyn LineExtractor>,
        cache: &TtlCache,
        config: OpticalConfig,
        download_timeout: Duration,
        timezone: Tz,
    ) -> Result<Self> {
        let series = config
            .series
            .iter()
            .map(|s| {
                Ok(ChartSeries {
                    transform: CalibrationTransform::from_points(&s.calibration)?,
                    config: s.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let correction = DiurnalCorrection::from_config(&config)?;

        Ok(Self {
            orchestrator,
            downloader,
            extractor,
            cache: cache.namespace(OPTICAL_NAMESPACE, config.cache_ttl()),
            series,
            correction,
            config,
            download_timeout,
            timezone,
        })
    }

    pub async fn poll(&self) -> Result<Vec<Measurement>> {
        self.poll_at(footfall_common::time::local_now(self.timezone))
            .await
    }

    /// Hourly flow for the hour containing local time `now`
    pub async fn poll_at(&self, now: NaiveDateTime) -> Result<Vec<Measurement>> {
        let (weekly, scraped) = match self.cache.read::<BTreeMap<String, f64>>().await? {
            Some(cached) => {
                debug!("Using cached weekly chart values");
                (cached, false)
            }
            None => (self.weekly_values(now).await, true),
        };

        let hourly: BTreeMap<String, f64> = weekly
            .iter()
            .map(|(sensor, v)| (sensor.clone(), self.correction.correct_for_diurnal(*v, now)))
            .collect();

        let max = self.config.max_pax_per_hour;
        let offenders: Vec<String> = hourly
            .iter()
            .filter(|(_, v)| !(0.0..=max).contains(*v))
            .map(|(k, v)| format!("{}={:.1}", k, v))
            .collect();
        if !offenders.is_empty() {
            return Err(Error::OutOfBounds(format!(
                "chart-derived flow outside [0, {}]: {}",
                max,
                offenders.join(", ")
            )));
        }
        if scraped {
            self.cache.write(&weekly).await?;
        }

        Ok(hourly
            .into_iter()
            .map(|(sensor, flow)| Measurement::flow(sensor, now, flow))
            .collect())
    }

    /// Newest weekly total per configured sensor, falling back where unreadable
    async fn weekly_values(&self, now: NaiveDateTime) -> BTreeMap<String, f64> {
        let charts = self.scrape_charts().await;
        self.series
            .iter()
            .map(|s| {
                let sensor = &s.config.sensor;
                let data = charts
                    .get(sensor)
                    .cloned()
                    .unwrap_or_else(|| vec![DataSeries::fallback(s.config.fallback_pax_per_week)]);
                let value = extract_most_recent_measurement(
                    sensor,
                    &data,
                    self.config.periods_per_cycle,
                    now.date(),
                )
                .unwrap_or(s.config.fallback_pax_per_week);
                (sensor.clone(), value)
            })
            .collect()
    }

    /// Calibrated lines for every chart that could be read
    async fn scrape_charts(&self) -> BTreeMap<String, Vec<DataSeries>> {
        info!("Commencing chart scrape of {}", self.config.page_url);
        let page = match self
            .orchestrator
            .fetch_pages(
                std::slice::from_ref(&self.config.page_url),
                &self.config.ready_selector,
                self.orchestrator.default_timeout(),
            )
            .await
        {
            Ok(mut pages) => pages.pop().unwrap_or_default(),
            Err(e) => {
                warn!("Could not render chart page, using fallbacks: {}", e);
                return BTreeMap::new();
            }
        };
        if page.is_empty() {
            warn!("Chart page returned no content, using fallbacks");
            return BTreeMap::new();
        }

        let sources = html::img_sources(&page);
        debug!("Found {} images on chart page", sources.len());

        let mut charts = BTreeMap::new();
        for series in &self.series {
            let sensor = &series.config.sensor;
            match self.read_chart(series, &sources).await {
                Ok(lines) if !lines.is_empty() => {
                    debug!(sensor = %sensor, lines = lines.len(), "Digitized chart");
                    charts.insert(sensor.clone(), lines);
                }
                Ok(_) => warn!(sensor = %sensor, "No lines found in chart, using fallback"),
                Err(e) => warn!(sensor = %sensor, "Could not read chart, using fallback: {}", e),
            }
        }
        info!("Digitized {} of {} charts", charts.len(), self.series.len());
        charts
    }

    async fn read_chart(&self, series: &ChartSeries, sources: &[String]) -> Result<Vec<DataSeries>> {
        let src = sources
            .iter()
            .find(|s| s.contains(&series.config.src_pattern))
            .ok_or_else(|| {
                Error::Parse(format!("no image matching '{}'", series.config.src_pattern))
            })?;
        let url = resolve_url(&self.config.page_url, src)?;

        let bytes = self.downloader.download(&url, self.download_timeout).await?;
        let image = image::load_from_memory(&bytes)
            .map_err(|e| Error::Image(format!("{}: {}", url, e)))?
            .to_rgb8();

        Ok(self
            .extractor
            .extract(&image)
            .iter()
            .map(|line| calibrate(&series.transform, line))
            .collect())
    }
}

fn calibrate(transform: &CalibrationTransform, line: &PixelSeries) -> DataSeries {
    let (x, y) = line
        .columns
        .iter()
        .zip(&line.rows)
        .map(|(c, r)| transform.apply(*c, *r))
        .unzip();
    DataSeries { x, y }
}

/// Resolve an `<img src>` against the page it appeared on
fn resolve_url(page_url: &str, src: &str) -> Result<String> {
    let base = Url::parse(page_url).map_err(|e| Error::Parse(format!("{}: {}", page_url, e)))?;
    base.join(src)
        .map(|u| u.to_string())
        .map_err(|e| Error::Parse(format!("{}: {}", src, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{temp_cache, StaticDownloader, StaticRenderer};
    use chrono::NaiveDate;
    use footfall_common::config::{CalibrationPoints, CropMargins, FetchConfig};
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::atomic::Ordering;

    const PAGE: &str = "https://stats.example.org/stats/";

    fn tuesday_ten() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 4, 30)
            .unwrap()
            .and_hms_opt(10, 5, 0)
            .unwrap()
    }

    /// Past year spans the full x range, current year stops at week 17
    fn chart_png() -> Vec<u8> {
        let mut img = RgbImage::from_pixel(120, 120, Rgb([255, 255, 255]));
        for x in 0..=102 {
            img.put_pixel(x, 50, Rgb([220, 30, 30]));
            img.put_pixel(x, 51, Rgb([220, 30, 30]));
        }
        for x in 0..=32 {
            img.put_pixel(x, 20, Rgb([30, 30, 220]));
            img.put_pixel(x, 21, Rgb([30, 30, 220]));
        }
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    fn config() -> OpticalConfig {
        let calibration = CalibrationPoints {
            pix_1: [0.0, 0.0],
            data_1: [1.0, 100_000.0],
            pix_2: [102.0, 100.0],
            data_2: [52.0, 0.0],
        };
        OpticalConfig {
            page_url: PAGE.to_string(),
            crop: CropMargins {
                top: 0,
                bottom: 0,
                left: 0,
                right: 0,
            },
            series: vec![
                ChartSeriesConfig {
                    sensor: "EE001".to_string(),
                    src_pattern: "PS-52-Week_Update".to_string(),
                    calibration,
                    fallback_pax_per_week: 300e3,
                },
                ChartSeriesConfig {
                    sensor: "EE002".to_string(),
                    src_pattern: "RoseSt-52-Week_Update".to_string(),
                    calibration,
                    fallback_pax_per_week: 75e3,
                },
            ],
            ..OpticalConfig::default()
        }
    }

    fn page_html() -> String {
        r#"<html><body>
        <div class="visualizer-chart-loaded"></div>
        <img src="/wp-content/uploads/PS-52-Week_Update.png">
        <img src="/wp-content/uploads/RoseSt-52-Week_Update.png">
        </body></html>"#
            .to_string()
    }

    fn poller(renderer: StaticRenderer, downloader: StaticDownloader, cache: &TtlCache, config: OpticalConfig) -> OpticalPoller {
        let fetch = FetchConfig {
            jitter_secs: 0.0,
            ..FetchConfig::default()
        };
        OpticalPoller::new(
            FetchOrchestrator::new(Arc::new(renderer), &fetch),
            Arc::new(downloader),
            Arc::new(ColorRankExtractor::from_config(&config)),
            cache,
            config,
            Duration::from_secs(5),
            chrono_tz::Europe::London,
        )
        .unwrap()
    }

    fn hourly(weekly: f64) -> f64 {
        DiurnalCorrection::from_config(&OpticalConfig::default())
            .unwrap()
            .correct_for_diurnal(weekly, tuesday_ten())
    }

    fn flow_of(measurements: &[Measurement], sensor: &str) -> f64 {
        measurements
            .iter()
            .find(|m| m.sensor_name == sensor)
            .and_then(|m| m.flow_pax_per_hour())
            .unwrap()
    }

    #[tokio::test]
    async fn test_digitizes_chart_and_falls_back_for_missing_image() {
        let (_dir, cache) = temp_cache().await;
        let renderer = StaticRenderer::new(vec![(PAGE.to_string(), page_html())]);
        let downloader = StaticDownloader::new(vec![(
            "https://stats.example.org/wp-content/uploads/PS-52-Week_Update.png".to_string(),
            chart_png(),
        )]);
        let poller = poller(renderer, downloader, &cache, config());

        let measurements = poller.poll_at(tuesday_ten()).await.unwrap();

        assert_eq!(measurements.len(), 2);
        // Current-year line centre row 20.5 maps to 79_500 per week
        assert!((flow_of(&measurements, "EE001") - hourly(79_500.0)).abs() < 1e-6);
        assert!((flow_of(&measurements, "EE002") - hourly(75e3)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_page_unavailable_uses_all_fallbacks() {
        let (_dir, cache) = temp_cache().await;
        let poller = poller(
            StaticRenderer::new(vec![]),
            StaticDownloader::default(),
            &cache,
            config(),
        );

        let measurements = poller.poll_at(tuesday_ten()).await.unwrap();

        assert!((flow_of(&measurements, "EE001") - hourly(300e3)).abs() < 1e-6);
        assert!((flow_of(&measurements, "EE002") - hourly(75e3)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_undecodable_image_falls_back() {
        let (_dir, cache) = temp_cache().await;
        let renderer = StaticRenderer::new(vec![(PAGE.to_string(), page_html())]);
        let downloader = StaticDownloader::new(vec![(
            "https://stats.example.org/wp-content/uploads/PS-52-Week_Update.png".to_string(),
            b"not an image".to_vec(),
        )]);
        let poller = poller(renderer, downloader, &cache, config());

        let measurements = poller.poll_at(tuesday_ten()).await.unwrap();
        assert!((flow_of(&measurements, "EE001") - hourly(300e3)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_weekly_values_cached_correction_recomputed() {
        let (_dir, cache) = temp_cache().await;
        let renderer = StaticRenderer::new(vec![]);
        let launches = renderer.launch_counter();
        let poller = poller(renderer, StaticDownloader::default(), &cache, config());

        let at_ten = poller.poll_at(tuesday_ten()).await.unwrap();
        let at_six_pm = poller
            .poll_at(tuesday_ten().date().and_hms_opt(18, 0, 0).unwrap())
            .await
            .unwrap();

        assert_eq!(launches.load(Ordering::SeqCst), 1);
        assert!(flow_of(&at_six_pm, "EE001") > flow_of(&at_ten, "EE001"));
    }

    #[tokio::test]
    async fn test_out_of_bounds_fails_closed() {
        let (_dir, cache) = temp_cache().await;
        let config = OpticalConfig {
            max_pax_per_hour: 10.0,
            ..config()
        };
        let ttl = config.cache_ttl();
        let poller = poller(StaticRenderer::new(vec![]), StaticDownloader::default(), &cache, config);

        assert!(matches!(
            poller.poll_at(tuesday_ten()).await,
            Err(Error::OutOfBounds(_))
        ));
        let cached: Option<BTreeMap<String, f64>> =
            cache.namespace(OPTICAL_NAMESPACE, ttl).read().await.unwrap();
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_rejected_scrape_is_retried_next_poll() {
        let (_dir, cache) = temp_cache().await;
        let config = OpticalConfig {
            max_pax_per_hour: 10.0,
            ..config()
        };
        let renderer = StaticRenderer::new(vec![]);
        let launches = renderer.launch_counter();
        let poller = poller(renderer, StaticDownloader::default(), &cache, config);

        assert!(poller.poll_at(tuesday_ten()).await.is_err());
        assert!(poller.poll_at(tuesday_ten()).await.is_err());

        assert_eq!(launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_degenerate_calibration_rejected_at_construction() {
        let (_dir, cache) = temp_cache().await;
        let mut config = config();
        config.series[0].calibration.pix_2[0] = config.series[0].calibration.pix_1[0];
        let fetch = FetchConfig::default();

        let result = OpticalPoller::new(
            FetchOrchestrator::new(Arc::new(StaticRenderer::new(vec![])), &fetch),
            Arc::new(StaticDownloader::default()),
            Arc::new(ColorRankExtractor::from_config(&config)),
            &cache,
            config,
            Duration::from_secs(5),
            chrono_tz::Europe::London,
        );
        assert!(matches!(result, Err(Error::Calibration(_))));
    }

    #[test]
    fn test_resolve_relative_src() {
        assert_eq!(
            resolve_url(PAGE, "/img/a.png").unwrap(),
            "https://stats.example.org/img/a.png"
        );
        assert_eq!(
            resolve_url(PAGE, "https://cdn.example.org/b.png").unwrap(),
            "https://cdn.example.org/b.png"
        );
    }
}
