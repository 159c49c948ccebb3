//! Configuration loading and root folder resolution
//!
//! Every section carries compiled defaults (`#[serde(default)]`), so a missing
//! or partial TOML file still yields a usable configuration. The defaults are
//! the values the two public sources were tuned against.

use crate::{Error, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "FOOTFALL_CONFIG";
/// Environment variable naming the data folder
pub const ROOT_FOLDER_ENV_VAR: &str = "FOOTFALL_ROOT_FOLDER";
/// SQLite file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "footfall.db";

/// Hours in a diurnal profile
pub const HOURS_PER_DAY: usize = 24;

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Data folder holding the SQLite database and relative resource paths
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub fetch: FetchConfig,
    pub tabular: TabularConfig,
    pub optical: OpticalConfig,
    pub fusion: FusionConfig,
    pub sensors: SensorsConfig,
    pub nowcast: NowcastConfig,
    pub autorefresh: AutorefreshConfig,
    pub alerting: AlertingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "footfall_engine=debug,footfall_common=info".to_string(),
        }
    }
}

/// Browser viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Engine that renders pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RenderEngine {
    /// Local headless Chromium; page scripts run before the ready selector is checked
    #[default]
    Chromium,
    /// Plain HTTP GET. Only suitable when every ready selector is present in
    /// the served markup: the chart page's `.visualizer-chart-loaded` is added
    /// by script and never matches, so charts fall back under this engine.
    Http,
}

/// Page fetching: engine, identity pools, jitter and timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub engine: RenderEngine,
    /// Chromium executable; searched on `PATH` when unset
    pub browser_path: Option<PathBuf>,
    /// Extra Chromium flags, e.g. `--no-sandbox` when running as root
    pub browser_args: Vec<String>,
    /// Virtual time page scripts get before the DOM is captured
    pub script_budget_ms: u64,
    /// Upper bound of the random delay before each navigation
    pub jitter_secs: f64,
    /// Navigation and selector wait timeout per page
    pub load_timeout_secs: u64,
    /// Timeout for plain downloads (chart images)
    pub download_timeout_secs: u64,
    pub user_agents: Vec<String>,
    pub viewports: Vec<Viewport>,
    pub locales: Vec<String>,
}

impl FetchConfig {
    pub fn jitter(&self) -> Duration {
        Duration::from_secs_f64(self.jitter_secs.max(0.0))
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn script_budget(&self) -> Duration {
        Duration::from_millis(self.script_budget_ms)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            engine: RenderEngine::default(),
            browser_path: None,
            browser_args: Vec::new(),
            script_budget_ms: 5_000,
            jitter_secs: 2.0,
            load_timeout_secs: 20,
            download_timeout_secs: 30,
            user_agents: vec![
                // Chrome on Windows
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36".to_string(),
                // Firefox on Windows
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0".to_string(),
                // Safari on Mac
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_2) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.3 Safari/605.1.15".to_string(),
                // Firefox on Ubuntu
                "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:122.0) Gecko/20100101 Firefox/122.0".to_string(),
                // Opera on Windows
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.110 Safari/537.36 OPR/106.0.4998.70".to_string(),
                // Opera on Ubuntu
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.110 Safari/537.36 OPR/106.0.4998.70".to_string(),
            ],
            viewports: vec![
                Viewport { width: 1920, height: 1080 },
                Viewport { width: 1366, height: 768 },
                Viewport { width: 1536, height: 864 },
            ],
            locales: vec!["en-US".to_string(), "en-GB".to_string()],
        }
    }
}

/// Council traffic-report tables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TabularConfig {
    /// Query URL template; placeholders `{source}`, `{site}`, `{date}`
    pub url_template: String,
    /// Characters of the sensor name preceding the numeric site id
    pub site_prefix_len: usize,
    /// Zero-padded width of the site id in the query
    pub site_id_width: usize,
    pub ready_selector: String,
    pub table_id: String,
    pub time_column: String,
    pub value_column: String,
    /// Cell text meaning "no data for this hour"
    pub no_data_sentinel: String,
    pub cache_ttl_secs: u64,
    pub max_pax_per_hour: f64,
}

impl TabularConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for TabularConfig {
    fn default() -> Self {
        Self {
            url_template: "{source}tfreport.asp?node=EDINBURGH_CYCLE&cosit={site}&reportdate={date}&enddate={date}&dimtype=2".to_string(),
            site_prefix_len: 3,
            site_id_width: 12,
            ready_selector: "#gridTable".to_string(),
            table_id: "gridTable".to_string(),
            time_column: "Time".to_string(),
            value_column: "Ped".to_string(),
            no_data_sentinel: "-".to_string(),
            // The site is real-time but polled hourly
            cache_ttl_secs: 60 * 60,
            max_pax_per_hour: 1e3,
        }
    }
}

/// Two pixel/data correspondences defining a per-axis affine map
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoints {
    pub pix_1: [f64; 2],
    pub data_1: [f64; 2],
    pub pix_2: [f64; 2],
    pub data_2: [f64; 2],
}

/// Pixel margins removed before line extraction
///
/// Measured against the current chart layout; if the source changes its
/// chart size or axis placement these margins and every calibration must be
/// re-measured together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropMargins {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

impl Default for CropMargins {
    fn default() -> Self {
        Self {
            top: 50,
            bottom: 100,
            left: 60,
            right: 0,
        }
    }
}

/// One chart image and the sensor it feeds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartSeriesConfig {
    /// Sensor name the digitized value is reported under
    pub sensor: String,
    /// Substring identifying the chart's `<img src>`
    pub src_pattern: String,
    /// Calibration for this chart's crop
    pub calibration: CalibrationPoints,
    /// Weekly total used when the chart cannot be acquired
    pub fallback_pax_per_week: f64,
}

/// Chart digitization source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpticalConfig {
    pub page_url: String,
    pub ready_selector: String,
    pub crop: CropMargins,
    /// Levels per colour channel after quantization
    pub color_levels: u8,
    /// Number of series lines to extract after the background colour
    pub line_count: usize,
    /// Connected components smaller than this (pixels) are discarded
    pub min_component_area: usize,
    /// Reporting periods in a full chart cycle (weeks per year)
    pub periods_per_cycle: u32,
    /// Days covered by one reported value
    pub days_in_period: f64,
    pub cache_ttl_secs: u64,
    pub max_pax_per_hour: f64,
    pub weekday_diurnal: Vec<f64>,
    pub weekend_diurnal: Vec<f64>,
    pub series: Vec<ChartSeriesConfig>,
}

impl OpticalConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for OpticalConfig {
    fn default() -> Self {
        Self {
            page_url: "https://www.essentialedinburgh.co.uk/stats/".to_string(),
            ready_selector: ".visualizer-chart-loaded".to_string(),
            crop: CropMargins::default(),
            color_levels: 2,
            line_count: 3,
            min_component_area: 10,
            periods_per_cycle: 52,
            days_in_period: 7.0,
            // Weekly figures only
            cache_ttl_secs: 7 * 24 * 60 * 60,
            max_pax_per_hour: 50e3,
            // Hourly counts 3rd-7th March 2025 at a comparable council counter
            weekday_diurnal: vec![
                0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 36.0, 0.0, 7.0, 3.0, 6.0, 6.0, 41.0, 17.0, 14.0,
                11.0, 17.0, 21.0, 53.0, 10.0, 5.0, 1.0, 2.0, 2.0,
            ],
            // Same counter, 8th-9th March 2025
            weekend_diurnal: vec![
                1.0, 2.0, 0.0, 0.0, 1.0, 0.0, 53.0, 0.0, 6.0, 22.0, 28.0, 20.0, 16.0, 25.0, 17.0,
                18.0, 18.0, 14.0, 48.0, 16.0, 6.0, 4.0, 5.0, 2.0,
            ],
            series: vec![
                ChartSeriesConfig {
                    sensor: "EE001".to_string(),
                    src_pattern: "PS-52-Week_Update".to_string(),
                    calibration: CalibrationPoints {
                        pix_1: [24.0, 205.0],
                        data_1: [1.0, 250e3],
                        pix_2: [820.0, 51.0],
                        data_2: [52.0, 400e3],
                    },
                    fallback_pax_per_week: 300e3,
                },
                ChartSeriesConfig {
                    sensor: "EE002".to_string(),
                    src_pattern: "RoseSt-52-Week_Update".to_string(),
                    calibration: CalibrationPoints {
                        pix_1: [24.0, 157.0],
                        data_1: [1.0, 60e3],
                        pix_2: [820.0, 52.0],
                        data_2: [52.0, 100e3],
                    },
                    fallback_pax_per_week: 75e3,
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Assumed walking speed for flow to density conversion
    pub average_walking_speed_mps: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            average_walking_speed_mps: 1.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorsConfig {
    /// JSON sensor catalog; relative paths resolve against the root folder
    pub catalog_path: PathBuf,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            catalog_path: PathBuf::from("sensors.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NowcastConfig {
    /// Nowcast freshness and autorefresh period
    pub cache_ttl_secs: u64,
    /// Payload served when no real model is wired in
    pub mock_payload_path: PathBuf,
}

impl NowcastConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for NowcastConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 15 * 60,
            mock_payload_path: PathBuf::from("mock_nowcast.json"),
        }
    }
}

/// Window inside which the nowcast is kept warm
///
/// Both ranges are inclusive; weekdays count from 0 = Monday.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutorefreshConfig {
    pub timezone: Tz,
    pub first_hour: u32,
    pub last_hour: u32,
    pub first_weekday: u32,
    pub last_weekday: u32,
    /// Also require a cache read since the previous refresh
    pub only_when_read: bool,
}

impl Default for AutorefreshConfig {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::Europe::London,
            first_hour: 7,
            last_hour: 22,
            first_weekday: 0,
            last_weekday: 6,
            only_when_read: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Destination identifier passed to the alert sink
    pub destination: String,
    /// When set, alerts are POSTed here as JSON
    pub webhook_url: Option<String>,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            destination: "operations".to_string(),
            webhook_url: None,
        }
    }
}

impl EngineConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load configuration from a file
    ///
    /// A missing file falls back to compiled defaults with a warning; a file
    /// that exists but does not parse is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(
                "Config file {} not found, using compiled defaults",
                path.display()
            );
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Check invariants that would otherwise surface mid-pipeline
    pub fn validate(&self) -> Result<()> {
        validate_diurnal("weekday_diurnal", &self.optical.weekday_diurnal)?;
        validate_diurnal("weekend_diurnal", &self.optical.weekend_diurnal)?;

        for series in &self.optical.series {
            let c = &series.calibration;
            if c.pix_1[0] == c.pix_2[0] || c.pix_1[1] == c.pix_2[1] {
                return Err(Error::Calibration(format!(
                    "calibration for {} has coincident pixel coordinates",
                    series.sensor
                )));
            }
        }

        if self.optical.color_levels < 2 {
            return Err(Error::Config("optical.color_levels must be at least 2".to_string()));
        }
        if self.optical.days_in_period <= 0.0 {
            return Err(Error::Config("optical.days_in_period must be positive".to_string()));
        }

        let a = &self.autorefresh;
        if a.first_hour > a.last_hour || a.last_hour > 23 {
            return Err(Error::Config(format!(
                "autorefresh hour window [{}, {}] is invalid",
                a.first_hour, a.last_hour
            )));
        }
        if a.first_weekday > a.last_weekday || a.last_weekday > 6 {
            return Err(Error::Config(format!(
                "autorefresh weekday window [{}, {}] is invalid",
                a.first_weekday, a.last_weekday
            )));
        }
        if self.nowcast.cache_ttl_secs == 0 {
            return Err(Error::Config("nowcast.cache_ttl_secs must be positive".to_string()));
        }
        if self.fetch.user_agents.is_empty()
            || self.fetch.viewports.is_empty()
            || self.fetch.locales.is_empty()
        {
            return Err(Error::Config("fetch identity pools must not be empty".to_string()));
        }
        Ok(())
    }

    /// Resolve a configured path against the root folder
    pub fn resolve_path(&self, root_folder: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            root_folder.join(path)
        }
    }
}

fn validate_diurnal(name: &str, weights: &[f64]) -> Result<()> {
    if weights.len() != HOURS_PER_DAY {
        return Err(Error::Config(format!(
            "{} needs {} weights, found {}",
            name,
            HOURS_PER_DAY,
            weights.len()
        )));
    }
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(Error::Config(format!("{} weights must be non-negative", name)));
    }
    if weights.iter().sum::<f64>() <= 0.0 {
        return Err(Error::Config(format!("{} weights sum to zero", name)));
    }
    Ok(())
}

/// Config file resolution:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. User config directory (`~/.config/footfall/config.toml`)
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|d| d.join("footfall").join("config.toml"))
        .filter(|p| p.exists())
}

/// Root folder resolution:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML `root_folder`
/// 4. OS-dependent default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &EngineConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV_VAR) {
        return PathBuf::from(path);
    }
    if let Some(path) = &config.root_folder {
        return path.clone();
    }
    default_root_folder()
}

/// OS-dependent default data folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("footfall"))
        .unwrap_or_else(|| PathBuf::from("./footfall_data"))
}
