//! footfall-engine: pedestrian-flow ingestion
//!
//! Polls footfall from public web sources (hourly report tables and weekly
//! chart images), fuses it into pedestrian densities per output area, and
//! keeps a cached nowcast warm during busy hours.

pub mod alerting;
pub mod browser;
pub mod digitizer;
pub mod fusion;
pub mod html;
pub mod nowcast;
pub mod scheduler;
pub mod sensors;
pub mod sources;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

use std::path::Path;
use std::sync::Arc;

use footfall_common::config::{EngineConfig, DATABASE_FILE_NAME};
use footfall_common::db::init::init_database;
use footfall_common::{Result, TtlCache};
use tracing::info;

use crate::browser::{renderer_from_config, FetchOrchestrator, HttpDownloader, Renderer};
use crate::digitizer::{ColorRankExtractor, OpticalPoller};
use crate::nowcast::{MockNowcastModel, ModelNowcast, NowcastGenerator, NowcastModel, NowcastService};
use crate::scheduler::Scheduler;
use crate::sensors::{JsonSensorCatalog, SensorPipeline};
use crate::sources::TabularPoller;

/// Fully wired engine services
pub struct Engine {
    pub cache: TtlCache,
    pub pipeline: Arc<SensorPipeline>,
    pub nowcast: NowcastService,
    pub scheduler: Scheduler,
}

impl Engine {
    /// Wire every service against the database in `root_folder`
    ///
    /// Without a `model` the nowcast is served from the mock payload file.
    pub async fn build(
        config: &EngineConfig,
        root_folder: &Path,
        renderer: Arc<dyn Renderer>,
        model: Option<Arc<dyn NowcastModel>>,
    ) -> Result<Self> {
        let db_path = root_folder.join(DATABASE_FILE_NAME);
        info!("Database: {}", db_path.display());
        let cache = TtlCache::new(init_database(&db_path).await?);

        let tz = config.autorefresh.timezone;
        let orchestrator = FetchOrchestrator::new(renderer, &config.fetch);
        let user_agent = config.fetch.user_agents.first().cloned().unwrap_or_default();

        let optical = OpticalPoller::new(
            orchestrator.clone(),
            Arc::new(HttpDownloader::new(&user_agent)?),
            Arc::new(ColorRankExtractor::from_config(&config.optical)),
            &cache,
            config.optical.clone(),
            config.fetch.download_timeout(),
            tz,
        )?;
        let tabular = TabularPoller::new(orchestrator, &cache, config.tabular.clone(), tz);

        let catalog_path = config.resolve_path(root_folder, &config.sensors.catalog_path);
        let pipeline = Arc::new(SensorPipeline::new(
            Arc::new(JsonSensorCatalog::new(catalog_path)),
            optical,
            tabular,
            config.fusion.clone(),
        ));

        let generator: Arc<dyn NowcastGenerator> = match model {
            Some(model) => Arc::new(ModelNowcast::new(Arc::clone(&pipeline), model)),
            None => Arc::new(MockNowcastModel::new(
                config.resolve_path(root_folder, &config.nowcast.mock_payload_path),
            )),
        };
        let nowcast = NowcastService::new(&cache, &config.nowcast, generator);

        let scheduler = Scheduler::new(
            nowcast.clone(),
            config.autorefresh.clone(),
            config.nowcast.cache_ttl(),
            alerting::sink_from_config(&config.alerting)?,
            config.alerting.destination.clone(),
        );

        Ok(Self {
            cache,
            pipeline,
            nowcast,
            scheduler,
        })
    }

    /// Engine using the renderer named in `fetch.engine`
    pub async fn build_default(config: &EngineConfig, root_folder: &Path) -> Result<Self> {
        Self::build(config, root_folder, renderer_from_config(&config.fetch), None).await
    }
}
