//! Sensor catalog and the full polling pipeline

use crate::digitizer::OpticalPoller;
use crate::fusion::fuse;
use crate::sources::tabular::TabularPoller;
use crate::types::{DensityRow, SensorDescriptor, SensorType};
use async_trait::async_trait;
use footfall_common::config::FusionConfig;
use footfall_common::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Source of sensor descriptors
#[async_trait]
pub trait SensorCatalog: Send + Sync {
    async fn load(&self) -> Result<Vec<SensorDescriptor>>;
}

/// Catalog file: a JSON array of descriptors, or a GeoJSON feature
/// collection whose feature properties are descriptors
#[derive(Debug, Clone)]
pub struct JsonSensorCatalog {
    path: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    Rows(Vec<SensorDescriptor>),
    Features { features: Vec<Feature> },
}

#[derive(Deserialize)]
struct Feature {
    properties: SensorDescriptor,
}

impl JsonSensorCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn parse(content: &str) -> Result<Vec<SensorDescriptor>> {
        let file: CatalogFile = serde_json::from_str(content)?;
        Ok(match file {
            CatalogFile::Rows(rows) => rows,
            CatalogFile::Features { features } => {
                features.into_iter().map(|f| f.properties).collect()
            }
        })
    }
}

#[async_trait]
impl SensorCatalog for JsonSensorCatalog {
    async fn load(&self) -> Result<Vec<SensorDescriptor>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::Config(format!("Read sensor catalog {} failed: {}", self.path.display(), e))
        })?;
        let descriptors = Self::parse(&content)?;
        debug!("Loaded {} sensor descriptors from {}", descriptors.len(), self.path.display());
        Ok(descriptors)
    }
}

/// Polls every source and fuses the results
pub struct SensorPipeline {
    catalog: Arc<dyn SensorCatalog>,
    optical: OpticalPoller,
    tabular: TabularPoller,
    fusion: FusionConfig,
}

impl SensorPipeline {
    pub fn new(
        catalog: Arc<dyn SensorCatalog>,
        optical: OpticalPoller,
        tabular: TabularPoller,
        fusion: FusionConfig,
    ) -> Self {
        Self {
            catalog,
            optical,
            tabular,
            fusion,
        }
    }

    /// One fused row per sensor that reported and lies in an output area
    pub async fn poll_all(&self) -> Result<Vec<DensityRow>> {
        let descriptors = self.catalog.load().await?;

        let optical = self.optical.poll().await?;
        let council: Vec<SensorDescriptor> = descriptors
            .iter()
            .filter(|d| d.sensor_type == SensorType::CouncilFlowCounter)
            .cloned()
            .collect();
        let tabular = self.tabular.poll(&council).await?;

        let rows = fuse(&descriptors, &[optical, tabular], &self.fusion)?;
        info!("Poll produced {} density rows", rows.len());
        Ok(rows)
    }
}
