//! Nowcast cache
//!
//! The nowcast is expensive (a full poll of every source plus the model), so
//! it is served from the `nowcast` cache namespace and only regenerated on a
//! miss or by the autorefresh scheduler.

use crate::sensors::SensorPipeline;
use crate::types::DensityRow;
use async_trait::async_trait;
use footfall_common::config::NowcastConfig;
use footfall_common::{CacheNamespace, Error, Result, TtlCache};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const NOWCAST_NAMESPACE: &str = "nowcast";
/// Set when a cached nowcast is served, cleared on regeneration
pub const READ_MARKER_NAMESPACE: &str = "nowcast_read_marker";

/// Downstream model turning fused rows into a nowcast
#[async_trait]
pub trait NowcastModel: Send + Sync {
    async fn generate(&self, rows: &[DensityRow]) -> Result<Value>;
}

/// Produces a complete nowcast
#[async_trait]
pub trait NowcastGenerator: Send + Sync {
    async fn generate(&self) -> Result<Value>;
}

/// Polls every sensor and feeds the fused rows to a model
pub struct ModelNowcast {
    pipeline: Arc<SensorPipeline>,
    model: Arc<dyn NowcastModel>,
}

impl ModelNowcast {
    pub fn new(pipeline: Arc<SensorPipeline>, model: Arc<dyn NowcastModel>) -> Self {
        Self { pipeline, model }
    }
}

#[async_trait]
impl NowcastGenerator for ModelNowcast {
    async fn generate(&self) -> Result<Value> {
        let rows = self.pipeline.poll_all().await?;
        self.model.generate(&rows).await
    }
}

/// Serves a fixed payload from disk when no real model is available
#[derive(Debug, Clone)]
pub struct MockNowcastModel {
    path: PathBuf,
}

impl MockNowcastModel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<Value> {
        warn!(
            "Nowcast requested but no model is available, returning mock data from {}",
            self.path.display()
        );
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::Model(format!("Read mock nowcast {} failed: {}", self.path.display(), e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait]
impl NowcastModel for MockNowcastModel {
    async fn generate(&self, _rows: &[DensityRow]) -> Result<Value> {
        self.load().await
    }
}

#[async_trait]
impl NowcastGenerator for MockNowcastModel {
    async fn generate(&self) -> Result<Value> {
        self.load().await
    }
}

/// Cached access to the current nowcast
#[derive(Clone)]
pub struct NowcastService {
    cache: CacheNamespace,
    read_marker: CacheNamespace,
    generator: Arc<dyn NowcastGenerator>,
}

impl NowcastService {
    pub fn new(cache: &TtlCache, config: &NowcastConfig, generator: Arc<dyn NowcastGenerator>) -> Self {
        Self {
            cache: cache.namespace(NOWCAST_NAMESPACE, config.cache_ttl()),
            read_marker: cache.namespace(READ_MARKER_NAMESPACE, config.cache_ttl()),
            generator,
        }
    }

    /// Cached nowcast, regenerating on a miss
    pub async fn get_nowcast(&self) -> Result<Value> {
        match self.cache.read::<Value>().await? {
            Some(nowcast) => {
                debug!("Serving cached nowcast");
                self.read_marker.write(&true).await?;
                Ok(nowcast)
            }
            None => {
                info!("Nowcast cache empty or stale, generating");
                self.refresh().await
            }
        }
    }

    /// Regenerate and cache unconditionally
    ///
    /// Nothing is written until generation completes, so dropping the future
    /// part-way leaves the previous entry in place. The two writes are not
    /// atomic: the read marker is cleared first, so an interruption between
    /// them leaves the old nowcast marked unread until its next hit.
    pub async fn refresh(&self) -> Result<Value> {
        let nowcast = self.generator.generate().await?;
        self.read_marker.write(&false).await?;
        self.cache.write(&nowcast).await?;
        info!("Nowcast regenerated");
        Ok(nowcast)
    }

    /// Whether a cached nowcast was served since the last regeneration
    pub async fn read_since_refresh(&self) -> Result<bool> {
        Ok(self.read_marker.read::<bool>().await?.unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_cache;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingGenerator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NowcastGenerator for CountingGenerator {
        async fn generate(&self) -> Result<Value> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(json!({ "generation": n }))
        }
    }

    fn counting() -> Arc<CountingGenerator> {
        Arc::new(CountingGenerator {
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_miss_generates_then_hit_serves_cache() {
        let (_dir, cache) = temp_cache().await;
        let generator = counting();
        let service = NowcastService::new(&cache, &NowcastConfig::default(), generator.clone());

        let first = service.get_nowcast().await.unwrap();
        let second = service.get_nowcast().await.unwrap();

        assert_eq!(first, json!({ "generation": 1 }));
        assert_eq!(second, first);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_marker_set_by_hit_cleared_by_refresh() {
        let (_dir, cache) = temp_cache().await;
        let service = NowcastService::new(&cache, &NowcastConfig::default(), counting());

        service.get_nowcast().await.unwrap();
        assert!(!service.read_since_refresh().await.unwrap());

        service.get_nowcast().await.unwrap();
        assert!(service.read_since_refresh().await.unwrap());

        service.refresh().await.unwrap();
        assert!(!service.read_since_refresh().await.unwrap());
    }

    #[tokio::test]
    async fn test_interrupted_refresh_recovers_on_next_read() {
        let (_dir, cache) = temp_cache().await;
        let config = NowcastConfig::default();
        let service = NowcastService::new(&cache, &config, counting());
        service.get_nowcast().await.unwrap();
        service.get_nowcast().await.unwrap();

        // Marker cleared but the new payload never written
        cache
            .namespace(READ_MARKER_NAMESPACE, config.cache_ttl())
            .write(&false)
            .await
            .unwrap();
        assert!(!service.read_since_refresh().await.unwrap());

        assert_eq!(service.get_nowcast().await.unwrap(), json!({ "generation": 1 }));
        assert!(service.read_since_refresh().await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_replaces_cached_value() {
        let (_dir, cache) = temp_cache().await;
        let service = NowcastService::new(&cache, &NowcastConfig::default(), counting());

        service.get_nowcast().await.unwrap();
        service.refresh().await.unwrap();

        assert_eq!(service.get_nowcast().await.unwrap(), json!({ "generation": 2 }));
    }

    #[tokio::test]
    async fn test_mock_model_reads_payload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mock_nowcast.json");
        std::fs::write(&path, r#"{"areas": [{"oa_code": "S1", "density": 0.1}]}"#).unwrap();

        let value = NowcastGenerator::generate(&MockNowcastModel::new(&path)).await.unwrap();
        assert_eq!(value["areas"][0]["oa_code"], "S1");
    }

    #[tokio::test]
    async fn test_mock_model_missing_file_is_model_error() {
        let dir = TempDir::new().unwrap();
        let mock = MockNowcastModel::new(dir.path().join("absent.json"));
        assert!(matches!(
            NowcastModel::generate(&mock, &[]).await,
            Err(Error::Model(_))
        ));
    }
}
