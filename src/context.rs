//! Application Context
//!
//! Owns exactly one cache, one event store and one replay engine. Components
//! are built explicitly from [`AppConfig`] and handed around as `Arc`s; there
//! is no process-wide instance.

use std::sync::Arc;

use tracing::info;

use crate::cache::{RemoteBackend, TieredCache};
use crate::config::AppConfig;
use crate::error::Result;
use crate::events::{Connection, EventDispatcher, EventStore, ReplayEngine, SqliteConnection};

/// Assembled application components
#[derive(Clone)]
pub struct AppContext {
    pub config: AppConfig,
    pub cache: Arc<TieredCache>,
    pub events: Arc<EventStore>,
    pub replay: Arc<ReplayEngine>,
}

impl AppContext {
    /// Assemble from explicit collaborators. Without a `remote` backend the
    /// cache connects to Redis (when compiled in) or serves from memory.
    pub async fn build(
        config: AppConfig,
        connection: Arc<dyn Connection>,
        dispatcher: Arc<dyn EventDispatcher>,
        remote: Option<Arc<dyn RemoteBackend>>,
    ) -> Result<Self> {
        config.validate()?;

        let cache = match remote {
            Some(backend) => TieredCache::connect(config.cache.clone(), backend).await?,
            None => default_cache(&config).await?,
        };
        let events = Arc::new(EventStore::open(connection, config.event_store.clone()).await?);
        let replay = Arc::new(ReplayEngine::new(events.clone(), dispatcher));

        info!(
            cache_provider = %config.cache.provider,
            table_prefix = %config.event_store.table_prefix,
            "Application context ready"
        );

        Ok(Self {
            config,
            cache: Arc::new(cache),
            events,
            replay,
        })
    }

    /// Open the configured SQLite database and assemble
    pub async fn open(config: AppConfig, dispatcher: Arc<dyn EventDispatcher>) -> Result<Self> {
        let connection = Arc::new(SqliteConnection::connect(&config.database_url).await?);
        Self::build(config, connection, dispatcher, None).await
    }
}

#[cfg(feature = "redis-backend")]
async fn default_cache(config: &AppConfig) -> Result<TieredCache> {
    TieredCache::from_config(config.cache.clone()).await
}

#[cfg(not(feature = "redis-backend"))]
async fn default_cache(config: &AppConfig) -> Result<TieredCache> {
    if config.cache.provider.uses_remote() {
        return Err(crate::error::Error::Config(format!(
            "cache provider '{}' needs a remote backend; build with the redis-backend feature",
            config.cache.provider
        )));
    }
    Ok(TieredCache::new(config.cache.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheOptions, CacheProvider, InMemoryRemoteBackend, RemoteConfig};
    use crate::events::{InMemoryDispatcher, NewEvent, ReplayOptions};
    use serde_json::json;

    async fn connection() -> Arc<dyn Connection> {
        Arc::new(SqliteConnection::in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_build_wires_components() {
        let mut config = AppConfig::default();
        config.cache.provider = CacheProvider::Hybrid;
        config.cache.remote = Some(RemoteConfig::default());

        let sink = Arc::new(InMemoryDispatcher::new());
        let ctx = AppContext::build(
            config,
            connection().await,
            sink.clone(),
            Some(Arc::new(InMemoryRemoteBackend::new())),
        )
        .await
        .unwrap();

        assert!(ctx.cache.remote().is_some());
        ctx.cache
            .set("session:1", json!({"user": 1}), &CacheOptions::default())
            .await
            .unwrap();
        assert!(ctx.cache.remote().unwrap().has("session:1").await.unwrap());

        ctx.events
            .append_to_stream("user-1", vec![NewEvent::new("Registered", json!({}))], None)
            .await
            .unwrap();
        let result = ctx.replay.replay_events(ReplayOptions::default()).await.unwrap();
        assert_eq!(result.progress.processed_events, 1);
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test]
    async fn test_memory_provider_needs_no_backend() {
        let ctx = AppContext::build(
            AppConfig::default(),
            connection().await,
            Arc::new(InMemoryDispatcher::new()),
            None,
        )
        .await
        .unwrap();
        assert!(ctx.cache.remote().is_none());
    }

    #[cfg(not(feature = "redis-backend"))]
    #[tokio::test]
    async fn test_remote_provider_without_backend_fails() {
        let mut config = AppConfig::default();
        config.cache.provider = CacheProvider::Redis;
        config.cache.remote = Some(RemoteConfig::default());

        let result = AppContext::build(
            config,
            connection().await,
            Arc::new(InMemoryDispatcher::new()),
            None,
        )
        .await;
        assert!(matches!(result, Err(crate::error::Error::Config(_))));
    }
}
