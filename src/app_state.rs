use sqlx::PgPool;
use std::sync::Arc;

use crate::config::{AppConfig, ConfigError};
use crate::db::{self, PgCatalog};
use crate::services::{
    classifier::{ClassifierError, HttpClassificationClient},
    queue::{QueueError, RedisJobQueue},
    state_store::{RedisStateStore, StateStoreError},
    sync_handler::SyncHandler,
};

/// Shared application state passed to all route handlers and the worker loop.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub queue: Arc<RedisJobQueue>,
    pub sync: Arc<SyncHandler>,
}

impl AppState {
    pub fn new(db: PgPool, queue: Arc<RedisJobQueue>, sync: SyncHandler) -> Self {
        Self {
            db,
            queue,
            sync: Arc::new(sync),
        }
    }

    /// Connect every collaborator described by `config`.
    pub async fn connect(config: &AppConfig, max_connections: u32) -> Result<Self, StartupError> {
        let sync_config = config.sync_config()?;

        tracing::info!("Connecting to PostgreSQL catalog");
        let pool = db::init_pool(&config.database_url, max_connections).await?;

        tracing::info!("Connecting to Redis job queue and state store");
        let queue = Arc::new(RedisJobQueue::new(&config.redis_url)?);
        let store = Arc::new(RedisStateStore::new(&config.redis_url)?);

        let classifier = HttpClassificationClient::new(
            config.api_environment,
            config.company_id.clone(),
            config.classification_api_username.clone(),
            config.classification_api_password.clone(),
        )?
        .with_item_master_url(config.item_master_url.clone());

        tracing::info!(
            environment = %config.api_environment,
            countries = ?sync_config.countries,
            batch_size = sync_config.batch_size,
            "Classification sync configured"
        );

        let sync = SyncHandler::new(
            queue.clone(),
            store,
            Arc::new(PgCatalog::new(pool.clone())),
            Arc::new(classifier),
            sync_config,
        );

        Ok(Self::new(pool, queue, sync))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Invalid sync configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("State store error: {0}")]
    State(#[from] StateStoreError),

    #[error("Classification client error: {0}")]
    Classifier(#[from] ClassifierError),
}
