use async_trait::async_trait;
use redis::AsyncCommands;

const KEY_PREFIX: &str = "classification_sync:state";

/// Persistent key/value store for sync flags and buckets. Values are JSON.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StateStoreError>;

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), StateStoreError>;

    async fn delete(&self, key: &str) -> Result<(), StateStoreError>;

    /// Stored value, or `default` when the key is absent.
    async fn get_or(&self, key: &str, default: serde_json::Value) -> Result<serde_json::Value, StateStoreError> {
        Ok(self.get(key).await?.unwrap_or(default))
    }
}

/// State store keeping each key as a JSON string in Redis.
pub struct RedisStateStore {
    client: redis::Client,
}

impl RedisStateStore {
    pub fn new(redis_url: &str) -> Result<Self, StateStoreError> {
        let client = redis::Client::open(redis_url).map_err(StateStoreError::Redis)?;
        Ok(Self { client })
    }

    fn key(key: &str) -> String {
        format!("{KEY_PREFIX}:{key}")
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StateStoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(StateStoreError::Redis)?;
        let raw: Option<String> = conn.get(Self::key(key)).await.map_err(StateStoreError::Redis)?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(StateStoreError::Serialize))
            .transpose()
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), StateStoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(StateStoreError::Redis)?;
        let raw = serde_json::to_string(&value).map_err(StateStoreError::Serialize)?;
        conn.set::<_, _, ()>(Self::key(key), raw)
            .await
            .map_err(StateStoreError::Redis)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StateStoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(StateStoreError::Redis)?;
        conn.del::<_, ()>(Self::key(key)).await.map_err(StateStoreError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
