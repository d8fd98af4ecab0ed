use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod redis;

/// Errors that can occur during store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to serialize value: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Failed to parse value: {0}")]
    Deserialization(String),
    #[error("Redis error: {0}")]
    Redis(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Key/value contract shared by every store backend.
///
/// Sessions and issued authorization codes are both persisted through this
/// interface, serialized as JSON. Implementations must be safe to share
/// between concurrently handled requests; concurrent writes to one key are
/// last-write-wins.
#[async_trait::async_trait]
pub trait StoreBackend: Send + Sync {
    /// Store a value under `key` with the backend's TTL
    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T)
        -> Result<(), StoreError>;

    /// Store a value that expires after `ttl` instead of the backend's TTL
    async fn set_with_ttl<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Retrieve a value, `None` when the key is unknown or expired
    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError>;

    /// Checks connectivity to the backend.
    ///
    /// For Redis this pings the server, the in-memory store is always healthy.
    async fn health_check(&self) -> Result<(), String>;
}

/// Store selected at startup from configuration.
#[derive(Clone)]
pub enum Store {
    /// In-memory store using Moka, only suitable for a single instance
    InMemory(memory::InMemoryStore),
    /// Redis-backed store shared with the login portal
    Redis(redis::RedisStore),
}

#[async_trait::async_trait]
impl StoreBackend for Store {
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        match self {
            Self::InMemory(store) => store.set(key, value).await,
            Self::Redis(store) => store.set(key, value).await,
        }
    }

    async fn set_with_ttl<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        match self {
            Self::InMemory(store) => store.set_with_ttl(key, value, ttl).await,
            Self::Redis(store) => store.set_with_ttl(key, value, ttl).await,
        }
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        match self {
            Self::InMemory(store) => store.get(key).await,
            Self::Redis(store) => store.get(key).await,
        }
    }

    async fn health_check(&self) -> Result<(), String> {
        match self {
            Self::InMemory(store) => store.health_check().await,
            Self::Redis(store) => store.health_check().await,
        }
    }
}

/// Creates the store backend named by the session configuration.
pub async fn create_store(config: &crate::config::SessionConfig) -> Result<Store, StoreError> {
    match config.store {
        crate::config::SessionStoreKind::InMemory => {
            let store = memory::InMemoryStore::new(config.ttl, config.memory.capacity)
                .map_err(StoreError::Config)?;
            Ok(Store::InMemory(store))
        }
        crate::config::SessionStoreKind::Redis => {
            let url = config.redis.url.as_deref().unwrap_or_default();
            if url.is_empty() {
                return Err(StoreError::Config(
                    "Redis URL is required for the redis session store".to_string(),
                ));
            }
            let store = redis::RedisStore::new(url, config.ttl)
                .await
                .map_err(StoreError::Config)?;
            Ok(Store::Redis(store))
        }
    }
}
