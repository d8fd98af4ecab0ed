use confique::Config;
use serde::Deserialize;

/// Specifies which store implementation backs sessions and authorization codes
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStoreKind {
    #[default]
    InMemory,
    Redis,
}

/// Configuration for the session subsystem
#[derive(Debug, Config, Clone)]
pub struct SessionConfig {
    /// Store type: "in-memory" or "redis" (default: in-memory)
    #[config(env = "GATE_SESSION_STORE", default = "in-memory")]
    pub store: SessionStoreKind,

    /// Session inactivity TTL in seconds (default: 1 hour)
    #[config(env = "GATE_SESSION_TTL", default = 3600)]
    pub ttl: u64,

    /// Name of the cookie carrying the session ID (default: gate_session)
    #[config(env = "GATE_SESSION_COOKIE_NAME", default = "gate_session")]
    pub cookie_name: String,

    /// Domain attribute of the session cookie, shared with the login portal
    #[config(env = "GATE_SESSION_COOKIE_DOMAIN")]
    pub cookie_domain: Option<String>,

    /// In-memory store specific configuration
    #[config(nested)]
    pub memory: InMemoryConfig,

    /// Redis store specific configuration
    #[config(nested)]
    pub redis: RedisConfig,
}

/// In-memory store configuration options
#[derive(Debug, Config, Clone)]
pub struct InMemoryConfig {
    /// Maximum capacity in MiB (default: 128 MiB)
    #[config(env = "GATE_SESSION_MEMORY_CAPACITY", default = 128)]
    pub capacity: usize,
}

/// Redis store configuration options
#[derive(Debug, Config, Clone)]
pub struct RedisConfig {
    /// Redis connection string
    #[config(env = "GATE_SESSION_REDIS_URL")]
    pub url: Option<String>,
}

#[cfg(test)]
impl SessionConfig {
    pub fn for_test() -> Self {
        Self {
            store: SessionStoreKind::InMemory,
            ttl: 60,
            cookie_name: "gate_session".to_string(),
            cookie_domain: None,
            memory: InMemoryConfig { capacity: 16 },
            redis: RedisConfig { url: None },
        }
    }
}
