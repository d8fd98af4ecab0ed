//! Registered OpenID Connect clients.
//!
//! The registry is read-only once built. Requests work on an `Arc` snapshot
//! taken from [`SharedClientRegistry`]; a configuration reload builds a new
//! registry and swaps it in without touching the snapshots in flight.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// Static configuration of one registered client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfiguration {
    /// Unique client identifier
    pub id: String,
    /// Human readable name shown on the consent page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Redirect URIs the client may use, compared exactly
    pub redirect_uris: Vec<String>,
    /// Scopes the client may request
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Audiences the client may request
    #[serde(default)]
    pub audience: Vec<String>,
    /// Response types the client may use (default: code)
    #[serde(default = "default_response_types")]
    pub response_types: Vec<String>,
}

fn default_response_types() -> Vec<String> {
    vec!["code".to_string()]
}

impl ClientConfiguration {
    pub fn allows_redirect_uri(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|uri| uri == redirect_uri)
    }

    pub fn allows_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    pub fn allows_audience(&self, audience: &str) -> bool {
        self.audience.iter().any(|a| a == audience)
    }

    pub fn allows_response_type(&self, response_type: &str) -> bool {
        self.response_types.iter().any(|t| t == response_type)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Duplicate OpenID Connect client id: {0}")]
    DuplicateClient(String),
    #[error("OpenID Connect client {0} has no redirect URI")]
    MissingRedirectUri(String),
}

/// Immutable set of registered clients
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    clients: Vec<ClientConfiguration>,
}

impl ClientRegistry {
    pub fn new(clients: Vec<ClientConfiguration>) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        for client in &clients {
            if !seen.insert(client.id.as_str()) {
                return Err(RegistryError::DuplicateClient(client.id.clone()));
            }
            if client.redirect_uris.is_empty() {
                return Err(RegistryError::MissingRedirectUri(client.id.clone()));
            }
        }
        Ok(Self { clients })
    }

    /// Looks up a client by identifier
    pub fn find(&self, client_id: &str) -> Option<&ClientConfiguration> {
        self.clients.iter().find(|c| c.id == client_id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }
}

/// Process-wide handle on the current registry
#[derive(Debug, Clone)]
pub struct SharedClientRegistry {
    current: Arc<ArcSwap<ClientRegistry>>,
}

impl SharedClientRegistry {
    pub fn new(registry: ClientRegistry) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(registry)),
        }
    }

    /// Snapshot used for the whole lifetime of one request
    pub fn snapshot(&self) -> Arc<ClientRegistry> {
        self.current.load_full()
    }

    /// Atomically installs a rebuilt registry
    pub fn replace(&self, registry: ClientRegistry) {
        self.current.store(Arc::new(registry));
    }
}
