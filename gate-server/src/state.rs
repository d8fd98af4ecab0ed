use crate::authorization::{create_policy, PolicyEngine};
use crate::clients::{ClientRegistry, RegistryError, SharedClientRegistry};
use crate::config::GateConfig;
use crate::oidc::engine::CodeFlowEngine;
use crate::oidc::ProtocolEngine;
use crate::session::{SessionManager, SessionStore};
use crate::store::{create_store, Store};
use log::info;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GateConfig>,
    pub store: Store,
    pub sessions: Arc<dyn SessionStore>,
    pub policy: Arc<dyn PolicyEngine>,
    pub clients: SharedClientRegistry,
    pub engine: Arc<dyn ProtocolEngine>,
}

impl AppState {
    pub async fn new(config: &GateConfig) -> Result<Self, String> {
        let store = create_store(&config.session)
            .await
            .map_err(|e| format!("Failed to create session store: {e}"))?;
        Self::with_store(config, store)
    }

    /// Builds the state around an already created store
    pub fn with_store(config: &GateConfig, store: Store) -> Result<Self, String> {
        let registry = ClientRegistry::new(config.oidc.clients.clone()).map_err(|e| e.to_string())?;
        info!("Loaded {} OpenID Connect clients", registry.len());
        let clients = SharedClientRegistry::new(registry);

        let policy = create_policy(&config.policy)?;
        let sessions = SessionManager::new(store.clone(), &config.session);
        let engine = CodeFlowEngine::new(clients.clone(), store.clone(), config.oidc.code_ttl);

        Ok(Self {
            config: Arc::new(config.clone()),
            store,
            sessions: Arc::new(sessions),
            policy: Arc::new(policy),
            clients,
            engine: Arc::new(engine),
        })
    }

    /// Swaps in the clients of a freshly loaded configuration
    pub fn reload_clients(&self, config: &GateConfig) -> Result<usize, RegistryError> {
        let registry = ClientRegistry::new(config.oidc.clients.clone())?;
        let count = registry.len();
        self.clients.replace(registry);
        Ok(count)
    }

    #[cfg(test)]
    pub fn for_testing(config: &GateConfig) -> Self {
        use crate::store::memory::InMemoryStore;

        let store = Store::InMemory(
            InMemoryStore::new(config.session.ttl, config.session.memory.capacity)
                .expect("Failed to create test store"),
        );
        Self::with_store(config, store).expect("Failed to create test state")
    }
}
