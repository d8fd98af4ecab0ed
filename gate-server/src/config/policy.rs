use crate::authorization::AuthenticationLevel;
use confique::Config;
use serde::Deserialize;

/// Which policy engine resolves the required authentication level
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyBackendKind {
    #[default]
    Static,
    Opa,
}

/// Configuration for the policy engine
#[derive(Debug, Config, Clone)]
pub struct PolicyConfig {
    /// Policy backend: "static" or "opa" (default: static)
    #[config(env = "GATE_POLICY_BACKEND", default = "static")]
    pub backend: PolicyBackendKind,

    /// Level required for every resource by the static backend (default: two_factor)
    #[config(env = "GATE_POLICY_DEFAULT_LEVEL", default = "two_factor")]
    pub default_level: AuthenticationLevel,

    /// OPA service configuration
    #[config(nested)]
    pub opa: OpaConfig,
}

/// Configuration for the OPA service
#[derive(Debug, Config, Clone)]
pub struct OpaConfig {
    /// The URL of the OPA service (default: http://localhost:8181)
    #[config(env = "GATE_POLICY_OPA_URL", default = "http://localhost:8181")]
    pub url: String,

    /// Path of the decision returning the required level
    #[config(
        env = "GATE_POLICY_OPA_POLICY_PATH",
        default = "v1/data/gate/authorization/level"
    )]
    pub policy_path: String,

    /// The timeout for OPA queries in seconds (default: 1)
    #[config(env = "GATE_POLICY_OPA_QUERY_TIMEOUT", default = 1)]
    pub query_timeout: u64,

    /// Injects `use_debugger` into OPA inputs
    #[config(env = "GATE_POLICY_OPA_DEBUG")]
    pub debug: Option<bool>,
}

impl OpaConfig {
    /// Full URL of the level decision
    pub fn decision_url(&self) -> String {
        let path = self.policy_path.trim_start_matches('/');
        format!("{}/{}", self.url.trim_end_matches('/'), path)
    }
}
