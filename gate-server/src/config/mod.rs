pub(crate) use crate::config::oidc::OidcConfig;
pub(crate) use crate::config::policy::{OpaConfig, PolicyBackendKind, PolicyConfig};
pub(crate) use crate::config::session::{SessionConfig, SessionStoreKind};
use crate::clients::ClientRegistry;
use confique::Config;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub mod oidc;
pub mod policy;
pub mod session;

/// Configuration file read when `GATE_CONFIG_FILE` is not set
pub const DEFAULT_CONFIG_FILE: &str = "gate.toml";

/// Upper bound for request and OPA query timeouts, in seconds
const MAX_TIMEOUT_SECS: u64 = 3600;
/// Upper bound for the authorization code lifetime, in seconds
const MAX_CODE_TTL_SECS: u64 = 86_400;

/// Main configuration structure for the gate server
#[derive(Debug, Config, Clone)]
pub struct GateConfig {
    /// The port the server will listen to (default: 9091)
    #[config(env = "GATE_PORT", default = 9091)]
    pub port: u16,

    /// Upper bound in seconds for handling one authorize request (default: 10)
    #[config(env = "GATE_REQUEST_TIMEOUT", default = 10)]
    pub request_timeout: u64,

    /// Session configuration
    #[config(nested)]
    pub session: SessionConfig,

    /// Policy engine configuration
    #[config(nested)]
    pub policy: PolicyConfig,

    /// OpenID Connect provider configuration
    #[config(nested)]
    pub oidc: OidcConfig,
}

impl GateConfig {
    /// Loads the configuration from the environment and the file named by `GATE_CONFIG_FILE`
    pub fn new() -> Result<Self, String> {
        Self::load(Self::file_path())
    }

    /// Path of the configuration file, also re-read on reload
    pub fn file_path() -> PathBuf {
        std::env::var_os("GATE_CONFIG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Loads the configuration, environment variables taking precedence over the file.
    /// A missing file is not an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, String> {
        let config = Self::builder()
            .env()
            .file(path.as_ref())
            .load()
            .map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints the derive cannot express
    pub fn validate(&self) -> Result<(), String> {
        if self.session.store == SessionStoreKind::Redis
            && self.session.redis.url.as_deref().unwrap_or_default().is_empty()
        {
            return Err("session.redis.url is required when session.store is redis".to_string());
        }

        if self.policy.backend == PolicyBackendKind::Opa {
            Url::parse(&self.policy.opa.url)
                .map_err(|e| format!("policy.opa.url is not a valid URL: {e}"))?;
        }

        if self.request_timeout == 0 || self.request_timeout > MAX_TIMEOUT_SECS {
            return Err(format!(
                "request_timeout must be between 1 and {MAX_TIMEOUT_SECS} seconds"
            ));
        }
        if self.policy.opa.query_timeout > MAX_TIMEOUT_SECS {
            return Err(format!(
                "policy.opa.query_timeout must not exceed {MAX_TIMEOUT_SECS} seconds"
            ));
        }
        if self.oidc.code_ttl == 0 || self.oidc.code_ttl > MAX_CODE_TTL_SECS {
            return Err(format!(
                "oidc.code_ttl must be between 1 and {MAX_CODE_TTL_SECS} seconds"
            ));
        }

        ClientRegistry::new(self.oidc.clients.clone()).map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    #[cfg(test)]
    pub fn for_test_with_mocks(opa_mock: &wiremock::MockServer) -> Self {
        use crate::authorization::AuthenticationLevel;
        use crate::clients::ClientConfiguration;

        Self {
            port: 0,
            request_timeout: 5,
            session: SessionConfig::for_test(),
            policy: PolicyConfig {
                backend: PolicyBackendKind::Opa,
                default_level: AuthenticationLevel::TwoFactor,
                opa: OpaConfig {
                    url: opa_mock.uri(),
                    policy_path: "v1/data/gate/authorization/level".to_string(),
                    query_timeout: 5,
                    debug: None,
                },
            },
            oidc: OidcConfig {
                portal_path: "/".to_string(),
                consent_path: "/consent".to_string(),
                code_ttl: 600,
                clients: vec![ClientConfiguration {
                    id: "grafana".to_string(),
                    description: Some("Grafana".to_string()),
                    redirect_uris: vec!["https://grafana.example.com/login/generic_oauth"
                        .to_string()],
                    scopes: vec![
                        "openid".to_string(),
                        "profile".to_string(),
                        "email".to_string(),
                        "groups".to_string(),
                    ],
                    audience: vec!["https://grafana.example.com".to_string()],
                    response_types: vec!["code".to_string()],
                }],
            },
        }
    }
}
