//! Required authentication level resolution.
//!
//! The policy engine maps a subject and the object it navigates to onto the
//! authentication level needed to proceed. The engine itself is pluggable:
//! [`Policy`] selects between an OPA deployment and a static level.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use thiserror::Error;
use url::Url;

pub mod opa;
pub mod static_policy;

/// How strongly a principal has proven its identity.
///
/// `NotAuthenticated < OneFactor < TwoFactor`. `Bypass` only makes sense as
/// a required level and is satisfied by any session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationLevel {
    #[default]
    NotAuthenticated,
    OneFactor,
    TwoFactor,
    Bypass,
}

impl AuthenticationLevel {
    fn rank(self) -> u8 {
        match self {
            Self::NotAuthenticated | Self::Bypass => 0,
            Self::OneFactor => 1,
            Self::TwoFactor => 2,
        }
    }
}

/// Whether `current` satisfies `required`
pub fn is_auth_level_sufficient(
    current: AuthenticationLevel,
    required: AuthenticationLevel,
) -> bool {
    required == AuthenticationLevel::Bypass || current.rank() >= required.rank()
}

/// The principal asking for access
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subject {
    pub username: String,
    pub groups: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,
}

/// The resource being accessed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Object {
    pub url: Url,
    pub method: String,
}

impl Object {
    /// A read access to `url`. Authorize-flow targets are always checked this way.
    pub fn read(url: Url) -> Self {
        Self {
            url,
            method: "GET".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Failed to send request to OPA: {0}")]
    Request(#[from] reqwest::Error),
    #[error("OPA request failed with status: {0}")]
    InvalidStatus(http::StatusCode),
    #[error("Failed to parse OPA response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// External policy engine contract. Implementations must not mutate inputs.
#[async_trait::async_trait]
pub trait PolicyEngine: Send + Sync {
    async fn required_level(
        &self,
        subject: &Subject,
        object: &Object,
    ) -> Result<AuthenticationLevel, PolicyError>;

    async fn health_check(&self) -> Result<(), String>;
}

/// Policy engine selected at startup
#[derive(Clone)]
pub enum Policy {
    Opa(opa::OpaPolicy),
    Static(static_policy::StaticPolicy),
}

#[async_trait::async_trait]
impl PolicyEngine for Policy {
    async fn required_level(
        &self,
        subject: &Subject,
        object: &Object,
    ) -> Result<AuthenticationLevel, PolicyError> {
        match self {
            Self::Opa(policy) => policy.required_level(subject, object).await,
            Self::Static(policy) => policy.required_level(subject, object).await,
        }
    }

    async fn health_check(&self) -> Result<(), String> {
        match self {
            Self::Opa(policy) => policy.health_check().await,
            Self::Static(policy) => policy.health_check().await,
        }
    }
}

/// Builds the policy engine named by the configuration
pub fn create_policy(config: &crate::config::PolicyConfig) -> Result<Policy, String> {
    match config.backend {
        crate::config::PolicyBackendKind::Opa => {
            Ok(Policy::Opa(opa::OpaPolicy::new(&config.opa)?))
        }
        crate::config::PolicyBackendKind::Static => Ok(Policy::Static(
            static_policy::StaticPolicy::new(config.default_level),
        )),
    }
}
