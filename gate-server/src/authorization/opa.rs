use super::{AuthenticationLevel, Object, PolicyEngine, PolicyError, Subject};
use crate::config::OpaConfig;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::HeaderMap;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value::{Bool, Object as JsonObject};
use std::time::Duration;

/// Resolves required levels through an Open Policy Agent decision
#[derive(Clone)]
pub struct OpaPolicy {
    client: Client,
    decision_url: String,
    health_url: String,
    debug: Option<bool>,
}

impl OpaPolicy {
    pub fn new(config: &OpaConfig) -> Result<Self, String> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(config.query_timeout))
            .connect_timeout(Duration::from_secs(2))
            .default_headers(headers)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| format!("Failed to create OPA client: {e}"))?;

        Ok(Self {
            client,
            decision_url: config.decision_url(),
            health_url: format!("{}/health", config.url.trim_end_matches('/')),
            debug: config.debug,
        })
    }
}

#[async_trait::async_trait]
impl PolicyEngine for OpaPolicy {
    async fn required_level(
        &self,
        subject: &Subject,
        object: &Object,
    ) -> Result<AuthenticationLevel, PolicyError> {
        let request = create_opa_request(&LevelQuery { subject, object }, self.debug)?;
        debug!(
            "Querying OPA at {} for {} {}",
            self.decision_url, object.method, object.url
        );

        let response = self
            .client
            .post(&self.decision_url)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PolicyError::InvalidStatus(response.status()));
        }

        let body = response.bytes().await?;
        let response: OpaResponse<LevelResult> = serde_json::from_slice(&body)?;
        Ok(response.result.level)
    }

    async fn health_check(&self) -> Result<(), String> {
        match self.client.get(&self.health_url).send().await {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => Err(format!("OPA health check failed: {}", response.status())),
            Err(e) => Err(format!("OPA health check failed: {e}")),
        }
    }
}

/// Input of the level decision
#[derive(Debug, Serialize)]
struct LevelQuery<'a> {
    subject: &'a Subject,
    object: &'a Object,
}

#[derive(Debug, Deserialize)]
struct LevelResult {
    level: AuthenticationLevel,
}

/// A generic wrapper for OPA requests, wrapping the input data.
/// https://www.openpolicyagent.org/docs/latest/integration/#named-policy-decisions
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OpaRequest<T> {
    pub input: T,
}

/// A generic wrapper for OPA responses, wrapping the result data.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OpaResponse<T> {
    pub result: T,
}

/// Serializes `value` into the `input` field of an OPA request, injecting
/// `use_debugger` into object inputs when the debug flag is set.
fn create_opa_request<T: Serialize>(
    value: &T,
    debug: Option<bool>,
) -> Result<OpaRequest<serde_json::Value>, serde_json::Error> {
    let mut value = serde_json::to_value(value)?;
    if let Some(debug) = debug {
        if let JsonObject(ref mut obj) = value {
            if !obj.contains_key("use_debugger") {
                obj.insert("use_debugger".to_string(), Bool(debug));
            }
        }
    }
    Ok(OpaRequest { input: value })
}
