//! OAuth 2.0 / OpenID Connect protocol engine seam.
//!
//! The authorize flow only talks to the engine through [`ProtocolEngine`]:
//! once to turn raw parameters into an [`AuthorizeRequest`], and once to turn
//! a fully granted request into a response. Error and response rendering are
//! owned by the engine as well.

use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use http::header::LOCATION;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use url::Url;
use utoipa::ToSchema;

pub mod engine;

/// Unparsed authorize parameters, from the query string or a form body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawAuthorizeRequest {
    params: HashMap<String, String>,
}

impl RawAuthorizeRequest {
    pub fn new(params: HashMap<String, String>) -> Self {
        Self { params }
    }

    /// A parameter value, empty values being treated as absent
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

impl<const N: usize> From<[(&str, &str); N]> for RawAuthorizeRequest {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// A parsed and validated authorization request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeRequest {
    pub client_id: String,
    pub redirect_uri: Url,
    pub response_type: String,
    pub requested_scopes: Vec<String>,
    pub requested_audience: Vec<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    granted_scopes: Vec<String>,
    granted_audience: Vec<String>,
}

impl AuthorizeRequest {
    pub fn new(client_id: impl Into<String>, redirect_uri: Url, response_type: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri,
            response_type: response_type.into(),
            requested_scopes: Vec::new(),
            requested_audience: Vec::new(),
            state: None,
            nonce: None,
            code_challenge: None,
            code_challenge_method: None,
            granted_scopes: Vec::new(),
            granted_audience: Vec::new(),
        }
    }

    pub fn grant_scope(&mut self, scope: &str) {
        if !self.granted_scopes.iter().any(|s| s == scope) {
            self.granted_scopes.push(scope.to_string());
        }
    }

    pub fn grant_audience(&mut self, audience: &str) {
        if !self.granted_audience.iter().any(|a| a == audience) {
            self.granted_audience.push(audience.to_string());
        }
    }

    pub fn granted_scopes(&self) -> &[String] {
        &self.granted_scopes
    }

    pub fn granted_audience(&self) -> &[String] {
        &self.granted_audience
    }
}

/// Claims about the authorized principal handed to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationSession {
    pub subject: String,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub groups: Vec<String>,
    pub emails: Vec<String>,
    pub granted_scopes: Vec<String>,
    pub granted_audience: Vec<String>,
    pub authentication_level: crate::authorization::AuthenticationLevel,
    pub requested_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<DateTime<Utc>>,
}

/// Successful outcome of an authorize request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeResponse {
    /// Where the user agent is sent with the response parameters
    pub redirect_to: Url,
}

/// Protocol-level failures, rendered to the client by the engine
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid_request: {0}")]
    InvalidRequest(String),
    #[error("invalid_client: {0}")]
    InvalidClient(String),
    #[error("invalid_scope: {0}")]
    InvalidScope(String),
    #[error("unsupported_response_type: {0}")]
    UnsupportedResponseType(String),
    #[error("server_error: {0}")]
    ServerError(String),
}

impl ProtocolError {
    /// The authorize request names a client the registry does not know
    pub fn client_not_found(client_id: &str) -> Self {
        Self::InvalidClient(format!(
            "Unable to find related client configuration with name {client_id}"
        ))
    }

    /// RFC 6749 error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidScope(_) => "invalid_scope",
            Self::UnsupportedResponseType(_) => "unsupported_response_type",
            Self::ServerError(_) => "server_error",
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::InvalidRequest(d)
            | Self::InvalidClient(d)
            | Self::InvalidScope(d)
            | Self::UnsupportedResponseType(d)
            | Self::ServerError(d) => d,
        }
    }

    /// Status used when the error cannot be redirected to the client
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidClient(_) => StatusCode::UNAUTHORIZED,
            Self::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// OAuth 2.0 authorization error body
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthorizationErrorBody {
    /// Error code
    pub error: String,
    /// Human-readable error description
    pub error_description: Option<String>,
    /// State parameter (if provided in request)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// External OAuth 2.0 / OpenID Connect engine
#[async_trait::async_trait]
pub trait ProtocolEngine: Send + Sync {
    async fn parse_authorize_request(
        &self,
        raw: &RawAuthorizeRequest,
    ) -> Result<AuthorizeRequest, ProtocolError>;

    async fn build_authorize_response(
        &self,
        request: &AuthorizeRequest,
        session: &AuthorizationSession,
    ) -> Result<AuthorizeResponse, ProtocolError>;

    fn write_authorize_error(
        &self,
        request: Option<&AuthorizeRequest>,
        error: &ProtocolError,
    ) -> Response;

    fn write_authorize_response(
        &self,
        request: &AuthorizeRequest,
        response: &AuthorizeResponse,
    ) -> Response;
}

/// 302 Found to `location`
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response()
}
