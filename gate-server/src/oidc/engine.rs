//! Authorization code flow engine backed by the shared store.

use super::{
    found, AuthorizationErrorBody, AuthorizationSession, AuthorizeRequest, AuthorizeResponse,
    ProtocolEngine, ProtocolError, RawAuthorizeRequest,
};
use crate::authorization::AuthenticationLevel;
use crate::clients::SharedClientRegistry;
use crate::store::{Store, StoreBackend};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

const CODE_RESPONSE_TYPE: &str = "code";

/// Authorization code persisted until the token endpoint redeems it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAuthorizationCode {
    pub subject: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub granted_scopes: Vec<String>,
    pub granted_audience: Vec<String>,
    pub authentication_level: AuthenticationLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<DateTime<Utc>>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Store key of an authorization code. Only the digest of the code is kept.
pub fn code_key(code: &str) -> String {
    format!("oidc_code:{:x}", Sha256::digest(code.as_bytes()))
}

/// `response_type=code` engine validating against the client registry
#[derive(Clone)]
pub struct CodeFlowEngine {
    clients: SharedClientRegistry,
    store: Store,
    code_ttl: u64,
}

impl CodeFlowEngine {
    pub fn new(clients: SharedClientRegistry, store: Store, code_ttl: u64) -> Self {
        Self {
            clients,
            store,
            code_ttl,
        }
    }

    fn generate_code() -> String {
        let mut rng = rand::thread_rng();
        let code_bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
        URL_SAFE_NO_PAD.encode(code_bytes)
    }
}

/// Splits a space-delimited parameter, dropping duplicates but keeping order
fn split_list(value: Option<&str>) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();
    for item in value.unwrap_or_default().split_whitespace() {
        if !items.iter().any(|existing| existing == item) {
            items.push(item.to_string());
        }
    }
    items
}

fn required<'a>(raw: &'a RawAuthorizeRequest, name: &str) -> Result<&'a str, ProtocolError> {
    raw.get(name)
        .ok_or_else(|| ProtocolError::InvalidRequest(format!("The {name} parameter is missing")))
}

#[async_trait::async_trait]
impl ProtocolEngine for CodeFlowEngine {
    async fn parse_authorize_request(
        &self,
        raw: &RawAuthorizeRequest,
    ) -> Result<AuthorizeRequest, ProtocolError> {
        let client_id = required(raw, "client_id")?;
        let registry = self.clients.snapshot();
        let client = registry
            .find(client_id)
            .ok_or_else(|| ProtocolError::client_not_found(client_id))?;

        let redirect_uri = required(raw, "redirect_uri")?;
        if !client.allows_redirect_uri(redirect_uri) {
            return Err(ProtocolError::InvalidRequest(
                "The redirect_uri is not registered for this client".to_string(),
            ));
        }
        let redirect_uri = Url::parse(redirect_uri).map_err(|e| {
            ProtocolError::InvalidRequest(format!("The redirect_uri is malformed: {e}"))
        })?;

        let response_type = required(raw, "response_type")?;
        if !client.allows_response_type(response_type) {
            return Err(ProtocolError::UnsupportedResponseType(format!(
                "The client is not allowed to use response_type {response_type}"
            )));
        }
        if response_type != CODE_RESPONSE_TYPE {
            return Err(ProtocolError::UnsupportedResponseType(format!(
                "The response_type {response_type} is not supported"
            )));
        }

        let requested_scopes = split_list(raw.get("scope"));
        if let Some(scope) = requested_scopes.iter().find(|s| !client.allows_scope(s)) {
            return Err(ProtocolError::InvalidScope(format!(
                "The client is not allowed to request scope {scope}"
            )));
        }

        let requested_audience = split_list(raw.get("audience"));
        if let Some(audience) = requested_audience.iter().find(|a| !client.allows_audience(a)) {
            return Err(ProtocolError::InvalidRequest(format!(
                "The client is not allowed to request audience {audience}"
            )));
        }

        let code_challenge = raw.get("code_challenge").map(str::to_string);
        let code_challenge_method = raw.get("code_challenge_method").map(str::to_string);
        match (&code_challenge, code_challenge_method.as_deref()) {
            (_, None) | (Some(_), Some("S256" | "plain")) => {}
            (None, Some(_)) => {
                return Err(ProtocolError::InvalidRequest(
                    "The code_challenge_method was given without a code_challenge".to_string(),
                ))
            }
            (Some(_), Some(method)) => {
                return Err(ProtocolError::InvalidRequest(format!(
                    "Unsupported code_challenge_method: {method}"
                )))
            }
        }

        let mut request = AuthorizeRequest::new(client_id, redirect_uri, response_type);
        request.requested_scopes = requested_scopes;
        request.requested_audience = requested_audience;
        request.state = raw.get("state").map(str::to_string);
        request.nonce = raw.get("nonce").map(str::to_string);
        request.code_challenge = code_challenge;
        request.code_challenge_method = code_challenge_method;
        Ok(request)
    }

    async fn build_authorize_response(
        &self,
        request: &AuthorizeRequest,
        session: &AuthorizationSession,
    ) -> Result<AuthorizeResponse, ProtocolError> {
        let code = Self::generate_code();
        let now = Utc::now();
        let code_ttl = i64::try_from(self.code_ttl.min(u64::from(u32::MAX))).unwrap_or(0);

        let stored = StoredAuthorizationCode {
            subject: session.subject.clone(),
            client_id: request.client_id.clone(),
            redirect_uri: request.redirect_uri.to_string(),
            granted_scopes: request.granted_scopes().to_vec(),
            granted_audience: request.granted_audience().to_vec(),
            authentication_level: session.authentication_level,
            nonce: request.nonce.clone(),
            code_challenge: request.code_challenge.clone(),
            code_challenge_method: request.code_challenge_method.clone(),
            auth_time: session.auth_time,
            issued_at: now,
            expires_at: now + Duration::seconds(code_ttl),
        };

        self.store
            .set_with_ttl(
                &code_key(&code),
                &stored,
                std::time::Duration::from_secs(self.code_ttl),
            )
            .await
            .map_err(|e| {
                error!("Failed to store authorization code: {e}");
                ProtocolError::ServerError("Unable to issue an authorization code".to_string())
            })?;

        debug!(
            "Issued authorization code for user '{}' via client '{}' with {} scopes, expires in {}s",
            session.subject,
            request.client_id,
            stored.granted_scopes.len(),
            self.code_ttl
        );

        let mut redirect_to = request.redirect_uri.clone();
        {
            let mut query = redirect_to.query_pairs_mut();
            query.append_pair("code", &code);
            if let Some(state) = &request.state {
                query.append_pair("state", state);
            }
        }
        Ok(AuthorizeResponse { redirect_to })
    }

    fn write_authorize_error(
        &self,
        request: Option<&AuthorizeRequest>,
        error: &ProtocolError,
    ) -> Response {
        warn!("Authorization request rejected: {error}");

        // An invalid client must never be redirected to
        let request = request.filter(|_| !matches!(error, ProtocolError::InvalidClient(_)));
        match request {
            Some(request) => {
                let mut location = request.redirect_uri.clone();
                {
                    let mut query = location.query_pairs_mut();
                    query.append_pair("error", error.code());
                    query.append_pair("error_description", error.description());
                    if let Some(state) = &request.state {
                        query.append_pair("state", state);
                    }
                }
                found(location.as_str())
            }
            None => (
                error.status(),
                Json(AuthorizationErrorBody {
                    error: error.code().to_string(),
                    error_description: Some(error.description().to_string()),
                    state: None,
                }),
            )
                .into_response(),
        }
    }

    fn write_authorize_response(
        &self,
        _request: &AuthorizeRequest,
        response: &AuthorizeResponse,
    ) -> Response {
        found(response.redirect_to.as_str())
    }
}
