//! Browser sessions shared with the login portal.
//!
//! The portal authenticates the user and records the outcome in the session;
//! this service reads it back and maintains the OpenID Connect workflow record.

use crate::authorization::AuthenticationLevel;
use crate::config::SessionConfig;
use crate::store::{Store, StoreBackend, StoreError};
use crate::workflow::OidcWorkflowSession;
use http::header::{HeaderValue, COOKIE};
use http::HeaderMap;
use log::debug;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

const SESSION_ID_LENGTH: usize = 32;

/// Per-browser session state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSession {
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub authentication_level: AuthenticationLevel,
    /// Unix time of the last successful authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticated_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc_workflow_session: Option<OidcWorkflowSession>,
}

/// A session loaded for the duration of one request
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: String,
    /// No session existed for the request, the cookie must be issued
    pub is_new: bool,
    pub session: UserSession,
}

/// Session store contract consumed by the authorize flow
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads the session named by the request cookie, or a fresh anonymous one
    async fn get_session(&self, headers: &HeaderMap) -> Result<SessionHandle, StoreError>;

    async fn save_session(&self, handle: &SessionHandle) -> Result<(), StoreError>;

    /// `Set-Cookie` value binding a newly created session to the browser
    fn session_cookie(&self, handle: &SessionHandle) -> Option<HeaderValue>;
}

/// Cookie-keyed sessions persisted in the [`Store`]
#[derive(Clone)]
pub struct SessionManager {
    store: Store,
    cookie_name: String,
    cookie_domain: Option<String>,
    ttl_secs: u64,
}

impl SessionManager {
    pub fn new(store: Store, config: &SessionConfig) -> Self {
        Self {
            store,
            cookie_name: config.cookie_name.clone(),
            cookie_domain: config.cookie_domain.clone(),
            ttl_secs: config.ttl,
        }
    }

    fn generate_id() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SESSION_ID_LENGTH)
            .map(char::from)
            .collect()
    }
}

#[async_trait::async_trait]
impl SessionStore for SessionManager {
    async fn get_session(&self, headers: &HeaderMap) -> Result<SessionHandle, StoreError> {
        if let Some(id) = read_cookie(headers, &self.cookie_name) {
            if let Some(session) = self.store.get::<UserSession>(&session_key(&id)).await? {
                return Ok(SessionHandle {
                    id,
                    is_new: false,
                    session,
                });
            }
            debug!("Session cookie does not match a stored session, starting a new one");
        }

        Ok(SessionHandle {
            id: Self::generate_id(),
            is_new: true,
            session: UserSession::default(),
        })
    }

    async fn save_session(&self, handle: &SessionHandle) -> Result<(), StoreError> {
        self.store.set(&session_key(&handle.id), &handle.session).await
    }

    fn session_cookie(&self, handle: &SessionHandle) -> Option<HeaderValue> {
        if !handle.is_new {
            return None;
        }

        let mut cookie = format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; Secure; SameSite=Lax",
            self.cookie_name, handle.id, self.ttl_secs
        );
        if let Some(domain) = &self.cookie_domain {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
        HeaderValue::from_str(&cookie).ok()
    }
}

/// Store key of a session
pub(crate) fn session_key(id: &str) -> String {
    format!("session:{id}")
}

/// Finds a cookie value across all `Cookie` headers
fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}
