//! Consent workflow record kept in the user session between round-trips.

use crate::authorization::AuthenticationLevel;
use crate::session::UserSession;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// An authorization attempt waiting for authentication or consent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcWorkflowSession {
    pub client_id: String,
    pub requested_scopes: Vec<String>,
    /// Scopes approved on the consent page
    #[serde(default)]
    pub granted_scopes: Vec<String>,
    /// URI the edge proxy saw before redirecting to the authorize endpoint
    pub auth_uri: String,
    /// OAuth2 redirect target of the attempt
    pub target_uri: String,
    pub required_authorization_level: AuthenticationLevel,
    /// Unix time the attempt started
    pub created_at: i64,
}

/// Whether the requested scopes still need the user's approval.
///
/// Order does not matter, but any added or removed scope invalidates a
/// previous grant.
pub fn is_consent_missing(
    requested_scopes: &[String],
    workflow: Option<&OidcWorkflowSession>,
) -> bool {
    if requested_scopes.is_empty() {
        return false;
    }

    match workflow {
        None => true,
        Some(workflow) => {
            let requested: HashSet<&str> = requested_scopes.iter().map(String::as_str).collect();
            let granted: HashSet<&str> = workflow.granted_scopes.iter().map(String::as_str).collect();
            requested.symmetric_difference(&granted).next().is_some()
        }
    }
}

/// Installs a fresh workflow, replacing whatever attempt was in progress
pub fn begin_workflow(
    session: &mut UserSession,
    client_id: &str,
    requested_scopes: &[String],
    auth_uri: &str,
    target_uri: &str,
    required_level: AuthenticationLevel,
) {
    session.oidc_workflow_session = Some(OidcWorkflowSession {
        client_id: client_id.to_string(),
        requested_scopes: requested_scopes.to_vec(),
        granted_scopes: Vec::new(),
        auth_uri: auth_uri.to_string(),
        target_uri: target_uri.to_string(),
        required_authorization_level: required_level,
        created_at: chrono::Utc::now().timestamp(),
    });
}

pub fn clear_workflow(session: &mut UserSession) {
    session.oidc_workflow_session = None;
}
