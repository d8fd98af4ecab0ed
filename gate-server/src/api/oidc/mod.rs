pub mod response;

use crate::authorize::{
    authorize, AuthorizeOutcome, Collaborators, Deadline, EntryMode, InboundRequest,
};
use crate::oidc::{AuthorizationErrorBody, RawAuthorizeRequest};
use crate::openapi::OIDC_TAG;
use crate::state::AppState;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::{Form, Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use http::{Extensions, HeaderMap, Uri};
use log::debug;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use utoipa::IntoParams;

pub(crate) const AUTHORIZE_PATH: &str = "/api/oidc/authorize";

/// OAuth 2.0 authorization request parameters
#[derive(IntoParams)]
#[into_params(parameter_in = Query)]
#[allow(dead_code)]
pub(crate) struct AuthorizeParams {
    /// Response type, must be `code`
    response_type: String,
    /// Client identifier
    client_id: String,
    /// Redirect URI registered for the client
    redirect_uri: String,
    /// Requested scopes (space-separated)
    scope: Option<String>,
    /// Requested audiences (space-separated)
    audience: Option<String>,
    /// State parameter for CSRF protection
    state: Option<String>,
    /// OpenID Connect nonce
    nonce: Option<String>,
    /// PKCE code challenge
    code_challenge: Option<String>,
    /// PKCE code challenge method (S256 or plain)
    code_challenge_method: Option<String>,
}

/// Interactive authorization endpoint
#[utoipa::path(
    get,
    path = "/api/oidc/authorize",
    tag = OIDC_TAG,
    params(AuthorizeParams),
    responses(
        (status = 302, description = "Redirect to the consent page, the login portal or the client"),
        (status = 400, description = "Invalid authorization request", body = AuthorizationErrorBody),
        (status = 401, description = "Unknown client", body = AuthorizationErrorBody),
        (status = 500, description = "Session, policy or proxy failure", body = String, content_type = "text/plain")
    )
)]
pub(crate) async fn authorize_get(
    State(state): State<AppState>,
    extensions: Extensions,
    headers: HeaderMap,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let peer = peer_ip(&extensions);
    handle(state, EntryMode::Navigation, params, headers, uri, peer).await
}

/// Continuation of a request confirmed by the login and consent pages
#[utoipa::path(
    post,
    path = "/api/oidc/authorize",
    tag = OIDC_TAG,
    request_body(content = String, content_type = "application/x-www-form-urlencoded",
        description = "Authorization request parameters"),
    responses(
        (status = 302, description = "Redirect to the client with the authorization response"),
        (status = 400, description = "Invalid authorization request", body = AuthorizationErrorBody),
        (status = 401, description = "Unknown client", body = AuthorizationErrorBody),
        (status = 500, description = "Session failure", body = String, content_type = "text/plain")
    )
)]
pub(crate) async fn authorize_post(
    State(state): State<AppState>,
    extensions: Extensions,
    headers: HeaderMap,
    uri: Uri,
    Query(mut params): Query<HashMap<String, String>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    params.extend(form);
    let peer = peer_ip(&extensions);
    handle(state, EntryMode::Continuation, params, headers, uri, peer).await
}

/// Connection peer, present when served with connect info
fn peer_ip(extensions: &Extensions) -> Option<IpAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

async fn handle(
    state: AppState,
    mode: EntryMode,
    params: HashMap<String, String>,
    headers: HeaderMap,
    uri: Uri,
    peer: Option<IpAddr>,
) -> Response {
    debug!("Hit authorize {} endpoint", mode.label());

    let clients = state.clients.snapshot();
    let collaborators = Collaborators {
        clients: &clients,
        policy: state.policy.as_ref(),
        sessions: state.sessions.as_ref(),
        engine: state.engine.as_ref(),
        portal_path: &state.config.oidc.portal_path,
        consent_path: &state.config.oidc.consent_path,
    };
    let inbound = InboundRequest {
        params: RawAuthorizeRequest::new(params),
        headers,
        uri,
        peer,
    };

    let deadline = Deadline::after(state.config.request_timeout());
    let outcome = authorize(&collaborators, mode, &inbound, deadline).await;
    debug!(
        "Authorize {} ended in state {:?} with {:?} to spare",
        mode.label(),
        outcome.flow_state(),
        deadline.remaining()
    );
    if let AuthorizeOutcome::Redirect { target, location, .. } = &outcome {
        debug!("Sending browser to {target:?} page at {location}");
    }
    response::respond(state.engine.as_ref(), outcome)
}

pub(super) fn router() -> Router<AppState> {
    Router::new().route(AUTHORIZE_PATH, get(authorize_get).post(authorize_post))
}
