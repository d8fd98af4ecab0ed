//! Authorize orchestrator.
//!
//! Decides, for one authorize request, whether the browser must first go
//! through authentication or consent, or whether the request can be granted
//! and handed to the protocol engine. Both the interactive navigation and the
//! trusted continuation enter through [`authorize`]; only [`EntryMode`]
//! tells them apart.
//!
//! Within one invocation the session is read before any decision is taken and
//! written at most once, right before the terminal action.

use crate::authorization::{
    is_auth_level_sufficient, AuthenticationLevel, Object, PolicyEngine, PolicyError, Subject,
};
use crate::clients::ClientRegistry;
use crate::oidc::{
    AuthorizationSession, AuthorizeRequest, AuthorizeResponse, ProtocolEngine, ProtocolError,
    RawAuthorizeRequest,
};
use crate::session::{SessionHandle, SessionStore};
use crate::store::StoreError;
use crate::workflow::{begin_workflow, clear_workflow, is_consent_missing, OidcWorkflowSession};
use chrono::{DateTime, Utc};
use http::{HeaderMap, HeaderValue, Uri};
use log::{debug, error, info};
use std::net::IpAddr;
use thiserror::Error;

pub mod deadline;
pub mod forwarded;

pub use deadline::Deadline;

const PROTOCOL_ENGINE: &str = "protocol engine";
const POLICY_ENGINE: &str = "policy engine";
const SESSION_STORE: &str = "session store";

/// How the request reached the authorize endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMode {
    /// Interactive browser navigation, evaluated against policy and consent
    Navigation,
    /// Replay issued after the login and consent pages confirmed the request
    Continuation,
}

impl EntryMode {
    pub fn label(self) -> &'static str {
        match self {
            Self::Navigation => "navigation",
            Self::Continuation => "continuation",
        }
    }
}

/// Position of an authorization attempt in the consent workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// No workflow for this client yet
    Fresh,
    /// A workflow for this client exists, authentication or consent outstanding
    Pending,
    /// Authentication is sufficient and consent covers the requested scopes
    Satisfied,
    /// The protocol engine produced a response or an error
    Finalized,
}

impl FlowState {
    fn evaluate(
        workflow: Option<&OidcWorkflowSession>,
        auth_insufficient: bool,
        consent_missing: bool,
    ) -> Self {
        match (auth_insufficient || consent_missing, workflow) {
            (false, _) => Self::Satisfied,
            (true, Some(_)) => Self::Pending,
            (true, None) => Self::Fresh,
        }
    }
}

/// Where a pending attempt sends the browser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectTarget {
    Consent,
    Reauthenticate,
}

/// Failures that are fatal to one request and answered with a 500
#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("Session store failure: {0}")]
    Session(#[from] StoreError),
    #[error("Policy engine failure: {0}")]
    Policy(#[from] PolicyError),
    #[error("Unable to resolve the original request URL: {0}")]
    ForwardedUri(String),
    #[error("Unable to resolve the forwarded protocol and host: {0}")]
    ForwardedProtoHost(String),
    #[error("The {0} did not answer before the request deadline")]
    Timeout(&'static str),
}

/// Everything the orchestrator talks to
pub struct Collaborators<'a> {
    pub clients: &'a ClientRegistry,
    pub policy: &'a dyn PolicyEngine,
    pub sessions: &'a dyn SessionStore,
    pub engine: &'a dyn ProtocolEngine,
    /// Path of the login portal, receives `?workflow=openid`
    pub portal_path: &'a str,
    pub consent_path: &'a str,
}

/// The parts of the HTTP request the orchestrator needs
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub params: RawAuthorizeRequest,
    pub headers: HeaderMap,
    pub uri: Uri,
    /// Address of the connection peer, usually the edge proxy
    pub peer: Option<IpAddr>,
}

/// Terminal result of one authorize invocation
#[derive(Debug)]
pub enum AuthorizeOutcome {
    /// Written by the engine's error path
    Rejected {
        request: Option<AuthorizeRequest>,
        error: ProtocolError,
        cookie: Option<HeaderValue>,
    },
    /// 302 to the consent page or the login portal
    Redirect {
        target: RedirectTarget,
        location: String,
        cookie: Option<HeaderValue>,
    },
    /// Written by the engine's response path
    Granted {
        request: AuthorizeRequest,
        response: AuthorizeResponse,
        cookie: Option<HeaderValue>,
    },
    Failed(InfrastructureError),
}

impl AuthorizeOutcome {
    pub fn flow_state(&self) -> Option<FlowState> {
        match self {
            Self::Rejected { .. } | Self::Granted { .. } => Some(FlowState::Finalized),
            Self::Redirect { .. } => Some(FlowState::Pending),
            Self::Failed(_) => None,
        }
    }
}

/// Runs one authorize request to its terminal outcome
pub async fn authorize(
    collaborators: &Collaborators<'_>,
    mode: EntryMode,
    inbound: &InboundRequest,
    deadline: Deadline,
) -> AuthorizeOutcome {
    match run(collaborators, mode, inbound, &deadline).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Authorize {} failed: {e}", mode.label());
            AuthorizeOutcome::Failed(e)
        }
    }
}

async fn run(
    c: &Collaborators<'_>,
    mode: EntryMode,
    inbound: &InboundRequest,
    deadline: &Deadline,
) -> Result<AuthorizeOutcome, InfrastructureError> {
    let request = match deadline
        .run(PROTOCOL_ENGINE, c.engine.parse_authorize_request(&inbound.params))
        .await?
    {
        Ok(request) => request,
        Err(error) => {
            debug!("Unable to parse authorize {} request: {error}", mode.label());
            return Ok(AuthorizeOutcome::Rejected {
                request: None,
                error,
                cookie: None,
            });
        }
    };

    if c.clients.find(&request.client_id).is_none() {
        let error = ProtocolError::client_not_found(&request.client_id);
        return Ok(AuthorizeOutcome::Rejected {
            request: Some(request),
            error,
            cookie: None,
        });
    }

    let handle = match mode {
        EntryMode::Continuation => None,
        EntryMode::Navigation => {
            let handle = deadline
                .run(SESSION_STORE, c.sessions.get_session(&inbound.headers))
                .await??;

            let subject = Subject {
                username: handle.session.username.clone(),
                groups: handle.session.groups.clone(),
                ip: forwarded::remote_ip(&inbound.headers, inbound.peer),
            };
            let object = Object::read(request.redirect_uri.clone());
            let required = deadline
                .run(POLICY_ENGINE, c.policy.required_level(&subject, &object))
                .await??;

            let workflow = handle
                .session
                .oidc_workflow_session
                .as_ref()
                .filter(|workflow| workflow.client_id == request.client_id);
            let auth_insufficient =
                !is_auth_level_sufficient(handle.session.authentication_level, required);
            let consent_missing = is_consent_missing(&request.requested_scopes, workflow);

            let state = FlowState::evaluate(workflow, auth_insufficient, consent_missing);
            debug!(
                "Authorize request of client '{}' for user '{}' is {state:?} (required level {required:?})",
                request.client_id, subject.username
            );

            if state != FlowState::Satisfied {
                return begin_pending(c, inbound, &request, handle, required, consent_missing, deadline)
                    .await;
            }
            Some(handle)
        }
    };

    finalize(c, inbound, request, handle, deadline).await
}

/// Records the attempt in the session and sends the browser to the page that
/// can satisfy it. Consent wins when both conditions are unmet.
async fn begin_pending(
    c: &Collaborators<'_>,
    inbound: &InboundRequest,
    request: &AuthorizeRequest,
    mut handle: SessionHandle,
    required: AuthenticationLevel,
    consent_missing: bool,
    deadline: &Deadline,
) -> Result<AuthorizeOutcome, InfrastructureError> {
    let auth_uri = forwarded::original_url(&inbound.headers, &inbound.uri)?;
    let proto_host = forwarded::proto_host(&inbound.headers)?;

    debug!(
        "User '{}' must authenticate or consent to scopes [{}] for client '{}'",
        handle.session.username,
        request.requested_scopes.join(", "),
        request.client_id
    );
    begin_workflow(
        &mut handle.session,
        &request.client_id,
        &request.requested_scopes,
        auth_uri.as_str(),
        request.redirect_uri.as_str(),
        required,
    );
    deadline
        .run(SESSION_STORE, c.sessions.save_session(&handle))
        .await??;

    let (target, location) = if consent_missing {
        (
            RedirectTarget::Consent,
            format!("{proto_host}{}", c.consent_path),
        )
    } else {
        (
            RedirectTarget::Reauthenticate,
            format!("{proto_host}{}?workflow=openid", c.portal_path),
        )
    };

    Ok(AuthorizeOutcome::Redirect {
        target,
        location,
        cookie: c.sessions.session_cookie(&handle),
    })
}

/// Grants the whole request, consumes the workflow and lets the engine answer
async fn finalize(
    c: &Collaborators<'_>,
    inbound: &InboundRequest,
    mut request: AuthorizeRequest,
    handle: Option<SessionHandle>,
    deadline: &Deadline,
) -> Result<AuthorizeOutcome, InfrastructureError> {
    for scope in request.requested_scopes.clone() {
        request.grant_scope(&scope);
    }
    for audience in request.requested_audience.clone() {
        request.grant_audience(&audience);
    }

    let mut handle = match handle {
        Some(handle) => handle,
        None => {
            deadline
                .run(SESSION_STORE, c.sessions.get_session(&inbound.headers))
                .await??
        }
    };
    clear_workflow(&mut handle.session);
    deadline
        .run(SESSION_STORE, c.sessions.save_session(&handle))
        .await??;
    let cookie = c.sessions.session_cookie(&handle);

    let session = AuthorizationSession {
        subject: handle.session.username.clone(),
        client_id: request.client_id.clone(),
        display_name: handle.session.display_name.clone(),
        groups: handle.session.groups.clone(),
        emails: handle.session.emails.clone(),
        granted_scopes: request.granted_scopes().to_vec(),
        granted_audience: request.granted_audience().to_vec(),
        authentication_level: handle.session.authentication_level,
        requested_at: Utc::now(),
        auth_time: handle
            .session
            .authenticated_at
            .and_then(|ts| DateTime::from_timestamp(ts, 0)),
    };

    match deadline
        .run(PROTOCOL_ENGINE, c.engine.build_authorize_response(&request, &session))
        .await?
    {
        Ok(response) => {
            info!(
                "Authorized user '{}' for client '{}' with scopes [{}]",
                session.subject,
                request.client_id,
                request.granted_scopes().join(", ")
            );
            Ok(AuthorizeOutcome::Granted {
                request,
                response,
                cookie,
            })
        }
        Err(error) => Ok(AuthorizeOutcome::Rejected {
            request: Some(request),
            error,
            cookie,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ClientConfiguration;
    use crate::session::UserSession;
    use axum::response::{IntoResponse, Response};
    use http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use url::Url;

    const CALLBACK: &str = "https://grafana.example.com/login/generic_oauth";

    struct FakeSessions {
        stored: Mutex<Option<UserSession>>,
        gets: AtomicUsize,
        saves: AtomicUsize,
        fail_save: bool,
        slow_save: bool,
    }

    impl FakeSessions {
        fn new(session: Option<UserSession>) -> Self {
            Self {
                stored: Mutex::new(session),
                gets: AtomicUsize::new(0),
                saves: AtomicUsize::new(0),
                fail_save: false,
                slow_save: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail_save: true,
                ..Self::new(Some(authenticated(AuthenticationLevel::TwoFactor)))
            }
        }

        fn stored(&self) -> Option<UserSession> {
            self.stored.lock().unwrap().clone()
        }

        fn grant_requested_scopes(&self) {
            let mut stored = self.stored.lock().unwrap();
            let workflow = stored
                .as_mut()
                .and_then(|s| s.oidc_workflow_session.as_mut())
                .unwrap();
            workflow.granted_scopes = workflow.requested_scopes.clone();
        }

        fn saves(&self) -> usize {
            self.saves.load(Ordering::SeqCst)
        }

        fn gets(&self) -> usize {
            self.gets.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl SessionStore for FakeSessions {
        async fn get_session(&self, _headers: &HeaderMap) -> Result<SessionHandle, StoreError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            let stored = self.stored();
            Ok(SessionHandle {
                id: "session-1".to_string(),
                is_new: stored.is_none(),
                session: stored.unwrap_or_default(),
            })
        }

        async fn save_session(&self, handle: &SessionHandle) -> Result<(), StoreError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            if self.slow_save {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self.fail_save {
                return Err(StoreError::Redis("connection refused".to_string()));
            }
            *self.stored.lock().unwrap() = Some(handle.session.clone());
            Ok(())
        }

        fn session_cookie(&self, handle: &SessionHandle) -> Option<HeaderValue> {
            handle
                .is_new
                .then(|| HeaderValue::from_static("gate_session=session-1"))
        }
    }

    enum FakePolicy {
        Level(AuthenticationLevel),
        Failing,
        Slow,
    }

    struct CountingPolicy {
        policy: FakePolicy,
        calls: AtomicUsize,
    }

    impl CountingPolicy {
        fn new(policy: FakePolicy) -> Self {
            Self {
                policy,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl PolicyEngine for CountingPolicy {
        async fn required_level(
            &self,
            _subject: &Subject,
            _object: &Object,
        ) -> Result<AuthenticationLevel, PolicyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.policy {
                FakePolicy::Level(level) => Ok(level),
                FakePolicy::Failing => Err(PolicyError::InvalidStatus(StatusCode::BAD_GATEWAY)),
                FakePolicy::Slow => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(AuthenticationLevel::OneFactor)
                }
            }
        }

        async fn health_check(&self) -> Result<(), String> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeEngine {
        fail_build: bool,
        slow_build: bool,
        built: Mutex<Vec<AuthorizationSession>>,
    }

    #[async_trait::async_trait]
    impl ProtocolEngine for FakeEngine {
        async fn parse_authorize_request(
            &self,
            raw: &RawAuthorizeRequest,
        ) -> Result<AuthorizeRequest, ProtocolError> {
            let client_id = raw
                .get("client_id")
                .ok_or_else(|| ProtocolError::InvalidRequest("client_id".to_string()))?;
            let redirect_uri = Url::parse(raw.get("redirect_uri").unwrap_or(CALLBACK))
                .map_err(|e| ProtocolError::InvalidRequest(e.to_string()))?;
            let mut request = AuthorizeRequest::new(client_id, redirect_uri, "code");
            request.requested_scopes = raw
                .get("scope")
                .unwrap_or_default()
                .split_whitespace()
                .map(str::to_string)
                .collect();
            request.requested_audience = raw
                .get("audience")
                .unwrap_or_default()
                .split_whitespace()
                .map(str::to_string)
                .collect();
            request.state = raw.get("state").map(str::to_string);
            Ok(request)
        }

        async fn build_authorize_response(
            &self,
            request: &AuthorizeRequest,
            session: &AuthorizationSession,
        ) -> Result<AuthorizeResponse, ProtocolError> {
            if self.slow_build {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self.fail_build {
                return Err(ProtocolError::ServerError("signing failed".to_string()));
            }
            self.built.lock().unwrap().push(session.clone());
            let mut redirect_to = request.redirect_uri.clone();
            redirect_to.query_pairs_mut().append_pair("code", "abc");
            Ok(AuthorizeResponse { redirect_to })
        }

        fn write_authorize_error(
            &self,
            _request: Option<&AuthorizeRequest>,
            error: &ProtocolError,
        ) -> Response {
            error.status().into_response()
        }

        fn write_authorize_response(
            &self,
            _request: &AuthorizeRequest,
            response: &AuthorizeResponse,
        ) -> Response {
            crate::oidc::found(response.redirect_to.as_str())
        }
    }

    fn registry() -> ClientRegistry {
        let client = |id: &str| ClientConfiguration {
            id: id.to_string(),
            description: None,
            redirect_uris: vec![CALLBACK.to_string()],
            scopes: vec!["openid".to_string(), "profile".to_string(), "email".to_string()],
            audience: vec![],
            response_types: vec!["code".to_string()],
        };
        ClientRegistry::new(vec![client("grafana"), client("gitea")]).unwrap()
    }

    fn authenticated(level: AuthenticationLevel) -> UserSession {
        UserSession {
            username: "john".to_string(),
            groups: vec!["admins".to_string()],
            emails: vec!["john@example.com".to_string()],
            authentication_level: level,
            authenticated_at: Some(1_700_000_000),
            ..Default::default()
        }
    }

    fn granted_workflow(client_id: &str, scopes: &[&str]) -> OidcWorkflowSession {
        let scopes: Vec<String> = scopes.iter().map(|s| s.to_string()).collect();
        OidcWorkflowSession {
            client_id: client_id.to_string(),
            requested_scopes: scopes.clone(),
            granted_scopes: scopes,
            auth_uri: "https://auth.example.com/api/oidc/authorize".to_string(),
            target_uri: CALLBACK.to_string(),
            required_authorization_level: AuthenticationLevel::TwoFactor,
            created_at: 0,
        }
    }

    fn inbound(pairs: &[(&str, &str)]) -> InboundRequest {
        let mut headers = HeaderMap::new();
        headers.insert(
            forwarded::X_FORWARDED_PROTO.clone(),
            HeaderValue::from_static("https"),
        );
        headers.insert(
            forwarded::X_FORWARDED_HOST.clone(),
            HeaderValue::from_static("auth.example.com"),
        );
        InboundRequest {
            params: RawAuthorizeRequest::new(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            headers,
            uri: "/api/oidc/authorize?client_id=grafana".parse().unwrap(),
            peer: None,
        }
    }

    struct Harness {
        clients: ClientRegistry,
        policy: CountingPolicy,
        sessions: FakeSessions,
        engine: FakeEngine,
    }

    impl Harness {
        fn new(required: AuthenticationLevel, session: Option<UserSession>) -> Self {
            Self {
                clients: registry(),
                policy: CountingPolicy::new(FakePolicy::Level(required)),
                sessions: FakeSessions::new(session),
                engine: FakeEngine::default(),
            }
        }

        fn collaborators(&self) -> Collaborators<'_> {
            Collaborators {
                clients: &self.clients,
                policy: &self.policy,
                sessions: &self.sessions,
                engine: &self.engine,
                portal_path: "/",
                consent_path: "/consent",
            }
        }

        async fn run(&self, mode: EntryMode, inbound: &InboundRequest) -> AuthorizeOutcome {
            authorize(
                &self.collaborators(),
                mode,
                inbound,
                Deadline::after(Duration::from_secs(5)),
            )
            .await
        }

        fn workflow(&self) -> Option<OidcWorkflowSession> {
            self.sessions.stored().and_then(|s| s.oidc_workflow_session)
        }
    }

    fn grafana(scope: &str) -> InboundRequest {
        inbound(&[("client_id", "grafana"), ("scope", scope), ("state", "xyz")])
    }

    #[tokio::test]
    async fn test_fresh_session_redirects_to_consent_first() {
        let harness = Harness::new(AuthenticationLevel::TwoFactor, None);

        let outcome = harness.run(EntryMode::Navigation, &grafana("openid profile")).await;

        match outcome {
            AuthorizeOutcome::Redirect {
                target,
                location,
                cookie,
            } => {
                assert_eq!(target, RedirectTarget::Consent);
                assert_eq!(location, "https://auth.example.com/consent");
                assert!(cookie.is_some());
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let workflow = harness.workflow().unwrap();
        assert_eq!(workflow.client_id, "grafana");
        assert_eq!(workflow.requested_scopes, ["openid", "profile"]);
        assert!(workflow.granted_scopes.is_empty());
        assert_eq!(workflow.required_authorization_level, AuthenticationLevel::TwoFactor);
        assert_eq!(workflow.target_uri, CALLBACK);
        assert_eq!(
            workflow.auth_uri,
            "https://auth.example.com/api/oidc/authorize?client_id=grafana"
        );
        assert_eq!(harness.sessions.saves(), 1);
    }

    #[tokio::test]
    async fn test_scope_change_invalidates_consent() {
        let mut session = authenticated(AuthenticationLevel::TwoFactor);
        session.oidc_workflow_session = Some(granted_workflow("grafana", &["openid"]));
        let harness = Harness::new(AuthenticationLevel::TwoFactor, Some(session));

        let outcome = harness.run(EntryMode::Navigation, &grafana("openid email")).await;

        assert!(matches!(
            outcome,
            AuthorizeOutcome::Redirect { target: RedirectTarget::Consent, .. }
        ));
        assert_eq!(outcome.flow_state(), Some(FlowState::Pending));
        let workflow = harness.workflow().unwrap();
        assert_eq!(workflow.requested_scopes, ["openid", "email"]);
        assert!(workflow.granted_scopes.is_empty());
        assert_eq!(harness.sessions.saves(), 1);
    }

    #[tokio::test]
    async fn test_matching_consent_is_granted_and_consumed() {
        let mut session = authenticated(AuthenticationLevel::TwoFactor);
        session.oidc_workflow_session = Some(granted_workflow("grafana", &["openid", "email"]));
        let harness = Harness::new(AuthenticationLevel::TwoFactor, Some(session));
        let inbound = inbound(&[
            ("client_id", "grafana"),
            ("scope", "email openid"),
            ("audience", "https://grafana.example.com"),
        ]);

        let outcome = harness.run(EntryMode::Navigation, &inbound).await;

        match &outcome {
            AuthorizeOutcome::Granted {
                request, cookie, ..
            } => {
                assert_eq!(request.granted_scopes(), ["email", "openid"]);
                assert_eq!(request.granted_audience(), ["https://grafana.example.com"]);
                assert!(cookie.is_none());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(outcome.flow_state(), Some(FlowState::Finalized));
        assert!(harness.workflow().is_none());
        assert_eq!(harness.sessions.saves(), 1);
        assert_eq!(harness.sessions.gets(), 1);

        let built = harness.engine.built.lock().unwrap();
        assert_eq!(built.len(), 1);
        assert_eq!(built[0].subject, "john");
        assert_eq!(built[0].groups, ["admins"]);
        assert_eq!(built[0].granted_scopes, ["email", "openid"]);
        assert_eq!(built[0].auth_time.map(|t| t.timestamp()), Some(1_700_000_000));
    }

    #[tokio::test]
    async fn test_unknown_client_is_rejected_without_session_access() {
        let harness = Harness::new(AuthenticationLevel::OneFactor, None);

        let outcome = harness
            .run(EntryMode::Navigation, &inbound(&[("client_id", "unknown"), ("scope", "openid")]))
            .await;

        match outcome {
            AuthorizeOutcome::Rejected { request, error, .. } => {
                assert_eq!(request.unwrap().client_id, "unknown");
                assert_eq!(error.code(), "invalid_client");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(harness.sessions.gets(), 0);
        assert_eq!(harness.sessions.saves(), 0);
    }

    #[tokio::test]
    async fn test_parse_failure_is_rejected_without_request() {
        let harness = Harness::new(AuthenticationLevel::OneFactor, None);

        let outcome = harness.run(EntryMode::Navigation, &inbound(&[("scope", "openid")])).await;

        assert!(matches!(
            outcome,
            AuthorizeOutcome::Rejected { request: None, .. }
        ));
        assert_eq!(harness.sessions.gets(), 0);
    }

    #[tokio::test]
    async fn test_insufficient_level_without_scopes_reauthenticates() {
        let harness = Harness::new(
            AuthenticationLevel::TwoFactor,
            Some(authenticated(AuthenticationLevel::OneFactor)),
        );

        let outcome = harness.run(EntryMode::Navigation, &grafana("")).await;

        match outcome {
            AuthorizeOutcome::Redirect {
                target, location, ..
            } => {
                assert_eq!(target, RedirectTarget::Reauthenticate);
                assert_eq!(location, "https://auth.example.com/?workflow=openid");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(
            harness.workflow().unwrap().required_authorization_level,
            AuthenticationLevel::TwoFactor
        );
    }

    #[tokio::test]
    async fn test_no_scopes_and_sufficient_level_skips_consent() {
        let harness = Harness::new(
            AuthenticationLevel::OneFactor,
            Some(authenticated(AuthenticationLevel::OneFactor)),
        );

        let outcome = harness.run(EntryMode::Navigation, &grafana("")).await;

        assert!(matches!(outcome, AuthorizeOutcome::Granted { .. }));
        assert_eq!(harness.sessions.saves(), 1);
    }

    #[tokio::test]
    async fn test_bypass_requires_nothing() {
        let harness = Harness::new(AuthenticationLevel::Bypass, None);

        let outcome = harness.run(EntryMode::Navigation, &grafana("")).await;

        assert!(matches!(outcome, AuthorizeOutcome::Granted { .. }));
    }

    #[tokio::test]
    async fn test_satisfied_requests_are_idempotent() {
        let mut session = authenticated(AuthenticationLevel::TwoFactor);
        session.oidc_workflow_session = Some(granted_workflow("grafana", &["openid"]));
        let harness = Harness::new(AuthenticationLevel::OneFactor, Some(session));

        let first = harness.run(EntryMode::Navigation, &grafana("")).await;
        let second = harness.run(EntryMode::Navigation, &grafana("")).await;

        assert!(matches!(first, AuthorizeOutcome::Granted { .. }));
        assert!(matches!(second, AuthorizeOutcome::Granted { .. }));
        assert!(harness.workflow().is_none());
        assert_eq!(harness.sessions.saves(), 2);
    }

    #[tokio::test]
    async fn test_consent_round_trip() {
        let harness = Harness::new(
            AuthenticationLevel::OneFactor,
            Some(authenticated(AuthenticationLevel::OneFactor)),
        );
        let request = grafana("openid profile");

        let first = harness.run(EntryMode::Navigation, &request).await;
        assert!(matches!(
            first,
            AuthorizeOutcome::Redirect { target: RedirectTarget::Consent, .. }
        ));

        harness.sessions.grant_requested_scopes();
        let second = harness.run(EntryMode::Navigation, &request).await;

        match second {
            AuthorizeOutcome::Granted { request, .. } => {
                assert_eq!(request.granted_scopes(), ["openid", "profile"]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(harness.workflow().is_none());
        assert_eq!(harness.sessions.saves(), 2);
    }

    #[tokio::test]
    async fn test_workflow_of_other_client_is_ignored() {
        let mut session = authenticated(AuthenticationLevel::TwoFactor);
        session.oidc_workflow_session = Some(granted_workflow("gitea", &["openid"]));
        let harness = Harness::new(AuthenticationLevel::OneFactor, Some(session));

        let outcome = harness.run(EntryMode::Navigation, &grafana("openid")).await;

        assert!(matches!(
            outcome,
            AuthorizeOutcome::Redirect { target: RedirectTarget::Consent, .. }
        ));
        assert_eq!(harness.workflow().unwrap().client_id, "grafana");
    }

    #[tokio::test]
    async fn test_unresolvable_forwarded_url_persists_nothing() {
        let harness = Harness::new(AuthenticationLevel::TwoFactor, None);
        let mut request = grafana("openid");
        request.headers.clear();

        let outcome = harness.run(EntryMode::Navigation, &request).await;

        assert!(matches!(
            outcome,
            AuthorizeOutcome::Failed(InfrastructureError::ForwardedUri(_))
        ));
        assert_eq!(harness.sessions.saves(), 0);
    }

    #[tokio::test]
    async fn test_unresolvable_proto_host_persists_nothing() {
        let harness = Harness::new(AuthenticationLevel::TwoFactor, None);
        let mut request = grafana("openid");
        request.headers.clear();
        request.headers.insert(
            forwarded::X_ORIGINAL_URL.clone(),
            HeaderValue::from_static("https://auth.example.com/api/oidc/authorize"),
        );

        let outcome = harness.run(EntryMode::Navigation, &request).await;

        assert!(matches!(
            outcome,
            AuthorizeOutcome::Failed(InfrastructureError::ForwardedProtoHost(_))
        ));
        assert_eq!(harness.sessions.saves(), 0);
    }

    #[tokio::test]
    async fn test_session_save_failure_is_fatal() {
        let mut harness = Harness::new(AuthenticationLevel::OneFactor, None);
        harness.sessions = FakeSessions::failing();

        let outcome = harness.run(EntryMode::Navigation, &grafana("")).await;

        assert!(matches!(
            outcome,
            AuthorizeOutcome::Failed(InfrastructureError::Session(_))
        ));
        assert!(harness.engine.built.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_policy_failure_is_fatal() {
        let mut harness = Harness::new(AuthenticationLevel::OneFactor, None);
        harness.policy = CountingPolicy::new(FakePolicy::Failing);

        let outcome = harness.run(EntryMode::Navigation, &grafana("openid")).await;

        assert!(matches!(
            outcome,
            AuthorizeOutcome::Failed(InfrastructureError::Policy(_))
        ));
        assert_eq!(harness.sessions.saves(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_policy_times_out() {
        let mut harness = Harness::new(AuthenticationLevel::OneFactor, None);
        harness.policy = CountingPolicy::new(FakePolicy::Slow);

        let outcome = harness.run(EntryMode::Navigation, &grafana("openid")).await;

        assert!(matches!(
            outcome,
            AuthorizeOutcome::Failed(InfrastructureError::Timeout(POLICY_ENGINE))
        ));
        assert_eq!(harness.sessions.saves(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_session_store_times_out() {
        let mut harness = Harness::new(
            AuthenticationLevel::OneFactor,
            Some(authenticated(AuthenticationLevel::OneFactor)),
        );
        harness.sessions.slow_save = true;

        let outcome = harness.run(EntryMode::Navigation, &grafana("openid")).await;

        assert!(matches!(
            outcome,
            AuthorizeOutcome::Failed(InfrastructureError::Timeout(SESSION_STORE))
        ));
        assert!(harness.engine.built.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_protocol_engine_times_out() {
        let mut harness = Harness::new(
            AuthenticationLevel::OneFactor,
            Some(authenticated(AuthenticationLevel::OneFactor)),
        );
        harness.engine.slow_build = true;

        let outcome = harness.run(EntryMode::Navigation, &grafana("")).await;

        assert!(matches!(
            outcome,
            AuthorizeOutcome::Failed(InfrastructureError::Timeout(PROTOCOL_ENGINE))
        ));
        assert_eq!(harness.sessions.saves(), 1);
    }

    #[tokio::test]
    async fn test_continuation_skips_policy_and_consent() {
        let harness = Harness::new(AuthenticationLevel::TwoFactor, None);

        let outcome = harness.run(EntryMode::Continuation, &grafana("openid profile")).await;

        match outcome {
            AuthorizeOutcome::Granted { request, .. } => {
                assert_eq!(request.granted_scopes(), ["openid", "profile"]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(harness.policy.calls.load(Ordering::SeqCst), 0);
        assert_eq!(harness.sessions.gets(), 1);
        assert_eq!(harness.sessions.saves(), 1);
    }

    #[tokio::test]
    async fn test_engine_failure_after_grant_is_rejected_with_request() {
        let mut harness = Harness::new(
            AuthenticationLevel::OneFactor,
            Some(authenticated(AuthenticationLevel::OneFactor)),
        );
        harness.engine.fail_build = true;

        let outcome = harness.run(EntryMode::Navigation, &grafana("")).await;

        match outcome {
            AuthorizeOutcome::Rejected { request, error, .. } => {
                assert!(request.is_some());
                assert_eq!(error.code(), "server_error");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(harness.sessions.saves(), 1);
    }

    #[test]
    fn test_flow_state_evaluation() {
        let workflow = granted_workflow("grafana", &["openid"]);
        assert_eq!(FlowState::evaluate(None, false, false), FlowState::Satisfied);
        assert_eq!(FlowState::evaluate(Some(&workflow), false, false), FlowState::Satisfied);
        assert_eq!(FlowState::evaluate(None, true, false), FlowState::Fresh);
        assert_eq!(FlowState::evaluate(None, false, true), FlowState::Fresh);
        assert_eq!(FlowState::evaluate(Some(&workflow), true, true), FlowState::Pending);
    }
}
