use crate::openapi::HEALTH_TAG;
use crate::state::AppState;
use crate::store::StoreBackend;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use log::warn;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use utoipa::ToSchema;

const COMPONENT_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Status of an individual component
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct ComponentStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentStatus {
    fn from_result(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self {
                status: "ok".to_string(),
                error: None,
            },
            Err(error) => Self {
                status: "error".to_string(),
                error: Some(error),
            },
        }
    }

    fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Health {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<ComponentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<ComponentStatus>,
    #[serde(skip)]
    status_code: StatusCode,
}

impl IntoResponse for Health {
    fn into_response(self) -> Response {
        (self.status_code, Json(self)).into_response()
    }
}

async fn check_component<F>(name: &str, check: F) -> ComponentStatus
where
    F: std::future::Future<Output = Result<(), String>>,
{
    let result = match timeout(COMPONENT_CHECK_TIMEOUT, check).await {
        Ok(result) => result,
        Err(_) => Err(format!("{name} health check timed out")),
    };
    if let Err(e) = &result {
        warn!("{name} is not healthy: {e}");
    }
    ComponentStatus::from_result(result)
}

/// Liveness check handler
#[utoipa::path(
    get,
    path = "/health",
    tag = HEALTH_TAG,
    responses(
        (status = 200, description = "Service is alive", body = Health)
    )
)]
pub(crate) async fn health_check() -> Health {
    Health {
        status: "ok".to_string(),
        store: None,
        policy: None,
        status_code: StatusCode::OK,
    }
}

/// Readiness check handler, verifies the session store and the policy engine
#[utoipa::path(
    get,
    path = "/ready",
    tag = HEALTH_TAG,
    responses(
        (status = 200, description = "Service is ready", body = Health),
        (status = 503, description = "Service is not ready", body = Health)
    )
)]
pub(crate) async fn ready_check(State(state): State<AppState>) -> Health {
    let (store, policy) = tokio::join!(
        check_component("Session store", state.store.health_check()),
        check_component("Policy engine", state.policy.health_check()),
    );

    let ready = store.is_ok() && policy.is_ok();
    Health {
        status: if ready { "ok" } else { "error" }.to_string(),
        store: Some(store),
        policy: Some(policy),
        status_code: if ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        },
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
}
