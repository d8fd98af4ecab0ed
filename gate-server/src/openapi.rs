use crate::api::health::{ComponentStatus, Health};
use crate::oidc::AuthorizationErrorBody;
use utoipa::OpenApi;

pub(crate) const HEALTH_TAG: &str = "Health API";
pub(crate) const OIDC_TAG: &str = "OpenID Connect API";

#[derive(OpenApi)]
#[openapi(
    tags(
        (name = HEALTH_TAG, description = "Health check endpoints"),
        (name = OIDC_TAG, description = "OpenID Connect authorization endpoint"),
    ),
    paths(
        crate::api::health::health_check,
        crate::api::health::ready_check,
        crate::api::oidc::authorize_get,
        crate::api::oidc::authorize_post,
    ),
    components(schemas(AuthorizationErrorBody, Health, ComponentStatus)),
    info(
        title = "Gate OIDC API",
        description = "OpenID Connect authorize gateway",
        version = "0.1.0"
    )
)]
pub(crate) struct ApiDoc;
