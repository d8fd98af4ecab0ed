//! Turns an authorize outcome into the HTTP response.

use crate::authorize::AuthorizeOutcome;
use crate::errors::ApiError;
use crate::headers::presets;
use crate::oidc::{found, ProtocolEngine};
use axum::response::{IntoResponse, Response};
use http::header::SET_COOKIE;

/// Writes `outcome`, leaving protocol rendering to the engine
pub fn respond(engine: &dyn ProtocolEngine, outcome: AuthorizeOutcome) -> Response {
    let (mut response, cookie) = match outcome {
        AuthorizeOutcome::Rejected {
            request,
            error,
            cookie,
        } => (engine.write_authorize_error(request.as_ref(), &error), cookie),
        AuthorizeOutcome::Redirect {
            location, cookie, ..
        } => (found(&location), cookie),
        AuthorizeOutcome::Granted {
            request,
            response,
            cookie,
        } => (engine.write_authorize_response(&request, &response), cookie),
        AuthorizeOutcome::Failed(error) => (ApiError::internal(error).into_response(), None),
    };

    if let Some(cookie) = cookie {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    presets::no_store().apply(&mut response);
    response
}
