//! Request identity as observed by the edge proxy.
//!
//! The gateway runs behind a reverse proxy, so the scheme, host and URL the
//! browser actually used only survive in the forwarding headers.

use super::InfrastructureError;
use http::header::{HeaderName, HOST};
use http::{HeaderMap, Uri};
use std::net::IpAddr;
use url::Url;

pub static X_ORIGINAL_URL: HeaderName = HeaderName::from_static("x-original-url");
pub static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub static X_FORWARDED_URI: HeaderName = HeaderName::from_static("x-forwarded-uri");
pub static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

fn header<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn forwarded_proto(headers: &HeaderMap) -> Option<&str> {
    header(headers, &X_FORWARDED_PROTO)
}

fn forwarded_host(headers: &HeaderMap) -> Option<&str> {
    header(headers, &X_FORWARDED_HOST).or_else(|| header(headers, &HOST))
}

/// The URL the edge proxy saw before sending the browser here.
///
/// `X-Original-URL` wins; otherwise the URL is rebuilt from the forwarded
/// proto, host and URI, the URI defaulting to the request's own path.
pub fn original_url(headers: &HeaderMap, request_uri: &Uri) -> Result<Url, InfrastructureError> {
    if let Some(original) = header(headers, &X_ORIGINAL_URL) {
        return Url::parse(original).map_err(|e| {
            InfrastructureError::ForwardedUri(format!("Unable to parse X-Original-URL: {e}"))
        });
    }

    let proto = forwarded_proto(headers).ok_or_else(|| {
        InfrastructureError::ForwardedUri("Missing header X-Forwarded-Proto".to_string())
    })?;
    let host = forwarded_host(headers).ok_or_else(|| {
        InfrastructureError::ForwardedUri("Missing header X-Forwarded-Host".to_string())
    })?;
    let uri = header(headers, &X_FORWARDED_URI)
        .or_else(|| request_uri.path_and_query().map(|pq| pq.as_str()))
        .unwrap_or("/");

    Url::parse(&format!("{proto}://{host}{uri}")).map_err(|e| {
        InfrastructureError::ForwardedUri(format!("Unable to build the forwarded URL: {e}"))
    })
}

/// `{proto}://{host}` of the portal as reached by the browser
pub fn proto_host(headers: &HeaderMap) -> Result<String, InfrastructureError> {
    let proto = forwarded_proto(headers).ok_or_else(|| {
        InfrastructureError::ForwardedProtoHost("Missing header X-Forwarded-Proto".to_string())
    })?;
    let host = forwarded_host(headers).ok_or_else(|| {
        InfrastructureError::ForwardedProtoHost("Missing header X-Forwarded-Host".to_string())
    })?;
    Ok(format!("{proto}://{host}"))
}

/// Client address: first `X-Forwarded-For` hop, else the connection peer
pub fn remote_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<IpAddr> {
    header(headers, &X_FORWARDED_FOR)
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .or(peer)
}
