//! HTTP handlers

pub mod auth;
pub mod catalog;
pub mod datalayers;
pub mod features;
pub mod health;
pub mod import;
pub mod maps;
pub mod users;

pub use health::health;

use crate::error::{ApiError, ApiResult};
use axum::http::{header::LOCATION, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, SameSite};
use leaflet_storage_core::signing::anonymous_cookie_name;
use leaflet_storage_core::{MapId, Signer};

/// Redirect with an explicit status: axum's `Redirect` has no 301 or 302.
pub(crate) fn redirect(status: StatusCode, location: &str) -> ApiResult<Response> {
    Ok((status, [(LOCATION, header_value(location)?)]).into_response())
}

/// `path` with the raw query string of the incoming request appended.
pub(crate) fn with_query(path: String, query: Option<&str>) -> String {
    match query.filter(|q| !q.is_empty()) {
        Some(query) => format!("{}?{}", path, query),
        None => path,
    }
}

pub(crate) fn header_value(value: &str) -> ApiResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| ApiError::Internal(format!("Invalid header value {:?}: {}", value, e)))
}

pub(crate) fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<&str> {
    headers.get(name).and_then(|h| h.to_str().ok())
}

/// Session cookie proving anonymous ownership of `map_id`.
pub(crate) fn owner_cookie(signer: &Signer, map_id: MapId) -> ApiResult<Cookie<'static>> {
    let value = signer.anonymous_cookie_value(map_id)?;
    Ok(Cookie::build((anonymous_cookie_name(map_id), value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build())
}
