//! Request identity extractors
//!
//! Routes that work for anonymous visitors take a [`Viewer`]; routes that
//! only make sense for an account take an [`AuthUser`].

use crate::app::AppState;
use crate::error::ApiError;
use crate::services::Access;
use axum::extract::FromRequestParts;
use axum::http::{header::AUTHORIZATION, request::Parts, HeaderMap};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use leaflet_storage_core::ports::UserStore;
use leaflet_storage_core::signing::anonymous_cookie_name;
use leaflet_storage_core::{MapId, Signer, User, UserId};

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// Whoever is making the request: maybe a user, always a cookie jar.
#[derive(Debug, Clone)]
pub struct Viewer {
    pub user: Option<User>,
    pub cookies: CookieJar,
}

impl Viewer {
    pub fn user_id(&self) -> Option<UserId> {
        self.user.as_ref().map(|u| u.id)
    }

    /// Whether the request carries a valid ownership cookie for `map_id`.
    pub fn is_anonymous_owner(&self, signer: &Signer, map_id: MapId) -> bool {
        let cookie = self
            .cookies
            .get(&anonymous_cookie_name(map_id))
            .map(Cookie::value);
        signer.is_anonymous_owner(map_id, cookie)
    }

    pub fn access(&self, signer: &Signer, map_id: MapId) -> Access {
        Access {
            user: self.user_id(),
            anonymous_owner: self.is_anonymous_owner(signer, map_id),
        }
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for Viewer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let cookies = CookieJar::from_headers(&parts.headers);

        // A token that does not validate is an error, not an anonymous request
        let user = match bearer_token(&parts.headers) {
            Some(token) => {
                let user_id = state.auth_service.validate_token(token)?;
                let user = state
                    .db
                    .get_user(user_id)
                    .await?
                    .ok_or_else(|| ApiError::Unauthorized("User not found".to_string()))?;
                Some(user)
            }
            None => None,
        };

        Ok(Viewer { user, cookies })
    }
}

/// An authenticated user; rejects anonymous requests with 401.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let viewer = Viewer::from_request_parts(parts, state).await?;
        viewer
            .user
            .map(AuthUser)
            .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".to_string()))
    }
}
