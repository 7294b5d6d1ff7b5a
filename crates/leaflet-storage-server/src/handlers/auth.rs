//! Authentication handlers

use crate::app::AppState;
use crate::error::ApiResult;
use axum::{extract::State, http::StatusCode, Json};
use leaflet_storage_core::{AuthTokens, User, UserLogin, UserRegistration};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    #[serde(flatten)]
    tokens: AuthTokens,
    user: User,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<UserRegistration>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    info!("Registration attempt for: {}", req.username);
    let (user, tokens) = state.auth_service.register(&req).await?;
    Ok((StatusCode::CREATED, Json(AuthResponse { tokens, user })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<UserLogin>,
) -> ApiResult<Json<AuthResponse>> {
    info!("Login attempt for: {}", req.username);
    let (user, tokens) = state.auth_service.login(&req).await?;
    info!("Login successful for: {}", user.username);
    Ok(Json(AuthResponse { tokens, user }))
}
