//! User handlers

use crate::extractors::AuthUser;
use axum::Json;
use leaflet_storage_core::User;

pub async fn me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}
