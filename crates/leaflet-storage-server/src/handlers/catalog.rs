//! Catalogue listings: tile layers, licences and pictograms

use crate::app::AppState;
use crate::error::ApiResult;
use axum::{extract::State, Json};
use leaflet_storage_core::ports::CatalogStore;
use leaflet_storage_core::{Licence, TileLayer};
use serde_json::{json, Value};

pub async fn tilelayers(State(state): State<AppState>) -> ApiResult<Json<Vec<TileLayer>>> {
    Ok(Json(state.db.list_tilelayers().await?))
}

pub async fn licences(State(state): State<AppState>) -> ApiResult<Json<Vec<Licence>>> {
    Ok(Json(state.db.list_licences().await?))
}

pub async fn pictograms(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let pictograms = state.db.list_pictograms().await?;
    Ok(Json(json!({ "pictogram_list": pictograms })))
}
