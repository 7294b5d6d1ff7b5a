//! Single-feature editing inside a datalayer
//!
//! Features are addressed by their position in the datalayer's
//! FeatureCollection. Writes honour `If-Match` like whole-layer updates and
//! answer with the new ETag.

use super::{header_str, header_value};
use crate::app::AppState;
use crate::error::ApiResult;
use crate::extractors::Viewer;
use axum::{
    extract::{Path, State},
    http::{
        header::{ETAG, IF_MATCH},
        HeaderMap,
    },
    response::{IntoResponse, Response},
    Json,
};
use geojson::Feature;
use leaflet_storage_core::{DataLayerId, MapId};
use serde_json::{json, Value};

fn with_etag(etag: &str, body: Value) -> ApiResult<Response> {
    Ok(([(ETAG, header_value(etag)?)], Json(body)).into_response())
}

pub async fn add(
    State(state): State<AppState>,
    viewer: Viewer,
    Path((map_id, pk)): Path<(MapId, DataLayerId)>,
    headers: HeaderMap,
    Json(feature): Json<Value>,
) -> ApiResult<Response> {
    state
        .maps
        .editable(map_id, viewer.access(&state.signer, map_id))
        .await?;
    let (index, etag) = state
        .datalayers
        .add_feature(map_id, pk, feature, header_str(&headers, IF_MATCH))
        .await?;
    with_etag(&etag, json!({ "index": index }))
}

pub async fn update(
    State(state): State<AppState>,
    viewer: Viewer,
    Path((map_id, pk, index)): Path<(MapId, DataLayerId, usize)>,
    headers: HeaderMap,
    Json(feature): Json<Value>,
) -> ApiResult<Response> {
    state
        .maps
        .editable(map_id, viewer.access(&state.signer, map_id))
        .await?;
    let etag = state
        .datalayers
        .update_feature(map_id, pk, index, feature, header_str(&headers, IF_MATCH))
        .await?;
    with_etag(&etag, json!({ "index": index }))
}

pub async fn delete(
    State(state): State<AppState>,
    viewer: Viewer,
    Path((map_id, pk, index)): Path<(MapId, DataLayerId, usize)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    state
        .maps
        .editable(map_id, viewer.access(&state.signer, map_id))
        .await?;
    let etag = state
        .datalayers
        .delete_feature(map_id, pk, index, header_str(&headers, IF_MATCH))
        .await?;
    with_etag(&etag, json!({ "info": "Feature successfully deleted." }))
}

pub async fn get(
    State(state): State<AppState>,
    viewer: Viewer,
    Path((pk, index)): Path<(DataLayerId, usize)>,
) -> ApiResult<Json<Feature>> {
    let feature = state.datalayers.feature(pk, index, viewer.user_id()).await?;
    Ok(Json(feature))
}
