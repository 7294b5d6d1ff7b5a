//! Datalayer handlers

use super::{header_str, header_value};
use crate::app::AppState;
use crate::error::ApiResult;
use crate::extractors::Viewer;
use crate::services::datalayers::{Delivery, Served};
use axum::{
    extract::{Path, State},
    http::{
        header::{
            ACCEPT_ENCODING, CACHE_CONTROL, CONTENT_ENCODING, CONTENT_TYPE, ETAG, IF_MATCH,
            IF_NONE_MATCH, LAST_MODIFIED, VARY,
        },
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use leaflet_storage_core::{DataLayerDraft, DataLayerId, DataLayerMetadata, DataLayerVersion, MapId};
use serde::Serialize;
use serde_json::{json, Value};

const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Debug, Serialize)]
pub struct VersionList {
    versions: Vec<DataLayerVersion>,
}

/// Whether `Accept-Encoding` lets us answer with gzip.
/// Whether `Accept-Encoding` lets us answer with gzip. An explicit `gzip`
/// entry wins over `*`, and `q=0` refuses.
fn accepts_gzip(headers: &HeaderMap) -> bool {
    let Some(header) = header_str(headers, ACCEPT_ENCODING) else {
        return false;
    };
    let mut gzip = None;
    let mut wildcard = None;
    for coding in header.split(',') {
        let mut parts = coding.split(';').map(str::trim);
        let name = parts.next().unwrap_or_default();
        let quality = parts
            .find_map(|param| param.strip_prefix("q="))
            .map(|q| q.trim().parse::<f32>().unwrap_or(0.0))
            .unwrap_or(1.0);
        if name.eq_ignore_ascii_case("gzip") {
            gzip = Some(quality);
        } else if name == "*" {
            wildcard = Some(quality);
        }
    }
    gzip.or(wildcard).is_some_and(|q| q > 0.0)
}

fn saved(metadata: DataLayerMetadata, etag: &str) -> ApiResult<Response> {
    Ok(([(ETAG, header_value(etag)?)], Json(metadata)).into_response())
}

pub async fn create(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(map_id): Path<MapId>,
    Json(draft): Json<DataLayerDraft>,
) -> ApiResult<Response> {
    let map = state
        .maps
        .editable(map_id, viewer.access(&state.signer, map_id))
        .await?;
    let (datalayer, etag) = state.datalayers.create(&map, draft).await?;
    saved(datalayer.metadata(), &etag)
}

pub async fn update(
    State(state): State<AppState>,
    viewer: Viewer,
    Path((map_id, pk)): Path<(MapId, DataLayerId)>,
    headers: HeaderMap,
    Json(draft): Json<DataLayerDraft>,
) -> ApiResult<Response> {
    state
        .maps
        .editable(map_id, viewer.access(&state.signer, map_id))
        .await?;
    let (datalayer, etag) = state
        .datalayers
        .update(map_id, pk, draft, header_str(&headers, IF_MATCH))
        .await?;
    saved(datalayer.metadata(), &etag)
}

pub async fn delete(
    State(state): State<AppState>,
    viewer: Viewer,
    Path((map_id, pk)): Path<(MapId, DataLayerId)>,
) -> ApiResult<Json<Value>> {
    state
        .maps
        .editable(map_id, viewer.access(&state.signer, map_id))
        .await?;
    state.datalayers.delete(map_id, pk).await?;
    Ok(Json(json!({ "info": "Layer successfully deleted." })))
}

pub async fn view(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(pk): Path<DataLayerId>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let delivery = state
        .datalayers
        .serve(
            pk,
            viewer.user_id(),
            accepts_gzip(&headers),
            header_str(&headers, IF_NONE_MATCH),
        )
        .await?;

    match delivery {
        Delivery::NotModified { etag } => {
            Ok((StatusCode::NOT_MODIFIED, [(ETAG, header_value(&etag)?)]).into_response())
        }
        Delivery::Content(Served {
            body,
            gzipped,
            etag,
            last_modified,
        }) => {
            let mut response = (
                [
                    (CONTENT_TYPE, header_value("application/json")?),
                    (ETAG, header_value(&etag)?),
                    (
                        LAST_MODIFIED,
                        header_value(&last_modified.format(HTTP_DATE).to_string())?,
                    ),
                    (CACHE_CONTROL, header_value("private, no-cache")?),
                    (VARY, header_value("Accept-Encoding")?),
                ],
                body,
            )
                .into_response();
            if gzipped {
                response
                    .headers_mut()
                    .insert(CONTENT_ENCODING, header_value("gzip")?);
            }
            Ok(response)
        }
    }
}

pub async fn versions(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(pk): Path<DataLayerId>,
) -> ApiResult<Json<VersionList>> {
    let versions = state.datalayers.versions(pk, viewer.user_id()).await?;
    Ok(Json(VersionList { versions }))
}

pub async fn version(
    State(state): State<AppState>,
    viewer: Viewer,
    Path((pk, name)): Path<(DataLayerId, String)>,
) -> ApiResult<Response> {
    let body = state.datalayers.version(pk, &name, viewer.user_id()).await?;
    Ok(([(CONTENT_TYPE, header_value("application/json")?)], body).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{router, testing};
    use crate::handlers::tests::{body_bytes, json, request};
    use axum::http::{header, Method};
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tower::ServiceExt;

    fn collection() -> Value {
        json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": {"type": "Point", "coordinates": [-0.1318359375, 51.474540439419755]},
                "properties": {"name": "London", "description": "London description"}
            }],
            "_storage": {"displayOnLoad": false, "name": "Name"}
        })
    }

    #[test]
    fn test_accepts_gzip() {
        let mut headers = HeaderMap::new();
        assert!(!accepts_gzip(&headers));
        headers.insert(ACCEPT_ENCODING, "gzip, deflate".parse().unwrap());
        assert!(accepts_gzip(&headers));
        headers.insert(ACCEPT_ENCODING, "deflate, gzip;q=0".parse().unwrap());
        assert!(!accepts_gzip(&headers));
        headers.insert(ACCEPT_ENCODING, "*".parse().unwrap());
        assert!(accepts_gzip(&headers));
        headers.insert(ACCEPT_ENCODING, "br".parse().unwrap());
        assert!(!accepts_gzip(&headers));
        headers.insert(ACCEPT_ENCODING, "gzip;q=0, *".parse().unwrap());
        assert!(!accepts_gzip(&headers));
        headers.insert(ACCEPT_ENCODING, "br, *;q=0".parse().unwrap());
        assert!(!accepts_gzip(&headers));
        headers.insert(ACCEPT_ENCODING, "*;q=0, gzip;q=0.5".parse().unwrap());
        assert!(accepts_gzip(&headers));
    }

    #[tokio::test]
    async fn test_create_then_view() {
        let (_dir, state) = testing::state(false).await;
        let owner = testing::user(&state, "joe").await;
        let map = testing::map(&state, Some(&owner)).await;
        let token = testing::token(&state, "joe").await;
        let app = router(state);

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/map/{}/datalayer/create", map.id),
                Some(&token),
                Some(json!({"name": "Name", "display_on_load": false, "geojson": collection()})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let etag = response.headers()[ETAG].to_str().unwrap().to_string();
        let created = json(response).await;
        assert_eq!(created["name"], "Name");
        assert_eq!(created["displayOnLoad"], false);
        let id = created["id"].as_i64().unwrap();

        let response = app
            .clone()
            .oneshot(request(Method::GET, &format!("/datalayer/{}", id), None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[ETAG], etag.as_str());
        assert_eq!(response.headers()[CACHE_CONTROL], "private, no-cache");
        assert!(response.headers().contains_key(LAST_MODIFIED));
        let body = json(response).await;
        assert_eq!(body["features"][0]["properties"]["name"], "London");
        assert_eq!(body["_storage"]["id"], id);

        let mut conditional = request(Method::GET, &format!("/datalayer/{}", id), None, None);
        conditional
            .headers_mut()
            .insert(IF_NONE_MATCH, etag.parse().unwrap());
        let response = app.oneshot(conditional).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn test_view_gzip() {
        let (_dir, state) = testing::state(false).await;
        let map = testing::map(&state, None).await;
        let datalayer = state.datalayers.list(map.id).await.unwrap().remove(0);

        let mut req = request(Method::GET, &format!("/datalayer/{}", datalayer.id), None, None);
        req.headers_mut()
            .insert(header::ACCEPT_ENCODING, "gzip".parse().unwrap());
        let response = router(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_ENCODING], "gzip");
        assert_eq!(response.headers()[VARY], "Accept-Encoding");

        let mut decoded = String::new();
        GzDecoder::new(&body_bytes(response).await[..])
            .read_to_string(&mut decoded)
            .unwrap();
        let body: Value = serde_json::from_str(&decoded).unwrap();
        assert_eq!(body["type"], "FeatureCollection");
    }

    #[tokio::test]
    async fn test_update_with_stale_etag() {
        let (_dir, state) = testing::state(false).await;
        let owner = testing::user(&state, "joe").await;
        let map = testing::map(&state, Some(&owner)).await;
        let token = testing::token(&state, "joe").await;
        let datalayer = state.datalayers.list(map.id).await.unwrap().remove(0);
        let app = router(state);
        let url = format!("/map/{}/datalayer/update/{}", map.id, datalayer.id);

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                &url,
                Some(&token),
                Some(json!({"name": "new name", "geojson": collection()})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let etag = response.headers()[ETAG].to_str().unwrap().to_string();
        assert_eq!(json(response).await["name"], "new name");

        let mut stale = request(
            Method::POST,
            &url,
            Some(&token),
            Some(json!({"name": "other name"})),
        );
        stale
            .headers_mut()
            .insert(IF_MATCH, "\"not-the-current-etag\"".parse().unwrap());
        let response = app.clone().oneshot(stale).await.unwrap();
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);

        let mut fresh = request(
            Method::POST,
            &url,
            Some(&token),
            Some(json!({"name": "other name"})),
        );
        fresh.headers_mut().insert(IF_MATCH, etag.parse().unwrap());
        let response = app.oneshot(fresh).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_second_update_with_same_etag_is_rejected() {
        let (_dir, state) = testing::state(false).await;
        let owner = testing::user(&state, "joe").await;
        let map = testing::map(&state, Some(&owner)).await;
        let token = testing::token(&state, "joe").await;
        let datalayer = state.datalayers.list(map.id).await.unwrap().remove(0);
        let app = router(state);

        let response = app
            .clone()
            .oneshot(request(
                Method::GET,
                &format!("/datalayer/{}", datalayer.id),
                None,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let etag = response.headers()[ETAG].to_str().unwrap().to_string();

        let url = format!("/map/{}/datalayer/update/{}", map.id, datalayer.id);
        let mut statuses = Vec::new();
        for name in ["first writer", "second writer"] {
            let mut update = request(
                Method::POST,
                &url,
                Some(&token),
                Some(json!({"name": name, "geojson": collection()})),
            );
            update.headers_mut().insert(IF_MATCH, etag.parse().unwrap());
            statuses.push(app.clone().oneshot(update).await.unwrap().status());
        }
        assert_eq!(statuses, [StatusCode::OK, StatusCode::PRECONDITION_FAILED]);

        let response = app
            .oneshot(request(
                Method::GET,
                &format!("/datalayer/{}", datalayer.id),
                None,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(json(response).await["_storage"]["name"], "first writer");
    }

    #[tokio::test]
    async fn test_edit_gate_and_foreign_map() {
        let (_dir, state) = testing::state(false).await;
        let owner = testing::user(&state, "joe").await;
        testing::user(&state, "bob").await;
        let map = testing::map(&state, Some(&owner)).await;
        let other = testing::map(&state, Some(&owner)).await;
        let joe = testing::token(&state, "joe").await;
        let bob = testing::token(&state, "bob").await;
        let datalayer = state.datalayers.list(other.id).await.unwrap().remove(0);
        let app = router(state);

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/map/{}/datalayer/create", map.id),
                None,
                Some(json!({"name": "Name"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/map/{}/datalayer/create", map.id),
                Some(&bob),
                Some(json!({"name": "Name"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // A datalayer of another map cannot be reached through this one
        let response = app
            .oneshot(request(
                Method::POST,
                &format!("/map/{}/datalayer/delete/{}", map.id, datalayer.id),
                Some(&joe),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_delete_and_versions() {
        let (_dir, state) = testing::state(false).await;
        let owner = testing::user(&state, "joe").await;
        let map = testing::map(&state, Some(&owner)).await;
        let token = testing::token(&state, "joe").await;
        let datalayer = state.datalayers.list(map.id).await.unwrap().remove(0);
        let app = router(state.clone());

        let response = app
            .clone()
            .oneshot(request(
                Method::GET,
                &format!("/datalayer/{}/versions", datalayer.id),
                None,
                None,
            ))
            .await
            .unwrap();
        let versions = json(response).await;
        let name = versions["versions"][0]["name"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(request(
                Method::GET,
                &format!("/datalayer/{}/version/{}", datalayer.id, name),
                None,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["type"], "FeatureCollection");

        let response = app
            .clone()
            .oneshot(request(
                Method::GET,
                &format!(
                    "/datalayer/{}/version/{}_1400000000000.geojson",
                    datalayer.id,
                    datalayer.id + 1
                ),
                None,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/map/{}/datalayer/delete/{}", map.id, datalayer.id),
                Some(&token),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["info"], "Layer successfully deleted.");
        assert!(state.datalayers.list(map.id).await.unwrap().is_empty());

        let response = app
            .oneshot(request(
                Method::GET,
                &format!("/datalayer/{}", datalayer.id),
                None,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
