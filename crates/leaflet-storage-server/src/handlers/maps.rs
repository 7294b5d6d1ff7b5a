//! Map handlers

use super::{header_value, owner_cookie, redirect, with_query};
use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::extractors::Viewer;
use crate::services::maps::MapInfos;
use axum::{
    extract::{Path, Query, RawQuery, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use leaflet_storage_core::geo::Format;
use leaflet_storage_core::{Map, MapDraft, MapId, MapSummary, PermissionsUpdate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::info;

const DEFAULT_LIST_LIMIT: i64 = 24;
const MAX_LIST_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct MapListResponse {
    maps: Vec<MapSummary>,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    format: Option<String>,
}

/// Body returned by routes that create or modify a map
#[derive(Debug, Serialize)]
pub struct MapSaved {
    id: MapId,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    anonymous_edit_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    info: Option<String>,
}

impl MapSaved {
    fn new(map: &Map) -> Self {
        Self {
            id: map.id,
            url: map.canonical_path(),
            anonymous_edit_url: None,
            info: None,
        }
    }
}

/// `{slug}_{id}` as found in canonical map URLs
fn parse_slug_id(segment: &str) -> Option<(&str, MapId)> {
    let (slug, id) = segment.rsplit_once('_')?;
    Some((slug, id.parse().ok()?))
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<MapListResponse>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let maps = state.maps.public_maps(limit).await?;
    Ok(Json(MapListResponse { maps }))
}

pub async fn user_maps(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(username): Path<String>,
) -> ApiResult<Json<MapListResponse>> {
    let maps = state.maps.user_maps(&username, viewer.user_id()).await?;
    Ok(Json(MapListResponse { maps }))
}

pub async fn create(
    State(state): State<AppState>,
    viewer: Viewer,
    Json(draft): Json<MapDraft>,
) -> ApiResult<(CookieJar, Json<MapSaved>)> {
    let map = state.maps.create(draft, viewer.user.as_ref()).await?;
    let mut saved = MapSaved::new(&map);
    let mut jar = viewer.cookies;
    if viewer.user.is_none() {
        jar = jar.add(owner_cookie(&state.signer, map.id)?);
        let url = state.maps.anonymous_edit_url(map.id)?;
        saved.info = Some(format!(
            "Your map has been created! If you want to edit this map from another computer, please use this link: {}",
            url
        ));
        saved.anonymous_edit_url = Some(url);
    } else {
        saved.info = Some(
            "Congratulations, your map has been created! To start editing, click on the pen icon."
                .to_string(),
        );
    }
    Ok((jar, Json(saved)))
}

pub async fn view(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(segment): Path<String>,
    RawQuery(raw_query): RawQuery,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    let (slug, id) = parse_slug_id(&segment)
        .ok_or_else(|| ApiError::NotFound(format!("No map at {}", segment)))?;
    let map = state.maps.viewable(id, viewer.user_id()).await?;
    if map.slug != slug {
        return redirect(
            StatusCode::MOVED_PERMANENTLY,
            &with_query(map.canonical_path(), raw_query.as_deref()),
        );
    }
    let access = viewer.access(&state.signer, map.id);
    let settings = state.maps.view(&map, access, &query).await?;
    Ok(Json(settings).into_response())
}

pub async fn short_url(
    State(state): State<AppState>,
    Path(map_id): Path<MapId>,
    RawQuery(raw_query): RawQuery,
) -> ApiResult<Response> {
    let map = state.maps.get(map_id).await?;
    redirect(
        StatusCode::MOVED_PERMANENTLY,
        &with_query(map.canonical_path(), raw_query.as_deref()),
    )
}

/// Map URLs from before anonymous maps existed: `/map/{username}/{slug}`
pub async fn old_url(
    State(state): State<AppState>,
    Path((username, slug)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
) -> ApiResult<Response> {
    let map = state.maps.by_owner_slug(&username, &slug).await?;
    redirect(
        StatusCode::MOVED_PERMANENTLY,
        &with_query(map.canonical_path(), raw_query.as_deref()),
    )
}

pub async fn anonymous_edit(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(signature): Path<String>,
) -> ApiResult<(CookieJar, Response)> {
    let map_id = state.signer.unsign_anonymous_edit(&signature)?;
    let map = state.maps.get(map_id).await?;
    info!("Anonymous edit link used for map {}", map.id);
    let jar = jar.add(owner_cookie(&state.signer, map.id)?);
    Ok((jar, redirect(StatusCode::FOUND, &map.canonical_path())?))
}

pub async fn geojson(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(map_id): Path<MapId>,
) -> ApiResult<Json<Value>> {
    let map = state.maps.viewable(map_id, viewer.user_id()).await?;
    Ok(Json(state.maps.settings_feature(&map).await?))
}

pub async fn infos(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(map_id): Path<MapId>,
) -> ApiResult<Json<MapInfos>> {
    let map = state.maps.viewable(map_id, viewer.user_id()).await?;
    Ok(Json(state.maps.infos(&map)))
}

pub async fn export(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(map_id): Path<MapId>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    let format = match query.format.as_deref() {
        Some(name) => name.parse::<Format>()?,
        None => Format::GeoJson,
    };
    let map = state.maps.viewable(map_id, viewer.user_id()).await?;
    let body = state.maps.export(&map, format).await?;
    let disposition = format!("attachment; filename=\"{}.{}\"", map.slug, format.extension());
    Ok((
        [
            (CONTENT_TYPE, header_value(format.content_type())?),
            (CONTENT_DISPOSITION, header_value(&disposition)?),
        ],
        body,
    )
        .into_response())
}

pub async fn update_settings(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(map_id): Path<MapId>,
    Json(draft): Json<MapDraft>,
) -> ApiResult<Json<MapSaved>> {
    let access = viewer.access(&state.signer, map_id);
    let map = state.maps.update_settings(map_id, draft, access).await?;
    Ok(Json(MapSaved::new(&map)))
}

pub async fn update_permissions(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(map_id): Path<MapId>,
    Json(update): Json<PermissionsUpdate>,
) -> ApiResult<Json<MapSaved>> {
    let access = viewer.access(&state.signer, map_id);
    let map = state.maps.update_permissions(map_id, update, access).await?;
    let mut saved = MapSaved::new(&map);
    saved.info = Some("Map editors updated with success!".to_string());
    Ok(Json(saved))
}

pub async fn delete(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(map_id): Path<MapId>,
) -> ApiResult<Json<Value>> {
    let access = viewer.access(&state.signer, map_id);
    state.maps.delete(map_id, access).await?;
    Ok(Json(json!({ "redirect": "/" })))
}

pub async fn clone_map(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(map_id): Path<MapId>,
) -> ApiResult<(CookieJar, Json<MapSaved>)> {
    let access = viewer.access(&state.signer, map_id);
    let clone = state
        .maps
        .clone_map(map_id, viewer.user.as_ref(), access)
        .await?;
    let mut jar = viewer.cookies;
    let mut saved = MapSaved::new(&clone);
    if viewer.user.is_none() {
        jar = jar.add(owner_cookie(&state.signer, clone.id)?);
        saved.anonymous_edit_url = Some(state.maps.anonymous_edit_url(clone.id)?);
    }
    Ok((jar, Json(saved)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{router, testing};
    use crate::handlers::tests::{body_bytes, json, request};
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use leaflet_storage_core::ports::MapStore;
    use leaflet_storage_core::signing::anonymous_cookie_name;
    use leaflet_storage_core::{EditStatus, ShareStatus};
    use serde_json::json;
    use tower::ServiceExt;

    fn settings_body(name: &str) -> Value {
        json!({
            "name": name,
            "center": {"type": "Point", "coordinates": [13.447265624999998, 48.94415123418794]},
            "settings": {
                "type": "Feature",
                "geometry": {"type": "Point", "coordinates": [5.0592041015625, 52.05924589011585]},
                "properties": {"name": "test enrhûmé", "miniMap": true, "zoom": 8}
            }
        })
    }

    fn with_cookie(mut req: Request<Body>, name: &str, value: &str) -> Request<Body> {
        req.headers_mut().insert(
            header::COOKIE,
            format!("{}={}", name, value).parse().unwrap(),
        );
        req
    }

    fn set_cookie(response: &Response) -> Option<String> {
        response
            .headers()
            .get(header::SET_COOKIE)
            .map(|v| v.to_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn test_create_requires_login() {
        let (_dir, state) = testing::state(false).await;
        let response = router(state)
            .oneshot(request(
                Method::POST,
                "/map/create",
                None,
                Some(settings_body("map")),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json(response).await;
        assert_eq!(body["code"], "login_required");
        assert_eq!(body["login_required"], "/auth/login");
    }

    #[tokio::test]
    async fn test_create_returns_id() {
        let (_dir, state) = testing::state(false).await;
        testing::user(&state, "joe").await;
        let token = testing::token(&state, "joe").await;
        let db = state.db.clone();
        let response = router(state)
            .oneshot(request(
                Method::POST,
                "/map/create",
                Some(&token),
                Some(settings_body("test-map-with-new-name")),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(set_cookie(&response).is_none());
        let body = json(response).await;
        let created = db.get_map(body["id"].as_i64().unwrap()).await.unwrap().unwrap();
        assert_eq!(created.name, "test-map-with-new-name");
        assert_eq!(body["url"], created.canonical_path());
    }

    #[tokio::test]
    async fn test_anonymous_create_sets_cookie() {
        let (_dir, state) = testing::state(true).await;
        let response = router(state)
            .oneshot(request(
                Method::POST,
                "/map/create",
                None,
                Some(settings_body("anonymous map")),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = set_cookie(&response).unwrap();
        let body = json(response).await;
        let id = body["id"].as_i64().unwrap();
        assert!(cookie.starts_with(&anonymous_cookie_name(id)));
        assert!(body["anonymous_edit_url"]
            .as_str()
            .unwrap()
            .contains("/map/anonymous-edit/"));
    }

    #[tokio::test]
    async fn test_view_and_redirects() {
        let (_dir, state) = testing::state(false).await;
        let owner = testing::user(&state, "joe").await;
        let map = testing::map(&state, Some(&owner)).await;
        let app = router(state);

        let response = app
            .clone()
            .oneshot(request(Method::GET, &map.canonical_path(), None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["properties"]["storage_id"], map.id);

        let wrong_slug = format!("/map/wrong-slug_{}?allowEdit=0", map.id);
        let response = app
            .clone()
            .oneshot(request(Method::GET, &wrong_slug, None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers()[header::LOCATION],
            format!("{}?allowEdit=0", map.canonical_path()).as_str()
        );

        let response = app
            .clone()
            .oneshot(request(Method::GET, &format!("/m/{}", map.id), None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers()[header::LOCATION],
            map.canonical_path().as_str()
        );

        let response = app
            .oneshot(request(Method::GET, "/map/joe/test-map", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers()[header::LOCATION],
            map.canonical_path().as_str()
        );
    }

    #[tokio::test]
    async fn test_private_map_visibility() {
        let (_dir, state) = testing::state(false).await;
        let owner = testing::user(&state, "joe").await;
        let editor = testing::user(&state, "bob").await;
        testing::user(&state, "eve").await;
        let mut map = testing::map(&state, Some(&owner)).await;
        map.share_status = ShareStatus::Private;
        map.editors = vec![editor.id];
        state.db.update_map(&map).await.unwrap();
        let bob = testing::token(&state, "bob").await;
        let eve = testing::token(&state, "eve").await;
        let app = router(state);
        let url = map.canonical_path();

        let anonymous = app
            .clone()
            .oneshot(request(Method::GET, &url, None, None))
            .await
            .unwrap();
        assert_eq!(anonymous.status(), StatusCode::FORBIDDEN);
        let stranger = app
            .clone()
            .oneshot(request(Method::GET, &url, Some(&eve), None))
            .await
            .unwrap();
        assert_eq!(stranger.status(), StatusCode::FORBIDDEN);
        let editor = app
            .oneshot(request(Method::GET, &url, Some(&bob), None))
            .await
            .unwrap();
        assert_eq!(editor.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_anonymous_edit_url() {
        let (_dir, state) = testing::state(true).await;
        let map = testing::map(&state, None).await;
        let url = state.maps.anonymous_edit_url(map.id).unwrap();
        let path = url.trim_start_matches(state.settings.site_url());
        let app = router(state);

        let response = app
            .clone()
            .oneshot(request(Method::GET, path, None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            map.canonical_path().as_str()
        );
        assert!(set_cookie(&response)
            .unwrap()
            .starts_with(&anonymous_cookie_name(map.id)));

        let bad = format!("/map/anonymous-edit/{}:badsignature", map.id);
        let response = app
            .oneshot(request(Method::GET, &bad, None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_anonymous_owner_cookie_allows_update_and_delete() {
        let (_dir, state) = testing::state(true).await;
        let map = testing::map(&state, None).await;
        let cookie_name = anonymous_cookie_name(map.id);
        let cookie_value = state.signer.anonymous_cookie_value(map.id).unwrap();
        let app = router(state);
        let update_url = format!("/map/{}/update/settings", map.id);

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                &update_url,
                None,
                Some(settings_body("new map name")),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(with_cookie(
                request(
                    Method::POST,
                    &update_url,
                    None,
                    Some(settings_body("new map name")),
                ),
                &cookie_name,
                &cookie_value,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["id"], map.id);

        let delete_url = format!("/map/{}/update/delete", map.id);
        let response = app
            .clone()
            .oneshot(request(Method::POST, &delete_url, None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(with_cookie(
                request(Method::POST, &delete_url, None, None),
                &cookie_name,
                &cookie_value,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["redirect"], "/");
    }

    #[tokio::test]
    async fn test_permissions_route_gate() {
        let (_dir, state) = testing::state(false).await;
        let owner = testing::user(&state, "joe").await;
        testing::user(&state, "bob").await;
        let map = testing::map(&state, Some(&owner)).await;
        let bob = testing::token(&state, "bob").await;
        let joe = testing::token(&state, "joe").await;
        let app = router(state);
        let url = format!("/map/{}/update/permissions", map.id);
        let update = json!({"edit_status": "editors", "editors": ["bob"]});

        let response = app
            .clone()
            .oneshot(request(Method::POST, &url, None, Some(update.clone())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = app
            .clone()
            .oneshot(request(Method::POST, &url, Some(&bob), Some(update.clone())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let response = app
            .oneshot(request(Method::POST, &url, Some(&joe), Some(update)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_clone_route() {
        let (_dir, state) = testing::state(true).await;
        let owner = testing::user(&state, "joe").await;
        let mut map = testing::map(&state, Some(&owner)).await;
        let app = router(state.clone());
        let url = format!("/map/{}/update/clone", map.id);

        let response = app
            .clone()
            .oneshot(request(Method::POST, &url, None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        map.edit_status = EditStatus::Anonymous;
        state.db.update_map(&map).await.unwrap();
        let response = app
            .oneshot(request(Method::POST, &url, None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(set_cookie(&response).is_some());
        let clone = state
            .maps
            .get(json(response).await["id"].as_i64().unwrap())
            .await
            .unwrap();
        assert_eq!(clone.name, "Clone of test map");
        assert_eq!(clone.owner_id, None);
    }

    #[tokio::test]
    async fn test_geojson_infos_and_export() {
        let (_dir, state) = testing::state(false).await;
        let map = testing::map(&state, None).await;
        let app = router(state);

        let response = app
            .clone()
            .oneshot(request(Method::GET, &format!("/map/{}/geojson", map.id), None, None))
            .await
            .unwrap();
        assert_eq!(json(response).await["type"], "Feature");

        let response = app
            .clone()
            .oneshot(request(Method::GET, &format!("/map/{}/infos", map.id), None, None))
            .await
            .unwrap();
        assert!(json(response).await["iframe_url"]
            .as_str()
            .unwrap()
            .contains("embedControl=0"));

        let response = app
            .clone()
            .oneshot(request(
                Method::GET,
                &format!("/map/{}/export/data?format=kml", map.id),
                None,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"test-map.kml\""
        );
        let kml = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(kml.contains("<kml"));

        let response = app
            .oneshot(request(
                Method::GET,
                &format!("/map/{}/export/data?format=shp", map.id),
                None,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_listings() {
        let (_dir, state) = testing::state(false).await;
        let owner = testing::user(&state, "joe").await;
        testing::map(&state, Some(&owner)).await;
        let app = router(state);

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/maps?limit=5", None, None))
            .await
            .unwrap();
        assert_eq!(json(response).await["maps"].as_array().unwrap().len(), 1);
        let response = app
            .oneshot(request(Method::GET, "/user/joe", None, None))
            .await
            .unwrap();
        assert_eq!(json(response).await["maps"][0]["owner"], "joe");
    }

    #[test]
    fn test_parse_slug_id() {
        assert_eq!(parse_slug_id("my_map_12"), Some(("my_map", 12)));
        assert_eq!(parse_slug_id("map-12"), None);
        assert_eq!(parse_slug_id("map_x"), None);
    }
}
