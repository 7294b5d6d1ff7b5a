//! Map service

use crate::config::Settings;
use crate::error::{ApiError, ApiResult};
use crate::services::DataLayerService;
use crate::storage::Database;
use chrono::Utc;
use geojson::JsonObject;
use leaflet_storage_core::geo::{self, geojson as collections, Format};
use leaflet_storage_core::ports::{CatalogStore, MapStore, UserStore};
use leaflet_storage_core::{
    permissions, slug, Center, DataLayerDraft, EditStatus, LicenceId, Map, MapDraft, MapId,
    MapSummary, PermissionsUpdate, ShareStatus, Signer, StorageError, TileLayerId, User, UserId,
};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;

const DEFAULT_DATALAYER_NAME: &str = "Layer 1";
const MAX_NAME_LENGTH: usize = 200;
const MAX_ZOOM: i64 = 24;

/// Frontend controls a map URL may switch on or off with `?key=0|1`.
pub const VIEW_CONTROLS: [&str; 10] = [
    "embedControl",
    "homeControl",
    "locateControl",
    "jumpToLocationControl",
    "editInOSMControl",
    "scaleControl",
    "miniMap",
    "zoomControl",
    "datalayersControl",
    "locateOnLoad",
];

/// Controls disabled in the embeddable iframe URL
const EMBED_DISABLED: [&str; 8] = [
    "allowEdit",
    "embedControl",
    "homeControl",
    "locateControl",
    "jumpToLocationControl",
    "editInOSMControl",
    "scaleControl",
    "miniMap",
];

/// Identity of a request as the permission rules see it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Access {
    pub user: Option<UserId>,
    /// The request carries a valid anonymous ownership cookie for the map
    pub anonymous_owner: bool,
}

/// Share links of a map
#[derive(Debug, Clone, Serialize)]
pub struct MapInfos {
    pub map_url: String,
    pub short_url: String,
    pub iframe_url: String,
}

pub struct MapService {
    db: Arc<Database>,
    datalayers: Arc<DataLayerService>,
    signer: Arc<Signer>,
    settings: Arc<Settings>,
}

fn clean_name(name: &str) -> ApiResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("A map needs a name".to_string()));
    }
    Ok(slug::truncate(name, MAX_NAME_LENGTH).to_string())
}

fn checked_center(center: Center) -> ApiResult<Center> {
    if !center.is_valid() {
        return Err(ApiError::BadRequest(format!(
            "Invalid center: {}, {}",
            center.lng, center.lat
        )));
    }
    Ok(center)
}

fn checked_zoom(zoom: i64) -> ApiResult<i64> {
    if !(0..=MAX_ZOOM).contains(&zoom) {
        return Err(ApiError::BadRequest(format!("Invalid zoom: {}", zoom)));
    }
    Ok(zoom)
}

fn checked_settings(settings: JsonValue) -> ApiResult<JsonValue> {
    if !settings.is_object() {
        return Err(ApiError::BadRequest(
            "Map settings must be a JSON object".to_string(),
        ));
    }
    Ok(settings)
}

fn query_int(query: &HashMap<String, String>, key: &str) -> Option<i64> {
    query.get(key).and_then(|v| v.trim().parse().ok())
}

fn truthy(value: Option<&JsonValue>) -> bool {
    match value {
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => false,
    }
}

impl MapService {
    pub fn new(
        db: Arc<Database>,
        datalayers: Arc<DataLayerService>,
        signer: Arc<Signer>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            db,
            datalayers,
            signer,
            settings,
        }
    }

    fn login_required(&self) -> ApiError {
        ApiError::LoginRequired {
            login_url: self.settings.login_url.clone(),
        }
    }

    pub async fn get(&self, id: MapId) -> ApiResult<Map> {
        self.db
            .get_map(id)
            .await?
            .ok_or_else(|| StorageError::MapNotFound(id).into())
    }

    pub async fn viewable(&self, id: MapId, user: Option<UserId>) -> ApiResult<Map> {
        let map = self.get(id).await?;
        if !permissions::can_view(&map, user) {
            return Err(ApiError::Forbidden(
                "You are not allowed to see this map.".to_string(),
            ));
        }
        Ok(map)
    }

    /// The map `id`, after the edit gate every map-mutating route goes through.
    pub async fn editable(&self, id: MapId, access: Access) -> ApiResult<Map> {
        let map = self.get(id).await?;
        permissions::check_edit(
            &map,
            access.user,
            access.anonymous_owner,
            self.settings.allow_anonymous,
        )
        .map_err(|denied| ApiError::denied(denied, &self.settings.login_url))?;
        Ok(map)
    }

    /// Map addressed by the URL scheme of older versions: owner and slug.
    pub async fn by_owner_slug(&self, username: &str, slug: &str) -> ApiResult<Map> {
        let owner = self
            .db
            .get_user_by_username(username)
            .await?
            .ok_or_else(|| StorageError::UserNotFound(username.to_string()))?;
        self.db
            .get_map_by_slug(owner.id, slug)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("No map {} for {}", slug, username)))
    }

    async fn licence_id(&self, requested: Option<LicenceId>) -> ApiResult<Option<LicenceId>> {
        match requested {
            Some(id) => match self.db.get_licence(id).await? {
                Some(licence) => Ok(Some(licence.id)),
                None => Err(ApiError::BadRequest(format!("Unknown licence: {}", id))),
            },
            None => Ok(self.db.default_licence().await?.map(|l| l.id)),
        }
    }

    async fn tilelayer_id(
        &self,
        requested: Option<TileLayerId>,
    ) -> ApiResult<Option<TileLayerId>> {
        match requested {
            Some(id) => match self.db.get_tilelayer(id).await? {
                Some(tilelayer) => Ok(Some(tilelayer.id)),
                None => Err(ApiError::BadRequest(format!("Unknown tile layer: {}", id))),
            },
            None => Ok(self.db.default_tilelayer().await?.map(|t| t.id)),
        }
    }

    /// Create a map with the catalogue defaults and one empty datalayer.
    pub async fn create(&self, draft: MapDraft, user: Option<&User>) -> ApiResult<Map> {
        if user.is_none() && !self.settings.allow_anonymous {
            return Err(self.login_required());
        }
        let name = clean_name(&draft.name)?;
        let mut map = Map {
            id: 0,
            slug: slug::slugify(&name),
            name,
            description: draft.description,
            center: checked_center(draft.center.unwrap_or_default())?,
            zoom: checked_zoom(draft.zoom.unwrap_or(Map::DEFAULT_ZOOM))?,
            locate: draft.locate.unwrap_or(false),
            licence_id: self.licence_id(draft.licence).await?,
            tilelayer_id: self.tilelayer_id(draft.tilelayer).await?,
            owner_id: user.map(|u| u.id),
            editors: Vec::new(),
            edit_status: EditStatus::default(),
            share_status: ShareStatus::default(),
            settings: checked_settings(draft.settings.unwrap_or_else(|| json!({})))?,
            modified_at: Utc::now(),
        };
        map.id = self.db.create_map(&map).await?;

        let default_layer = DataLayerDraft {
            name: Some(DEFAULT_DATALAYER_NAME.to_string()),
            ..Default::default()
        };
        self.datalayers.create(&map, default_layer).await?;

        match user {
            Some(user) => info!("Map {} created by {}", map.id, user.username),
            None => info!("Map {} created anonymously", map.id),
        }
        Ok(map)
    }

    pub async fn update_settings(
        &self,
        id: MapId,
        draft: MapDraft,
        access: Access,
    ) -> ApiResult<Map> {
        let mut map = self.editable(id, access).await?;

        map.name = clean_name(&draft.name)?;
        map.slug = slug::slugify(&map.name);
        if draft.description.is_some() {
            map.description = draft.description;
        }
        if let Some(center) = draft.center {
            map.center = checked_center(center)?;
        }
        if let Some(zoom) = draft.zoom {
            map.zoom = checked_zoom(zoom)?;
        }
        if let Some(locate) = draft.locate {
            map.locate = locate;
        }
        if draft.licence.is_some() {
            map.licence_id = self.licence_id(draft.licence).await?;
        }
        if draft.tilelayer.is_some() {
            map.tilelayer_id = self.tilelayer_id(draft.tilelayer).await?;
        }
        if let Some(settings) = draft.settings {
            map.settings = checked_settings(settings)?;
        }

        // Logging in with the ownership cookie adopts the map
        if map.owner_id.is_none() && access.anonymous_owner {
            if let Some(user) = access.user {
                map.owner_id = Some(user);
                info!("User {} became owner of anonymous map {}", user, id);
            }
        }

        map.modified_at = Utc::now();
        self.db.update_map(&map).await?;
        info!("Updated settings of map {}", id);
        Ok(map)
    }

    async fn user_id_of(&self, username: &str) -> ApiResult<UserId> {
        self.db
            .get_user_by_username(username)
            .await?
            .map(|u| u.id)
            .ok_or_else(|| ApiError::BadRequest(format!("Unknown user: {}", username)))
    }

    pub async fn update_permissions(
        &self,
        id: MapId,
        update: PermissionsUpdate,
        access: Access,
    ) -> ApiResult<Map> {
        let mut map = self.editable(id, access).await?;
        if let Err(reason) = permissions::check_permissions_update(&map, access.user, &update) {
            return Err(match map.owner_id {
                Some(_) => ApiError::Forbidden(reason.to_string()),
                None => ApiError::BadRequest(reason.to_string()),
            });
        }

        if let Some(edit_status) = update.edit_status {
            map.edit_status = edit_status;
        }
        if let Some(share_status) = update.share_status {
            map.share_status = share_status;
        }
        if let Some(owner) = &update.owner {
            map.owner_id = Some(self.user_id_of(owner).await?);
        }
        if let Some(usernames) = &update.editors {
            let mut editors = Vec::with_capacity(usernames.len());
            for username in usernames {
                let user_id = self.user_id_of(username).await?;
                if !editors.contains(&user_id) {
                    editors.push(user_id);
                }
            }
            map.editors = editors;
        }
        let owner = map.owner_id;
        map.editors.retain(|e| Some(*e) != owner);

        map.modified_at = Utc::now();
        self.db.update_map(&map).await?;
        info!(
            "Updated permissions of map {}: edit={} share={} editors={}",
            id,
            map.edit_status,
            map.share_status,
            map.editors.len()
        );
        Ok(map)
    }

    pub async fn delete(&self, id: MapId, access: Access) -> ApiResult<()> {
        let map = self.editable(id, access).await?;
        if !permissions::can_delete(&map, access.user, access.anonymous_owner) {
            return Err(ApiError::Forbidden(
                "Only its owner can delete the map.".to_string(),
            ));
        }
        for datalayer in self.datalayers.list(id).await? {
            self.datalayers.delete(id, datalayer.id).await?;
        }
        self.db.delete_map(id).await?;
        info!("Deleted map {}", id);
        Ok(())
    }

    /// Copy a map with its datalayers; the requester owns the copy.
    pub async fn clone_map(&self, id: MapId, user: Option<&User>, access: Access) -> ApiResult<Map> {
        let source = self.editable(id, access).await?;
        if user.is_none() && !self.settings.allow_anonymous {
            return Err(ApiError::Forbidden(
                "Anonymous users cannot create maps.".to_string(),
            ));
        }

        let owner_id = user.map(|u| u.id);
        let name = format!("Clone of {}", source.name);
        let mut clone = Map {
            id: 0,
            slug: slug::slugify(&name),
            name,
            owner_id,
            editors: source
                .editors
                .iter()
                .copied()
                .filter(|e| Some(*e) != owner_id)
                .collect(),
            modified_at: Utc::now(),
            ..source.clone()
        };
        clone.id = self.db.create_map(&clone).await?;
        for datalayer in self.datalayers.list(source.id).await? {
            self.datalayers.copy_to(&datalayer, clone.id).await?;
        }
        info!("Cloned map {} into {}", source.id, clone.id);
        Ok(clone)
    }

    /// The map as the frontend loads it: a GeoJSON Feature centred on the map
    /// whose properties hold its settings, datalayers and catalogue.
    pub async fn settings_feature(&self, map: &Map) -> ApiResult<JsonValue> {
        let mut properties: JsonObject = map
            .settings
            .get("properties")
            .and_then(JsonValue::as_object)
            .cloned()
            .unwrap_or_default();

        properties.insert("name".to_string(), json!(map.name));
        properties.insert("description".to_string(), json!(map.description));
        properties.insert("storage_id".to_string(), json!(map.id));
        properties.insert("zoom".to_string(), json!(map.zoom));
        properties.insert("edit_status".to_string(), json!(map.edit_status));
        properties.insert("share_status".to_string(), json!(map.share_status));
        if map.locate {
            properties.insert("locateOnLoad".to_string(), json!(true));
        }

        let datalayers: Vec<_> = self
            .datalayers
            .list(map.id)
            .await?
            .iter()
            .map(|d| d.metadata())
            .collect();
        properties.insert("datalayers".to_string(), json!(datalayers));

        if let Some(id) = map.tilelayer_id {
            if let Some(tilelayer) = self.db.get_tilelayer(id).await? {
                properties.insert("tilelayer".to_string(), json!(tilelayer));
            }
        }
        if let Some(id) = map.licence_id {
            if let Some(licence) = self.db.get_licence(id).await? {
                properties.insert("licence".to_string(), json!(licence));
            }
        }

        let author = match map.owner_id {
            Some(owner_id) => self.db.get_user(owner_id).await?.map(|owner| {
                json!({"name": owner.username, "url": format!("/user/{}", owner.username)})
            }),
            None => None,
        };
        properties.insert("author".to_string(), json!(author));

        Ok(json!({
            "type": "Feature",
            "geometry": map.center,
            "properties": properties,
        }))
    }

    /// Settings feature of the map page, with `allowEdit`, the catalogue
    /// lists and any control overridden from the query string.
    pub async fn view(
        &self,
        map: &Map,
        access: Access,
        query: &HashMap<String, String>,
    ) -> ApiResult<JsonValue> {
        let mut feature = self.settings_feature(map).await?;

        // Anonymous visitors get the edit buttons; acting on them asks for a login
        let allow_edit = match access.user {
            Some(_) => i64::from(permissions::can_edit(
                map,
                access.user,
                access.anonymous_owner,
                self.settings.allow_anonymous,
            )),
            None => 1,
        };
        let tilelayers = self.db.list_tilelayers().await?;
        let licences = self.db.list_licences().await?;

        if let Some(properties) = feature
            .get_mut("properties")
            .and_then(JsonValue::as_object_mut)
        {
            properties.insert(
                "allowEdit".to_string(),
                json!(query_int(query, "allowEdit").unwrap_or(allow_edit)),
            );
            for key in VIEW_CONTROLS {
                if let Some(value) = query_int(query, key) {
                    properties.insert(key.to_string(), json!(value));
                }
            }
            if truthy(properties.get("locateOnLoad")) {
                properties.insert(
                    "locate".to_string(),
                    json!({"setView": true, "enableHighAccuracy": true, "timeout": 3000}),
                );
            }
            properties.insert("tilelayers".to_string(), json!(tilelayers));
            properties.insert("licences".to_string(), json!(licences));
        }
        Ok(feature)
    }

    pub fn infos(&self, map: &Map) -> MapInfos {
        let base = self.settings.share_url();
        let map_url = format!("{}{}", base, map.canonical_path());
        let query: Vec<String> = EMBED_DISABLED.iter().map(|k| format!("{}=0", k)).collect();
        MapInfos {
            iframe_url: format!("{}?{}", map_url, query.join("&")),
            short_url: format!("{}{}", base, map.short_path()),
            map_url,
        }
    }

    /// Absolute URL that hands out the ownership cookie of an anonymous map.
    pub fn anonymous_edit_url(&self, map_id: MapId) -> ApiResult<String> {
        let signature = self.signer.anonymous_edit_signature(map_id)?;
        Ok(format!(
            "{}/map/anonymous-edit/{}",
            self.settings.site_url(),
            signature
        ))
    }

    /// Every feature of every datalayer of `map`, encoded as `format`.
    pub async fn export(&self, map: &Map, format: Format) -> ApiResult<Vec<u8>> {
        let mut features = Vec::new();
        for datalayer in self.datalayers.list(map.id).await? {
            if let Some(path) = &datalayer.geojson {
                let content = self.datalayers.read_file(path).await?;
                features.extend(collections::parse_collection(&content)?.features);
            }
        }
        info!(
            "Exporting {} feature(s) of map {} as {}",
            features.len(),
            map.id,
            format
        );
        Ok(geo::encode(format, &features, &map.name)?)
    }

    async fn summarize(&self, maps: Vec<Map>) -> ApiResult<Vec<MapSummary>> {
        let owner_ids: Vec<UserId> = maps
            .iter()
            .filter_map(|m| m.owner_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let owners: HashMap<UserId, String> = self
            .db
            .get_users(&owner_ids)
            .await?
            .into_iter()
            .map(|u| (u.id, u.username))
            .collect();
        Ok(maps
            .into_iter()
            .map(|map| MapSummary {
                id: map.id,
                url: map.canonical_path(),
                owner: map.owner_id.and_then(|id| owners.get(&id).cloned()),
                name: map.name,
                description: map.description,
                share_status: map.share_status,
                modified_at: map.modified_at,
            })
            .collect())
    }

    pub async fn public_maps(&self, limit: i64) -> ApiResult<Vec<MapSummary>> {
        let maps = self.db.public_maps(limit).await?;
        self.summarize(maps).await
    }

    /// Maps owned or edited by `username` that `viewer` may see.
    pub async fn user_maps(
        &self,
        username: &str,
        viewer: Option<UserId>,
    ) -> ApiResult<Vec<MapSummary>> {
        let user = self
            .db
            .get_user_by_username(username)
            .await?
            .ok_or_else(|| StorageError::UserNotFound(username.to_string()))?;
        let maps = self
            .db
            .user_maps(user.id)
            .await?
            .into_iter()
            .filter(|m| permissions::can_view(m, viewer))
            .collect();
        self.summarize(maps).await
    }
}
