//! Datalayer service
//!
//! Owns every write to datalayer files. Writes take the datalayer's lock,
//! compare `If-Match` with the ETag of the current file and store a new
//! version, so the check and the write cannot interleave with another save.

use crate::config::Settings;
use crate::error::{ApiError, ApiResult};
use crate::storage::{DataLayerLocks, Database};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use geojson::{Feature, FeatureCollection, JsonObject};
use leaflet_storage_core::files::{self, DataLayerFiles};
use leaflet_storage_core::geo::{self, geojson as collections, Format, ImportReport};
use leaflet_storage_core::ports::{DataLayerStore, MapStore};
use leaflet_storage_core::{
    permissions, slug, DataLayer, DataLayerDraft, DataLayerId, DataLayerMetadata,
    DataLayerVersion, Map, MapId, StorageError, UserId,
};
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_NAME_LENGTH: usize = 50;
const IMPORTED_LAYER_NAME: &str = "Imported data";

/// Where imported data comes from
#[derive(Debug, Clone)]
pub enum ImportSource {
    File {
        content: Vec<u8>,
        file_name: Option<String>,
        content_type: Option<String>,
    },
    Url(String),
    Raw(String),
}

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub source: ImportSource,
    /// Explicit format name; guessed from the content type or file name when absent
    pub format: Option<String>,
    /// Existing datalayer to append to; a new one is created when absent
    pub datalayer: Option<DataLayerId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    pub datalayer: DataLayerMetadata,
    #[serde(flatten)]
    pub report: ImportReport,
    pub info: String,
}

/// A datalayer file ready to be sent
#[derive(Debug)]
pub struct Served {
    pub body: Vec<u8>,
    pub gzipped: bool,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug)]
pub enum Delivery {
    NotModified { etag: String },
    Content(Served),
}

pub struct DataLayerService {
    db: Arc<Database>,
    files: Arc<DataLayerFiles>,
    locks: Arc<DataLayerLocks>,
    settings: Arc<Settings>,
    http: reqwest::Client,
}

fn clean_name(name: Option<&str>) -> Option<String> {
    name.map(str::trim)
        .filter(|n| !n.is_empty())
        .map(|n| slug::truncate(n, MAX_NAME_LENGTH).to_string())
}

/// Parse a posted FeatureCollection, given either as JSON or as JSON text.
fn parse_collection(value: &JsonValue) -> ApiResult<FeatureCollection> {
    let content = match value {
        JsonValue::String(text) => text.clone().into_bytes(),
        other => serde_json::to_vec(other).map_err(StorageError::from)?,
    };
    Ok(collections::parse_collection(&content)?)
}

fn parse_feature(value: JsonValue) -> ApiResult<Feature> {
    let feature: Feature = serde_json::from_value(value).map_err(StorageError::from)?;
    if feature.geometry.is_none() {
        return Err(ApiError::BadRequest("A feature needs a geometry".to_string()));
    }
    Ok(feature)
}

/// Keep the `_storage` member of a datalayer file in sync with its row.
fn stamp(collection: &mut FeatureCollection, datalayer: &DataLayer) {
    let members = collection.foreign_members.get_or_insert_with(JsonObject::new);
    let storage = members
        .entry("_storage".to_string())
        .or_insert_with(|| json!({}));
    if !storage.is_object() {
        *storage = json!({});
    }
    if let Some(storage) = storage.as_object_mut() {
        storage.insert("id".to_string(), json!(datalayer.id));
        storage.insert("name".to_string(), json!(datalayer.name));
        storage.insert("displayOnLoad".to_string(), json!(datalayer.display_on_load));
    }
}

/// Name of a datalayer created by an import: the uploaded file's stem.
fn imported_layer_name(file_name: Option<&str>) -> String {
    file_name
        .map(|name| name.rsplit(['/', '\\']).next().unwrap_or(name))
        .map(|name| name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name))
        .and_then(|stem| clean_name(Some(stem)))
        .unwrap_or_else(|| IMPORTED_LAYER_NAME.to_string())
}

impl DataLayerService {
    pub fn new(
        db: Arc<Database>,
        files: Arc<DataLayerFiles>,
        locks: Arc<DataLayerLocks>,
        settings: Arc<Settings>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            db,
            files,
            locks,
            settings,
            http,
        }
    }

    pub async fn get(&self, id: DataLayerId) -> ApiResult<DataLayer> {
        self.db
            .get_datalayer(id)
            .await?
            .ok_or_else(|| StorageError::DataLayerNotFound(id).into())
    }

    /// The datalayer `id`, refusing one that belongs to another map.
    pub async fn owned(&self, map_id: MapId, id: DataLayerId) -> ApiResult<DataLayer> {
        let datalayer = self.get(id).await?;
        if datalayer.map_id != map_id {
            return Err(ApiError::Forbidden(
                "This datalayer belongs to another map.".to_string(),
            ));
        }
        Ok(datalayer)
    }

    /// The datalayer `id`, when its map is visible to `user`.
    pub async fn viewable(&self, id: DataLayerId, user: Option<UserId>) -> ApiResult<DataLayer> {
        let datalayer = self.get(id).await?;
        let map = self
            .db
            .get_map(datalayer.map_id)
            .await?
            .ok_or(StorageError::MapNotFound(datalayer.map_id))?;
        if !permissions::can_view(&map, user) {
            return Err(ApiError::Forbidden(
                "You are not allowed to see this map.".to_string(),
            ));
        }
        Ok(datalayer)
    }

    pub async fn list(&self, map_id: MapId) -> ApiResult<Vec<DataLayer>> {
        Ok(self.db.list_datalayers(map_id).await?)
    }

    pub async fn read_file(&self, path: &str) -> ApiResult<Vec<u8>> {
        Ok(self.files.read(path).await?)
    }

    /// Current FeatureCollection of a datalayer and its ETag.
    async fn current(&self, datalayer: &DataLayer) -> ApiResult<(FeatureCollection, String)> {
        let content = match &datalayer.geojson {
            Some(path) => self.files.read(path).await?,
            None => collections::to_vec(&collections::collection(Vec::new()))?,
        };
        let etag = files::etag(&content);
        Ok((collections::parse_collection(&content)?, etag))
    }

    /// Write `collection` as the newest version of `datalayer` and point the
    /// row at it. Returns the new ETag.
    async fn store(
        &self,
        datalayer: &mut DataLayer,
        mut collection: FeatureCollection,
    ) -> ApiResult<String> {
        stamp(&mut collection, datalayer);
        let content = collections::to_vec(&collection)?;
        let path = self
            .files
            .write(datalayer.map_id, datalayer.id, &content)
            .await?;
        datalayer.geojson = Some(path);
        datalayer.modified_at = Utc::now();
        self.db.update_datalayer(datalayer).await?;
        Ok(files::etag(&content))
    }

    pub async fn create(&self, map: &Map, draft: DataLayerDraft) -> ApiResult<(DataLayer, String)> {
        let name = clean_name(draft.name.as_deref())
            .ok_or_else(|| ApiError::BadRequest("A datalayer needs a name".to_string()))?;
        let collection = match &draft.geojson {
            Some(value) => parse_collection(value)?,
            None => collections::collection(Vec::new()),
        };
        let rank = match draft.rank {
            Some(rank) => rank,
            None => self.db.list_datalayers(map.id).await?.len() as i64,
        };

        let mut datalayer = DataLayer {
            id: 0,
            map_id: map.id,
            name,
            description: draft.description,
            geojson: None,
            display_on_load: draft.display_on_load.unwrap_or(true),
            rank,
            modified_at: Utc::now(),
        };
        datalayer.id = self.db.create_datalayer(&datalayer).await?;
        let etag = self.store(&mut datalayer, collection).await?;
        info!(
            "Created datalayer {} ({}) in map {}",
            datalayer.id, datalayer.name, map.id
        );
        Ok((datalayer, etag))
    }

    pub async fn update(
        &self,
        map_id: MapId,
        id: DataLayerId,
        draft: DataLayerDraft,
        if_match: Option<&str>,
    ) -> ApiResult<(DataLayer, String)> {
        self.owned(map_id, id).await?;
        let _guard = self.locks.acquire(id).await;
        let mut datalayer = self.owned(map_id, id).await?;

        let (current, etag) = self.current(&datalayer).await?;
        if !files::if_match(if_match, &etag) {
            warn!("Rejected stale update of datalayer {}", id);
            return Err(ApiError::PreconditionFailed);
        }

        if let Some(name) = clean_name(draft.name.as_deref()) {
            datalayer.name = name;
        }
        if draft.description.is_some() {
            datalayer.description = draft.description;
        }
        if let Some(display_on_load) = draft.display_on_load {
            datalayer.display_on_load = display_on_load;
        }
        if let Some(rank) = draft.rank {
            datalayer.rank = rank;
        }
        let collection = match &draft.geojson {
            Some(value) => parse_collection(value)?,
            None => current,
        };

        let etag = self.store(&mut datalayer, collection).await?;
        info!("Updated datalayer {} of map {}", id, map_id);
        Ok((datalayer, etag))
    }

    pub async fn delete(&self, map_id: MapId, id: DataLayerId) -> ApiResult<()> {
        let datalayer = self.owned(map_id, id).await?;
        {
            let _guard = self.locks.acquire(id).await;
            self.remove(&datalayer).await?;
        }
        self.locks.forget(id);
        Ok(())
    }

    /// Drop a datalayer's row and every stored version of its file.
    async fn remove(&self, datalayer: &DataLayer) -> ApiResult<()> {
        self.files
            .remove_all(datalayer.map_id, datalayer.id)
            .await?;
        self.db.delete_datalayer(datalayer.id).await?;
        info!(
            "Deleted datalayer {} of map {}",
            datalayer.id, datalayer.map_id
        );
        Ok(())
    }

    /// Duplicate a datalayer, with its current data, into another map.
    pub async fn copy_to(&self, source: &DataLayer, map_id: MapId) -> ApiResult<DataLayer> {
        let (collection, _) = self.current(source).await?;
        let mut datalayer = DataLayer {
            id: 0,
            map_id,
            geojson: None,
            modified_at: Utc::now(),
            ..source.clone()
        };
        datalayer.id = self.db.create_datalayer(&datalayer).await?;
        self.store(&mut datalayer, collection).await?;
        debug!(
            "Copied datalayer {} to {} in map {}",
            source.id, datalayer.id, map_id
        );
        Ok(datalayer)
    }

    pub async fn serve(
        &self,
        id: DataLayerId,
        user: Option<UserId>,
        accept_gzip: bool,
        if_none_match: Option<&str>,
    ) -> ApiResult<Delivery> {
        let datalayer = self.viewable(id, user).await?;
        let path = datalayer
            .geojson
            .as_deref()
            .ok_or(StorageError::DataLayerNotFound(id))?;

        let content = self.files.read(path).await?;
        let etag = files::etag(&content);
        if files::if_none_match(if_none_match, &etag) {
            return Ok(Delivery::NotModified { etag });
        }

        let last_modified = self.files.modified(path).await?;
        let (body, gzipped) = if accept_gzip {
            let gz = self.files.gzip(path).await?;
            (self.files.read(&gz).await?, true)
        } else {
            (content, false)
        };
        Ok(Delivery::Content(Served {
            body,
            gzipped,
            etag,
            last_modified,
        }))
    }

    pub async fn versions(
        &self,
        id: DataLayerId,
        user: Option<UserId>,
    ) -> ApiResult<Vec<DataLayerVersion>> {
        let datalayer = self.viewable(id, user).await?;
        Ok(self.files.versions(datalayer.map_id, id).await?)
    }

    pub async fn version(
        &self,
        id: DataLayerId,
        name: &str,
        user: Option<UserId>,
    ) -> ApiResult<Vec<u8>> {
        let datalayer = self.viewable(id, user).await?;
        let path = self.files.version_path(datalayer.map_id, id, name)?;
        Ok(self.files.read(&path).await?)
    }

    pub async fn feature(
        &self,
        id: DataLayerId,
        index: usize,
        user: Option<UserId>,
    ) -> ApiResult<Feature> {
        let datalayer = self.viewable(id, user).await?;
        let (collection, _) = self.current(&datalayer).await?;
        collection
            .features
            .into_iter()
            .nth(index)
            .ok_or_else(|| StorageError::FeatureNotFound(index).into())
    }

    /// Apply `edit` to the features of a datalayer under its lock and store
    /// the result as a new version.
    async fn edit_features<R, F>(
        &self,
        map_id: MapId,
        id: DataLayerId,
        if_match: Option<&str>,
        edit: F,
    ) -> ApiResult<(R, String)>
    where
        F: FnOnce(&mut Vec<Feature>) -> ApiResult<R> + Send,
        R: Send,
    {
        self.owned(map_id, id).await?;
        let _guard = self.locks.acquire(id).await;
        let mut datalayer = self.owned(map_id, id).await?;

        let (mut collection, etag) = self.current(&datalayer).await?;
        if !files::if_match(if_match, &etag) {
            return Err(ApiError::PreconditionFailed);
        }
        let result = edit(&mut collection.features)?;
        let etag = self.store(&mut datalayer, collection).await?;
        Ok((result, etag))
    }

    /// Append a feature; returns its index.
    pub async fn add_feature(
        &self,
        map_id: MapId,
        id: DataLayerId,
        feature: JsonValue,
        if_match: Option<&str>,
    ) -> ApiResult<(usize, String)> {
        let feature = parse_feature(feature)?;
        self.edit_features(map_id, id, if_match, move |features| {
            features.push(feature);
            Ok(features.len() - 1)
        })
        .await
    }

    pub async fn update_feature(
        &self,
        map_id: MapId,
        id: DataLayerId,
        index: usize,
        feature: JsonValue,
        if_match: Option<&str>,
    ) -> ApiResult<String> {
        let feature = parse_feature(feature)?;
        let ((), etag) = self
            .edit_features(map_id, id, if_match, move |features| {
                let slot = features
                    .get_mut(index)
                    .ok_or(StorageError::FeatureNotFound(index))?;
                *slot = feature;
                Ok(())
            })
            .await?;
        Ok(etag)
    }

    pub async fn delete_feature(
        &self,
        map_id: MapId,
        id: DataLayerId,
        index: usize,
        if_match: Option<&str>,
    ) -> ApiResult<String> {
        let ((), etag) = self
            .edit_features(map_id, id, if_match, move |features| {
                if index >= features.len() {
                    return Err(StorageError::FeatureNotFound(index).into());
                }
                features.remove(index);
                Ok(())
            })
            .await?;
        Ok(etag)
    }

    #[cfg(test)]
    pub(crate) fn tracked_locks(&self) -> usize {
        self.locks.tracked()
    }

    /// Bytes, content type and file name of an import source.
    async fn load(
        &self,
        source: ImportSource,
    ) -> ApiResult<(Vec<u8>, Option<String>, Option<String>)> {
        match source {
            ImportSource::File {
                content,
                file_name,
                content_type,
            } => Ok((content, content_type, file_name)),
            ImportSource::Raw(text) => Ok((text.into_bytes(), None, None)),
            ImportSource::Url(url) => self.fetch(&url).await,
        }
    }

    async fn fetch(&self, url: &str) -> ApiResult<(Vec<u8>, Option<String>, Option<String>)> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| ApiError::BadRequest(format!("Invalid URL {}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::BadRequest(format!(
                "Only http and https URLs can be imported, got {}",
                parsed.scheme()
            )));
        }

        info!("Fetching import data from {}", parsed);
        let response = self
            .http
            .get(parsed)
            .timeout(Duration::from_secs(self.settings.fetch_timeout_secs))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ApiError::BadRequest(format!("Could not fetch {}: {}", url, e)))?;

        if let Some(length) = response.content_length() {
            if length > self.settings.import_max_bytes as u64 {
                return Err(self.too_large());
            }
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let file_name = response
            .url()
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty())
            .map(String::from);
        // Content-Length can be absent or wrong, count what actually arrives
        let mut content = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| ApiError::BadRequest(format!("Could not read {}: {}", url, e)))?;
            if content.len() + chunk.len() > self.settings.import_max_bytes {
                warn!("Import from {} exceeds {} bytes", url, self.settings.import_max_bytes);
                return Err(self.too_large());
            }
            content.extend_from_slice(&chunk);
        }
        Ok((content, content_type, file_name))
    }

    fn too_large(&self) -> ApiError {
        ApiError::BadRequest(format!(
            "Import data is limited to {} bytes",
            self.settings.import_max_bytes
        ))
    }

    /// Decode imported data and append what survives normalisation to a
    /// datalayer of `map`, as one new version.
    pub async fn import(&self, map: &Map, request: ImportRequest) -> ApiResult<ImportOutcome> {
        let (content, content_type, file_name) = self.load(request.source).await?;
        if content.len() > self.settings.import_max_bytes {
            return Err(self.too_large());
        }
        let format = Format::resolve(
            request.format.as_deref(),
            content_type.as_deref(),
            file_name.as_deref(),
        )?;
        let decoded = geo::decode(format, &content)?;
        debug!("Decoded {} feature(s) of {}", decoded.len(), format);

        let existing = match request.datalayer {
            Some(id) => Some(self.owned(map.id, id).await?),
            None => None,
        };
        let layer_name = match &existing {
            Some(datalayer) => datalayer.name.clone(),
            None => imported_layer_name(file_name.as_deref()),
        };
        let (accepted, report) = geo::prepare_import(&decoded, &layer_name);
        if accepted.is_empty() {
            return Err(ApiError::BadRequest(format!(
                "No data to import ({} feature(s) skipped)",
                report.skipped
            )));
        }

        let target = match existing {
            Some(datalayer) => datalayer.id,
            None => {
                let draft = DataLayerDraft {
                    name: Some(layer_name),
                    ..Default::default()
                };
                self.create(map, draft).await?.0.id
            }
        };

        let _guard = self.locks.acquire(target).await;
        let mut datalayer = self.get(target).await?;
        let (mut collection, _) = self.current(&datalayer).await?;
        collection.features.extend(accepted);
        self.store(&mut datalayer, collection).await?;
        info!(
            "Imported {} feature(s) into datalayer {} ({} skipped)",
            report.created, datalayer.id, report.skipped
        );

        Ok(ImportOutcome {
            datalayer: datalayer.metadata(),
            report,
            info: format!("{} features created!", report.created),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing;
    use serde_json::json;

    fn point(name: &str) -> JsonValue {
        json!({
            "type": "Feature",
            "geometry": {"type": "Point", "coordinates": [1.5, 2.5]},
            "properties": {"name": name}
        })
    }

    fn draft(name: &str) -> DataLayerDraft {
        DataLayerDraft {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_writes_stamped_file() {
        let (_dir, state) = testing::state(false).await;
        let map = testing::map(&state, None).await;
        let (datalayer, etag) = state
            .datalayers
            .create(&map, draft("Bikes"))
            .await
            .unwrap();

        let path = datalayer.geojson.clone().unwrap();
        let content = state.datalayers.files.read(&path).await.unwrap();
        assert_eq!(files::etag(&content), etag);
        let stored: JsonValue = serde_json::from_slice(&content).unwrap();
        assert_eq!(stored["type"], "FeatureCollection");
        assert_eq!(stored["_storage"]["name"], "Bikes");
        assert_eq!(stored["_storage"]["id"], datalayer.id);
    }

    #[tokio::test]
    async fn test_create_requires_name() {
        let (_dir, state) = testing::state(false).await;
        let map = testing::map(&state, None).await;
        let res = state.datalayers.create(&map, draft("   ")).await;
        assert!(matches!(res, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_update_honours_if_match() {
        let (_dir, state) = testing::state(false).await;
        let map = testing::map(&state, None).await;
        let (datalayer, etag) = state
            .datalayers
            .create(&map, draft("Layer"))
            .await
            .unwrap();

        let stale = state
            .datalayers
            .update(map.id, datalayer.id, draft("New name"), Some("\"xxx\""))
            .await;
        assert!(matches!(stale, Err(ApiError::PreconditionFailed)));
        assert_eq!(state.datalayers.get(datalayer.id).await.unwrap().name, "Layer");

        let (updated, new_etag) = state
            .datalayers
            .update(map.id, datalayer.id, draft("New name"), Some(&etag))
            .await
            .unwrap();
        assert_eq!(updated.name, "New name");
        assert_ne!(new_etag, etag);

        // No header means no precondition
        state
            .datalayers
            .update(map.id, datalayer.id, draft("Again"), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_update_from_other_map_is_forbidden() {
        let (_dir, state) = testing::state(false).await;
        let map = testing::map(&state, None).await;
        let other = testing::map(&state, None).await;
        let (datalayer, _) = state
            .datalayers
            .create(&map, draft("Layer"))
            .await
            .unwrap();
        let res = state
            .datalayers
            .update(other.id, datalayer.id, draft("Hijacked"), None)
            .await;
        assert!(matches!(res, Err(ApiError::Forbidden(_))));
        let res = state.datalayers.delete(other.id, datalayer.id).await;
        assert!(matches!(res, Err(ApiError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_feature_crud_by_index() {
        let (_dir, state) = testing::state(false).await;
        let map = testing::map(&state, None).await;
        let (datalayer, _) = state
            .datalayers
            .create(&map, draft("Layer"))
            .await
            .unwrap();
        let service = &state.datalayers;

        let (first, _) = service
            .add_feature(map.id, datalayer.id, point("a"), None)
            .await
            .unwrap();
        let (second, _) = service
            .add_feature(map.id, datalayer.id, point("b"), None)
            .await
            .unwrap();
        assert_eq!((first, second), (0, 1));

        service
            .update_feature(map.id, datalayer.id, 0, point("c"), None)
            .await
            .unwrap();
        let feature = service.feature(datalayer.id, 0, None).await.unwrap();
        assert_eq!(feature.property("name").unwrap(), "c");

        service
            .delete_feature(map.id, datalayer.id, 0, None)
            .await
            .unwrap();
        let remaining = service.feature(datalayer.id, 0, None).await.unwrap();
        assert_eq!(remaining.property("name").unwrap(), "b");
        assert!(matches!(
            service.feature(datalayer.id, 1, None).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            service
                .delete_feature(map.id, datalayer.id, 5, None)
                .await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_feature_without_geometry_rejected() {
        let (_dir, state) = testing::state(false).await;
        let map = testing::map(&state, None).await;
        let (datalayer, _) = state
            .datalayers
            .create(&map, draft("Layer"))
            .await
            .unwrap();
        let res = state
            .datalayers
            .add_feature(
                map.id,
                datalayer.id,
                json!({"type": "Feature", "geometry": null, "properties": {}}),
                None,
            )
            .await;
        assert!(matches!(res, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_serve_gzip_and_not_modified() {
        let (_dir, state) = testing::state(false).await;
        let map = testing::map(&state, None).await;
        let (datalayer, etag) = state
            .datalayers
            .create(&map, draft("Layer"))
            .await
            .unwrap();

        let plain = match state
            .datalayers
            .serve(datalayer.id, None, false, None)
            .await
            .unwrap()
        {
            Delivery::Content(served) => served,
            other => panic!("unexpected {:?}", other),
        };
        assert!(!plain.gzipped);
        assert_eq!(plain.etag, etag);

        match state
            .datalayers
            .serve(datalayer.id, None, true, None)
            .await
            .unwrap()
        {
            Delivery::Content(served) => {
                assert!(served.gzipped);
                assert_eq!(served.etag, etag);
                assert_eq!(&served.body[..2], &[0x1f, 0x8b]);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(
            state
                .datalayers
                .serve(datalayer.id, None, false, Some(&etag))
                .await
                .unwrap(),
            Delivery::NotModified { .. }
        ));
    }

    #[tokio::test]
    async fn test_import_appends_one_version() {
        let (_dir, state) = testing::state(false).await;
        let map = testing::map(&state, None).await;
        let (datalayer, _) = state
            .datalayers
            .create(&map, draft("Trees"))
            .await
            .unwrap();
        let before = state
            .datalayers
            .versions(datalayer.id, None)
            .await
            .unwrap()
            .len();

        let csv = "name;lat;lon\nOak;48.1;11.5\nbroken;x;y\nElm;48.2;11.6\n";
        let outcome = state
            .datalayers
            .import(
                &map,
                ImportRequest {
                    source: ImportSource::Raw(csv.to_string()),
                    format: Some("csv".to_string()),
                    datalayer: Some(datalayer.id),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.report.created, 2);
        assert_eq!(outcome.datalayer.id, datalayer.id);

        let versions = state.datalayers.versions(datalayer.id, None).await.unwrap();
        assert_eq!(versions.len(), before + 1);
        let feature = state.datalayers.feature(datalayer.id, 1, None).await.unwrap();
        assert_eq!(feature.property("name").unwrap(), "Elm");
    }

    #[tokio::test]
    async fn test_import_creates_layer_named_after_file() {
        let (_dir, state) = testing::state(false).await;
        let map = testing::map(&state, None).await;
        let geojson = serde_json::to_vec(&json!({
            "type": "FeatureCollection",
            "features": [point("a"), {"type": "Feature", "geometry": {"type": "MultiPoint", "coordinates": [[1, 2]]}, "properties": {}}]
        }))
        .unwrap();
        let outcome = state
            .datalayers
            .import(
                &map,
                ImportRequest {
                    source: ImportSource::File {
                        content: geojson,
                        file_name: Some("bike shops.geojson".to_string()),
                        content_type: None,
                    },
                    format: None,
                    datalayer: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.datalayer.name, "bike shops");
        assert_eq!(outcome.report.created, 1);
        assert_eq!(outcome.report.skipped, 1);
    }

    #[tokio::test]
    async fn test_import_rejects_non_http_urls() {
        let (_dir, state) = testing::state(false).await;
        let map = testing::map(&state, None).await;
        let res = state
            .datalayers
            .import(
                &map,
                ImportRequest {
                    source: ImportSource::Url("file:///etc/passwd".to_string()),
                    format: None,
                    datalayer: None,
                },
            )
            .await;
        assert!(matches!(res, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_import_with_nothing_usable_creates_no_layer() {
        let (_dir, state) = testing::state(false).await;
        let map = testing::map(&state, None).await;
        let before = state.datalayers.list(map.id).await.unwrap().len();

        let res = state
            .datalayers
            .import(
                &map,
                ImportRequest {
                    source: ImportSource::File {
                        content: b"name;lat;lon\nbroken;x;y\n".to_vec(),
                        file_name: Some("broken.csv".to_string()),
                        content_type: None,
                    },
                    format: None,
                    datalayer: None,
                },
            )
            .await;
        assert!(matches!(res, Err(ApiError::BadRequest(_))));
        assert_eq!(state.datalayers.list(map.id).await.unwrap().len(), before);
    }

    /// Serve `chunks` as a chunked body, without Content-Length.
    async fn serve_chunked(chunks: Vec<String>) -> String {
        let app = axum::Router::new().route(
            "/data.csv",
            axum::routing::get(move || {
                let chunks = chunks.clone();
                async move {
                    axum::body::Body::from_stream(futures::stream::iter(
                        chunks.into_iter().map(Ok::<_, std::io::Error>),
                    ))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/data.csv", addr)
    }

    fn csv_chunks(rows: usize) -> Vec<String> {
        let mut chunks = vec!["name,lat,lon\n".to_string()];
        chunks.extend((0..rows).map(|i| format!("Tree {},48.1,11.5\n", i)));
        chunks
    }

    fn url_import(url: String) -> ImportRequest {
        ImportRequest {
            source: ImportSource::Url(url),
            format: None,
            datalayer: None,
        }
    }

    #[tokio::test]
    async fn test_import_url_stops_at_size_limit() {
        let (_dir, state) = testing::state_with(|settings| settings.import_max_bytes = 100).await;
        let map = testing::map(&state, None).await;
        let before = state.datalayers.list(map.id).await.unwrap().len();

        let url = serve_chunked(csv_chunks(50)).await;
        let res = state.datalayers.import(&map, url_import(url)).await;
        match res {
            Err(ApiError::BadRequest(message)) => assert!(message.contains("limited to 100 bytes")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(state.datalayers.list(map.id).await.unwrap().len(), before);
    }

    #[tokio::test]
    async fn test_import_url_reads_chunked_body() {
        let (_dir, state) = testing::state_with(|settings| settings.import_max_bytes = 100).await;
        let map = testing::map(&state, None).await;

        let url = serve_chunked(csv_chunks(2)).await;
        let outcome = state.datalayers.import(&map, url_import(url)).await.unwrap();
        assert_eq!(outcome.report.created, 2);
        assert_eq!(outcome.datalayer.name, "data");
    }

    #[test]
    fn test_imported_layer_name() {
        assert_eq!(imported_layer_name(Some("dir/trails.gpx")), "trails");
        assert_eq!(imported_layer_name(Some(".kml")), IMPORTED_LAYER_NAME);
        assert_eq!(imported_layer_name(None), IMPORTED_LAYER_NAME);
    }
}
