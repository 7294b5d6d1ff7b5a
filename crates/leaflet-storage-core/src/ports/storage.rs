//! Storage traits for persistence

use crate::Result;
use async_trait::async_trait;
use leaflet_storage_types::{
    DataLayer, DataLayerId, Licence, LicenceId, Map, MapId, Pictogram, TileLayer, TileLayerId,
    User, UserId,
};

/// User store
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(
        &self,
        username: &str,
        email: Option<&str>,
        password_hash: &str,
    ) -> Result<User>;
    async fn get_user(&self, id: UserId) -> Result<Option<User>>;
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;
    /// The user together with their password hash, for login
    async fn get_credentials(&self, username: &str) -> Result<Option<(User, String)>>;
    async fn get_users(&self, ids: &[UserId]) -> Result<Vec<User>>;
}

/// Map store
///
/// Editors are part of the map: `create_map` and `update_map` persist
/// `map.editors` as well.
#[async_trait]
pub trait MapStore: Send + Sync {
    /// Insert `map`, ignoring its `id`, and return the new id
    async fn create_map(&self, map: &Map) -> Result<MapId>;
    async fn get_map(&self, id: MapId) -> Result<Option<Map>>;
    async fn get_map_by_slug(&self, owner_id: UserId, slug: &str) -> Result<Option<Map>>;
    async fn update_map(&self, map: &Map) -> Result<()>;
    /// Delete a map along with its datalayer rows and editor links
    async fn delete_map(&self, id: MapId) -> Result<()>;
    /// Maps shared publicly, most recently modified first
    async fn public_maps(&self, limit: i64) -> Result<Vec<Map>>;
    /// Maps a user owns or edits, most recently modified first
    async fn user_maps(&self, user_id: UserId) -> Result<Vec<Map>>;
}

/// DataLayer store
#[async_trait]
pub trait DataLayerStore: Send + Sync {
    async fn create_datalayer(&self, datalayer: &DataLayer) -> Result<DataLayerId>;
    async fn get_datalayer(&self, id: DataLayerId) -> Result<Option<DataLayer>>;
    async fn update_datalayer(&self, datalayer: &DataLayer) -> Result<()>;
    async fn delete_datalayer(&self, id: DataLayerId) -> Result<()>;
    /// Datalayers of a map ordered by rank then name
    async fn list_datalayers(&self, map_id: MapId) -> Result<Vec<DataLayer>>;
}

/// Tile layers, licences and pictograms
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn create_tilelayer(&self, tilelayer: &TileLayer) -> Result<TileLayerId>;
    async fn get_tilelayer(&self, id: TileLayerId) -> Result<Option<TileLayer>>;
    async fn list_tilelayers(&self) -> Result<Vec<TileLayer>>;
    /// Lowest ranked tile layer
    async fn default_tilelayer(&self) -> Result<Option<TileLayer>>;

    async fn create_licence(&self, licence: &Licence) -> Result<LicenceId>;
    async fn get_licence(&self, id: LicenceId) -> Result<Option<Licence>>;
    async fn list_licences(&self) -> Result<Vec<Licence>>;
    async fn default_licence(&self) -> Result<Option<Licence>>;
    /// Remove a licence; maps using it keep existing without one
    async fn delete_licence(&self, id: LicenceId) -> Result<()>;

    async fn create_pictogram(&self, pictogram: &Pictogram) -> Result<()>;
    async fn list_pictograms(&self) -> Result<Vec<Pictogram>>;
}
