//! SQLite database layer (embedded, no external dependencies)

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leaflet_storage_core::ports::{CatalogStore, DataLayerStore, MapStore, UserStore};
use leaflet_storage_core::{
    Center, DataLayer, DataLayerId, EditStatus, Licence, LicenceId, Map, MapId, Pictogram,
    ShareStatus, StorageError, TileLayer, TileLayerId, User, UserId,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;

type StoreResult<T> = leaflet_storage_core::Result<T>;

fn db_error(e: sqlx::Error) -> StorageError {
    StorageError::Database(e.to_string())
}

pub struct Database {
    pool: Arc<SqlitePool>,
}

impl Database {
    pub async fn new(database_path: &Path) -> Result<Self> {
        tracing::info!("Opening SQLite database at: {}", database_path.display());

        // Create parent directory if needed
        if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to SQLite database at: {}",
                    database_path.display()
                )
            })?;

        tracing::info!("SQLite connection established, running migrations...");

        Self::run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;

        tracing::info!("Database initialization complete");

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE NOT NULL,
                email TEXT,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS licences (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                url TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS tilelayers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                url_template TEXT NOT NULL,
                min_zoom INTEGER NOT NULL DEFAULT 0,
                max_zoom INTEGER NOT NULL DEFAULT 18,
                attribution TEXT NOT NULL DEFAULT '',
                rank INTEGER NOT NULL DEFAULT 0
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS pictograms (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                attribution TEXT NOT NULL DEFAULT '',
                src TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS maps (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                slug TEXT NOT NULL,
                description TEXT,
                center TEXT NOT NULL,
                zoom INTEGER NOT NULL DEFAULT 7,
                locate INTEGER NOT NULL DEFAULT 0,
                licence_id INTEGER REFERENCES licences(id) ON DELETE SET NULL,
                tilelayer_id INTEGER REFERENCES tilelayers(id) ON DELETE SET NULL,
                owner_id INTEGER REFERENCES users(id) ON DELETE CASCADE,
                edit_status INTEGER NOT NULL DEFAULT 3,
                share_status INTEGER NOT NULL DEFAULT 1,
                settings TEXT NOT NULL DEFAULT '{}',
                modified_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS map_editors (
                map_id INTEGER NOT NULL REFERENCES maps(id) ON DELETE CASCADE,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                PRIMARY KEY (map_id, user_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS datalayers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                map_id INTEGER NOT NULL REFERENCES maps(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                description TEXT,
                geojson TEXT,
                display_on_load INTEGER NOT NULL DEFAULT 0,
                rank INTEGER NOT NULL DEFAULT 0,
                modified_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_maps_owner ON maps(owner_id)",
            "CREATE INDEX IF NOT EXISTS idx_maps_owner_slug ON maps(owner_id, slug)",
            "CREATE INDEX IF NOT EXISTS idx_datalayers_map ON datalayers(map_id)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(pool).await?;
        }

        Ok(())
    }

    async fn editors_of(&self, map_id: MapId) -> StoreResult<Vec<UserId>> {
        sqlx::query_scalar("SELECT user_id FROM map_editors WHERE map_id = ?1 ORDER BY user_id")
            .bind(map_id)
            .fetch_all(&*self.pool)
            .await
            .map_err(db_error)
    }

    async fn with_editors(&self, rows: Vec<MapRow>) -> StoreResult<Vec<Map>> {
        let mut maps = Vec::with_capacity(rows.len());
        for row in rows {
            let editors = self.editors_of(row.id).await?;
            maps.push(row.into_map(editors)?);
        }
        Ok(maps)
    }
}

const MAP_COLUMNS: &str = "id, name, slug, description, center, zoom, locate, licence_id, \
    tilelayer_id, owner_id, edit_status, share_status, settings, modified_at";

#[async_trait]
impl UserStore for Database {
    async fn create_user(
        &self,
        username: &str,
        email: Option<&str>,
        password_hash: &str,
    ) -> StoreResult<User> {
        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO users (username, email, password_hash, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(created_at)
        .execute(&*self.pool)
        .await
        .map_err(db_error)?;

        Ok(User {
            id: result.last_insert_rowid(),
            username: username.to_string(),
            email: email.map(str::to_string),
            created_at,
        })
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT id, username, email, created_at FROM users WHERE id = ?1")
                .bind(id)
                .fetch_optional(&*self.pool)
                .await
                .map_err(db_error)?;
        Ok(row.map(Into::into))
    }

    async fn get_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT id, username, email, created_at FROM users WHERE username = ?1")
                .bind(username)
                .fetch_optional(&*self.pool)
                .await
                .map_err(db_error)?;
        Ok(row.map(Into::into))
    }

    async fn get_credentials(&self, username: &str) -> StoreResult<Option<(User, String)>> {
        let row: Option<CredentialsRow> = sqlx::query_as(
            "SELECT id, username, email, created_at, password_hash FROM users WHERE username = ?1",
        )
        .bind(username)
        .fetch_optional(&*self.pool)
        .await
        .map_err(db_error)?;
        Ok(row.map(|r| {
            (
                User {
                    id: r.id,
                    username: r.username,
                    email: r.email,
                    created_at: r.created_at,
                },
                r.password_hash,
            )
        }))
    }

    async fn get_users(&self, ids: &[UserId]) -> StoreResult<Vec<User>> {
        let mut users = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(user) = self.get_user(*id).await? {
                users.push(user);
            }
        }
        Ok(users)
    }
}

#[async_trait]
impl MapStore for Database {
    async fn create_map(&self, map: &Map) -> StoreResult<MapId> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let result = sqlx::query(
            r#"
            INSERT INTO maps (name, slug, description, center, zoom, locate, licence_id,
                              tilelayer_id, owner_id, edit_status, share_status, settings,
                              modified_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&map.name)
        .bind(&map.slug)
        .bind(&map.description)
        .bind(serde_json::to_string(&map.center)?)
        .bind(map.zoom)
        .bind(map.locate)
        .bind(map.licence_id)
        .bind(map.tilelayer_id)
        .bind(map.owner_id)
        .bind(map.edit_status.as_i64())
        .bind(map.share_status.as_i64())
        .bind(map.settings.to_string())
        .bind(map.modified_at)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
        let id = result.last_insert_rowid();

        for editor in &map.editors {
            sqlx::query("INSERT OR IGNORE INTO map_editors (map_id, user_id) VALUES (?1, ?2)")
                .bind(id)
                .bind(editor)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }
        tx.commit().await.map_err(db_error)?;
        Ok(id)
    }

    async fn get_map(&self, id: MapId) -> StoreResult<Option<Map>> {
        let row: Option<MapRow> =
            sqlx::query_as(&format!("SELECT {} FROM maps WHERE id = ?1", MAP_COLUMNS))
                .bind(id)
                .fetch_optional(&*self.pool)
                .await
                .map_err(db_error)?;
        match row {
            Some(row) => Ok(self.with_editors(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn get_map_by_slug(&self, owner_id: UserId, slug: &str) -> StoreResult<Option<Map>> {
        let row: Option<MapRow> = sqlx::query_as(&format!(
            "SELECT {} FROM maps WHERE owner_id = ?1 AND slug = ?2 ORDER BY id LIMIT 1",
            MAP_COLUMNS
        ))
        .bind(owner_id)
        .bind(slug)
        .fetch_optional(&*self.pool)
        .await
        .map_err(db_error)?;
        match row {
            Some(row) => Ok(self.with_editors(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn update_map(&self, map: &Map) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let result = sqlx::query(
            r#"
            UPDATE maps SET name = ?1, slug = ?2, description = ?3, center = ?4, zoom = ?5,
                            locate = ?6, licence_id = ?7, tilelayer_id = ?8, owner_id = ?9,
                            edit_status = ?10, share_status = ?11, settings = ?12,
                            modified_at = ?13
            WHERE id = ?14
            "#,
        )
        .bind(&map.name)
        .bind(&map.slug)
        .bind(&map.description)
        .bind(serde_json::to_string(&map.center)?)
        .bind(map.zoom)
        .bind(map.locate)
        .bind(map.licence_id)
        .bind(map.tilelayer_id)
        .bind(map.owner_id)
        .bind(map.edit_status.as_i64())
        .bind(map.share_status.as_i64())
        .bind(map.settings.to_string())
        .bind(map.modified_at)
        .bind(map.id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::MapNotFound(map.id));
        }

        sqlx::query("DELETE FROM map_editors WHERE map_id = ?1")
            .bind(map.id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        for editor in &map.editors {
            sqlx::query("INSERT OR IGNORE INTO map_editors (map_id, user_id) VALUES (?1, ?2)")
                .bind(map.id)
                .bind(editor)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }
        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn delete_map(&self, id: MapId) -> StoreResult<()> {
        sqlx::query("DELETE FROM maps WHERE id = ?1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn public_maps(&self, limit: i64) -> StoreResult<Vec<Map>> {
        let rows: Vec<MapRow> = sqlx::query_as(&format!(
            "SELECT {} FROM maps WHERE share_status = ?1 ORDER BY modified_at DESC, id DESC LIMIT ?2",
            MAP_COLUMNS
        ))
        .bind(ShareStatus::Public.as_i64())
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(db_error)?;
        self.with_editors(rows).await
    }

    async fn user_maps(&self, user_id: UserId) -> StoreResult<Vec<Map>> {
        let rows: Vec<MapRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM maps
            WHERE owner_id = ?1
               OR id IN (SELECT map_id FROM map_editors WHERE user_id = ?1)
            ORDER BY modified_at DESC, id DESC
            "#,
            MAP_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(db_error)?;
        self.with_editors(rows).await
    }
}

#[async_trait]
impl DataLayerStore for Database {
    async fn create_datalayer(&self, datalayer: &DataLayer) -> StoreResult<DataLayerId> {
        let result = sqlx::query(
            r#"
            INSERT INTO datalayers (map_id, name, description, geojson, display_on_load, rank,
                                    modified_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(datalayer.map_id)
        .bind(&datalayer.name)
        .bind(&datalayer.description)
        .bind(&datalayer.geojson)
        .bind(datalayer.display_on_load)
        .bind(datalayer.rank)
        .bind(datalayer.modified_at)
        .execute(&*self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.last_insert_rowid())
    }

    async fn get_datalayer(&self, id: DataLayerId) -> StoreResult<Option<DataLayer>> {
        let row: Option<DataLayerRow> = sqlx::query_as(
            r#"
            SELECT id, map_id, name, description, geojson, display_on_load, rank, modified_at
            FROM datalayers WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(db_error)?;
        Ok(row.map(Into::into))
    }

    async fn update_datalayer(&self, datalayer: &DataLayer) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE datalayers SET name = ?1, description = ?2, geojson = ?3,
                                  display_on_load = ?4, rank = ?5, modified_at = ?6
            WHERE id = ?7
            "#,
        )
        .bind(&datalayer.name)
        .bind(&datalayer.description)
        .bind(&datalayer.geojson)
        .bind(datalayer.display_on_load)
        .bind(datalayer.rank)
        .bind(datalayer.modified_at)
        .bind(datalayer.id)
        .execute(&*self.pool)
        .await
        .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::DataLayerNotFound(datalayer.id));
        }
        Ok(())
    }

    async fn delete_datalayer(&self, id: DataLayerId) -> StoreResult<()> {
        sqlx::query("DELETE FROM datalayers WHERE id = ?1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn list_datalayers(&self, map_id: MapId) -> StoreResult<Vec<DataLayer>> {
        let rows: Vec<DataLayerRow> = sqlx::query_as(
            r#"
            SELECT id, map_id, name, description, geojson, display_on_load, rank, modified_at
            FROM datalayers WHERE map_id = ?1
            ORDER BY rank, name, id
            "#,
        )
        .bind(map_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(db_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

const TILELAYER_COLUMNS: &str = "id, name, url_template, min_zoom, max_zoom, attribution, rank";

#[async_trait]
impl CatalogStore for Database {
    async fn create_tilelayer(&self, tilelayer: &TileLayer) -> StoreResult<TileLayerId> {
        let result = sqlx::query(
            r#"
            INSERT INTO tilelayers (name, url_template, min_zoom, max_zoom, attribution, rank)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&tilelayer.name)
        .bind(&tilelayer.url_template)
        .bind(tilelayer.min_zoom)
        .bind(tilelayer.max_zoom)
        .bind(&tilelayer.attribution)
        .bind(tilelayer.rank)
        .execute(&*self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.last_insert_rowid())
    }

    async fn get_tilelayer(&self, id: TileLayerId) -> StoreResult<Option<TileLayer>> {
        let row: Option<TileLayerRow> = sqlx::query_as(&format!(
            "SELECT {} FROM tilelayers WHERE id = ?1",
            TILELAYER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(db_error)?;
        Ok(row.map(Into::into))
    }

    async fn list_tilelayers(&self) -> StoreResult<Vec<TileLayer>> {
        let rows: Vec<TileLayerRow> = sqlx::query_as(&format!(
            "SELECT {} FROM tilelayers ORDER BY rank, id",
            TILELAYER_COLUMNS
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(db_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn default_tilelayer(&self) -> StoreResult<Option<TileLayer>> {
        let row: Option<TileLayerRow> = sqlx::query_as(&format!(
            "SELECT {} FROM tilelayers ORDER BY rank, id LIMIT 1",
            TILELAYER_COLUMNS
        ))
        .fetch_optional(&*self.pool)
        .await
        .map_err(db_error)?;
        Ok(row.map(Into::into))
    }

    async fn create_licence(&self, licence: &Licence) -> StoreResult<LicenceId> {
        let result = sqlx::query("INSERT INTO licences (name, url) VALUES (?1, ?2)")
            .bind(&licence.name)
            .bind(&licence.url)
            .execute(&*self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.last_insert_rowid())
    }

    async fn get_licence(&self, id: LicenceId) -> StoreResult<Option<Licence>> {
        let row: Option<(i64, String, Option<String>)> =
            sqlx::query_as("SELECT id, name, url FROM licences WHERE id = ?1")
                .bind(id)
                .fetch_optional(&*self.pool)
                .await
                .map_err(db_error)?;
        Ok(row.map(|(id, name, url)| Licence { id, name, url }))
    }

    async fn list_licences(&self) -> StoreResult<Vec<Licence>> {
        let rows: Vec<(i64, String, Option<String>)> =
            sqlx::query_as("SELECT id, name, url FROM licences ORDER BY id")
                .fetch_all(&*self.pool)
                .await
                .map_err(db_error)?;
        Ok(rows
            .into_iter()
            .map(|(id, name, url)| Licence { id, name, url })
            .collect())
    }

    async fn default_licence(&self) -> StoreResult<Option<Licence>> {
        Ok(self.list_licences().await?.into_iter().next())
    }

    async fn delete_licence(&self, id: LicenceId) -> StoreResult<()> {
        sqlx::query("DELETE FROM licences WHERE id = ?1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn create_pictogram(&self, pictogram: &Pictogram) -> StoreResult<()> {
        sqlx::query("INSERT INTO pictograms (name, attribution, src) VALUES (?1, ?2, ?3)")
            .bind(&pictogram.name)
            .bind(&pictogram.attribution)
            .bind(&pictogram.src)
            .execute(&*self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn list_pictograms(&self) -> StoreResult<Vec<Pictogram>> {
        let rows: Vec<(i64, String, String, String)> =
            sqlx::query_as("SELECT id, name, attribution, src FROM pictograms ORDER BY name, id")
                .fetch_all(&*self.pool)
                .await
                .map_err(db_error)?;
        Ok(rows
            .into_iter()
            .map(|(id, name, attribution, src)| Pictogram {
                id,
                name,
                attribution,
                src,
            })
            .collect())
    }
}

// Helper structs for sqlx query_as
#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        User {
            id: r.id,
            username: r.username,
            email: r.email,
            created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CredentialsRow {
    id: i64,
    username: String,
    email: Option<String>,
    created_at: DateTime<Utc>,
    password_hash: String,
}

#[derive(sqlx::FromRow)]
struct MapRow {
    id: i64,
    name: String,
    slug: String,
    description: Option<String>,
    center: String,
    zoom: i64,
    locate: bool,
    licence_id: Option<i64>,
    tilelayer_id: Option<i64>,
    owner_id: Option<i64>,
    edit_status: i64,
    share_status: i64,
    settings: String,
    modified_at: DateTime<Utc>,
}

impl MapRow {
    fn into_map(self, editors: Vec<UserId>) -> StoreResult<Map> {
        let center: Center = serde_json::from_str(&self.center)?;
        Ok(Map {
            id: self.id,
            name: self.name,
            slug: self.slug,
            description: self.description,
            center,
            zoom: self.zoom,
            locate: self.locate,
            licence_id: self.licence_id,
            tilelayer_id: self.tilelayer_id,
            owner_id: self.owner_id,
            editors,
            edit_status: EditStatus::try_from(self.edit_status)?,
            share_status: ShareStatus::try_from(self.share_status)?,
            settings: serde_json::from_str(&self.settings)?,
            modified_at: self.modified_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DataLayerRow {
    id: i64,
    map_id: i64,
    name: String,
    description: Option<String>,
    geojson: Option<String>,
    display_on_load: bool,
    rank: i64,
    modified_at: DateTime<Utc>,
}

impl From<DataLayerRow> for DataLayer {
    fn from(r: DataLayerRow) -> Self {
        DataLayer {
            id: r.id,
            map_id: r.map_id,
            name: r.name,
            description: r.description,
            geojson: r.geojson,
            display_on_load: r.display_on_load,
            rank: r.rank,
            modified_at: r.modified_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TileLayerRow {
    id: i64,
    name: String,
    url_template: String,
    min_zoom: i64,
    max_zoom: i64,
    attribution: String,
    rank: i64,
}

impl From<TileLayerRow> for TileLayer {
    fn from(r: TileLayerRow) -> Self {
        TileLayer {
            id: r.id,
            name: r.name,
            url_template: r.url_template,
            min_zoom: r.min_zoom,
            max_zoom: r.max_zoom,
            attribution: r.attribution,
            rank: r.rank,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn database() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("test.db")).await.unwrap();
        (dir, db)
    }

    fn map(owner_id: Option<UserId>, share_status: ShareStatus) -> Map {
        Map {
            id: 0,
            name: "test map".to_string(),
            slug: "test-map".to_string(),
            description: Some("Which is just the Danube".to_string()),
            center: Center::new(13.447, 48.948),
            zoom: Map::DEFAULT_ZOOM,
            locate: false,
            licence_id: None,
            tilelayer_id: None,
            owner_id,
            editors: Vec::new(),
            edit_status: EditStatus::Owner,
            share_status,
            settings: serde_json::json!({"type": "Feature", "properties": {}}),
            modified_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_users() {
        let (_dir, db) = database().await;
        let user = db.create_user("joe", None, "hash").await.unwrap();
        assert_eq!(db.get_user(user.id).await.unwrap().unwrap().username, "joe");
        assert_eq!(
            db.get_user_by_username("joe").await.unwrap().unwrap().id,
            user.id
        );
        let (_, hash) = db.get_credentials("joe").await.unwrap().unwrap();
        assert_eq!(hash, "hash");
        assert!(db.get_user_by_username("jane").await.unwrap().is_none());
        assert!(db.create_user("joe", None, "other").await.is_err());
    }

    #[tokio::test]
    async fn test_map_roundtrip_with_editors() {
        let (_dir, db) = database().await;
        let owner = db.create_user("owner", None, "x").await.unwrap();
        let editor = db.create_user("editor", None, "x").await.unwrap();
        let mut m = map(Some(owner.id), ShareStatus::Public);
        m.editors = vec![editor.id];
        let id = db.create_map(&m).await.unwrap();

        let mut stored = db.get_map(id).await.unwrap().unwrap();
        assert_eq!(stored.center, Center::new(13.447, 48.948));
        assert_eq!(stored.editors, vec![editor.id]);

        stored.editors.clear();
        stored.edit_status = EditStatus::Editors;
        db.update_map(&stored).await.unwrap();
        let updated = db.get_map(id).await.unwrap().unwrap();
        assert!(updated.editors.is_empty());
        assert_eq!(updated.edit_status, EditStatus::Editors);

        assert_eq!(
            db.get_map_by_slug(owner.id, "test-map").await.unwrap().unwrap().id,
            id
        );
        assert_eq!(db.user_maps(owner.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_public_maps_only_public() {
        let (_dir, db) = database().await;
        let owner = db.create_user("owner", None, "x").await.unwrap();
        db.create_map(&map(Some(owner.id), ShareStatus::Public)).await.unwrap();
        db.create_map(&map(Some(owner.id), ShareStatus::Private)).await.unwrap();
        db.create_map(&map(Some(owner.id), ShareStatus::Open)).await.unwrap();
        let public = db.public_maps(10).await.unwrap();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].share_status, ShareStatus::Public);
    }

    #[tokio::test]
    async fn test_delete_map_cascades_to_datalayers() {
        let (_dir, db) = database().await;
        let id = db.create_map(&map(None, ShareStatus::Public)).await.unwrap();
        let layer_id = db
            .create_datalayer(&DataLayer {
                id: 0,
                map_id: id,
                name: "Layer".to_string(),
                description: None,
                geojson: None,
                display_on_load: true,
                rank: 0,
                modified_at: Utc::now(),
            })
            .await
            .unwrap();
        db.delete_map(id).await.unwrap();
        assert!(db.get_map(id).await.unwrap().is_none());
        assert!(db.get_datalayer(layer_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deleting_licence_keeps_maps() {
        let (_dir, db) = database().await;
        let licence_id = db
            .create_licence(&Licence {
                id: 0,
                name: "WTFPL".to_string(),
                url: None,
            })
            .await
            .unwrap();
        let mut m = map(None, ShareStatus::Public);
        m.licence_id = Some(licence_id);
        let id = db.create_map(&m).await.unwrap();
        db.delete_licence(licence_id).await.unwrap();
        let stored = db.get_map(id).await.unwrap().unwrap();
        assert_eq!(stored.licence_id, None);
    }

    #[tokio::test]
    async fn test_datalayers_ordered_by_rank_then_name() {
        let (_dir, db) = database().await;
        let map_id = db.create_map(&map(None, ShareStatus::Public)).await.unwrap();
        for (name, rank) in [("b", 1), ("a", 1), ("z", 0)] {
            db.create_datalayer(&DataLayer {
                id: 0,
                map_id,
                name: name.to_string(),
                description: None,
                geojson: None,
                display_on_load: false,
                rank,
                modified_at: Utc::now(),
            })
            .await
            .unwrap();
        }
        let names: Vec<_> = db
            .list_datalayers(map_id)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.name)
            .collect();
        assert_eq!(names, vec!["z", "a", "b"]);
    }

    #[tokio::test]
    async fn test_default_tilelayer_is_lowest_rank() {
        let (_dir, db) = database().await;
        for (name, rank) in [("second", 2), ("first", 1)] {
            db.create_tilelayer(&TileLayer {
                id: 0,
                name: name.to_string(),
                url_template: "http://{s}.test.org/{z}/{x}/{y}.png".to_string(),
                min_zoom: 0,
                max_zoom: 18,
                attribution: String::new(),
                rank,
            })
            .await
            .unwrap();
        }
        assert_eq!(db.default_tilelayer().await.unwrap().unwrap().name, "first");
        assert_eq!(db.list_tilelayers().await.unwrap().len(), 2);
    }
}
