//! Application state and HTTP routes

use crate::config::Settings;
use crate::handlers;
use crate::services::{AuthService, DataLayerService, MapService};
use crate::storage::{DataLayerLocks, Database};
use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use leaflet_storage_core::ports::CatalogStore;
use leaflet_storage_core::{DataLayerFiles, Licence, Signer, TileLayer};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Multipart framing on top of the import payload itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub signer: Arc<Signer>,
    pub settings: Arc<Settings>,
    pub auth_service: Arc<AuthService>,
    pub maps: Arc<MapService>,
    pub datalayers: Arc<DataLayerService>,
}

impl AppState {
    pub async fn new(settings: Settings) -> Result<Self> {
        let settings = Arc::new(settings);
        tokio::fs::create_dir_all(&settings.data_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create data directory {}",
                    settings.data_dir.display()
                )
            })?;

        let db = Arc::new(
            Database::new(&settings.database_path())
                .await
                .context("Failed to initialize database")?,
        );
        let files = Arc::new(DataLayerFiles::new(
            settings.data_dir.clone(),
            settings.keep_versions,
        ));
        let locks = Arc::new(DataLayerLocks::new());
        let signer = Arc::new(Signer::new(settings.secret_key.as_bytes()));
        let http = reqwest::Client::builder()
            .user_agent(concat!("leaflet-storage/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        let auth_service = Arc::new(AuthService::new(db.clone(), settings.secret_key.clone()));
        let datalayers = Arc::new(DataLayerService::new(
            db.clone(),
            files,
            locks,
            settings.clone(),
            http,
        ));
        let maps = Arc::new(MapService::new(
            db.clone(),
            datalayers.clone(),
            signer.clone(),
            settings.clone(),
        ));

        Ok(Self {
            db,
            signer,
            settings,
            auth_service,
            maps,
            datalayers,
        })
    }
}

/// Insert the configured default tile layer and licence into an empty catalogue.
pub async fn seed_catalog(state: &AppState) -> Result<()> {
    let settings = &state.settings;
    if state.db.list_tilelayers().await?.is_empty() {
        let seed = &settings.default_tilelayer;
        state
            .db
            .create_tilelayer(&TileLayer {
                id: 0,
                name: seed.name.clone(),
                url_template: seed.url_template.clone(),
                min_zoom: seed.min_zoom,
                max_zoom: seed.max_zoom,
                attribution: seed.attribution.clone(),
                rank: 1,
            })
            .await?;
        info!("Seeded default tile layer {}", seed.name);
    }
    if state.db.list_licences().await?.is_empty() {
        let seed = &settings.default_licence;
        state
            .db
            .create_licence(&Licence {
                id: 0,
                name: seed.name.clone(),
                url: seed.url.clone(),
            })
            .await?;
        info!("Seeded default licence {}", seed.name);
    }
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let import_limit = state.settings.import_max_bytes + MULTIPART_OVERHEAD;

    let mut app = Router::new()
        .route("/health", get(handlers::health))
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/users/me", get(handlers::users::me))
        // Maps
        .route("/maps", get(handlers::maps::list))
        .route("/user/:username", get(handlers::maps::user_maps))
        .route("/map/create", post(handlers::maps::create))
        .route("/map/anonymous-edit/:signature", get(handlers::maps::anonymous_edit))
        .route("/map/:map_id", get(handlers::maps::view))
        .route("/map/:map_id/:slug", get(handlers::maps::old_url))
        .route("/m/:map_id", get(handlers::maps::short_url))
        .route("/map/:map_id/geojson", get(handlers::maps::geojson))
        .route("/map/:map_id/infos", get(handlers::maps::infos))
        .route("/map/:map_id/export/data", get(handlers::maps::export))
        .route("/map/:map_id/update/settings", post(handlers::maps::update_settings))
        .route("/map/:map_id/update/permissions", post(handlers::maps::update_permissions))
        .route("/map/:map_id/update/delete", post(handlers::maps::delete))
        .route("/map/:map_id/update/clone", post(handlers::maps::clone_map))
        .route(
            "/map/:map_id/import/data",
            post(handlers::import::upload).layer(DefaultBodyLimit::max(import_limit)),
        )
        // Datalayers
        .route("/map/:map_id/datalayer/create", post(handlers::datalayers::create))
        .route("/map/:map_id/datalayer/update/:pk", post(handlers::datalayers::update))
        .route("/map/:map_id/datalayer/delete/:pk", post(handlers::datalayers::delete))
        .route("/datalayer/:pk", get(handlers::datalayers::view))
        .route("/datalayer/:pk/versions", get(handlers::datalayers::versions))
        .route("/datalayer/:pk/version/:name", get(handlers::datalayers::version))
        // Features
        .route("/map/:map_id/datalayer/:pk/feature/add", post(handlers::features::add))
        .route(
            "/map/:map_id/datalayer/:pk/feature/update/:index",
            post(handlers::features::update),
        )
        .route(
            "/map/:map_id/datalayer/:pk/feature/delete/:index",
            post(handlers::features::delete),
        )
        .route("/datalayer/:pk/feature/:index", get(handlers::features::get))
        // Catalogue
        .route("/tilelayer/json", get(handlers::catalog::tilelayers))
        .route("/licence/json", get(handlers::catalog::licences))
        .route("/pictogram/json", get(handlers::catalog::pictograms));

    if let Some(static_dir) = &state.settings.static_dir {
        info!("Serving static files from {}", static_dir.display());
        app = app.fallback_service(ServeDir::new(static_dir));
    }

    app.layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    )
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}
