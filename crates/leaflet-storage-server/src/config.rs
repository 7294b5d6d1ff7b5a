//! Server configuration
//!
//! Built-in defaults, overlaid by an optional TOML file and then by
//! `LEAFLET_STORAGE_*` environment variables. Nested keys use a double
//! underscore: `LEAFLET_STORAGE_DEFAULT_TILELAYER__NAME`.

use ::config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const CONFIG_PATH_VAR: &str = "LEAFLET_STORAGE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "leaflet-storage.toml";
pub const INSECURE_SECRET: &str = "change-me-in-production";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileLayerSeed {
    pub name: String,
    pub url_template: String,
    pub attribution: String,
    pub min_zoom: i64,
    pub max_zoom: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenceSeed {
    pub name: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub bind_address: String,
    pub data_dir: PathBuf,
    /// Defaults to `leaflet_storage.db` inside `data_dir`
    pub database_path: Option<PathBuf>,
    pub secret_key: String,
    /// Let visitors without an account create and own maps
    pub allow_anonymous: bool,
    pub keep_versions: usize,
    pub site_url: String,
    pub short_site_url: Option<String>,
    pub login_url: String,
    pub static_dir: Option<PathBuf>,
    pub log_level: String,
    pub import_max_bytes: usize,
    pub fetch_timeout_secs: u64,
    pub default_tilelayer: TileLayerSeed,
    pub default_licence: LicenceSeed,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8019".to_string(),
            data_dir: PathBuf::from("data"),
            database_path: None,
            secret_key: INSECURE_SECRET.to_string(),
            allow_anonymous: false,
            keep_versions: 10,
            site_url: "http://localhost:8019".to_string(),
            short_site_url: None,
            login_url: "/auth/login".to_string(),
            static_dir: None,
            log_level: "info".to_string(),
            import_max_bytes: 10 * 1024 * 1024,
            fetch_timeout_secs: 20,
            default_tilelayer: TileLayerSeed {
                name: "OpenStreetMap".to_string(),
                url_template: "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
                attribution: "map data © OpenStreetMap contributors".to_string(),
                min_zoom: 0,
                max_zoom: 19,
            },
            default_licence: LicenceSeed {
                name: "ODbL".to_string(),
                url: Some("http://opendatacommons.org/licenses/odbl/".to_string()),
            },
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::with_name(&path).required(false))
            .add_source(
                Environment::with_prefix("LEAFLET_STORAGE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("leaflet_storage.db"))
    }

    /// Base URL used in share links: the short site URL when configured.
    pub fn share_url(&self) -> &str {
        self.short_site_url
            .as_deref()
            .unwrap_or(&self.site_url)
            .trim_end_matches('/')
    }

    pub fn site_url(&self) -> &str {
        self.site_url.trim_end_matches('/')
    }
}
