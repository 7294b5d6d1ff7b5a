//! Error types for Leaflet Storage

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid GeoJSON: {0}")]
    InvalidGeoJson(String),

    #[error("Invalid {format} data: {message}")]
    InvalidData {
        format: &'static str,
        message: String,
    },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Bad signature")]
    BadSignature,

    #[error("Invalid version name: {0}")]
    InvalidVersion(String),

    #[error("Map not found: {0}")]
    MapNotFound(i64),

    #[error("DataLayer not found: {0}")]
    DataLayerNotFound(i64),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Feature not found at index {0}")]
    FeatureNotFound(usize),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid value: {0}")]
    Invalid(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl From<geojson::Error> for StorageError {
    fn from(e: geojson::Error) -> Self {
        StorageError::InvalidGeoJson(e.to_string())
    }
}

impl From<csv::Error> for StorageError {
    fn from(e: csv::Error) -> Self {
        StorageError::InvalidData {
            format: "CSV",
            message: e.to_string(),
        }
    }
}

impl From<quick_xml::Error> for StorageError {
    fn from(e: quick_xml::Error) -> Self {
        StorageError::InvalidData {
            format: "XML",
            message: e.to_string(),
        }
    }
}

impl From<leaflet_storage_types::InvalidStatus> for StorageError {
    fn from(e: leaflet_storage_types::InvalidStatus) -> Self {
        StorageError::Invalid(e.to_string())
    }
}
