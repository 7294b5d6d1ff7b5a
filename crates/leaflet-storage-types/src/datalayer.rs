//! DataLayer types

use crate::{DataLayerId, MapId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named collection of features belonging to a map.
///
/// The features themselves live in a GeoJSON file; `geojson` is its path
/// relative to the data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataLayer {
    pub id: DataLayerId,
    pub map_id: MapId,
    pub name: String,
    pub description: Option<String>,
    pub geojson: Option<String>,
    pub display_on_load: bool,
    pub rank: i64,
    pub modified_at: DateTime<Utc>,
}

impl DataLayer {
    pub fn metadata(&self) -> DataLayerMetadata {
        DataLayerMetadata {
            id: self.id,
            name: self.name.clone(),
            display_on_load: self.display_on_load,
        }
    }
}

/// What the frontend needs to list a datalayer before loading its features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataLayerMetadata {
    pub id: DataLayerId,
    pub name: String,
    pub display_on_load: bool,
}

/// Fields accepted when creating or updating a datalayer.
///
/// `geojson` is the whole FeatureCollection, either as a JSON object or as
/// the JSON text of one (the way HTML forms post it).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataLayerDraft {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub display_on_load: Option<bool>,
    #[serde(default)]
    pub rank: Option<i64>,
    #[serde(default)]
    pub geojson: Option<serde_json::Value>,
}

/// One stored revision of a datalayer file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataLayerVersion {
    pub name: String,
    /// Milliseconds since the Unix epoch
    pub at: i64,
    pub size: u64,
}
