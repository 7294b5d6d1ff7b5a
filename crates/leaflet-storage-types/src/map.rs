//! Map types

use crate::{EditStatus, LicenceId, MapId, ShareStatus, TileLayerId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Geographic center of a map, serialized as a GeoJSON Point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Center {
    pub lng: f64,
    pub lat: f64,
}

impl Center {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    pub fn is_valid(&self) -> bool {
        self.lng.is_finite()
            && self.lat.is_finite()
            && (-180.0..=180.0).contains(&self.lng)
            && (-90.0..=90.0).contains(&self.lat)
    }
}

impl Default for Center {
    fn default() -> Self {
        Self { lng: 2.0, lat: 51.0 }
    }
}

#[derive(Serialize, Deserialize)]
struct PointRepr {
    #[serde(rename = "type")]
    kind: String,
    coordinates: Vec<f64>,
}

impl Serialize for Center {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        PointRepr {
            kind: "Point".to_string(),
            coordinates: vec![self.lng, self.lat],
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Center {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = PointRepr::deserialize(deserializer)?;
        if repr.kind != "Point" {
            return Err(serde::de::Error::custom(format!(
                "expected a Point, got {}",
                repr.kind
            )));
        }
        match repr.coordinates.as_slice() {
            [lng, lat, ..] => Ok(Center::new(*lng, *lat)),
            _ => Err(serde::de::Error::custom("a Point needs two coordinates")),
        }
    }
}

/// A single thematic map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Map {
    pub id: MapId,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub center: Center,
    pub zoom: i64,
    pub locate: bool,
    pub licence_id: Option<LicenceId>,
    pub tilelayer_id: Option<TileLayerId>,
    /// `None` for maps created without an account
    pub owner_id: Option<UserId>,
    pub editors: Vec<UserId>,
    pub edit_status: EditStatus,
    pub share_status: ShareStatus,
    /// Frontend settings, stored as a GeoJSON Feature
    pub settings: serde_json::Value,
    pub modified_at: DateTime<Utc>,
}

impl Map {
    pub const DEFAULT_ZOOM: i64 = 7;

    pub fn canonical_path(&self) -> String {
        format!("/map/{}_{}", self.slug, self.id)
    }

    pub fn short_path(&self) -> String {
        format!("/m/{}", self.id)
    }

    pub fn is_owner(&self, user_id: Option<UserId>) -> bool {
        match (self.owner_id, user_id) {
            (Some(owner), Some(user)) => owner == user,
            _ => false,
        }
    }

    pub fn is_editor(&self, user_id: Option<UserId>) -> bool {
        user_id.map(|u| self.editors.contains(&u)).unwrap_or(false)
    }
}

/// Fields accepted when creating a map or updating its settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub center: Option<Center>,
    #[serde(default)]
    pub zoom: Option<i64>,
    #[serde(default)]
    pub locate: Option<bool>,
    #[serde(default)]
    pub licence: Option<LicenceId>,
    #[serde(default)]
    pub tilelayer: Option<TileLayerId>,
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
}

/// Short description of a map used by listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapSummary {
    pub id: MapId,
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub share_status: ShareStatus,
    pub modified_at: DateTime<Utc>,
}

/// Changes to a map's permissions. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionsUpdate {
    #[serde(default)]
    pub edit_status: Option<EditStatus>,
    #[serde(default)]
    pub share_status: Option<ShareStatus>,
    /// Usernames of the new editor list
    #[serde(default)]
    pub editors: Option<Vec<String>>,
    /// Username of the new owner
    #[serde(default)]
    pub owner: Option<String>,
}
