//! Shared catalogue entries referenced by maps

use crate::{LicenceId, PictogramId, TileLayerId};
use serde::{Deserialize, Serialize};

/// A background tile provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileLayer {
    pub id: TileLayerId,
    pub name: String,
    /// URL template using the OSM tile format, e.g. `https://{s}.tile.osm.org/{z}/{x}/{y}.png`
    pub url_template: String,
    #[serde(rename = "minZoom")]
    pub min_zoom: i64,
    #[serde(rename = "maxZoom")]
    pub max_zoom: i64,
    pub attribution: String,
    pub rank: i64,
}

/// The licence a map is published under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Licence {
    pub id: LicenceId,
    pub name: String,
    pub url: Option<String>,
}

/// An image that can be added to a marker icon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pictogram {
    pub id: PictogramId,
    pub name: String,
    pub attribution: String,
    pub src: String,
}
