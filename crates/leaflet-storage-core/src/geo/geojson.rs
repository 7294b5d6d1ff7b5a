//! GeoJSON documents and datalayer collections

use super::utf8;
use crate::{Result, StorageError};
use ::geojson::{Feature, FeatureCollection, GeoJson};

/// Features of a FeatureCollection, a single Feature or a bare Geometry.
pub fn decode(content: &[u8]) -> Result<Vec<Feature>> {
    let text = utf8(content, "GeoJSON")?;
    let document: GeoJson = text.parse()?;
    Ok(match document {
        GeoJson::FeatureCollection(collection) => collection.features,
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::Geometry(geometry) => vec![Feature::from(geometry)],
    })
}

pub fn encode(features: &[Feature]) -> Result<Vec<u8>> {
    to_vec(&collection(features.to_vec()))
}

pub fn collection(features: Vec<Feature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Parse the content of a datalayer file, which must be a FeatureCollection.
///
/// Members other than `features` are preserved so that frontend options
/// stored alongside survive feature edits.
pub fn parse_collection(content: &[u8]) -> Result<FeatureCollection> {
    let text = utf8(content, "GeoJSON")?;
    match text.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(collection) => Ok(collection),
        _ => Err(StorageError::InvalidGeoJson(
            "expected a FeatureCollection".to_string(),
        )),
    }
}

pub fn to_vec(collection: &FeatureCollection) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(collection)?)
}
