//! Normalisation of imported features
//!
//! Imports are best effort: each feature is checked on its own and a bad one
//! is skipped without affecting the rest of the batch.

use geojson::{Feature, Geometry, JsonObject, Position, Value};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::debug;

/// Target property and the source properties it is read from, in order.
const FIELDS: [(&str, &[&str]); 2] = [
    ("name", &["name", "title"]),
    ("description", &["description", "desc"]),
];

/// Properties that belong in `_storage_options` instead.
const OPTIONS: [&str; 1] = ["color"];

const STORAGE_OPTIONS: &str = "_storage_options";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub created: usize,
    pub skipped: usize,
}

fn is_set(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        JsonValue::String(s) => !s.trim().is_empty(),
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(o) => !o.is_empty(),
    }
}

fn flatten(position: &Position) -> Option<Position> {
    match position.as_slice() {
        [x, y, ..] if x.is_finite() && y.is_finite() => Some(vec![*x, *y]),
        _ => None,
    }
}

fn flatten_line(positions: &[Position], min_len: usize) -> Option<Vec<Position>> {
    let line = positions.iter().map(flatten).collect::<Option<Vec<_>>>()?;
    if line.len() < min_len {
        return None;
    }
    Some(line)
}

/// 2D copy of a supported geometry, or `None` when it is of another type,
/// empty or degenerate.
fn flatten_geometry(value: &Value) -> Option<Value> {
    match value {
        Value::Point(position) => flatten(position).map(Value::Point),
        Value::LineString(positions) => flatten_line(positions, 2).map(Value::LineString),
        Value::Polygon(rings) => {
            if rings.is_empty() {
                return None;
            }
            rings
                .iter()
                .map(|ring| flatten_line(ring, 4))
                .collect::<Option<Vec<_>>>()
                .map(Value::Polygon)
        }
        _ => None,
    }
}

/// Cleaned up copy of `feature` ready to be stored, or `None` to skip it.
pub fn normalize_feature(feature: &Feature, default_name: &str) -> Option<Feature> {
    let geometry = feature.geometry.as_ref()?;
    let value = flatten_geometry(&geometry.value)?;

    let source = feature.properties.clone().unwrap_or_default();
    let mut properties = JsonObject::new();
    let mut options = JsonObject::new();
    let mut consumed: Vec<&str> = Vec::new();

    for (target, candidates) in FIELDS {
        consumed.extend_from_slice(candidates);
        if let Some(value) = candidates
            .iter()
            .filter_map(|c| source.get(*c))
            .find(|v| is_set(v))
        {
            properties.insert(target.to_string(), value.clone());
        }
    }
    for option in OPTIONS {
        consumed.push(option);
        if let Some(value) = source.get(option).filter(|v| is_set(v)) {
            options.insert(option.to_string(), value.clone());
        }
    }
    for (key, value) in &source {
        if consumed.contains(&key.as_str()) || !is_set(value) {
            continue;
        }
        if key == STORAGE_OPTIONS {
            if let JsonValue::Object(existing) = value {
                for (k, v) in existing {
                    options.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
            continue;
        }
        properties.insert(key.clone(), value.clone());
    }

    properties
        .entry("name".to_string())
        .or_insert_with(|| default_name.into());
    if !options.is_empty() {
        properties.insert(STORAGE_OPTIONS.to_string(), JsonValue::Object(options));
    }

    Some(Feature {
        bbox: None,
        geometry: Some(Geometry::new(value)),
        id: feature.id.clone(),
        properties: Some(properties),
        foreign_members: None,
    })
}

/// Normalise a decoded batch, counting what was kept and what was skipped.
pub fn prepare_import(features: &[Feature], default_name: &str) -> (Vec<Feature>, ImportReport) {
    let mut report = ImportReport::default();
    let mut accepted = Vec::with_capacity(features.len());
    for (idx, feature) in features.iter().enumerate() {
        match normalize_feature(feature, default_name) {
            Some(feature) => {
                accepted.push(feature);
                report.created += 1;
            }
            None => {
                debug!("Skipping imported feature #{}", idx);
                report.skipped += 1;
            }
        }
    }
    (accepted, report)
}
