//! Delimited text with latitude and longitude columns

use super::{feature, property_text, utf8};
use crate::{Result, StorageError};
use geojson::{Feature, JsonObject, Value};
use tracing::debug;

const FORMAT: &str = "CSV";
const LATITUDE: [&str; 3] = ["lat", "latitude", "y"];
const LONGITUDE: [&str; 5] = ["lon", "lng", "long", "longitude", "x"];

/// Delimiter occurring most often in the header line.
fn sniff_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or_default();
    [b',', b';', b'\t']
        .into_iter()
        .max_by_key(|d| header.bytes().filter(|b| b == d).count())
        .unwrap_or(b',')
}

fn column(headers: &::csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| names.contains(&h.trim().to_ascii_lowercase().as_str()))
}

pub fn decode(content: &[u8]) -> Result<Vec<Feature>> {
    let text = utf8(content, FORMAT)?;
    let mut reader = ::csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(text))
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let (Some(lat), Some(lon)) = (column(&headers, &LATITUDE), column(&headers, &LONGITUDE)) else {
        return Err(StorageError::InvalidData {
            format: FORMAT,
            message: "no latitude and longitude columns".to_string(),
        });
    };

    let mut features = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                debug!("Skipping CSV row {}: {}", line + 2, e);
                continue;
            }
        };
        let coordinate = |idx: usize| record.get(idx).and_then(|v| v.trim().parse::<f64>().ok());
        let (Some(y), Some(x)) = (coordinate(lat), coordinate(lon)) else {
            debug!("Skipping CSV row {}: unparsable coordinates", line + 2);
            continue;
        };

        let mut properties = JsonObject::new();
        for (idx, (header, value)) in headers.iter().zip(record.iter()).enumerate() {
            if idx == lat || idx == lon || value.trim().is_empty() {
                continue;
            }
            properties.insert(header.trim().to_string(), value.trim().into());
        }
        features.push(feature(Value::Point(vec![x, y]), properties));
    }
    Ok(features)
}

/// Point features only, one row each. Scalar properties other than name and
/// description get their own columns in first-seen order.
pub fn encode(features: &[Feature]) -> Result<Vec<u8>> {
    let points: Vec<(&Feature, f64, f64)> = features
        .iter()
        .filter_map(|f| match f.geometry.as_ref().map(|g| &g.value) {
            Some(Value::Point(position)) if position.len() >= 2 => {
                Some((f, position[0], position[1]))
            }
            _ => None,
        })
        .collect();

    let mut extra: Vec<String> = Vec::new();
    for (feature, _, _) in &points {
        for key in feature.properties.iter().flat_map(|p| p.keys()) {
            if matches!(key.as_str(), "name" | "description" | "lat" | "lon")
                || key.starts_with('_')
                || extra.contains(key)
                || property_text(feature, key).is_none()
            {
                continue;
            }
            extra.push(key.clone());
        }
    }

    let mut writer = ::csv::Writer::from_writer(Vec::new());
    let mut header = vec!["name", "description", "lat", "lon"];
    header.extend(extra.iter().map(String::as_str));
    writer.write_record(&header)?;

    for (feature, lng, lat) in points {
        let mut row = vec![
            property_text(feature, "name").unwrap_or_default(),
            property_text(feature, "description").unwrap_or_default(),
            lat.to_string(),
            lng.to_string(),
        ];
        row.extend(
            extra
                .iter()
                .map(|key| property_text(feature, key).unwrap_or_default()),
        );
        writer.write_record(&row)?;
    }
    writer
        .into_inner()
        .map_err(|e| StorageError::Io(e.into_error()))
}
