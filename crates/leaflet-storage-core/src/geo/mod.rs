//! Geographic formats accepted on import and offered on export
//!
//! Everything is converted to and from [`geojson::Feature`], which is also how
//! datalayer files store their content.

pub mod csv;
pub mod geojson;
pub mod gpx;
pub mod import;
pub mod kml;

use crate::{Result, StorageError};
use ::geojson::{Feature, Geometry, JsonObject, Value};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::fmt;
use std::str::FromStr;

pub use import::{normalize_feature, prepare_import, ImportReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    GeoJson,
    Kml,
    Gpx,
    Csv,
}

impl Format {
    pub const ALL: [Format; 4] = [Format::GeoJson, Format::Kml, Format::Gpx, Format::Csv];

    pub fn name(&self) -> &'static str {
        match self {
            Format::GeoJson => "geojson",
            Format::Kml => "kml",
            Format::Gpx => "gpx",
            Format::Csv => "csv",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Format::GeoJson => "application/geo+json",
            Format::Kml => "application/vnd.google-earth.kml+xml",
            Format::Gpx => "application/gpx+xml",
            Format::Csv => "text/csv",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.name()
    }

    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/json" | "application/geo+json" | "application/vnd.geo+json" => {
                Some(Format::GeoJson)
            }
            "application/vnd.google-earth.kml+xml" => Some(Format::Kml),
            "application/gpx+xml" => Some(Format::Gpx),
            "text/csv" | "application/csv" => Some(Format::Csv),
            _ => None,
        }
    }

    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let (_, extension) = file_name.rsplit_once('.')?;
        match extension.to_ascii_lowercase().as_str() {
            "json" => Some(Format::GeoJson),
            other => other.parse().ok(),
        }
    }

    /// Pick the format of an upload: an explicit choice wins, then the
    /// content type, then the file name.
    pub fn resolve(
        explicit: Option<&str>,
        content_type: Option<&str>,
        file_name: Option<&str>,
    ) -> Result<Self> {
        if let Some(name) = explicit.map(str::trim).filter(|n| !n.is_empty()) {
            return name.parse();
        }
        content_type
            .and_then(Format::from_content_type)
            .or_else(|| file_name.and_then(Format::from_file_name))
            .ok_or_else(|| {
                StorageError::UnsupportedFormat(
                    content_type.or(file_name).unwrap_or("unknown").to_string(),
                )
            })
    }
}

impl FromStr for Format {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "geojson" | "json" => Ok(Format::GeoJson),
            "kml" => Ok(Format::Kml),
            "gpx" => Ok(Format::Gpx),
            "csv" => Ok(Format::Csv),
            other => Err(StorageError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn decode(format: Format, content: &[u8]) -> Result<Vec<Feature>> {
    match format {
        Format::GeoJson => geojson::decode(content),
        Format::Kml => kml::decode(content),
        Format::Gpx => gpx::decode(content),
        Format::Csv => csv::decode(content),
    }
}

/// Serialize `features` as a whole document; `name` titles formats that
/// carry one.
pub fn encode(format: Format, features: &[Feature], name: &str) -> Result<Vec<u8>> {
    match format {
        Format::GeoJson => geojson::encode(features),
        Format::Kml => kml::encode(features, name),
        Format::Gpx => gpx::encode(features, name),
        Format::Csv => csv::encode(features),
    }
}

pub(crate) fn feature(value: Value, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(value)),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// String form of a scalar property, if present and not empty.
pub(crate) fn property_text(feature: &Feature, key: &str) -> Option<String> {
    let value = feature.properties.as_ref()?.get(key)?;
    let text = match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Writer shared by the XML formats; escaping is left to quick-xml.
pub(crate) type XmlWriter = Writer<Vec<u8>>;

pub(crate) fn xml_document() -> Result<XmlWriter> {
    let mut writer = Writer::new(Vec::new());
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    Ok(writer)
}

pub(crate) fn xml_start(writer: &mut XmlWriter, start: BytesStart<'_>) -> Result<()> {
    writer.write_event(Event::Start(start))?;
    Ok(())
}

pub(crate) fn xml_end(writer: &mut XmlWriter, tag: &str) -> Result<()> {
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

/// `<tag>text</tag>`
pub(crate) fn xml_text(writer: &mut XmlWriter, tag: &str, text: &str) -> Result<()> {
    writer
        .create_element(tag)
        .write_text_content(BytesText::new(text))?;
    Ok(())
}

pub(crate) fn utf8<'a>(content: &'a [u8], format: &'static str) -> Result<&'a str> {
    let content = std::str::from_utf8(content).map_err(|e| StorageError::InvalidData {
        format,
        message: e.to_string(),
    })?;
    Ok(content.trim_start_matches('\u{feff}'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_resolution() {
        assert_eq!(Format::resolve(Some("KML"), None, None).unwrap(), Format::Kml);
        assert_eq!(
            Format::resolve(None, Some("application/json; charset=utf-8"), None).unwrap(),
            Format::GeoJson
        );
        assert_eq!(
            Format::resolve(None, Some("application/octet-stream"), Some("track.GPX")).unwrap(),
            Format::Gpx
        );
        assert_eq!(
            Format::resolve(Some(""), None, Some("points.csv")).unwrap(),
            Format::Csv
        );
        assert!(matches!(
            Format::resolve(None, Some("image/png"), Some("photo.png")),
            Err(StorageError::UnsupportedFormat(_))
        ));
        assert!(Format::resolve(Some("shp"), None, None).is_err());
    }

    #[test]
    fn test_format_metadata() {
        for format in Format::ALL {
            assert_eq!(format.name().parse::<Format>().unwrap(), format);
            assert_eq!(Format::from_content_type(format.content_type()), Some(format));
        }
    }
}
