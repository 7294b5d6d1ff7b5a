//! KML placemarks

use super::{feature, property_text, utf8, xml_document, xml_end, xml_start, xml_text, XmlWriter};
use crate::{Result, StorageError};
use geojson::{Feature, JsonObject, Position, Value};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;

const FORMAT: &str = "KML";

fn invalid(message: impl ToString) -> StorageError {
    StorageError::InvalidData {
        format: FORMAT,
        message: message.to_string(),
    }
}

#[derive(Default)]
struct Placemark {
    name: Option<String>,
    description: Option<String>,
    data: JsonObject,
    data_name: Option<String>,
    geometries: Vec<Value>,
    outer: Option<Vec<Position>>,
    inner: Vec<Vec<Position>>,
}

impl Placemark {
    fn into_features(self) -> Vec<Feature> {
        let mut properties = self.data;
        if let Some(name) = self.name {
            properties.insert("name".to_string(), name.into());
        }
        if let Some(description) = self.description {
            properties.insert("description".to_string(), description.into());
        }
        self.geometries
            .into_iter()
            .map(|geometry| feature(geometry, properties.clone()))
            .collect()
    }
}

/// `lng,lat[,alt]` tuples separated by whitespace.
fn parse_coordinates(text: &str) -> Option<Vec<Position>> {
    text.split_whitespace()
        .map(|tuple| {
            tuple
                .split(',')
                .map(|n| n.trim().parse::<f64>().ok())
                .collect::<Option<Vec<f64>>>()
                .filter(|p| p.len() >= 2)
        })
        .collect()
}

pub fn decode(content: &[u8]) -> Result<Vec<Feature>> {
    let mut reader = Reader::from_str(utf8(content, FORMAT)?);
    reader.trim_text(true);

    let mut features = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut placemark: Option<Placemark> = None;
    let mut seen_root = false;

    loop {
        match reader.read_event().map_err(invalid)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match name.as_str() {
                    "kml" => seen_root = true,
                    "Placemark" => placemark = Some(Placemark::default()),
                    "Data" | "SimpleData" => {
                        if let (Some(pm), Some(attr)) =
                            (placemark.as_mut(), e.try_get_attribute("name").map_err(invalid)?)
                        {
                            pm.data_name = Some(attr.unescape_value().map_err(invalid)?.into_owned());
                        }
                    }
                    _ => {}
                }
                stack.push(name);
                text.clear();
            }
            Event::Text(e) => text.push_str(&e.unescape().map_err(invalid)?),
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(&e.into_inner())),
            Event::End(_) => {
                let Some(name) = stack.pop() else {
                    return Err(invalid("unbalanced document"));
                };
                let parent = stack.last().map(String::as_str);
                if name == "Placemark" {
                    if let Some(pm) = placemark.take() {
                        features.extend(pm.into_features());
                    }
                } else if let Some(pm) = placemark.as_mut() {
                    let value = text.trim().to_string();
                    match (name.as_str(), parent) {
                        ("name", Some("Placemark")) if !value.is_empty() => pm.name = Some(value),
                        ("description", Some("Placemark")) if !value.is_empty() => {
                            pm.description = Some(value)
                        }
                        ("value", Some("Data")) | ("SimpleData", _) => {
                            if let Some(key) = pm.data_name.take() {
                                pm.data.insert(key, value.into());
                            }
                        }
                        ("coordinates", Some(geometry)) => {
                            let grandparent = stack.iter().rev().nth(1).map(String::as_str);
                            match parse_coordinates(&value) {
                                Some(mut positions) => match (geometry, grandparent) {
                                    ("Point", _) if !positions.is_empty() => {
                                        pm.geometries.push(Value::Point(positions.swap_remove(0)))
                                    }
                                    ("LineString", _) => {
                                        pm.geometries.push(Value::LineString(positions))
                                    }
                                    ("LinearRing", Some("outerBoundaryIs")) => {
                                        pm.outer = Some(positions)
                                    }
                                    ("LinearRing", Some("innerBoundaryIs")) => {
                                        pm.inner.push(positions)
                                    }
                                    _ => {}
                                },
                                None => debug!("Skipping unparsable KML coordinates"),
                            }
                        }
                        ("Polygon", _) => {
                            let inner = std::mem::take(&mut pm.inner);
                            if let Some(outer) = pm.outer.take() {
                                let mut rings = vec![outer];
                                rings.extend(inner);
                                pm.geometries.push(Value::Polygon(rings));
                            }
                        }
                        _ => {}
                    }
                }
                text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(invalid("missing kml root element"));
    }
    Ok(features)
}

fn coordinates(positions: &[Position]) -> String {
    positions
        .iter()
        .map(|position| {
            position
                .iter()
                .map(f64::to_string)
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn write_coordinates(writer: &mut XmlWriter, tag: &str, positions: &[Position]) -> Result<()> {
    xml_start(writer, BytesStart::new(tag))?;
    xml_text(writer, "coordinates", &coordinates(positions))?;
    xml_end(writer, tag)
}

fn write_polygon(writer: &mut XmlWriter, rings: &[Vec<Position>]) -> Result<()> {
    xml_start(writer, BytesStart::new("Polygon"))?;
    for (i, ring) in rings.iter().enumerate() {
        let boundary = if i == 0 { "outerBoundaryIs" } else { "innerBoundaryIs" };
        xml_start(writer, BytesStart::new(boundary))?;
        write_coordinates(writer, "LinearRing", ring)?;
        xml_end(writer, boundary)?;
    }
    xml_end(writer, "Polygon")
}

fn write_geometry(writer: &mut XmlWriter, value: &Value) -> Result<()> {
    let multi = |writer: &mut XmlWriter| xml_start(writer, BytesStart::new("MultiGeometry"));
    match value {
        Value::Point(position) => {
            write_coordinates(writer, "Point", std::slice::from_ref(position))?
        }
        Value::LineString(positions) => write_coordinates(writer, "LineString", positions)?,
        Value::Polygon(rings) => write_polygon(writer, rings)?,
        Value::MultiPoint(points) => {
            multi(writer)?;
            for point in points {
                write_coordinates(writer, "Point", std::slice::from_ref(point))?;
            }
            xml_end(writer, "MultiGeometry")?;
        }
        Value::MultiLineString(lines) => {
            multi(writer)?;
            for line in lines {
                write_coordinates(writer, "LineString", line)?;
            }
            xml_end(writer, "MultiGeometry")?;
        }
        Value::MultiPolygon(polygons) => {
            multi(writer)?;
            for polygon in polygons {
                write_polygon(writer, polygon)?;
            }
            xml_end(writer, "MultiGeometry")?;
        }
        Value::GeometryCollection(geometries) => {
            multi(writer)?;
            for geometry in geometries {
                write_geometry(writer, &geometry.value)?;
            }
            xml_end(writer, "MultiGeometry")?;
        }
    }
    Ok(())
}

fn write_extended_data(writer: &mut XmlWriter, feature: &Feature) -> Result<()> {
    let extra: Vec<(&String, String)> = feature
        .properties
        .iter()
        .flatten()
        .filter(|(key, _)| !matches!(key.as_str(), "name" | "description") && !key.starts_with('_'))
        .filter_map(|(key, _)| property_text(feature, key).map(|v| (key, v)))
        .collect();
    if extra.is_empty() {
        return Ok(());
    }
    xml_start(writer, BytesStart::new("ExtendedData"))?;
    for (key, value) in extra {
        xml_start(writer, BytesStart::new("Data").with_attributes([("name", key.as_str())]))?;
        xml_text(writer, "value", &value)?;
        xml_end(writer, "Data")?;
    }
    xml_end(writer, "ExtendedData")
}

pub fn encode(features: &[Feature], name: &str) -> Result<Vec<u8>> {
    let mut writer = xml_document()?;
    xml_start(
        &mut writer,
        BytesStart::new("kml").with_attributes([("xmlns", "http://www.opengis.net/kml/2.2")]),
    )?;
    xml_start(&mut writer, BytesStart::new("Document"))?;
    xml_text(&mut writer, "name", name)?;
    for feature in features {
        let Some(geometry) = &feature.geometry else {
            continue;
        };
        xml_start(&mut writer, BytesStart::new("Placemark"))?;
        if let Some(name) = property_text(feature, "name") {
            xml_text(&mut writer, "name", &name)?;
        }
        if let Some(description) = property_text(feature, "description") {
            xml_text(&mut writer, "description", &description)?;
        }
        write_extended_data(&mut writer, feature)?;
        write_geometry(&mut writer, &geometry.value)?;
        xml_end(&mut writer, "Placemark")?;
    }
    xml_end(&mut writer, "Document")?;
    xml_end(&mut writer, "kml")?;
    Ok(writer.into_inner())
}
