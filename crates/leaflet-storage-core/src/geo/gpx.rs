//! GPX waypoints, routes and tracks

use super::{feature, property_text, utf8, xml_document, xml_end, xml_start, xml_text, XmlWriter};
use crate::{Result, StorageError};
use geojson::{Feature, JsonObject, Position, Value};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

const FORMAT: &str = "GPX";

fn invalid(message: impl ToString) -> StorageError {
    StorageError::InvalidData {
        format: FORMAT,
        message: message.to_string(),
    }
}

/// `[lon, lat]` from the attributes of a `wpt`, `rtept` or `trkpt`.
fn position(e: &BytesStart<'_>) -> Result<Option<Position>> {
    let coordinate = |name: &str| -> Result<Option<f64>> {
        Ok(match e.try_get_attribute(name).map_err(invalid)? {
            Some(attr) => attr.unescape_value().map_err(invalid)?.trim().parse().ok(),
            None => None,
        })
    };
    let lat = coordinate("lat")?;
    let lon = coordinate("lon")?;
    Ok(match (lon, lat) {
        (Some(lon), Some(lat)) => Some(vec![lon, lat]),
        _ => None,
    })
}

enum Item {
    Waypoint(Option<Position>),
    Route(Vec<Position>),
    Track(Vec<Vec<Position>>),
}

struct Current {
    item: Item,
    properties: JsonObject,
}

impl Current {
    fn new(item: Item) -> Self {
        Self {
            item,
            properties: JsonObject::new(),
        }
    }

    fn into_features(self) -> Vec<Feature> {
        let properties = self.properties;
        match self.item {
            Item::Waypoint(Some(position)) => vec![feature(Value::Point(position), properties)],
            Item::Waypoint(None) => Vec::new(),
            Item::Route(points) => vec![feature(Value::LineString(points), properties)],
            Item::Track(segments) => segments
                .into_iter()
                .filter(|segment| !segment.is_empty())
                .map(|segment| feature(Value::LineString(segment), properties.clone()))
                .collect(),
        }
    }
}

fn point_element(current: &mut Option<Current>, name: &str, e: &BytesStart<'_>) -> Result<()> {
    let point = position(e)?;
    match (current.as_mut().map(|c| &mut c.item), name, point) {
        (Some(Item::Route(points)), "rtept", Some(p)) => points.push(p),
        (Some(Item::Track(segments)), "trkpt", Some(p)) => {
            if let Some(segment) = segments.last_mut() {
                segment.push(p);
            }
        }
        _ => {}
    }
    Ok(())
}

pub fn decode(content: &[u8]) -> Result<Vec<Feature>> {
    let mut reader = Reader::from_str(utf8(content, FORMAT)?);
    reader.trim_text(true);

    let mut features = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut current: Option<Current> = None;
    let mut seen_root = false;

    loop {
        match reader.read_event().map_err(invalid)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match name.as_str() {
                    "gpx" => seen_root = true,
                    "wpt" => current = Some(Current::new(Item::Waypoint(position(&e)?))),
                    "rte" => current = Some(Current::new(Item::Route(Vec::new()))),
                    "trk" => current = Some(Current::new(Item::Track(Vec::new()))),
                    "trkseg" => {
                        if let Some(Current {
                            item: Item::Track(segments),
                            ..
                        }) = current.as_mut()
                        {
                            segments.push(Vec::new());
                        }
                    }
                    "rtept" | "trkpt" => point_element(&mut current, &name, &e)?,
                    _ => {}
                }
                stack.push(name);
                text.clear();
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match name.as_str() {
                    "wpt" => {
                        let waypoint = Current::new(Item::Waypoint(position(&e)?));
                        features.extend(waypoint.into_features());
                    }
                    "rtept" | "trkpt" => point_element(&mut current, &name, &e)?,
                    _ => {}
                }
            }
            Event::Text(e) => text.push_str(&e.unescape().map_err(invalid)?),
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(&e.into_inner())),
            Event::End(_) => {
                let Some(name) = stack.pop() else {
                    return Err(invalid("unbalanced document"));
                };
                let parent = stack.last().map(String::as_str);
                match (name.as_str(), parent) {
                    ("wpt" | "rte" | "trk", _) => {
                        if let Some(done) = current.take() {
                            features.extend(done.into_features());
                        }
                    }
                    ("name" | "desc", Some("wpt" | "rte" | "trk")) => {
                        let value = text.trim();
                        if let (Some(c), false) = (current.as_mut(), value.is_empty()) {
                            c.properties.insert(name.clone(), value.into());
                        }
                    }
                    _ => {}
                }
                text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(invalid("missing gpx root element"));
    }
    Ok(features)
}

/// `<tag lat=".." lon=".."/>` opening tag of a point element.
fn point_start<'a>(tag: &'a str, position: &[f64]) -> Option<BytesStart<'a>> {
    let [lon, lat, ..] = position else {
        return None;
    };
    let (lat, lon) = (lat.to_string(), lon.to_string());
    Some(BytesStart::new(tag).with_attributes([("lat", lat.as_str()), ("lon", lon.as_str())]))
}

fn write_labels(writer: &mut XmlWriter, feature: &Feature) -> Result<()> {
    if let Some(name) = property_text(feature, "name") {
        xml_text(writer, "name", &name)?;
    }
    if let Some(description) = property_text(feature, "description") {
        xml_text(writer, "desc", &description)?;
    }
    Ok(())
}

fn write_waypoint(writer: &mut XmlWriter, feature: &Feature, position: &[f64]) -> Result<()> {
    if let Some(start) = point_start("wpt", position) {
        xml_start(writer, start)?;
        write_labels(writer, feature)?;
        xml_end(writer, "wpt")?;
    }
    Ok(())
}

fn write_track(writer: &mut XmlWriter, feature: &Feature, segments: &[&Vec<Position>]) -> Result<()> {
    xml_start(writer, BytesStart::new("trk"))?;
    write_labels(writer, feature)?;
    for segment in segments {
        xml_start(writer, BytesStart::new("trkseg"))?;
        for start in segment.iter().filter_map(|p| point_start("trkpt", p)) {
            writer.write_event(Event::Empty(start))?;
        }
        xml_end(writer, "trkseg")?;
    }
    xml_end(writer, "trk")
}

/// Points become waypoints; lines and polygon outlines become tracks.
/// Waypoints are written first as the schema requires.
pub fn encode(features: &[Feature], name: &str) -> Result<Vec<u8>> {
    let mut writer = xml_document()?;
    xml_start(
        &mut writer,
        BytesStart::new("gpx").with_attributes([
            ("version", "1.1"),
            ("creator", "leaflet-storage"),
            ("xmlns", "http://www.topografix.com/GPX/1/1"),
        ]),
    )?;
    xml_start(&mut writer, BytesStart::new("metadata"))?;
    xml_text(&mut writer, "name", name)?;
    xml_end(&mut writer, "metadata")?;

    let with_geometry = || {
        features
            .iter()
            .filter_map(|f| f.geometry.as_ref().map(|g| (f, &g.value)))
    };
    for (feature, value) in with_geometry() {
        match value {
            Value::Point(position) => write_waypoint(&mut writer, feature, position)?,
            Value::MultiPoint(positions) => {
                for position in positions {
                    write_waypoint(&mut writer, feature, position)?;
                }
            }
            _ => {}
        }
    }
    for (feature, value) in with_geometry() {
        match value {
            Value::LineString(line) => write_track(&mut writer, feature, &[line])?,
            Value::MultiLineString(lines) => {
                let segments: Vec<_> = lines.iter().collect();
                write_track(&mut writer, feature, &segments)?;
            }
            Value::Polygon(rings) => {
                if let Some(outer) = rings.first() {
                    write_track(&mut writer, feature, &[outer])?;
                }
            }
            Value::MultiPolygon(polygons) => {
                let segments: Vec<_> = polygons.iter().filter_map(|rings| rings.first()).collect();
                write_track(&mut writer, feature, &segments)?;
            }
            _ => {}
        }
    }

    xml_end(&mut writer, "gpx")?;
    Ok(writer.into_inner())
}
