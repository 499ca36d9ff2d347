// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::directory::types::{Itinerary, Line, Stop, StopDirectory};
use crate::errors::DirectoryError;
use crate::geomath::Coordinate;
use ahash::AHashMap;
use geojson::{GeoJson, JsonValue};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Deserialize, Clone, Debug)]
struct NetworkDocument {
    #[serde(default)]
    stops: Vec<RawStop>,
    #[serde(default)]
    lines: Vec<RawLine>,
    #[serde(default)]
    itineraries: Vec<RawItinerary>,
}

#[derive(Deserialize, Clone, Debug)]
struct RawStop {
    id: String,
    name: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    #[serde(default)]
    halts: Vec<String>,
}

#[derive(Deserialize, Clone, Debug)]
struct RawLine {
    id: String,
    #[serde(default)]
    destinations: Vec<String>,
    mode: String,
    fg_color: Option<String>,
    bg_color: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
struct RawItinerary {
    line: String,
    direction: u8,
    stops: Vec<String>,
}

/// What a rebuild produced and what it had to discard.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryReport {
    pub stops: usize,
    pub lines: usize,
    pub itineraries: usize,
    pub patched_from_geometry: usize,
    /// Stops whose feed record had only one coordinate, or an out of range one.
    pub rejected_coordinates: Vec<String>,
    pub unpositioned: usize,
    pub rejected_lines: usize,
    pub rejected_itineraries: usize,
}

/// Builds a directory from the network document, then fills in positions
/// from the geometry document for stops that have none.
pub fn build_directory(
    network_json: &str,
    geometry_json: Option<&str>,
) -> Result<(StopDirectory, DirectoryReport), DirectoryError> {
    let network: NetworkDocument = serde_json::from_str(network_json)?;

    let geometry = match geometry_json {
        Some(geometry_json) => parse_geometry(geometry_json)?,
        None => AHashMap::new(),
    };

    let mut report = DirectoryReport::default();

    let mut stops: Vec<Stop> = Vec::with_capacity(network.stops.len());

    for raw in network.stops {
        let mut position = match (raw.latitude, raw.longitude) {
            (Some(lat), Some(lon)) if valid_position(Coordinate::new(lat, lon)) => {
                Some(Coordinate::new(lat, lon))
            }
            (None, None) => None,
            (lat, lon) => {
                warn!(
                    stop_id = %raw.id,
                    ?lat,
                    ?lon,
                    "discarding incomplete or invalid stop coordinates"
                );
                report.rejected_coordinates.push(raw.id.clone());
                None
            }
        };

        if position.is_none() {
            if let Some(patched) = geometry.get(&raw.id) {
                position = Some(*patched);
                report.patched_from_geometry += 1;
            }
        }

        if position.is_none() {
            report.unpositioned += 1;
        }

        let mut sources: Vec<String> = Vec::with_capacity(raw.halts.len().max(1));
        for halt in raw.halts {
            let halt = halt.trim().to_string();
            if !halt.is_empty() && !sources.contains(&halt) {
                sources.push(halt);
            }
        }
        if sources.is_empty() {
            sources.push(raw.id.clone());
        }

        stops.push(Stop {
            id: raw.id,
            name: raw.name,
            position,
            sources,
        });
    }

    let mut lines: Vec<Line> = Vec::with_capacity(network.lines.len());

    for raw in network.lines {
        let destinations: [String; 2] = match raw.destinations.try_into() {
            Ok(destinations) => destinations,
            Err(destinations) => {
                warn!(line_id = %raw.id, ?destinations, "line needs exactly two destinations");
                report.rejected_lines += 1;
                continue;
            }
        };

        lines.push(Line {
            id: raw.id,
            destinations,
            mode: raw.mode,
            fg_color: raw.fg_color,
            bg_color: raw.bg_color,
        });
    }

    let mut itineraries: Vec<Itinerary> = Vec::with_capacity(network.itineraries.len());

    for raw in network.itineraries {
        if raw.direction > 1 {
            warn!(
                line_id = %raw.line,
                direction = raw.direction,
                "itinerary direction must be 0 or 1"
            );
            report.rejected_itineraries += 1;
            continue;
        }

        itineraries.push(Itinerary {
            line: raw.line,
            direction: raw.direction,
            stops: raw.stops,
        });
    }

    let directory = StopDirectory::new(stops, lines, itineraries);

    report.stops = directory.len();
    report.lines = directory.lines().count();
    report.itineraries = directory.itineraries().len();

    Ok((directory, report))
}

fn valid_position(position: Coordinate) -> bool {
    position.is_finite()
        && (-90.0..=90.0).contains(&position.lat)
        && (-180.0..=180.0).contains(&position.lon)
}

fn parse_geometry(geometry_json: &str) -> Result<AHashMap<String, Coordinate>, DirectoryError> {
    let collection = match geometry_json.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(collection) => collection,
        _ => return Err(DirectoryError::GeometryShape),
    };

    let mut positions: AHashMap<String, Coordinate> = AHashMap::new();

    for feature in collection.features {
        let stop_id = match feature.property("stop_id") {
            Some(JsonValue::String(s)) => Some(s.clone()),
            Some(JsonValue::Number(n)) => Some(n.to_string()),
            _ => match &feature.id {
                Some(geojson::feature::Id::String(s)) => Some(s.clone()),
                Some(geojson::feature::Id::Number(n)) => Some(n.to_string()),
                None => None,
            },
        };

        let Some(stop_id) = stop_id else {
            continue;
        };

        // GeoJSON positions are [longitude, latitude]
        let coordinate = match feature.geometry.as_ref().map(|g| &g.value) {
            Some(geojson::Value::Point(position)) if position.len() >= 2 => {
                Coordinate::new(position[1], position[0])
            }
            _ => continue,
        };

        if valid_position(coordinate) {
            positions.entry(stop_id).or_insert(coordinate);
        }
    }

    Ok(positions)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NETWORK: &str = r##"{
        "stops": [
            {"id": "8042", "name": "ARTS-LOI", "latitude": 50.8455, "longitude": 4.3695, "halts": ["8042", "8032", "8042"]},
            {"id": "5710", "name": "MERODE"},
            {"id": "1059", "name": "CONGRES", "latitude": 50.85},
            {"id": "6308", "name": "NOWHERE", "halts": []}
        ],
        "lines": [
            {"id": "1", "destinations": ["GARE DE L'OUEST", "STOCKEL"], "mode": "M", "fg_color": "#FFFFFF", "bg_color": "#C4008F"},
            {"id": "broken", "destinations": ["ONLY ONE"], "mode": "B"}
        ],
        "itineraries": [
            {"line": "1", "direction": 0, "stops": ["8042", "5710"]},
            {"line": "1", "direction": 1, "stops": ["5710", "8042"]},
            {"line": "1", "direction": 7, "stops": ["5710"]}
        ]
    }"##;

    const GEOMETRY: &str = r##"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"stop_id": "5710"}, "geometry": {"type": "Point", "coordinates": [4.4027, 50.8382]}},
            {"type": "Feature", "properties": {"stop_id": "1059"}, "geometry": {"type": "Point", "coordinates": [4.3622, 50.8517]}},
            {"type": "Feature", "properties": {"stop_id": "8042"}, "geometry": {"type": "Point", "coordinates": [0.0, 0.0]}}
        ]
    }"##;

    #[test]
    fn builds_and_patches() {
        let (directory, report) = build_directory(NETWORK, Some(GEOMETRY)).unwrap();

        assert_eq!(directory.len(), 4);

        let arts_loi = directory.stop("8042").unwrap();
        assert_eq!(arts_loi.sources, vec!["8042", "8032"]);
        // an existing valid position is never overwritten
        assert_eq!(arts_loi.position, Some(Coordinate::new(50.8455, 4.3695)));

        assert_eq!(
            directory.stop("5710").unwrap().position,
            Some(Coordinate::new(50.8382, 4.4027))
        );

        // partial record is discarded, then patched from geometry
        assert_eq!(
            directory.stop("1059").unwrap().position,
            Some(Coordinate::new(50.8517, 4.3622))
        );

        let nowhere = directory.stop("6308").unwrap();
        assert_eq!(nowhere.position, None);
        assert_eq!(nowhere.sources, vec!["6308"]);

        assert_eq!(
            report,
            DirectoryReport {
                stops: 4,
                lines: 1,
                itineraries: 2,
                patched_from_geometry: 2,
                rejected_coordinates: vec![String::from("1059")],
                unpositioned: 1,
                rejected_lines: 1,
                rejected_itineraries: 1,
            }
        );

        assert_eq!(directory.memberships("8042").len(), 2);
    }

    #[test]
    fn partial_record_without_geometry_stays_unpositioned() {
        let (directory, report) = build_directory(NETWORK, None).unwrap();

        assert_eq!(directory.stop("1059").unwrap().position, None);
        assert_eq!(report.unpositioned, 3);
        assert_eq!(report.patched_from_geometry, 0);
    }

    #[test]
    fn rejects_bad_documents() {
        assert!(matches!(
            build_directory("{\"stops\": 3}", None),
            Err(DirectoryError::Network(_))
        ));
        assert!(matches!(
            build_directory(NETWORK, Some("{\"type\": \"Point\", \"coordinates\": [1.0, 2.0]}")),
            Err(DirectoryError::GeometryShape)
        ));
        assert!(matches!(
            build_directory(NETWORK, Some("not json")),
            Err(DirectoryError::Geometry(_))
        ));
    }
}
