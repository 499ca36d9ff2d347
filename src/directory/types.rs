// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::config::NightLineAlias;
use crate::geomath::Coordinate;
use ahash::AHashMap;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stop {
    pub id: String,
    pub name: String,
    /// Latitude and longitude are known together or not at all.
    pub position: Option<Coordinate>,
    /// Upstream polling ids ("halts"), in polling order.
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Line {
    pub id: String,
    pub destinations: [String; 2],
    pub mode: String,
    pub fg_color: Option<String>,
    pub bg_color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Itinerary {
    pub line: String,
    pub direction: u8,
    /// Index is the position along the route.
    pub stops: Vec<String>,
}

/// Where a stop sits on one line in one direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineMembership {
    pub line: String,
    pub direction: u8,
    pub positions: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineColors<'a> {
    pub fg_color: Option<&'a str>,
    pub bg_color: Option<&'a str>,
}

/// Immutable snapshot of the network. Built once per rebuild, including the
/// reverse itinerary index, and never mutated afterwards.
#[derive(Debug, Default)]
pub struct StopDirectory {
    stops: Vec<Stop>,
    stop_index: AHashMap<String, usize>,
    lines: AHashMap<String, Line>,
    itineraries: Vec<Itinerary>,
    memberships: AHashMap<String, Vec<LineMembership>>,
}

impl StopDirectory {
    /// Stops keep the given order; later duplicates of an id are ignored.
    pub fn new(stops: Vec<Stop>, lines: Vec<Line>, itineraries: Vec<Itinerary>) -> Self {
        let mut unique_stops: Vec<Stop> = Vec::with_capacity(stops.len());
        let mut stop_index: AHashMap<String, usize> = AHashMap::with_capacity(stops.len());

        for stop in stops {
            if stop_index.contains_key(&stop.id) {
                continue;
            }
            stop_index.insert(stop.id.clone(), unique_stops.len());
            unique_stops.push(stop);
        }

        let lines = lines
            .into_iter()
            .map(|line| (line.id.clone(), line))
            .collect::<AHashMap<String, Line>>();

        let memberships = build_memberships(&itineraries, &stop_index);

        StopDirectory {
            stops: unique_stops,
            stop_index,
            lines,
            itineraries,
            memberships,
        }
    }

    pub fn empty() -> Self {
        StopDirectory::default()
    }

    pub fn stop(&self, stop_id: &str) -> Option<&Stop> {
        self.stop_index.get(stop_id).map(|&i| &self.stops[i])
    }

    /// All stops in directory order.
    pub fn stops(&self) -> &[Stop] {
        &self.stops
    }

    pub fn sources(&self, stop_id: &str) -> Option<&[String]> {
        self.stop(stop_id).map(|stop| stop.sources.as_slice())
    }

    pub fn line(&self, line_id: &str) -> Option<&Line> {
        self.lines.get(line_id)
    }

    pub fn lines(&self) -> impl Iterator<Item = &Line> {
        self.lines.values()
    }

    pub fn itineraries(&self) -> &[Itinerary] {
        &self.itineraries
    }

    /// Lines and directions serving a stop, with positions along each route.
    pub fn memberships(&self, stop_id: &str) -> &[LineMembership] {
        self.memberships
            .get(stop_id)
            .map(|m| m.as_slice())
            .unwrap_or(&[])
    }

    /// Colours for a real-time line id. Falls back to the canonical id when
    /// the line id matches the night alias.
    pub fn colors_for_line(&self, line_id: &str, alias: &NightLineAlias) -> Option<LineColors<'_>> {
        let line = match self.line(line_id) {
            Some(line) => line,
            None => self.line(&alias.canonical(line_id)?)?,
        };

        Some(LineColors {
            fg_color: line.fg_color.as_deref(),
            bg_color: line.bg_color.as_deref(),
        })
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    pub fn positioned_len(&self) -> usize {
        self.stops.iter().filter(|s| s.position.is_some()).count()
    }
}

fn build_memberships(
    itineraries: &[Itinerary],
    stop_index: &AHashMap<String, usize>,
) -> AHashMap<String, Vec<LineMembership>> {
    let mut memberships: AHashMap<String, Vec<LineMembership>> = AHashMap::new();

    for itinerary in itineraries {
        for (position, stop_id) in itinerary.stops.iter().enumerate() {
            if !stop_index.contains_key(stop_id) {
                continue;
            }

            let entries = memberships.entry(stop_id.clone()).or_default();

            match entries
                .iter_mut()
                .find(|m| m.line == itinerary.line && m.direction == itinerary.direction)
            {
                Some(existing) => existing.positions.push(position),
                None => entries.push(LineMembership {
                    line: itinerary.line.clone(),
                    direction: itinerary.direction,
                    positions: vec![position],
                }),
            }
        }
    }

    memberships
}
