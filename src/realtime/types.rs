// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::realtime::attempt::SourceDiagnostics;
use chrono::{DateTime, FixedOffset};
use serde::Serialize;

/// A waiting time anchored to the clock of the attempt that returned it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prediction {
    pub line: String,
    pub mode: String,
    pub destination: String,
    pub message: String,
    pub minutes: u32,
    pub when: DateTime<FixedOffset>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Arrival {
    pub stop: String,
    pub halt: String,
    pub line: String,
    pub mode: String,
    pub when: DateTime<FixedOffset>,
    pub destination: String,
    pub message: String,
    pub minutes: u32,
    pub fg_color: Option<String>,
    pub bg_color: Option<String>,
}

/// Successful aggregation of one stop. `sources` always holds every source's
/// attempt log, including the ones that failed.
#[derive(Clone, Debug, Serialize)]
pub struct StopResult {
    pub stop_id: String,
    pub stop_name: String,
    pub time_of_request: DateTime<FixedOffset>,
    pub requests: Vec<String>,
    pub arrivals: Vec<Arrival>,
    pub sources: SourceDiagnostics,
}

impl StopResult {
    pub fn attempts_issued(&self) -> usize {
        self.sources.attempts_issued()
    }
}
