// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success {
        status: u16,
    },
    Failure {
        // None when no response came back (timeout, connection reset)
        status: Option<u16>,
        error: String,
    },
}

/// One HTTP call made to a source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub url: String,
    pub requested_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

impl AttemptRecord {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Success { .. })
    }
}

/// Attempt log of one source within a stop aggregation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source: String,
    pub url: String,
    pub succeeded: bool,
    pub attempts: Vec<AttemptRecord>,
}

impl SourceReport {
    pub fn failed_attempts(&self) -> usize {
        self.attempts.iter().filter(|a| !a.is_success()).count()
    }
}

/// Per-source diagnostics for one stop, in source order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SourceDiagnostics(pub Vec<SourceReport>);

impl SourceDiagnostics {
    pub fn get(&self, source: &str) -> Option<&SourceReport> {
        self.0.iter().find(|report| report.source == source)
    }

    pub fn attempts_issued(&self) -> usize {
        self.0.iter().map(|report| report.attempts.len()).sum()
    }

    pub fn any_succeeded(&self) -> bool {
        self.0.iter().any(|report| report.succeeded)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceReport> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
