// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::realtime::attempt::SourceDiagnostics;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Failures of the real-time aggregation engine.
///
/// These are expected outcomes rather than faults: every variant carries the
/// detail needed to render a diagnosable payload, attempt logs included.
#[derive(Error, Debug, Clone, Serialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum AggregationError {
    #[error("unknown stop '{stop_id}'")]
    UnknownStop { stop_id: String },
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("all {} sources of stop '{stop_id}' failed", .diagnostics.len())]
    AllSourcesFailed {
        stop_id: String,
        diagnostics: SourceDiagnostics,
    },
    #[error("all {} requested stops failed", .failures.len())]
    BatchFailed {
        failures: BTreeMap<String, AggregationError>,
    },
    #[error(
        "request budget exhausted before stop '{stop_id}' ({remaining} left, {required} needed)"
    )]
    BudgetExhausted {
        stop_id: String,
        remaining: usize,
        required: usize,
    },
}

impl AggregationError {
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        AggregationError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// Number of upstream attempts recorded in this error.
    pub fn attempts_issued(&self) -> usize {
        match self {
            AggregationError::AllSourcesFailed { diagnostics, .. } => diagnostics.attempts_issued(),
            AggregationError::BatchFailed { failures } => {
                failures.values().map(|e| e.attempts_issued()).sum()
            }
            _ => 0,
        }
    }
}

/// Failure of a single transport call, before any retry policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("request timed out after {0} ms")]
    Timeout(u128),
    #[error("network error: {0}")]
    Network(String),
}

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("no network feed url configured")]
    MissingNetworkUrl,
    #[error("failed to download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: UpstreamError,
    },
    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("malformed network document: {0}")]
    Network(#[from] serde_json::Error),
    #[error("malformed geometry document: {0}")]
    Geometry(#[from] geojson::Error),
    #[error("geometry document must be a FeatureCollection")]
    GeometryShape,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("environment variable {name} has invalid value '{value}'")]
    InvalidVar { name: &'static str, value: String },
    #[error("unknown timezone '{0}'")]
    Timezone(String),
    #[error("{name} {reason}")]
    Inconsistent {
        name: &'static str,
        reason: &'static str,
    },
}
