// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

pub mod attempt;
pub mod batch;
pub mod fetcher;
pub mod parse;
pub mod stop_aggregator;
pub mod types;
pub mod upstream;

pub use attempt::{AttemptOutcome, AttemptRecord, SourceDiagnostics, SourceReport};
pub use batch::{BatchResult, aggregate_many, collect_batch};
pub use fetcher::{FetchPolicy, fetch_source};
pub use stop_aggregator::{aggregate_sources, aggregate_stop};
pub use types::{Arrival, Prediction, StopResult};
pub use upstream::{UpstreamClient, UpstreamResponse, make_http_client};
