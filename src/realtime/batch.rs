// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::config::EngineConfig;
use crate::directory::StopDirectory;
use crate::errors::AggregationError;
use crate::fan_out::{fan_out_width, in_completion_order};
use crate::realtime::fetcher::FetchPolicy;
use crate::realtime::stop_aggregator::aggregate_stop;
use crate::realtime::types::StopResult;
use crate::realtime::upstream::UpstreamClient;
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;

pub type StopOutcome = (String, Result<StopResult, AggregationError>);

/// Aggregates every stop concurrently and yields each one as it completes.
///
/// A caller that only needs the first few answers can drop the stream; the
/// stops still in flight are cancelled with it.
pub fn aggregate_many<'a, C: UpstreamClient>(
    client: &'a C,
    directory: &'a StopDirectory,
    config: &'a EngineConfig,
    stop_ids: Vec<String>,
    policy: &'a FetchPolicy,
) -> impl Stream<Item = StopOutcome> + 'a {
    let width = fan_out_width(stop_ids.len(), config.max_fan_out);

    in_completion_order(stop_ids, width, move |stop_id| async move {
        let result = aggregate_stop(client, directory, config, &stop_id, policy).await;
        (stop_id, result)
    })
}

#[derive(Serialize, Clone, Debug, Default)]
pub struct BatchResult {
    /// Stop ids in the order they were asked for.
    pub requested: Vec<String>,
    pub succeeded: BTreeMap<String, StopResult>,
    pub failed: BTreeMap<String, AggregationError>,
}

impl BatchResult {
    /// Successful stops in the order they were asked for.
    pub fn in_requested_order(&self) -> Vec<&StopResult> {
        self.requested
            .iter()
            .filter_map(|stop_id| self.succeeded.get(stop_id))
            .collect()
    }
}

/// Drains a batch stream started for `requested`. Fails with `BatchFailed`
/// when no stop succeeded.
pub async fn collect_batch(
    requested: Vec<String>,
    outcomes: impl Stream<Item = StopOutcome>,
) -> Result<BatchResult, AggregationError> {
    let mut batch = BatchResult {
        requested,
        ..BatchResult::default()
    };

    let mut outcomes = std::pin::pin!(outcomes);

    while let Some((stop_id, result)) = outcomes.next().await {
        match result {
            Ok(stop_result) => {
                batch.succeeded.insert(stop_id, stop_result);
            }
            Err(e) => {
                batch.failed.insert(stop_id, e);
            }
        }
    }

    if batch.succeeded.is_empty() && !batch.failed.is_empty() {
        return Err(AggregationError::BatchFailed {
            failures: batch.failed,
        });
    }

    Ok(batch)
}
