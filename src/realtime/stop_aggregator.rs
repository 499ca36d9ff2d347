// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::config::EngineConfig;
use crate::directory::StopDirectory;
use crate::errors::AggregationError;
use crate::fan_out::{fan_out_width, join_in_order};
use crate::realtime::attempt::{SourceDiagnostics, SourceReport};
use crate::realtime::fetcher::{FetchPolicy, fetch_source};
use crate::realtime::types::{Arrival, StopResult};
use crate::realtime::upstream::UpstreamClient;
use chrono::Utc;
use tracing::{debug, warn};

/// Polls every source of a stop concurrently and merges what came back.
///
/// The stop succeeds when at least one source succeeds. Arrivals are merged
/// in source order, not completion order, and every source's attempt log is
/// kept in the result whatever its outcome.
#[tracing::instrument(
    skip(client, directory, config, policy),
    fields(max_attempts = policy.max_attempts)
)]
pub async fn aggregate_stop<C: UpstreamClient>(
    client: &C,
    directory: &StopDirectory,
    config: &EngineConfig,
    stop_id: &str,
    policy: &FetchPolicy,
) -> Result<StopResult, AggregationError> {
    let sources = directory
        .sources(stop_id)
        .filter(|sources| !sources.is_empty());

    let (Some(stop), Some(sources)) = (directory.stop(stop_id), sources) else {
        return Err(AggregationError::UnknownStop {
            stop_id: stop_id.to_string(),
        });
    };

    aggregate_sources(client, directory, config, &stop.id, &stop.name, sources, policy).await
}

/// Shared by stop lookups and raw halt lookups, which skip the directory
/// resolution step.
pub async fn aggregate_sources<C: UpstreamClient>(
    client: &C,
    directory: &StopDirectory,
    config: &EngineConfig,
    stop_id: &str,
    stop_name: &str,
    sources: &[String],
    policy: &FetchPolicy,
) -> Result<StopResult, AggregationError> {
    let time_of_request = Utc::now().with_timezone(&config.timezone).fixed_offset();

    let requests = sources
        .iter()
        .map(|source| config.waiting_times_url_for(source))
        .collect::<Vec<String>>();

    let width = fan_out_width(sources.len(), config.max_fan_out);

    let outcomes = join_in_order(
        sources.iter().zip(requests.iter()),
        width,
        |(source, url)| async move {
            (
                source,
                url,
                fetch_source(client, url, policy, config.timezone).await,
            )
        },
    )
    .await;

    let mut arrivals: Vec<Arrival> = Vec::new();
    let mut reports: Vec<SourceReport> = Vec::with_capacity(outcomes.len());

    for (source, url, outcome) in outcomes {
        match outcome {
            Ok(success) => {
                for prediction in success.predictions {
                    let colors =
                        directory.colors_for_line(&prediction.line, &config.night_line_alias);

                    arrivals.push(Arrival {
                        stop: stop_id.to_string(),
                        halt: source.clone(),
                        fg_color: colors.as_ref().and_then(|c| c.fg_color).map(String::from),
                        bg_color: colors.as_ref().and_then(|c| c.bg_color).map(String::from),
                        line: prediction.line,
                        mode: prediction.mode,
                        when: prediction.when,
                        destination: prediction.destination,
                        message: prediction.message,
                        minutes: prediction.minutes,
                    });
                }

                reports.push(SourceReport {
                    source: source.clone(),
                    url: url.clone(),
                    succeeded: true,
                    attempts: success.attempts,
                });
            }
            Err(failure) => {
                warn!(
                    stop_id,
                    source = %source,
                    attempts = failure.attempts.len(),
                    "source gave up"
                );

                reports.push(SourceReport {
                    source: source.clone(),
                    url: url.clone(),
                    succeeded: false,
                    attempts: failure.attempts,
                });
            }
        }
    }

    let diagnostics = SourceDiagnostics(reports);

    if !diagnostics.any_succeeded() {
        return Err(AggregationError::AllSourcesFailed {
            stop_id: stop_id.to_string(),
            diagnostics,
        });
    }

    debug!(
        stop_id,
        arrivals = arrivals.len(),
        attempts = diagnostics.attempts_issued(),
        "stop aggregated"
    );

    Ok(StopResult {
        stop_id: stop_id.to_string(),
        stop_name: stop_name.to_string(),
        time_of_request,
        requests,
        arrivals,
        sources: diagnostics,
    })
}
