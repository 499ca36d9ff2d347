// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Nearest-k stop selection with real-time data under a shared request budget.

use crate::config::EngineConfig;
use crate::directory::{Stop, StopDirectory};
use crate::errors::AggregationError;
use crate::geomath::{Coordinate, UNPOSITIONED_DISTANCE, angular_to_metres, distance_to};
use crate::realtime::fetcher::FetchPolicy;
use crate::realtime::stop_aggregator::aggregate_stop;
use crate::realtime::types::StopResult;
use crate::realtime::upstream::UpstreamClient;
use ordered_float::OrderedFloat;
use serde::{Serialize, Serializer};
use std::collections::BinaryHeap;
use tracing::debug;

#[derive(Clone, Copy, Debug)]
pub struct NearestQuery {
    pub origin: Coordinate,
    pub k: usize,
    /// Attempts per source, before the budget is applied.
    pub attempts: usize,
    /// Upper bound on upstream attempts across the whole query.
    pub total_budget: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct NearestStop {
    pub stop: Stop,
    /// Central angle from the query point, in radians.
    pub distance: f64,
    pub distance_m: f64,
    #[serde(serialize_with = "serialize_outcome")]
    pub realtime: Result<StopResult, AggregationError>,
}

fn serialize_outcome<S: Serializer>(
    outcome: &Result<StopResult, AggregationError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match outcome {
        Ok(result) => result.serialize(serializer),
        Err(e) => e.serialize(serializer),
    }
}

pub fn validate_query(query: &NearestQuery, config: &EngineConfig) -> Result<(), AggregationError> {
    let origin = query.origin;

    if !origin.is_finite() {
        let name = if origin.lat.is_finite() { "lon" } else { "lat" };
        return Err(AggregationError::invalid(name, "must be a finite number"));
    }

    if !(-90.0..=90.0).contains(&origin.lat) {
        return Err(AggregationError::invalid(
            "lat",
            format!("{} is not a latitude", origin.lat),
        ));
    }

    if !(-180.0..=180.0).contains(&origin.lon) {
        return Err(AggregationError::invalid(
            "lon",
            format!("{} is not a longitude", origin.lon),
        ));
    }

    if query.k == 0 || query.k > config.max_nclosest {
        return Err(AggregationError::invalid(
            "k",
            format!("must be between 1 and {}", config.max_nclosest),
        ));
    }

    if query.attempts == 0 || query.attempts > config.max_attempts {
        return Err(AggregationError::invalid(
            "attempts",
            format!("must be between 1 and {}", config.max_attempts),
        ));
    }

    if query.total_budget == 0 {
        return Err(AggregationError::invalid("budget", "must be at least 1"));
    }

    Ok(())
}

/// Directory indices and distances of the `k` closest positioned stops,
/// nearest first. Equal distances keep directory order.
pub fn nearest_candidates(
    directory: &StopDirectory,
    origin: Coordinate,
    k: usize,
) -> Vec<(usize, f64)> {
    if k == 0 {
        return Vec::new();
    }

    // max-heap holding the k best seen so far; its top is the one to evict
    let mut heap: BinaryHeap<(OrderedFloat<f64>, usize)> = BinaryHeap::with_capacity(k + 1);

    for (index, stop) in directory.stops().iter().enumerate() {
        let distance = distance_to(origin, stop.position);

        if distance >= UNPOSITIONED_DISTANCE {
            continue;
        }

        let candidate = (OrderedFloat(distance), index);

        if heap.len() < k {
            heap.push(candidate);
        } else if let Some(worst) = heap.peek() {
            if candidate < *worst {
                heap.pop();
                heap.push(candidate);
            }
        }
    }

    heap.into_sorted_vec()
        .into_iter()
        .map(|(distance, index)| (index, distance.into_inner()))
        .collect()
}

/// Aggregates the nearest stops one after another, nearest first, charging
/// every attempt issued against `query.total_budget`.
///
/// Each stop gets `min(attempts, remaining / sources)` attempts per source.
/// A stop that cannot give every source one attempt is reported as
/// `BudgetExhausted` without touching the network, and selection moves on to
/// the next stop. Fails outright only when the query is invalid, or when not a
/// single stop could be afforded.
#[tracing::instrument(
    skip(client, directory, config),
    fields(lat = query.origin.lat, lon = query.origin.lon, k = query.k)
)]
pub async fn select_nearest<C: UpstreamClient>(
    client: &C,
    directory: &StopDirectory,
    config: &EngineConfig,
    query: &NearestQuery,
) -> Result<Vec<NearestStop>, AggregationError> {
    validate_query(query, config)?;

    let candidates = nearest_candidates(directory, query.origin, query.k);

    let mut remaining = query.total_budget;
    let mut afforded_any = false;
    let mut selected: Vec<NearestStop> = Vec::with_capacity(candidates.len());

    for (index, distance) in candidates {
        let stop = &directory.stops()[index];
        let required = stop.sources.len();

        let allowance = match remaining.checked_div(required) {
            Some(per_source) => query.attempts.min(per_source),
            None => query.attempts,
        };

        let realtime = if allowance == 0 {
            debug!(stop_id = %stop.id, remaining, required, "budget exhausted");

            Err(AggregationError::BudgetExhausted {
                stop_id: stop.id.clone(),
                remaining,
                required,
            })
        } else {
            afforded_any = true;

            let policy = FetchPolicy {
                max_attempts: allowance,
                per_attempt_timeout: config.per_attempt_timeout,
                retry_delay: config.retry_delay,
            };

            let result = aggregate_stop(client, directory, config, &stop.id, &policy).await;

            let issued = match &result {
                Ok(stop_result) => stop_result.attempts_issued(),
                Err(e) => e.attempts_issued(),
            };
            remaining = remaining.saturating_sub(issued);

            result
        };

        selected.push(NearestStop {
            stop: stop.clone(),
            distance,
            distance_m: angular_to_metres(distance),
            realtime,
        });
    }

    if !afforded_any {
        if let Some(NearestStop {
            realtime: Err(e), ..
        }) = selected.into_iter().next()
        {
            return Err(e);
        }
        return Ok(Vec::new());
    }

    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::upstream::testing::{Scripted, ScriptedClient, waiting_times_xml};

    fn url(halt: &str) -> String {
        EngineConfig::default().waiting_times_url_for(halt)
    }

    fn stop(id: &str, position: Option<(f64, f64)>, sources: &[&str]) -> Stop {
        Stop {
            id: id.to_string(),
            name: id.to_string(),
            position: position.map(|(lat, lon)| Coordinate::new(lat, lon)),
            sources: sources.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Stops spread north of the query point, in directory order
    /// FAR, GHOST (unpositioned), S1 .. S5 nearest first.
    fn directory() -> StopDirectory {
        StopDirectory::new(
            vec![
                stop("FAR", Some((51.20, 4.40)), &["FAR"]),
                stop("GHOST", None, &["GHOST"]),
                stop("S1", Some((50.8501, 4.35)), &["S1-a", "S1-b", "S1-c"]),
                stop("S2", Some((50.8510, 4.35)), &["S2"]),
                stop("S3", Some((50.8520, 4.35)), &["S3"]),
                stop("S4", Some((50.8530, 4.35)), &["S4"]),
                stop("S5", Some((50.8540, 4.35)), &["S5"]),
            ],
            vec![],
            vec![],
        )
    }

    async fn run(
        client: &ScriptedClient,
        query: &NearestQuery,
    ) -> Result<Vec<NearestStop>, AggregationError> {
        select_nearest(client, &directory(), &EngineConfig::default(), query).await
    }

    fn query(k: usize, attempts: usize, total_budget: usize) -> NearestQuery {
        NearestQuery {
            origin: Coordinate::new(50.85, 4.35),
            k,
            attempts,
            total_budget,
        }
    }

    fn healthy_client() -> ScriptedClient {
        let ok = waiting_times_xml(&[("71", "B", "DELTA", "", 4)]);

        ["S1-a", "S1-b", "S1-c", "S2", "S3", "S4", "S5", "FAR", "GHOST"]
            .into_iter()
            .fold(ScriptedClient::new(), |client, halt| {
                client.script(url(halt), vec![Scripted::Respond(200, ok.clone())])
            })
    }

    #[test]
    fn candidates_are_nearest_first() {
        let directory = directory();
        let ids = |k| {
            nearest_candidates(&directory, Coordinate::new(50.85, 4.35), k)
                .into_iter()
                .map(|(i, _)| directory.stops()[i].id.clone())
                .collect::<Vec<String>>()
        };

        assert_eq!(ids(3), vec!["S1", "S2", "S3"]);

        // only six stops are positioned
        assert_eq!(ids(10).len(), 6);
        assert_eq!(ids(10).last().map(String::as_str), Some("FAR"));

        let distances = nearest_candidates(&directory, Coordinate::new(50.85, 4.35), 10)
            .into_iter()
            .map(|(_, d)| d)
            .collect::<Vec<f64>>();
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn ties_keep_directory_order() {
        let directory = StopDirectory::new(
            vec![
                stop("A", Some((50.0, 4.0)), &["A"]),
                stop("B", Some((50.0, 4.0)), &["B"]),
                stop("C", Some((50.0, 4.0)), &["C"]),
            ],
            vec![],
            vec![],
        );

        let picked = nearest_candidates(&directory, Coordinate::new(50.0, 4.0), 2)
            .into_iter()
            .map(|(i, _)| i)
            .collect::<Vec<usize>>();

        assert_eq!(picked, vec![0, 1]);
    }

    #[tokio::test]
    async fn budget_runs_out_after_first_stop() {
        let client = healthy_client();

        let results = run(&client, &query(5, 1, 3)).await.unwrap();

        assert_eq!(results.len(), 5);
        assert_eq!(results[0].stop.id, "S1");
        assert_eq!(results[0].realtime.as_ref().unwrap().attempts_issued(), 3);

        for entry in &results[1..] {
            match &entry.realtime {
                Err(AggregationError::BudgetExhausted {
                    remaining, required, ..
                }) => {
                    assert_eq!(*remaining, 0);
                    assert_eq!(*required, 1);
                }
                other => panic!("expected budget exhaustion, got {:?}", other),
            }
        }

        assert_eq!(client.calls().len(), 3);
        for halt in ["S2", "S3", "S4", "S5"] {
            assert_eq!(client.calls_to(&url(halt)), 0);
        }
    }

    #[tokio::test]
    async fn unaffordable_stop_is_skipped_not_fatal() {
        let client = healthy_client();
        // S1 needs three slots with only two available, S2 fits
        let results = run(&client, &query(2, 1, 2)).await.unwrap();

        assert!(matches!(
            results[0].realtime,
            Err(AggregationError::BudgetExhausted { required: 3, remaining: 2, .. })
        ));
        assert!(results[1].realtime.is_ok());
        assert_eq!(client.calls(), vec![url("S2")]);
    }

    #[tokio::test]
    async fn attempts_never_exceed_budget() {
        let client = ScriptedClient::new();

        for budget in 1..=12 {
            let before = client.calls().len();

            let _ = run(&client, &query(7, 3, budget)).await;

            assert!(client.calls().len() - before <= budget);
        }
    }

    #[tokio::test]
    async fn unconstrained_budget_returns_every_positioned_stop() {
        let client = healthy_client();

        let results = run(&client, &query(10, 1, 100)).await.unwrap();

        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|r| r.realtime.is_ok()));
        assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert!(results[0].distance_m < 20.0);
    }

    #[tokio::test]
    async fn nothing_affordable_is_an_error() {
        let client = healthy_client();

        let error = run(&client, &query(1, 1, 2)).await.unwrap_err();

        assert!(matches!(
            error,
            AggregationError::BudgetExhausted { ref stop_id, .. } if stop_id == "S1"
        ));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_queries_fail_before_any_request() {
        let client = healthy_client();
        let config = EngineConfig::default();

        let bad = [
            NearestQuery {
                origin: Coordinate::new(f64::NAN, 4.35),
                ..query(1, 1, 10)
            },
            NearestQuery {
                origin: Coordinate::new(50.85, 181.0),
                ..query(1, 1, 10)
            },
            query(0, 1, 10),
            query(config.max_nclosest + 1, 1, 10),
            query(1, 0, 10),
            query(1, config.max_attempts + 1, 10),
            query(1, 1, 0),
        ];

        for q in bad {
            let error = select_nearest(&client, &directory(), &config, &q)
                .await
                .unwrap_err();
            assert!(matches!(error, AggregationError::InvalidParameter { .. }));
        }

        assert!(client.calls().is_empty());
    }
}
