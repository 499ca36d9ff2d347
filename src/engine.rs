// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Entry points used by request handlers. Every call validates its
//! parameters before any network activity and reads one directory snapshot
//! for its whole duration.

use crate::config::EngineConfig;
use crate::directory::{DirectoryHandle, DirectoryReport, LineMembership, Stop, StopDirectory};
use crate::errors::{AggregationError, DirectoryError};
use crate::geomath::Coordinate;
use crate::nearest::{NearestQuery, NearestStop, select_nearest};
use crate::realtime::batch::{BatchResult, StopOutcome, aggregate_many, collect_batch};
use crate::realtime::fetcher::FetchPolicy;
use crate::realtime::stop_aggregator::{aggregate_sources, aggregate_stop};
use crate::realtime::types::StopResult;
use crate::realtime::upstream::UpstreamClient;
use futures::StreamExt;
use serde::Serialize;
use std::ops::ControlFlow;

/// Directory record of one stop plus the lines serving it.
#[derive(Clone, Debug, Serialize)]
pub struct StopDetails {
    pub stop: Stop,
    pub memberships: Vec<LineMembership>,
}

pub struct RealtimeEngine<C: UpstreamClient> {
    client: C,
    directory: DirectoryHandle,
    config: EngineConfig,
}

impl<C: UpstreamClient> RealtimeEngine<C> {
    pub fn new(client: C, config: EngineConfig) -> Self {
        RealtimeEngine {
            client,
            directory: DirectoryHandle::default(),
            config,
        }
    }

    pub fn with_directory(client: C, config: EngineConfig, directory: StopDirectory) -> Self {
        RealtimeEngine {
            client,
            directory: DirectoryHandle::new(directory),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn directory(&self) -> &DirectoryHandle {
        &self.directory
    }

    /// Per-source policy for a caller-supplied attempt count.
    pub fn policy(&self, attempts: Option<usize>) -> Result<FetchPolicy, AggregationError> {
        let attempts = attempts.unwrap_or(self.config.default_attempts);

        if attempts == 0 || attempts > self.config.max_attempts {
            return Err(AggregationError::invalid(
                "attempts",
                format!("must be between 1 and {}", self.config.max_attempts),
            ));
        }

        Ok(FetchPolicy {
            max_attempts: attempts,
            per_attempt_timeout: self.config.per_attempt_timeout,
            retry_delay: self.config.retry_delay,
        })
    }

    pub async fn aggregate(
        &self,
        stop_id: &str,
        attempts: Option<usize>,
    ) -> Result<StopResult, AggregationError> {
        let policy = self.policy(attempts)?;
        let directory = self.directory.snapshot().await;

        aggregate_stop(&self.client, &directory, &self.config, stop_id, &policy).await
    }

    /// Aggregates several stops and collects them all. Ids are trimmed and
    /// deduplicated first; the result keeps that list for ordering. Fails
    /// with `BatchFailed` when every stop failed.
    pub async fn aggregate_many(
        &self,
        stop_ids: &[String],
        attempts: Option<usize>,
    ) -> Result<BatchResult, AggregationError> {
        let policy = self.policy(attempts)?;
        let stop_ids = self.batch_ids(stop_ids)?;
        let directory = self.directory.snapshot().await;

        collect_batch(
            stop_ids.clone(),
            aggregate_many(&self.client, &directory, &self.config, stop_ids, &policy),
        )
        .await
    }

    /// Hands each stop to `visit` as soon as it completes. Returning
    /// `ControlFlow::Break` cancels the stops still in flight.
    ///
    /// Returns how many stops were visited.
    pub async fn aggregate_many_until<F>(
        &self,
        stop_ids: &[String],
        attempts: Option<usize>,
        mut visit: F,
    ) -> Result<usize, AggregationError>
    where
        F: FnMut(StopOutcome) -> ControlFlow<()>,
    {
        let policy = self.policy(attempts)?;
        let stop_ids = self.batch_ids(stop_ids)?;
        let directory = self.directory.snapshot().await;

        let mut outcomes = std::pin::pin!(aggregate_many(
            &self.client,
            &directory,
            &self.config,
            stop_ids,
            &policy,
        ));

        let mut visited = 0;

        while let Some(outcome) = outcomes.next().await {
            visited += 1;
            if visit(outcome).is_break() {
                break;
            }
        }

        Ok(visited)
    }

    pub async fn select_nearest(
        &self,
        lat: f64,
        lon: f64,
        k: usize,
        attempts: Option<usize>,
        total_budget: Option<usize>,
    ) -> Result<Vec<NearestStop>, AggregationError> {
        let query = NearestQuery {
            origin: Coordinate::new(lat, lon),
            k,
            attempts: attempts.unwrap_or(self.config.default_attempts),
            total_budget: total_budget.unwrap_or(self.config.default_total_requests),
        };

        let directory = self.directory.snapshot().await;

        select_nearest(&self.client, &directory, &self.config, &query).await
    }

    /// Polls a single halt directly, without resolving a stop first.
    pub async fn waiting_times_for_halt(
        &self,
        halt: &str,
        attempts: Option<usize>,
    ) -> Result<StopResult, AggregationError> {
        let policy = self.policy(attempts)?;

        let halt = halt.trim();
        if halt.is_empty() {
            return Err(AggregationError::invalid("halt", "must not be empty"));
        }

        let directory = self.directory.snapshot().await;

        // a halt that is also a stop id borrows that stop's name
        let stop_name = directory
            .stop(halt)
            .map(|stop| stop.name.clone())
            .unwrap_or_default();

        aggregate_sources(
            &self.client,
            &directory,
            &self.config,
            halt,
            &stop_name,
            &[halt.to_string()],
            &policy,
        )
        .await
    }

    pub async fn stop_details(&self, stop_id: &str) -> Result<StopDetails, AggregationError> {
        let directory = self.directory.snapshot().await;

        let stop = directory
            .stop(stop_id)
            .ok_or_else(|| AggregationError::UnknownStop {
                stop_id: stop_id.to_string(),
            })?;

        Ok(StopDetails {
            stop: stop.clone(),
            memberships: directory.memberships(stop_id).to_vec(),
        })
    }

    pub async fn rebuild_directory(&self) -> Result<DirectoryReport, DirectoryError> {
        self.directory.rebuild(&self.client, &self.config).await
    }

    /// Drops blanks and repeats, keeping first occurrences in order.
    fn batch_ids(&self, stop_ids: &[String]) -> Result<Vec<String>, AggregationError> {
        let mut unique: Vec<String> = Vec::with_capacity(stop_ids.len());

        for stop_id in stop_ids {
            let stop_id = stop_id.trim();
            if !stop_id.is_empty() && !unique.iter().any(|seen| seen == stop_id) {
                unique.push(stop_id.to_string());
            }
        }

        if unique.is_empty() {
            return Err(AggregationError::invalid("stops", "no stop ids given"));
        }

        if unique.len() > self.config.max_batch_stops {
            return Err(AggregationError::invalid(
                "stops",
                format!(
                    "{} stops requested, at most {} allowed",
                    unique.len(),
                    self.config.max_batch_stops
                ),
            ));
        }

        Ok(unique)
    }
}
