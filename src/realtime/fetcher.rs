// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::errors::UpstreamError;
use crate::realtime::attempt::{AttemptOutcome, AttemptRecord};
use crate::realtime::parse::parse_waiting_times;
use crate::realtime::types::Prediction;
use crate::realtime::upstream::UpstreamClient;
use chrono::Utc;
use chrono_tz::Tz;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug)]
pub struct FetchPolicy {
    pub max_attempts: usize,
    pub per_attempt_timeout: Duration,
    pub retry_delay: Duration,
}

#[derive(Clone, Debug)]
pub struct FetchSuccess {
    pub predictions: Vec<Prediction>,
    /// Failed attempts first, the successful one last.
    pub attempts: Vec<AttemptRecord>,
}

#[derive(Clone, Debug)]
pub struct FetchFailure {
    pub attempts: Vec<AttemptRecord>,
}

/// Polls one source until it answers with a well-formed document, up to
/// `policy.max_attempts` times.
///
/// A timeout, a transport error, a non-2xx status and an unparseable body all
/// count as a failed attempt. Predictions are anchored to the clock of the
/// successful attempt, in `timezone`.
pub async fn fetch_source<C: UpstreamClient>(
    client: &C,
    url: &str,
    policy: &FetchPolicy,
    timezone: Tz,
) -> Result<FetchSuccess, FetchFailure> {
    let mut attempts: Vec<AttemptRecord> = Vec::with_capacity(policy.max_attempts);

    for attempt_number in 1..=policy.max_attempts {
        let requested_at = Utc::now();

        let outcome =
            match tokio::time::timeout(policy.per_attempt_timeout, client.fetch(url)).await {
                Err(_) => Err(AttemptOutcome::Failure {
                    status: None,
                    error: UpstreamError::Timeout(policy.per_attempt_timeout.as_millis())
                        .to_string(),
                }),
                Ok(Err(e)) => Err(AttemptOutcome::Failure {
                    status: None,
                    error: e.to_string(),
                }),
                Ok(Ok(response)) if !response.is_success() => Err(AttemptOutcome::Failure {
                    status: Some(response.status),
                    error: format!("HTTP {}", response.status),
                }),
                Ok(Ok(response)) => match parse_waiting_times(&response.body, url) {
                    Ok(waiting_times) => Ok((response.status, waiting_times)),
                    Err(e) => Err(AttemptOutcome::Failure {
                        status: Some(response.status),
                        error: format!("malformed waiting times document: {}", e),
                    }),
                },
            };

        match outcome {
            Ok((status, waiting_times)) => {
                let answered_at = Utc::now().with_timezone(&timezone);

                let predictions = waiting_times
                    .into_iter()
                    .map(|w| Prediction {
                        when: (answered_at + chrono::Duration::minutes(w.minutes as i64))
                            .fixed_offset(),
                        line: w.line,
                        mode: w.mode,
                        destination: w.destination,
                        message: w.message,
                        minutes: w.minutes,
                    })
                    .collect::<Vec<Prediction>>();

                attempts.push(AttemptRecord {
                    url: url.to_string(),
                    requested_at,
                    outcome: AttemptOutcome::Success { status },
                });

                debug!(
                    url,
                    attempt = attempt_number,
                    predictions = predictions.len(),
                    "source answered"
                );

                return Ok(FetchSuccess {
                    predictions,
                    attempts,
                });
            }
            Err(failure) => {
                if let AttemptOutcome::Failure { status, error } = &failure {
                    warn!(
                        url,
                        attempt = attempt_number,
                        status = ?status,
                        error = %error,
                        "attempt failed"
                    );
                }

                attempts.push(AttemptRecord {
                    url: url.to_string(),
                    requested_at,
                    outcome: failure,
                });

                if attempt_number < policy.max_attempts && !policy.retry_delay.is_zero() {
                    tokio::time::sleep(policy.retry_delay).await;
                }
            }
        }
    }

    Err(FetchFailure { attempts })
}
