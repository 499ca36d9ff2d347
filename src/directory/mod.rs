// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

pub mod loader;
pub mod types;

pub use loader::{DirectoryReport, build_directory};
pub use types::{Itinerary, Line, LineColors, LineMembership, Stop, StopDirectory};

use crate::config::EngineConfig;
use crate::errors::{DirectoryError, UpstreamError};
use crate::realtime::upstream::UpstreamClient;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

const FEED_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Process-wide holder of the active directory snapshot.
///
/// Readers clone the inner `Arc` and keep a consistent snapshot for as long
/// as they need it; a rebuild swaps in a fully built replacement.
#[derive(Clone)]
pub struct DirectoryHandle {
    current: Arc<RwLock<Arc<StopDirectory>>>,
}

impl Default for DirectoryHandle {
    fn default() -> Self {
        DirectoryHandle::new(StopDirectory::empty())
    }
}

impl DirectoryHandle {
    pub fn new(directory: StopDirectory) -> Self {
        DirectoryHandle {
            current: Arc::new(RwLock::new(Arc::new(directory))),
        }
    }

    pub async fn snapshot(&self) -> Arc<StopDirectory> {
        Arc::clone(&*self.current.read().await)
    }

    /// Installs `directory` and returns the snapshot it replaced.
    pub async fn replace(&self, directory: StopDirectory) -> Arc<StopDirectory> {
        let replacement = Arc::new(directory);
        let mut current = self.current.write().await;
        std::mem::replace(&mut *current, replacement)
    }

    /// Downloads the network and geometry feeds and swaps in the result.
    /// Any failure leaves the active snapshot untouched.
    pub async fn rebuild<C: UpstreamClient>(
        &self,
        client: &C,
        config: &EngineConfig,
    ) -> Result<DirectoryReport, DirectoryError> {
        let start = Instant::now();

        let result = self.try_rebuild(client, config).await;

        match &result {
            Ok(report) => info!(
                stops = report.stops,
                lines = report.lines,
                itineraries = report.itineraries,
                patched = report.patched_from_geometry,
                rejected_coordinates = report.rejected_coordinates.len(),
                unpositioned = report.unpositioned,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "directory rebuilt"
            ),
            Err(e) => warn!(error = %e, "directory rebuild failed, keeping previous snapshot"),
        }

        result
    }

    async fn try_rebuild<C: UpstreamClient>(
        &self,
        client: &C,
        config: &EngineConfig,
    ) -> Result<DirectoryReport, DirectoryError> {
        let network_url = config
            .network_url
            .as_deref()
            .ok_or(DirectoryError::MissingNetworkUrl)?;

        let network = download(client, network_url).await?;

        let geometry = match config.geometry_url.as_deref() {
            Some(geometry_url) => Some(download(client, geometry_url).await?),
            None => None,
        };

        let (directory, report) = build_directory(&network, geometry.as_deref())?;

        self.replace(directory).await;

        Ok(report)
    }
}

async fn download<C: UpstreamClient>(client: &C, url: &str) -> Result<String, DirectoryError> {
    let response = match tokio::time::timeout(FEED_DOWNLOAD_TIMEOUT, client.fetch(url)).await {
        Ok(Ok(response)) => response,
        Ok(Err(source)) => {
            return Err(DirectoryError::Download {
                url: url.to_string(),
                source,
            });
        }
        Err(_) => {
            return Err(DirectoryError::Download {
                url: url.to_string(),
                source: UpstreamError::Timeout(FEED_DOWNLOAD_TIMEOUT.as_millis()),
            });
        }
    };

    if !response.is_success() {
        return Err(DirectoryError::Status {
            url: url.to_string(),
            status: response.status,
        });
    }

    Ok(response.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::upstream::testing::{Scripted, ScriptedClient};

    const NETWORK_URL: &str = "http://feeds/network.json";
    const GEOMETRY_URL: &str = "http://feeds/stops.geojson";

    fn config() -> EngineConfig {
        EngineConfig {
            network_url: Some(NETWORK_URL.to_string()),
            geometry_url: Some(GEOMETRY_URL.to_string()),
            ..EngineConfig::default()
        }
    }

    fn network(stop_id: &str) -> String {
        format!(r##"{{"stops": [{{"id": "{stop_id}", "name": "STOP"}}]}}"##)
    }

    const EMPTY_GEOMETRY: &str = r##"{"type": "FeatureCollection", "features": []}"##;

    #[tokio::test]
    async fn rebuild_swaps_snapshot() {
        let handle = DirectoryHandle::default();
        let before = handle.snapshot().await;

        let client = ScriptedClient::new()
            .script(NETWORK_URL, vec![Scripted::Respond(200, network("8042"))])
            .script(
                GEOMETRY_URL,
                vec![Scripted::Respond(200, EMPTY_GEOMETRY.to_string())],
            );

        let report = handle.rebuild(&client, &config()).await.unwrap();
        assert_eq!(report.stops, 1);

        let after = handle.snapshot().await;
        assert!(after.stop("8042").is_some());
        // readers holding the old snapshot still see it whole
        assert!(before.is_empty());
    }

    #[tokio::test]
    async fn failed_rebuild_keeps_previous_snapshot() {
        let handle = DirectoryHandle::default();

        let client = ScriptedClient::new()
            .script(
                NETWORK_URL,
                vec![
                    Scripted::Respond(200, network("8042")),
                    Scripted::Respond(200, network("5710")),
                    Scripted::Respond(500, String::new()),
                ],
            )
            .script(
                GEOMETRY_URL,
                vec![
                    Scripted::Respond(200, EMPTY_GEOMETRY.to_string()),
                    Scripted::Respond(200, String::from("{broken")),
                ],
            );

        handle.rebuild(&client, &config()).await.unwrap();

        let geometry_failure = handle.rebuild(&client, &config()).await;
        assert!(matches!(geometry_failure, Err(DirectoryError::Geometry(_))));

        let status_failure = handle.rebuild(&client, &config()).await;
        assert!(matches!(
            status_failure,
            Err(DirectoryError::Status { status: 500, .. })
        ));

        let current = handle.snapshot().await;
        assert!(current.stop("8042").is_some());
        assert!(current.stop("5710").is_none());
    }

    #[tokio::test]
    async fn rebuild_needs_network_url() {
        let handle = DirectoryHandle::default();
        let client = ScriptedClient::new();

        let result = handle.rebuild(&client, &EngineConfig::default()).await;

        assert!(matches!(result, Err(DirectoryError::MissingNetworkUrl)));
        assert!(client.calls().is_empty());
    }
}
