// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::errors::UpstreamError;
use std::future::Future;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound HTTP seam. One call is one attempt; retries and timeouts are
/// applied by the caller.
pub trait UpstreamClient: Send + Sync {
    fn fetch(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<UpstreamResponse, UpstreamError>> + Send;
}

impl UpstreamClient for reqwest::Client {
    fn fetch(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<UpstreamResponse, UpstreamError>> + Send {
        let request = reqwest::Client::get(self, url);

        async move {
            let response = request
                .send()
                .await
                .map_err(|e| UpstreamError::Network(e.to_string()))?;

            let status = response.status().as_u16();

            let body = response
                .text()
                .await
                .map_err(|e| UpstreamError::Network(e.to_string()))?;

            Ok(UpstreamResponse { status, body })
        }
    }
}

pub fn make_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .gzip(true)
        .user_agent(concat!("stib-mivb-backend/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Clone, Debug)]
    pub enum Scripted {
        Respond(u16, String),
        /// Answers after the given number of milliseconds.
        Slow(u64, u16, String),
        Fail(UpstreamError),
        Hang,
    }

    /// In-memory upstream. Each url plays its script in order and then keeps
    /// repeating the last entry. Unknown urls answer 404.
    #[derive(Default)]
    pub struct ScriptedClient {
        scripts: Mutex<HashMap<String, Vec<Scripted>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn script(self, url: impl Into<String>, steps: Vec<Scripted>) -> Self {
            self.scripts.lock().unwrap().insert(url.into(), steps);
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn calls_to(&self, url: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
        }
    }

    impl UpstreamClient for ScriptedClient {
        fn fetch(
            &self,
            url: &str,
        ) -> impl Future<Output = Result<UpstreamResponse, UpstreamError>> + Send {
            let call_index = {
                let mut calls = self.calls.lock().unwrap();
                let previous = calls.iter().filter(|u| *u == url).count();
                calls.push(url.to_string());
                previous
            };

            let step = self.scripts.lock().unwrap().get(url).map(|steps| {
                steps
                    .get(call_index)
                    .or_else(|| steps.last())
                    .cloned()
                    .unwrap_or(Scripted::Respond(404, String::new()))
            });

            async move {
                match step.unwrap_or(Scripted::Respond(404, String::new())) {
                    Scripted::Respond(status, body) => Ok(UpstreamResponse { status, body }),
                    Scripted::Slow(ms, status, body) => {
                        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                        Ok(UpstreamResponse { status, body })
                    }
                    Scripted::Fail(e) => Err(e),
                    Scripted::Hang => std::future::pending().await,
                }
            }
        }
    }

    pub fn waiting_times_xml(entries: &[(&str, &str, &str, &str, i64)]) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<waitingtimes>");
        for (line, mode, destination, message, minutes) in entries {
            xml.push_str(&format!(
                "<waitingtime><line>{line}</line><mode>{mode}</mode><minutes>{minutes}</minutes><destination>{destination}</destination><message>{message}</message></waitingtime>"
            ));
        }
        xml.push_str("</waitingtimes>");
        xml
    }
}
