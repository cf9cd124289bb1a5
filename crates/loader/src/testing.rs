//! In-memory stand-ins for the network and the engine
//!
//! Used by this crate's tests and by embedders testing their own wiring.
//! Built under `cfg(test)` or with the `testing` feature.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use hotload_errors::{Error, NetworkError};
use hotload_net::HttpClient;

use crate::engine::{EngineFactory, ExecutionEngine};

#[derive(Clone)]
struct FakeResponse {
    body: Result<Vec<u8>, Error>,
    delay: Duration,
}

/// Serves canned bodies by exact URL; anything else is a 404.
#[derive(Default)]
pub struct FakeHttpClient {
    responses: Mutex<HashMap<String, FakeResponse>>,
    requests: Mutex<Vec<(String, Vec<(String, String)>)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeHttpClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.set_delayed(url, body, Duration::ZERO);
    }

    /// Serve `body` after `delay`, to force fetches to finish out of order.
    pub fn set_delayed(&self, url: impl Into<String>, body: impl Into<Vec<u8>>, delay: Duration) {
        self.insert(
            url.into(),
            FakeResponse {
                body: Ok(body.into()),
                delay,
            },
        );
    }

    pub fn set_error(&self, url: impl Into<String>, error: Error) {
        self.insert(
            url.into(),
            FakeResponse {
                body: Err(error),
                delay: Duration::ZERO,
            },
        );
    }

    fn insert(&self, url: String, response: FakeResponse) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url, response);
    }

    /// Every requested URL, in request order.
    #[must_use]
    pub fn requested_urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    /// Headers sent with the most recent request for `url`.
    #[must_use]
    pub fn request_headers(&self, url: &str) -> Option<Vec<(String, String)>> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|(requested, _)| requested == url)
            .map(|(_, headers)| headers.clone())
    }

    #[must_use]
    pub fn request_count(&self, url: &str) -> usize {
        self.requested_urls().iter().filter(|u| *u == url).count()
    }

    /// Most downloads that were ever in progress at once.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClient for FakeHttpClient {
    async fn download(
        &self,
        url: &str,
        request_headers: &[(String, String)],
        max_bytes: Option<usize>,
    ) -> Result<Vec<u8>, Error> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((url.to_string(), request_headers.to_vec()));
        let response = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned();

        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        tokio::time::sleep(response.as_ref().map_or(Duration::ZERO, |r| r.delay)).await;
        // overlap concurrent downloads even without a delay
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match response {
            Some(FakeResponse { body: Ok(body), .. })
                if max_bytes.is_some_and(|max| body.len() > max) =>
            {
                Err(NetworkError::ResponseTooLarge {
                    url: url.to_string(),
                    size: body.len(),
                    max: max_bytes.unwrap_or_default(),
                }
                .into())
            }
            Some(response) => response.body,
            None => Err(NetworkError::HttpError {
                status: 404,
                message: format!("{url} not found"),
            }
            .into()),
        }
    }
}

/// What a [`RecordingEngine`] was asked to do, in order.
pub type EngineLog = Arc<Mutex<Vec<String>>>;

/// Engine that records module ids and main-function calls.
///
/// Loading a module whose id is in `failing_modules` fails.
pub struct RecordingEngine {
    log: EngineLog,
    failing_modules: Vec<String>,
}

impl RecordingEngine {
    /// A factory whose engines all append to the returned log.
    ///
    /// Loads are logged as the module id, main-function calls as
    /// `main:<module>:<function>`.
    #[must_use]
    pub fn factory() -> (Arc<dyn EngineFactory>, EngineLog) {
        Self::failing_factory(&[])
    }

    #[must_use]
    pub fn failing_factory(failing_modules: &[&str]) -> (Arc<dyn EngineFactory>, EngineLog) {
        let log = EngineLog::default();
        let shared = log.clone();
        let failing: Vec<String> = failing_modules.iter().map(ToString::to_string).collect();
        let factory: Arc<dyn EngineFactory> =
            Arc::new(move |_: &str| -> Result<Box<dyn ExecutionEngine>, Error> {
                Ok(Box::new(RecordingEngine {
                    log: shared.clone(),
                    failing_modules: failing.clone(),
                }))
            });
        (factory, log)
    }

    fn record(&self, entry: String) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}

impl ExecutionEngine for RecordingEngine {
    fn load_module(&mut self, _bytecode: &[u8], module_id: &str) -> Result<(), Error> {
        if self.failing_modules.iter().any(|id| id == module_id) {
            return Err(hotload_errors::EngineError::ModuleLoadFailed {
                module_id: module_id.to_string(),
                message: "rejected by test engine".to_string(),
            }
            .into());
        }
        self.record(module_id.to_string());
        Ok(())
    }

    fn run_application(&mut self, main_module_id: &str, main_function: &str) -> Result<(), Error> {
        self.record(format!("main:{main_module_id}:{main_function}"));
        Ok(())
    }
}
