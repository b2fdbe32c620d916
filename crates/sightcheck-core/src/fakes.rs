//! In-memory fakes for the transport and artifact store (testing only)
//!
//! Provides `ScriptedTransport`, `MemoryArtifactStore` and
//! `FailingArtifactStore` that satisfy the trait contracts without any
//! network access.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, SightError};
use crate::store::{ArtifactRecord, ArtifactStore, StoredArtifact};
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, Transport, TransportError};

// ---------------------------------------------------------------------------
// ScriptedTransport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Scripted {
    delay: Duration,
    result: std::result::Result<HttpResponse, TransportError>,
}

/// Transport that replays scripted responses keyed by `(method, url)`.
///
/// Responses for a route are consumed in order; the last one repeats
/// forever. Unscripted routes fail with a network error.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<(HttpMethod, String), VecDeque<Scripted>>>,
    log: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, method: HttpMethod, url: &str, scripted: Scripted) {
        let mut routes = self.routes.lock().unwrap();
        routes
            .entry((method, url.to_string()))
            .or_default()
            .push_back(scripted);
    }

    /// Queue an immediate response.
    pub fn respond(&self, method: HttpMethod, url: &str, response: HttpResponse) {
        self.respond_after(method, url, Duration::ZERO, response);
    }

    /// Queue a response delivered after `delay`.
    pub fn respond_after(&self, method: HttpMethod, url: &str, delay: Duration, response: HttpResponse) {
        self.push(
            method,
            url,
            Scripted {
                delay,
                result: Ok(response),
            },
        );
    }

    /// Queue a transport failure.
    pub fn fail(&self, method: HttpMethod, url: &str, error: TransportError) {
        self.push(
            method,
            url,
            Scripted {
                delay: Duration::ZERO,
                result: Err(error),
            },
        );
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.log.lock().unwrap().clone()
    }

    /// Number of requests received for one route.
    pub fn count(&self, method: HttpMethod, url: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.url == url)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        let key = (request.method, request.url.clone());
        self.log.lock().unwrap().push(request);

        let next = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&key) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        let Some(scripted) = next else {
            return Err(TransportError::Network(format!(
                "no scripted response for {} {}",
                key.0, key.1
            )));
        };

        if !scripted.delay.is_zero() {
            tokio::time::sleep(scripted.delay).await;
        }
        scripted.result
    }
}

// ---------------------------------------------------------------------------
// MemoryArtifactStore
// ---------------------------------------------------------------------------

/// Artifact store that keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    records: Mutex<Vec<ArtifactRecord>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ArtifactRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, record: &ArtifactRecord) -> Result<StoredArtifact> {
        self.records.lock().unwrap().push(record.clone());
        Ok(StoredArtifact {
            location: format!("memory://{}", record.filename),
        })
    }
}

// ---------------------------------------------------------------------------
// FailingArtifactStore
// ---------------------------------------------------------------------------

/// Artifact store whose writes always fail.
#[derive(Debug, Default)]
pub struct FailingArtifactStore;

#[async_trait]
impl ArtifactStore for FailingArtifactStore {
    async fn put(&self, _record: &ArtifactRecord) -> Result<StoredArtifact> {
        Err(SightError::PersistenceFailed {
            detail: "store unavailable".to_string(),
        })
    }
}
