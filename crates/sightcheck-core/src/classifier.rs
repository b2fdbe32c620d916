//! Request pipeline: ingest, fan out, assemble, persist.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, Instrument};

use crate::aggregator::{fan_out, AggregatedResult};
use crate::assembler::{build_record, success_response, ClassificationResponse};
use crate::config::{Config, ConfigError, ProviderSpec};
use crate::error::{Result, SightError};
use crate::ingest::{ingest, proxy_image, ImageArtifact, ImageInput};
use crate::obs;
use crate::provider::{build_adapters, ProviderAdapter};
use crate::store::github::GithubContentsStore;
use crate::store::{ArtifactStore, StoredArtifact};
use crate::transport::{ReqwestTransport, Transport};

/// Everything produced for one successful request.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub image: Arc<ImageArtifact>,
    pub aggregated: AggregatedResult,
    /// `None` when no store is configured or the write failed.
    pub stored: Option<StoredArtifact>,
    pub response: ClassificationResponse,
}

/// Deadline for image fetches and store writes unless configured otherwise.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(60);

/// Process-wide classification service. Built once at startup, read-only after.
pub struct Classifier {
    transport: Arc<dyn Transport>,
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    store: Option<Arc<dyn ArtifactStore>>,
    io_timeout: Duration,
}

impl Classifier {
    pub fn new(
        transport: Arc<dyn Transport>,
        adapters: Vec<Arc<dyn ProviderAdapter>>,
        store: Option<Arc<dyn ArtifactStore>>,
    ) -> Self {
        Self {
            transport,
            adapters,
            store,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// Bound image fetches and store writes; providers keep their own deadlines.
    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Wire the production transport, adapters and store from configuration.
    pub fn from_config(config: &Config) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let transport: Arc<dyn Transport> = Arc::new(
            ReqwestTransport::new(
                &config.http.user_agent,
                Duration::from_millis(config.http.connect_timeout_ms),
                config.http.request_timeout(),
            )
            .map_err(|e| ConfigError::Invalid(format!("http client: {e}")))?,
        );

        let adapters = build_adapters(config, Arc::clone(&transport), |var| {
            std::env::var(var).ok()
        })?;

        let store = match &config.store {
            Some(store_config) => {
                let store = GithubContentsStore::from_config(store_config.clone(), Arc::clone(&transport))?;
                Some(Arc::new(store) as Arc<dyn ArtifactStore>)
            }
            None => None,
        };

        Ok(Self::new(transport, adapters, store).with_io_timeout(config.http.request_timeout()))
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    /// Provider configuration in dispatch order.
    pub fn providers(&self) -> Vec<&ProviderSpec> {
        self.adapters.iter().map(|a| a.spec()).collect()
    }

    /// Ingest, classify and persist one image.
    ///
    /// Ingestion failures and classification failures are returned; a
    /// failed store write is only logged.
    pub async fn classify(&self, input: ImageInput) -> Result<Analysis> {
        let image = tokio::time::timeout(self.io_timeout, ingest(self.transport.as_ref(), input))
            .await
            .map_err(|_| self.fetch_timed_out())??;
        let image = Arc::new(image);
        obs::emit_request_started(
            &image.source_name,
            &image.mime_type,
            image.bytes.len(),
            &image.digest(),
        );

        let aggregated = fan_out(Arc::clone(&image), &self.adapters).await?;
        let stored = self.persist(&image, &aggregated).await;
        let file_url = stored.as_ref().map(|s| s.location.clone());
        let response = success_response(&image, &aggregated, file_url);

        Ok(Analysis {
            image,
            aggregated,
            stored,
            response,
        })
    }

    /// Like [`Classifier::classify`], but folds every failure into the
    /// `{ success: false, error }` body.
    pub async fn analyze(&self, input: ImageInput) -> ClassificationResponse {
        let request_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();

        async move {
            let response = match self.classify(input).await {
                Ok(analysis) => analysis.response,
                Err(e) => {
                    info!(kind = %e.kind(), error = %e, "request failed");
                    ClassificationResponse::failure(&e)
                }
            };
            obs::emit_request_finished(started.elapsed().as_millis() as u64, response.success);
            response
        }
        .instrument(obs::request_span(&request_id))
        .await
    }

    /// Fetch a remote image and return it as a data URI.
    pub async fn proxy(&self, url: &str) -> Result<String> {
        tokio::time::timeout(self.io_timeout, proxy_image(self.transport.as_ref(), url))
            .await
            .map_err(|_| self.fetch_timed_out())?
    }

    fn fetch_timed_out(&self) -> SightError {
        SightError::FetchFailed {
            detail: format!("no response within {}ms", self.io_timeout.as_millis()),
        }
    }

    async fn persist(&self, image: &ImageArtifact, aggregated: &AggregatedResult) -> Option<StoredArtifact> {
        let Some(store) = &self.store else {
            debug!("no artifact store configured");
            return None;
        };

        let record = build_record(image, aggregated, chrono::Utc::now());
        let put = tokio::time::timeout(self.io_timeout, store.put(&record))
            .await
            .unwrap_or_else(|_| {
                Err(SightError::PersistenceFailed {
                    detail: format!("store did not answer within {}ms", self.io_timeout.as_millis()),
                })
            });
        match put {
            Ok(stored) => {
                info!(location = %stored.location, "artifact stored");
                Some(stored)
            }
            Err(e) => {
                obs::emit_persistence_failed(&record.filename, &e);
                None
            }
        }
    }
}
