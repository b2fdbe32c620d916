//! Provider adapters.
//!
//! One [`ProviderAdapter`] per configured provider, chosen by
//! [`ProviderKind`]:
//!
//! - [`sync`]: binary classifier answering with a ranked label list
//! - [`poll`]: job queue driven by the [`poll::PollState`] machine
//! - [`prompt`]: generative model prompted for a REAL/FAKE answer
//!
//! Adapters only produce a [`RawVerdict`]; mapping to the canonical verdict
//! happens in [`crate::verdict::normalize`].

pub mod poll;
pub mod prompt;
pub mod sync;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::config::{Config, ConfigError, ProviderKind, ProviderSpec};
use crate::error::{Result, SightError};
use crate::ingest::ImageArtifact;
use crate::transport::{HttpResponse, Transport, TransportError};
use crate::verdict::RawVerdict;

pub use poll::{JobStatus, PollJobAdapter, PollState};
pub use prompt::{parse_prompt_answer, PromptAdapter, FORENSIC_JSON_PROMPT, SINGLE_WORD_PROMPT};
pub use sync::SyncAdapter;

/// Translates one provider's protocol into a [`RawVerdict`].
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Static configuration this adapter was built from.
    fn spec(&self) -> &ProviderSpec;

    /// Classify one image. Does not enforce `timeout_ms`; see [`invoke`].
    async fn classify(&self, image: &ImageArtifact) -> Result<RawVerdict>;
}

/// Run an adapter under its configured deadline.
///
/// When the deadline passes the in-flight call is dropped and any late
/// response is discarded.
pub async fn invoke(adapter: &dyn ProviderAdapter, image: &ImageArtifact) -> Result<RawVerdict> {
    let spec = adapter.spec();
    match tokio::time::timeout(spec.timeout(), adapter.classify(image)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(provider = %spec.id, timeout_ms = spec.timeout_ms, "provider deadline exceeded");
            Err(SightError::Timeout {
                provider: spec.id.clone(),
                elapsed_ms: spec.timeout_ms,
            })
        }
    }
}

/// Build the adapter for one provider with an already-resolved secret.
pub fn build_adapter(
    spec: ProviderSpec,
    secret: Option<String>,
    transport: Arc<dyn Transport>,
) -> Arc<dyn ProviderAdapter> {
    match spec.kind {
        ProviderKind::Sync => Arc::new(SyncAdapter::new(spec, secret, transport)),
        ProviderKind::PollJob => Arc::new(PollJobAdapter::new(spec, secret, transport)),
        ProviderKind::Prompt => Arc::new(PromptAdapter::new(spec, secret, transport)),
    }
}

/// Build every configured adapter, in configuration order.
///
/// Secrets are resolved through `lookup` once, here; a missing secret is a
/// startup error.
pub fn build_adapters<F>(
    config: &Config,
    transport: Arc<dyn Transport>,
    lookup: F,
) -> std::result::Result<Vec<Arc<dyn ProviderAdapter>>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    config
        .providers
        .iter()
        .map(|spec| {
            let secret = spec.resolve_secret_with(&lookup)?;
            Ok(build_adapter(spec.clone(), secret, Arc::clone(&transport)))
        })
        .collect()
}

/// Map a transport failure onto the taxonomy.
pub(crate) fn transport_failure(spec: &ProviderSpec, err: TransportError) -> SightError {
    match err {
        TransportError::Timeout => SightError::Timeout {
            provider: spec.id.clone(),
            elapsed_ms: spec.timeout_ms,
        },
        TransportError::Network(detail) => SightError::provider(&spec.id, detail),
    }
}

/// Reject non-success responses with a short body excerpt.
pub(crate) fn ensure_success(spec: &ProviderSpec, response: &HttpResponse) -> Result<()> {
    if response.is_success() {
        return Ok(());
    }
    let body: String = response.text().chars().take(200).collect();
    Err(SightError::provider(
        &spec.id,
        format!("status {}: {}", response.status, body),
    ))
}
