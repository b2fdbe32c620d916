//! Fan-out Aggregator
//!
//! Runs every configured adapter concurrently against the same image and
//! waits for all of them:
//! - no failure short-circuits the others
//! - each provider is bounded by its own deadline
//! - outcomes keep configuration order, whatever order calls complete in
//! - the first successful outcome in configuration order is the primary verdict

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::error::{ErrorKind, Result, SightError};
use crate::ingest::ImageArtifact;
use crate::obs;
use crate::provider::{invoke, ProviderAdapter};
use crate::verdict::{normalize, Verdict};

/// Result of one adapter invocation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProviderOutcome {
    Verdict {
        provider_id: String,
        verdict: Verdict,
    },
    Failed {
        provider_id: String,
        error: ErrorKind,
        message: String,
    },
}

impl ProviderOutcome {
    fn from_result(provider_id: &str, result: Result<Verdict>) -> Self {
        match result {
            Ok(verdict) => ProviderOutcome::Verdict {
                provider_id: provider_id.to_string(),
                verdict,
            },
            Err(e) => ProviderOutcome::Failed {
                provider_id: provider_id.to_string(),
                error: e.kind(),
                message: e.to_string(),
            },
        }
    }

    pub fn provider_id(&self) -> &str {
        match self {
            ProviderOutcome::Verdict { provider_id, .. }
            | ProviderOutcome::Failed { provider_id, .. } => provider_id,
        }
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            ProviderOutcome::Verdict { verdict, .. } => Some(verdict),
            ProviderOutcome::Failed { .. } => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ProviderOutcome::Verdict { .. } => None,
            ProviderOutcome::Failed { error, .. } => Some(*error),
        }
    }
}

/// Outcomes of one request plus the verdict chosen to represent them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedResult {
    /// One entry per configured provider, in configuration order.
    pub outcomes: Vec<ProviderOutcome>,
    pub primary_verdict: Verdict,
    pub primary_provider: String,
}

impl AggregatedResult {
    fn from_outcomes(outcomes: Vec<ProviderOutcome>) -> Result<Self> {
        let primary = outcomes
            .iter()
            .find_map(|o| o.verdict().map(|v| (o.provider_id().to_string(), *v)));

        match primary {
            Some((primary_provider, primary_verdict)) => Ok(Self {
                outcomes,
                primary_verdict,
                primary_provider,
            }),
            None => {
                let detail = outcomes
                    .iter()
                    .map(|o| match o {
                        ProviderOutcome::Failed {
                            provider_id, error, ..
                        } => format!("{provider_id}: {error}"),
                        ProviderOutcome::Verdict { provider_id, .. } => provider_id.clone(),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(SightError::AllProvidersFailed { detail })
            }
        }
    }

    /// More than one provider was queried.
    pub fn is_multi_provider(&self) -> bool {
        self.outcomes.len() > 1
    }
}

/// Provider tasks owned by one `fan_out` call; dropping it cancels them.
struct AbortOnDrop(Vec<JoinHandle<Result<Verdict>>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

/// Invoke one adapter under its deadline and normalize its answer.
pub async fn classify_with(adapter: &dyn ProviderAdapter, image: &ImageArtifact) -> Result<Verdict> {
    let spec = adapter.spec();
    let raw = invoke(adapter, image).await?;
    normalize(&spec.id, &raw, &spec.effective_labels())
}

/// Classify `image` with every adapter and combine the outcomes.
///
/// With a single adapter this is a direct call: its error is returned as-is.
/// With several, individual failures become `Failed` outcomes and only a
/// total failure is an error (`ALL_PROVIDERS_FAILED`).
#[instrument(skip_all, fields(providers = adapters.len()))]
pub async fn fan_out(
    image: Arc<ImageArtifact>,
    adapters: &[Arc<dyn ProviderAdapter>],
) -> Result<AggregatedResult> {
    if adapters.is_empty() {
        return Err(SightError::AllProvidersFailed {
            detail: "no providers configured".to_string(),
        });
    }

    if let [adapter] = adapters {
        let id = adapter.spec().id.clone();
        let result = classify_with(adapter.as_ref(), &image).await;
        let outcome = ProviderOutcome::from_result(&id, result.clone());
        obs::emit_provider_outcome(&outcome);
        let verdict = result?;
        return Ok(AggregatedResult {
            outcomes: vec![outcome],
            primary_verdict: verdict,
            primary_provider: id,
        });
    }

    let ids: Vec<String> = adapters.iter().map(|a| a.spec().id.clone()).collect();
    let mut tasks = AbortOnDrop(
        adapters
            .iter()
            .map(|adapter| {
                let adapter = Arc::clone(adapter);
                let image = Arc::clone(&image);
                tokio::spawn(async move { classify_with(adapter.as_ref(), &image).await })
            })
            .collect(),
    );

    // join_all yields results in input order, whatever order tasks finish in.
    let joined = join_all(tasks.0.iter_mut()).await;
    let mut outcomes = Vec::with_capacity(joined.len());
    for (id, joined) in ids.iter().zip(joined) {
        let result = joined.unwrap_or_else(|join_err| {
            warn!(provider = %id, error = %join_err, "provider task aborted");
            Err(SightError::provider(id, format!("task aborted: {join_err}")))
        });
        let outcome = ProviderOutcome::from_result(id, result);
        obs::emit_provider_outcome(&outcome);
        outcomes.push(outcome);
    }

    let aggregated = AggregatedResult::from_outcomes(outcomes)?;
    info!(
        primary = %aggregated.primary_provider,
        verdict = %aggregated.primary_verdict,
        failed = aggregated.outcomes.iter().filter(|o| o.verdict().is_none()).count(),
        "providers aggregated"
    );
    Ok(aggregated)
}
