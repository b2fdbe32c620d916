//! Structured observability hooks for the classification pipeline.
//!
//! This module provides:
//! - Request-scoped tracing spans via [`request_span`]
//! - Emission functions for key lifecycle events: request start, provider
//!   outcome, persistence failure, request finish
//!
//! Events are emitted at `info!` level (`warn!` for failures); filter them
//! with `RUST_LOG`.

use tracing::{info, warn};

use crate::aggregator::ProviderOutcome;

/// Span tagging every event of one request with its id.
///
/// Attach it with `tracing::Instrument::instrument` so it follows the
/// request across `.await` points.
pub fn request_span(request_id: &str) -> tracing::Span {
    tracing::info_span!("sightcheck.request", request_id = %request_id)
}

/// Emit event: image ingested and about to be classified.
pub fn emit_request_started(source_name: &str, mime_type: &str, size: usize, digest: &str) {
    info!(
        event = "request.started",
        source = %source_name,
        mime = %mime_type,
        size = size,
        digest = %digest,
    );
}

/// Emit event: one provider reached a terminal outcome.
pub fn emit_provider_outcome(outcome: &ProviderOutcome) {
    match outcome {
        ProviderOutcome::Verdict {
            provider_id,
            verdict,
        } => info!(
            event = "provider.verdict",
            provider = %provider_id,
            label = %verdict.label,
            confidence = verdict.confidence,
        ),
        ProviderOutcome::Failed {
            provider_id,
            error,
            message,
        } => warn!(
            event = "provider.failed",
            provider = %provider_id,
            kind = %error,
            error = %message,
        ),
    }
}

/// Emit event: the artifact store rejected the record (warning level).
pub fn emit_persistence_failed(filename: &str, error: &dyn std::fmt::Display) {
    warn!(event = "store.failed", filename = %filename, error = %error);
}

/// Emit event: request finished, successfully or not.
pub fn emit_request_finished(duration_ms: u64, success: bool) {
    info!(
        event = "request.finished",
        duration_ms = duration_ms,
        success = success,
    );
}
