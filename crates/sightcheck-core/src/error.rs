//! Error taxonomy for the classification pipeline.

use serde::{Deserialize, Serialize};

/// Typed failure category. Every failure path produces exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NoInput,
    FetchFailed,
    ProviderError,
    Timeout,
    UnparseableResponse,
    UnknownLabel,
    AllProvidersFailed,
    PersistenceFailed,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::NoInput => "NO_INPUT",
            ErrorKind::FetchFailed => "FETCH_FAILED",
            ErrorKind::ProviderError => "PROVIDER_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::UnparseableResponse => "UNPARSEABLE_RESPONSE",
            ErrorKind::UnknownLabel => "UNKNOWN_LABEL",
            ErrorKind::AllProvidersFailed => "ALL_PROVIDERS_FAILED",
            ErrorKind::PersistenceFailed => "PERSISTENCE_FAILED",
        };
        f.write_str(s)
    }
}

/// Errors produced while ingesting, classifying or persisting an image.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SightError {
    #[error("no file or URL provided")]
    NoInput,

    #[error("could not fetch image: {detail}")]
    FetchFailed { detail: String },

    #[error("provider {provider} failed: {detail}")]
    ProviderError { provider: String, detail: String },

    #[error("provider {provider} timed out after {elapsed_ms}ms")]
    Timeout { provider: String, elapsed_ms: u64 },

    #[error("unexpected response from {provider}: {detail}")]
    UnparseableResponse { provider: String, detail: String },

    #[error("provider {provider} returned unmapped label {label:?}")]
    UnknownLabel { provider: String, label: String },

    #[error("all providers failed: {detail}")]
    AllProvidersFailed { detail: String },

    #[error("could not save the image to the artifact store: {detail}")]
    PersistenceFailed { detail: String },
}

impl SightError {
    /// The taxonomy entry for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SightError::NoInput => ErrorKind::NoInput,
            SightError::FetchFailed { .. } => ErrorKind::FetchFailed,
            SightError::ProviderError { .. } => ErrorKind::ProviderError,
            SightError::Timeout { .. } => ErrorKind::Timeout,
            SightError::UnparseableResponse { .. } => ErrorKind::UnparseableResponse,
            SightError::UnknownLabel { .. } => ErrorKind::UnknownLabel,
            SightError::AllProvidersFailed { .. } => ErrorKind::AllProvidersFailed,
            SightError::PersistenceFailed { .. } => ErrorKind::PersistenceFailed,
        }
    }

    pub(crate) fn provider(provider: &str, detail: impl Into<String>) -> Self {
        SightError::ProviderError {
            provider: provider.to_string(),
            detail: detail.into(),
        }
    }

    pub(crate) fn unparseable(provider: &str, detail: impl Into<String>) -> Self {
        SightError::UnparseableResponse {
            provider: provider.to_string(),
            detail: detail.into(),
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, SightError>;
