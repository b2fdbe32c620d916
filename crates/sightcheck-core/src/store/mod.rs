//! Artifact store abstraction.
//!
//! After classification the image and a human-readable verdict summary are
//! handed to an [`ArtifactStore`]. Writes are best-effort: the pipeline logs
//! a failed write and still returns the verdict.

pub mod github;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::Result;

/// Record handed to the store for one analysed image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    /// `<timestamp>_<sanitized original name>`
    pub filename: String,
    /// Change description, e.g. `Analysis: REAL (82%)`.
    pub message: String,
    pub bytes: Vec<u8>,
}

/// Where the store put the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub location: String,
}

/// Persists analysed images.
///
/// Implementations fail with `SightError::PersistenceFailed`.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, record: &ArtifactRecord) -> Result<StoredArtifact>;
}

/// Replace every character that is not ASCII alphanumeric or `.` with `_`.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned
    }
}

/// Timestamped storage name for an upload.
pub fn artifact_filename(at: DateTime<Utc>, original_name: &str) -> String {
    format!(
        "{}_{}",
        at.to_rfc3339_opts(SecondsFormat::Millis, true),
        sanitize_filename(original_name)
    )
}
