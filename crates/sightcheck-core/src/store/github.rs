//! GitHub contents API store
//!
//! Each record becomes one committed file under the configured directory;
//! the record summary is the commit message.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{ArtifactRecord, ArtifactStore, StoredArtifact};
use crate::config::{ConfigError, StoreConfig};
use crate::error::{Result, SightError};
use crate::transport::{HttpRequest, Transport};

/// Artifact store writing to a repository through the contents API.
pub struct GithubContentsStore {
    config: StoreConfig,
    token: String,
    transport: Arc<dyn Transport>,
}

#[derive(Deserialize)]
struct ContentsResponse {
    content: ContentEntry,
}

#[derive(Deserialize)]
struct ContentEntry {
    html_url: String,
}

impl GithubContentsStore {
    pub fn new(config: StoreConfig, token: &str, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            token: token.to_string(),
            transport,
        }
    }

    /// Build the store, reading the token from the variable named by `token_ref`.
    pub fn from_config(config: StoreConfig, transport: Arc<dyn Transport>) -> std::result::Result<Self, ConfigError> {
        let token = std::env::var(&config.token_ref)
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ConfigError::MissingSecret {
                provider: "store".to_string(),
                var: config.token_ref.clone(),
            })?;
        Ok(Self::new(config, &token, transport))
    }

    /// Contents API URL for a filename.
    pub fn url_for(&self, filename: &str) -> String {
        format!(
            "{}/repos/{}/contents/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.repo,
            self.config.directory.trim_matches('/'),
            filename
        )
    }
}

#[async_trait]
impl ArtifactStore for GithubContentsStore {
    async fn put(&self, record: &ArtifactRecord) -> Result<StoredArtifact> {
        let url = self.url_for(&record.filename);
        let body = json!({
            "message": record.message,
            "content": base64::engine::general_purpose::STANDARD.encode(&record.bytes),
        });
        let request = HttpRequest::put(&url)
            .header("Authorization", format!("token {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .json(&body);

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| SightError::PersistenceFailed {
                detail: e.to_string(),
            })?;

        if !response.is_success() {
            warn!(status = response.status, body = %response.text(), "artifact store rejected write");
            return Err(SightError::PersistenceFailed {
                detail: format!("status {}", response.status),
            });
        }

        let parsed: ContentsResponse =
            response
                .parse_json()
                .map_err(|e| SightError::PersistenceFailed {
                    detail: format!("unexpected store response: {e}"),
                })?;
        debug!(location = %parsed.content.html_url, "artifact stored");

        Ok(StoredArtifact {
            location: parsed.content.html_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fakes::ScriptedTransport;
    use crate::transport::{HttpMethod, HttpResponse};

    fn config() -> StoreConfig {
        StoreConfig {
            api_base: "https://gh.example/".into(),
            repo: "acme/uploads".into(),
            token_ref: "UNUSED".into(),
            directory: "/uploads/".into(),
        }
    }

    fn record() -> ArtifactRecord {
        ArtifactRecord {
            filename: "2024-01-01T00:00:00.000Z_a.jpg".into(),
            message: "Analysis: REAL (100%)".into(),
            bytes: b"abc".to_vec(),
        }
    }

    const URL: &str = "https://gh.example/repos/acme/uploads/contents/uploads/2024-01-01T00:00:00.000Z_a.jpg";

    #[tokio::test]
    async fn put_sends_message_and_base64_content() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            HttpMethod::Put,
            URL,
            HttpResponse::json(201, json!({"content": {"html_url": "https://gh.example/blob/a.jpg"}})),
        );
        let store = GithubContentsStore::new(config(), "pat", transport.clone());

        let stored = store.put(&record()).await.unwrap();
        assert_eq!(stored.location, "https://gh.example/blob/a.jpg");

        let sent = &transport.requests()[0];
        let body: serde_json::Value = serde_json::from_slice(sent.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["message"], "Analysis: REAL (100%)");
        assert_eq!(body["content"], "YWJj");
        assert!(sent
            .headers
            .iter()
            .any(|(k, v)| k == "Authorization" && v == "token pat"));
    }

    #[tokio::test]
    async fn rejected_write_is_persistence_failed() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(HttpMethod::Put, URL, HttpResponse::new(422, "sha missing"));
        let store = GithubContentsStore::new(config(), "pat", transport);

        let err = store.put(&record()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PersistenceFailed);
    }
}
