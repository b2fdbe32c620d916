//! Synchronous binary-classifier adapter.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{ensure_success, transport_failure, ProviderAdapter};
use crate::config::{ProviderKind, ProviderSpec};
use crate::error::{Result, SightError};
use crate::ingest::ImageArtifact;
use crate::transport::{HttpRequest, Transport};
use crate::verdict::RawVerdict;

#[derive(Debug, Clone, Deserialize)]
struct ScoredLabel {
    label: String,
    score: f64,
}

/// Some inference endpoints wrap the ranking in an extra list.
#[derive(Deserialize)]
#[serde(untagged)]
enum Ranking {
    Flat(Vec<ScoredLabel>),
    Nested(Vec<Vec<ScoredLabel>>),
}

/// POSTs the raw image bytes and picks the highest-scoring label.
pub struct SyncAdapter {
    spec: ProviderSpec,
    token: Option<String>,
    transport: Arc<dyn Transport>,
}

impl SyncAdapter {
    pub fn new(spec: ProviderSpec, token: Option<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            spec,
            token,
            transport,
        }
    }
}

#[async_trait]
impl ProviderAdapter for SyncAdapter {
    fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    #[instrument(skip_all, fields(provider = %self.spec.id))]
    async fn classify(&self, image: &ImageArtifact) -> Result<RawVerdict> {
        let request = HttpRequest::post(&self.spec.endpoint)
            .bearer(self.token.as_deref())
            .body(&image.mime_type, image.bytes.clone());

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| transport_failure(&self.spec, e))?;
        ensure_success(&self.spec, &response)?;

        let ranking: Ranking = response
            .parse_json()
            .map_err(|e| SightError::unparseable(&self.spec.id, e.to_string()))?;
        let labels = match ranking {
            Ranking::Flat(list) => list,
            Ranking::Nested(lists) => lists.into_iter().flatten().collect(),
        };

        let best = labels
            .into_iter()
            .filter(|l| l.score.is_finite())
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .ok_or_else(|| SightError::provider(&self.spec.id, "empty label list"))?;
        debug!(label = %best.label, score = best.score, "top label");

        Ok(RawVerdict::Scored {
            kind: ProviderKind::Sync,
            label: best.label,
            score: best.score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fakes::ScriptedTransport;
    use crate::transport::{HttpMethod, HttpResponse};
    use serde_json::json;

    const ENDPOINT: &str = "https://hf.example/models/detector";

    fn adapter(transport: Arc<ScriptedTransport>) -> SyncAdapter {
        SyncAdapter::new(
            ProviderSpec::new("hf", ProviderKind::Sync, ENDPOINT),
            Some("tok".into()),
            transport,
        )
    }

    fn image() -> ImageArtifact {
        ImageArtifact::new(vec![0xff, 0xd8], "image/jpeg", "a.jpg")
    }

    #[tokio::test]
    async fn picks_maximum_score() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            HttpMethod::Post,
            ENDPOINT,
            HttpResponse::json(
                200,
                json!([
                    {"label": "artificial", "score": 0.18},
                    {"label": "real-world", "score": 0.82}
                ]),
            ),
        );

        let raw = adapter(transport.clone()).classify(&image()).await.unwrap();
        assert_eq!(
            raw,
            RawVerdict::Scored {
                kind: ProviderKind::Sync,
                label: "real-world".into(),
                score: 0.82
            }
        );

        let sent = &transport.requests()[0];
        assert_eq!(sent.body.as_deref(), Some(&[0xff, 0xd8][..]));
        assert!(sent
            .headers
            .iter()
            .any(|(k, v)| k == "Authorization" && v == "Bearer tok"));
    }

    #[tokio::test]
    async fn accepts_nested_ranking() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            HttpMethod::Post,
            ENDPOINT,
            HttpResponse::json(200, json!([[{"label": "human", "score": 0.6}]])),
        );

        let raw = adapter(transport).classify(&image()).await.unwrap();
        assert!(matches!(raw, RawVerdict::Scored { ref label, .. } if label == "human"));
    }

    #[tokio::test]
    async fn empty_list_is_provider_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(HttpMethod::Post, ENDPOINT, HttpResponse::json(200, json!([])));

        let err = adapter(transport).classify(&image()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderError);
    }

    #[tokio::test]
    async fn non_success_is_provider_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            HttpMethod::Post,
            ENDPOINT,
            HttpResponse::json(503, json!({"error": "model loading"})),
        );

        let err = adapter(transport).classify(&image()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderError);
        assert!(err.to_string().contains("503"));
    }
}
