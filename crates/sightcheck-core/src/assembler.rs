//! Result assembly: caller-facing response and artifact-store record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::aggregator::{AggregatedResult, ProviderOutcome};
use crate::error::{ErrorKind, SightError};
use crate::ingest::ImageArtifact;
use crate::store::{artifact_filename, ArtifactRecord};
use crate::verdict::Verdict;

/// Successful classification payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    /// Single-provider verdict.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction: Option<Verdict>,
    /// Multi-provider mode: one `<providerId>Prediction` entry per provider.
    #[serde(flatten)]
    pub provider_predictions: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_provider: Option<String>,
    /// The analysed image as a data URI.
    pub image_url: String,
    /// Artifact-store location; `null` when the write failed.
    pub file_url: Option<String>,
}

/// Body returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ClassificationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ClassificationResponse {
    pub fn failure(err: &SightError) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
        }
    }
}

fn outcome_json(outcome: &ProviderOutcome) -> Value {
    match outcome {
        ProviderOutcome::Verdict { verdict, .. } => json!(verdict),
        ProviderOutcome::Failed { error, message, .. } => json!({
            "error": message,
            "kind": error,
        }),
    }
}

/// Build the success body for an aggregated result.
pub fn success_response(
    image: &ImageArtifact,
    aggregated: &AggregatedResult,
    file_url: Option<String>,
) -> ClassificationResponse {
    let mut result = ClassificationResult {
        prediction: None,
        provider_predictions: Map::new(),
        primary_provider: None,
        image_url: image.data_uri(),
        file_url,
    };

    if aggregated.is_multi_provider() {
        for outcome in &aggregated.outcomes {
            result.provider_predictions.insert(
                format!("{}Prediction", outcome.provider_id()),
                outcome_json(outcome),
            );
        }
        result.primary_provider = Some(aggregated.primary_provider.clone());
    } else {
        result.prediction = Some(aggregated.primary_verdict);
    }

    ClassificationResponse {
        success: true,
        result: Some(result),
        error: None,
        error_kind: None,
    }
}

/// Human-readable summary used as the store's change description.
pub fn summarize(aggregated: &AggregatedResult) -> String {
    let primary = format!("Analysis: {}", aggregated.primary_verdict);
    if !aggregated.is_multi_provider() {
        return primary;
    }

    let each: Vec<String> = aggregated
        .outcomes
        .iter()
        .map(|o| match o {
            ProviderOutcome::Verdict {
                provider_id,
                verdict,
            } => format!("{provider_id}: {verdict}"),
            ProviderOutcome::Failed {
                provider_id, error, ..
            } => format!("{provider_id}: {error}"),
        })
        .collect();
    format!("{primary} [{}]", each.join(", "))
}

/// Record handed to the artifact store.
pub fn build_record(
    image: &ImageArtifact,
    aggregated: &AggregatedResult,
    at: DateTime<Utc>,
) -> ArtifactRecord {
    ArtifactRecord {
        filename: artifact_filename(at, &image.source_name),
        message: summarize(aggregated),
        bytes: image.bytes.clone(),
    }
}
