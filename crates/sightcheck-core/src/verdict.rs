//! Verdict vocabulary and normalization.
//!
//! Providers answer in their own vocabulary (`"real-world"`, `"FAKE"`, a
//! JSON blob from a job queue). [`normalize`] maps each [`RawVerdict`] onto
//! the canonical [`Verdict`] using the provider's configured label map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::ProviderKind;
use crate::error::{Result, SightError};

/// Canonical classification label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Label {
    Real,
    Artificial,
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Label::Real => write!(f, "REAL"),
            Label::Artificial => write!(f, "ARTIFICIAL"),
        }
    }
}

/// Native label (matched case-insensitively) to canonical label.
pub type LabelMap = BTreeMap<String, Label>;

/// Confidence reported when a provider has no native score.
pub const CATEGORICAL_CONFIDENCE: f64 = 100.0;

/// Normalized verdict. `confidence` is a percentage in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub label: Label,
    pub confidence: f64,
}

impl Verdict {
    pub fn new(label: Label, confidence: f64) -> Self {
        Self { label, confidence }
    }

    pub fn categorical(label: Label) -> Self {
        Self::new(label, CATEGORICAL_CONFIDENCE)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}%)", self.label, self.confidence)
    }
}

/// Provider answer before normalization, tagged with the protocol that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawVerdict {
    /// Native label with a score in `[0, 1]`.
    Scored {
        kind: ProviderKind,
        label: String,
        score: f64,
    },
    /// Native label without a confidence.
    Categorical { kind: ProviderKind, label: String },
    /// Unstructured job output.
    Json {
        kind: ProviderKind,
        payload: serde_json::Value,
    },
}

impl RawVerdict {
    pub fn kind(&self) -> ProviderKind {
        match self {
            RawVerdict::Scored { kind, .. }
            | RawVerdict::Categorical { kind, .. }
            | RawVerdict::Json { kind, .. } => *kind,
        }
    }
}

/// Default label vocabulary for a provider kind.
pub fn default_labels(kind: ProviderKind) -> LabelMap {
    let pairs: &[(&str, Label)] = match kind {
        ProviderKind::Sync => &[
            ("real", Label::Real),
            ("human", Label::Real),
            ("artificial", Label::Artificial),
        ],
        ProviderKind::PollJob => &[
            ("real", Label::Real),
            ("fake", Label::Artificial),
            ("artificial", Label::Artificial),
        ],
        ProviderKind::Prompt => &[
            ("REAL", Label::Real),
            ("FAKE", Label::Artificial),
            ("ARTIFICIAL", Label::Artificial),
        ],
    };
    pairs
        .iter()
        .map(|(native, label)| (native.to_string(), *label))
        .collect()
}

/// Scale a `[0, 1]` score to a percentage rounded to two decimals.
pub fn score_to_percentage(score: f64) -> f64 {
    (score.clamp(0.0, 1.0) * 10_000.0).round() / 100.0
}

fn lookup_label(provider: &str, labels: &LabelMap, native: &str) -> Result<Label> {
    let native = native.trim();
    labels
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(native))
        .map(|(_, v)| *v)
        .ok_or_else(|| SightError::UnknownLabel {
            provider: provider.to_string(),
            label: native.to_string(),
        })
}

/// Map a provider's raw answer onto the canonical verdict.
pub fn normalize(provider: &str, raw: &RawVerdict, labels: &LabelMap) -> Result<Verdict> {
    match raw {
        RawVerdict::Scored { label, score, .. } => {
            if !score.is_finite() {
                return Err(SightError::unparseable(provider, "score is not a number"));
            }
            let label = lookup_label(provider, labels, label)?;
            Ok(Verdict::new(label, score_to_percentage(*score)))
        }
        RawVerdict::Categorical { label, .. } => {
            Ok(Verdict::categorical(lookup_label(provider, labels, label)?))
        }
        RawVerdict::Json { kind, payload } => {
            let inner = interpret_payload(provider, *kind, payload)?;
            normalize(provider, &inner, labels)
        }
    }
}

/// Reduce a job output blob to a scored or categorical answer.
fn interpret_payload(
    provider: &str,
    kind: ProviderKind,
    payload: &serde_json::Value,
) -> Result<RawVerdict> {
    use serde_json::Value;

    match payload {
        Value::String(s) if !s.trim().is_empty() => Ok(RawVerdict::Categorical {
            kind,
            label: s.trim().to_string(),
        }),
        Value::Object(map) => {
            let label = map
                .get("label")
                .or_else(|| map.get("final_verdict"))
                .and_then(Value::as_str)
                .ok_or_else(|| SightError::unparseable(provider, "output has no label"))?;
            match map.get("score").and_then(Value::as_f64) {
                Some(score) => Ok(RawVerdict::Scored {
                    kind,
                    label: label.to_string(),
                    score,
                }),
                None => Ok(RawVerdict::Categorical {
                    kind,
                    label: label.to_string(),
                }),
            }
        }
        Value::Array(items) if !items.is_empty() => {
            if items.len() == 1 {
                return interpret_payload(provider, kind, &items[0]);
            }
            let ranked = items
                .iter()
                .filter_map(|item| {
                    let label = item.get("label")?.as_str()?;
                    let score = item.get("score")?.as_f64()?;
                    Some((label, score))
                })
                .max_by(|a, b| a.1.total_cmp(&b.1));
            match ranked {
                Some((label, score)) => Ok(RawVerdict::Scored {
                    kind,
                    label: label.to_string(),
                    score,
                }),
                None => Err(SightError::unparseable(
                    provider,
                    "output list has no scored labels",
                )),
            }
        }
        other => Err(SightError::unparseable(
            provider,
            format!("unrecognized output {other}"),
        )),
    }
}
