//! Generative-model adapter.
//!
//! The model is asked for a REAL/FAKE judgement. Its answer arrives as free
//! text, possibly wrapped in a fenced code block, and is reduced to a single
//! token by [`parse_prompt_answer`]. Answers that name both sides, or
//! neither, are rejected rather than guessed.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use super::{ensure_success, transport_failure, ProviderAdapter};
use crate::config::{ProviderKind, ProviderSpec};
use crate::error::{Result, SightError};
use crate::ingest::ImageArtifact;
use crate::transport::{HttpRequest, Transport};
use crate::verdict::RawVerdict;

/// Asks for a bare one-word answer.
pub const SINGLE_WORD_PROMPT: &str = "Analyze this image. Is it a real photograph or is it AI-generated? \
Please respond with only the single word REAL or the single word FAKE.";

/// Asks for a forensic judgement as a small JSON object.
pub const FORENSIC_JSON_PROMPT: &str = "You are a world-leading expert in digital image forensics. \
Examine the attached image for signs of synthesis: inconsistent lighting and shadows, malformed hands \
or text, repeated textures, and unnaturally uniform compression artifacts. \
Is the image REAL or FAKE? Respond with a JSON object containing one key: \"final_verdict\", \
with a value of either \"REAL\" or \"FAKE\".";

const REAL_TOKEN: &str = "REAL";
const FAKE_TOKEN: &str = "FAKE";
const CANONICAL_FAKE: &str = "ARTIFICIAL";

/// A fenced block whose opening line may carry a language tag.
fn block_pattern() -> &'static Regex {
    static BLOCK: OnceLock<Regex> = OnceLock::new();
    BLOCK.get_or_init(|| {
        Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+-]*)[ \t]*\r?\n(.*?)```")
            .expect("fence pattern compiles")
    })
}

/// Remove code-fence markers.
///
/// A word on the opening fence line is a language tag only when the block
/// has content below it; otherwise the word is the content (```` ```FAKE\n``` ````).
pub fn strip_fences(text: &str) -> String {
    let unwrapped = block_pattern().replace_all(text, |caps: &regex::Captures<'_>| {
        let body = caps[2].trim();
        if body.is_empty() {
            caps[1].to_string()
        } else {
            body.to_string()
        }
    });
    unwrapped.replace("```", "").trim().to_string()
}

fn match_tokens(provider: &str, text: &str) -> Result<String> {
    if text.trim().eq_ignore_ascii_case(CANONICAL_FAKE) {
        return Ok(FAKE_TOKEN.to_string());
    }

    let upper = text.to_uppercase();
    match (upper.contains(REAL_TOKEN), upper.contains(FAKE_TOKEN)) {
        (true, false) => Ok(REAL_TOKEN.to_string()),
        (false, true) => Ok(FAKE_TOKEN.to_string()),
        (true, true) => Err(SightError::unparseable(
            provider,
            format!("answer names both REAL and FAKE: {text:?}"),
        )),
        (false, false) => Err(SightError::unparseable(
            provider,
            format!("answer names neither REAL nor FAKE: {text:?}"),
        )),
    }
}

/// Reduce a model answer to `"REAL"` or `"FAKE"`.
///
/// JSON objects are read through their `final_verdict` field; anything else
/// is matched case-insensitively on the presence of exactly one of the two
/// tokens. An answer that is exactly the canonical label `ARTIFICIAL` reads
/// as `FAKE`, so re-parsing a normalized verdict returns the same answer.
pub fn parse_prompt_answer(provider: &str, answer: &str) -> Result<String> {
    let cleaned = strip_fences(answer);

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&cleaned) {
        let verdict = map
            .get("final_verdict")
            .and_then(Value::as_str)
            .ok_or_else(|| SightError::unparseable(provider, "JSON answer has no final_verdict"))?;
        return match_tokens(provider, verdict);
    }

    match_tokens(provider, &cleaned)
}

/// Sends the instruction and the inline image to a `generateContent`-style endpoint.
pub struct PromptAdapter {
    spec: ProviderSpec,
    api_key: Option<String>,
    transport: Arc<dyn Transport>,
}

impl PromptAdapter {
    pub fn new(spec: ProviderSpec, api_key: Option<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            spec,
            api_key,
            transport,
        }
    }

    fn instruction(&self) -> &str {
        self.spec
            .prompt_template
            .as_deref()
            .unwrap_or(FORENSIC_JSON_PROMPT)
    }

    fn url(&self) -> String {
        match &self.spec.model {
            Some(model) => self.spec.endpoint.replace("{model}", model),
            None => self.spec.endpoint.clone(),
        }
    }
}

/// Concatenate the text parts of the first candidate.
fn answer_text(body: &Value) -> Option<String> {
    let parts = body
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    (!text.trim().is_empty()).then_some(text)
}

#[async_trait]
impl ProviderAdapter for PromptAdapter {
    fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    #[instrument(skip_all, fields(provider = %self.spec.id))]
    async fn classify(&self, image: &ImageArtifact) -> Result<RawVerdict> {
        let body = json!({
            "contents": [{
                "parts": [
                    { "text": self.instruction() },
                    { "inline_data": { "mime_type": image.mime_type, "data": image.base64() } }
                ]
            }]
        });
        let mut request = HttpRequest::post(self.url()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("x-goog-api-key", key.clone());
        }

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| transport_failure(&self.spec, e))?;
        ensure_success(&self.spec, &response)?;

        let parsed: Value = response
            .parse_json()
            .map_err(|e| SightError::unparseable(&self.spec.id, e.to_string()))?;
        let text = answer_text(&parsed)
            .ok_or_else(|| SightError::unparseable(&self.spec.id, "response carries no text"))?;
        debug!(answer = %text.trim(), "model answered");

        let token = parse_prompt_answer(&self.spec.id, &text)?;
        Ok(RawVerdict::Categorical {
            kind: ProviderKind::Prompt,
            label: token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fakes::ScriptedTransport;
    use crate::transport::{HttpMethod, HttpResponse};
    use crate::verdict::{default_labels, normalize};

    #[test]
    fn fenced_json_is_unwrapped() {
        let answer = "```json\n{\"final_verdict\":\"FAKE\"}\n```";
        assert_eq!(parse_prompt_answer("g", answer).unwrap(), "FAKE");
    }

    #[test]
    fn single_line_fences_keep_the_verdict() {
        assert_eq!(parse_prompt_answer("g", "```REAL```").unwrap(), "REAL");
        assert_eq!(parse_prompt_answer("g", "```FAKE\n```").unwrap(), "FAKE");
        assert_eq!(parse_prompt_answer("g", "```\nREAL\n```").unwrap(), "REAL");
    }

    #[test]
    fn word_artificial_in_a_sentence_is_not_a_token() {
        assert_eq!(
            parse_prompt_answer("g", "REAL - no artificial generation detected").unwrap(),
            "REAL"
        );
        assert_eq!(parse_prompt_answer("g", "Artificial").unwrap(), "FAKE");
        let err = parse_prompt_answer("g", "looks artificial to me").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnparseableResponse);
    }

    #[test]
    fn plain_word_is_matched_case_insensitively() {
        assert_eq!(parse_prompt_answer("g", " real\n").unwrap(), "REAL");
        assert_eq!(parse_prompt_answer("g", "It looks fake to me.").unwrap(), "FAKE");
    }

    #[test]
    fn both_or_neither_token_is_unparseable() {
        let both = parse_prompt_answer("g", "Could be REAL or FAKE").unwrap_err();
        assert_eq!(both.kind(), ErrorKind::UnparseableResponse);
        let neither = parse_prompt_answer("g", "I cannot tell.").unwrap_err();
        assert_eq!(neither.kind(), ErrorKind::UnparseableResponse);
    }

    #[test]
    fn json_without_final_verdict_is_unparseable() {
        let err = parse_prompt_answer("g", r#"{"verdict": "REAL"}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnparseableResponse);
    }

    #[test]
    fn reparsing_normalized_output_keeps_label() {
        let labels = default_labels(ProviderKind::Prompt);
        for answer in ["REAL", "```json\n{\"final_verdict\":\"FAKE\"}\n```", "fake"] {
            let token = parse_prompt_answer("g", answer).unwrap();
            let raw = RawVerdict::Categorical {
                kind: ProviderKind::Prompt,
                label: token,
            };
            let first = normalize("g", &raw, &labels).unwrap();

            let again = parse_prompt_answer("g", &first.label.to_string()).unwrap();
            let raw = RawVerdict::Categorical {
                kind: ProviderKind::Prompt,
                label: again,
            };
            let second = normalize("g", &raw, &labels).unwrap();
            assert_eq!(first.label, second.label, "{answer}");
        }
    }

    #[tokio::test]
    async fn adapter_reads_candidate_text() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            HttpMethod::Post,
            "https://gen.example/v1/m:generate",
            HttpResponse::json(
                200,
                json!({"candidates": [{"content": {"parts": [{"text": "```json\n{\"final_verdict\":\"REAL\"}\n```"}]}}]}),
            ),
        );
        let adapter = PromptAdapter::new(
            ProviderSpec::new("gemini", ProviderKind::Prompt, "https://gen.example/v1/{model}:generate")
                .with_model("m")
                .with_prompt_template(SINGLE_WORD_PROMPT),
            Some("key".into()),
            transport.clone(),
        );

        let raw = adapter
            .classify(&ImageArtifact::new(b"abc".to_vec(), "image/png", "a.png"))
            .await
            .unwrap();
        assert_eq!(
            raw,
            RawVerdict::Categorical {
                kind: ProviderKind::Prompt,
                label: "REAL".into()
            }
        );

        let sent: Value = serde_json::from_slice(transport.requests()[0].body.as_ref().unwrap()).unwrap();
        assert_eq!(sent["contents"][0]["parts"][0]["text"], SINGLE_WORD_PROMPT);
        assert_eq!(sent["contents"][0]["parts"][1]["inline_data"]["data"], "YWJj");
    }

    #[tokio::test]
    async fn missing_text_is_unparseable() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            HttpMethod::Post,
            "https://gen.example/x",
            HttpResponse::json(200, json!({"candidates": []})),
        );
        let adapter = PromptAdapter::new(
            ProviderSpec::new("gemini", ProviderKind::Prompt, "https://gen.example/x"),
            None,
            transport,
        );

        let err = adapter
            .classify(&ImageArtifact::new(vec![1], "image/png", "a.png"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnparseableResponse);
    }
}
