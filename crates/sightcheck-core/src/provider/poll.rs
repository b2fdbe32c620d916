//! Job-queue adapter and its polling state machine.
//!
//! ```text
//! SUBMITTED -> (POLLING)* -> SUCCEEDED | FAILED | TIMED_OUT
//! ```
//!
//! Ticks are separated by `poll_interval_ms`; after `max_poll_attempts`
//! non-terminal observations the machine gives up with `TIMED_OUT`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use super::{ensure_success, transport_failure, ProviderAdapter};
use crate::config::{ProviderKind, ProviderSpec};
use crate::error::{Result, SightError};
use crate::ingest::ImageArtifact;
use crate::transport::{HttpRequest, Transport};
use crate::verdict::RawVerdict;

/// Status document returned by `GET <endpoint>/jobs/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobStatus {
    pub status: String,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub error: Option<Value>,
}

impl JobStatus {
    pub fn new(status: &str, output: Value) -> Self {
        Self {
            status: status.to_string(),
            output,
            error: None,
        }
    }
}

#[derive(Deserialize)]
struct SubmittedJob {
    id: String,
}

/// Polling state. Owns nothing but the job id.
#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    Submitted { job_id: String },
    Polling { job_id: String, attempt: u32 },
    Succeeded { output: Value },
    Failed { status: String, detail: String },
    TimedOut { attempts: u32 },
}

impl PollState {
    pub fn submitted(job_id: &str) -> Self {
        PollState::Submitted {
            job_id: job_id.to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollState::Succeeded { .. } | PollState::Failed { .. } | PollState::TimedOut { .. }
        )
    }

    pub fn job_id(&self) -> Option<&str> {
        match self {
            PollState::Submitted { job_id } | PollState::Polling { job_id, .. } => Some(job_id),
            _ => None,
        }
    }

    /// Ticks consumed so far.
    pub fn attempts(&self) -> u32 {
        match self {
            PollState::Submitted { .. } => 0,
            PollState::Polling { attempt, .. } => *attempt,
            PollState::TimedOut { attempts } => *attempts,
            PollState::Succeeded { .. } | PollState::Failed { .. } => 0,
        }
    }

    /// Transition after observing one job status. Terminal states are absorbing.
    pub fn on_status(self, observed: &JobStatus, max_attempts: u32) -> PollState {
        let (job_id, tick) = match self {
            PollState::Submitted { job_id } => (job_id, 1),
            PollState::Polling { job_id, attempt } => (job_id, attempt + 1),
            terminal => return terminal,
        };

        match observed.status.to_ascii_lowercase().as_str() {
            "succeeded" => PollState::Succeeded {
                output: observed.output.clone(),
            },
            status @ ("failed" | "canceled" | "cancelled") => PollState::Failed {
                status: status.to_string(),
                detail: observed
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_default(),
            },
            _ if tick >= max_attempts => PollState::TimedOut { attempts: tick },
            _ => PollState::Polling {
                job_id,
                attempt: tick,
            },
        }
    }
}

/// Submits a job, then polls it to completion.
pub struct PollJobAdapter {
    spec: ProviderSpec,
    token: Option<String>,
    transport: Arc<dyn Transport>,
}

impl PollJobAdapter {
    pub fn new(spec: ProviderSpec, token: Option<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            spec,
            token,
            transport,
        }
    }

    fn jobs_url(&self) -> String {
        format!("{}/jobs", self.spec.endpoint.trim_end_matches('/'))
    }

    async fn submit(&self, image: &ImageArtifact) -> Result<String> {
        let body = json!({
            "version": self.spec.model.as_deref().unwrap_or_default(),
            "input": { "image": image.base64() },
        });
        let request = HttpRequest::post(self.jobs_url())
            .bearer(self.token.as_deref())
            .json(&body);

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| transport_failure(&self.spec, e))?;
        ensure_success(&self.spec, &response)?;

        let job: SubmittedJob = response
            .parse_json()
            .map_err(|e| SightError::unparseable(&self.spec.id, format!("job submission: {e}")))?;
        Ok(job.id)
    }

    async fn status(&self, job_id: &str) -> Result<JobStatus> {
        let url = format!("{}/{}", self.jobs_url(), job_id);
        let request = HttpRequest::get(url).bearer(self.token.as_deref());

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| transport_failure(&self.spec, e))?;
        ensure_success(&self.spec, &response)?;

        response
            .parse_json()
            .map_err(|e| SightError::unparseable(&self.spec.id, format!("job status: {e}")))
    }

    /// Drive the state machine from `SUBMITTED` to a terminal state.
    pub async fn run_to_completion(&self, job_id: &str) -> Result<PollState> {
        let interval = Duration::from_millis(self.spec.poll_interval_ms);
        let mut state = PollState::submitted(job_id);

        while let Some(id) = state.job_id().map(str::to_string) {
            tokio::time::sleep(interval).await;
            let observed = self.status(&id).await?;
            debug!(job_id = %id, status = %observed.status, attempt = state.attempts() + 1, "poll tick");
            state = state.on_status(&observed, self.spec.max_poll_attempts);
        }
        Ok(state)
    }
}

#[async_trait]
impl ProviderAdapter for PollJobAdapter {
    fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    #[instrument(skip_all, fields(provider = %self.spec.id))]
    async fn classify(&self, image: &ImageArtifact) -> Result<RawVerdict> {
        let job_id = self.submit(image).await?;
        info!(job_id = %job_id, "job submitted");

        match self.run_to_completion(&job_id).await? {
            PollState::Succeeded { output } => Ok(RawVerdict::Json {
                kind: ProviderKind::PollJob,
                payload: output,
            }),
            PollState::Failed { status, detail } => {
                warn!(job_id = %job_id, status = %status, "job failed");
                Err(SightError::provider(
                    &self.spec.id,
                    format!("job {job_id} {status} {detail}").trim_end().to_string(),
                ))
            }
            PollState::TimedOut { attempts } => {
                warn!(job_id = %job_id, attempts, "job did not finish");
                Err(SightError::Timeout {
                    provider: self.spec.id.clone(),
                    elapsed_ms: u64::from(attempts) * self.spec.poll_interval_ms,
                })
            }
            PollState::Submitted { .. } | PollState::Polling { .. } => Err(SightError::provider(
                &self.spec.id,
                "polling stopped before a terminal state",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(s: &str) -> JobStatus {
        JobStatus::new(s, Value::Null)
    }

    #[test]
    fn succeeded_carries_output() {
        let next = PollState::submitted("j1").on_status(&JobStatus::new("succeeded", json!("REAL")), 20);
        assert_eq!(next, PollState::Succeeded { output: json!("REAL") });
        assert!(next.is_terminal());
    }

    #[test]
    fn failed_and_canceled_are_failures() {
        for s in ["failed", "canceled", "CANCELLED"] {
            let next = PollState::submitted("j1").on_status(&status(s), 20);
            assert!(matches!(next, PollState::Failed { .. }), "{s}");
        }
    }

    #[test]
    fn other_status_keeps_polling() {
        let next = PollState::submitted("j1").on_status(&status("processing"), 20);
        assert_eq!(
            next,
            PollState::Polling {
                job_id: "j1".into(),
                attempt: 1
            }
        );
        let next = next.on_status(&status("starting"), 20);
        assert_eq!(next.attempts(), 2);
    }

    #[test]
    fn exhausting_attempts_times_out() {
        let mut state = PollState::submitted("j1");
        for _ in 0..20 {
            state = state.on_status(&status("processing"), 20);
        }
        assert_eq!(state, PollState::TimedOut { attempts: 20 });
    }

    #[test]
    fn terminal_states_absorb() {
        let done = PollState::Succeeded { output: json!(1) };
        assert_eq!(done.clone().on_status(&status("failed"), 20), done);
    }
}
