//! Process-wide configuration.
//!
//! Loaded once at startup from a TOML file or from environment variables,
//! validated, then shared read-only behind an `Arc`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::verdict::{default_labels, LabelMap};

/// Protocol family of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderKind {
    /// One request carrying raw bytes, ranked `{label, score}` list back.
    Sync,
    /// Submit a job, then poll its status until a terminal state.
    PollJob,
    /// Generative model prompted for a REAL/FAKE answer.
    Prompt,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Sync => write!(f, "SYNC"),
            ProviderKind::PollJob => write!(f, "POLL_JOB"),
            ProviderKind::Prompt => write!(f, "PROMPT"),
        }
    }
}

/// Startup configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("provider {provider} needs secret from environment variable {var}, which is not set")]
    MissingSecret { provider: String, var: String },
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_max_poll_attempts() -> u32 {
    20
}

/// Static description of one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub id: String,
    pub kind: ProviderKind,
    pub endpoint: String,
    /// Name of the environment variable holding the provider secret.
    #[serde(default)]
    pub auth_ref: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub prompt_template: Option<String>,
    /// Model version (POLL_JOB) or model name (PROMPT).
    #[serde(default)]
    pub model: Option<String>,
    /// Overrides the kind's default label vocabulary.
    #[serde(default)]
    pub labels: Option<LabelMap>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

impl ProviderSpec {
    pub fn new(id: &str, kind: ProviderKind, endpoint: &str) -> Self {
        Self {
            id: id.to_string(),
            kind,
            endpoint: endpoint.to_string(),
            auth_ref: None,
            timeout_ms: default_timeout_ms(),
            prompt_template: None,
            model: None,
            labels: None,
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
        }
    }

    pub fn with_auth_ref(mut self, var: &str) -> Self {
        self.auth_ref = Some(var.to_string());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    pub fn with_labels(mut self, labels: LabelMap) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn with_prompt_template(mut self, template: &str) -> Self {
        self.prompt_template = Some(template.to_string());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Configured label map, or the kind's default vocabulary.
    pub fn effective_labels(&self) -> LabelMap {
        self.labels
            .clone()
            .unwrap_or_else(|| default_labels(self.kind))
    }

    /// Resolve the secret named by `auth_ref` from the process environment.
    pub fn resolve_secret(&self) -> Result<Option<String>, ConfigError> {
        self.resolve_secret_with(|var| std::env::var(var).ok())
    }

    pub fn resolve_secret_with<F>(&self, lookup: F) -> Result<Option<String>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        match &self.auth_ref {
            None => Ok(None),
            Some(var) => lookup(var)
                .filter(|v| !v.is_empty())
                .map(Some)
                .ok_or_else(|| ConfigError::MissingSecret {
                    provider: self.id.clone(),
                    var: var.clone(),
                }),
        }
    }
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_token_ref() -> String {
    "GITHUB_PAT".to_string()
}

fn default_directory() -> String {
    "uploads".to_string()
}

/// Artifact store (GitHub contents API) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// `owner/name` of the repository receiving uploads.
    pub repo: String,
    #[serde(default = "default_token_ref")]
    pub token_ref: String,
    #[serde(default = "default_directory")]
    pub directory: String,
}

fn default_user_agent() -> String {
    concat!("sightcheck/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

/// Outbound HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Whole-request deadline, also applied to image fetches and store writes.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_body_limit() -> usize {
    25 * 1024 * 1024
}

/// Inbound HTTP service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

pub const DEFAULT_HF_ENDPOINT: &str =
    "https://api-inference.huggingface.co/models/umm-maybe/AI-image-detector";
pub const DEFAULT_GEMINI_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash-latest:generateContent";
pub const DEFAULT_JOB_ENDPOINT: &str = "https://api.replicate.com/v1";

/// Full service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    pub providers: Vec<ProviderSpec>,
    #[serde(default)]
    pub store: Option<StoreConfig>,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|var| std::env::var(var).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    ///
    /// Providers are enabled only when their secret is present, in the order
    /// `hf` (SYNC), `gemini` (PROMPT), `replicate` (POLL_JOB).
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |var: &str| lookup(var).filter(|v| !v.is_empty());
        let mut providers = Vec::new();

        if present("HF_API_TOKEN").is_some() {
            let endpoint =
                present("HF_ENDPOINT").unwrap_or_else(|| DEFAULT_HF_ENDPOINT.to_string());
            providers.push(
                ProviderSpec::new("hf", ProviderKind::Sync, &endpoint).with_auth_ref("HF_API_TOKEN"),
            );
        }

        if present("GEMINI_API_KEY").is_some() {
            let endpoint =
                present("GEMINI_ENDPOINT").unwrap_or_else(|| DEFAULT_GEMINI_ENDPOINT.to_string());
            providers.push(
                ProviderSpec::new("gemini", ProviderKind::Prompt, &endpoint)
                    .with_auth_ref("GEMINI_API_KEY"),
            );
        }

        if present("REPLICATE_API_TOKEN").is_some() {
            let version = present("REPLICATE_MODEL_VERSION").ok_or_else(|| {
                ConfigError::Invalid("REPLICATE_MODEL_VERSION is required with REPLICATE_API_TOKEN".into())
            })?;
            let endpoint =
                present("REPLICATE_ENDPOINT").unwrap_or_else(|| DEFAULT_JOB_ENDPOINT.to_string());
            providers.push(
                ProviderSpec::new("replicate", ProviderKind::PollJob, &endpoint)
                    .with_auth_ref("REPLICATE_API_TOKEN")
                    .with_model(&version)
                    .with_timeout_ms(60_000),
            );
        }

        let store = match (present("GITHUB_PAT"), present("GITHUB_REPO_FOR_UPLOADS")) {
            (Some(_), Some(repo)) => Some(StoreConfig {
                api_base: default_api_base(),
                repo,
                token_ref: default_token_ref(),
                directory: default_directory(),
            }),
            _ => None,
        };

        let mut server = ServerConfig::default();
        if let Some(bind) = present("SIGHTCHECK_BIND") {
            server.bind = bind;
        }

        let config = Config {
            http: HttpConfig::default(),
            providers,
            store,
            server,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one provider must be configured".into(),
            ));
        }

        if self.http.connect_timeout_ms == 0 || self.http.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("http timeouts must be non-zero".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for p in &self.providers {
            if p.id.trim().is_empty() {
                return Err(ConfigError::Invalid("provider id must not be empty".into()));
            }
            if !seen.insert(p.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate provider id {}", p.id)));
            }
            if p.endpoint.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("provider {} has no endpoint", p.id)));
            }
            if p.timeout_ms == 0 {
                return Err(ConfigError::Invalid(format!("provider {} has a zero timeout", p.id)));
            }
            if p.kind == ProviderKind::PollJob {
                if p.max_poll_attempts == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "provider {} must allow at least one poll",
                        p.id
                    )));
                }
                if p.model.is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "provider {} needs a model version",
                        p.id
                    )));
                }
            }
            if p.labels.as_ref().is_some_and(|l| l.is_empty()) {
                return Err(ConfigError::Invalid(format!("provider {} has an empty label map", p.id)));
            }
        }

        if let Some(store) = &self.store {
            if !store.repo.contains('/') {
                return Err(ConfigError::Invalid(format!(
                    "store repo {:?} must be owner/name",
                    store.repo
                )));
            }
        }
        Ok(())
    }

    /// One line per provider, safe to print: only secret variable names appear.
    pub fn describe(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|p| {
                format!(
                    "{} [{}] {} timeout={}ms auth={}",
                    p.id,
                    p.kind,
                    p.endpoint,
                    p.timeout_ms,
                    p.auth_ref.as_deref().unwrap_or("-")
                )
            })
            .collect()
    }
}
