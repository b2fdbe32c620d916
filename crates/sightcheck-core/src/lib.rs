//! Sightcheck Core Library
//!
//! Classifies an image as a real photograph or AI-generated by querying one
//! or more detection providers and normalizing their answers.
//!
//! ```text
//! ImageInput -> ingest -> ImageArtifact -> fan_out(adapters) -> AggregatedResult
//!            -> success_response / ArtifactStore::put
//! ```

pub mod aggregator;
pub mod assembler;
pub mod classifier;
pub mod config;
pub mod error;
pub mod fakes;
pub mod ingest;
pub mod obs;
pub mod provider;
pub mod store;
pub mod telemetry;
pub mod transport;
pub mod verdict;

pub use aggregator::{classify_with, fan_out, AggregatedResult, ProviderOutcome};

pub use assembler::{
    build_record, success_response, summarize, ClassificationResponse, ClassificationResult,
};

pub use classifier::{Analysis, Classifier};

pub use config::{
    Config, ConfigError, HttpConfig, ProviderKind, ProviderSpec, ServerConfig, StoreConfig,
};

pub use error::{ErrorKind, Result, SightError};

pub use ingest::{ingest, proxy_image, ImageArtifact, ImageInput, UploadedFile, DEFAULT_MIME};

pub use provider::{
    build_adapter, build_adapters, invoke, parse_prompt_answer, JobStatus, PollJobAdapter,
    PollState, PromptAdapter, ProviderAdapter, SyncAdapter,
};

pub use store::github::GithubContentsStore;
pub use store::{ArtifactRecord, ArtifactStore, StoredArtifact};

pub use telemetry::init_tracing;

pub use transport::{
    HttpMethod, HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError,
};

pub use verdict::{normalize, Label, LabelMap, RawVerdict, Verdict};
