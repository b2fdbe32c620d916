//! Image ingestion: uploads and remote URLs become one canonical artifact.

use base64::Engine as _;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{Result, SightError};
use crate::transport::{HttpRequest, Transport};

/// MIME type assumed when neither the upload nor the remote server declares one.
pub const DEFAULT_MIME: &str = "image/jpeg";

/// Canonical image handed to every provider. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub source_name: String,
}

impl ImageArtifact {
    pub fn new(bytes: Vec<u8>, mime_type: &str, source_name: &str) -> Self {
        Self {
            bytes,
            mime_type: mime_type.to_string(),
            source_name: source_name.to_string(),
        }
    }

    pub fn base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    /// `data:<mime>;base64,<payload>`
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64())
    }

    /// SHA-256 hex of the image bytes, used to correlate audit logs.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

/// A file received from the caller.
#[derive(Debug, Clone, Default)]
pub struct UploadedFile {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub file_name: String,
}

impl UploadedFile {
    /// Decode a `data:<mime>;base64,<payload>` URI into an upload.
    pub fn from_data_uri(uri: &str, file_name: &str) -> Option<Self> {
        let rest = uri.strip_prefix("data:")?;
        let (meta, payload) = rest.split_once(',')?;
        let mime = meta.strip_suffix(";base64")?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .ok()?;
        Some(Self {
            bytes,
            content_type: if mime.is_empty() {
                DEFAULT_MIME.to_string()
            } else {
                mime.to_string()
            },
            file_name: file_name.to_string(),
        })
    }
}

/// Raw request input. An empty file counts as absent.
#[derive(Debug, Clone, Default)]
pub struct ImageInput {
    pub file: Option<UploadedFile>,
    pub url: Option<String>,
}

impl ImageInput {
    pub fn from_file(file: UploadedFile) -> Self {
        Self {
            file: Some(file),
            url: None,
        }
    }

    pub fn from_url(url: &str) -> Self {
        Self {
            file: None,
            url: Some(url.to_string()),
        }
    }
}

/// Turn an upload or a remote URL into an [`ImageArtifact`].
///
/// A non-empty file wins over a URL when both are supplied.
pub async fn ingest(transport: &dyn Transport, input: ImageInput) -> Result<ImageArtifact> {
    if let Some(file) = input.file.filter(|f| !f.bytes.is_empty()) {
        info!(name = %file.file_name, size = file.bytes.len(), "processing uploaded file");
        let mime = if file.content_type.trim().is_empty() {
            DEFAULT_MIME
        } else {
            file.content_type.as_str()
        };
        return Ok(ImageArtifact::new(file.bytes, mime, &file.file_name));
    }

    let url = input
        .url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or(SightError::NoInput)?;

    info!(url = %url, "processing image from URL");
    let (bytes, mime) = fetch_remote(transport, &url).await?;
    let name = format!("from-url-{}.jpg", chrono::Utc::now().timestamp_millis());
    Ok(ImageArtifact::new(bytes, &mime, &name))
}

/// GET a remote image. Returns the bytes and the declared MIME type.
pub async fn fetch_remote(transport: &dyn Transport, url: &str) -> Result<(Vec<u8>, String)> {
    let response = transport
        .send(HttpRequest::get(url))
        .await
        .map_err(|e| SightError::FetchFailed {
            detail: e.to_string(),
        })?;

    if !response.is_success() {
        return Err(SightError::FetchFailed {
            detail: format!("status {}", response.status),
        });
    }
    if response.body.is_empty() {
        return Err(SightError::FetchFailed {
            detail: "empty body".to_string(),
        });
    }

    let mime = response
        .header("content-type")
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_MIME.to_string());
    debug!(url, size = response.body.len(), mime = %mime, "fetched remote image");

    Ok((response.body, mime))
}

/// Fetch a remote image and return it as a data URI.
pub async fn proxy_image(transport: &dyn Transport, url: &str) -> Result<String> {
    let (bytes, mime) = fetch_remote(transport, url).await?;
    Ok(ImageArtifact::new(bytes, &mime, "proxy").data_uri())
}
