//! HTTP surface: `/api/analyze`, `/api/proxy-image`, `/health`.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use sightcheck_core::{ClassificationResponse, Classifier, ErrorKind, ImageInput, UploadedFile};
use tracing::warn;

/// Shared, read-only server state.
#[derive(Clone)]
pub struct AppState {
    pub classifier: Arc<Classifier>,
}

pub fn router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/api/analyze", post(analyze))
        .route("/api/proxy-image", post(proxy_image))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// HTTP status for a failed request.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NoInput => StatusCode::BAD_REQUEST,
        ErrorKind::FetchFailed => StatusCode::BAD_GATEWAY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::ProviderError
        | ErrorKind::UnparseableResponse
        | ErrorKind::UnknownLabel
        | ErrorKind::AllProvidersFailed => StatusCode::BAD_GATEWAY,
        ErrorKind::PersistenceFailed => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn bad_request(message: impl Into<String>) -> Response {
    let body = ClassificationResponse {
        success: false,
        result: None,
        error: Some(message.into()),
        error_kind: None,
    };
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeBody {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    image_data_uri: Option<String>,
}

impl AnalyzeBody {
    fn into_input(self) -> Result<ImageInput, String> {
        let file = match self.image_data_uri.filter(|u| !u.trim().is_empty()) {
            Some(uri) => Some(
                UploadedFile::from_data_uri(&uri, "upload")
                    .ok_or_else(|| "imageDataUri is not a base64 data URI".to_string())?,
            ),
            None => None,
        };
        let non_blank = |u: &String| !u.trim().is_empty();
        Ok(ImageInput {
            file,
            url: self.image_url.filter(non_blank).or(self.url.filter(non_blank)),
        })
    }
}

async fn read_multipart(mut multipart: Multipart) -> Result<ImageInput, String> {
    let mut input = ImageInput::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| format!("malformed form data: {e}"))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "imageFile" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| format!("failed to read imageFile: {e}"))?;
                input.file = Some(UploadedFile {
                    bytes: bytes.to_vec(),
                    content_type,
                    file_name,
                });
            }
            "imageUrl" => {
                let url = field
                    .text()
                    .await
                    .map_err(|e| format!("failed to read imageUrl: {e}"))?;
                input.url = Some(url);
            }
            _ => {}
        }
    }
    Ok(input)
}

async fn extract_input(state: &AppState, request: Request) -> Result<ImageInput, String> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    if is_multipart {
        let multipart = Multipart::from_request(request, state)
            .await
            .map_err(|e| e.body_text())?;
        read_multipart(multipart).await
    } else {
        let Json(body) = Json::<AnalyzeBody>::from_request(request, state)
            .await
            .map_err(|e| e.body_text())?;
        body.into_input()
    }
}

async fn analyze(State(state): State<AppState>, request: Request) -> Response {
    let input = match extract_input(&state, request).await {
        Ok(input) => input,
        Err(message) => {
            warn!(error = %message, "rejected analyze request");
            return bad_request(message);
        }
    };

    let response = state.classifier.analyze(input).await;
    let status = match response.error_kind {
        Some(kind) => status_for(kind),
        None if response.success => StatusCode::OK,
        None => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(response)).into_response()
}

#[derive(Debug, Deserialize)]
struct ProxyBody {
    url: String,
}

async fn proxy_image(State(state): State<AppState>, Json(body): Json<ProxyBody>) -> Response {
    match state.classifier.proxy(body.url.trim()).await {
        Ok(data_uri) => Json(json!({ "dataUri": data_uri })).into_response(),
        Err(e) => {
            warn!(kind = %e.kind(), error = %e, "proxy fetch failed");
            (status_for(e.kind()), Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use sightcheck_core::fakes::{MemoryArtifactStore, ScriptedTransport};
    use sightcheck_core::{
        build_adapter, ArtifactStore, HttpMethod, HttpResponse, ProviderKind, ProviderSpec,
    };
    use tower::ServiceExt;

    const GEN_URL: &str = "https://gen.test/v1/models/flash:generateContent";
    const IMG_URL: &str = "https://img.test/cat.png";

    fn app_with(transport: Arc<ScriptedTransport>, store: Option<Arc<dyn ArtifactStore>>) -> Router {
        let adapter = build_adapter(
            ProviderSpec::new("gemini", ProviderKind::Prompt, GEN_URL),
            Some("k".into()),
            transport.clone(),
        );
        let classifier = Classifier::new(transport, vec![adapter], store);
        router(
            AppState {
                classifier: Arc::new(classifier),
            },
            1024 * 1024,
        )
    }

    fn answering(text: &str) -> Arc<ScriptedTransport> {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            HttpMethod::Post,
            GEN_URL,
            HttpResponse::json(200, json!({"candidates": [{"content": {"parts": [{"text": text}]}}]})),
        );
        transport
    }

    fn json_request(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let app = app_with(Arc::new(ScriptedTransport::new()), None);
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"ok");
    }

    #[tokio::test]
    async fn multipart_upload_is_classified_and_stored() {
        let store = Arc::new(MemoryArtifactStore::new());
        let app = app_with(answering("REAL"), Some(store.clone() as Arc<dyn ArtifactStore>));

        let mut body = Vec::new();
        body.extend_from_slice(
            b"--XBOUNDARY\r\nContent-Disposition: form-data; name=\"imageFile\"; filename=\"cat.png\"\r\nContent-Type: image/png\r\n\r\n",
        );
        body.extend_from_slice(&[9, 8, 7]);
        body.extend_from_slice(b"\r\n--XBOUNDARY--\r\n");
        let req = Request::builder()
            .method("POST")
            .uri("/api/analyze")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XBOUNDARY")
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;

        assert_eq!(json["success"], true);
        assert_eq!(json["result"]["prediction"]["label"], "REAL");
        assert_eq!(json["result"]["prediction"]["confidence"], 100.0);
        assert_eq!(json["result"]["imageUrl"], "data:image/png;base64,CQgH");
        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].bytes, vec![9, 8, 7]);
        assert_eq!(
            json["result"]["fileUrl"],
            format!("memory://{}", records[0].filename)
        );
    }

    #[tokio::test]
    async fn json_url_is_fetched_then_classified() {
        let transport = answering("```json\n{\"final_verdict\":\"FAKE\"}\n```");
        transport.respond(
            HttpMethod::Get,
            IMG_URL,
            HttpResponse::new(200, vec![1u8, 2]).with_header("content-type", "image/png"),
        );
        let app = app_with(transport, None);

        let response = app
            .oneshot(json_request("/api/analyze", json!({ "imageUrl": IMG_URL })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["result"]["prediction"]["label"], "ARTIFICIAL");
        assert!(json["result"]["fileUrl"].is_null());
    }

    #[tokio::test]
    async fn blank_image_url_falls_back_to_url() {
        let transport = answering("REAL");
        transport.respond(
            HttpMethod::Get,
            IMG_URL,
            HttpResponse::new(200, vec![1u8, 2]).with_header("content-type", "image/png"),
        );
        let app = app_with(transport.clone(), None);

        let response = app
            .oneshot(json_request("/api/analyze", json!({ "imageUrl": "  ", "url": IMG_URL })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["result"]["prediction"]["label"], "REAL");
        assert_eq!(transport.count(HttpMethod::Get, IMG_URL), 1);
    }

    #[tokio::test]
    async fn json_data_uri_is_decoded() {
        let transport = answering("REAL");
        let app = app_with(transport.clone(), None);

        let response = app
            .oneshot(json_request(
                "/api/analyze",
                json!({ "imageDataUri": "data:image/gif;base64,R0lG" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let sent: Value = serde_json::from_slice(transport.requests()[0].body.as_ref().unwrap()).unwrap();
        assert_eq!(sent["contents"][0]["parts"][1]["inline_data"]["mime_type"], "image/gif");
    }

    #[tokio::test]
    async fn missing_input_is_bad_request() {
        let app = app_with(answering("REAL"), None);

        let response = app
            .oneshot(json_request("/api/analyze", json!({})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["errorKind"], "NO_INPUT");
    }

    #[tokio::test]
    async fn provider_failure_is_bad_gateway() {
        let app = app_with(answering("maybe"), None);

        let response = app
            .oneshot(json_request(
                "/api/analyze",
                json!({ "imageDataUri": "data:image/png;base64,AAEC" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = body_json(response).await;
        assert_eq!(json["errorKind"], "UNPARSEABLE_RESPONSE");
    }

    #[tokio::test]
    async fn proxy_returns_data_uri() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            HttpMethod::Get,
            IMG_URL,
            HttpResponse::new(200, b"abc".to_vec()).with_header("Content-Type", "image/png; charset=binary"),
        );
        let app = app_with(transport, None);

        let response = app
            .oneshot(json_request("/api/proxy-image", json!({ "url": IMG_URL })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["dataUri"], "data:image/png;base64,YWJj");
    }

    #[tokio::test]
    async fn proxy_upstream_failure_is_bad_gateway() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(HttpMethod::Get, IMG_URL, HttpResponse::new(404, "gone"));
        let app = app_with(transport, None);

        let response = app
            .oneshot(json_request("/api/proxy-image", json!({ "url": IMG_URL })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("404"));
    }

    #[test]
    fn timeouts_map_to_gateway_timeout() {
        assert_eq!(status_for(ErrorKind::Timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(ErrorKind::NoInput), StatusCode::BAD_REQUEST);
    }
}
