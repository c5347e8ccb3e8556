use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::models::{HealthResponse, OcrResponse, ParseRequest};
use crate::upstream::UpstreamError;
use crate::AppState;

const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".bmp", ".tiff", ".webp"];
const UPLOAD_FIELD: &str = "file";
const DEFAULT_FILENAME: &str = "upload";

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    ClientInput(String),
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::Rejected {
            status: e.status(),
            message: e.body_text(),
        }
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(e: MultipartRejection) -> Self {
        ApiError::ClientInput(e.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::ClientInput(e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::ClientInput(msg) => (StatusCode::BAD_REQUEST, Value::String(msg)),
            ApiError::Rejected { status, message } => (status, Value::String(message)),
            ApiError::Upstream(UpstreamError::Status {
                upstream,
                status,
                body,
            }) => (
                StatusCode::BAD_GATEWAY,
                json!({
                    "message": format!("{} upstream error", upstream),
                    "status_code": status,
                    "response": body,
                }),
            ),
            ApiError::Upstream(e) => (
                StatusCode::BAD_GATEWAY,
                Value::String(format!("Upstream request failed: {}", e)),
            ),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}

pub async fn ocr(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<OcrResponse>, ApiError> {
    let mut multipart = multipart?;
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or(DEFAULT_FILENAME).to_string();
        let content_type = field.content_type().unwrap_or("").to_string();
        let data = field.bytes().await?;
        upload = Some((filename, content_type, data));
        break;
    }

    let Some((filename, content_type, data)) = upload else {
        return Err(ApiError::ClientInput("Missing file field".to_string()));
    };
    if data.is_empty() {
        return Err(ApiError::ClientInput("Empty file".to_string()));
    }
    if !is_supported_image(&filename, &content_type) {
        return Err(ApiError::ClientInput(format!(
            "Unsupported file type: content_type={}",
            content_type
        )));
    }

    tracing::info!(filename = %filename, bytes = data.len(), "forwarding image to OCR");
    let ocr = state.upstream.ocr(&data).await?;

    Ok(Json(OcrResponse {
        filename,
        kind: "image",
        ocr,
    }))
}

pub async fn parse_grades(
    State(state): State<AppState>,
    req: Result<Json<ParseRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = req?;
    if req.ocr_text.trim().is_empty() {
        return Err(ApiError::ClientInput("ocr_text is required".to_string()));
    }

    tracing::info!(chars = req.ocr_text.chars().count(), track = ?req.track, "parsing grades");
    let parsed = state.upstream.parse(&req.ocr_text, req.track).await?;
    Ok(Json(parsed))
}

fn is_supported_image(filename: &str, content_type: &str) -> bool {
    let lower = filename.to_lowercase();
    content_type.starts_with("image/") || IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}
