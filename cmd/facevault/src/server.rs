//! HTTP API.
//!
//! - POST /enroll        multipart: photo, user_id, name?, email?
//! - POST /upload_photo  multipart: photo, threshold?
//! - GET  /users         all identities
//! - GET  /status        index generation, sizes and rebuild counters

use std::net::SocketAddr;

use anyhow::Result;
use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use facevault_pipeline::{ErrorKind, EnrollResult, Pipeline, PipelineError, RecognitionResult};
use facevault_profile::{Identity, ProfileFields};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
}

/// An error answered as `{"error": message}`.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e.kind() {
            ErrorKind::NoFace => Self {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                message: format!("no face found: {e}"),
            },
            ErrorKind::BadRequest => Self::bad_request(e.to_string()),
            ErrorKind::Internal => {
                error!(error = %e, "server: request failed");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "internal failure".to_string(),
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Serialize)]
struct RecognitionResponse {
    message: &'static str,
    threshold_used: f32,
    #[serde(flatten)]
    result: RecognitionResult,
}

/// Build the API router.
pub fn router(pipeline: Pipeline) -> Router {
    Router::new()
        .route("/enroll", post(enroll))
        .route("/upload_photo", post(upload_photo))
        .route("/users", get(users))
        .route("/status", get(status))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(AppState { pipeline })
}

/// Serve the API on `addr` until `shutdown` is cancelled.
pub async fn serve(addr: &str, pipeline: Pipeline, shutdown: CancellationToken) -> Result<()> {
    let addr = parse_addr(addr)?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "server: listening");
    axum::serve(listener, router(pipeline))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// Parse address string to SocketAddr.
pub fn parse_addr(addr: &str) -> Result<SocketAddr> {
    let addr = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    };
    Ok(addr.parse()?)
}

#[derive(Default)]
struct Form {
    photo: Option<Vec<u8>>,
    user_id: Option<String>,
    name: Option<String>,
    email: Option<String>,
    threshold: Option<String>,
}

async fn read_form(mut multipart: Multipart) -> Result<Form, ApiError> {
    let mut form = Form::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "photo" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                form.photo = Some(bytes.to_vec());
            }
            "user_id" | "name" | "email" | "threshold" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                let text = Some(text.trim().to_string()).filter(|t| !t.is_empty());
                match name.as_str() {
                    "user_id" => form.user_id = text,
                    "name" => form.name = text,
                    "email" => form.email = text,
                    _ => form.threshold = text,
                }
            }
            _ => {}
        }
    }
    Ok(form)
}

async fn enroll(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<EnrollResult>), ApiError> {
    let form = read_form(multipart).await?;
    let photo = form
        .photo
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::bad_request("no photo part in the request"))?;
    let user_id = form
        .user_id
        .ok_or_else(|| ApiError::bad_request("user_id is required"))?;
    let fields = ProfileFields {
        name: form.name,
        email: form.email,
        ..Default::default()
    };

    let result = state
        .pipeline
        .enrollment
        .enroll_with(&user_id, &photo, &fields)
        .await?;
    let status = if result.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(result)))
}

async fn upload_photo(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<RecognitionResponse>), ApiError> {
    let form = read_form(multipart).await?;
    let photo = form
        .photo
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::bad_request("no photo part in the request"))?;
    let threshold = form
        .threshold
        .map(|t| {
            t.parse::<f32>()
                .map_err(|_| ApiError::bad_request(format!("invalid threshold {t:?}")))
        })
        .transpose()?;

    let recognition = &state.pipeline.recognition;
    let result = recognition.recognize(&photo, threshold).await?;
    let threshold_used = threshold.unwrap_or(recognition.default_threshold());

    let (status, message) = if result.matched {
        (StatusCode::OK, "face recognized")
    } else {
        (StatusCode::NOT_FOUND, "no match found")
    };
    Ok((
        status,
        Json(RecognitionResponse {
            message,
            threshold_used,
            result,
        }),
    ))
}

async fn users(State(state): State<AppState>) -> Result<Json<Vec<Identity>>, ApiError> {
    let users = state
        .pipeline
        .profiles
        .list()
        .map_err(PipelineError::from)?;
    Ok(Json(users))
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.pipeline.index.stats();
    Json(json!({
        "generation": stats.generation,
        "indexed": stats.indexed,
        "staged": stats.staged,
        "rebuilds": stats.rebuilds,
        "coalesced_rebuilds": stats.coalesced,
        "peak_concurrent_rebuilds": stats.peak_concurrent_rebuilds,
        "dimension": state.pipeline.index.dimension(),
    }))
}
