use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    api::dto::{ChatRequest, ErrorResponse},
    config::Config,
    pipeline::{PipelineError, RagPipeline},
};

/// Response headers carrying the streaming-mode out-of-band data.
pub const SOURCES_HEADER: &str = "x-sources";
pub const VECTOR_SEARCH_TIME_HEADER: &str = "x-vector-search-time";
pub const LLM_START_TIME_HEADER: &str = "x-llm-start-time";
pub const START_TIME_HEADER: &str = "x-start-time";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<Config>>,
    pub pipeline: Arc<RagPipeline>,
}

fn error_response(status: StatusCode, error: String) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse { error }))
}

fn map_pipeline_error(e: PipelineError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match e {
        PipelineError::InvalidQuestion => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e.to_string())
}

/// Pull `{ question, model? }` out of a raw JSON body.
///
/// A missing or non-string `question` is the caller's mistake and must be
/// a 400 with an `{ error }` body, not a framework-shaped rejection.
fn extract_chat_request(
    body: &serde_json::Value,
) -> Result<ChatRequest, (StatusCode, Json<ErrorResponse>)> {
    let question = body
        .get("question")
        .and_then(|v| v.as_str())
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| {
            error_response(StatusCode::BAD_REQUEST, "Question is required".to_string())
        })?;

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    Ok(ChatRequest {
        question: question.to_string(),
        model,
    })
}

/// Blocking query: full answer, sources, and metrics in one JSON object.
pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<crate::models::internal::RagResponse>, (StatusCode, Json<ErrorResponse>)> {
    let req = extract_chat_request(&body)?;

    let response = state
        .pipeline
        .answer(&req.question, req.model.as_deref())
        .await
        .map_err(map_pipeline_error)?;

    Ok(Json(response))
}

/// Streaming query: raw answer fragments in the body, sources and timing
/// markers URL-encoded into response headers.
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let req = extract_chat_request(&body)?;

    let answer = state
        .pipeline
        .answer_stream(&req.question, req.model.as_deref())
        .await
        .map_err(map_pipeline_error)?;

    let sources_json = serde_json::to_string(&answer.sources).map_err(|e| {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to serialize sources: {e}"),
        )
    })?;
    let encoded_sources = utf8_percent_encode(&sources_json, NON_ALPHANUMERIC).to_string();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(SOURCES_HEADER, encoded_sources)
        .header(
            VECTOR_SEARCH_TIME_HEADER,
            answer.vector_search_ms.to_string(),
        )
        .header(LLM_START_TIME_HEADER, answer.llm_start_ms.to_string())
        .header(START_TIME_HEADER, answer.start_time_ms.to_string())
        .body(Body::from_stream(answer.tokens))
        .map_err(|e| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to build response: {e}"),
            )
        })
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/chat", post(chat))
        .route("/api/v1/chat/stream", post(chat_stream))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn health() -> &'static str {
    "OK"
}
