use axum::Json;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use super::routes::AppState;
use crate::error::QnaError;
use crate::question::Question;

#[derive(Deserialize)]
pub struct AskQuery {
    pub q: Option<String>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl QnaError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            QnaError::RequestValidation(_) => StatusCode::BAD_REQUEST,
            QnaError::Embedding(_) | QnaError::Search(_) | QnaError::GenerationTransport(_) => {
                StatusCode::BAD_GATEWAY
            }
            QnaError::Config(_) | QnaError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for QnaError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// `GET /?q=...` — answer the question as a live text stream.
///
/// Headers are only sent once retrieval has succeeded; embedding and search
/// failures come back as a JSON error with no partial answer.
pub async fn ask(State(state): State<AppState>, Query(query): Query<AskQuery>) -> Response {
    let question = match Question::parse(query.q) {
        Ok(q) => q,
        Err(e) => return e.into_response(),
    };

    match state.pipeline.run(question).await {
        Ok(stream) => (
            [
                (CONTENT_TYPE, "text/event-stream"),
                (CACHE_CONTROL, "no-cache"),
            ],
            Body::from_stream(stream),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
