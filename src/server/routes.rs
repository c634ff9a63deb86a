use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::pipeline::Pipeline;

use super::handlers;

/// State shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

pub fn build(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/", get(handlers::ask))
        .route("/qna", get(handlers::ask))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { pipeline })
}
