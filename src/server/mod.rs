pub mod handlers;
pub mod routes;

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use crate::error::{QnaError, Result};
use crate::pipeline::Pipeline;

pub async fn serve(
    bind: &str,
    pipeline: Arc<Pipeline>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let app = routes::build(pipeline);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| QnaError::Config(format!("failed to bind {bind}: {e}")))?;

    info!(bind = %bind, "listening (HTTP)");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
        .map_err(|e| QnaError::Config(format!("server error: {e}")))?;

    Ok(())
}
