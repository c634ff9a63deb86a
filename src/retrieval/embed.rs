//! Question embedding via a hosted inference endpoint.
//!
//! The endpoint accepts `{"text_inputs": "<text>"}` and answers with
//! `{"embedding": [[f32, ...], ...]}`; the first vector is used.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::error::{QnaError, Result};
use crate::retrieval::body_snippet;
use crate::retrieval::signing::RequestSigner;

/// Turns text into a vector.  Implemented by [`EndpointEmbedder`]; the
/// pipeline programs against the trait so tests can substitute doubles.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Embedder that invokes a model endpoint over HTTP.
pub struct EndpointEmbedder {
    client: Client,
    url: Option<String>,
    signer: Arc<dyn RequestSigner>,
}

#[derive(Serialize)]
struct InvokeRequest<'a> {
    text_inputs: &'a str,
}

#[derive(Deserialize)]
struct InvokeResponse {
    embedding: Vec<Vec<f32>>,
}

impl EndpointEmbedder {
    /// Create an embedder for the configured endpoint.
    ///
    /// An unconfigured endpoint is accepted here and reported by
    /// [`Embedder::embed`], so a misconfigured deployment still starts and
    /// fails each request with an embedding error.
    pub fn new(
        config: &EmbeddingConfig,
        timeout: Duration,
        signer: Arc<dyn RequestSigner>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                QnaError::Config(format!("failed to create HTTP client for embeddings: {e}"))
            })?;

        Ok(Self {
            client,
            url: config.invocation_url(),
            signer,
        })
    }
}

#[async_trait::async_trait]
impl Embedder for EndpointEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = self.url.as_deref().ok_or_else(|| {
            QnaError::Embedding(
                "embedding endpoint is not configured; set SM_ENDPOINT_NAME and \
                 SM_ENDPOINT_REGION (or SM_ENDPOINT_URL)"
                    .into(),
            )
        })?;

        let builder = self
            .client
            .post(url)
            .header(ACCEPT, "application/json")
            .json(&InvokeRequest { text_inputs: text });

        let request = self
            .signer
            .sign(builder)
            .map_err(|e| QnaError::Embedding(format!("failed to sign embedding request: {e}")))?
            .build()
            .map_err(|e| QnaError::Embedding(format!("failed to build embedding request: {e}")))?;

        debug!(url = %url, signer = self.signer.name(), "calling embedding endpoint");

        let resp = self.client.execute(request).await.map_err(|e| {
            QnaError::Embedding(format!(
                "embedding endpoint unreachable, check the endpoint configuration: {e}"
            ))
        })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| {
            QnaError::Embedding(format!("failed to read embedding response: {e}"))
        })?;

        if !status.is_success() {
            return Err(QnaError::Embedding(format!(
                "cannot convert text to embedding, check the embedding endpoint \
                 (status {status}): {}",
                body_snippet(&body)
            )));
        }

        let parsed: InvokeResponse = serde_json::from_str(&body).map_err(|e| {
            QnaError::Embedding(format!("malformed embedding response: {e}"))
        })?;

        let vector = parsed
            .embedding
            .into_iter()
            .next()
            .ok_or_else(|| QnaError::Embedding("embedding response contained no vectors".into()))?;

        debug!(dim = vector.len(), "embedding received");
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::signing::{BasicAuth, Unsigned};
    use crate::testing::{DEAD_URL, spawn_server};
    use axum::Json;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use serde_json::{Value, json};
    use std::sync::Mutex;

    fn embedder_for(url: &str) -> EndpointEmbedder {
        let config = EmbeddingConfig {
            endpoint_url: url.to_string(),
            ..EmbeddingConfig::default()
        };
        EndpointEmbedder::new(&config, Duration::from_secs(5), Arc::new(Unsigned))
            .expect("should construct")
    }

    #[tokio::test]
    async fn returns_first_vector_and_sends_text_inputs() {
        let seen: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
        let captured = seen.clone();
        let router = Router::new().route(
            "/invocations",
            post(move |Json(body): Json<Value>| {
                let captured = captured.clone();
                async move {
                    *captured.lock().unwrap() = Some(body);
                    Json(json!({ "embedding": [[0.5, -1.0, 2.0], [9.0, 9.0, 9.0]] }))
                }
            }),
        );
        let base = spawn_server(router).await;

        let vector = embedder_for(&format!("{base}/invocations"))
            .embed("What is the capital of France?")
            .await
            .expect("embedding should succeed");

        assert_eq!(vector, vec![0.5, -1.0, 2.0]);
        assert_eq!(
            seen.lock().unwrap().clone(),
            Some(json!({ "text_inputs": "What is the capital of France?" }))
        );
    }

    #[tokio::test]
    async fn non_success_status_names_the_endpoint() {
        let router = Router::new().route(
            "/invocations",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "model loading") }),
        );
        let base = spawn_server(router).await;

        let err = embedder_for(&format!("{base}/invocations"))
            .embed("hello")
            .await
            .unwrap_err();

        assert!(matches!(err, QnaError::Embedding(_)));
        let msg = err.to_string();
        assert!(msg.contains("check the embedding endpoint"), "unexpected: {msg}");
        assert!(msg.contains("503"), "unexpected: {msg}");
    }

    #[tokio::test]
    async fn missing_embedding_field_is_an_error() {
        let router = Router::new().route(
            "/invocations",
            post(|| async { Json(json!({ "vectors": [[1.0]] })) }),
        );
        let base = spawn_server(router).await;

        let err = embedder_for(&format!("{base}/invocations"))
            .embed("hello")
            .await
            .unwrap_err();
        assert!(matches!(err, QnaError::Embedding(ref m) if m.contains("malformed")));
    }

    #[tokio::test]
    async fn empty_embedding_list_is_an_error() {
        let router = Router::new().route(
            "/invocations",
            post(|| async { Json(json!({ "embedding": [] })) }),
        );
        let base = spawn_server(router).await;

        let err = embedder_for(&format!("{base}/invocations"))
            .embed("hello")
            .await
            .unwrap_err();
        assert!(matches!(err, QnaError::Embedding(ref m) if m.contains("no vectors")));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_error() {
        let err = embedder_for(DEAD_URL).embed("hello").await.unwrap_err();
        assert!(matches!(err, QnaError::Embedding(ref m) if m.contains("unreachable")));
    }

    #[tokio::test]
    async fn unconfigured_endpoint_is_an_error() {
        let embedder = EndpointEmbedder::new(
            &EmbeddingConfig::default(),
            Duration::from_secs(5),
            Arc::new(Unsigned),
        )
        .expect("should construct");

        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, QnaError::Embedding(ref m) if m.contains("not configured")));
    }

    #[tokio::test]
    async fn signer_is_applied() {
        let router = Router::new().route(
            "/invocations",
            post(|headers: HeaderMap| async move {
                if headers.get("authorization").is_some() {
                    (StatusCode::OK, Json(json!({ "embedding": [[1.0]] })))
                } else {
                    (StatusCode::FORBIDDEN, Json(json!({ "message": "unsigned" })))
                }
            }),
        );
        let base = spawn_server(router).await;
        let config = EmbeddingConfig {
            endpoint_url: format!("{base}/invocations"),
            ..EmbeddingConfig::default()
        };
        let embedder = EndpointEmbedder::new(
            &config,
            Duration::from_secs(5),
            Arc::new(BasicAuth::new("u", "p")),
        )
        .expect("should construct");

        assert_eq!(embedder.embed("x").await.expect("signed call"), vec![1.0]);
    }
}
