//! Streaming relay between the text-generation server and the caller.
//!
//! The backend response is read chunk by chunk and each chunk is pushed into
//! a bounded channel whose receiving end is the caller's response body.
//! Nothing is accumulated: a chunk is forwarded as soon as it arrives, in
//! arrival order.  The relay watches the channel for the caller going away
//! and drops the backend response (releasing its connection) when it does.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::GenerationConfig;
use crate::error::{QnaError, Result};
use crate::llm::context::GenerateRequest;
use crate::llm::prompts::{GenerationParameters, Prompt};
use crate::pipeline::{Stage, StageTracker};
use crate::retrieval::body_snippet;

/// Raw response chunks from a generation backend.
pub type ChunkStream = BoxStream<'static, Result<Bytes>>;

/// Sending half of the caller's body channel.  An `Err` item tells the
/// hosting layer to abort the response instead of ending it cleanly.
pub type ChunkSender = mpsc::Sender<Result<Bytes>>;

/// A text-generation server that answers with a byte stream.
#[async_trait::async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Send `request` and return the response body as it arrives.
    async fn open_stream(&self, request: &GenerateRequest) -> Result<ChunkStream>;
}

// ---------------------------------------------------------------------------
// HTTP backend
// ---------------------------------------------------------------------------

/// `POST {host}:{port}/generate_stream` on a text-generation-inference style
/// server.  Only the connect phase has a short timeout; the stream itself is
/// bounded by `generation.timeout_secs` when set.
pub struct StreamingHttpBackend {
    client: Client,
    url: Option<String>,
}

impl StreamingHttpBackend {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let mut builder =
            Client::builder().connect_timeout(Duration::from_secs(config.connect_timeout_secs.max(1)));
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| {
            QnaError::Config(format!("failed to create HTTP client for generation: {e}"))
        })?;

        Ok(Self {
            client,
            url: config.stream_url(),
        })
    }
}

#[async_trait::async_trait]
impl GenerationBackend for StreamingHttpBackend {
    fn name(&self) -> &str {
        "generate_stream"
    }

    async fn open_stream(&self, request: &GenerateRequest) -> Result<ChunkStream> {
        let url = self.url.as_deref().ok_or_else(|| {
            QnaError::GenerationTransport(
                "generation backend is not configured; set LLM_HOST and LLM_PORT".into(),
            )
        })?;

        debug!(url = %url, "opening generation stream");

        let resp = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                QnaError::GenerationTransport(format!("failed to reach generation backend: {e}"))
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(QnaError::GenerationTransport(format!(
                "generation backend returned {status}: {}",
                body_snippet(&body)
            )));
        }

        Ok(resp
            .bytes_stream()
            .map(|chunk| {
                chunk.map_err(|e| {
                    QnaError::GenerationTransport(format!("generation stream interrupted: {e}"))
                })
            })
            .boxed())
    }
}

// ---------------------------------------------------------------------------
// Relay loop
// ---------------------------------------------------------------------------

/// How a relay ended.  Counts cover chunks actually handed to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Backend closed its stream; the caller got everything.
    Completed { chunks: usize, bytes: usize },
    /// Caller disconnected; remaining output was discarded.
    Cancelled { chunks: usize, bytes: usize },
    /// Connect or mid-stream failure; the caller's stream was error-terminated.
    Failed { chunks: usize, bytes: usize },
}

impl RelayOutcome {
    /// `(chunks, bytes)` delivered to the caller.
    pub fn counts(self) -> (usize, usize) {
        match self {
            RelayOutcome::Completed { chunks, bytes }
            | RelayOutcome::Cancelled { chunks, bytes }
            | RelayOutcome::Failed { chunks, bytes } => (chunks, bytes),
        }
    }
}

pub struct GenerationRelay {
    backend: Arc<dyn GenerationBackend>,
    parameters: GenerationParameters,
}

impl GenerationRelay {
    pub fn new(backend: Arc<dyn GenerationBackend>, parameters: GenerationParameters) -> Self {
        Self {
            backend,
            parameters,
        }
    }

    /// Generate an answer for `prompt`, forwarding every backend chunk to
    /// `sink` as it arrives.  Never panics on backend failure; the sink is
    /// dropped on every exit path, which ends the caller's stream.
    pub async fn relay(
        &self,
        prompt: Prompt,
        sink: ChunkSender,
        stages: &mut StageTracker,
    ) -> RelayOutcome {
        let request = GenerateRequest::new(prompt, self.parameters.clone());
        let mut chunks = 0usize;
        let mut bytes = 0usize;

        let opened = tokio::select! {
            biased;
            _ = sink.closed() => {
                info!(backend = self.backend.name(), "caller disconnected before generation started");
                stages.advance(Stage::Closed);
                return RelayOutcome::Cancelled { chunks, bytes };
            }
            opened = self.backend.open_stream(&request) => opened,
        };

        let mut upstream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                error!(backend = self.backend.name(), err = %e, "generation request failed");
                let _ = sink.send(Err(e)).await;
                stages.advance(Stage::Closed);
                return RelayOutcome::Failed { chunks, bytes };
            }
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = sink.closed() => {
                    info!(chunks, bytes, "caller disconnected, dropping generation stream");
                    stages.advance(Stage::Closed);
                    return RelayOutcome::Cancelled { chunks, bytes };
                }
                next = upstream.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    if chunks == 0 {
                        stages.advance(Stage::Streaming);
                    }
                    let len = chunk.len();
                    if sink.send(Ok(chunk)).await.is_err() {
                        info!(chunks, bytes, "caller disconnected, dropping generation stream");
                        stages.advance(Stage::Closed);
                        return RelayOutcome::Cancelled { chunks, bytes };
                    }
                    chunks += 1;
                    bytes += len;
                }
                Some(Err(e)) => {
                    warn!(chunks, bytes, err = %e, "generation stream failed; answer is truncated");
                    let _ = sink.send(Err(e)).await;
                    stages.advance(Stage::Closed);
                    return RelayOutcome::Failed { chunks, bytes };
                }
                None => {
                    info!(chunks, bytes, "generation stream complete");
                    stages.advance(Stage::Closed);
                    return RelayOutcome::Completed { chunks, bytes };
                }
            }
        }
    }
}
