//! Request-scoped orchestration: embed → search → assemble → relay.
//!
//! Stages 1–3 run inline and must all succeed before [`Pipeline::run`]
//! returns, so the hosting layer only commits a `200` once there is an
//! answer to stream.  Stage 4 runs on its own task and feeds the returned
//! [`AnswerStream`].

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::Result;
use crate::llm::prompts::{self, Prompt};
use crate::llm::relay::{GenerationBackend, GenerationRelay, StreamingHttpBackend};
use crate::question::Question;
use crate::retrieval::{Embedder, EndpointEmbedder, SearchIndexClient, Unsigned, VectorSearch};

/// Caller-facing body: answer chunks in backend order, ending cleanly on
/// completion or with an `Err` item when generation broke off.
pub type AnswerStream = ReceiverStream<Result<Bytes>>;

// -- Stage tracking ----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Embedding,
    Searching,
    Assembling,
    Generating,
    Streaming,
    Closed,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Closed | Stage::Failed)
    }

    /// Legal moves of the per-request state machine.
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        match (self, next) {
            (Idle, Embedding)
            | (Embedding, Searching)
            | (Searching, Assembling)
            | (Assembling, Generating)
            | (Generating, Streaming)
            | (Generating, Closed)
            | (Streaming, Closed) => true,
            (Embedding | Searching | Assembling, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Embedding => "embedding",
            Stage::Searching => "searching",
            Stage::Assembling => "assembling",
            Stage::Generating => "generating",
            Stage::Streaming => "streaming",
            Stage::Closed => "closed",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks where one request is in the pipeline.
#[derive(Debug)]
pub struct StageTracker {
    history: Vec<Stage>,
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            history: vec![Stage::Idle],
        }
    }

    pub fn current(&self) -> Stage {
        self.history.last().copied().unwrap_or(Stage::Idle)
    }

    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    /// Move to `next`.  Illegal moves are logged and ignored.
    pub fn advance(&mut self, next: Stage) {
        let current = self.current();
        if !current.can_advance_to(next) {
            warn!(from = %current, to = %next, "ignoring illegal stage transition");
            debug_assert!(false, "illegal stage transition {current} -> {next}");
            return;
        }
        debug!(from = %current, to = %next, "stage transition");
        self.history.push(next);
    }
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

// -- Pipeline ----------------------------------------------------------------

pub struct Pipeline {
    embedder: Arc<dyn Embedder>,
    search: Arc<dyn VectorSearch>,
    relay: Arc<GenerationRelay>,
    channel_capacity: usize,
}

impl Pipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        search: Arc<dyn VectorSearch>,
        relay: Arc<GenerationRelay>,
        channel_capacity: usize,
    ) -> Self {
        Self {
            embedder,
            search,
            relay,
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Wire the HTTP-backed clients from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let timeout = config.request_timeout();

        let embedder = EndpointEmbedder::new(&config.embedding, timeout, Arc::new(Unsigned))?;
        let search = SearchIndexClient::new(
            &config.search,
            timeout,
            SearchIndexClient::signer_for(&config.search),
        )?;
        let backend: Arc<dyn GenerationBackend> =
            Arc::new(StreamingHttpBackend::new(&config.generation)?);
        let relay = GenerationRelay::new(backend, config.generation.parameters.clone());

        Ok(Self::new(
            Arc::new(embedder),
            Arc::new(search),
            Arc::new(relay),
            config.generation.channel_capacity,
        ))
    }

    /// Run stages 1–3 and return the prompt for generation.  Any failure
    /// leaves `stages` in [`Stage::Failed`].
    pub async fn prepare(&self, question: &Question, stages: &mut StageTracker) -> Result<Prompt> {
        stages.advance(Stage::Embedding);
        let vector = match self.embedder.embed(question.as_str()).await {
            Ok(v) => v,
            Err(e) => {
                stages.advance(Stage::Failed);
                return Err(e);
            }
        };

        stages.advance(Stage::Searching);
        let hit = match self.search.nearest(&vector).await {
            Ok(hit) => hit,
            Err(e) => {
                stages.advance(Stage::Failed);
                return Err(e);
            }
        };

        stages.advance(Stage::Assembling);
        let context = match hit {
            Some(hit) => {
                debug!(score = ?hit.score, "using retrieved context");
                hit.text
            }
            None => {
                info!("no matching document; answering without context");
                String::new()
            }
        };

        Ok(prompts::assemble(&context, question))
    }

    /// Answer `question`.  On success the generation relay is already running
    /// and the returned stream yields its output.
    pub async fn run(&self, question: Question) -> Result<AnswerStream> {
        let request_id = Uuid::new_v4();
        let span = info_span!("qna", %request_id);

        let mut stages = StageTracker::new();
        let prompt = match self.prepare(&question, &mut stages).instrument(span.clone()).await {
            Ok(prompt) => prompt,
            Err(e) => {
                span.in_scope(|| warn!(stage = %stages.current(), err = %e, "pipeline failed"));
                return Err(e);
            }
        };
        stages.advance(Stage::Generating);

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let relay = self.relay.clone();
        tokio::spawn(
            async move {
                debug!(prompt_len = prompt.as_str().len(), "starting generation");
                let outcome = relay.relay(prompt, tx, &mut stages).await;
                debug_assert!(stages.current().is_terminal());
                let (chunks, bytes) = outcome.counts();
                debug!(chunks, bytes, stages = ?stages.history(), "relay finished");
            }
            .instrument(span),
        );

        Ok(ReceiverStream::new(rx))
    }
}
