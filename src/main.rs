mod config;
mod error;
mod llm;
mod pipeline;
mod question;
mod retrieval;
mod server;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::pipeline::Pipeline;

#[tokio::main]
async fn main() {
    // Load .env file (if present) before anything reads env vars
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    if args.iter().any(|a| a == "--default-config") {
        print!("{}", Config::default_config_contents());
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from);

    let config = match Config::load(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load config: {e}");
            return;
        }
    };

    let embedding_url = config.embedding.invocation_url();
    let generation_url = config.generation.stream_url();
    info!(
        bind = %config.bind,
        embedding = embedding_url.as_deref().unwrap_or("<unset>"),
        search = %config.search.url,
        search_region = %config.search.region,
        index = %config.search.index,
        generation = generation_url.as_deref().unwrap_or("<unset>"),
        "stream-qna starting"
    );
    if embedding_url.is_none() || config.search.url.is_empty() || generation_url.is_none() {
        warn!("one or more backends are not configured; affected requests will fail");
    }

    let pipeline = match Pipeline::from_config(&config) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            error!("failed to initialise pipeline: {e}");
            return;
        }
    };

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let mut server_handle = {
        let shutdown_rx = shutdown_tx.subscribe();
        let bind = config.bind.clone();
        tokio::spawn(async move {
            if let Err(e) = server::serve(&bind, pipeline, shutdown_rx).await {
                error!("server error: {e}");
            }
        })
    };

    info!("stream-qna is running — press Ctrl+C to stop");

    // The server task only finishes on its own if it failed to start.
    let interrupted = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("failed to listen for ctrl+c: {e}");
            }
            true
        }
        _ = &mut server_handle => false,
    };

    if interrupted {
        info!("shutdown signal received, stopping...");
        let _ = shutdown_tx.send(());
        let _ = server_handle.await;
    }

    info!("stream-qna stopped");
}

fn print_usage() {
    println!(
        "stream-qna — answer questions from a vector index, streaming the generated reply

USAGE:
    stream-qna [OPTIONS]

OPTIONS:
    --config <PATH>     Path to config file (default: ~/.config/stream-qna/config.toml)
    --default-config    Print default config to stdout and exit
    -h, --help          Print this help message

ENDPOINT:
    GET /?q=<question>  Stream an answer (text/event-stream)
    GET /health         Liveness check

ENVIRONMENT:
    QNA_BIND              Listener address (default 127.0.0.1:3040)
    SM_ENDPOINT_NAME      Embedding endpoint name
    SM_ENDPOINT_REGION    Embedding endpoint region
    SM_ENDPOINT_URL       Explicit embedding invocation URL
    OPENSEARCH_URL        Search cluster URL
    OPENSEARCH_REGION     Search cluster region
    OPENSEARCH_INDEX_NAME Index holding the document vectors
    OPENSEARCH_USER       Basic-auth user for the search cluster
    OPENSEARCH_PASS       Basic-auth password for the search cluster
    LLM_HOST              Text-generation server host
    LLM_PORT              Text-generation server port
    RUST_LOG              Log filter (default: info)"
    );
}
