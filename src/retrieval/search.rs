//! Nearest-neighbour lookup against a search cluster's k-NN index.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::config::SearchConfig;
use crate::error::{QnaError, Result};
use crate::retrieval::body_snippet;
use crate::retrieval::signing::{BasicAuth, RequestSigner, Unsigned};

/// Top-ranked stored document for a query vector.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub score: Option<f32>,
    pub text: String,
}

/// Finds the single stored document closest to a vector.  `Ok(None)` means
/// the index answered with zero hits, which is not an error.
#[async_trait::async_trait]
pub trait VectorSearch: Send + Sync {
    async fn nearest(&self, vector: &[f32]) -> Result<Option<SearchHit>>;
}

/// k-NN client for an OpenSearch-compatible `_search` endpoint.
pub struct SearchIndexClient {
    client: Client,
    base_url: String,
    index: String,
    vector_field: String,
    text_field: String,
    signer: Arc<dyn RequestSigner>,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: HitList,
}

#[derive(Deserialize)]
struct HitList {
    hits: Vec<RawHit>,
}

#[derive(Deserialize)]
struct RawHit {
    #[serde(rename = "_score", default)]
    score: Option<f32>,
    #[serde(rename = "_source", default)]
    source: Map<String, Value>,
}

impl SearchIndexClient {
    pub fn new(
        config: &SearchConfig,
        timeout: Duration,
        signer: Arc<dyn RequestSigner>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!config.verify_certs)
            .build()
            .map_err(|e| QnaError::Config(format!("failed to create HTTP client for search: {e}")))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            vector_field: config.vector_field.clone(),
            text_field: config.text_field.clone(),
            signer,
        })
    }

    /// Pick the signer for a config: basic auth when both credentials are
    /// present, otherwise unsigned.
    pub fn signer_for(config: &SearchConfig) -> Arc<dyn RequestSigner> {
        if !config.username.is_empty() && !config.password.is_empty() {
            Arc::new(BasicAuth::new(&config.username, &config.password))
        } else {
            Arc::new(Unsigned)
        }
    }

    fn query(&self, vector: &[f32]) -> Value {
        let mut knn = Map::new();
        knn.insert(
            self.vector_field.clone(),
            json!({ "vector": vector, "k": 1 }),
        );
        json!({
            "size": 1,
            "query": { "knn": knn }
        })
    }
}

#[async_trait::async_trait]
impl VectorSearch for SearchIndexClient {
    async fn nearest(&self, vector: &[f32]) -> Result<Option<SearchHit>> {
        if self.base_url.is_empty() || self.index.is_empty() {
            return Err(QnaError::Search(
                "search backend is not configured; set OPENSEARCH_URL and OPENSEARCH_INDEX_NAME"
                    .into(),
            ));
        }

        let url = format!("{}/{}/_search", self.base_url, self.index);
        let builder = self.client.post(&url).json(&self.query(vector));

        let request = self
            .signer
            .sign(builder)
            .map_err(|e| QnaError::Search(format!("failed to sign search request: {e}")))?
            .build()
            .map_err(|e| QnaError::Search(format!("failed to build search request: {e}")))?;

        debug!(index = %self.index, dim = vector.len(), "running k-NN query");

        let resp = self
            .client
            .execute(request)
            .await
            .map_err(|e| QnaError::Search(format!("search request failed: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| QnaError::Search(format!("failed to read search response: {e}")))?;

        if !status.is_success() {
            return Err(QnaError::Search(format!(
                "search returned {status}: {}",
                body_snippet(&body)
            )));
        }

        let parsed: SearchResponse = serde_json::from_str(&body)
            .map_err(|e| QnaError::Search(format!("malformed search response: {e}")))?;

        let Some(top) = parsed.hits.hits.into_iter().next() else {
            debug!(index = %self.index, "no hits");
            return Ok(None);
        };

        let text = top
            .source
            .get(&self.text_field)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                QnaError::Search(format!(
                    "top hit has no string field `{}` in _source",
                    self.text_field
                ))
            })?
            .to_string();

        debug!(score = ?top.score, len = text.len(), "top hit retrieved");
        Ok(Some(SearchHit {
            score: top.score,
            text,
        }))
    }
}
