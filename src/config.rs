use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{QnaError, Result};
use crate::llm::prompts::GenerationParameters;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address the HTTP listener binds to.
    /// Can be overridden with the `QNA_BIND` env var.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Timeout for the bounded request/response calls (embedding and search).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub generation: GenerationConfig,
}

// -- Embedding ---------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EmbeddingConfig {
    /// Name of the embedding inference endpoint (`SM_ENDPOINT_NAME`).
    #[serde(default)]
    pub endpoint_name: String,

    /// Region hosting the endpoint (`SM_ENDPOINT_REGION`).
    #[serde(default)]
    pub region: String,

    /// Full invocation URL.  When empty it is derived from the endpoint
    /// name and region.  Can be overridden with `SM_ENDPOINT_URL`.
    #[serde(default)]
    pub endpoint_url: String,
}

impl EmbeddingConfig {
    /// The URL the embedding request is posted to, if enough is configured
    /// to build one.
    pub fn invocation_url(&self) -> Option<String> {
        if !self.endpoint_url.is_empty() {
            return Some(self.endpoint_url.trim_end_matches('/').to_string());
        }
        if self.endpoint_name.is_empty() || self.region.is_empty() {
            return None;
        }
        Some(format!(
            "https://runtime.sagemaker.{}.amazonaws.com/endpoints/{}/invocations",
            self.region, self.endpoint_name
        ))
    }
}

// -- Vector search -----------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// Base URL of the search cluster (`OPENSEARCH_URL`).
    #[serde(default)]
    pub url: String,

    /// Region of the search collection (`OPENSEARCH_REGION`).  The built-in
    /// signers ignore it; it is carried for an injected SigV4 signer.
    #[serde(default)]
    pub region: String,

    /// Index holding the document vectors (`OPENSEARCH_INDEX_NAME`).
    #[serde(default)]
    pub index: String,

    #[serde(default = "default_vector_field")]
    pub vector_field: String,

    /// Field of the stored document that holds the context text.
    #[serde(default = "default_text_field")]
    pub text_field: String,

    /// Basic-auth credentials for clusters that are not behind request
    /// signing (`OPENSEARCH_USER` / `OPENSEARCH_PASS`).
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Set to false for local clusters with self-signed certificates.
    #[serde(default = "default_true")]
    pub verify_certs: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            region: String::new(),
            index: String::new(),
            vector_field: default_vector_field(),
            text_field: default_text_field(),
            username: String::new(),
            password: String::new(),
            verify_certs: true,
        }
    }
}

// -- Generation --------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    /// Host of the text-generation server (`LLM_HOST`).
    #[serde(default)]
    pub host: String,

    /// Port of the text-generation server (`LLM_PORT`).
    #[serde(default = "default_generation_port")]
    pub port: u16,

    #[serde(default = "default_generation_path")]
    pub path: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Upper bound on the whole streamed generation (0 = no limit).
    /// Keep this far above `request_timeout_secs`; a tight value truncates
    /// answers that are still being produced.
    #[serde(default)]
    pub timeout_secs: u64,

    /// Chunks buffered between the backend reader and the caller writer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default)]
    pub parameters: GenerationParameters,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_generation_port(),
            path: default_generation_path(),
            connect_timeout_secs: default_connect_timeout_secs(),
            timeout_secs: 0,
            channel_capacity: default_channel_capacity(),
            parameters: GenerationParameters::default(),
        }
    }
}

impl GenerationConfig {
    pub fn stream_url(&self) -> Option<String> {
        if self.host.is_empty() {
            return None;
        }
        let host = self.host.trim_end_matches('/');
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        if host.starts_with("http://") || host.starts_with("https://") {
            Some(format!("{host}:{}{path}", self.port))
        } else {
            Some(format!("http://{host}:{}{path}", self.port))
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_bind() -> String {
    "127.0.0.1:3040".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_vector_field() -> String {
    "vector_field".to_string()
}
fn default_text_field() -> String {
    "text".to_string()
}
fn default_true() -> bool {
    true
}
fn default_generation_port() -> u16 {
    8080
}
fn default_generation_path() -> String {
    "/generate_stream".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_channel_capacity() -> usize {
    32
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_request_timeout_secs(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

// -- Config impl ---------------------------------------------------------

impl Config {
    /// Load config from the given path, or the default XDG config location,
    /// then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path(),
        };

        let mut config = if config_path.exists() {
            info!("loading config from {}", config_path.display());
            let contents = std::fs::read_to_string(&config_path).map_err(QnaError::Io)?;
            toml::from_str(&contents)
                .map_err(|e| QnaError::Config(format!("parse error: {e}")))?
        } else {
            info!("no config file found, using defaults");
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay values from the environment.  Empty values are ignored so an
    /// exported-but-blank variable does not wipe a configured field.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("QNA_BIND") {
            self.bind = v;
        }
        if let Some(v) = get("SM_ENDPOINT_NAME") {
            self.embedding.endpoint_name = v;
        }
        if let Some(v) = get("SM_ENDPOINT_REGION") {
            self.embedding.region = v;
        }
        if let Some(v) = get("SM_ENDPOINT_URL") {
            self.embedding.endpoint_url = v;
        }
        if let Some(v) = get("OPENSEARCH_URL") {
            self.search.url = v;
        }
        if let Some(v) = get("OPENSEARCH_REGION") {
            self.search.region = v;
        }
        if let Some(v) = get("OPENSEARCH_INDEX_NAME") {
            self.search.index = v;
        }
        if let Some(v) = get("OPENSEARCH_USER") {
            self.search.username = v;
        }
        if let Some(v) = get("OPENSEARCH_PASS") {
            self.search.password = v;
        }
        if let Some(v) = get("LLM_HOST") {
            self.generation.host = v;
        }
        if let Some(v) = get("LLM_PORT") {
            match v.trim().parse::<u16>() {
                Ok(port) => self.generation.port = port,
                Err(_) => warn!(value = %v, "ignoring LLM_PORT: not a valid port"),
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Returns the default config file path: `$XDG_CONFIG_HOME/stream-qna/config.toml`
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("stream-qna")
            .join("config.toml")
    }

    /// Generate the default config file contents.
    pub fn default_config_contents() -> &'static str {
        include_str!("../config.example.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn default_config_has_expected_values() {
        let c = Config::default();
        assert_eq!(c.bind, "127.0.0.1:3040");
        assert_eq!(c.request_timeout_secs, 30);
        assert!(c.embedding.endpoint_name.is_empty());
        assert!(c.search.url.is_empty());
        assert!(c.generation.host.is_empty());
    }

    #[test]
    fn default_search_config() {
        let s = SearchConfig::default();
        assert_eq!(s.vector_field, "vector_field");
        assert_eq!(s.text_field, "text");
        assert!(s.verify_certs);
        assert!(s.username.is_empty());
    }

    #[test]
    fn default_generation_config() {
        let g = GenerationConfig::default();
        assert_eq!(g.port, 8080);
        assert_eq!(g.path, "/generate_stream");
        assert_eq!(g.connect_timeout_secs, 10);
        assert_eq!(g.timeout(), None);
        assert_eq!(g.channel_capacity, 32);
    }

    #[test]
    fn invocation_url_derived_from_name_and_region() {
        let e = EmbeddingConfig {
            endpoint_name: "gpt-j-embed".into(),
            region: "ap-southeast-1".into(),
            endpoint_url: String::new(),
        };
        assert_eq!(
            e.invocation_url().as_deref(),
            Some("https://runtime.sagemaker.ap-southeast-1.amazonaws.com/endpoints/gpt-j-embed/invocations")
        );
    }

    #[test]
    fn invocation_url_prefers_explicit_url() {
        let e = EmbeddingConfig {
            endpoint_name: "ignored".into(),
            region: "us-east-1".into(),
            endpoint_url: "http://127.0.0.1:9000/invocations/".into(),
        };
        assert_eq!(
            e.invocation_url().as_deref(),
            Some("http://127.0.0.1:9000/invocations")
        );
    }

    #[test]
    fn invocation_url_none_when_unconfigured() {
        assert_eq!(EmbeddingConfig::default().invocation_url(), None);
    }

    #[test]
    fn stream_url_adds_scheme_and_path() {
        let g = GenerationConfig {
            host: "10.0.0.7".into(),
            port: 8080,
            ..GenerationConfig::default()
        };
        assert_eq!(
            g.stream_url().as_deref(),
            Some("http://10.0.0.7:8080/generate_stream")
        );
    }

    #[test]
    fn stream_url_keeps_explicit_scheme() {
        let g = GenerationConfig {
            host: "https://tgi.internal/".into(),
            port: 443,
            path: "generate_stream".into(),
            ..GenerationConfig::default()
        };
        assert_eq!(
            g.stream_url().as_deref(),
            Some("https://tgi.internal:443/generate_stream")
        );
    }

    #[test]
    fn stream_url_none_without_host() {
        assert_eq!(GenerationConfig::default().stream_url(), None);
    }

    #[test]
    fn env_overrides_apply() {
        let vars = env(&[
            ("SM_ENDPOINT_NAME", "embed-ep"),
            ("SM_ENDPOINT_REGION", "eu-west-1"),
            ("OPENSEARCH_URL", "https://search.local:9200"),
            ("OPENSEARCH_REGION", "us-east-2"),
            ("OPENSEARCH_INDEX_NAME", "docs"),
            ("OPENSEARCH_USER", "admin"),
            ("OPENSEARCH_PASS", "secret"),
            ("LLM_HOST", "llm.local"),
            ("LLM_PORT", "9090"),
            ("QNA_BIND", "0.0.0.0:8000"),
        ]);
        let mut c = Config::default();
        c.apply_env(|k| vars.get(k).cloned());

        assert_eq!(c.embedding.endpoint_name, "embed-ep");
        assert_eq!(c.embedding.region, "eu-west-1");
        assert_eq!(c.search.url, "https://search.local:9200");
        assert_eq!(c.search.region, "us-east-2");
        assert_eq!(c.search.index, "docs");
        assert_eq!(c.search.username, "admin");
        assert_eq!(c.search.password, "secret");
        assert_eq!(c.generation.host, "llm.local");
        assert_eq!(c.generation.port, 9090);
        assert_eq!(c.bind, "0.0.0.0:8000");
    }

    #[test]
    fn invalid_port_env_is_ignored() {
        let vars = env(&[("LLM_PORT", "not-a-port")]);
        let mut c = Config::default();
        c.apply_env(|k| vars.get(k).cloned());
        assert_eq!(c.generation.port, 8080);
    }

    #[test]
    fn blank_env_does_not_clear_field() {
        let vars = env(&[("OPENSEARCH_INDEX_NAME", "  ")]);
        let mut c = Config::default();
        c.search.index = "docs".into();
        c.apply_env(|k| vars.get(k).cloned());
        assert_eq!(c.search.index, "docs");
    }

    #[test]
    fn parse_partial_toml() {
        let c: Config = toml::from_str(
            r#"
            request_timeout_secs = 5

            [search]
            url = "https://search.local"
            index = "kb"

            [generation]
            host = "llm"
            timeout_secs = 600

            [generation.parameters]
            max_new_tokens = 64
            "#,
        )
        .expect("should parse");

        assert_eq!(c.request_timeout_secs, 5);
        assert_eq!(c.search.index, "kb");
        assert_eq!(c.search.text_field, "text");
        assert_eq!(c.generation.timeout(), Some(Duration::from_secs(600)));
        assert_eq!(c.generation.parameters.max_new_tokens, 64);
        assert_eq!(c.generation.parameters.seed, 1);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "request_timeout_secs = 7\n").expect("write");
        let c = Config::load(Some(&path)).expect("should load");
        assert_eq!(c.request_timeout_secs, 7);
    }

    #[test]
    fn load_rejects_malformed_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "bind = [").expect("write");
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("parse error"), "unexpected: {err}");
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let c = Config::load(Some(&dir.path().join("absent.toml"))).expect("defaults");
        assert_eq!(c.request_timeout_secs, 30);
    }

    #[test]
    fn default_config_contents_parses() {
        let contents = Config::default_config_contents();
        assert!(!contents.is_empty());
        let c: Config = toml::from_str(contents).expect("example config should parse");
        assert_eq!(c.generation.path, "/generate_stream");
    }

    #[test]
    fn default_config_path_has_project_name() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("stream-qna"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }
}
