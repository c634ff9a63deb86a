use std::fmt;

use serde::{Deserialize, Serialize};

use crate::question::Question;

/// Formatted generation input.  Built only by [`assemble`], so the template
/// structure never varies between requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Prompt(String);

impl Prompt {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Combine the retrieved context (empty when the search missed) and the
/// question into the model's chat template.
pub fn assemble(context: &str, question: &Question) -> Prompt {
    Prompt(format!(
        "<|context: {context}|>question: {question}<|endoftext|><|assistant|>"
    ))
}

/// Sampling settings sent with every generation request.  `temperature` and
/// `truncate` serialize as `null` when unset rather than being omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    #[serde(default = "default_do_sample")]
    pub do_sample: bool,

    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,

    #[serde(default = "default_seed")]
    pub seed: u64,

    #[serde(default)]
    pub temperature: Option<f64>,

    #[serde(default)]
    pub truncate: Option<u32>,

    #[serde(default = "default_typical_p")]
    pub typical_p: f64,
}

fn default_do_sample() -> bool {
    true
}
fn default_max_new_tokens() -> u32 {
    200
}
fn default_seed() -> u64 {
    1
}
fn default_typical_p() -> f64 {
    0.2
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            do_sample: default_do_sample(),
            max_new_tokens: default_max_new_tokens(),
            seed: default_seed(),
            temperature: None,
            truncate: None,
            typical_p: default_typical_p(),
        }
    }
}
