use serde::Serialize;

use crate::llm::prompts::{GenerationParameters, Prompt};

/// Body of a streaming generation call: `{"inputs": ..., "parameters": {...}}`.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub inputs: Prompt,
    pub parameters: GenerationParameters,
}

impl GenerateRequest {
    pub fn new(inputs: Prompt, parameters: GenerationParameters) -> Self {
        Self { inputs, parameters }
    }
}
