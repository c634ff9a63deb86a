pub mod context;
pub mod prompts;
pub mod relay;
