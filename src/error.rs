use thiserror::Error;

#[derive(Error, Debug)]
pub enum QnaError {
    #[error("invalid request: {0}")]
    RequestValidation(String),

    #[error("embedding backend error: {0}")]
    Embedding(String),

    #[error("search backend error: {0}")]
    Search(String),

    #[error("generation transport error: {0}")]
    GenerationTransport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, QnaError>;
