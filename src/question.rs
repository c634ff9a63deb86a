use std::fmt;

use crate::error::{QnaError, Result};

/// Caller-supplied question text.  Only constructible through [`Question::parse`],
/// so every value that reaches the pipeline is non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question(String);

impl Question {
    /// Validate the raw `q` parameter.  Any non-empty text is kept verbatim,
    /// whitespace included.
    pub fn parse(raw: Option<String>) -> Result<Self> {
        match raw {
            Some(text) if !text.is_empty() => Ok(Self(text)),
            Some(_) => Err(QnaError::RequestValidation(
                "question must not be empty".into(),
            )),
            None => Err(QnaError::RequestValidation(
                "missing query parameter `q`; please input your question".into(),
            )),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
