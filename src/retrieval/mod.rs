pub mod embed;
pub mod search;
pub mod signing;

pub use embed::{Embedder, EndpointEmbedder};
pub use search::{SearchIndexClient, VectorSearch};
pub use signing::Unsigned;

/// Trim a backend error body for inclusion in an error message.
pub(crate) fn body_snippet(body: &str) -> String {
    const LIMIT: usize = 300;
    let body = body.trim();
    if body.len() <= LIMIT {
        return body.to_string();
    }
    let mut end = LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
