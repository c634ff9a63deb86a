//! Credentials for the embedding and search backends.
//!
//! Signers receive the complete [`reqwest::RequestBuilder`], body included.
//! Schemes that hash the body (SigV4 and friends) can split it with
//! `build_split`, sign, and reassemble with `RequestBuilder::from_parts`.

use reqwest::RequestBuilder;

pub trait RequestSigner: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Attach credentials to `request`.  The error string is folded into the
    /// calling backend's error variant.
    fn sign(&self, request: RequestBuilder) -> std::result::Result<RequestBuilder, String>;
}

/// Sends requests as-is.  Used when the backend sits behind network-level
/// access control or a signing proxy.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unsigned;

impl RequestSigner for Unsigned {
    fn name(&self) -> &str {
        "unsigned"
    }

    fn sign(&self, request: RequestBuilder) -> std::result::Result<RequestBuilder, String> {
        Ok(request)
    }
}

/// HTTP basic auth, as used by self-hosted search clusters.
#[derive(Clone)]
pub struct BasicAuth {
    username: String,
    password: String,
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl RequestSigner for BasicAuth {
    fn name(&self) -> &str {
        "basic"
    }

    fn sign(&self, request: RequestBuilder) -> std::result::Result<RequestBuilder, String> {
        Ok(request.basic_auth(&self.username, Some(&self.password)))
    }
}
