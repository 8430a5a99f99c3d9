//! Unified error type for linewatch.

use thiserror::Error;

use crate::types::ProviderKind;

#[derive(Debug, Error)]
pub enum Error {
    /// Network failure or non-success status from an upstream.
    /// `status` is `None` when the request never produced a response.
    #[error("{provider} transient error (status={status:?}): {message}")]
    Transient {
        provider: ProviderKind,
        status: Option<u16>,
        message: String,
    },

    #[error("{provider} returned a malformed response: {message}")]
    MalformedResponse {
        provider: ProviderKind,
        message: String,
    },

    #[error("Catalog load failed: {0}")]
    CatalogLoad(String),

    #[error("Line not found: {0}")]
    LineNotFound(String),

    #[error("Disk cache error: {0}")]
    DiskCache(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// HTTP status carried by a transient error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Transient { status, .. } => *status,
            _ => None,
        }
    }

    /// True for failures that happened below HTTP (DNS, TLS, socket, timeout).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Transient { status: None, .. } | Error::Io(_)
        )
    }
}

/// Leading part of an upstream error body, cut on a character boundary.
pub fn body_excerpt(body: &str) -> String {
    const MAX_CHARS: usize = 200;
    body.chars().take(MAX_CHARS).collect()
}
