//! Error types for xsrfscan

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for xsrfscan operations
#[derive(Debug, Error)]
pub enum XsrfError {
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Template error: {0}")]
    TemplateError(#[from] tera::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Target unreachable: {0}")]
    TargetUnreachable(String),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Transport-level failure surfaced by a [`crate::http::Fetcher`].
///
/// Kept separate from [`XsrfError`] so probe evidence can carry it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum NetworkError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("connection to {url} failed: {message}")]
    Connection { url: String, message: String },

    #[error("TLS failure for {url}: {message}")]
    Tls { url: String, message: String },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("rate limited by {url}")]
    RateLimited { url: String },

    #[error("invalid request URL {url}")]
    InvalidUrl { url: String },
}

impl NetworkError {
    /// Classifies a reqwest failure into a typed network error
    pub fn from_reqwest(url: &str, err: &reqwest::Error) -> Self {
        let url = url.to_string();
        if err.is_timeout() {
            return NetworkError::Timeout { url };
        }
        if err.is_builder() {
            return NetworkError::InvalidUrl { url };
        }

        let message = error_chain(err);
        let lower = message.to_lowercase();
        if lower.contains("certificate") || lower.contains("tls") || lower.contains("ssl") {
            NetworkError::Tls { url, message }
        } else {
            NetworkError::Connection { url, message }
        }
    }

    /// URL the failed request targeted
    pub fn url(&self) -> &str {
        match self {
            NetworkError::Timeout { url }
            | NetworkError::Connection { url, .. }
            | NetworkError::Tls { url, .. }
            | NetworkError::Status { url, .. }
            | NetworkError::RateLimited { url }
            | NetworkError::InvalidUrl { url } => url,
        }
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}

/// Result type alias for xsrfscan operations
pub type Result<T> = std::result::Result<T, XsrfError>;
