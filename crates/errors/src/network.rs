//! Network-related error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum NetworkError {
    #[error("connection timeout to {url}")]
    Timeout { url: String },

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP error {status}: {message}")]
    HttpError { status: u16, message: String },

    #[error("response from {url} is {size} bytes, limit is {max}")]
    ResponseTooLarge { url: String, size: usize, max: usize },

    #[error("network unavailable")]
    NetworkUnavailable,
}

impl UserFacingError for NetworkError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::Timeout { .. } | Self::NetworkUnavailable | Self::ConnectionRefused(_) => {
                Some("Check network connectivity; the last pinned application stays usable.")
            }
            Self::InvalidUrl(_) => Some("Check the manifest URL and module URLs."),
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidUrl(_) | Self::ResponseTooLarge { .. } => false,
            Self::HttpError { status, .. } => *status >= 500 || *status == 429,
            _ => true,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::Timeout { .. } => "network.timeout",
            Self::DownloadFailed(_) => "network.download_failed",
            Self::ConnectionRefused(_) => "network.connection_refused",
            Self::InvalidUrl(_) => "network.invalid_url",
            Self::HttpError { .. } => "network.http_error",
            Self::ResponseTooLarge { .. } => "network.response_too_large",
            Self::NetworkUnavailable => "network.unavailable",
        };
        Some(code)
    }
}
