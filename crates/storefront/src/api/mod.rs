//! Vitrine backend API client.
//!
//! # Architecture
//!
//! - One [`ApiClient`] per process, cheaply cloneable via `Arc`
//! - Bearer-token authentication with transparent refresh on `401`
//! - Concurrent `401`s share a single refresh call; each failed request is
//!   replayed once with the new token
//! - A failed refresh clears the session and surfaces
//!   [`ApiError::SessionExpired`]
//!
//! # Example
//!
//! ```rust,ignore
//! use vitrine_storefront::api::{ApiClient, ApiRequest};
//!
//! let api = ApiClient::new(&config)?;
//! let orders: Vec<Order> = api.get("/api/orders/user/orders").await?;
//! ```

mod client;
mod session;

pub use client::{ApiClient, ApiRequest};
pub use session::AuthSession;

use thiserror::Error;

/// Errors that can occur when talking to the backend API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed (connection, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend returned a non-success status.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Request path could not be joined to the base URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The session could not be refreshed; the user must sign in again.
    #[error("Session expired")]
    SessionExpired,

    /// Rate limited by the backend.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),
}

impl ApiError {
    /// HTTP status carried by the error, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::NotFound(_) => Some(404),
            Self::SessionExpired => Some(401),
            Self::RateLimited(_) => Some(429),
            Self::Http(_) | Self::Parse(_) | Self::InvalidUrl(_) => None,
        }
    }

    /// Whether the error is a network-level failure rather than an answer
    /// from the backend.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_))
    }
}

/// Pull a human-readable message out of an error response body.
///
/// The backend answers with `{"message": ...}`, `{"error": ...}` or
/// `{"detail": ...}`; anything else is returned verbatim (truncated).
pub(crate) fn extract_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "error", "detail"] {
            if let Some(message) = value.get(key).and_then(serde_json::Value::as_str) {
                return message.to_string();
            }
        }
    }
    body.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = ApiError::Api {
            status: 422,
            message: "Cupom expirado".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 422 - Cupom expirado");
        assert_eq!(err.status(), Some(422));
    }

    #[test]
    fn test_rate_limited_error() {
        let err = ApiError::RateLimited(60);
        assert_eq!(err.to_string(), "Rate limited, retry after 60 seconds");
        assert_eq!(err.status(), Some(429));
    }

    #[test]
    fn test_extract_message_json_keys() {
        assert_eq!(extract_message(r#"{"message": "Endereço inválido"}"#), "Endereço inválido");
        assert_eq!(extract_message(r#"{"error": "not authorized"}"#), "not authorized");
        assert_eq!(extract_message(r#"{"detail": "Not found."}"#), "Not found.");
    }

    #[test]
    fn test_extract_message_plain_text_truncated() {
        let body = "x".repeat(1000);
        assert_eq!(extract_message(&body).len(), 200);
        assert_eq!(extract_message("Bad Gateway"), "Bad Gateway");
    }
}
