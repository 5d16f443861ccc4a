//! API error types with user-facing message mapping

use thiserror::Error;

/// Errors that can occur when talking to the helpdesk service
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Connection refused, DNS failure, reset mid-request
    #[error("network error - {message}")]
    Network { message: String },
    /// Request exceeded the client timeout
    #[error("request timed out")]
    Timeout,
    /// Service answered with a non-2xx status
    #[error("HTTP {status} - {message}")]
    Http { status: u16, message: String },
    /// Response body did not match the expected shape
    #[error("parse error - {message}")]
    Parse { message: String },
    /// Request could not be built (unreadable attachment, bad URL)
    #[error("invalid request - {message}")]
    InvalidRequest { message: String },
}

impl ApiError {
    /// The service answered but could not serve the request yet.
    ///
    /// Only HTTP-level refusals qualify; transport and protocol failures don't.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Http { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Timeout)
    }

    /// HTTP status code, if the service answered
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Message suitable for showing to the person watching the séance
    pub fn user_message(&self) -> &'static str {
        match self {
            ApiError::Network { .. } => "The spirits are restless... network connection failed",
            ApiError::Timeout => "The séance timed out... the spirits have gone silent",
            ApiError::Http { status, .. } => match status {
                400 => "Your incantation was malformed... check your spell",
                401 => "The crypt keeper denies you entry...",
                403 => "Dark forces prevent you from accessing this realm...",
                404 => "The entity you seek has vanished into the void...",
                409 => "A spectral conflict has occurred...",
                500 | 502 | 503 | 504 => "Something wicked happened on the server side",
                _ => UNKNOWN_CURSE,
            },
            ApiError::Parse { .. } | ApiError::InvalidRequest { .. } => UNKNOWN_CURSE,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        ApiError::Network {
            message: message.into(),
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        ApiError::Http {
            status,
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        ApiError::Parse {
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        ApiError::InvalidRequest {
            message: message.into(),
        }
    }
}

const UNKNOWN_CURSE: &str = "An unknown curse has befallen us...";

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::parse(err.to_string())
        } else if err.is_builder() {
            ApiError::invalid_request(err.to_string())
        } else if let Some(status) = err.status() {
            ApiError::http(status.as_u16(), err.to_string())
        } else {
            ApiError::network(err.to_string())
        }
    }
}
