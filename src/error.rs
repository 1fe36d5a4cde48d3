//! Error type shared by every Google API integration.

use std::fmt;

use crate::retry::ErrorClass;

/// Errors raised by service handles and API operations.
#[derive(Debug)]
pub enum GapiError {
    /// The API answered with a non-success HTTP status.
    Http { status: u16, message: String },
    /// The request never produced a response (connection, timeout, TLS, ...).
    Network(String),
    /// A handle or location was used before being configured.
    NotConfigured(String),
    /// The service-account key or access token could not be used.
    Credentials(String),
    /// Local file system failure.
    Io(std::io::Error),
    /// A response or key file could not be (de)serialized.
    Json(serde_json::Error),
    /// The API answered successfully but with something we cannot use.
    Unexpected(String),
    /// Caller-supplied data that no request could ever accept.
    InvalidInput(String),
}

impl GapiError {
    /// Builds a configuration error with the usual message.
    pub fn not_configured() -> Self {
        GapiError::NotConfigured("Service is not configured".to_string())
    }

    /// Returns the HTTP status code if this error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            GapiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Decides whether retrying could ever make this error go away.
    ///
    /// Invalid requests (400), permission failures (403) and configuration
    /// problems are fatal. Everything else, including 5xx, 429 and network
    /// failures, is worth another attempt.
    pub fn class(&self) -> ErrorClass {
        match self {
            GapiError::Http {
                status: 400 | 403, ..
            } => ErrorClass::Fatal,
            GapiError::NotConfigured(_)
            | GapiError::Credentials(_)
            | GapiError::InvalidInput(_) => ErrorClass::Fatal,
            _ => ErrorClass::Retryable,
        }
    }
}

impl fmt::Display for GapiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GapiError::Http { status, message } => {
                if message.is_empty() {
                    write!(f, "HTTP {} error", status)
                } else {
                    write!(f, "HTTP {} error: {}", status, message)
                }
            }
            GapiError::Network(msg) => write!(f, "Network error: {}", msg),
            GapiError::NotConfigured(msg) => write!(f, "{}", msg),
            GapiError::Credentials(msg) => write!(f, "Invalid credentials: {}", msg),
            GapiError::Io(e) => write!(f, "I/O error: {}", e),
            GapiError::Json(e) => write!(f, "JSON error: {}", e),
            GapiError::Unexpected(msg) => write!(f, "{}", msg),
            GapiError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
        }
    }
}

impl std::error::Error for GapiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GapiError::Io(e) => Some(e),
            GapiError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for GapiError {
    fn from(e: std::io::Error) -> Self {
        GapiError::Io(e)
    }
}

impl From<serde_json::Error> for GapiError {
    fn from(e: serde_json::Error) -> Self {
        GapiError::Json(e)
    }
}

impl From<reqwest::Error> for GapiError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => GapiError::Http {
                status: status.as_u16(),
                message: String::new(),
            },
            None if e.is_decode() => GapiError::Unexpected(format!("invalid response: {}", e)),
            None => GapiError::Network(e.to_string()),
        }
    }
}

pub type Result<T, E = GapiError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> GapiError {
        GapiError::Http {
            status,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_bad_request_and_forbidden_are_fatal() {
        assert_eq!(http(400).class(), ErrorClass::Fatal);
        assert_eq!(http(403).class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_other_statuses_are_retryable() {
        for status in [401, 404, 429, 500, 502, 503] {
            assert_eq!(http(status).class(), ErrorClass::Retryable, "status {}", status);
        }
    }

    #[test]
    fn test_configuration_errors_are_fatal() {
        assert_eq!(GapiError::not_configured().class(), ErrorClass::Fatal);
        assert_eq!(
            GapiError::Credentials("missing client_email".to_string()).class(),
            ErrorClass::Fatal
        );
        assert_eq!(
            GapiError::InvalidInput("line break in Subject".to_string()).class(),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert_eq!(
            GapiError::Network("connection reset".to_string()).class(),
            ErrorClass::Retryable
        );
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout");
        assert_eq!(GapiError::from(io).class(), ErrorClass::Retryable);
        assert_eq!(
            GapiError::Unexpected("Bad format received".to_string()).class(),
            ErrorClass::Retryable
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(GapiError::not_configured().to_string(), "Service is not configured");
        assert_eq!(http(403).to_string(), "HTTP 403 error: boom");
        let empty = GapiError::Http {
            status: 500,
            message: String::new(),
        };
        assert_eq!(empty.to_string(), "HTTP 500 error");
        assert!(
            GapiError::Credentials("bad key".to_string())
                .to_string()
                .contains("bad key")
        );
    }

    #[test]
    fn test_status() {
        assert_eq!(http(404).status(), Some(404));
        assert_eq!(GapiError::Network("x".to_string()).status(), None);
    }
}
