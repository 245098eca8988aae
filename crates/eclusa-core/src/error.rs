// ── Core error types ──
//
// User-facing errors from eclusa-core. Consumers never see protocol frames
// or HTTP bodies directly: the `From<eclusa_bus::Error>` impl translates
// transport-layer errors into engine-level variants.
//
// `CoreError` is `Clone` so one failed connect attempt can hand the same
// error to every caller that joined it.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to event bus at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Event bus connection timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Not connected to the event bus")]
    NotConnected,

    #[error("Engine has been disposed")]
    EngineClosed,

    // ── Message errors ───────────────────────────────────────────────
    #[error("Could not decode message on '{subject}': {message}")]
    Decode { subject: String, message: String },

    #[error("Invalid subject '{subject}': {reason}")]
    InvalidSubject { subject: String, reason: String },

    #[error("Handler failed: {message}")]
    Handler { message: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    #[error("Not found: {entity_type} {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Shorthand for handler code that wants to reject a message.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Returns `true` for failures a later `connect()` may fix.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::Timeout { .. } | Self::NotConnected
        ) || matches!(self, Self::Api { status: Some(s), .. } if *s >= 500)
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<eclusa_bus::Error> for CoreError {
    fn from(err: eclusa_bus::Error) -> Self {
        match err {
            eclusa_bus::Error::Connect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason,
            },
            eclusa_bus::Error::Closed { reason } => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("connection closed: {reason}"),
            },
            eclusa_bus::Error::NotConnected => CoreError::NotConnected,
            eclusa_bus::Error::Protocol(message) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("protocol error: {message}"),
            },
            eclusa_bus::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            eclusa_bus::Error::Decode { subject, message } => {
                CoreError::Decode { subject, message }
            }
            eclusa_bus::Error::InvalidSubject { subject, reason } => CoreError::InvalidSubject {
                subject,
                reason: reason.to_owned(),
            },
            eclusa_bus::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e.url().map(ToString::to_string).unwrap_or_default(),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            eclusa_bus::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            eclusa_bus::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            eclusa_bus::Error::Api { status: 404, message } => CoreError::NotFound {
                entity_type: "resource".into(),
                identifier: message,
            },
            eclusa_bus::Error::Api { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            eclusa_bus::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
