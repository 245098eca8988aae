use thiserror::Error;

/// Top-level error type for the `eclusa-bus` crate.
///
/// Covers every failure mode across the bus transport, the wire codec,
/// bus discovery, and the REST command client. `eclusa-core` maps these
/// into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Bus transport ───────────────────────────────────────────────
    /// The transport handshake could not be completed.
    #[error("Event bus connection failed: {0}")]
    Connect(String),

    /// The transport session closed (server close frame, stream ended, or
    /// the session was shut down locally).
    #[error("Event bus connection closed: {reason}")]
    Closed { reason: String },

    /// An operation needs a live session and none exists.
    #[error("Not connected to the event bus")]
    NotConnected,

    /// The server violated the wire protocol or reported `-ERR`.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Handshake or request exceeded its time budget.
    #[error("Timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Codec ───────────────────────────────────────────────────────
    /// A message payload was not a UTF-8 JSON object.
    #[error("Could not decode message on '{subject}': {message}")]
    Decode { subject: String, message: String },

    /// A subject string failed validation.
    #[error("Invalid subject '{subject}': {reason}")]
    InvalidSubject { subject: String, reason: &'static str },

    // ── HTTP (discovery + command boundary) ─────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS configuration error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Non-success response from the REST API.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Connect(_) | Self::Closed { .. } | Self::Timeout { .. } | Self::NotConnected => {
                true
            }
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Api { status: 404, .. } => true,
            _ => false,
        }
    }
}
