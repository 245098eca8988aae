//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use eclusa_config::ConfigError;
use eclusa_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not connect to {url}")]
    #[diagnostic(
        code(eclusa::connection_failed),
        help(
            "Check that the backend and its event bus are reachable.\n\
             Try: eclusa bus info --verbose"
        )
    )]
    ConnectionFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication failed")]
    #[diagnostic(
        code(eclusa::auth_failed),
        help(
            "Verify the token for this profile.\n\
             Run: eclusa config set-token, or set ECLUSA_TOKEN."
        )
    )]
    AuthFailed,

    // ── Resources ────────────────────────────────────────────────────

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(eclusa::not_found),
        help("Run: eclusa {list_command} to see available {resource_type}s")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── API / bus ────────────────────────────────────────────────────

    #[error("API error ({code}): {message}")]
    #[diagnostic(code(eclusa::api_error))]
    ApiError { code: String, message: String },

    #[error("{message}")]
    #[diagnostic(code(eclusa::bus))]
    Bus { message: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(eclusa::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(eclusa::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: eclusa config init --url <API_URL>"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Configuration file not found")]
    #[diagnostic(
        code(eclusa::no_config),
        help(
            "Create one with: eclusa config init --url <API_URL>\n\
             Or pass --api-url / set ECLUSA_API_URL.\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(eclusa::config))]
    Config(Box<figment::Error>),

    // ── Timeout ──────────────────────────────────────────────────────

    #[error("Timed out after {seconds}s")]
    #[diagnostic(
        code(eclusa::timeout),
        help("Increase the timeout (--timeout, connect_timeout_secs) or check the backend.")
    )]
    Timeout { seconds: u64 },

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(eclusa::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed => exit_code::AUTH,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::NoConfig { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed {
                url: if url.is_empty() { "(unknown)".into() } else { url },
                source: reason.into(),
            },

            CoreError::NotConnected => CliError::ConnectionFailed {
                url: "(disconnected)".into(),
                source: "Event bus connection was lost".into(),
            },

            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },

            CoreError::Api {
                status: Some(401 | 403),
                ..
            } => CliError::AuthFailed,

            CoreError::Api { message, status } => CliError::ApiError {
                code: status.map_or_else(|| "unknown".into(), |s| s.to_string()),
                message,
            },

            CoreError::NotFound {
                entity_type,
                identifier,
            } => CliError::NotFound {
                list_command: format!("{entity_type}s list"),
                resource_type: entity_type,
                identifier,
            },

            CoreError::Config { message } => CliError::Validation {
                field: "input".into(),
                reason: message,
            },

            CoreError::InvalidSubject { subject, reason } => CliError::Validation {
                field: "subject".into(),
                reason: format!("'{subject}': {reason}"),
            },

            other @ (CoreError::EngineClosed
            | CoreError::Decode { .. }
            | CoreError::Handler { .. }
            | CoreError::Internal(_)) => CliError::Bus {
                message: other.to_string(),
            },
        }
    }
}

impl From<eclusa_bus::Error> for CliError {
    fn from(err: eclusa_bus::Error) -> Self {
        CoreError::from(err).into()
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::UnknownProfile { name, available } => {
                CliError::ProfileNotFound { name, available }
            }
            ConfigError::Keyring { message } => CliError::Validation {
                field: "keyring".into(),
                reason: message,
            },
            ConfigError::Serialization(e) => CliError::Validation {
                field: "config".into(),
                reason: e.to_string(),
            },
            ConfigError::Figment(e) => CliError::Config(e),
            ConfigError::Io(e) => CliError::Io(e),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_map_to_auth_exit_code() {
        let err = CliError::from(CoreError::Api {
            message: "denied".into(),
            status: Some(401),
        });
        assert_eq!(err.exit_code(), exit_code::AUTH);
    }

    #[test]
    fn bus_not_found_names_resource() {
        let err = CliError::from(eclusa_bus::Error::Api {
            status: 404,
            message: "fault 9".into(),
        });
        assert_eq!(err.exit_code(), exit_code::NOT_FOUND);
    }

    #[test]
    fn connect_failures_use_connection_exit_code() {
        let err = CliError::from(CoreError::ConnectionFailed {
            url: "wss://scada.local:9222".into(),
            reason: "refused".into(),
        });
        assert_eq!(err.exit_code(), exit_code::CONNECTION);
        assert_eq!(err.to_string(), "Could not connect to wss://scada.local:9222");
    }

    #[test]
    fn unknown_profile_maps_through() {
        let err = CliError::from(ConfigError::UnknownProfile {
            name: "b".into(),
            available: "a".into(),
        });
        assert!(matches!(err, CliError::ProfileNotFound { .. }));
    }
}
