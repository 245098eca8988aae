//! Shared configuration for the eclusa console.
//!
//! TOML profiles, token resolution (env + keyring + plaintext), and
//! translation to `eclusa_core::EngineConfig` and `eclusa_bus::HttpConfig`.
//! The CLI layers its flag overrides on top of what this crate resolves.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use eclusa_bus::{HttpConfig, TlsMode};
use eclusa_core::{EngineConfig, ReconnectPolicy, SubjectCatalog};

/// Keyring service name for stored bus/API tokens.
const KEYRING_SERVICE: &str = "eclusa";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found (available: {available})")]
    UnknownProfile { name: String, available: String },

    #[error("keyring error: {message}")]
    Keyring { message: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named plant profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Profile chosen by an explicit name, else `default_profile`, else
    /// `"default"`.
    pub fn active_profile_name(&self, explicit: Option<&str>) -> String {
        explicit
            .map(ToOwned::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into())
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile {
                name: name.into(),
                available: self.profile_names_display(),
            })
    }

    /// Profile names in sorted order.
    pub fn profile_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn profile_names_display(&self) -> String {
        let names = self.profile_names();
        if names.is_empty() {
            "(none)".into()
        } else {
            names.join(", ")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default)]
    pub insecure: bool,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Bus handshake budget in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            insecure: false,
            timeout: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    10
}

/// A named plant profile: one backend API plus its event bus.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Profile {
    /// Backend base URL (e.g., "https://scada.local:8443").
    pub api_url: String,

    /// Event bus URL. When absent the CLI asks the backend via discovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bus_url: Option<String>,

    /// Bearer token (plaintext -- prefer keyring or env var).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Environment variable name containing the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    /// Path to custom CA certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,

    /// Override HTTP timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Override bus handshake budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,

    /// Subject role overrides, same shape as the discovery `subjects` map.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub subjects: HashMap<String, String>,

    /// Reconnect backoff for long-running watches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<ReconnectPolicy>,
}

impl Profile {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            ..Self::default()
        }
    }

    /// Parsed backend URL.
    pub fn api_url(&self) -> Result<Url, ConfigError> {
        parse_url("api_url", &self.api_url)
    }

    /// Parsed bus URL, if one is configured.
    pub fn bus_url(&self) -> Result<Option<Url>, ConfigError> {
        self.bus_url
            .as_deref()
            .map(|raw| parse_url("bus_url", raw))
            .transpose()
    }
}

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {raw}"),
    })
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
///
/// `ECLUSA_CONFIG` points at an explicit file instead.
pub fn config_path() -> PathBuf {
    if let Some(explicit) = std::env::var_os("ECLUSA_CONFIG") {
        return PathBuf::from(explicit);
    }
    ProjectDirs::from("com", "eclusa", "eclusa").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("eclusa");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// `ECLUSA_*` variables read by the CLI flags, not by the config file.
const CLI_ONLY_ENV: &[&str] = &[
    "config", "profile", "api_url", "bus_url", "token", "output", "insecure", "timeout",
];

/// Load from an explicit file, then layer `ECLUSA_`-prefixed env vars.
///
/// Nested keys use a double underscore:
/// `ECLUSA_PROFILES__PLANTA__API_URL=https://...`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("ECLUSA_").split("__").ignore(CLI_ONLY_ENV));

    let config: Config = figment.extract()?;
    tracing::debug!(path = %path.display(), profiles = config.profiles.len(), "config loaded");
    Ok(config)
}

/// Load config, returning a default if the file is missing or unreadable.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Token resolution ────────────────────────────────────────────────

fn keyring_key(profile_name: &str) -> String {
    format!("{profile_name}/token")
}

/// Resolve a profile's token from the credential chain.
///
/// Order: the env var named by `token_env`, the system keyring, then the
/// plaintext `token`. `None` means the backend is used anonymously.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    // 1. Profile's token_env → env var lookup
    if let Some(ref env_name) = profile.token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &keyring_key(profile_name)) {
        if let Ok(secret) = entry.get_password() {
            return Some(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    profile.token.clone().map(SecretString::from)
}

/// Store a token for `profile_name` in the system keyring.
pub fn store_token(profile_name: &str, token: &str) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &keyring_key(profile_name)).map_err(|e| {
        ConfigError::Keyring {
            message: format!("failed to access keyring: {e}"),
        }
    })?;
    entry.set_password(token).map_err(|e| ConfigError::Keyring {
        message: format!("failed to store token: {e}"),
    })
}

// ── Translation to runtime config ───────────────────────────────────

/// Build the engine configuration for a profile.
///
/// Subject overrides are validated here so a typo fails at startup rather
/// than as a silent missing stream.
pub fn profile_to_engine_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<EngineConfig, ConfigError> {
    let mut subjects = SubjectCatalog::default();
    subjects
        .apply_discovery(&profile.subjects)
        .map_err(|e| ConfigError::Validation {
            field: "subjects".into(),
            reason: e.to_string(),
        })?;

    let connect_secs = profile
        .connect_timeout_secs
        .unwrap_or(defaults.connect_timeout_secs);
    if connect_secs == 0 {
        return Err(ConfigError::Validation {
            field: "connect_timeout_secs".into(),
            reason: "must be at least 1 second".into(),
        });
    }

    Ok(EngineConfig {
        connect_timeout: Duration::from_secs(connect_secs),
        subjects,
        reconnect: profile.reconnect.clone().unwrap_or_default(),
    })
}

/// Build the HTTP settings (TLS, timeout, token) for discovery and REST
/// calls.
pub fn profile_to_http_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> HttpConfig {
    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };

    HttpConfig {
        tls,
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
        token: resolve_token(profile, profile_name),
    }
}
