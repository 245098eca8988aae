//! CLI configuration -- thin wrapper around `eclusa_config` shared types.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides (--api-url,
//! --bus-url, --token, ...).

use std::collections::HashMap;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use eclusa_bus::HttpConfig;
use eclusa_core::EngineConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── Re-exports from shared crate ────────────────────────────────────

pub use eclusa_config::{Config, Profile, config_path, load_config_or_default, save_config};

/// Everything a command needs to reach one plant.
#[derive(Debug, Clone)]
pub struct ResolvedProfile {
    pub name: String,
    pub api_url: Url,
    pub bus_url: Option<Url>,
    pub http: HttpConfig,
    pub engine: EngineConfig,
    /// Subject overrides, re-applied on top of discovered names.
    pub subject_overrides: HashMap<String, String>,
}

// ── CLI-specific helpers ────────────────────────────────────────────

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    config.active_profile_name(global.profile.as_deref())
}

/// Resolve the active profile from the config file and flag overrides.
///
/// Without a matching profile, `--api-url` alone is enough.
pub fn resolve(global: &GlobalOpts) -> Result<ResolvedProfile, CliError> {
    let cfg = load_config_or_default();
    let name = active_profile_name(global, &cfg);

    let profile = if let Some(profile) = cfg.profiles.get(&name) {
        profile.clone()
    } else if let Some(ref api_url) = global.api_url {
        // No profile -- build from flags / env vars alone
        Profile::new(api_url.clone())
    } else if global.profile.is_some() {
        let names = cfg.profile_names();
        return Err(CliError::ProfileNotFound {
            available: if names.is_empty() {
                "(none)".into()
            } else {
                names.join(", ")
            },
            name,
        });
    } else {
        return Err(CliError::NoConfig {
            path: config_path().display().to_string(),
        });
    };

    resolve_profile(profile, &name, &cfg.defaults, global)
}

/// Translate a `Profile` + global flags into runtime settings.
///
/// CLI flag overrides take priority over profile values.
pub fn resolve_profile(
    mut profile: Profile,
    profile_name: &str,
    defaults: &eclusa_config::Defaults,
    global: &GlobalOpts,
) -> Result<ResolvedProfile, CliError> {
    // 1. URLs (flag > env > profile)
    if let Some(ref url) = global.api_url {
        profile.api_url.clone_from(url);
    }
    if let Some(ref url) = global.bus_url {
        profile.bus_url = Some(url.clone());
    }
    let api_url = profile.api_url()?;
    let bus_url = profile.bus_url()?;

    // 2. TLS and timeout
    if global.insecure {
        profile.insecure = Some(true);
    }
    if let Some(timeout) = global.timeout {
        profile.timeout = Some(timeout);
    }

    // 3. Token (flag > env var > keyring > plaintext)
    let mut http = eclusa_config::profile_to_http_config(&profile, profile_name, defaults);
    if let Some(ref token) = global.token {
        http.token = Some(SecretString::from(token.clone()));
    }

    let engine = eclusa_config::profile_to_engine_config(&profile, defaults)?;

    Ok(ResolvedProfile {
        name: profile_name.to_owned(),
        api_url,
        bus_url,
        http,
        engine,
        subject_overrides: profile.subjects,
    })
}

impl ResolvedProfile {
    /// HTTP timeout, used as the default wait for bus round-trips.
    pub fn request_timeout(&self) -> Duration {
        self.http.timeout
    }
}
