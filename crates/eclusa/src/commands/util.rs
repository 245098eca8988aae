//! Shared helpers for command handlers.

use std::sync::Arc;

use tracing::debug;
use url::Url;

use eclusa_bus::{ApiClient, WebSocketTransport, WsConfig, discovery};
use eclusa_core::{Engine, EngineConfig, SubjectCatalog, TagType, TagValue};

use crate::cli::GlobalOpts;
use crate::config::{self, ResolvedProfile};
use crate::error::CliError;

// ── Session ─────────────────────────────────────────────────────────

/// A resolved profile plus its REST client. The bus engine is built on
/// demand, only by commands that need live state.
pub struct Session {
    pub profile: ResolvedProfile,
    pub api: ApiClient,
}

impl Session {
    pub fn open(global: &GlobalOpts) -> Result<Self, CliError> {
        let profile = config::resolve(global)?;
        let api = ApiClient::new(profile.api_url.as_str(), &profile.http)?;
        Ok(Self { profile, api })
    }

    /// Bus endpoint and subject names.
    ///
    /// A configured bus URL is used as-is. Otherwise the backend is asked;
    /// profile subject overrides still win over discovered names.
    pub async fn bus_endpoint(&self) -> Result<(Url, SubjectCatalog, bool), CliError> {
        if let Some(ref url) = self.profile.bus_url {
            return Ok((url.clone(), self.profile.engine.subjects.clone(), false));
        }

        let (url, info) = discovery::discover(&self.api).await?;
        let mut subjects = SubjectCatalog::default();
        subjects.apply_discovery(&info.subjects)?;
        subjects.apply_discovery(&self.profile.subject_overrides)?;
        Ok((url, subjects, true))
    }

    /// Build a (not yet connected) engine over the WebSocket transport.
    pub async fn engine(&self) -> Result<Engine, CliError> {
        let (url, subjects, discovered) = self.bus_endpoint().await?;
        debug!(%url, discovered, profile = %self.profile.name, "bus endpoint resolved");

        let mut ws = WsConfig::new(url);
        if let Some(ref token) = self.profile.http.token {
            ws = ws.with_token(token.clone());
        }

        let config = EngineConfig {
            subjects,
            ..self.profile.engine.clone()
        };
        Ok(Engine::new(Arc::new(WebSocketTransport::new(ws)), config))
    }
}

// ── Tag values ──────────────────────────────────────────────────────

/// Parse a tag value from the command line.
///
/// With an explicit type the value must parse as that type. Without one,
/// JSON scalars (`true`, `12`, `3.5`, `"text"`) are recognized and
/// anything else is sent as text.
pub fn parse_tag_value(raw: &str, data_type: Option<TagType>) -> Result<TagValue, CliError> {
    if let Some(ty) = data_type {
        return Ok(TagValue::parse_as(raw, ty)?);
    }
    let value = serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|json| TagValue::from_json(&json))
        .unwrap_or_else(|| TagValue::Text(raw.to_owned()));
    Ok(value)
}
