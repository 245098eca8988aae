// ── Tag domain types ──

use std::fmt;

use serde::{Deserialize, Serialize};

use super::common::Timestamp;
use super::ids::{PlcId, TagId};
use crate::error::CoreError;
use crate::store::Keyed;

/// Declared data type of a controller tag.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(ascii_case_insensitive, serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TagType {
    Bool,
    Int,
    Word,
    Real,
    #[strum(to_string = "STRING", serialize = "TEXT")]
    String,
}

/// A scalar tag value as carried on the wire.
///
/// Arrays, objects and null are rejected at decode time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
}

impl TagValue {
    /// Convert a JSON scalar. `None` for null, arrays and objects.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Real)),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Real(r) => serde_json::Value::from(*r),
            Self::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Parse user input according to the tag's declared type.
    pub fn parse_as(raw: &str, ty: TagType) -> Result<Self, CoreError> {
        let invalid = |why: String| CoreError::Config {
            message: format!("'{raw}' is not a valid {ty} value: {why}"),
        };
        let raw_trimmed = raw.trim();

        match ty {
            TagType::Bool => match raw_trimmed.to_ascii_lowercase().as_str() {
                "true" | "1" | "on" => Ok(Self::Bool(true)),
                "false" | "0" | "off" => Ok(Self::Bool(false)),
                _ => Err(invalid("expected true/false".into())),
            },
            TagType::Int => raw_trimmed
                .parse::<i64>()
                .map(Self::Int)
                .map_err(|e| invalid(e.to_string())),
            TagType::Word => raw_trimmed
                .parse::<u16>()
                .map(|w| Self::Int(i64::from(w)))
                .map_err(|e| invalid(e.to_string())),
            TagType::Real => raw_trimmed
                .parse::<f64>()
                .map(Self::Real)
                .map_err(|e| invalid(e.to_string())),
            TagType::String => Ok(Self::Text(raw.to_owned())),
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// A controller data point with its last known value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: TagId,
    pub plc_id: PlcId,
    pub name: String,
    pub address: Option<String>,
    pub data_type: TagType,
    pub value: Option<TagValue>,
    pub read_at: Option<Timestamp>,
}

impl Keyed for Tag {
    type Key = TagId;

    fn key(&self) -> TagId {
        self.id
    }
}

/// One value update from `plc.tags.updates.<plcId>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagValueEvent {
    pub tag_id: TagId,
    #[serde(alias = "valor")]
    pub value: TagValue,
    #[serde(default, alias = "readAt")]
    pub timestamp: Option<Timestamp>,
    #[serde(default, rename = "type", alias = "tipo")]
    pub data_type: Option<TagType>,
}

/// Wire shape of the tag-updates subject: a single update or a batch.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TagUpdatePayload {
    Batch { updates: Vec<TagValueEvent> },
    Single(TagValueEvent),
}

impl TagUpdatePayload {
    pub fn into_events(self) -> Vec<TagValueEvent> {
        match self {
            Self::Batch { updates } => updates,
            Self::Single(event) => vec![event],
        }
    }
}
