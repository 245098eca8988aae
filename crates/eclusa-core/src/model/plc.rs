// ── Controller domain types ──

use serde::{Deserialize, Serialize};

use super::common::Timestamp;
use super::ids::PlcId;
use crate::store::Keyed;

/// Connectivity of a controller as reported by the acquisition service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    pub connected: bool,
    pub last_error: Option<String>,
    pub last_read_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plc {
    pub id: PlcId,
    pub name: String,
    pub address: Option<String>,
    pub enabled: bool,
    pub status: ControllerStatus,
}

impl Keyed for Plc {
    type Key = PlcId;

    fn key(&self) -> PlcId {
        self.id
    }
}

/// Payload of `plc.status.<plcId>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlcStatusEvent {
    #[serde(alias = "conectado")]
    pub connected: bool,
    #[serde(default, alias = "ultimoErro")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

impl From<PlcStatusEvent> for ControllerStatus {
    fn from(event: PlcStatusEvent) -> Self {
        Self {
            connected: event.connected,
            last_error: event.last_error,
            last_read_at: event.timestamp,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_event_replaces_all_fields() {
        let event: PlcStatusEvent =
            serde_json::from_value(json!({ "connected": false, "lastError": null, "timestamp": "T9" }))
                .unwrap();
        let status = ControllerStatus::from(event);
        assert_eq!(
            status,
            ControllerStatus {
                connected: false,
                last_error: None,
                last_read_at: Some(Timestamp::new("T9")),
            }
        );
    }
}
