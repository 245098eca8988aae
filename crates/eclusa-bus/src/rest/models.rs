// REST API response types
//
// Snapshot DTOs for the SCADA backend. The backend mixes English camelCase
// with the original Portuguese column names depending on the endpoint, so
// fields accept both spellings. `#[serde(default)]` is used wherever the
// backend omits a field instead of sending null.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ── Faults ───────────────────────────────────────────────────────────

/// One fault definition with its live state, from `GET /api/faults`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultDto {
    pub id: u64,
    #[serde(default)]
    pub plc_id: Option<u64>,
    #[serde(default)]
    pub plc_name: Option<String>,
    #[serde(default, alias = "palavra")]
    pub word_name: Option<String>,
    #[serde(default, alias = "bit")]
    pub bit_offset: Option<u32>,
    #[serde(default)]
    pub eclusa: Option<String>,
    #[serde(default, alias = "subsistema")]
    pub subsystem: Option<String>,
    #[serde(default, alias = "descricao")]
    pub description: Option<String>,
    /// `"alarm"`/`"alarme"` or `"event"`/`"evento"`.
    #[serde(default, alias = "tipo")]
    pub kind: Option<String>,
    #[serde(default, alias = "ativa")]
    pub active: bool,
    #[serde(default, alias = "timestamp")]
    pub started_at: Option<String>,
    #[serde(default, alias = "reconhecida")]
    pub acknowledged: bool,
}

// ── Tags ─────────────────────────────────────────────────────────────

/// A controller data point, from `GET /api/plcs/{id}/tags`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagDto {
    pub id: u64,
    pub plc_id: u64,
    #[serde(alias = "nome")]
    pub name: String,
    #[serde(default, alias = "endereco")]
    pub address: Option<String>,
    /// `BOOL`, `INT`, `WORD`, `REAL` or `STRING`; case-insensitive.
    #[serde(alias = "tipo")]
    pub data_type: String,
    #[serde(default, alias = "valor")]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub read_at: Option<String>,
}

/// Result of an on-demand read, from `GET /api/tags/{id}/value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagReadingDto {
    pub tag_id: u64,
    #[serde(alias = "valor")]
    pub value: serde_json::Value,
    #[serde(default, alias = "timestamp")]
    pub read_at: Option<String>,
}

/// Body of `PUT /api/tags/{id}/value`.
#[derive(Debug, Clone, Serialize)]
pub struct TagWriteRequest<'a> {
    pub value: &'a serde_json::Value,
}

// ── Controllers ──────────────────────────────────────────────────────

/// A PLC with its last known connectivity, from `GET /api/plcs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlcDto {
    pub id: u64,
    #[serde(alias = "nome")]
    pub name: String,
    #[serde(default, alias = "ip")]
    pub address: Option<String>,
    #[serde(default = "default_true", alias = "habilitado")]
    pub enabled: bool,
    #[serde(default, alias = "conectado")]
    pub connected: bool,
    #[serde(default, alias = "ultimoErro")]
    pub last_error: Option<String>,
    #[serde(default, alias = "ultimaLeitura")]
    pub last_read_at: Option<String>,
}

fn default_true() -> bool {
    true
}

// ── Bus discovery ────────────────────────────────────────────────────

/// Response of `GET /api/bus/info`.
///
/// `url` may be absolute (`wss://…`) or a path relative to the API base.
/// `subjects` maps opaque roles (`faults`, `acknowledgements`, …) to
/// subject names or prefixes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusInfo {
    pub url: String,
    #[serde(default)]
    pub subjects: HashMap<String, String>,
}

/// Error body the backend sends with non-2xx responses.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorResponse {
    #[serde(default, alias = "mensagem", alias = "error")]
    pub message: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fault_accepts_portuguese_columns() {
        let dto: FaultDto = serde_json::from_value(json!({
            "id": 5,
            "plcId": 2,
            "eclusa": "A",
            "subsistema": "B",
            "descricao": "Overpressure",
            "tipo": "alarme",
            "ativa": true,
            "timestamp": "2026-01-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(dto.subsystem.as_deref(), Some("B"));
        assert_eq!(dto.description.as_deref(), Some("Overpressure"));
        assert_eq!(dto.kind.as_deref(), Some("alarme"));
        assert!(dto.active);
        assert!(!dto.acknowledged);
        assert_eq!(dto.started_at.as_deref(), Some("2026-01-01T10:00:00Z"));
    }

    #[test]
    fn plc_defaults_to_enabled() {
        let dto: PlcDto = serde_json::from_value(json!({ "id": 1, "name": "CLP-01" })).unwrap();
        assert!(dto.enabled);
        assert!(!dto.connected);
        assert_eq!(dto.last_error, None);
    }

    #[test]
    fn bus_info_subjects_are_optional() {
        let info: BusInfo = serde_json::from_value(json!({ "url": "/bus" })).unwrap();
        assert!(info.subjects.is_empty());
    }
}
