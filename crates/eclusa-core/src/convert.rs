// ── REST-to-domain type conversions ──
//
// Bridges the snapshot DTOs from `eclusa_bus::rest` into the canonical
// `eclusa_core::model` types the reconcilers are seeded with. Each impl
// parses loose strings into strong types and fills defaults for missing
// optional data.

use eclusa_bus::rest::{FaultDto, PlcDto, TagDto, TagReadingDto};
use tracing::warn;

use crate::error::CoreError;
use crate::model::{
    ControllerStatus, FaultId, FaultKind, FaultRecord, Plc, PlcId, Tag, TagId, TagType, TagValue,
    TagValueEvent, Timestamp,
};

// ── Helpers ────────────────────────────────────────────────────────

fn timestamp(raw: Option<String>) -> Option<Timestamp> {
    raw.filter(|s| !s.is_empty()).map(Timestamp::new)
}

/// `null` and missing values mean "never read"; anything else must be a
/// scalar.
fn scalar(raw: Option<&serde_json::Value>, what: &str) -> Result<Option<TagValue>, CoreError> {
    match raw {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => TagValue::from_json(value).map(Some).ok_or_else(|| CoreError::Decode {
            subject: what.to_owned(),
            message: format!("tag value must be a scalar, got {value}"),
        }),
    }
}

// ── Faults ─────────────────────────────────────────────────────────

impl From<FaultDto> for FaultRecord {
    fn from(dto: FaultDto) -> Self {
        let kind = dto
            .kind
            .as_deref()
            .and_then(|k| k.parse::<FaultKind>().ok())
            .unwrap_or_default();

        Self {
            id: FaultId(dto.id),
            plc_id: dto.plc_id.map(PlcId),
            plc_name: dto.plc_name,
            word_name: dto.word_name,
            bit_offset: dto.bit_offset,
            eclusa: dto.eclusa,
            subsystem: dto.subsystem,
            description: dto.description,
            kind,
            active: dto.active,
            started_at: timestamp(dto.started_at),
            acknowledged: dto.acknowledged,
        }
    }
}

// ── Tags ───────────────────────────────────────────────────────────

impl TryFrom<TagDto> for Tag {
    type Error = CoreError;

    fn try_from(dto: TagDto) -> Result<Self, Self::Error> {
        let data_type = dto
            .data_type
            .parse::<TagType>()
            .map_err(|_| CoreError::Decode {
                subject: format!("tag {}", dto.id),
                message: format!("unknown data type '{}'", dto.data_type),
            })?;
        let value = scalar(dto.value.as_ref(), &format!("tag {}", dto.id))?;

        Ok(Self {
            id: TagId(dto.id),
            plc_id: PlcId(dto.plc_id),
            name: dto.name,
            address: dto.address,
            data_type,
            value,
            read_at: timestamp(dto.read_at),
        })
    }
}

/// Convert a tag listing, skipping (and logging) rows that cannot be
/// represented.
pub fn tags_from_snapshot(dtos: Vec<TagDto>) -> Vec<Tag> {
    dtos.into_iter()
        .filter_map(|dto| {
            let id = dto.id;
            match Tag::try_from(dto) {
                Ok(tag) => Some(tag),
                Err(e) => {
                    warn!(tag = id, error = %e, "skipping tag from snapshot");
                    None
                }
            }
        })
        .collect()
}

impl TryFrom<TagReadingDto> for TagValueEvent {
    type Error = CoreError;

    fn try_from(dto: TagReadingDto) -> Result<Self, Self::Error> {
        let what = format!("tag {}", dto.tag_id);
        let value = scalar(Some(&dto.value), &what)?.ok_or_else(|| CoreError::Decode {
            subject: what,
            message: "tag has no value".into(),
        })?;

        Ok(Self {
            tag_id: TagId(dto.tag_id),
            value,
            timestamp: timestamp(dto.read_at),
            data_type: None,
        })
    }
}

// ── Controllers ────────────────────────────────────────────────────

impl From<PlcDto> for Plc {
    fn from(dto: PlcDto) -> Self {
        Self {
            id: PlcId(dto.id),
            name: dto.name,
            address: dto.address,
            enabled: dto.enabled,
            status: ControllerStatus {
                connected: dto.connected,
                last_error: dto.last_error,
                last_read_at: timestamp(dto.last_read_at),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fault_dto_maps_kind_and_ids() {
        let dto: FaultDto = serde_json::from_value(json!({
            "id": 5, "plcId": 2, "tipo": "evento", "ativa": true,
            "descricao": "Overpressure", "startedAt": "T1"
        }))
        .unwrap();
        let record = FaultRecord::from(dto);
        assert_eq!(record.id, FaultId(5));
        assert_eq!(record.plc_id, Some(PlcId(2)));
        assert_eq!(record.kind, FaultKind::Event);
        assert_eq!(record.started_at, Some(Timestamp::new("T1")));
    }

    #[test]
    fn tag_snapshot_skips_unrepresentable_rows() {
        let dtos: Vec<TagDto> = serde_json::from_value(json!([
            { "id": 1, "plcId": 1, "name": "NIVEL", "dataType": "real", "value": 1.5 },
            { "id": 2, "plcId": 1, "name": "ARRAY", "dataType": "INT", "value": [1, 2] },
            { "id": 3, "plcId": 1, "name": "X", "dataType": "UDT" },
            { "id": 4, "plcId": 1, "name": "NOVO", "dataType": "BOOL", "value": null }
        ]))
        .unwrap();

        let tags = tags_from_snapshot(dtos);
        let ids: Vec<u64> = tags.iter().map(|t| t.id.get()).collect();
        assert_eq!(ids, vec![1, 4]);
        assert_eq!(tags[0].value, Some(TagValue::Real(1.5)));
        assert_eq!(tags[1].value, None);
    }

    #[test]
    fn reading_becomes_value_event() {
        let dto: TagReadingDto =
            serde_json::from_value(json!({ "tagId": 7, "valor": 12, "timestamp": "T3" })).unwrap();
        let event = TagValueEvent::try_from(dto).unwrap();
        assert_eq!(event.tag_id, TagId(7));
        assert_eq!(event.value, TagValue::Int(12));
    }

    #[test]
    fn plc_dto_carries_status() {
        let dto: PlcDto = serde_json::from_value(json!({
            "id": 3, "nome": "CLP-3", "conectado": false, "ultimoErro": "timeout"
        }))
        .unwrap();
        let plc = Plc::from(dto);
        assert!(plc.enabled);
        assert!(!plc.status.connected);
        assert_eq!(plc.status.last_error.as_deref(), Some("timeout"));
    }
}
