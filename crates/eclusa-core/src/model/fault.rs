// ── Fault domain types ──
//
// A fault is a controller bit mapped to an alarm or event definition.
// Records are seeded from the REST snapshot and then driven entirely by
// the two fault subjects on the bus.

use serde::{Deserialize, Serialize};

use super::common::Timestamp;
use super::ids::{FaultId, PlcId};
use crate::store::Keyed;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum FaultKind {
    #[default]
    #[strum(to_string = "alarm", serialize = "alarme")]
    Alarm,
    #[strum(to_string = "event", serialize = "evento")]
    Event,
}

/// One fault in a fault-list view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultRecord {
    pub id: FaultId,
    pub plc_id: Option<PlcId>,
    pub plc_name: Option<String>,
    pub word_name: Option<String>,
    pub bit_offset: Option<u32>,
    pub eclusa: Option<String>,
    pub subsystem: Option<String>,
    pub description: Option<String>,
    pub kind: FaultKind,
    pub active: bool,
    pub started_at: Option<Timestamp>,
    pub acknowledged: bool,
}

impl Keyed for FaultRecord {
    type Key = FaultId;

    fn key(&self) -> FaultId {
        self.id
    }
}

/// Payload of the faults subject (`eclusa.falhas`).
///
/// Descriptive fields are optional: deactivation events usually carry only
/// `{ id, active, timestamp }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultEvent {
    pub id: FaultId,
    #[serde(alias = "ativa")]
    pub active: bool,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default, alias = "reconhecida")]
    pub acknowledged: Option<bool>,
    #[serde(default)]
    pub plc_id: Option<PlcId>,
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
    #[serde(default, alias = "tipo")]
    pub kind: Option<String>,
}

impl FaultEvent {
    /// Build the record for a first sighting. Acknowledgement on first
    /// sight is ignored; it only arrives through the acknowledgements
    /// subject.
    pub(crate) fn to_new_record(&self) -> FaultRecord {
        FaultRecord {
            id: self.id,
            plc_id: self.plc_id,
            plc_name: self.plc_name.clone(),
            word_name: self.word_name.clone(),
            bit_offset: self.bit_offset,
            eclusa: self.eclusa.clone(),
            subsystem: self.subsystem.clone(),
            description: self.description.clone(),
            kind: self.fault_kind().unwrap_or_default(),
            active: self.active,
            started_at: self.timestamp.clone(),
            acknowledged: false,
        }
    }

    /// Apply a re-activation to a known record in place.
    pub(crate) fn refresh(&self, record: &mut FaultRecord) {
        record.active = true;
        if let Some(ts) = &self.timestamp {
            record.started_at = Some(ts.clone());
        }
        if let Some(ack) = self.acknowledged {
            record.acknowledged = ack;
        }
        fill(&mut record.plc_id, self.plc_id.as_ref());
        fill(&mut record.plc_name, self.plc_name.as_ref());
        fill(&mut record.word_name, self.word_name.as_ref());
        fill(&mut record.bit_offset, self.bit_offset.as_ref());
        fill(&mut record.eclusa, self.eclusa.as_ref());
        fill(&mut record.subsystem, self.subsystem.as_ref());
        fill(&mut record.description, self.description.as_ref());
        if let Some(kind) = self.fault_kind() {
            record.kind = kind;
        }
    }

    fn fault_kind(&self) -> Option<FaultKind> {
        self.kind.as_deref().and_then(|k| k.parse().ok())
    }
}

fn fill<T: Clone>(slot: &mut Option<T>, incoming: Option<&T>) {
    if let Some(value) = incoming {
        *slot = Some(value.clone());
    }
}

/// Payload of the acknowledgements subject (`eclusa.falhas.reconhecidas`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultAckEvent {
    pub id: FaultId,
    #[serde(alias = "reconhecida")]
    pub acknowledged: bool,
    #[serde(default, alias = "usuario", alias = "user")]
    pub user_name: Option<String>,
}

/// User-visible notice raised when a fault becomes acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultNotification {
    pub fault_id: FaultId,
    pub description: Option<String>,
    pub user_name: Option<String>,
}

impl FaultNotification {
    pub fn message(&self) -> String {
        let what = self
            .description
            .as_deref()
            .map_or_else(|| format!("Fault {}", self.fault_id), ToOwned::to_owned);
        match &self.user_name {
            Some(user) => format!("{what} acknowledged by {user}"),
            None => format!("{what} acknowledged"),
        }
    }
}
