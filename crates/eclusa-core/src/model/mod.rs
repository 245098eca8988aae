// ── Domain model ──
//
// Canonical types for the three live collections and the bus payloads that
// mutate them. Wire field names follow the backend's camelCase, with the
// Portuguese spellings accepted as aliases.

pub mod common;
pub mod fault;
pub mod ids;
pub mod plc;
pub mod tag;

pub use common::Timestamp;
pub use fault::{FaultAckEvent, FaultEvent, FaultKind, FaultNotification, FaultRecord};
pub use ids::{FaultId, PlcId, TagId};
pub use plc::{ControllerStatus, Plc, PlcStatusEvent};
pub use tag::{Tag, TagType, TagUpdatePayload, TagValue, TagValueEvent};
