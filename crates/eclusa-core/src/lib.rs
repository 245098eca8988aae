//! Live-state engine between `eclusa-bus` and console consumers.
//!
//! This crate owns the subscription and reconciliation layer of the eclusa
//! console:
//!
//! - **[`Engine`]**: Explicitly owned facade. [`connect()`](Engine::connect)
//!   opens the single bus session (concurrent callers join one attempt),
//!   [`dispose()`](Engine::dispose) tears everything down. Connection state is
//!   observable through a `watch` channel.
//!
//! - **[`SubscriptionRegistry`]**: Reference-counted subject → handler map.
//!   The first handler for a subject subscribes at the transport, the last
//!   release unsubscribes, and every held subject is re-issued after a
//!   reconnect.
//!
//! - **[`Dispatcher`]**: Decodes each inbound message once and calls its
//!   handlers in registration order. Bad payloads and failing handlers are
//!   logged and contained.
//!
//! - **Reconcilers** ([`reconcile`]): [`FaultReconciler`],
//!   [`TagReconciler`] and [`StatusReconciler`] each own one
//!   [`LiveCollection`], seeded from a REST snapshot and kept live by bus
//!   events. Consumers read snapshots or await changes via
//!   [`CollectionStream`].
//!
//! - **Domain model** ([`model`]): Canonical fault, tag and controller types
//!   plus the bus payloads that mutate them.

pub mod config;
pub mod connection;
pub mod convert;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod model;
pub mod reconcile;
pub mod reconnect;
pub mod registry;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{EngineConfig, SubjectCatalog};
pub use connection::{ConnectionManager, ConnectionState, DisconnectCause};
pub use convert::tags_from_snapshot;
pub use dispatch::{DispatchReport, DispatchStats, Dispatcher};
pub use engine::Engine;
pub use error::CoreError;
pub use reconcile::{
    FaultReconciler, Freshness, MergeOutcome, StatusReconciler, TagReconciler, ViewMode,
};
pub use reconnect::ReconnectPolicy;
pub use registry::{Handler, HandlerId, SubscriptionHandle, SubscriptionRegistry, handler};
pub use store::{Keyed, LiveCollection, Snapshot};
pub use stream::{CollectionStream, CollectionWatchStream};

pub use model::{
    ControllerStatus, FaultAckEvent, FaultEvent, FaultId, FaultKind, FaultNotification,
    FaultRecord, Plc, PlcId, PlcStatusEvent, Tag, TagId, TagType, TagUpdatePayload, TagValue,
    TagValueEvent, Timestamp,
};
