// ── Reconcilers ──
//
// Each reconciler owns one live collection exclusively: it is seeded from a
// REST snapshot, then mutated only by bus events for as long as the view
// that created it is alive. Dropping (or disposing) a reconciler releases
// its subscriptions; the underlying subject stays up while other views
// still hold it.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::connection::ConnectionState;
use crate::store::Keyed;

pub mod faults;
pub mod status;
pub mod tags;

pub use faults::FaultReconciler;
pub use status::StatusReconciler;
pub use tags::TagReconciler;

/// Which faults a fault-list view keeps.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum ViewMode {
    /// Deactivated faults leave the collection.
    #[default]
    ActiveOnly,
    /// Deactivated faults stay, flagged `active = false`.
    All,
}

/// Whether a collection is currently being kept up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Freshness {
    Live,
    /// Live updates are paused; the last known values are shown.
    Stale,
}

impl From<ConnectionState> for Freshness {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Connected => Self::Live,
            ConnectionState::Connecting | ConnectionState::Disconnected => Self::Stale,
        }
    }
}

/// What a single merge did to the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum MergeOutcome {
    Inserted,
    Updated,
    Removed,
    /// The entity exists and already matched the event.
    Unchanged,
    /// The event referenced an entity this view does not hold.
    Ignored,
    /// The event contradicts the entity it targets and was dropped.
    Rejected,
}

impl MergeOutcome {
    pub fn changed(self) -> bool {
        matches!(self, Self::Inserted | Self::Updated | Self::Removed)
    }

    fn from_update(result: Option<bool>) -> Self {
        match result {
            None => Self::Ignored,
            Some(true) => Self::Updated,
            Some(false) => Self::Unchanged,
        }
    }
}

/// Drop later rows that repeat a key, keeping snapshot order.
fn unique_by_key<T: Keyed>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(item.key()))
        .collect()
}
