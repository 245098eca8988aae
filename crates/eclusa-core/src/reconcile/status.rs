// ── Controller status reconciler ──
//
// Follows `plc.status.<plcId>` for every controller in the collection and
// replaces the connectivity fields wholesale on each message.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{Freshness, MergeOutcome, unique_by_key};
use crate::engine::Engine;
use crate::error::CoreError;
use crate::model::{ControllerStatus, Plc, PlcId, PlcStatusEvent};
use crate::registry::SubscriptionHandle;
use crate::store::{LiveCollection, Snapshot};
use crate::stream::CollectionStream;

/// Live connectivity of a set of controllers.
pub struct StatusReconciler {
    engine: Engine,
    plcs: Arc<LiveCollection<Plc>>,
    handles: Mutex<HashMap<PlcId, SubscriptionHandle>>,
}

impl StatusReconciler {
    pub fn attach(engine: &Engine, snapshot: Vec<Plc>) -> Result<Self, CoreError> {
        let reconciler = Self {
            engine: engine.clone(),
            plcs: Arc::new(LiveCollection::new()),
            handles: Mutex::new(HashMap::new()),
        };
        reconciler.reseed(snapshot)?;
        debug!(plcs = reconciler.plcs.len(), "status reconciler attached");
        Ok(reconciler)
    }

    /// Replace the controller list and follow exactly its members.
    pub fn reseed(&self, snapshot: Vec<Plc>) -> Result<bool, CoreError> {
        let changed = self.plcs.replace_all(unique_by_key(snapshot));
        self.sync_subscriptions()?;
        Ok(changed)
    }

    fn sync_subscriptions(&self) -> Result<(), CoreError> {
        let wanted = self.plcs.keys();
        let mut handles = self.handles.lock();

        handles.retain(|plc, _| wanted.contains(plc));

        for plc in wanted {
            if handles.contains_key(&plc) {
                continue;
            }
            let subject = self.engine.config().subjects.plc_status_for(plc)?;
            let target = Arc::clone(&self.plcs);
            let handle = self
                .engine
                .subscribe_parsed(subject, move |event: PlcStatusEvent| {
                    apply(&target, plc, event);
                    Ok(())
                })?;
            handles.insert(plc, handle);
        }
        Ok(())
    }

    /// Merge one status message for `plc`.
    pub fn apply(&self, plc: PlcId, event: PlcStatusEvent) -> MergeOutcome {
        apply(&self.plcs, plc, event)
    }

    pub fn snapshot(&self) -> Snapshot<Plc> {
        self.plcs.snapshot()
    }

    pub fn get(&self, plc: PlcId) -> Option<Arc<Plc>> {
        self.plcs.get(plc)
    }

    pub fn stream(&self) -> CollectionStream<Plc> {
        CollectionStream::new(self.plcs.subscribe())
    }

    pub fn freshness(&self) -> Freshness {
        self.engine.state().into()
    }

    pub fn dispose(&self) {
        // Handles release on drop.
        self.handles.lock().clear();
    }
}

impl Drop for StatusReconciler {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn apply(plcs: &LiveCollection<Plc>, plc: PlcId, event: PlcStatusEvent) -> MergeOutcome {
    let status = ControllerStatus::from(event);
    let outcome = MergeOutcome::from_update(plcs.update(plc, |record| record.status = status));
    if outcome == MergeOutcome::Ignored {
        trace!(%plc, "status for unknown controller");
    }
    outcome
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::model::Timestamp;
    use eclusa_bus::MemoryBus;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn plc(id: u64) -> Plc {
        Plc {
            id: PlcId(id),
            name: format!("CLP-{id}"),
            address: None,
            enabled: true,
            status: ControllerStatus {
                connected: true,
                last_error: Some("old".into()),
                last_read_at: Some(Timestamp::new("T0")),
            },
        }
    }

    fn status(value: serde_json::Value) -> PlcStatusEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn status_replaces_all_three_fields() {
        let engine = Engine::new(Arc::new(MemoryBus::new()), EngineConfig::default());
        let plcs = StatusReconciler::attach(&engine, vec![plc(1)]).unwrap();

        let outcome = plcs.apply(PlcId(1), status(json!({ "connected": false })));
        assert_eq!(outcome, MergeOutcome::Updated);
        assert_eq!(
            plcs.get(PlcId(1)).unwrap().status,
            ControllerStatus {
                connected: false,
                last_error: None,
                last_read_at: None,
            }
        );
    }

    #[test]
    fn unknown_controller_is_ignored() {
        let engine = Engine::new(Arc::new(MemoryBus::new()), EngineConfig::default());
        let plcs = StatusReconciler::attach(&engine, vec![plc(1)]).unwrap();
        assert_eq!(
            plcs.apply(PlcId(8), status(json!({ "connected": true }))),
            MergeOutcome::Ignored
        );
    }

    #[test]
    fn reseed_tracks_subscriptions() {
        let engine = Engine::new(Arc::new(MemoryBus::new()), EngineConfig::default());
        let plcs = StatusReconciler::attach(&engine, vec![plc(1), plc(2)]).unwrap();
        let names = |e: &Engine| -> Vec<String> {
            e.subjects().iter().map(ToString::to_string).collect()
        };
        assert_eq!(names(&engine), vec!["plc.status.1", "plc.status.2"]);

        plcs.reseed(vec![plc(2), plc(3)]).unwrap();
        assert_eq!(names(&engine), vec!["plc.status.2", "plc.status.3"]);

        plcs.dispose();
        assert!(engine.subjects().is_empty());
    }
}
