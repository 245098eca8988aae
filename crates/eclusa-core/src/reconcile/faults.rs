// ── Fault reconciler ──
//
// Keeps a fault list live from two subjects:
//   faults           { id, active, timestamp, acknowledged?, ...descriptive }
//   acknowledgements { id, acknowledged, userName }
//
// New active faults are prepended (most recent first). Acknowledgement is
// only ever applied from the acknowledgements subject, never from a REST
// call, so every console converges on the same state.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use super::{Freshness, MergeOutcome, ViewMode, unique_by_key};
use crate::engine::Engine;
use crate::error::CoreError;
use crate::model::{FaultAckEvent, FaultEvent, FaultId, FaultNotification, FaultRecord};
use crate::registry::SubscriptionHandle;
use crate::store::{LiveCollection, Snapshot};
use crate::stream::CollectionStream;

const NOTIFICATION_CHANNEL_SIZE: usize = 64;

/// Live fault collection for one view.
pub struct FaultReconciler {
    engine: Engine,
    state: Arc<FaultState>,
    handles: Mutex<Vec<SubscriptionHandle>>,
}

struct FaultState {
    mode: ViewMode,
    faults: LiveCollection<FaultRecord>,
    notifications: broadcast::Sender<FaultNotification>,
}

impl FaultReconciler {
    /// Seed the collection from `snapshot` and start following the fault
    /// subjects.
    pub fn attach(
        engine: &Engine,
        mode: ViewMode,
        snapshot: Vec<FaultRecord>,
    ) -> Result<Self, CoreError> {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_SIZE);
        let state = Arc::new(FaultState {
            mode,
            faults: LiveCollection::new(),
            notifications,
        });
        state.seed(snapshot);

        let subjects = &engine.config().subjects;
        let mut handles = Vec::with_capacity(2);

        let on_fault = Arc::clone(&state);
        handles.push(engine.subscribe_parsed(
            subjects.faults.clone(),
            move |event: FaultEvent| {
                on_fault.apply_fault_event(&event);
                Ok(())
            },
        )?);

        let on_ack = Arc::clone(&state);
        handles.push(engine.subscribe_parsed(
            subjects.acknowledgements.clone(),
            move |ack: FaultAckEvent| {
                on_ack.apply_acknowledgement(&ack);
                Ok(())
            },
        )?);

        debug!(%mode, seeded = state.faults.len(), "fault reconciler attached");
        Ok(Self {
            engine: engine.clone(),
            state,
            handles: Mutex::new(handles),
        })
    }

    pub fn mode(&self) -> ViewMode {
        self.state.mode
    }

    /// Merge one faults-subject event.
    pub fn apply_fault_event(&self, event: &FaultEvent) -> MergeOutcome {
        self.state.apply_fault_event(event)
    }

    /// Merge one acknowledgements-subject event.
    pub fn apply_acknowledgement(&self, ack: &FaultAckEvent) -> MergeOutcome {
        self.state.apply_acknowledgement(ack)
    }

    /// Replace the collection with a fresh snapshot, e.g. after a
    /// reconnect gap.
    pub fn reseed(&self, snapshot: Vec<FaultRecord>) -> bool {
        self.state.seed(snapshot)
    }

    pub fn snapshot(&self) -> Snapshot<FaultRecord> {
        self.state.faults.snapshot()
    }

    pub fn get(&self, id: FaultId) -> Option<Arc<FaultRecord>> {
        self.state.faults.get(id)
    }

    pub fn len(&self) -> usize {
        self.state.faults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.faults.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.state.faults.version()
    }

    pub fn stream(&self) -> CollectionStream<FaultRecord> {
        CollectionStream::new(self.state.faults.subscribe())
    }

    /// Acknowledgement notices, one per fault that became acknowledged.
    pub fn notifications(&self) -> broadcast::Receiver<FaultNotification> {
        self.state.notifications.subscribe()
    }

    pub fn freshness(&self) -> Freshness {
        self.engine.state().into()
    }

    /// Release both subscriptions. The collection keeps its last contents.
    pub fn dispose(&self) {
        for handle in self.handles.lock().drain(..) {
            handle.release();
        }
    }
}

impl FaultState {
    fn seed(&self, snapshot: Vec<FaultRecord>) -> bool {
        let rows = unique_by_key(snapshot)
            .into_iter()
            .filter(|fault| self.mode == ViewMode::All || fault.active)
            .collect();
        self.faults.replace_all(rows)
    }

    fn apply_fault_event(&self, event: &FaultEvent) -> MergeOutcome {
        let outcome = if event.active {
            match self.faults.update(event.id, |record| event.refresh(record)) {
                Some(true) => MergeOutcome::Updated,
                Some(false) => MergeOutcome::Unchanged,
                None => {
                    if self.faults.prepend(event.to_new_record()) {
                        MergeOutcome::Inserted
                    } else {
                        MergeOutcome::Unchanged
                    }
                }
            }
        } else if self.mode == ViewMode::ActiveOnly {
            if self.faults.remove(event.id).is_some() {
                MergeOutcome::Removed
            } else {
                MergeOutcome::Ignored
            }
        } else {
            MergeOutcome::from_update(self.faults.update(event.id, |record| record.active = false))
        };

        trace!(fault = %event.id, active = event.active, %outcome, "fault event merged");
        outcome
    }

    fn apply_acknowledgement(&self, ack: &FaultAckEvent) -> MergeOutcome {
        if !ack.acknowledged {
            trace!(fault = %ack.id, "ignoring acknowledgement with acknowledged=false");
            return MergeOutcome::Ignored;
        }

        let mut description: Option<String> = None;
        let outcome = MergeOutcome::from_update(self.faults.update(ack.id, |record| {
            description.clone_from(&record.description);
            record.acknowledged = true;
        }));

        match outcome {
            MergeOutcome::Updated => {
                let notice = FaultNotification {
                    fault_id: ack.id,
                    description,
                    user_name: ack.user_name.clone(),
                };
                info!(fault = %ack.id, "{}", notice.message());
                // No receivers is fine; nobody is showing notices.
                let _ = self.notifications.send(notice);
            }
            MergeOutcome::Ignored => {
                trace!(fault = %ack.id, "acknowledgement for unknown fault");
            }
            _ => {}
        }
        outcome
    }
}

impl Drop for FaultReconciler {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::model::{FaultKind, Timestamp};
    use eclusa_bus::MemoryBus;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn engine() -> Engine {
        Engine::new(Arc::new(MemoryBus::new()), EngineConfig::default())
    }

    fn event(value: serde_json::Value) -> FaultEvent {
        serde_json::from_value(value).unwrap()
    }

    fn ack(id: u64, user: &str) -> FaultAckEvent {
        serde_json::from_value(json!({ "id": id, "acknowledged": true, "userName": user })).unwrap()
    }

    fn record(id: u64, active: bool) -> FaultRecord {
        FaultRecord {
            id: FaultId(id),
            plc_id: None,
            plc_name: None,
            word_name: None,
            bit_offset: None,
            eclusa: None,
            subsystem: None,
            description: Some(format!("fault {id}")),
            kind: FaultKind::Alarm,
            active,
            started_at: None,
            acknowledged: false,
        }
    }

    #[test]
    fn new_faults_are_prepended() {
        let engine = engine();
        let faults = FaultReconciler::attach(&engine, ViewMode::ActiveOnly, vec![record(1, true)])
            .unwrap();

        let outcome = faults.apply_fault_event(&event(json!({ "id": 2, "active": true })));
        assert_eq!(outcome, MergeOutcome::Inserted);
        let ids: Vec<u64> = faults.snapshot().iter().map(|f| f.id.get()).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn replayed_activation_is_idempotent() {
        let engine = engine();
        let faults = FaultReconciler::attach(&engine, ViewMode::ActiveOnly, Vec::new()).unwrap();
        let activation = event(json!({
            "id": 5, "active": true, "timestamp": "T1",
            "eclusa": "A", "subsistema": "B", "descricao": "Overpressure"
        }));

        assert_eq!(faults.apply_fault_event(&activation), MergeOutcome::Inserted);
        let once = faults.snapshot();
        let version = faults.version();

        assert_eq!(faults.apply_fault_event(&activation), MergeOutcome::Unchanged);
        assert_eq!(faults.snapshot(), once);
        assert_eq!(faults.version(), version);
    }

    #[test]
    fn reactivation_updates_in_place() {
        let engine = engine();
        let faults = FaultReconciler::attach(
            &engine,
            ViewMode::All,
            vec![record(1, true), record(2, false)],
        )
        .unwrap();

        let outcome = faults.apply_fault_event(&event(json!({
            "id": 2, "active": true, "timestamp": "T7"
        })));
        assert_eq!(outcome, MergeOutcome::Updated);

        let snap = faults.snapshot();
        assert_eq!(snap[1].id, FaultId(2));
        assert!(snap[1].active);
        assert_eq!(snap[1].started_at, Some(Timestamp::new("T7")));
    }

    #[test]
    fn deactivation_depends_on_view_mode() {
        let engine = engine();
        let active_only =
            FaultReconciler::attach(&engine, ViewMode::ActiveOnly, vec![record(3, true)]).unwrap();
        let all = FaultReconciler::attach(&engine, ViewMode::All, vec![record(3, true)]).unwrap();
        let off = event(json!({ "id": 3, "active": false, "timestamp": "T2" }));

        assert_eq!(active_only.apply_fault_event(&off), MergeOutcome::Removed);
        assert!(active_only.is_empty());

        assert_eq!(all.apply_fault_event(&off), MergeOutcome::Updated);
        assert_eq!(all.len(), 1);
        assert!(!all.get(FaultId(3)).unwrap().active);
    }

    #[test]
    fn active_only_seed_drops_inactive_rows() {
        let engine = engine();
        let faults = FaultReconciler::attach(
            &engine,
            ViewMode::ActiveOnly,
            vec![record(1, true), record(2, false), record(1, true)],
        )
        .unwrap();
        assert_eq!(faults.len(), 1);
    }

    #[test]
    fn acknowledgement_before_insert_is_ignored() {
        let engine = engine();
        let faults = FaultReconciler::attach(&engine, ViewMode::ActiveOnly, Vec::new()).unwrap();

        assert_eq!(faults.apply_acknowledgement(&ack(9, "op")), MergeOutcome::Ignored);
        assert!(faults.is_empty());

        faults.apply_fault_event(&event(json!({ "id": 9, "active": true })));
        assert!(!faults.get(FaultId(9)).unwrap().acknowledged);

        assert_eq!(faults.apply_acknowledgement(&ack(9, "op")), MergeOutcome::Updated);
        assert!(faults.get(FaultId(9)).unwrap().acknowledged);
    }

    #[test]
    fn acknowledgement_notifies_once() {
        let engine = engine();
        let faults =
            FaultReconciler::attach(&engine, ViewMode::ActiveOnly, vec![record(4, true)]).unwrap();
        let mut notices = faults.notifications();

        faults.apply_acknowledgement(&ack(4, "operador1"));
        faults.apply_acknowledgement(&ack(4, "operador1"));

        let notice = notices.try_recv().unwrap();
        assert_eq!(notice.fault_id, FaultId(4));
        assert_eq!(notice.message(), "fault 4 acknowledged by operador1");
        assert!(notices.try_recv().is_err());
    }

    #[test]
    fn dispose_releases_subjects() {
        let engine = engine();
        let faults = FaultReconciler::attach(&engine, ViewMode::All, Vec::new()).unwrap();
        assert_eq!(engine.subjects().len(), 2);

        faults.dispose();
        assert!(engine.subjects().is_empty());
    }
}
