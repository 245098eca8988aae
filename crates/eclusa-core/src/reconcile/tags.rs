// ── Tag value reconciler ──
//
// Follows `plc.tags.updates.<plcId>` for one controller. Updates only touch
// tags already in the collection; a value for an unknown tag is dropped,
// never turned into a new tag. Every update is applied in arrival order,
// regardless of its timestamp.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::{Freshness, MergeOutcome, unique_by_key};
use crate::engine::Engine;
use crate::error::CoreError;
use crate::model::{PlcId, Tag, TagId, TagUpdatePayload, TagValueEvent};
use crate::registry::SubscriptionHandle;
use crate::store::{LiveCollection, Snapshot};
use crate::stream::CollectionStream;

/// Live tag values of one controller.
pub struct TagReconciler {
    engine: Engine,
    plc: PlcId,
    tags: Arc<LiveCollection<Tag>>,
    handle: Mutex<Option<SubscriptionHandle>>,
}

impl TagReconciler {
    pub fn attach(engine: &Engine, plc: PlcId, snapshot: Vec<Tag>) -> Result<Self, CoreError> {
        let tags = Arc::new(LiveCollection::new());
        tags.replace_all(unique_by_key(snapshot));

        let subject = engine.config().subjects.tag_updates_for(plc)?;
        let target = Arc::clone(&tags);
        let handle = engine.subscribe_parsed(subject, move |payload: TagUpdatePayload| {
            for event in payload.into_events() {
                apply(&target, &event);
            }
            Ok(())
        })?;

        debug!(%plc, seeded = tags.len(), "tag reconciler attached");
        Ok(Self {
            engine: engine.clone(),
            plc,
            tags,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn plc(&self) -> PlcId {
        self.plc
    }

    /// Merge one value update.
    pub fn apply(&self, event: &TagValueEvent) -> MergeOutcome {
        apply(&self.tags, event)
    }

    /// Merge a single update or a batch, in order.
    pub fn apply_payload(&self, payload: TagUpdatePayload) -> Vec<MergeOutcome> {
        payload
            .into_events()
            .iter()
            .map(|event| apply(&self.tags, event))
            .collect()
    }

    pub fn reseed(&self, snapshot: Vec<Tag>) -> bool {
        self.tags.replace_all(unique_by_key(snapshot))
    }

    pub fn snapshot(&self) -> Snapshot<Tag> {
        self.tags.snapshot()
    }

    pub fn get(&self, id: TagId) -> Option<Arc<Tag>> {
        self.tags.get(id)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn stream(&self) -> CollectionStream<Tag> {
        CollectionStream::new(self.tags.subscribe())
    }

    pub fn freshness(&self) -> Freshness {
        self.engine.state().into()
    }

    pub fn dispose(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.release();
        }
    }
}

impl Drop for TagReconciler {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Replace value and read time on a known tag. A missing timestamp keeps
/// the previous read time. An update that declares a type other than the
/// tag's own is dropped.
fn apply(tags: &LiveCollection<Tag>, event: &TagValueEvent) -> MergeOutcome {
    if let (Some(declared), Some(tag)) = (event.data_type, tags.get(event.tag_id)) {
        if declared != tag.data_type {
            warn!(
                tag = %event.tag_id,
                expected = %tag.data_type,
                got = %declared,
                "dropping update with mismatched type"
            );
            return MergeOutcome::Rejected;
        }
    }

    let outcome = MergeOutcome::from_update(tags.update(event.tag_id, |tag| {
        tag.value = Some(event.value.clone());
        if let Some(ts) = &event.timestamp {
            tag.read_at = Some(ts.clone());
        }
    }));

    if outcome == MergeOutcome::Ignored {
        trace!(tag = %event.tag_id, "dropping update for unknown tag");
    }
    outcome
}
