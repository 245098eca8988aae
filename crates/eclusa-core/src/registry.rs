// ── Subscription registry ──
//
// Maps each subject to the ordered list of handlers interested in it. The
// first handler for a subject issues the transport-level subscribe; the
// last release issues the transport-level unsubscribe, exactly once.
// Entries survive transport loss so the next session can re-issue them.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use eclusa_bus::{BusMessage, Session, SessionId, Subject};
use tracing::{debug, trace, warn};

use crate::error::CoreError;

/// A message handler. Runs synchronously on the engine's dispatch task and
/// must not block.
pub type Handler = Arc<dyn Fn(&BusMessage) -> Result<(), CoreError> + Send + Sync>;

/// Box a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&BusMessage) -> Result<(), CoreError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Identity of one registered handler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct SubjectEntry {
    handlers: Vec<(HandlerId, Handler)>,
    /// Whether the attached session currently holds a subscription.
    live: bool,
}

/// The session currently bound to the registry.
pub(crate) struct AttachedSession {
    pub(crate) id: SessionId,
    pub(crate) session: Box<dyn Session>,
}

/// Reference-counted subject → handlers map.
pub struct SubscriptionRegistry {
    entries: DashMap<Subject, SubjectEntry>,
    next_handler: AtomicU64,
    session: ArcSwapOption<AttachedSession>,
    this: Weak<SubscriptionRegistry>,
}

impl SubscriptionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            entries: DashMap::new(),
            next_handler: AtomicU64::new(1),
            session: ArcSwapOption::empty(),
            this: this.clone(),
        })
    }

    /// Register `handler` for `subject`.
    ///
    /// The returned handle releases the registration when dropped or when
    /// [`SubscriptionHandle::release`] is called.
    pub fn subscribe(&self, subject: Subject, handler: Handler) -> SubscriptionHandle {
        let id = HandlerId(self.next_handler.fetch_add(1, Ordering::Relaxed));

        let mut entry = self
            .entries
            .entry(subject.clone())
            .or_insert_with(|| SubjectEntry {
                handlers: Vec::new(),
                live: false,
            });
        entry.handlers.push((id, handler));
        let ref_count = entry.handlers.len();

        if !entry.live {
            if let Some(attached) = self.session.load_full() {
                match attached.session.subscribe(&subject) {
                    Ok(()) => entry.live = true,
                    Err(e) => warn!(%subject, error = %e, "transport subscribe failed"),
                }
            }
        }
        drop(entry);

        debug!(%subject, ref_count, "handler subscribed");

        SubscriptionHandle {
            subject,
            id,
            registry: self.this.clone(),
            released: AtomicBool::new(false),
        }
    }

    /// Remove one handler; tear the subject down when it was the last one.
    fn release(&self, subject: &Subject, id: HandlerId) {
        let mut remaining = None;
        let removed = self.entries.remove_if_mut(subject, |_, entry| {
            entry.handlers.retain(|(h, _)| *h != id);
            remaining = Some(entry.handlers.len());
            if !entry.handlers.is_empty() {
                return false;
            }
            if entry.live {
                if let Some(attached) = self.session.load_full() {
                    if let Err(e) = attached.session.unsubscribe(subject) {
                        warn!(%subject, error = %e, "transport unsubscribe failed");
                    }
                }
            }
            true
        });

        if removed.is_some() {
            debug!(%subject, "subject torn down");
        } else if let Some(ref_count) = remaining {
            debug!(%subject, ref_count, "handler released");
        }
    }

    /// Handlers for `subject` in registration order.
    ///
    /// Returns clones so no registry lock is held while handlers run.
    pub fn handlers_for(&self, subject: &Subject) -> Vec<Handler> {
        self.entries
            .get(subject)
            .map(|entry| entry.handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default()
    }

    /// Number of live handlers for `subject`.
    pub fn ref_count(&self, subject: &Subject) -> usize {
        self.entries.get(subject).map_or(0, |e| e.handlers.len())
    }

    /// Whether the attached session currently holds `subject`.
    pub fn is_live(&self, subject: &Subject) -> bool {
        self.entries.get(subject).is_some_and(|e| e.live)
    }

    /// Every subject with at least one handler, sorted.
    pub fn subjects(&self) -> Vec<Subject> {
        let mut subjects: Vec<Subject> = self.entries.iter().map(|e| e.key().clone()).collect();
        subjects.sort();
        subjects
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // ── Session binding (connection manager only) ────────────────────

    pub(crate) fn session_id(&self) -> Option<SessionId> {
        self.session.load_full().map(|s| s.id)
    }

    pub(crate) fn session(&self) -> Option<Arc<AttachedSession>> {
        self.session.load_full()
    }

    /// Bind a fresh session and re-issue every registered subject on it.
    /// Returns how many subjects were subscribed.
    pub(crate) fn attach(&self, id: SessionId, session: Box<dyn Session>) -> usize {
        let attached = Arc::new(AttachedSession { id, session });
        self.session.store(Some(Arc::clone(&attached)));

        let mut resubscribed = 0;
        for mut entry in self.entries.iter_mut() {
            if entry.live {
                continue;
            }
            let subject = entry.key().clone();
            match attached.session.subscribe(&subject) {
                Ok(()) => {
                    entry.live = true;
                    resubscribed += 1;
                    trace!(%subject, session = %id, "subject re-issued");
                }
                Err(e) => warn!(%subject, error = %e, "transport subscribe failed"),
            }
        }
        resubscribed
    }

    /// Unbind the current session. With `graceful`, every live subject is
    /// unsubscribed at the transport first. Registry entries are kept.
    pub(crate) fn detach(&self, graceful: bool) -> Option<Arc<AttachedSession>> {
        let previous = self.session.swap(None);

        for mut entry in self.entries.iter_mut() {
            if !entry.live {
                continue;
            }
            if graceful {
                if let Some(attached) = &previous {
                    if let Err(e) = attached.session.unsubscribe(entry.key()) {
                        debug!(subject = %entry.key(), error = %e, "unsubscribe on detach failed");
                    }
                }
            }
            entry.live = false;
        }
        previous
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subjects", &self.subjects())
            .field("session", &self.session_id())
            .finish_non_exhaustive()
    }
}

// ── SubscriptionHandle ───────────────────────────────────────────────

/// Ownership of one handler registration.
///
/// Releasing twice is a no-op. Dropping the handle releases it.
pub struct SubscriptionHandle {
    subject: Subject,
    id: HandlerId,
    registry: Weak<SubscriptionRegistry>,
    released: AtomicBool,
}

impl SubscriptionHandle {
    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Remove this handler. Messages already being dispatched may still
    /// reach it; later ones will not.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.release(&self.subject, self.id);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("subject", &self.subject)
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use eclusa_bus::{Envelope, InboundSink, MemoryBus, Transport};
    use tokio::sync::mpsc;

    fn noop() -> Handler {
        handler(|_| Ok(()))
    }

    async fn attach_memory(registry: &SubscriptionRegistry, bus: &MemoryBus, id: u64) {
        let (tx, _rx) = mpsc::unbounded_channel();
        let sink = InboundSink::new(SessionId::new(id), tx);
        let session = bus.connect(sink).await.unwrap();
        registry.attach(SessionId::new(id), session);
    }

    #[test]
    fn ref_counts_per_subject() {
        let registry = SubscriptionRegistry::new();
        let subject = Subject::from_static("plc.status.1");

        let a = registry.subscribe(subject.clone(), noop());
        let b = registry.subscribe(subject.clone(), noop());
        assert_eq!(registry.ref_count(&subject), 2);

        a.release();
        a.release();
        assert_eq!(registry.ref_count(&subject), 1);

        drop(b);
        assert_eq!(registry.ref_count(&subject), 0);
        assert!(registry.subjects().is_empty());
    }

    #[test]
    fn handlers_keep_registration_order() {
        let registry = SubscriptionRegistry::new();
        let subject = Subject::from_static("eclusa.falhas");
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..3)
            .map(|n| {
                let seen = Arc::clone(&seen);
                registry.subscribe(
                    subject.clone(),
                    handler(move |_| {
                        seen.lock().push(n);
                        Ok(())
                    }),
                )
            })
            .collect();

        let msg = Envelope::new(subject.clone(), "{}").decode().unwrap();
        for handler in registry.handlers_for(&subject) {
            handler(&msg).unwrap();
        }
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
        drop(handles);
    }

    #[tokio::test]
    async fn transport_subscribe_and_unsubscribe_happen_once() {
        let bus = MemoryBus::new();
        let registry = SubscriptionRegistry::new();
        attach_memory(&registry, &bus, 1).await;

        let a = registry.subscribe(Subject::from_static("eclusa.falhas"), noop());
        let b = registry.subscribe(Subject::from_static("eclusa.falhas"), noop());
        assert_eq!(bus.subscribe_count("eclusa.falhas"), 1);

        a.release();
        assert_eq!(bus.unsubscribe_count("eclusa.falhas"), 0);
        b.release();
        assert_eq!(bus.unsubscribe_count("eclusa.falhas"), 1);
        b.release();
        assert_eq!(bus.unsubscribe_count("eclusa.falhas"), 1);
    }

    #[tokio::test]
    async fn attach_reissues_subjects_registered_while_offline() {
        let bus = MemoryBus::new();
        let registry = SubscriptionRegistry::new();

        let _h = registry.subscribe(Subject::from_static("plc.status.2"), noop());
        assert!(!registry.is_live(&Subject::from_static("plc.status.2")));

        attach_memory(&registry, &bus, 1).await;
        assert!(bus.is_subscribed("plc.status.2"));
        assert!(registry.is_live(&Subject::from_static("plc.status.2")));
    }

    #[tokio::test]
    async fn detach_keeps_entries_and_resets_live_flags() {
        let bus = MemoryBus::new();
        let registry = SubscriptionRegistry::new();
        attach_memory(&registry, &bus, 1).await;
        let _h = registry.subscribe(Subject::from_static("plc.status.2"), noop());

        let previous = registry.detach(true).unwrap();
        previous.session.close();

        assert_eq!(registry.ref_count(&Subject::from_static("plc.status.2")), 1);
        assert!(!registry.is_live(&Subject::from_static("plc.status.2")));
        assert_eq!(bus.unsubscribe_count("plc.status.2"), 1);
        assert!(registry.session_id().is_none());
    }

    #[test]
    fn handle_outliving_registry_is_harmless() {
        let registry = SubscriptionRegistry::new();
        let handle = registry.subscribe(Subject::from_static("a.b"), noop());
        drop(registry);
        handle.release();
        assert!(handle.is_released());
    }
}
