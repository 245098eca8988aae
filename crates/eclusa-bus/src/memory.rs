// ── In-memory transport ──
//
// A loopback bus for tests and offline demos. The test side holds a
// `MemoryBus` and plays the server: it publishes messages, severs the
// session, and injects connect failures or latency. The engine side sees
// an ordinary `Transport`.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;

use crate::codec::Envelope;
use crate::error::Error;
use crate::subject::Subject;
use crate::transport::{InboundSink, Session, SessionId, Transport};

/// Loopback [`Transport`]. Clones share the same bus.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<BusState>,
    connects: AtomicUsize,
}

#[derive(Debug, Default)]
struct BusState {
    active: Option<ActiveSession>,
    fail_next: VecDeque<String>,
    connect_delay: Option<Duration>,
    subscribe_log: Vec<Subject>,
    unsubscribe_log: Vec<Subject>,
    published: Vec<Envelope>,
}

#[derive(Debug)]
struct ActiveSession {
    id: SessionId,
    sink: InboundSink,
    subjects: HashSet<Subject>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Server side ──────────────────────────────────────────────────

    /// Deliver a raw payload to the live session if it is subscribed to
    /// `subject`. Returns whether the message was delivered.
    pub fn publish(&self, subject: &str, payload: impl Into<bytes::Bytes>) -> bool {
        let Ok(subject) = Subject::new(subject) else {
            return false;
        };
        let state = self.inner.state.lock();
        match &state.active {
            Some(active) if active.subjects.contains(&subject) => {
                active.sink.deliver(Envelope::new(subject, payload))
            }
            _ => false,
        }
    }

    /// [`publish`](Self::publish) a value serialized as JSON.
    pub fn publish_json<T: Serialize + ?Sized>(&self, subject: &str, value: &T) -> bool {
        match serde_json::to_vec(value) {
            Ok(payload) => self.publish(subject, payload),
            Err(_) => false,
        }
    }

    /// Drop the live session as if the server went away.
    pub fn sever(&self, reason: &str) {
        let active = self.inner.state.lock().active.take();
        if let Some(active) = active {
            active.sink.closed(reason);
        }
    }

    /// Make the next connect attempt fail with `reason`. Calls queue up.
    pub fn fail_next_connect(&self, reason: &str) {
        self.inner.state.lock().fail_next.push_back(reason.to_owned());
    }

    /// Hold every connect attempt for `delay` before it resolves.
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        self.inner.state.lock().connect_delay = delay;
    }

    // ── Introspection ────────────────────────────────────────────────

    /// Connect attempts seen so far, including failed ones.
    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().active.is_some()
    }

    pub fn is_subscribed(&self, subject: &str) -> bool {
        let state = self.inner.state.lock();
        state
            .active
            .as_ref()
            .is_some_and(|a| a.subjects.iter().any(|s| s.as_str() == subject))
    }

    /// Subjects the live session is subscribed to, sorted.
    pub fn active_subjects(&self) -> Vec<String> {
        let state = self.inner.state.lock();
        let mut subjects: Vec<String> = state
            .active
            .as_ref()
            .map(|a| a.subjects.iter().map(ToString::to_string).collect())
            .unwrap_or_default();
        subjects.sort();
        subjects
    }

    /// Transport-level subscribes issued for `subject` across all sessions.
    pub fn subscribe_count(&self, subject: &str) -> usize {
        let state = self.inner.state.lock();
        state
            .subscribe_log
            .iter()
            .filter(|s| s.as_str() == subject)
            .count()
    }

    /// Transport-level unsubscribes issued for `subject` across all sessions.
    pub fn unsubscribe_count(&self, subject: &str) -> usize {
        let state = self.inner.state.lock();
        state
            .unsubscribe_log
            .iter()
            .filter(|s| s.as_str() == subject)
            .count()
    }

    /// Everything sessions have published, oldest first.
    pub fn published(&self) -> Vec<Envelope> {
        self.inner.state.lock().published.clone()
    }

    async fn open(&self, sink: InboundSink) -> Result<Box<dyn Session>, Error> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);

        let delay = self.inner.state.lock().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.inner.state.lock();
        if let Some(reason) = state.fail_next.pop_front() {
            return Err(Error::Connect(reason));
        }

        let id = sink.session();
        if let Some(previous) = state.active.replace(ActiveSession {
            id,
            sink,
            subjects: HashSet::new(),
        }) {
            tracing::debug!(session = %previous.id, "memory bus replaced stale session");
        }

        Ok(Box::new(MemorySession {
            bus: Arc::clone(&self.inner),
            id,
        }))
    }
}

impl Transport for MemoryBus {
    fn connect(&self, sink: InboundSink) -> BoxFuture<'_, Result<Box<dyn Session>, Error>> {
        Box::pin(self.open(sink))
    }

    fn describe(&self) -> String {
        "memory://".into()
    }
}

// ── MemorySession ────────────────────────────────────────────────────

struct MemorySession {
    bus: Arc<Inner>,
    id: SessionId,
}

impl MemorySession {
    fn with_active<R>(&self, f: impl FnOnce(&mut BusState) -> R) -> Result<R, Error> {
        let mut state = self.bus.state.lock();
        if state.active.as_ref().is_some_and(|a| a.id == self.id) {
            Ok(f(&mut state))
        } else {
            Err(Error::NotConnected)
        }
    }
}

impl Session for MemorySession {
    fn subscribe(&self, subject: &Subject) -> Result<(), Error> {
        self.with_active(|state| {
            let fresh = state
                .active
                .as_mut()
                .is_some_and(|a| a.subjects.insert(subject.clone()));
            if fresh {
                state.subscribe_log.push(subject.clone());
            }
        })
    }

    fn unsubscribe(&self, subject: &Subject) -> Result<(), Error> {
        self.with_active(|state| {
            let removed = state
                .active
                .as_mut()
                .is_some_and(|a| a.subjects.remove(subject));
            if removed {
                state.unsubscribe_log.push(subject.clone());
            }
        })
    }

    fn publish(&self, envelope: Envelope) -> Result<(), Error> {
        self.with_active(|state| {
            if let Some(active) = &state.active {
                if active.subjects.contains(&envelope.subject) {
                    active.sink.deliver(envelope.clone());
                }
            }
            state.published.push(envelope);
        })
    }

    fn close(&self) {
        let mut state = self.bus.state.lock();
        if state.active.as_ref().is_some_and(|a| a.id == self.id) {
            state.active = None;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::transport::{Inbound, TransportEvent};
    use tokio::sync::mpsc;

    fn sink(id: u64) -> (InboundSink, mpsc::UnboundedReceiver<Inbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (InboundSink::new(SessionId::new(id), tx), rx)
    }

    #[tokio::test]
    async fn delivers_only_subscribed_subjects() {
        let bus = MemoryBus::new();
        let (sink, mut rx) = sink(1);
        let session = bus.connect(sink).await.unwrap();

        session.subscribe(&Subject::from_static("eclusa.falhas")).unwrap();

        assert!(bus.publish("eclusa.falhas", "{}"));
        assert!(!bus.publish("plc.status.1", "{}"));

        let inbound = rx.try_recv().unwrap();
        assert!(matches!(inbound.event, TransportEvent::Message(_)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn counts_transport_level_operations() {
        let bus = MemoryBus::new();
        let (sink, _rx) = sink(1);
        let session = bus.connect(sink).await.unwrap();
        let subject = Subject::from_static("plc.status.4");

        session.subscribe(&subject).unwrap();
        session.subscribe(&subject).unwrap();
        session.unsubscribe(&subject).unwrap();

        assert_eq!(bus.subscribe_count("plc.status.4"), 1);
        assert_eq!(bus.unsubscribe_count("plc.status.4"), 1);
        assert!(!bus.is_subscribed("plc.status.4"));
    }

    #[tokio::test]
    async fn injected_failure_applies_once() {
        let bus = MemoryBus::new();
        bus.fail_next_connect("refused");

        let (first, _rx1) = sink(1);
        assert!(matches!(bus.connect(first).await, Err(Error::Connect(_))));

        let (second, _rx2) = sink(2);
        assert!(bus.connect(second).await.is_ok());
        assert_eq!(bus.connect_count(), 2);
    }

    #[tokio::test]
    async fn sever_reports_closed_and_invalidates_session() {
        let bus = MemoryBus::new();
        let (sink, mut rx) = sink(9);
        let session = bus.connect(sink).await.unwrap();

        bus.sever("server restart");

        let inbound = rx.try_recv().unwrap();
        assert_eq!(inbound.session, SessionId::new(9));
        assert!(matches!(inbound.event, TransportEvent::Closed { ref reason } if reason == "server restart"));
        assert!(matches!(
            session.subscribe(&Subject::from_static("eclusa.falhas")),
            Err(Error::NotConnected)
        ));
        assert!(!bus.is_connected());
    }

    #[tokio::test]
    async fn stale_session_close_keeps_new_session() {
        let bus = MemoryBus::new();
        let (old_sink, _rx1) = sink(1);
        let old = bus.connect(old_sink).await.unwrap();
        let (new_sink, _rx2) = sink(2);
        let _new = bus.connect(new_sink).await.unwrap();

        old.close();
        assert!(bus.is_connected());
    }
}
