// ── Connection manager ──
//
// Owns the single transport session of an engine. `connect()` is the only
// suspending operation in the core: concurrent callers join one in-flight
// attempt, and the attempt is bounded by the configured timeout. Every
// successful connect binds the new session to the subscription registry,
// which re-issues all held subjects.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use eclusa_bus::{Envelope, Inbound, InboundSink, SessionId, Transport};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::registry::SubscriptionRegistry;

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Why the manager last entered `Disconnected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    /// `disconnect()` was called.
    Requested,
    /// The live session reported that it closed.
    TransportLost { reason: String },
    /// A connect attempt failed or timed out.
    ConnectFailed(CoreError),
}

impl DisconnectCause {
    /// `true` unless the caller asked for the disconnect.
    pub fn is_unplanned(&self) -> bool {
        !matches!(self, Self::Requested)
    }
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("disconnect requested"),
            Self::TransportLost { reason } => write!(f, "connection lost: {reason}"),
            Self::ConnectFailed(err) => write!(f, "connect failed: {err}"),
        }
    }
}

// ── ConnectionManager ────────────────────────────────────────────

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    registry: Arc<SubscriptionRegistry>,
    state: watch::Sender<ConnectionState>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    connect_timeout: Duration,
    next_session: AtomicU64,
    /// Result of the most recent failed attempt, read by joiners.
    last_failure: Mutex<Option<CoreError>>,
    last_cause: Mutex<Option<DisconnectCause>>,
    /// Serializes session bind/unbind against transport-loss handling.
    transition: Mutex<()>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<SubscriptionRegistry>,
        inbound_tx: mpsc::UnboundedSender<Inbound>,
        connect_timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            registry,
            state,
            inbound_tx,
            connect_timeout,
            next_session: AtomicU64::new(1),
            last_failure: Mutex::new(None),
            last_cause: Mutex::new(None),
            transition: Mutex::new(()),
        }
    }

    /// Open a session, or join the one already open or opening.
    ///
    /// Never retries on its own. A failure leaves the manager
    /// `Disconnected` and ready for another call.
    pub async fn connect(&self) -> Result<(), CoreError> {
        let mut claimed = false;
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                claimed = true;
                true
            } else {
                false
            }
        });

        if !claimed {
            return self.join().await;
        }

        let mut guard = AttemptGuard {
            manager: self,
            armed: true,
        };
        let result = self.attempt().await;
        guard.armed = false;
        result
    }

    /// Wait for whichever attempt is in flight and report its outcome.
    async fn join(&self) -> Result<(), CoreError> {
        let mut rx = self.state.subscribe();
        let settled = rx
            .wait_for(|state| *state != ConnectionState::Connecting)
            .await
            .map(|state| *state)
            .map_err(|_| CoreError::NotConnected)?;

        if settled == ConnectionState::Connected {
            debug!("joined existing event bus session");
            return Ok(());
        }
        Err(self
            .last_failure
            .lock()
            .clone()
            .unwrap_or(CoreError::NotConnected))
    }

    async fn attempt(&self) -> Result<(), CoreError> {
        let id = SessionId::new(self.next_session.fetch_add(1, Ordering::Relaxed));
        let sink = InboundSink::new(id, self.inbound_tx.clone());
        let endpoint = self.transport.describe();
        info!(%endpoint, session = %id, "connecting to event bus");

        let session = match tokio::time::timeout(self.connect_timeout, self.transport.connect(sink))
            .await
        {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                let error = match CoreError::from(e) {
                    CoreError::ConnectionFailed { url, reason } if url.is_empty() => {
                        CoreError::ConnectionFailed {
                            url: endpoint,
                            reason,
                        }
                    }
                    other => other,
                };
                return Err(self.fail(error));
            }
            Err(_) => {
                return Err(self.fail(CoreError::Timeout {
                    timeout_secs: self.connect_timeout.as_secs(),
                }));
            }
        };

        let resubscribed = {
            let _transition = self.transition.lock();
            let resubscribed = self.registry.attach(id, session);
            *self.last_failure.lock() = None;
            self.state.send_replace(ConnectionState::Connected);
            resubscribed
        };
        info!(session = %id, resubscribed, "connected to event bus");
        Ok(())
    }

    fn fail(&self, error: CoreError) -> CoreError {
        let _transition = self.transition.lock();
        *self.last_failure.lock() = Some(error.clone());
        *self.last_cause.lock() = Some(DisconnectCause::ConnectFailed(error.clone()));
        self.state.send_replace(ConnectionState::Disconnected);
        warn!(error = %error, "event bus connect failed");
        error
    }

    /// Unsubscribe every live subject, release the session, and go
    /// `Disconnected`. A no-op when nothing is connected. Waits out an
    /// attempt that is still in flight.
    pub async fn disconnect(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx
            .wait_for(|state| *state != ConnectionState::Connecting)
            .await;

        let previous = {
            let _transition = self.transition.lock();
            if *self.state.borrow() != ConnectionState::Connected {
                debug!("disconnect requested while already disconnected");
                return;
            }
            let previous = self.registry.detach(true);
            *self.last_cause.lock() = Some(DisconnectCause::Requested);
            self.state.send_replace(ConnectionState::Disconnected);
            previous
        };

        if let Some(attached) = previous {
            attached.session.close();
            info!(session = %attached.id, "disconnected from event bus");
        }
    }

    /// React to a session reporting that it closed. Reports from sessions
    /// that are no longer attached are ignored.
    pub(crate) fn handle_transport_closed(&self, session: SessionId, reason: &str) {
        let previous = {
            let _transition = self.transition.lock();
            if self.registry.session_id() != Some(session) {
                debug!(%session, reason, "ignoring close from stale session");
                return;
            }
            let previous = self.registry.detach(false);
            *self.last_cause.lock() = Some(DisconnectCause::TransportLost {
                reason: reason.to_owned(),
            });
            self.state.send_replace(ConnectionState::Disconnected);
            previous
        };

        if let Some(attached) = previous {
            attached.session.close();
        }
        warn!(%session, reason, "event bus connection lost; live updates paused");
    }

    /// Publish through the live session.
    pub fn publish(&self, envelope: Envelope) -> Result<(), CoreError> {
        let attached = self.registry.session().ok_or(CoreError::NotConnected)?;
        Ok(attached.session.publish(envelope)?)
    }

    // ── Observation ──────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to connection state changes.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn last_cause(&self) -> Option<DisconnectCause> {
        self.last_cause.lock().clone()
    }

    pub fn last_failure(&self) -> Option<CoreError> {
        self.last_failure.lock().clone()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.registry.session_id()
    }

    pub fn endpoint(&self) -> String {
        self.transport.describe()
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

/// Returns the manager to `Disconnected` when a `connect()` future is
/// dropped mid-attempt, so joiners and later callers are not stranded.
struct AttemptGuard<'a> {
    manager: &'a ConnectionManager,
    armed: bool,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let _transition = self.manager.transition.lock();
        *self.manager.last_failure.lock() = Some(CoreError::NotConnected);
        self.manager.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
        debug!("connect attempt abandoned");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use eclusa_bus::MemoryBus;

    fn manager(bus: &MemoryBus) -> (ConnectionManager, mpsc::UnboundedReceiver<Inbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(
            Arc::new(bus.clone()),
            SubscriptionRegistry::new(),
            tx,
            Duration::from_secs(10),
        );
        (manager, rx)
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let bus = MemoryBus::new();
        let (manager, _rx) = manager(&bus);

        manager.connect().await.unwrap();
        manager.connect().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(bus.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_join_one_attempt() {
        let bus = MemoryBus::new();
        bus.set_connect_delay(Some(Duration::from_secs(1)));
        let (manager, _rx) = manager(&bus);

        let (a, b) = tokio::join!(manager.connect(), manager.connect());
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(bus.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn joiners_see_the_same_failure() {
        let bus = MemoryBus::new();
        bus.set_connect_delay(Some(Duration::from_secs(1)));
        bus.fail_next_connect("refused");
        let (manager, _rx) = manager(&bus);

        let (a, b) = tokio::join!(manager.connect(), manager.connect());
        assert_eq!(a, b);
        assert!(matches!(a, Err(CoreError::ConnectionFailed { ref url, .. }) if url == "memory://"));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(matches!(
            manager.last_cause(),
            Some(DisconnectCause::ConnectFailed(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_times_out() {
        let bus = MemoryBus::new();
        bus.set_connect_delay(Some(Duration::from_secs(60)));
        let (manager, _rx) = manager(&bus);

        let err = manager.connect().await.unwrap_err();
        assert_eq!(err, CoreError::Timeout { timeout_secs: 10 });
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        bus.set_connect_delay(None);
        manager.connect().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn disconnect_is_a_noop_when_disconnected() {
        let bus = MemoryBus::new();
        let (manager, _rx) = manager(&bus);

        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.last_cause().is_none());

        manager.connect().await.unwrap();
        manager.disconnect().await;
        assert_eq!(manager.last_cause(), Some(DisconnectCause::Requested));
        assert!(!bus.is_connected());
    }

    #[tokio::test]
    async fn stale_close_reports_are_ignored() {
        let bus = MemoryBus::new();
        let (manager, _rx) = manager(&bus);
        manager.connect().await.unwrap();
        let live = manager.session_id().unwrap();

        manager.handle_transport_closed(SessionId::new(live.get() + 100), "old");
        assert_eq!(manager.state(), ConnectionState::Connected);

        manager.handle_transport_closed(live, "server restart");
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.last_cause().unwrap().is_unplanned());
    }

    #[tokio::test]
    async fn publish_requires_a_session() {
        let bus = MemoryBus::new();
        let (manager, _rx) = manager(&bus);
        let env = Envelope::new(eclusa_bus::Subject::from_static("a.b"), "{}");

        assert_eq!(manager.publish(env.clone()), Err(CoreError::NotConnected));
        manager.connect().await.unwrap();
        manager.publish(env).unwrap();
        assert_eq!(bus.published().len(), 1);
    }
}
