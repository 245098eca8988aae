// ── Engine ──
//
// Explicitly owned live-state engine: one connection manager, one
// subscription registry, one dispatcher, and the pump task that feeds
// transport events through them. Views create reconcilers against an
// `Engine` and drop them when they go away; the engine itself lives until
// `dispose()`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use eclusa_bus::{BusMessage, Envelope, Inbound, Subject, Transport, TransportEvent};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::connection::{ConnectionManager, ConnectionState, DisconnectCause};
use crate::dispatch::Dispatcher;
use crate::error::CoreError;
use crate::reconnect;
use crate::registry::{Handler, SubscriptionHandle, SubscriptionRegistry, handler};

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<EngineInner>`. Does not connect on
/// construction; call [`connect()`](Self::connect).
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Arc<Dispatcher>,
    connection: Arc<ConnectionManager>,
    /// Taken by the pump task on first connect.
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    supervising: AtomicBool,
    disposed: AtomicBool,
}

impl Engine {
    pub fn new(transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        let registry = SubscriptionRegistry::new();
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry)));
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let connection = Arc::new(ConnectionManager::new(
            transport,
            Arc::clone(&registry),
            inbound_tx,
            config.connect_timeout,
        ));

        Self {
            inner: Arc::new(EngineInner {
                config,
                registry,
                dispatcher,
                connection,
                inbound_rx: Mutex::new(Some(inbound_rx)),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
                supervising: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Connect to the bus, or join the attempt already in flight.
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.ensure_open()?;
        self.ensure_pump();
        self.inner.connection.connect().await
    }

    /// Unsubscribe everything at the transport and close the session.
    /// Registrations survive and are re-issued by the next `connect()`.
    pub async fn disconnect(&self) {
        self.inner.connection.disconnect().await;
    }

    /// Tear the engine down: disconnect, stop background tasks, and refuse
    /// further `connect()` / `subscribe()` calls. Idempotent.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.connection.disconnect().await;
        self.inner.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = self.inner.task_handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!("engine disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Retry unplanned disconnects in the background using
    /// [`EngineConfig::reconnect`]. Calling it again is a no-op.
    pub fn spawn_reconnect_supervisor(&self) {
        if self.is_disposed() || self.inner.supervising.swap(true, Ordering::AcqRel) {
            return;
        }
        let handle = tokio::spawn(reconnect::supervise(
            Arc::clone(&self.inner.connection),
            self.inner.config.reconnect.clone(),
            self.inner.cancel.child_token(),
        ));
        self.inner.task_handles.lock().push(handle);
        debug!("reconnect supervisor started");
    }

    fn ensure_open(&self) -> Result<(), CoreError> {
        if self.is_disposed() {
            Err(CoreError::EngineClosed)
        } else {
            Ok(())
        }
    }

    fn ensure_pump(&self) {
        let Some(rx) = self.inner.inbound_rx.lock().take() else {
            return;
        };
        let handle = tokio::spawn(pump_task(
            Arc::clone(&self.inner.dispatcher),
            Arc::clone(&self.inner.connection),
            rx,
            self.inner.cancel.child_token(),
        ));
        self.inner.task_handles.lock().push(handle);
    }

    // ── Subscriptions ────────────────────────────────────────────

    /// Register `f` for every message on `subject`.
    pub fn subscribe<F>(&self, subject: Subject, f: F) -> Result<SubscriptionHandle, CoreError>
    where
        F: Fn(&BusMessage) -> Result<(), CoreError> + Send + Sync + 'static,
    {
        self.subscribe_handler(subject, handler(f))
    }

    /// Register an already boxed [`Handler`].
    pub fn subscribe_handler(
        &self,
        subject: Subject,
        handler: Handler,
    ) -> Result<SubscriptionHandle, CoreError> {
        self.ensure_open()?;
        Ok(self.inner.registry.subscribe(subject, handler))
    }

    /// Register `f` for messages on `subject` that decode as `T`.
    ///
    /// Payloads that do not match `T` fail that one delivery with
    /// [`CoreError::Decode`]; the subscription stays up.
    pub fn subscribe_parsed<T, F>(
        &self,
        subject: Subject,
        f: F,
    ) -> Result<SubscriptionHandle, CoreError>
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) -> Result<(), CoreError> + Send + Sync + 'static,
    {
        self.subscribe(subject, move |message| f(message.parse::<T>()?))
    }

    // ── Publishing ───────────────────────────────────────────────

    pub fn publish(&self, envelope: Envelope) -> Result<(), CoreError> {
        self.inner.connection.publish(envelope)
    }

    pub fn publish_json<T: Serialize + ?Sized>(
        &self,
        subject: Subject,
        value: &T,
    ) -> Result<(), CoreError> {
        self.publish(Envelope::json(subject, value)?)
    }

    // ── Observation ──────────────────────────────────────────────

    /// Subscribe to connection state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.watch()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn last_disconnect(&self) -> Option<DisconnectCause> {
        self.inner.connection.last_cause()
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.inner.connection
    }

    /// Subjects with at least one registered handler.
    pub fn subjects(&self) -> Vec<Subject> {
        self.inner.registry.subjects()
    }

    pub fn last_message_at(&self) -> Option<DateTime<Utc>> {
        self.inner.dispatcher.last_message_at()
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Single consumer of the inbound channel. Every handler runs here, so
/// merges never race each other.
async fn pump_task(
    dispatcher: Arc<Dispatcher>,
    connection: Arc<ConnectionManager>,
    mut rx: mpsc::UnboundedReceiver<Inbound>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            inbound = rx.recv() => {
                let Some(Inbound { session, event }) = inbound else { break };
                match event {
                    TransportEvent::Message(envelope) => {
                        dispatcher.dispatch(&envelope);
                    }
                    TransportEvent::Closed { reason } => {
                        connection.handle_transport_closed(session, &reason);
                    }
                }
            }
        }
    }
    debug!("inbound pump stopped");
}
