// ── Transport seam ──
//
// The engine talks to the bus through these two traits. A `Transport`
// opens sessions; a `Session` accepts subject-level subscribe/unsubscribe
// and pushes everything it receives into the engine's inbound channel.

use std::fmt;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use crate::codec::Envelope;
use crate::error::Error;
use crate::subject::Subject;

/// Monotonic identifier the engine assigns to each connection attempt.
///
/// Inbound events carry it so that late events from a dead session can be
/// told apart from the live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a session reports back to the engine.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message(Envelope),
    /// The session is gone. Live updates pause until the next connect.
    Closed { reason: String },
}

/// An event tagged with the session that produced it.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub session: SessionId,
    pub event: TransportEvent,
}

/// Write side of the engine's inbound channel, handed to a transport on
/// connect.
#[derive(Debug, Clone)]
pub struct InboundSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<Inbound>,
}

impl InboundSink {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<Inbound>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Forward a message. Returns `false` once the engine has gone away.
    pub fn deliver(&self, envelope: Envelope) -> bool {
        self.send(TransportEvent::Message(envelope))
    }

    /// Report that the session ended.
    pub fn closed(&self, reason: impl Into<String>) -> bool {
        self.send(TransportEvent::Closed {
            reason: reason.into(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, event: TransportEvent) -> bool {
        self.tx
            .send(Inbound {
                session: self.session,
                event,
            })
            .is_ok()
    }
}

/// Opens bus sessions.
pub trait Transport: Send + Sync + 'static {
    /// Perform the handshake and return a live session.
    ///
    /// Callers bound the wait; implementations need not apply their own
    /// timeout.
    fn connect(&self, sink: InboundSink) -> BoxFuture<'_, Result<Box<dyn Session>, Error>>;

    /// Human-readable endpoint for logs.
    fn describe(&self) -> String;
}

/// One live transport session.
///
/// Every method is non-blocking: implementations queue work for a
/// background task rather than performing I/O inline.
pub trait Session: Send + Sync {
    fn subscribe(&self, subject: &Subject) -> Result<(), Error>;

    fn unsubscribe(&self, subject: &Subject) -> Result<(), Error>;

    /// Publish a payload. The engine only consumes events, but producers and
    /// diagnostics share the session.
    fn publish(&self, envelope: Envelope) -> Result<(), Error>;

    /// Release the underlying connection. Idempotent.
    fn close(&self);
}
