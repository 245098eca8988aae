// ── Dispatcher ──
//
// Decodes each inbound envelope once and hands the result to every
// handler registered for its subject, in registration order. Failures are
// contained: a bad payload drops one message, a failing or panicking
// handler is logged and the remaining handlers still run.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use eclusa_bus::{Envelope, Subject};
use tokio::sync::watch;
use tracing::{trace, warn};

use crate::registry::SubscriptionRegistry;

/// Outcome of dispatching one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub subject: Subject,
    /// `false` when the payload failed to decode and was dropped.
    pub decoded: bool,
    /// Handlers that completed successfully.
    pub delivered: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

/// Running totals, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub received: u64,
    pub dropped: u64,
    pub handler_failures: u64,
}

pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
    received: AtomicU64,
    dropped: AtomicU64,
    handler_failures: AtomicU64,
    last_message: watch::Sender<Option<DateTime<Utc>>>,
    processed: watch::Sender<u64>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        let (last_message, _) = watch::channel(None);
        let (processed, _) = watch::channel(0);
        Self {
            registry,
            received: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            last_message,
            processed,
        }
    }

    /// Decode `envelope` and invoke its handlers synchronously.
    pub fn dispatch(&self, envelope: &Envelope) -> DispatchReport {
        self.received.fetch_add(1, Ordering::Relaxed);
        let report = self.dispatch_inner(envelope);
        self.processed.send_modify(|n| *n += 1);
        report
    }

    fn dispatch_inner(&self, envelope: &Envelope) -> DispatchReport {
        let mut report = DispatchReport {
            subject: envelope.subject.clone(),
            decoded: false,
            delivered: 0,
            failed: 0,
        };

        let message = match envelope.decode() {
            Ok(message) => message,
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(subject = %envelope.subject, error = %e, "dropping undecodable message");
                return report;
            }
        };
        report.decoded = true;
        self.last_message.send_replace(Some(message.received_at));

        let handlers = self.registry.handlers_for(&message.subject);
        if handlers.is_empty() {
            trace!(subject = %message.subject, "no handlers for message");
        }

        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&message))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(subject = %message.subject, error = %e, "handler failed");
                }
                Err(panic) => {
                    report.failed += 1;
                    warn!(
                        subject = %message.subject,
                        panic = panic_message(panic.as_ref()),
                        "handler panicked"
                    );
                }
            }
        }

        if report.failed > 0 {
            self.handler_failures.fetch_add(
                u64::try_from(report.failed).unwrap_or(u64::MAX),
                Ordering::Relaxed,
            );
        }
        report
    }

    /// Time the last decodable message was dispatched.
    pub fn last_message_at(&self) -> Option<DateTime<Utc>> {
        *self.last_message.borrow()
    }

    pub fn watch_last_message(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.last_message.subscribe()
    }

    /// Count of envelopes processed (decoded or dropped). Lets observers
    /// wait until a given message has been fully handled.
    pub fn watch_processed(&self) -> watch::Receiver<u64> {
        self.processed.subscribe()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
