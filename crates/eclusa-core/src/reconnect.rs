// ── Reconnect supervision ──
//
// `connect()` never retries. This module is the optional policy layered on
// top: after an unplanned disconnect it retries with exponential backoff
// until the session is back, the retry budget runs out, or it is cancelled.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionManager, ConnectionState};

/// Exponential backoff configuration for reconnection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnection attempt. Default: 1s.
    #[serde(with = "duration_secs")]
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,

    /// Maximum reconnection attempts per outage.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self)
    }
}

/// Calculate the backoff delay for a given attempt number.
///
/// Uses exponential backoff: `initial_delay * 2^attempt`, capped at
/// `max_delay`, with a deterministic jitter of up to ±25%.
#[allow(clippy::as_conversions, clippy::cast_possible_wrap)]
fn calculate_backoff(attempt: u32, policy: &ReconnectPolicy) -> Duration {
    let exponent = attempt.min(30) as i32;
    let base = policy.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(policy.max_delay.as_secs_f64());

    // Seeded from the attempt number so retries from many consoles spread
    // out without a random source.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::try_from_secs_f64(with_jitter).unwrap_or(policy.max_delay)
}

/// Watch `conn` and reconnect after unplanned disconnects.
///
/// Requested disconnects are left alone. Returns when `cancel` fires or
/// the retry budget for one outage is exhausted.
pub async fn supervise(
    conn: Arc<ConnectionManager>,
    policy: ReconnectPolicy,
    cancel: CancellationToken,
) {
    let mut state_rx = conn.watch();

    loop {
        state_rx.borrow_and_update();
        if needs_reconnect(&conn) && !retry_until_connected(&conn, &policy, &cancel).await {
            break;
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    debug!("reconnect supervisor stopped");
}

fn needs_reconnect(conn: &ConnectionManager) -> bool {
    conn.state() == ConnectionState::Disconnected
        && conn.last_cause().is_some_and(|cause| cause.is_unplanned())
}

/// Returns `false` when supervision should stop.
async fn retry_until_connected(
    conn: &ConnectionManager,
    policy: &ReconnectPolicy,
    cancel: &CancellationToken,
) -> bool {
    let mut attempt: u32 = 0;

    loop {
        if let Some(max) = policy.max_retries {
            if attempt >= max {
                warn!(attempts = attempt, "giving up on event bus reconnect");
                return false;
            }
        }

        let delay = policy.backoff(attempt);
        info!(attempt = attempt + 1, ?delay, "reconnecting to event bus");

        tokio::select! {
            biased;
            () = cancel.cancelled() => return false,
            () = tokio::time::sleep(delay) => {}
        }

        // Someone else may have reconnected, or asked to stay offline.
        if !needs_reconnect(conn) {
            return true;
        }

        match conn.connect().await {
            Ok(()) => {
                info!(attempts = attempt + 1, "event bus reconnected");
                return true;
            }
            Err(e) => {
                warn!(error = %e, attempt = attempt + 1, "reconnect attempt failed");
            }
        }
        attempt = attempt.saturating_add(1);
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::registry::SubscriptionRegistry;
    use eclusa_bus::{Inbound, MemoryBus};
    use tokio::sync::mpsc;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = ReconnectPolicy::default();
        let d0 = policy.backoff(0);
        let d3 = policy.backoff(3);
        let d10 = policy.backoff(10);

        assert!(d0 >= Duration::from_millis(750) && d0 <= Duration::from_millis(1250));
        assert!(d3 > d0);
        assert!(d10 <= Duration::from_secs_f64(30.0 * 1.25));
    }

    #[test]
    fn backoff_saturates_at_huge_max_delay() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::MAX,
            max_delay: Duration::MAX,
            max_retries: None,
        };
        // attempt 1 jitters upward, past what a Duration can hold
        assert_eq!(policy.backoff(1), Duration::MAX);
        assert!(policy.backoff(0) <= Duration::MAX);
    }

    #[test]
    fn policy_reads_seconds() {
        let policy: ReconnectPolicy =
            serde_json::from_str(r#"{"initial_delay":0.5,"max_retries":3}"#).unwrap();
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(policy.max_retries, Some(3));
    }

    fn manager(bus: &MemoryBus) -> (Arc<ConnectionManager>, mpsc::UnboundedReceiver<Inbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(ConnectionManager::new(
            Arc::new(bus.clone()),
            SubscriptionRegistry::new(),
            tx,
            Duration::from_secs(5),
        ));
        (conn, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_transport_loss() {
        let bus = MemoryBus::new();
        let (conn, _rx) = manager(&bus);
        conn.connect().await.unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervise(
            Arc::clone(&conn),
            ReconnectPolicy::default(),
            cancel.clone(),
        ));

        bus.fail_next_connect("still down");
        let session = conn.session_id().unwrap();
        conn.handle_transport_closed(session, "server restart");

        let mut state = conn.watch();
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        assert_eq!(bus.connect_count(), 3);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn leaves_requested_disconnects_alone() {
        let bus = MemoryBus::new();
        let (conn, _rx) = manager(&bus);
        conn.connect().await.unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervise(
            Arc::clone(&conn),
            ReconnectPolicy::default(),
            cancel.clone(),
        ));

        conn.disconnect().await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(bus.connect_count(), 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_retry_budget() {
        let bus = MemoryBus::new();
        let (conn, _rx) = manager(&bus);
        conn.connect().await.unwrap();

        let policy = ReconnectPolicy {
            max_retries: Some(2),
            ..ReconnectPolicy::default()
        };
        let task = tokio::spawn(supervise(
            Arc::clone(&conn),
            policy,
            CancellationToken::new(),
        ));

        bus.fail_next_connect("down");
        bus.fail_next_connect("down");
        bus.fail_next_connect("down");
        let session = conn.session_id().unwrap();
        conn.handle_transport_closed(session, "gone");

        task.await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(bus.connect_count(), 3);
    }
}
