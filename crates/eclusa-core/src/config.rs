// ── Runtime engine configuration ──
//
// These types describe *how* the engine talks to the bus: handshake
// budget, subject names, and reconnect tuning. They never touch disk.
// The CLI builds an `EngineConfig` (via eclusa-config) and hands it in.

use std::collections::HashMap;
use std::time::Duration;

use eclusa_bus::Subject;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CoreError;
use crate::model::PlcId;
use crate::reconnect::ReconnectPolicy;

/// Configuration for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on a single `connect()` attempt. Default: 10s.
    pub connect_timeout: Duration,
    /// Subject names used by the reconcilers.
    pub subjects: SubjectCatalog,
    /// Backoff used by the optional reconnect supervisor.
    pub reconnect: ReconnectPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            subjects: SubjectCatalog::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

// ── SubjectCatalog ───────────────────────────────────────────────────

/// Canonical subject names, overridable by configuration or bus
/// discovery so the server can rename streams without a client rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectCatalog {
    /// Fault activation/deactivation events.
    pub faults: Subject,
    /// Fault acknowledgement broadcasts.
    pub acknowledgements: Subject,
    /// Prefix for `<prefix>.<plcId>` controller status subjects.
    pub plc_status: Subject,
    /// Prefix for `<prefix>.<plcId>` tag value subjects.
    pub tag_updates: Subject,
}

impl Default for SubjectCatalog {
    fn default() -> Self {
        Self {
            faults: Subject::from_static("eclusa.falhas"),
            acknowledgements: Subject::from_static("eclusa.falhas.reconhecidas"),
            plc_status: Subject::from_static("plc.status"),
            tag_updates: Subject::from_static("plc.tags.updates"),
        }
    }
}

impl SubjectCatalog {
    /// `plc.status.<plcId>`
    pub fn plc_status_for(&self, plc: PlcId) -> Result<Subject, CoreError> {
        Ok(self.plc_status.child(plc)?)
    }

    /// `plc.tags.updates.<plcId>`
    pub fn tag_updates_for(&self, plc: PlcId) -> Result<Subject, CoreError> {
        Ok(self.tag_updates.child(plc)?)
    }

    /// Merge the `subjects` map advertised by bus discovery.
    ///
    /// Role names are matched loosely (`plcStatus`, `plc_status`,
    /// `plc-status`); unknown roles are skipped. Returns how many roles were
    /// applied.
    pub fn apply_discovery(&mut self, roles: &HashMap<String, String>) -> Result<usize, CoreError> {
        let mut applied = 0;
        for (role, raw) in roles {
            let normalized: String = role
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .map(|c| c.to_ascii_lowercase())
                .collect();

            let slot = match normalized.as_str() {
                "faults" | "falhas" => &mut self.faults,
                "acknowledgements" | "acks" | "falhasreconhecidas" => &mut self.acknowledgements,
                "plcstatus" | "status" => &mut self.plc_status,
                "tagupdates" | "tags" => &mut self.tag_updates,
                _ => {
                    debug!(role, subject = raw, "ignoring unknown subject role");
                    continue;
                }
            };
            *slot = Subject::new(raw)?;
            applied += 1;
        }
        Ok(applied)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backend_names() {
        let catalog = SubjectCatalog::default();
        assert_eq!(catalog.faults.as_str(), "eclusa.falhas");
        assert_eq!(
            catalog.plc_status_for(PlcId(7)).unwrap().as_str(),
            "plc.status.7"
        );
        assert_eq!(
            catalog.tag_updates_for(PlcId(3)).unwrap().as_str(),
            "plc.tags.updates.3"
        );
        assert_eq!(EngineConfig::default().connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn discovery_overrides_known_roles() {
        let mut catalog = SubjectCatalog::default();
        let roles = HashMap::from([
            ("faults".to_owned(), "linha2.falhas".to_owned()),
            ("plc_status".to_owned(), "linha2.plc.status".to_owned()),
            ("metrics".to_owned(), "linha2.metrics".to_owned()),
        ]);

        assert_eq!(catalog.apply_discovery(&roles).unwrap(), 2);
        assert_eq!(catalog.faults.as_str(), "linha2.falhas");
        assert_eq!(
            catalog.plc_status_for(PlcId(1)).unwrap().as_str(),
            "linha2.plc.status.1"
        );
        assert_eq!(catalog.acknowledgements.as_str(), "eclusa.falhas.reconhecidas");
    }

    #[test]
    fn discovery_rejects_invalid_subject() {
        let mut catalog = SubjectCatalog::default();
        let roles = HashMap::from([("faults".to_owned(), "bad subject".to_owned())]);
        assert!(matches!(
            catalog.apply_discovery(&roles),
            Err(CoreError::InvalidSubject { .. })
        ));
    }
}
