// ── Subject names ──
//
// Hierarchical, dot-separated stream names. The engine never enumerates
// them; callers build them from configuration or bus discovery.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// An opaque hierarchical topic key such as `plc.status.7`.
///
/// Cheap to clone (`Arc<str>`). Construction validates that the string is
/// non-empty, has no whitespace, and has no empty `.` segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subject(Arc<str>);

impl Subject {
    pub fn new(raw: impl AsRef<str>) -> Result<Self, Error> {
        let raw = raw.as_ref();
        validate(raw)?;
        Ok(Self(Arc::from(raw)))
    }

    /// Build a subject from a literal known to be valid.
    ///
    /// Invalid literals are a programming error and trip a debug assertion.
    pub fn from_static(raw: &'static str) -> Self {
        debug_assert!(validate(raw).is_ok(), "invalid subject literal: {raw}");
        Self(Arc::from(raw))
    }

    /// Append one segment: `plc.status` + `7` → `plc.status.7`.
    pub fn child(&self, segment: impl fmt::Display) -> Result<Self, Error> {
        Self::new(format!("{}.{segment}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Last segment, e.g. the PLC id in `plc.status.7`.
    pub fn last_segment(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }
}

fn validate(raw: &str) -> Result<(), Error> {
    let invalid = |reason| Error::InvalidSubject {
        subject: raw.to_owned(),
        reason,
    };

    if raw.is_empty() {
        return Err(invalid("subject is empty"));
    }
    if raw.chars().any(char::is_whitespace) {
        return Err(invalid("subject contains whitespace"));
    }
    if raw.split('.').any(str::is_empty) {
        return Err(invalid("subject has an empty segment"));
    }
    Ok(())
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Subject {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for Subject {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for Subject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Subject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}
