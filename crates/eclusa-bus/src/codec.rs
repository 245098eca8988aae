// ── Message envelope codec ──
//
// Transport bytes in, `{ subject, data }` out. The engine is agnostic to
// per-subject schemas: the only requirement here is a UTF-8 JSON object.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Error;
use crate::subject::Subject;

/// A raw inbound or outbound message as carried by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub subject: Subject,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(subject: Subject, payload: impl Into<Bytes>) -> Self {
        Self {
            subject,
            payload: payload.into(),
        }
    }

    /// Serialize `value` as the JSON payload for `subject`.
    pub fn json<T: Serialize + ?Sized>(subject: Subject, value: &T) -> Result<Self, Error> {
        let payload = serde_json::to_vec(value).map_err(|e| Error::Decode {
            subject: subject.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self::new(subject, payload))
    }

    /// Decode the payload into a [`BusMessage`].
    ///
    /// Fails for invalid UTF-8, invalid JSON, and any JSON value whose top
    /// level is not an object.
    pub fn decode(&self) -> Result<BusMessage, Error> {
        let decode_err = |message: String| Error::Decode {
            subject: self.subject.to_string(),
            message,
        };

        let text = std::str::from_utf8(&self.payload)
            .map_err(|e| decode_err(format!("payload is not UTF-8: {e}")))?;
        let data: serde_json::Value =
            serde_json::from_str(text).map_err(|e| decode_err(e.to_string()))?;

        if !data.is_object() {
            return Err(decode_err(format!(
                "expected a JSON object, got {}",
                json_kind(&data)
            )));
        }

        Ok(BusMessage {
            subject: self.subject.clone(),
            data,
            received_at: Utc::now(),
        })
    }
}

/// A decoded message, ready for dispatch.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub subject: Subject,
    /// Always a JSON object.
    pub data: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl BusMessage {
    /// Decode the object into a per-subject schema.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, Error> {
        T::deserialize(&self.data).map_err(|e| Error::Decode {
            subject: self.subject.to_string(),
            message: e.to_string(),
        })
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn falhas() -> Subject {
        Subject::from_static("eclusa.falhas")
    }

    #[test]
    fn decodes_json_object() {
        let env = Envelope::new(falhas(), r#"{"id":5,"active":true}"#);
        let msg = env.decode().unwrap();
        assert_eq!(msg.subject, falhas());
        assert_eq!(msg.data["id"], 5);
        assert_eq!(msg.data["active"], true);
    }

    #[test]
    fn rejects_non_object_payloads() {
        for payload in ["[1,2,3]", "42", "\"text\"", "null"] {
            let err = Envelope::new(falhas(), payload).decode().unwrap_err();
            assert!(
                matches!(err, Error::Decode { .. }),
                "expected decode error for {payload}"
            );
        }
    }

    #[test]
    fn rejects_malformed_json_and_bad_utf8() {
        assert!(Envelope::new(falhas(), "{not json").decode().is_err());
        assert!(
            Envelope::new(falhas(), vec![0xff, 0xfe, b'{', b'}'])
                .decode()
                .is_err()
        );
    }

    #[test]
    fn json_constructor_round_trips_through_parse() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Ack {
            id: u64,
            acknowledged: bool,
        }

        let env = Envelope::json(
            falhas(),
            &Ack {
                id: 9,
                acknowledged: true,
            },
        )
        .unwrap();
        let parsed: Ack = env.decode().unwrap().parse().unwrap();
        assert_eq!(
            parsed,
            Ack {
                id: 9,
                acknowledged: true
            }
        );
    }

    #[test]
    fn parse_reports_schema_mismatch() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Needs {
            id: u64,
        }

        let msg = Envelope::new(falhas(), r#"{"id":"abc"}"#).decode().unwrap();
        let err = msg.parse::<Needs>().unwrap_err();
        assert!(err.to_string().contains("eclusa.falhas"));
    }
}
