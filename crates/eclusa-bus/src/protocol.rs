// ── NATS text protocol ──
//
// Framing for the bus wire: `INFO`, `MSG`, `PING`/`PONG`, `+OK`, `-ERR`
// from the server; `CONNECT`, `SUB`, `UNSUB`, `PUB`, `PING`/`PONG` from
// the client. WebSocket frames do not align with protocol frames, so the
// parser buffers until a complete operation is available.

use bytes::{Buf, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::subject::Subject;

const CRLF: &[u8] = b"\r\n";

/// Upper bound on a single control line, guarding against a peer that
/// never sends `\r\n`.
const MAX_CONTROL_LINE: usize = 4096;

/// Payload limit used until the server's `INFO` announces its own.
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

// ── Server → client ──────────────────────────────────────────────────

/// The `INFO` block sent by the server on connect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub server_id: String,
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub max_payload: Option<u64>,
    #[serde(default)]
    pub auth_required: bool,
}

/// A complete operation received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerOp {
    Info(ServerInfo),
    Msg {
        subject: Subject,
        sid: u64,
        reply_to: Option<String>,
        payload: Bytes,
    },
    Ping,
    Pong,
    Ok,
    Err(String),
}

/// Incremental decoder for the server side of the protocol.
#[derive(Debug)]
pub struct ProtocolParser {
    buf: BytesMut,
    max_payload: usize,
}

impl Default for ProtocolParser {
    fn default() -> Self {
        Self {
            buf: BytesMut::new(),
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl ProtocolParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Largest `MSG` payload accepted. Larger frames are rejected before
    /// any of their payload is buffered.
    pub fn set_max_payload(&mut self, limit: u64) {
        self.max_payload = usize::try_from(limit).unwrap_or(usize::MAX);
    }

    /// Append raw bytes from the transport.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete operation, or `Ok(None)` if more bytes are
    /// needed. On `Err` the offending line has been consumed.
    pub fn next_op(&mut self) -> Result<Option<ServerOp>, Error> {
        let Some(line_end) = find_crlf(&self.buf) else {
            if self.buf.len() > MAX_CONTROL_LINE {
                self.buf.clear();
                return Err(Error::Protocol("control line too long".into()));
            }
            return Ok(None);
        };

        let line = String::from_utf8_lossy(&self.buf[..line_end]).into_owned();
        let (verb, rest) = match line.split_once(' ') {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line.as_str(), ""),
        };

        if verb.eq_ignore_ascii_case("MSG") {
            return self.take_msg(line_end, rest);
        }

        self.buf.advance(line_end + CRLF.len());

        let op = match verb.to_ascii_uppercase().as_str() {
            "PING" => ServerOp::Ping,
            "PONG" => ServerOp::Pong,
            "+OK" => ServerOp::Ok,
            "-ERR" => ServerOp::Err(rest.trim_matches('\'').to_owned()),
            "INFO" => {
                let info = serde_json::from_str(rest)
                    .map_err(|e| Error::Protocol(format!("invalid INFO block: {e}")))?;
                ServerOp::Info(info)
            }
            other => return Err(Error::Protocol(format!("unknown operation '{other}'"))),
        };
        Ok(Some(op))
    }

    /// `MSG <subject> <sid> [reply-to] <#bytes>\r\n<payload>\r\n`
    fn take_msg(&mut self, line_end: usize, args: &str) -> Result<Option<ServerOp>, Error> {
        let parts: Vec<&str> = args.split_whitespace().collect();
        let (subject, sid, reply_to, size) = match parts.as_slice() {
            [subject, sid, size] => (*subject, *sid, None, *size),
            [subject, sid, reply, size] => (*subject, *sid, Some((*reply).to_owned()), *size),
            _ => {
                self.buf.advance(line_end + CRLF.len());
                return Err(Error::Protocol(format!("malformed MSG line '{args}'")));
            }
        };

        let parsed = (
            Subject::new(subject),
            sid.parse::<u64>(),
            size.parse::<usize>(),
        );
        let (subject, sid, size) = match parsed {
            (Ok(subject), Ok(sid), Ok(size)) => (subject, sid, size),
            _ => {
                self.buf.advance(line_end + CRLF.len());
                return Err(Error::Protocol(format!("malformed MSG line '{args}'")));
            }
        };

        let payload_start = line_end + CRLF.len();
        if size > self.max_payload {
            // Only the control line is dropped; the parser resyncs on the
            // next line it recognizes.
            self.buf.advance(payload_start);
            return Err(Error::Protocol(format!(
                "MSG on '{subject}' declares {size} bytes, limit is {}",
                self.max_payload
            )));
        }
        let Some(frame_end) = payload_start
            .checked_add(size)
            .and_then(|end| end.checked_add(CRLF.len()))
        else {
            self.buf.advance(payload_start);
            return Err(Error::Protocol(format!("MSG size {size} out of range")));
        };
        if self.buf.len() < frame_end {
            return Ok(None);
        }

        self.buf.advance(payload_start);
        let payload = self.buf.split_to(size).freeze();
        if !self.buf.starts_with(CRLF) {
            return Err(Error::Protocol("MSG payload not terminated by CRLF".into()));
        }
        self.buf.advance(CRLF.len());

        Ok(Some(ServerOp::Msg {
            subject,
            sid,
            reply_to,
            payload,
        }))
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(CRLF.len()).position(|w| w == CRLF)
}

// ── Client → server ──────────────────────────────────────────────────

/// Options sent in the `CONNECT` handshake.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectOptions {
    pub verbose: bool,
    pub pedantic: bool,
    pub lang: &'static str,
    pub version: &'static str,
    pub protocol: u8,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl ConnectOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            verbose: false,
            pedantic: false,
            lang: "rust",
            version: env!("CARGO_PKG_VERSION"),
            protocol: 1,
            name: name.into(),
            auth_token: None,
        }
    }
}

/// An operation sent to the server.
#[derive(Debug, Clone)]
pub enum ClientOp {
    Connect(ConnectOptions),
    Sub { subject: Subject, sid: u64 },
    Unsub { sid: u64 },
    Pub { subject: Subject, payload: Bytes },
    Ping,
    Pong,
}

impl ClientOp {
    pub fn encode(&self) -> Result<Bytes, Error> {
        let mut out = BytesMut::new();
        match self {
            Self::Connect(options) => {
                let json = serde_json::to_string(options)
                    .map_err(|e| Error::Protocol(format!("cannot encode CONNECT: {e}")))?;
                out.extend_from_slice(b"CONNECT ");
                out.extend_from_slice(json.as_bytes());
            }
            Self::Sub { subject, sid } => {
                out.extend_from_slice(format!("SUB {subject} {sid}").as_bytes());
            }
            Self::Unsub { sid } => {
                out.extend_from_slice(format!("UNSUB {sid}").as_bytes());
            }
            Self::Pub { subject, payload } => {
                out.extend_from_slice(format!("PUB {subject} {}\r\n", payload.len()).as_bytes());
                out.extend_from_slice(payload);
            }
            Self::Ping => out.extend_from_slice(b"PING"),
            Self::Pong => out.extend_from_slice(b"PONG"),
        }
        out.extend_from_slice(CRLF);
        Ok(out.freeze())
    }
}
