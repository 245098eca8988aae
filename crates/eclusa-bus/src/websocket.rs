//! WebSocket transport speaking the NATS text protocol.
//!
//! Opens one WebSocket to the bus, performs the `INFO`/`CONNECT`/`PING`
//! handshake, then runs a background task that multiplexes subject
//! subscriptions over that socket and forwards every `MSG` into the
//! engine's inbound channel. Reconnection is deliberately not handled
//! here: the session reports `Closed` and the engine decides what to do.
//!
//! # Example
//!
//! ```rust,ignore
//! use eclusa_bus::websocket::{WebSocketTransport, WsConfig};
//! use eclusa_bus::{InboundSink, SessionId, Subject, Transport};
//! use url::Url;
//!
//! let transport = WebSocketTransport::new(WsConfig::new(Url::parse("ws://10.0.0.5:9222")?));
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let session = transport.connect(InboundSink::new(SessionId::new(1), tx)).await?;
//! session.subscribe(&Subject::new("eclusa.falhas")?)?;
//!
//! while let Some(inbound) = rx.recv().await {
//!     println!("{inbound:?}");
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::codec::Envelope;
use crate::error::Error;
use crate::protocol::{ClientOp, ConnectOptions, ProtocolParser, ServerInfo, ServerOp};
use crate::subject::Subject;
use crate::transport::{InboundSink, Session, Transport};

// ── WsConfig ─────────────────────────────────────────────────────────

/// Connection settings for [`WebSocketTransport`].
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Bus endpoint, e.g. `wss://scada.local:9222`.
    pub url: Url,

    /// Sent as `auth_token` in `CONNECT`.
    pub token: Option<SecretString>,

    /// Client name reported to the server.
    pub client_name: String,

    /// How often the client pings the server. Default: 30s.
    pub ping_interval: Duration,

    /// Unanswered pings tolerated before the session is declared dead.
    /// Default: 2.
    pub max_pings_outstanding: u32,
}

impl WsConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            token: None,
            client_name: "eclusa-console".into(),
            ping_interval: Duration::from_secs(30),
            max_pings_outstanding: 2,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }
}

// ── WebSocketTransport ───────────────────────────────────────────────

/// [`Transport`] implementation over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    config: WsConfig,
}

impl WebSocketTransport {
    pub fn new(config: WsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WsConfig {
        &self.config
    }

    async fn open(&self, sink: InboundSink) -> Result<Box<dyn Session>, Error> {
        let url = &self.config.url;
        tracing::info!(url = %url, session = %sink.session(), "connecting to event bus");

        let uri: tungstenite::http::Uri = url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::Connect(e.to_string()))?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(ClientRequestBuilder::new(uri))
            .await
            .map_err(|e| Error::Connect(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();
        let mut parser = ProtocolParser::new();

        let info = handshake(&mut write, &mut read, &mut parser, &self.config).await?;
        tracing::info!(
            server_id = %info.server_id,
            version = %info.version,
            "event bus connected"
        );

        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = SessionTask {
            parser,
            ops_rx,
            sink,
            cancel: cancel.clone(),
            ping_interval: self.config.ping_interval,
            max_pings_outstanding: self.config.max_pings_outstanding,
        };
        tokio::spawn(task.run(write, read));

        Ok(Box::new(WsSession {
            ops: ops_tx,
            sids: Mutex::new(HashMap::new()),
            next_sid: AtomicU64::new(1),
            cancel,
        }))
    }
}

impl Transport for WebSocketTransport {
    fn connect(&self, sink: InboundSink) -> BoxFuture<'_, Result<Box<dyn Session>, Error>> {
        Box::pin(self.open(sink))
    }

    fn describe(&self) -> String {
        self.config.url.to_string()
    }
}

// ── Handshake ────────────────────────────────────────────────────────

/// `INFO` ← server, `CONNECT` + `PING` → server, wait for `PONG`.
async fn handshake<W, R>(
    write: &mut W,
    read: &mut R,
    parser: &mut ProtocolParser,
    config: &WsConfig,
) -> Result<ServerInfo, Error>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let info = match next_server_op(read, parser).await? {
        ServerOp::Info(info) => info,
        other => {
            return Err(Error::Connect(format!(
                "expected INFO from server, got {other:?}"
            )));
        }
    };

    if let Some(limit) = info.max_payload {
        parser.set_max_payload(limit);
    }

    if info.auth_required && config.token.is_none() {
        tracing::warn!("event bus requires authentication but no token is configured");
    }

    let mut options = ConnectOptions::new(config.client_name.clone());
    options.auth_token = config
        .token
        .as_ref()
        .map(|t| t.expose_secret().to_owned());

    send_op(write, &ClientOp::Connect(options))
        .await
        .map_err(|e| Error::Connect(e.to_string()))?;
    send_op(write, &ClientOp::Ping)
        .await
        .map_err(|e| Error::Connect(e.to_string()))?;

    loop {
        match next_server_op(read, parser).await? {
            ServerOp::Pong => return Ok(info),
            ServerOp::Err(message) => return Err(Error::Connect(message)),
            ServerOp::Ping => {
                send_op(write, &ClientOp::Pong)
                    .await
                    .map_err(|e| Error::Connect(e.to_string()))?;
            }
            op => tracing::trace!(?op, "ignoring operation during handshake"),
        }
    }
}

/// Read frames until the parser yields one complete operation.
async fn next_server_op<R>(read: &mut R, parser: &mut ProtocolParser) -> Result<ServerOp, Error>
where
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        if let Some(op) = parser.next_op()? {
            return Ok(op);
        }

        match read.next().await {
            Some(Ok(Message::Binary(data))) => parser.feed(&data),
            Some(Ok(Message::Text(text))) => parser.feed(text.as_bytes()),
            Some(Ok(Message::Close(_))) | None => {
                return Err(Error::Closed {
                    reason: "connection closed during handshake".into(),
                });
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(Error::Connect(e.to_string())),
        }
    }
}

async fn send_op<W>(write: &mut W, op: &ClientOp) -> Result<(), Error>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let frame = op.encode()?;
    write
        .send(Message::Binary(frame))
        .await
        .map_err(|e| Error::Closed {
            reason: e.to_string(),
        })
}

// ── Background session task ──────────────────────────────────────────

struct SessionTask {
    parser: ProtocolParser,
    ops_rx: mpsc::UnboundedReceiver<ClientOp>,
    sink: InboundSink,
    cancel: CancellationToken,
    ping_interval: Duration,
    max_pings_outstanding: u32,
}

impl SessionTask {
    /// Pump outbound operations and inbound frames until the socket dies or
    /// the session is closed locally.
    async fn run<W, R>(mut self, mut write: W, mut read: R)
    where
        W: Sink<Message, Error = tungstenite::Error> + Unpin,
        R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        let mut ping = tokio::time::interval(self.ping_interval);
        ping.tick().await;
        let mut pings_outstanding: u32 = 0;

        let lost: Option<String> = loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    break None;
                }
                op = self.ops_rx.recv() => {
                    let Some(op) = op else { break None };
                    if let Err(e) = send_op(&mut write, &op).await {
                        break Some(e.to_string());
                    }
                }
                _ = ping.tick() => {
                    if pings_outstanding >= self.max_pings_outstanding {
                        break Some(format!("no PONG after {pings_outstanding} pings"));
                    }
                    pings_outstanding += 1;
                    if let Err(e) = send_op(&mut write, &ClientOp::Ping).await {
                        break Some(e.to_string());
                    }
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Binary(data))) => self.parser.feed(&data),
                        Some(Ok(Message::Text(text))) => self.parser.feed(text.as_bytes()),
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame.map_or_else(
                                || "close frame received".to_owned(),
                                |cf| format!("close frame {}: {}", cf.code, cf.reason),
                            );
                            break Some(reason);
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => break Some(e.to_string()),
                        None => break Some("stream ended".into()),
                    }
                    if let Err(e) = self.drain(&mut write, &mut pings_outstanding).await {
                        break Some(e.to_string());
                    }
                }
            }
        };

        match lost {
            Some(reason) => {
                tracing::warn!(session = %self.sink.session(), %reason, "event bus session lost");
                self.sink.closed(reason);
            }
            None => tracing::debug!(session = %self.sink.session(), "event bus session closed"),
        }
    }

    /// Handle every complete operation currently buffered.
    async fn drain<W>(&mut self, write: &mut W, pings_outstanding: &mut u32) -> Result<(), Error>
    where
        W: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        loop {
            let op = match self.parser.next_op() {
                Ok(Some(op)) => op,
                Ok(None) => return Ok(()),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed protocol frame");
                    continue;
                }
            };

            match op {
                ServerOp::Msg {
                    subject, payload, ..
                } => {
                    if !self.sink.deliver(Envelope::new(subject, payload)) {
                        return Err(Error::Closed {
                            reason: "engine dropped the inbound channel".into(),
                        });
                    }
                }
                ServerOp::Ping => send_op(write, &ClientOp::Pong).await?,
                ServerOp::Pong => *pings_outstanding = 0,
                ServerOp::Ok => {}
                ServerOp::Info(info) => {
                    tracing::debug!(server_id = %info.server_id, "INFO update");
                    if let Some(limit) = info.max_payload {
                        self.parser.set_max_payload(limit);
                    }
                }
                ServerOp::Err(message) => {
                    tracing::warn!(%message, "event bus reported an error");
                }
            }
        }
    }
}

// ── WsSession ────────────────────────────────────────────────────────

/// Handle to a running WebSocket session.
///
/// Subject operations are queued to the background task, so every method
/// returns without waiting on the network.
struct WsSession {
    ops: mpsc::UnboundedSender<ClientOp>,
    sids: Mutex<HashMap<Subject, u64>>,
    next_sid: AtomicU64,
    cancel: CancellationToken,
}

impl WsSession {
    fn queue(&self, op: ClientOp) -> Result<(), Error> {
        self.ops.send(op).map_err(|_| Error::NotConnected)
    }
}

impl Session for WsSession {
    fn subscribe(&self, subject: &Subject) -> Result<(), Error> {
        let mut sids = self.sids.lock();
        if sids.contains_key(subject) {
            return Ok(());
        }
        let sid = self.next_sid.fetch_add(1, Ordering::Relaxed);
        self.queue(ClientOp::Sub {
            subject: subject.clone(),
            sid,
        })?;
        sids.insert(subject.clone(), sid);
        tracing::debug!(%subject, sid, "SUB queued");
        Ok(())
    }

    fn unsubscribe(&self, subject: &Subject) -> Result<(), Error> {
        let Some(sid) = self.sids.lock().remove(subject) else {
            return Ok(());
        };
        tracing::debug!(%subject, sid, "UNSUB queued");
        self.queue(ClientOp::Unsub { sid })
    }

    fn publish(&self, envelope: Envelope) -> Result<(), Error> {
        self.queue(ClientOp::Pub {
            subject: envelope.subject,
            payload: envelope.payload,
        })
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn frames(chunks: &[&'static [u8]]) -> impl Stream<Item = Result<Message, tungstenite::Error>> + Unpin {
        stream::iter(
            chunks
                .iter()
                .map(|c| Ok(Message::Binary(bytes::Bytes::from_static(c))))
                .collect::<Vec<_>>(),
        )
    }

    fn recording_sink() -> (
        impl Sink<Message, Error = tungstenite::Error> + Unpin,
        mpsc::UnboundedReceiver<Message>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel::<Message>();
        let sink = futures_util::sink::unfold(tx, |tx, msg: Message| async move {
            let _ = tx.send(msg);
            Ok::<_, tungstenite::Error>(tx)
        });
        (Box::pin(sink), rx)
    }

    fn sent_text(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(Message::Binary(data)) = rx.try_recv() {
            out.push(String::from_utf8(data.to_vec()).unwrap());
        }
        out
    }

    #[test]
    fn default_config() {
        let config = WsConfig::new(Url::parse("ws://localhost:9222").unwrap());
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.max_pings_outstanding, 2);
        assert!(config.token.is_none());
    }

    #[tokio::test]
    async fn handshake_sends_connect_and_waits_for_pong() {
        let mut read = frames(&[
            b"INFO {\"server_id\":\"S1\",\"version\":\"2.10\"}\r\n",
            b"+OK\r\nPO",
            b"NG\r\n",
        ]);
        let (mut write, mut sent) = recording_sink();
        let mut parser = ProtocolParser::new();
        let config = WsConfig::new(Url::parse("ws://localhost:9222").unwrap())
            .with_token(SecretString::from("s3cret".to_owned()));

        let info = handshake(&mut write, &mut read, &mut parser, &config)
            .await
            .unwrap();

        assert_eq!(info.server_id, "S1");
        let sent = sent_text(&mut sent);
        assert_eq!(sent.len(), 2);
        assert!(sent[0].starts_with("CONNECT "));
        assert!(sent[0].contains("\"auth_token\":\"s3cret\""));
        assert_eq!(sent[1], "PING\r\n");
    }

    #[tokio::test]
    async fn handshake_surfaces_server_error() {
        let mut read = frames(&[
            b"INFO {\"server_id\":\"S1\"}\r\n",
            b"-ERR 'Authorization Violation'\r\n",
        ]);
        let (mut write, _sent) = recording_sink();
        let mut parser = ProtocolParser::new();
        let config = WsConfig::new(Url::parse("ws://localhost:9222").unwrap());

        let err = handshake(&mut write, &mut read, &mut parser, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connect(ref m) if m.contains("Authorization")));
    }

    #[tokio::test]
    async fn handshake_fails_when_stream_ends() {
        let mut read = frames(&[]);
        let (mut write, _sent) = recording_sink();
        let mut parser = ProtocolParser::new();
        let config = WsConfig::new(Url::parse("ws://localhost:9222").unwrap());

        let err = handshake(&mut write, &mut read, &mut parser, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Closed { .. }));
    }

    #[tokio::test]
    async fn session_task_forwards_messages_and_reports_loss() {
        let read = frames(&[
            b"MSG eclusa.falhas 1 9\r\n{\"id\":5}\r\n",
            b"PING\r\n",
        ]);
        let (write, mut sent) = recording_sink();
        let (tx, mut inbound) = mpsc::unbounded_channel();
        let (_ops_tx, ops_rx) = mpsc::unbounded_channel();

        let task = SessionTask {
            parser: ProtocolParser::new(),
            ops_rx,
            sink: InboundSink::new(crate::SessionId::new(7), tx),
            cancel: CancellationToken::new(),
            ping_interval: Duration::from_secs(3600),
            max_pings_outstanding: 2,
        };
        task.run(write, read).await;

        let first = inbound.recv().await.unwrap();
        let crate::TransportEvent::Message(envelope) = first.event else {
            panic!("expected a message");
        };
        assert_eq!(envelope.subject.as_str(), "eclusa.falhas");
        assert_eq!(&envelope.payload[..], b"{\"id\":5}");

        let second = inbound.recv().await.unwrap();
        assert!(matches!(second.event, crate::TransportEvent::Closed { .. }));

        assert_eq!(sent_text(&mut sent), vec!["PONG\r\n".to_owned()]);
    }

    #[tokio::test]
    async fn session_queues_sub_once_per_subject() {
        let (ops_tx, mut ops_rx) = mpsc::unbounded_channel();
        let session = WsSession {
            ops: ops_tx,
            sids: Mutex::new(HashMap::new()),
            next_sid: AtomicU64::new(1),
            cancel: CancellationToken::new(),
        };
        let subject = Subject::from_static("plc.status.3");

        session.subscribe(&subject).unwrap();
        session.subscribe(&subject).unwrap();
        session.unsubscribe(&subject).unwrap();
        session.unsubscribe(&subject).unwrap();

        assert!(matches!(ops_rx.try_recv(), Ok(ClientOp::Sub { sid: 1, .. })));
        assert!(matches!(ops_rx.try_recv(), Ok(ClientOp::Unsub { sid: 1 })));
        assert!(ops_rx.try_recv().is_err());
    }
}
