// eclusa-bus: event-bus transport, wire codec, and REST command client

pub mod codec;
pub mod discovery;
pub mod error;
pub mod http;
pub mod memory;
pub mod protocol;
pub mod rest;
pub mod subject;
pub mod transport;
pub mod websocket;

pub use codec::{BusMessage, Envelope};
pub use error::Error;
pub use http::{HttpConfig, TlsMode};
pub use memory::MemoryBus;
pub use rest::ApiClient;
pub use subject::Subject;
pub use transport::{Inbound, InboundSink, Session, SessionId, Transport, TransportEvent};
pub use websocket::{WebSocketTransport, WsConfig};
