// REST boundary: snapshot reads, imperative commands, bus discovery.

pub mod client;
pub mod models;

pub use client::ApiClient;
pub use models::{BusInfo, FaultDto, PlcDto, TagDto, TagReadingDto};
