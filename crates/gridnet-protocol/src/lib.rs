//! # Gridnet Protocol
//!
//! Wire protocol for the Gridnet tiered compute network.
//!
//! This crate provides:
//! - Signaling message definitions (join/leave, status, task lifecycle,
//!   health, failover, sync)
//! - The parallel DHT message namespace with explicit request correlation
//! - A line-delimited JSON codec for async networking
//!
//! All messages are JSON objects carrying a `type` discriminator and a
//! `timestamp`; each type has exactly the fields it needs.

pub mod codec;
pub mod dht_messages;
pub mod messages;

pub use codec::{JsonCodec, MAX_MESSAGE_SIZE};
pub use dht_messages::DhtMessage;
pub use messages::Message;

/// Current protocol version, exchanged in join handshakes
pub const PROTOCOL_VERSION: u8 = 1;
