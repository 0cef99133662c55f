//! # Gridnet DHT
//!
//! Loosely-consistent overlay for peer discovery and small key-value
//! replication, independent of the task protocol.
//!
//! The overlay tracks two disjoint node tables: the routing table, populated
//! by bootstrap handshakes and announcements and evicted by staleness, and
//! the pinned direct-connection table, whose entries survive routing churn
//! and are proactively reconnected.

pub mod network;
pub mod node_info;
pub mod store;
pub mod transport;

pub use network::{DhtConfig, DhtNetwork};
pub use node_info::{DhtMetadata, DhtNodeInfo};
pub use store::DhtStore;
pub use transport::{DhtConnection, DhtTransport, TcpDhtTransport, TransportEvent};
