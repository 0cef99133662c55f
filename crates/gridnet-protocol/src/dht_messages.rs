//! DHT message namespace.
//!
//! The DHT speaks its own message family over the same line-delimited JSON
//! transport. Every request carries an explicit `request_id`; the matching
//! response echoes it, so several requests may be in flight on one
//! connection at once.

use serde::{Deserialize, Serialize};

use crate::messages::now_ts;

/// Descriptor of a DHT node, exchanged in handshakes and peer lists
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhtNodeDescriptor {
    /// Node identifier (the owning peer's id)
    pub id: String,

    /// Dialable address, `host:port`
    pub address: String,

    /// Free-form metadata used for peer filtering
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Filter applied to peer discovery queries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerQueryFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_tokens: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_tier: Option<String>,
}

/// All DHT messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DhtMessage {
    #[serde(rename = "findNode")]
    FindNode {
        request_id: u64,
        target: String,
        timestamp: i64,
    },

    #[serde(rename = "findNodeResponse")]
    FindNodeResponse {
        request_id: u64,
        node: Option<DhtNodeDescriptor>,
        timestamp: i64,
    },

    #[serde(rename = "findValue")]
    FindValue {
        request_id: u64,
        key: String,
        timestamp: i64,
    },

    #[serde(rename = "findValueResponse")]
    FindValueResponse {
        request_id: u64,
        value: Option<serde_json::Value>,
        timestamp: i64,
    },

    #[serde(rename = "store")]
    Store {
        request_id: u64,
        key: String,
        value: serde_json::Value,
        timestamp: i64,
    },

    #[serde(rename = "storeResponse")]
    StoreResponse {
        request_id: u64,
        stored: bool,
        timestamp: i64,
    },

    #[serde(rename = "getPeers")]
    GetPeers {
        request_id: u64,
        filter: Option<PeerQueryFilter>,
        timestamp: i64,
    },

    #[serde(rename = "getPeersResponse")]
    GetPeersResponse {
        request_id: u64,
        peers: Vec<DhtNodeDescriptor>,
        timestamp: i64,
    },

    #[serde(rename = "announce")]
    Announce {
        request_id: u64,
        node: DhtNodeDescriptor,
        timestamp: i64,
    },

    #[serde(rename = "announceAck")]
    AnnounceAck {
        request_id: u64,
        timestamp: i64,
    },

    #[serde(rename = "info_request")]
    InfoRequest {
        request_id: u64,
        timestamp: i64,
    },

    #[serde(rename = "info_response")]
    InfoResponse {
        request_id: u64,
        node: DhtNodeDescriptor,
        timestamp: i64,
    },

    #[serde(rename = "direct_connect")]
    DirectConnect {
        request_id: u64,
        node: DhtNodeDescriptor,
        timestamp: i64,
    },

    #[serde(rename = "direct_connect_ack")]
    DirectConnectAck {
        request_id: u64,
        accepted: bool,
        timestamp: i64,
    },

    /// Departure notice, fire-and-forget
    #[serde(rename = "leave")]
    Leave {
        node_id: String,
        timestamp: i64,
    },
}

impl DhtMessage {
    /// The request id this message carries, if any
    pub fn request_id(&self) -> Option<u64> {
        match self {
            DhtMessage::FindNode { request_id, .. }
            | DhtMessage::FindNodeResponse { request_id, .. }
            | DhtMessage::FindValue { request_id, .. }
            | DhtMessage::FindValueResponse { request_id, .. }
            | DhtMessage::Store { request_id, .. }
            | DhtMessage::StoreResponse { request_id, .. }
            | DhtMessage::GetPeers { request_id, .. }
            | DhtMessage::GetPeersResponse { request_id, .. }
            | DhtMessage::Announce { request_id, .. }
            | DhtMessage::AnnounceAck { request_id, .. }
            | DhtMessage::InfoRequest { request_id, .. }
            | DhtMessage::InfoResponse { request_id, .. }
            | DhtMessage::DirectConnect { request_id, .. }
            | DhtMessage::DirectConnectAck { request_id, .. } => Some(*request_id),
            DhtMessage::Leave { .. } => None,
        }
    }

    /// Whether this message answers an outstanding request
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            DhtMessage::FindNodeResponse { .. }
                | DhtMessage::FindValueResponse { .. }
                | DhtMessage::StoreResponse { .. }
                | DhtMessage::GetPeersResponse { .. }
                | DhtMessage::AnnounceAck { .. }
                | DhtMessage::InfoResponse { .. }
                | DhtMessage::DirectConnectAck { .. }
        )
    }

    pub fn find_node(request_id: u64, target: impl Into<String>) -> Self {
        DhtMessage::FindNode {
            request_id,
            target: target.into(),
            timestamp: now_ts(),
        }
    }

    pub fn find_value(request_id: u64, key: impl Into<String>) -> Self {
        DhtMessage::FindValue {
            request_id,
            key: key.into(),
            timestamp: now_ts(),
        }
    }

    pub fn store(request_id: u64, key: impl Into<String>, value: serde_json::Value) -> Self {
        DhtMessage::Store {
            request_id,
            key: key.into(),
            value,
            timestamp: now_ts(),
        }
    }

    pub fn get_peers(request_id: u64, filter: Option<PeerQueryFilter>) -> Self {
        DhtMessage::GetPeers {
            request_id,
            filter,
            timestamp: now_ts(),
        }
    }

    pub fn info_request(request_id: u64) -> Self {
        DhtMessage::InfoRequest {
            request_id,
            timestamp: now_ts(),
        }
    }

    pub fn leave(node_id: impl Into<String>) -> Self {
        DhtMessage::Leave {
            node_id: node_id.into(),
            timestamp: now_ts(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        let msg = DhtMessage::find_node(7, "node-9");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"findNode\""));

        let msg = DhtMessage::info_request(1);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"info_request\""));
    }

    #[test]
    fn test_request_id_correlation() {
        let req = DhtMessage::find_value(42, "announcement:node-1");
        assert_eq!(req.request_id(), Some(42));
        assert!(!req.is_response());

        let resp = DhtMessage::FindValueResponse {
            request_id: 42,
            value: None,
            timestamp: now_ts(),
        };
        assert_eq!(resp.request_id(), Some(42));
        assert!(resp.is_response());

        assert_eq!(DhtMessage::leave("node-1").request_id(), None);
    }

    #[test]
    fn test_filter_omits_empty_fields() {
        let filter = PeerQueryFilter {
            region: Some("eu-west".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&filter).unwrap();
        assert!(json.contains("region"));
        assert!(!json.contains("min_tokens"));
    }
}
