//! DHT node descriptors and discovery filters.

use serde::{Deserialize, Serialize};

use gridnet_protocol::dht_messages::{DhtNodeDescriptor, PeerQueryFilter};

/// Free-form metadata attached to a DHT node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DhtMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_tier: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(default)]
    pub token_balance: f64,

    /// Whether this node was pinned as a direct connection
    #[serde(default)]
    pub direct: bool,
}

/// A node known to the DHT overlay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhtNodeInfo {
    pub id: String,

    /// Dialable address, `host:port`
    pub address: String,

    /// Unix timestamp of the last message seen from this node
    pub last_seen: i64,

    pub metadata: DhtMetadata,
}

impl DhtNodeInfo {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            last_seen: chrono::Utc::now().timestamp(),
            metadata: DhtMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: DhtMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Refresh the last-seen stamp to now
    pub fn touch(&mut self) {
        self.last_seen = chrono::Utc::now().timestamp();
    }

    /// Whether the node has not been heard from within the threshold
    pub fn is_stale(&self, threshold_secs: i64) -> bool {
        chrono::Utc::now().timestamp() - self.last_seen > threshold_secs
    }

    /// Apply a discovery filter
    pub fn matches_filter(&self, filter: &PeerQueryFilter) -> bool {
        if let Some(ref node_type) = filter.node_type {
            if self.metadata.node_type.as_deref() != Some(node_type.as_str()) {
                return false;
            }
        }
        if let Some(ref region) = filter.region {
            if self.metadata.region.as_deref() != Some(region.as_str()) {
                return false;
            }
        }
        if let Some(min_tokens) = filter.min_tokens {
            if self.metadata.token_balance < min_tokens {
                return false;
            }
        }
        if let Some(ref node_tier) = filter.node_tier {
            if self.metadata.node_tier.as_deref() != Some(node_tier.as_str()) {
                return false;
            }
        }
        true
    }

    /// Convert to the wire descriptor shape
    pub fn to_descriptor(&self) -> DhtNodeDescriptor {
        DhtNodeDescriptor {
            id: self.id.clone(),
            address: self.address.clone(),
            metadata: serde_json::to_value(&self.metadata).unwrap_or_default(),
        }
    }

    /// Parse from a wire descriptor, tolerating unknown metadata shapes
    pub fn from_descriptor(descriptor: &DhtNodeDescriptor) -> Self {
        let metadata =
            serde_json::from_value(descriptor.metadata.clone()).unwrap_or_default();
        Self {
            id: descriptor.id.clone(),
            address: descriptor.address.clone(),
            last_seen: chrono::Utc::now().timestamp(),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_in(region: &str, tokens: f64) -> DhtNodeInfo {
        DhtNodeInfo::new("node-1", "10.0.0.1:9000").with_metadata(DhtMetadata {
            node_type: Some("regional_node".into()),
            node_tier: Some("aggregator".into()),
            region: Some(region.into()),
            token_balance: tokens,
            direct: false,
        })
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let node = node_in("eu-west", 100.0);
        assert!(node.matches_filter(&PeerQueryFilter::default()));
    }

    #[test]
    fn test_region_filter() {
        let node = node_in("eu-west", 100.0);
        let mut filter = PeerQueryFilter::default();
        filter.region = Some("eu-west".into());
        assert!(node.matches_filter(&filter));

        filter.region = Some("us-east".into());
        assert!(!node.matches_filter(&filter));
    }

    #[test]
    fn test_min_tokens_filter() {
        let node = node_in("eu-west", 100.0);
        let mut filter = PeerQueryFilter::default();
        filter.min_tokens = Some(50.0);
        assert!(node.matches_filter(&filter));

        filter.min_tokens = Some(500.0);
        assert!(!node.matches_filter(&filter));
    }

    #[test]
    fn test_descriptor_roundtrip() {
        let node = node_in("eu-west", 100.0);
        let parsed = DhtNodeInfo::from_descriptor(&node.to_descriptor());
        assert_eq!(parsed.id, node.id);
        assert_eq!(parsed.address, node.address);
        assert_eq!(parsed.metadata.region.as_deref(), Some("eu-west"));
        assert_eq!(parsed.metadata.token_balance, 100.0);
    }

    #[test]
    fn test_descriptor_with_foreign_metadata() {
        let descriptor = DhtNodeDescriptor {
            id: "node-x".into(),
            address: "10.0.0.2:9000".into(),
            metadata: serde_json::json!("not an object"),
        };
        let parsed = DhtNodeInfo::from_descriptor(&descriptor);
        assert_eq!(parsed.metadata.token_balance, 0.0);
    }

    #[test]
    fn test_staleness() {
        let mut node = node_in("eu-west", 0.0);
        assert!(!node.is_stale(60));
        node.last_seen -= 120;
        assert!(node.is_stale(60));
    }
}
