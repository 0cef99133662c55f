//! Peer identity and type definitions.
//!
//! Peers announce their own identifier when joining; the network trusts the
//! identifier for routing purposes and gates the roles a peer may hold on
//! its capability tier and token balance.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::GridError;

/// Unique identifier for a peer, supplied by the peer on join
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role class of a node in the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Worker node submitting compute resources
    Individual,
    /// Regional validator aggregating and routing work within a geography
    RegionalNode,
    /// Top-level validator coordinating across regions
    GlobalNode,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeType::Individual => write!(f, "individual"),
            NodeType::RegionalNode => write!(f, "regional_node"),
            NodeType::GlobalNode => write!(f, "global_node"),
        }
    }
}

impl FromStr for NodeType {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "individual" => Ok(NodeType::Individual),
            "regional_node" => Ok(NodeType::RegionalNode),
            "global_node" => Ok(NodeType::GlobalNode),
            other => Err(GridError::Config(format!("unknown node type: {other}"))),
        }
    }
}

/// Capability rank of a peer, ordered from least to most capable.
///
/// The tier gates which task types a peer may execute and which validator
/// roles it may hold.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum NodeTier {
    Inference,
    Aggregator,
    Training,
    Feedback,
}

impl NodeTier {
    /// Maximum number of concurrent task assignments a node of this tier
    /// will be given
    pub fn task_capacity(&self) -> usize {
        match self {
            NodeTier::Inference => 5,
            NodeTier::Aggregator => 10,
            NodeTier::Training => 15,
            NodeTier::Feedback => 20,
        }
    }

    /// Whether this tier satisfies a GPU requirement
    pub fn has_gpu(&self) -> bool {
        matches!(self, NodeTier::Training | NodeTier::Feedback)
    }
}

impl std::fmt::Display for NodeTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeTier::Inference => write!(f, "inference"),
            NodeTier::Aggregator => write!(f, "aggregator"),
            NodeTier::Training => write!(f, "training"),
            NodeTier::Feedback => write!(f, "feedback"),
        }
    }
}

impl FromStr for NodeTier {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inference" => Ok(NodeTier::Inference),
            "aggregator" => Ok(NodeTier::Aggregator),
            "training" => Ok(NodeTier::Training),
            "feedback" => Ok(NodeTier::Feedback),
            other => Err(GridError::Config(format!("unknown node tier: {other}"))),
        }
    }
}

/// Identity of a peer, fixed at join time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Peer-supplied identifier
    pub peer_id: PeerId,

    /// Role class
    pub node_type: NodeType,

    /// Capability tier
    pub node_tier: NodeTier,

    /// Geographic region the peer belongs to
    pub region: String,

    /// Token balance backing validator eligibility
    pub token_balance: f64,
}

impl PeerInfo {
    pub fn new(
        peer_id: impl Into<PeerId>,
        node_type: NodeType,
        node_tier: NodeTier,
        region: impl Into<String>,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            node_type,
            node_tier,
            region: region.into(),
            token_balance: 0.0,
        }
    }

    pub fn with_token_balance(mut self, balance: f64) -> Self {
        self.token_balance = balance;
        self
    }

    /// Whether this peer may act as a validator (non-individual)
    pub fn is_validator(&self) -> bool {
        self.node_type != NodeType::Individual
    }
}

/// Mutable live status of a peer, refreshed on every status/heartbeat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerStatus {
    /// Whether the peer's connection is considered live
    pub online: bool,

    /// CPU load gauge (0-100)
    pub cpu: f64,

    /// Memory usage gauge (0-100)
    pub memory: f64,

    /// Available storage in megabytes
    pub storage: f64,

    /// Available bandwidth in Mbps
    pub bandwidth: f64,

    /// Total rewards earned so far
    pub earnings: f64,

    /// Number of tasks currently assigned
    pub active_tasks: u32,

    /// Number of tasks completed
    pub completed_tasks: u32,

    /// Unix timestamp of the last status update
    pub last_update: i64,
}

impl PeerStatus {
    pub fn online_now() -> Self {
        Self {
            online: true,
            cpu: 0.0,
            memory: 0.0,
            storage: 0.0,
            bandwidth: 0.0,
            earnings: 0.0,
            active_tasks: 0,
            completed_tasks: 0,
            last_update: chrono::Utc::now().timestamp(),
        }
    }

    /// Refresh the last-update stamp to now
    pub fn touch(&mut self) {
        self.last_update = chrono::Utc::now().timestamp();
    }

    /// Average of cpu and memory load, used as a utilization signal
    pub fn resource_utilization(&self) -> f64 {
        (self.cpu + self.memory) / 2.0
    }
}

impl Default for PeerStatus {
    fn default() -> Self {
        Self::online_now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(NodeTier::Inference < NodeTier::Aggregator);
        assert!(NodeTier::Aggregator < NodeTier::Training);
        assert!(NodeTier::Training < NodeTier::Feedback);
    }

    #[test]
    fn test_tier_task_capacity() {
        assert_eq!(NodeTier::Inference.task_capacity(), 5);
        assert_eq!(NodeTier::Aggregator.task_capacity(), 10);
        assert_eq!(NodeTier::Training.task_capacity(), 15);
        assert_eq!(NodeTier::Feedback.task_capacity(), 20);
    }

    #[test]
    fn test_gpu_tiers() {
        assert!(!NodeTier::Inference.has_gpu());
        assert!(!NodeTier::Aggregator.has_gpu());
        assert!(NodeTier::Training.has_gpu());
        assert!(NodeTier::Feedback.has_gpu());
    }

    #[test]
    fn test_node_type_parse() {
        assert_eq!(
            "regional_node".parse::<NodeType>().unwrap(),
            NodeType::RegionalNode
        );
        assert!("mystery".parse::<NodeType>().is_err());
    }

    #[test]
    fn test_peer_info_builder() {
        let info = PeerInfo::new("peer-1", NodeType::RegionalNode, NodeTier::Aggregator, "eu-west")
            .with_token_balance(1500.0);
        assert_eq!(info.token_balance, 1500.0);
        assert!(info.is_validator());
    }

    #[test]
    fn test_serde_tags() {
        let json = serde_json::to_string(&NodeType::GlobalNode).unwrap();
        assert_eq!(json, "\"global_node\"");
        let json = serde_json::to_string(&NodeTier::Inference).unwrap();
        assert_eq!(json, "\"inference\"");
    }
}
