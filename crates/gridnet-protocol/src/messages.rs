//! Signaling message definitions.
//!
//! Every message is a tagged JSON object: the `type` field selects the
//! variant and each variant carries exactly the fields that type needs,
//! plus a `timestamp`.

use serde::{Deserialize, Serialize};

// Re-export core types for convenience
pub use gridnet_core::{
    FailoverRecord, GlobalNodeHealth, NodeTier, NodeType, PeerId, PeerInfo, PeerStatus, Region,
    Task, TaskId,
};

/// Current wall-clock timestamp in milliseconds, stamped on every message
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// All signaling messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    // ─────────────────────────────────────────────────────────────────────
    // Connection Messages
    // ─────────────────────────────────────────────────────────────────────
    /// Join handshake from a connecting peer
    Join(JoinMessage),

    /// Graceful departure
    Leave(LeaveMessage),

    /// Notice to same-region peers that a peer joined
    PeerJoined(PeerJoinedMessage),

    /// Notice to same-region peers that a peer left
    PeerLeft(PeerLeftMessage),

    /// Status/heartbeat update from a peer
    NodeStatus(NodeStatusMessage),

    /// Full network-state snapshot sent to a newly joined peer
    NetworkState(NetworkStateMessage),

    /// Liveness probe
    Ping(PingMessage),

    /// Liveness probe response
    Pong(PongMessage),

    /// Structured error response
    Error(ErrorMessage),

    // ─────────────────────────────────────────────────────────────────────
    // Task Lifecycle Messages
    // ─────────────────────────────────────────────────────────────────────
    /// New task submitted by a global validator
    TaskBroadcast(TaskBroadcastMessage),

    /// Assignment pushed to an individual node
    TaskAssignment(TaskAssignmentMessage),

    /// Node accepted its assignment
    TaskAccepted(TaskAcceptedMessage),

    /// Node reported completion
    TaskCompleted(TaskCompletedMessage),

    /// Task failed (reported by a node, or emitted by the engine)
    TaskFailed(TaskFailedMessage),

    /// Progress report from an executing node
    TaskProgress(TaskProgressMessage),

    /// Reward payout notice
    RewardDistribution(RewardDistributionMessage),

    // ─────────────────────────────────────────────────────────────────────
    // Coordination Messages
    // ─────────────────────────────────────────────────────────────────────
    /// Health record broadcast among global validators
    GlobalNodeHealth(GlobalNodeHealthMessage),

    /// Task handed to a new global validator during failover
    TaskReassignment(TaskReassignmentMessage),

    /// Periodic state snapshot pushed between global validators
    SyncRequest(SyncRequestMessage),

    /// Task payload re-pushed to a backup validator
    TaskBackup(TaskBackupMessage),

    /// Task restored from a backup copy
    TaskRecovery(TaskRecoveryMessage),

    /// Completed failover announcement
    GlobalNodeFailover(GlobalNodeFailoverMessage),
}

impl Message {
    /// The wire name of this message's type
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Join(_) => "join",
            Message::Leave(_) => "leave",
            Message::PeerJoined(_) => "peer_joined",
            Message::PeerLeft(_) => "peer_left",
            Message::NodeStatus(_) => "node_status",
            Message::NetworkState(_) => "network_state",
            Message::Ping(_) => "ping",
            Message::Pong(_) => "pong",
            Message::Error(_) => "error",
            Message::TaskBroadcast(_) => "task_broadcast",
            Message::TaskAssignment(_) => "task_assignment",
            Message::TaskAccepted(_) => "task_accepted",
            Message::TaskCompleted(_) => "task_completed",
            Message::TaskFailed(_) => "task_failed",
            Message::TaskProgress(_) => "task_progress",
            Message::RewardDistribution(_) => "reward_distribution",
            Message::GlobalNodeHealth(_) => "global_node_health",
            Message::TaskReassignment(_) => "task_reassignment",
            Message::SyncRequest(_) => "sync_request",
            Message::TaskBackup(_) => "task_backup",
            Message::TaskRecovery(_) => "task_recovery",
            Message::GlobalNodeFailover(_) => "global_node_failover",
        }
    }

    /// Check if this is a task-lifecycle message subject to sender role checks
    pub fn is_task_message(&self) -> bool {
        matches!(
            self,
            Message::TaskBroadcast(_)
                | Message::TaskAssignment(_)
                | Message::TaskAccepted(_)
                | Message::TaskCompleted(_)
                | Message::TaskFailed(_)
                | Message::TaskProgress(_)
        )
    }

    pub fn error(text: impl Into<String>) -> Self {
        Message::Error(ErrorMessage {
            message: text.into(),
            timestamp: now_ts(),
        })
    }

    pub fn ping() -> Self {
        Message::Ping(PingMessage { timestamp: now_ts() })
    }

    pub fn pong() -> Self {
        Message::Pong(PongMessage { timestamp: now_ts() })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Connection Messages
// ═══════════════════════════════════════════════════════════════════════════

/// Join handshake. Token balance defaults to 0 when omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinMessage {
    pub peer_id: PeerId,
    pub node_type: NodeType,
    pub node_tier: NodeTier,
    pub region: String,
    #[serde(default)]
    pub token_balance: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveMessage {
    pub peer_id: PeerId,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerJoinedMessage {
    pub peer: PeerInfo,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerLeftMessage {
    pub peer_id: PeerId,
    pub region: String,
    pub timestamp: i64,
}

/// Status payload — either the plain status schema or a health-shaped
/// record from a global validator; both normalize into [`PeerStatus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusPayload {
    Health(GlobalNodeHealth),
    Status(PeerStatus),
}

impl StatusPayload {
    /// Normalize into the status schema
    pub fn into_status(self) -> PeerStatus {
        match self {
            StatusPayload::Status(status) => status,
            StatusPayload::Health(health) => {
                let mut status = PeerStatus::online_now();
                status.online =
                    health.status != gridnet_core::HealthStatus::Offline;
                status.cpu = health.metrics.resource_utilization;
                status.memory = health.metrics.resource_utilization;
                status
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatusMessage {
    pub peer_id: PeerId,
    pub status: StatusPayload,
    pub timestamp: i64,
}

/// One peer entry in a network-state snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSnapshot {
    pub info: PeerInfo,
    pub status: PeerStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkStateMessage {
    pub peers: Vec<PeerSnapshot>,
    pub regions: Vec<Region>,
    pub metrics: serde_json::Value,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingMessage {
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongMessage {
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
    pub timestamp: i64,
}

// ═══════════════════════════════════════════════════════════════════════════
// Task Lifecycle Messages
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskBroadcastMessage {
    pub task: Task,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignmentMessage {
    pub task: Task,
    pub reward_per_node: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAcceptedMessage {
    pub task_id: TaskId,
    pub peer_id: PeerId,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompletedMessage {
    pub task_id: TaskId,
    pub peer_id: PeerId,
    pub result: Option<serde_json::Value>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailedMessage {
    pub task_id: TaskId,
    pub peer_id: Option<PeerId>,
    pub reason: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgressMessage {
    pub task_id: TaskId,
    pub peer_id: PeerId,
    /// Progress percentage (0-100)
    pub progress: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardDistributionMessage {
    pub task_id: TaskId,
    pub peer_id: PeerId,
    pub amount: f64,
    pub timestamp: i64,
}

// ═══════════════════════════════════════════════════════════════════════════
// Coordination Messages
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalNodeHealthMessage {
    pub health: GlobalNodeHealth,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReassignmentMessage {
    pub task_id: TaskId,
    pub new_validator: PeerId,
    pub backup_validators: Vec<PeerId>,
    pub timestamp: i64,
}

/// Coordinator state snapshot exchanged between global validators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub tasks: Vec<Task>,
    pub global_validators: Vec<PeerId>,
    pub regional_validators: Vec<PeerId>,
    pub metrics: serde_json::Value,
    /// When the snapshot was assembled (Unix timestamp, ms)
    pub taken_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequestMessage {
    pub snapshot: SyncSnapshot,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskBackupMessage {
    pub task: Task,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecoveryMessage {
    pub task: Task,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalNodeFailoverMessage {
    pub record: FailoverRecord,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridnet_core::HealthStatus;

    #[test]
    fn test_join_tag_and_default_balance() {
        let json = r#"{
            "type": "join",
            "peer_id": "worker-1",
            "node_type": "individual",
            "node_tier": "inference",
            "region": "eu-west",
            "timestamp": 1
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        match msg {
            Message::Join(join) => {
                assert_eq!(join.peer_id.as_str(), "worker-1");
                assert_eq!(join.token_balance, 0.0);
            }
            other => panic!("expected join, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_type_names_roundtrip() {
        let msg = Message::error("bad request");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"error\""));

        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.type_name(), "error");
    }

    #[test]
    fn test_unknown_type_rejected() {
        let json = r#"{"type": "teleport", "timestamp": 1}"#;
        assert!(serde_json::from_str::<Message>(json).is_err());
    }

    #[test]
    fn test_status_payload_plain() {
        let json = r#"{
            "online": true, "cpu": 10.0, "memory": 20.0, "storage": 512.0,
            "bandwidth": 100.0, "earnings": 0.0, "active_tasks": 1,
            "completed_tasks": 2, "last_update": 1
        }"#;
        let payload: StatusPayload = serde_json::from_str(json).unwrap();
        let status = payload.into_status();
        assert!(status.online);
        assert_eq!(status.active_tasks, 1);
    }

    #[test]
    fn test_status_payload_health_shaped() {
        let health = GlobalNodeHealth::new(PeerId::from("global-1"));
        let json = serde_json::to_string(&health).unwrap();
        let payload: StatusPayload = serde_json::from_str(&json).unwrap();
        assert!(matches!(payload, StatusPayload::Health(_)));

        let mut offline = GlobalNodeHealth::new(PeerId::from("global-2"));
        offline.status = HealthStatus::Offline;
        let payload = StatusPayload::Health(offline);
        assert!(!payload.into_status().online);
    }

    #[test]
    fn test_task_message_classification() {
        let task = Task::new(gridnet_core::TaskType::Train, 200.0, "global-1");
        let msg = Message::TaskBroadcast(TaskBroadcastMessage {
            task,
            timestamp: now_ts(),
        });
        assert!(msg.is_task_message());
        assert!(!Message::ping().is_task_message());
    }
}
