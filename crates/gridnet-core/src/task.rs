//! Task definitions, per-type policies and the lifecycle state machine.
//!
//! Tasks are the unit of work distributed through the network. Each task
//! type carries a fixed policy — the tiers allowed to execute it, the
//! minimum total reward, and the share of the reward reserved for the
//! validators that routed it. A submitted task must declare exactly what
//! its type's policy prescribes or it is rejected.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::peer::{NodeTier, PeerId};

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a new random task ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// The ten task categories handled by the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Inference,
    Embedding,
    Preprocess,
    Aggregate,
    Validate,
    Train,
    FineTune,
    Evaluate,
    Distill,
    Feedback,
}

impl TaskType {
    pub const ALL: [TaskType; 10] = [
        TaskType::Inference,
        TaskType::Embedding,
        TaskType::Preprocess,
        TaskType::Aggregate,
        TaskType::Validate,
        TaskType::Train,
        TaskType::FineTune,
        TaskType::Evaluate,
        TaskType::Distill,
        TaskType::Feedback,
    ];

    /// Fixed policy for this task type. Submitted tasks must match it
    /// exactly; there is no per-task negotiation.
    pub fn policy(&self) -> TaskPolicy {
        use NodeTier::*;
        match self {
            TaskType::Inference => TaskPolicy::new(&[Inference, Aggregator, Training, Feedback], 10.0, 5.0),
            TaskType::Embedding => TaskPolicy::new(&[Inference, Aggregator, Training, Feedback], 10.0, 5.0),
            TaskType::Preprocess => TaskPolicy::new(&[Inference, Aggregator, Training, Feedback], 20.0, 5.0),
            TaskType::Aggregate => TaskPolicy::new(&[Aggregator, Training, Feedback], 50.0, 10.0),
            TaskType::Validate => TaskPolicy::new(&[Aggregator, Training, Feedback], 40.0, 10.0),
            TaskType::Train => TaskPolicy::new(&[Aggregator, Training, Feedback], 100.0, 10.0),
            TaskType::FineTune => TaskPolicy::new(&[Training, Feedback], 150.0, 15.0),
            TaskType::Evaluate => TaskPolicy::new(&[Training, Feedback], 80.0, 10.0),
            TaskType::Distill => TaskPolicy::new(&[Training, Feedback], 120.0, 15.0),
            TaskType::Feedback => TaskPolicy::new(&[Feedback], 60.0, 20.0),
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskType::Inference => "inference",
            TaskType::Embedding => "embedding",
            TaskType::Preprocess => "preprocess",
            TaskType::Aggregate => "aggregate",
            TaskType::Validate => "validate",
            TaskType::Train => "train",
            TaskType::FineTune => "fine_tune",
            TaskType::Evaluate => "evaluate",
            TaskType::Distill => "distill",
            TaskType::Feedback => "feedback",
        };
        write!(f, "{s}")
    }
}

/// Fixed per-type policy: who may run it and how the reward is split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPolicy {
    /// Tiers allowed to execute this task type
    pub allowed_tiers: Vec<NodeTier>,

    /// Minimum total reward a task of this type may declare
    pub min_reward: f64,

    /// Percentage of the total reward reserved for validators
    pub validator_share: f64,
}

impl TaskPolicy {
    fn new(tiers: &[NodeTier], min_reward: f64, validator_share: f64) -> Self {
        Self {
            allowed_tiers: tiers.to_vec(),
            min_reward,
            validator_share,
        }
    }
}

/// Execution requirements declared on a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequirements {
    /// Tier set allowed to execute — must equal the type policy exactly
    pub tiers: Vec<NodeTier>,

    /// Minimum available storage in megabytes, if any
    pub min_storage: Option<f64>,

    /// Minimum available memory gauge headroom, if any
    pub min_memory: Option<f64>,

    /// Whether the task needs a GPU-capable tier
    pub gpu: bool,

    /// Scheduling priority (higher runs first)
    pub priority: u8,

    /// Expected execution duration in milliseconds
    pub estimated_duration: u64,

    /// Maximum number of nodes to assign
    pub max_nodes: usize,

    /// Redundancy factor requested by the submitter
    pub redundancy: u8,
}

impl TaskRequirements {
    /// Requirements matching a type's policy, with defaults for the rest
    pub fn for_type(task_type: TaskType) -> Self {
        Self {
            tiers: task_type.policy().allowed_tiers,
            min_storage: None,
            min_memory: None,
            gpu: false,
            priority: 1,
            estimated_duration: 60_000,
            max_nodes: 4,
            redundancy: 1,
        }
    }

    pub fn with_duration(mut self, ms: u64) -> Self {
        self.estimated_duration = ms;
        self
    }

    pub fn with_max_nodes(mut self, n: usize) -> Self {
        self.max_nodes = n;
        self
    }

    pub fn with_gpu(mut self) -> Self {
        self.gpu = true;
        self
    }
}

/// Reward terms declared on a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReward {
    /// Total reward pool
    pub total: f64,

    /// Reward per assigned node, computed at distribution time
    pub per_node: f64,

    /// Percentage of the total reserved for validators — must equal the
    /// type policy exactly
    pub validator_share: f64,

    /// Multiplier applied to the overrun ratio when a node finishes late
    pub penalty_rate: f64,

    /// Unix timestamp after which the reward offer lapses
    pub deadline: i64,
}

impl TaskReward {
    /// Reward terms matching a type's policy
    pub fn for_type(task_type: TaskType, total: f64) -> Self {
        Self {
            total,
            per_node: 0.0,
            validator_share: task_type.policy().validator_share,
            penalty_rate: 1.0,
            deadline: chrono::Utc::now().timestamp() + 3600,
        }
    }

    /// The slice of the total reserved for validators
    pub fn validator_pool(&self) -> f64 {
        self.total * self.validator_share / 100.0
    }

    /// The slice of the total distributed to worker nodes
    pub fn node_pool(&self) -> f64 {
        self.total - self.validator_pool()
    }
}

/// Lifecycle state of a task.
///
/// `Pending → Assigned → Accepted → Processing → {Completed | Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Assigned,
    Accepted,
    Processing,
    Completed,
    Failed,
}

impl TaskState {
    /// Check if the task has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Assigned => "assigned",
            TaskState::Accepted => "accepted",
            TaskState::Processing => "processing",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A task in the distribution engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,

    /// Task category
    pub task_type: TaskType,

    /// Execution requirements
    pub requirements: TaskRequirements,

    /// Reward terms
    pub reward: TaskReward,

    /// Current lifecycle state
    pub state: TaskState,

    /// Nodes the task was assigned to
    pub assigned_nodes: Vec<PeerId>,

    /// Nodes that accepted the assignment
    pub accepted_nodes: Vec<PeerId>,

    /// Nodes that reported completion
    pub completed_nodes: Vec<PeerId>,

    /// Regional validators that touched the task during distribution
    pub regional_validators: Vec<PeerId>,

    /// Aggregate progress (0-100)
    pub progress: f64,

    /// Originating global validator
    pub submitter: PeerId,

    /// Global validator currently responsible, set during failover
    pub global_validator: Option<PeerId>,

    /// Standby validators holding backup copies
    pub backup_validators: Vec<PeerId>,

    /// When the task was created (Unix timestamp)
    pub created_at: i64,

    /// When the first node accepted (Unix timestamp, ms)
    pub start_time: Option<i64>,

    /// When the task finalized (Unix timestamp, ms)
    pub completion_time: Option<i64>,

    /// Failure reason, if failed
    pub error: Option<String>,

    /// Aggregated result payload, if completed
    pub result: Option<serde_json::Value>,

    /// Last mutation stamp, used for sync reconciliation (Unix timestamp, ms)
    pub updated_at: i64,
}

impl Task {
    /// Create a new pending task with policy-conformant defaults
    pub fn new(task_type: TaskType, total_reward: f64, submitter: impl Into<PeerId>) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: TaskId::new(),
            task_type,
            requirements: TaskRequirements::for_type(task_type),
            reward: TaskReward::for_type(task_type, total_reward),
            state: TaskState::Pending,
            assigned_nodes: Vec::new(),
            accepted_nodes: Vec::new(),
            completed_nodes: Vec::new(),
            regional_validators: Vec::new(),
            progress: 0.0,
            submitter: submitter.into(),
            global_validator: None,
            backup_validators: Vec::new(),
            created_at: now.timestamp(),
            start_time: None,
            completion_time: None,
            error: None,
            result: None,
            updated_at: now.timestamp_millis(),
        }
    }

    pub fn with_requirements(mut self, requirements: TaskRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn with_penalty_rate(mut self, rate: f64) -> Self {
        self.reward.penalty_rate = rate;
        self
    }

    /// Stamp a mutation for sync reconciliation
    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// Reset lifecycle fields for resubmission after a failure
    pub fn reset_for_retry(&mut self) {
        self.state = TaskState::Pending;
        self.assigned_nodes.clear();
        self.accepted_nodes.clear();
        self.completed_nodes.clear();
        self.regional_validators.clear();
        self.progress = 0.0;
        self.start_time = None;
        self.completion_time = None;
        self.error = None;
        self.result = None;
        self.touch();
    }
}
