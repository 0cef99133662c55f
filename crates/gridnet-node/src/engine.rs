//! Task distribution and reward settlement.
//!
//! The engine owns the task table and the lifecycle state machine:
//! submission validation against per-type policy, distribution to eligible
//! nodes through per-region validator selection, acceptance, completion with
//! overrun penalties, finalization with validator payout splitting, failure
//! paths, retry, and retention-window garbage collection.

use dashmap::{DashMap, DashSet};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use gridnet_core::{
    GridError, NodeType, PeerId, PeerInfo, Result, Task, TaskId, TaskRequirements, TaskState,
};
use gridnet_protocol::messages::{
    now_ts, Message, RewardDistributionMessage, TaskAssignmentMessage, TaskFailedMessage,
};

use crate::registry::PeerRegistry;

/// Engine tuning knobs, environment-sourced by the node config
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Acceptance window before a pending task fails
    pub task_timeout: Duration,
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    pub max_nodes_per_task: usize,
    /// How long terminal tasks linger before the GC purges them
    pub retention: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(120),
            min_duration_ms: 1_000,
            max_duration_ms: 86_400_000,
            max_nodes_per_task: 16,
            retention: Duration::from_secs(3_600),
        }
    }
}

/// Engine lifecycle events
#[derive(Debug, Clone)]
pub enum EngineEvent {
    TaskRegistered(TaskId),
    TaskAssigned { task_id: TaskId, nodes: usize },
    TaskCompleted(TaskId),
    TaskFailed { task_id: TaskId, reason: String },
}

/// Pool slot a registered peer occupies; exactly one per peer
#[derive(Debug, Clone)]
struct PoolSlot {
    node_type: NodeType,
    region: String,
}

/// Per-node rolling counters
#[derive(Debug, Clone, Default)]
pub struct NodeStats {
    pub active: u32,
    pub completed: u32,
    pub failed: u32,
    pub earnings: f64,
    pub total_completion_ms: u64,
}

impl NodeStats {
    /// Completion ratio in percent; an untested node counts as perfect
    pub fn completion_ratio(&self) -> f64 {
        let finished = self.completed + self.failed;
        if finished == 0 {
            100.0
        } else {
            self.completed as f64 / finished as f64 * 100.0
        }
    }

    pub fn average_completion_ms(&self) -> f64 {
        if self.completed == 0 {
            0.0
        } else {
            self.total_completion_ms as f64 / self.completed as f64
        }
    }
}

/// The task distribution and reward engine
pub struct TaskEngine {
    registry: Arc<PeerRegistry>,
    config: EngineConfig,

    tasks: DashMap<TaskId, Task>,

    /// Acceptance-window timers, aborted the moment a task turns terminal
    timeouts: Mutex<HashMap<TaskId, AbortHandle>>,

    /// Per-task reward ledger: peer → owed amount
    ledger: DashMap<TaskId, HashMap<PeerId, f64>>,

    /// Flat pool membership keyed by peer id
    pool: DashMap<PeerId, PoolSlot>,

    /// Pool indexes
    globals: DashSet<PeerId>,
    region_validators: DashMap<String, HashSet<PeerId>>,
    region_individuals: DashMap<String, HashSet<PeerId>>,

    stats: DashMap<PeerId, NodeStats>,

    rewards_distributed: Mutex<f64>,

    event_tx: broadcast::Sender<EngineEvent>,
    shutdown_tx: broadcast::Sender<()>,
}

impl TaskEngine {
    pub fn new(registry: Arc<PeerRegistry>, config: EngineConfig) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(256);
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            registry,
            config,
            tasks: DashMap::new(),
            timeouts: Mutex::new(HashMap::new()),
            ledger: DashMap::new(),
            pool: DashMap::new(),
            globals: DashSet::new(),
            region_validators: DashMap::new(),
            region_individuals: DashMap::new(),
            stats: DashMap::new(),
            rewards_distributed: Mutex::new(0.0),
            event_tx,
            shutdown_tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Registration pools
    // ─────────────────────────────────────────────────────────────────────

    /// Place a peer into the pool matching its role. A peer occupies exactly
    /// one slot; re-registration moves it.
    pub fn register_peer(&self, info: &PeerInfo) {
        self.unregister_peer(&info.peer_id);

        let peer_id = info.peer_id.clone();
        match info.node_type {
            NodeType::GlobalNode => {
                self.globals.insert(peer_id.clone());
            }
            NodeType::RegionalNode => {
                self.region_validators
                    .entry(info.region.clone())
                    .or_default()
                    .insert(peer_id.clone());
            }
            NodeType::Individual => {
                self.region_individuals
                    .entry(info.region.clone())
                    .or_default()
                    .insert(peer_id.clone());
            }
        }
        self.pool.insert(
            peer_id.clone(),
            PoolSlot {
                node_type: info.node_type,
                region: info.region.clone(),
            },
        );
        self.stats.entry(peer_id).or_default();
    }

    /// Remove a peer from whichever pool slot it holds.
    pub fn unregister_peer(&self, peer_id: &PeerId) {
        let Some((_, slot)) = self.pool.remove(peer_id) else {
            return;
        };
        match slot.node_type {
            NodeType::GlobalNode => {
                self.globals.remove(peer_id);
            }
            NodeType::RegionalNode => {
                if let Some(mut members) = self.region_validators.get_mut(&slot.region) {
                    members.remove(peer_id);
                }
            }
            NodeType::Individual => {
                if let Some(mut members) = self.region_individuals.get_mut(&slot.region) {
                    members.remove(peer_id);
                }
            }
        }
    }

    pub fn global_validators(&self) -> Vec<PeerId> {
        self.globals.iter().map(|id| id.key().clone()).collect()
    }

    pub fn regional_validator_ids(&self) -> Vec<PeerId> {
        self.region_validators
            .iter()
            .flat_map(|entry| entry.value().iter().cloned().collect::<Vec<_>>())
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Submission
    // ─────────────────────────────────────────────────────────────────────

    /// Check a task against the fixed policy for its type and the configured
    /// bounds. Rejection keeps the task out of the active table entirely.
    pub fn validate_task_requirements(&self, task: &Task) -> Result<()> {
        let policy = task.task_type.policy();

        let declared: HashSet<_> = task.requirements.tiers.iter().collect();
        let allowed: HashSet<_> = policy.allowed_tiers.iter().collect();
        if declared != allowed {
            return Err(GridError::TaskPolicy(format!(
                "tier set for {} does not match policy",
                task.task_type
            )));
        }

        if task.reward.total < policy.min_reward {
            return Err(GridError::TaskPolicy(format!(
                "reward {} below the {} minimum of {}",
                task.reward.total, task.task_type, policy.min_reward
            )));
        }

        if task.reward.validator_share != policy.validator_share {
            return Err(GridError::TaskPolicy(format!(
                "validator share {} does not match the {} policy share {}",
                task.reward.validator_share, task.task_type, policy.validator_share
            )));
        }

        let duration = task.requirements.estimated_duration;
        if duration < self.config.min_duration_ms || duration > self.config.max_duration_ms {
            return Err(GridError::TaskPolicy(format!(
                "estimated duration {duration} ms outside configured bounds"
            )));
        }

        let max_nodes = task.requirements.max_nodes;
        if max_nodes == 0 || max_nodes > self.config.max_nodes_per_task {
            return Err(GridError::TaskPolicy(format!(
                "max nodes {max_nodes} outside configured bounds"
            )));
        }

        Ok(())
    }

    /// Register a task and distribute it. The task stays pending until at
    /// least one node is assigned; the acceptance timer starts immediately.
    pub fn broadcast_task(self: &Arc<Self>, mut task: Task) -> Result<TaskId> {
        self.validate_task_requirements(&task)?;

        let task_id = task.id;
        task.state = TaskState::Pending;
        task.touch();
        self.stats.entry(task.submitter.clone()).or_default();
        self.tasks.insert(task_id, task);

        self.arm_timeout(task_id);
        let _ = self.event_tx.send(EngineEvent::TaskRegistered(task_id));
        info!(task_id = %task_id, "Task registered");

        self.dispatch(task_id);
        Ok(task_id)
    }

    /// Resubmit a failed task through the normal distribution path.
    pub fn retry_task(self: &Arc<Self>, task_id: TaskId) -> Result<()> {
        {
            let mut task = self
                .tasks
                .get_mut(&task_id)
                .ok_or_else(|| GridError::TaskNotFound(task_id.to_string()))?;
            if task.state != TaskState::Failed {
                return Err(GridError::InvalidTaskTransition {
                    from: task.state.to_string(),
                    to: TaskState::Pending.to_string(),
                });
            }
            task.reset_for_retry();
        }
        self.ledger.remove(&task_id);
        self.arm_timeout(task_id);
        info!(task_id = %task_id, "Task retried");
        self.dispatch(task_id);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Distribution
    // ─────────────────────────────────────────────────────────────────────

    /// For every region with an online regional validator, pick the least
    /// loaded validator and gather that region's eligible individual nodes;
    /// then assign up to `max_nodes` of them and push assignments out.
    fn dispatch(self: &Arc<Self>, task_id: TaskId) -> usize {
        let Some(task) = self.tasks.get(&task_id).map(|t| t.clone()) else {
            return 0;
        };

        let mut validators: Vec<PeerId> = Vec::new();
        let mut selected: Vec<(PeerId, String)> = Vec::new();

        let mut regions: Vec<String> = self
            .region_validators
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        regions.sort();

        for region in regions {
            let Some(validator) = self.select_validator(&region) else {
                continue;
            };
            let eligible = self.eligible_nodes(&region, &task.requirements);
            if eligible.is_empty() {
                continue;
            }
            validators.push(validator);
            for node in eligible {
                selected.push((node, region.clone()));
            }
        }

        selected.truncate(task.requirements.max_nodes);
        if selected.is_empty() {
            debug!(task_id = %task_id, "No eligible nodes, task stays pending");
            return 0;
        }

        let reward_per_node = task.reward.node_pool() / selected.len() as f64;

        let snapshot = {
            let Some(mut entry) = self.tasks.get_mut(&task_id) else {
                return 0;
            };
            entry.assigned_nodes = selected.iter().map(|(id, _)| id.clone()).collect();
            validators.dedup();
            entry.regional_validators = validators.clone();
            entry.reward.per_node = reward_per_node;
            entry.state = TaskState::Assigned;
            entry.touch();
            entry.clone()
        };

        for validator in &validators {
            self.stats.entry(validator.clone()).or_default().active += 1;
        }

        for (node, _) in &selected {
            self.stats.entry(node.clone()).or_default().active += 1;
            self.registry.add_active_task(node);
            let assignment = Message::TaskAssignment(TaskAssignmentMessage {
                task: snapshot.clone(),
                reward_per_node,
                timestamp: now_ts(),
            });
            if let Err(e) = self.registry.send_to(node, assignment) {
                warn!(task_id = %task_id, node = %node, error = %e, "Assignment delivery failed");
            }
        }

        info!(
            task_id = %task_id,
            nodes = selected.len(),
            reward_per_node,
            "Task distributed"
        );
        let _ = self.event_tx.send(EngineEvent::TaskAssigned {
            task_id,
            nodes: selected.len(),
        });
        selected.len()
    }

    /// The region's online validator with the fewest active tasks; ties go
    /// to the most completed.
    fn select_validator(&self, region: &str) -> Option<PeerId> {
        let candidates: Vec<PeerId> = self
            .region_validators
            .get(region)?
            .iter()
            .filter(|id| self.registry.is_online(id))
            .cloned()
            .collect();

        candidates.into_iter().min_by(|a, b| {
            let stats_a = self.stats.get(a).map(|s| s.clone()).unwrap_or_default();
            let stats_b = self.stats.get(b).map(|s| s.clone()).unwrap_or_default();
            stats_a
                .active
                .cmp(&stats_b.active)
                .then(stats_b.completed.cmp(&stats_a.completed))
        })
    }

    /// Individual nodes in a region passing the task's eligibility filters.
    fn eligible_nodes(&self, region: &str, requirements: &TaskRequirements) -> Vec<PeerId> {
        let Some(members) = self.region_individuals.get(region) else {
            return Vec::new();
        };

        let mut eligible: Vec<PeerId> = members
            .iter()
            .filter(|id| {
                let Some(info) = self.registry.get(id) else {
                    return false;
                };
                let Some(status) = self.registry.status(id) else {
                    return false;
                };
                if !status.online {
                    return false;
                }
                if !requirements.tiers.contains(&info.node_tier) {
                    return false;
                }
                if let Some(min_storage) = requirements.min_storage {
                    if status.storage < min_storage {
                        return false;
                    }
                }
                if let Some(min_memory) = requirements.min_memory {
                    if status.memory < min_memory {
                        return false;
                    }
                }
                if requirements.gpu && !info.node_tier.has_gpu() {
                    return false;
                }
                let active = self.stats.get(id).map(|s| s.active).unwrap_or(0);
                (active as usize) < info.node_tier.task_capacity()
            })
            .cloned()
            .collect();

        eligible.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        eligible
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle reports
    // ─────────────────────────────────────────────────────────────────────

    /// A node accepted its assignment. The first acceptance starts the clock.
    pub fn accept_task(&self, task_id: TaskId, peer_id: &PeerId) -> Result<()> {
        let mut task = self
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| GridError::TaskNotFound(task_id.to_string()))?;

        if task.state.is_terminal() {
            return Err(GridError::InvalidTaskTransition {
                from: task.state.to_string(),
                to: TaskState::Processing.to_string(),
            });
        }
        if !task.assigned_nodes.contains(peer_id) {
            return Err(GridError::Internal(format!(
                "peer {peer_id} is not assigned to task {task_id}"
            )));
        }
        if task.accepted_nodes.contains(peer_id) {
            return Ok(()); // duplicate report
        }

        if task.accepted_nodes.is_empty() {
            task.state = TaskState::Processing;
            task.start_time = Some(chrono::Utc::now().timestamp_millis());
        }
        task.accepted_nodes.push(peer_id.clone());
        task.touch();
        drop(task);

        self.ledger.entry(task_id).or_default();
        debug!(task_id = %task_id, peer_id = %peer_id, "Assignment accepted");
        Ok(())
    }

    /// A node reported completion. Late finishes take a proportional
    /// penalty, capped at the full per-node reward. The last report in the
    /// quorum finalizes the task.
    pub fn complete_task(
        &self,
        task_id: TaskId,
        peer_id: &PeerId,
        result: Option<serde_json::Value>,
    ) -> Result<()> {
        let finalize_now = {
            let mut task = self
                .tasks
                .get_mut(&task_id)
                .ok_or_else(|| GridError::TaskNotFound(task_id.to_string()))?;

            if task.state != TaskState::Processing {
                return Err(GridError::InvalidTaskTransition {
                    from: task.state.to_string(),
                    to: TaskState::Completed.to_string(),
                });
            }
            if !task.accepted_nodes.contains(peer_id) {
                return Err(GridError::Internal(format!(
                    "peer {peer_id} never accepted task {task_id}"
                )));
            }
            if task.completed_nodes.contains(peer_id) {
                return Ok(()); // duplicate report
            }

            let now = chrono::Utc::now().timestamp_millis();
            let elapsed = (now - task.start_time.unwrap_or(now)).max(0) as u64;
            let reward = Self::penalized_reward(
                task.reward.per_node,
                elapsed,
                task.requirements.estimated_duration,
                task.reward.penalty_rate,
            );

            task.completed_nodes.push(peer_id.clone());
            if result.is_some() {
                task.result = result;
            }
            task.progress =
                task.completed_nodes.len() as f64 / task.accepted_nodes.len() as f64 * 100.0;
            task.touch();

            self.ledger
                .entry(task_id)
                .or_default()
                .insert(peer_id.clone(), reward);

            let mut stats = self.stats.entry(peer_id.clone()).or_default();
            stats.active = stats.active.saturating_sub(1);
            stats.completed += 1;
            stats.total_completion_ms += elapsed;
            drop(stats);
            self.registry.finish_task(peer_id, true);

            task.completed_nodes.len() == task.accepted_nodes.len()
        };

        if finalize_now {
            self.finalize_task(task_id);
        }
        Ok(())
    }

    /// Overrun penalty: `min(1, overrun_ratio * penalty_rate)` of the
    /// per-node reward, where the overrun ratio is the fraction of the
    /// estimate exceeded.
    fn penalized_reward(per_node: f64, elapsed_ms: u64, estimated_ms: u64, rate: f64) -> f64 {
        if elapsed_ms <= estimated_ms || estimated_ms == 0 {
            return per_node;
        }
        let overrun_ratio = (elapsed_ms - estimated_ms) as f64 / estimated_ms as f64;
        let penalty = (overrun_ratio * rate).min(1.0);
        per_node * (1.0 - penalty)
    }

    /// Completion quorum reached: settle the validator pool and pay out.
    fn finalize_task(&self, task_id: TaskId) {
        let settled = {
            let Some(mut task) = self.tasks.get_mut(&task_id) else {
                return;
            };
            // Re-validate: another path may have finalized or failed the
            // task while completion reports were in flight
            if task.state != TaskState::Processing {
                return;
            }
            task.state = TaskState::Completed;
            task.progress = 100.0;
            task.completion_time = Some(chrono::Utc::now().timestamp_millis());
            task.touch();
            task.clone()
        };

        self.clear_timeout(&task_id);

        // Validator pool splits evenly across the originating global
        // validator and every distinct regional validator involved
        let mut recipients: Vec<PeerId> = vec![settled.submitter.clone()];
        for validator in &settled.regional_validators {
            if !recipients.contains(validator) {
                recipients.push(validator.clone());
            }
        }
        let share = settled.reward.validator_pool() / recipients.len() as f64;
        {
            let mut ledger = self.ledger.entry(task_id).or_default();
            for recipient in &recipients {
                *ledger.entry(recipient.clone()).or_insert(0.0) += share;
            }
        }

        // Pay out every ledger entry
        let payouts: Vec<(PeerId, f64)> = self
            .ledger
            .get(&task_id)
            .map(|l| l.iter().map(|(id, amt)| (id.clone(), *amt)).collect())
            .unwrap_or_default();
        let mut total_paid = 0.0;
        for (peer_id, amount) in &payouts {
            total_paid += amount;
            self.stats.entry(peer_id.clone()).or_default().earnings += amount;
            self.registry.record_earnings(peer_id, *amount);
            let payout = Message::RewardDistribution(RewardDistributionMessage {
                task_id,
                peer_id: peer_id.clone(),
                amount: *amount,
                timestamp: now_ts(),
            });
            if let Err(e) = self.registry.send_to(peer_id, payout) {
                debug!(task_id = %task_id, peer_id = %peer_id, error = %e, "Reward delivery failed");
            }
        }
        *self.rewards_distributed.lock().unwrap() += total_paid;
        self.ledger.remove(&task_id);

        // Validator supervision ends; submitter completion counts
        for validator in &settled.regional_validators {
            let mut stats = self.stats.entry(validator.clone()).or_default();
            stats.active = stats.active.saturating_sub(1);
        }
        self.stats
            .entry(settled.submitter.clone())
            .or_default()
            .completed += 1;

        // Fold into each contributing region's rolling metrics
        let elapsed = match (settled.start_time, settled.completion_time) {
            (Some(start), Some(end)) => (end - start).max(0) as f64,
            _ => 0.0,
        };
        for region in self.regions_of(&settled.completed_nodes) {
            let regional_reward: f64 = settled
                .completed_nodes
                .iter()
                .filter(|id| {
                    self.pool
                        .get(*id)
                        .map(|slot| slot.region == region)
                        .unwrap_or(false)
                })
                .filter_map(|id| payouts.iter().find(|(p, _)| p == id))
                .map(|(_, amount)| amount)
                .sum();
            self.registry
                .record_region_task(&region, true, regional_reward, elapsed);
        }

        info!(task_id = %task_id, total_paid, "Task finalized");
        let _ = self.event_tx.send(EngineEvent::TaskCompleted(task_id));
    }

    /// Move a task to failed, notify the submitter and clean up.
    pub fn fail_task(&self, task_id: TaskId, reason: &str) {
        let failed = {
            let Some(mut task) = self.tasks.get_mut(&task_id) else {
                return;
            };
            if task.state.is_terminal() {
                return;
            }
            task.state = TaskState::Failed;
            task.error = Some(reason.to_string());
            task.completion_time = Some(chrono::Utc::now().timestamp_millis());
            task.touch();
            task.clone()
        };

        self.clear_timeout(&task_id);
        self.ledger.remove(&task_id);

        for node in &failed.assigned_nodes {
            // Nodes that already completed their share settled their
            // counters at report time
            if failed.completed_nodes.contains(node) {
                continue;
            }
            let mut stats = self.stats.entry(node.clone()).or_default();
            stats.active = stats.active.saturating_sub(1);
            drop(stats);
            self.registry.finish_task(node, false);
        }
        for validator in &failed.regional_validators {
            let mut stats = self.stats.entry(validator.clone()).or_default();
            stats.active = stats.active.saturating_sub(1);
        }
        self.stats
            .entry(failed.submitter.clone())
            .or_default()
            .failed += 1;

        for region in self.regions_of(&failed.assigned_nodes) {
            self.registry.record_region_task(&region, false, 0.0, 0.0);
        }

        let notice = Message::TaskFailed(TaskFailedMessage {
            task_id,
            peer_id: None,
            reason: reason.to_string(),
            timestamp: now_ts(),
        });
        if let Err(e) = self.registry.send_to(&failed.submitter, notice) {
            debug!(task_id = %task_id, error = %e, "Failure notice delivery failed");
        }

        warn!(task_id = %task_id, reason, "Task failed");
        let _ = self.event_tx.send(EngineEvent::TaskFailed {
            task_id,
            reason: reason.to_string(),
        });
    }

    /// A node reported failure for its share of a task: drop it from the
    /// assignment; the task fails only when nobody remains.
    pub fn node_failure(&self, task_id: TaskId, peer_id: &PeerId, reason: &str) -> Result<()> {
        if !self.tasks.contains_key(&task_id) {
            return Err(GridError::TaskNotFound(task_id.to_string()));
        }
        debug!(task_id = %task_id, peer_id = %peer_id, reason, "Node reported failure");
        self.stats.entry(peer_id.clone()).or_default().failed += 1;
        self.remove_node_from_task(task_id, peer_id);
        Ok(())
    }

    /// Progress report from an executing node.
    pub fn update_progress(&self, task_id: TaskId, progress: f64) -> Result<()> {
        let mut task = self
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| GridError::TaskNotFound(task_id.to_string()))?;
        if task.state.is_terminal() {
            return Ok(());
        }
        task.progress = progress.clamp(0.0, 100.0);
        task.touch();
        Ok(())
    }

    /// A participating peer disconnected: pull it out of every non-terminal
    /// task it holds an assignment in.
    pub fn handle_disconnect(&self, peer_id: &PeerId) {
        let affected: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|t| !t.state.is_terminal() && t.assigned_nodes.contains(peer_id))
            .map(|t| t.id)
            .collect();
        for task_id in affected {
            self.remove_node_from_task(task_id, peer_id);
        }
    }

    fn remove_node_from_task(&self, task_id: TaskId, peer_id: &PeerId) {
        enum Outcome {
            None,
            Fail,
            Finalize,
        }

        let outcome = {
            let Some(mut task) = self.tasks.get_mut(&task_id) else {
                return;
            };
            if task.state.is_terminal() {
                return;
            }
            // Completed work stands; only unfinished participation is removed
            if task.completed_nodes.contains(peer_id) {
                return;
            }

            task.assigned_nodes.retain(|id| id != peer_id);
            task.accepted_nodes.retain(|id| id != peer_id);
            task.touch();
            if let Some(mut ledger) = self.ledger.get_mut(&task_id) {
                ledger.remove(peer_id);
            }

            let mut stats = self.stats.entry(peer_id.clone()).or_default();
            stats.active = stats.active.saturating_sub(1);
            drop(stats);
            self.registry.finish_task(peer_id, false);

            if task.assigned_nodes.is_empty() {
                Outcome::Fail
            } else if !task.accepted_nodes.is_empty()
                && task.completed_nodes.len() == task.accepted_nodes.len()
                && task.state == TaskState::Processing
            {
                // The departed node was the last one holding up the quorum
                Outcome::Finalize
            } else {
                Outcome::None
            }
        };

        match outcome {
            Outcome::Fail => self.fail_task(task_id, "all assigned nodes failed"),
            Outcome::Finalize => self.finalize_task(task_id),
            Outcome::None => {}
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Timers & housekeeping
    // ─────────────────────────────────────────────────────────────────────

    fn arm_timeout(self: &Arc<Self>, task_id: TaskId) {
        let engine = Arc::clone(self);
        let timeout = self.config.task_timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            engine.on_timeout(task_id);
        });
        let mut timeouts = self.timeouts.lock().unwrap();
        if let Some(previous) = timeouts.insert(task_id, handle.abort_handle()) {
            previous.abort();
        }
    }

    fn clear_timeout(&self, task_id: &TaskId) {
        if let Some(handle) = self.timeouts.lock().unwrap().remove(task_id) {
            handle.abort();
        }
    }

    /// Timer callback. State is re-validated: acceptance may have raced the
    /// timer across the suspension.
    fn on_timeout(&self, task_id: TaskId) {
        let expired = self
            .tasks
            .get(&task_id)
            .map(|task| {
                matches!(task.state, TaskState::Pending | TaskState::Assigned)
                    && task.accepted_nodes.is_empty()
            })
            .unwrap_or(false);
        if expired {
            self.fail_task(task_id, "timed out waiting for acceptance");
        }
    }

    /// Purge terminal tasks older than the retention window.
    pub fn gc_once(&self) -> usize {
        let cutoff = chrono::Utc::now().timestamp_millis()
            - self.config.retention.as_millis() as i64;
        let expired: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|t| t.state.is_terminal() && t.updated_at < cutoff)
            .map(|t| t.id)
            .collect();
        for task_id in &expired {
            self.tasks.remove(task_id);
            self.ledger.remove(task_id);
            self.clear_timeout(task_id);
        }
        if !expired.is_empty() {
            debug!(purged = expired.len(), "Terminal tasks purged");
        }
        expired.len()
    }

    /// Run the GC sweep on an interval until shutdown.
    pub fn start_gc(self: &Arc<Self>, interval: Duration) {
        let engine = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        engine.gc_once();
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let mut timeouts = self.timeouts.lock().unwrap();
        for (_, handle) in timeouts.drain() {
            handle.abort();
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Coordinator support
    // ─────────────────────────────────────────────────────────────────────

    /// Non-terminal tasks attributed to a global validator.
    pub fn tasks_attributed_to(&self, peer_id: &PeerId) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| !t.state.is_terminal())
            .filter(|t| match &t.global_validator {
                Some(validator) => validator == peer_id,
                None => &t.submitter == peer_id,
            })
            .map(|t| t.id)
            .collect()
    }

    /// Hand a task to a new global validator during failover.
    pub fn reassign_global(
        &self,
        task_id: TaskId,
        new_validator: &PeerId,
        backups: Vec<PeerId>,
    ) -> Result<()> {
        let mut task = self
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| GridError::TaskNotFound(task_id.to_string()))?;
        task.global_validator = Some(new_validator.clone());
        task.backup_validators = backups;
        task.touch();
        Ok(())
    }

    /// Merge a task received from a sync snapshot or a backup copy.
    /// Unknown ids are adopted; known ids follow last-writer-wins on
    /// `updated_at`.
    pub fn adopt_task(self: &Arc<Self>, task: Task) {
        match self.tasks.get(&task.id) {
            Some(existing) if existing.updated_at >= task.updated_at => {}
            Some(_) => {
                debug!(task_id = %task.id, "Task replaced by newer sync copy");
                self.tasks.insert(task.id, task);
            }
            None => {
                debug!(task_id = %task.id, "Task adopted from sync");
                let arm = task.state == TaskState::Pending;
                let task_id = task.id;
                self.tasks.insert(task_id, task);
                if arm {
                    self.arm_timeout(task_id);
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Read API
    // ─────────────────────────────────────────────────────────────────────

    pub fn get_task(&self, task_id: &TaskId) -> Option<Task> {
        self.tasks.get(task_id).map(|t| t.clone())
    }

    pub fn all_tasks(&self) -> Vec<Task> {
        self.tasks.iter().map(|t| t.clone()).collect()
    }

    pub fn active_tasks(&self) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|t| !t.state.is_terminal())
            .map(|t| t.clone())
            .collect()
    }

    pub fn tasks_for_node(&self, peer_id: &PeerId) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|t| t.assigned_nodes.contains(peer_id))
            .map(|t| t.clone())
            .collect()
    }

    pub fn node_stats(&self, peer_id: &PeerId) -> NodeStats {
        self.stats
            .get(peer_id)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Pending reward totals per peer, summed across open ledgers.
    pub fn pending_rewards(&self) -> HashMap<PeerId, f64> {
        let mut totals: HashMap<PeerId, f64> = HashMap::new();
        for ledger in self.ledger.iter() {
            for (peer_id, amount) in ledger.iter() {
                *totals.entry(peer_id.clone()).or_insert(0.0) += amount;
            }
        }
        totals
    }

    pub fn total_rewards_distributed(&self) -> f64 {
        *self.rewards_distributed.lock().unwrap()
    }

    /// Distinct pool regions of the given peers.
    fn regions_of(&self, peers: &[PeerId]) -> Vec<String> {
        let mut regions: Vec<String> = Vec::new();
        for peer_id in peers {
            if let Some(slot) = self.pool.get(peer_id) {
                if !regions.contains(&slot.region) {
                    regions.push(slot.region.clone());
                }
            }
        }
        regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridnet_core::{NodeTier, TaskType};
    use tokio::sync::mpsc;

    struct Harness {
        registry: Arc<PeerRegistry>,
        engine: Arc<TaskEngine>,
        inboxes: HashMap<&'static str, mpsc::Receiver<Message>>,
    }

    impl Harness {
        fn new(config: EngineConfig) -> Self {
            let registry = Arc::new(PeerRegistry::new());
            let engine = TaskEngine::new(Arc::clone(&registry), config);
            Self {
                registry,
                engine,
                inboxes: HashMap::new(),
            }
        }

        fn add_peer(&mut self, id: &'static str, node_type: NodeType, tier: NodeTier, region: &str) {
            let balance = match node_type {
                NodeType::Individual => 0.0,
                NodeType::RegionalNode => 2_000.0,
                NodeType::GlobalNode => 10_000.0,
            };
            let info = PeerInfo::new(id, node_type, tier, region).with_token_balance(balance);
            let (tx, rx) = mpsc::channel(32);
            self.registry.register(info.clone(), Some(tx));
            self.engine.register_peer(&info);
            self.inboxes.insert(id, rx);
        }

        fn drain(&mut self, id: &str) -> Vec<Message> {
            let mut messages = Vec::new();
            if let Some(rx) = self.inboxes.get_mut(id) {
                while let Ok(message) = rx.try_recv() {
                    messages.push(message);
                }
            }
            messages
        }

        fn reward_for(&mut self, id: &str) -> Option<f64> {
            self.drain(id).into_iter().find_map(|m| match m {
                Message::RewardDistribution(r) => Some(r.amount),
                _ => None,
            })
        }
    }

    fn train_task(total: f64, submitter: &str) -> Task {
        Task::new(TaskType::Train, total, submitter)
    }

    fn standard_harness() -> Harness {
        let mut harness = Harness::new(EngineConfig::default());
        harness.add_peer("global-a", NodeType::GlobalNode, NodeTier::Feedback, "eu-west");
        harness.add_peer("validator-1", NodeType::RegionalNode, NodeTier::Aggregator, "eu-west");
        harness.add_peer("worker-1", NodeType::Individual, NodeTier::Aggregator, "eu-west");
        harness.add_peer("worker-2", NodeType::Individual, NodeTier::Aggregator, "eu-west");
        harness
    }

    #[tokio::test]
    async fn test_wrong_validator_share_rejected() {
        let harness = standard_harness();
        for task_type in TaskType::ALL {
            let mut task = Task::new(task_type, 500.0, "global-a");
            task.reward.validator_share += 1.0;
            assert!(
                matches!(
                    harness.engine.broadcast_task(task),
                    Err(GridError::TaskPolicy(_))
                ),
                "share mismatch accepted for {task_type}"
            );
        }
    }

    #[tokio::test]
    async fn test_wrong_tier_set_rejected() {
        let harness = standard_harness();
        let mut task = train_task(200.0, "global-a");
        task.requirements.tiers = vec![NodeTier::Inference];
        assert!(matches!(
            harness.engine.broadcast_task(task),
            Err(GridError::TaskPolicy(_))
        ));
    }

    #[tokio::test]
    async fn test_below_minimum_reward_rejected() {
        let harness = standard_harness();
        let task = train_task(50.0, "global-a"); // train minimum is 100
        assert!(matches!(
            harness.engine.broadcast_task(task),
            Err(GridError::TaskPolicy(_))
        ));
    }

    #[tokio::test]
    async fn test_duration_bounds_enforced() {
        let harness = standard_harness();
        let mut task = train_task(200.0, "global-a");
        task.requirements.estimated_duration = 10; // below the 1s floor
        assert!(matches!(
            harness.engine.broadcast_task(task),
            Err(GridError::TaskPolicy(_))
        ));
    }

    #[tokio::test]
    async fn test_full_lifecycle_reward_settlement() {
        // Scenario: a train task with total=200, validator share 10%, two
        // eligible aggregator nodes in one region.
        let mut harness = standard_harness();
        let task_id = harness
            .engine
            .broadcast_task(train_task(200.0, "global-a"))
            .unwrap();

        let task = harness.engine.get_task(&task_id).unwrap();
        assert_eq!(task.state, TaskState::Assigned);
        assert_eq!(task.assigned_nodes.len(), 2);
        assert_eq!(task.reward.per_node, 90.0);
        assert_eq!(task.regional_validators, vec![PeerId::from("validator-1")]);

        // Both workers received assignments
        for worker in ["worker-1", "worker-2"] {
            let assignments = harness.drain(worker);
            assert!(assignments
                .iter()
                .any(|m| matches!(m, Message::TaskAssignment(_))));
        }

        let w1 = PeerId::from("worker-1");
        let w2 = PeerId::from("worker-2");
        harness.engine.accept_task(task_id, &w1).unwrap();
        assert_eq!(
            harness.engine.get_task(&task_id).unwrap().state,
            TaskState::Processing
        );
        harness.engine.accept_task(task_id, &w2).unwrap();

        harness.engine.complete_task(task_id, &w1, None).unwrap();
        assert_eq!(
            harness.engine.get_task(&task_id).unwrap().state,
            TaskState::Processing
        );
        harness
            .engine
            .complete_task(task_id, &w2, Some(serde_json::json!({"loss": 0.1})))
            .unwrap();

        let task = harness.engine.get_task(&task_id).unwrap();
        assert_eq!(task.state, TaskState::Completed);
        assert_eq!(task.progress, 100.0);

        // Workers: 200 * 0.9 / 2 = 90 each; validators: pool of 20 split
        // between the originating global and the one regional validator
        assert_eq!(harness.reward_for("worker-1"), Some(90.0));
        assert_eq!(harness.reward_for("worker-2"), Some(90.0));
        assert_eq!(harness.reward_for("global-a"), Some(10.0));
        assert_eq!(harness.reward_for("validator-1"), Some(10.0));

        // Conservation: everything paid out sums back to the total
        assert!((harness.engine.total_rewards_distributed() - 200.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_zero_eligible_nodes_pends_then_times_out() {
        let mut config = EngineConfig::default();
        config.task_timeout = Duration::from_millis(50);
        let mut harness = Harness::new(config);
        harness.add_peer("global-a", NodeType::GlobalNode, NodeTier::Feedback, "eu-west");
        harness.add_peer("validator-1", NodeType::RegionalNode, NodeTier::Aggregator, "eu-west");
        // No individual nodes anywhere

        let task_id = harness
            .engine
            .broadcast_task(train_task(200.0, "global-a"))
            .unwrap();
        assert_eq!(
            harness.engine.get_task(&task_id).unwrap().state,
            TaskState::Pending
        );

        tokio::time::sleep(Duration::from_millis(150)).await;

        let task = harness.engine.get_task(&task_id).unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(
            task.error.as_deref(),
            Some("timed out waiting for acceptance")
        );

        // Submitter was notified
        let notices = harness.drain("global-a");
        assert!(notices
            .iter()
            .any(|m| matches!(m, Message::TaskFailed(_))));
    }

    #[tokio::test]
    async fn test_acceptance_disarms_timeout() {
        let mut config = EngineConfig::default();
        config.task_timeout = Duration::from_millis(50);
        let mut harness = Harness::new(config);
        harness.add_peer("global-a", NodeType::GlobalNode, NodeTier::Feedback, "eu-west");
        harness.add_peer("validator-1", NodeType::RegionalNode, NodeTier::Aggregator, "eu-west");
        harness.add_peer("worker-1", NodeType::Individual, NodeTier::Aggregator, "eu-west");

        let task_id = harness
            .engine
            .broadcast_task(train_task(200.0, "global-a"))
            .unwrap();
        harness
            .engine
            .accept_task(task_id, &PeerId::from("worker-1"))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(
            harness.engine.get_task(&task_id).unwrap().state,
            TaskState::Processing
        );
    }

    #[tokio::test]
    async fn test_disconnect_of_sole_assignee_fails_task() {
        let mut harness = Harness::new(EngineConfig::default());
        harness.add_peer("global-a", NodeType::GlobalNode, NodeTier::Feedback, "eu-west");
        harness.add_peer("validator-1", NodeType::RegionalNode, NodeTier::Aggregator, "eu-west");
        harness.add_peer("worker-1", NodeType::Individual, NodeTier::Aggregator, "eu-west");

        let task_id = harness
            .engine
            .broadcast_task(train_task(200.0, "global-a"))
            .unwrap();
        harness
            .engine
            .accept_task(task_id, &PeerId::from("worker-1"))
            .unwrap();

        harness.engine.handle_disconnect(&PeerId::from("worker-1"));

        let task = harness.engine.get_task(&task_id).unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.error.as_deref(), Some("all assigned nodes failed"));
    }

    #[tokio::test]
    async fn test_disconnect_with_other_assignees_keeps_processing() {
        let mut harness = standard_harness();
        let task_id = harness
            .engine
            .broadcast_task(train_task(200.0, "global-a"))
            .unwrap();
        harness
            .engine
            .accept_task(task_id, &PeerId::from("worker-1"))
            .unwrap();
        harness
            .engine
            .accept_task(task_id, &PeerId::from("worker-2"))
            .unwrap();

        harness.engine.handle_disconnect(&PeerId::from("worker-2"));

        let task = harness.engine.get_task(&task_id).unwrap();
        assert_eq!(task.state, TaskState::Processing);
        assert_eq!(task.assigned_nodes, vec![PeerId::from("worker-1")]);
    }

    #[tokio::test]
    async fn test_overrun_penalty_capped() {
        let mut harness = standard_harness();
        let mut task = train_task(200.0, "global-a");
        task.requirements.estimated_duration = 1_000;
        task.reward.penalty_rate = 1.0;
        let task_id = harness.engine.broadcast_task(task).unwrap();

        let w1 = PeerId::from("worker-1");
        let w2 = PeerId::from("worker-2");
        harness.engine.accept_task(task_id, &w1).unwrap();
        harness.engine.accept_task(task_id, &w2).unwrap();

        // Rewind the start stamp to simulate a 50% overrun for both reports
        {
            let mut entry = harness.engine.tasks.get_mut(&task_id).unwrap();
            let start = entry.start_time.unwrap();
            entry.start_time = Some(start - 1_500);
        }

        harness.engine.complete_task(task_id, &w1, None).unwrap();
        harness.engine.complete_task(task_id, &w2, None).unwrap();

        // 50% overrun at penalty rate 1.0 halves the per-node 90 reward
        let reward = harness.reward_for("worker-1").unwrap();
        assert!((reward - 45.0).abs() < 2.0, "unexpected reward {reward}");

        // A massive overrun zeroes the reward but never goes negative
        let zeroed = TaskEngine::penalized_reward(90.0, 100_000, 1_000, 1.0);
        assert_eq!(zeroed, 0.0);
    }

    #[tokio::test]
    async fn test_load_ceiling_limits_assignments() {
        let mut harness = Harness::new(EngineConfig::default());
        harness.add_peer("global-a", NodeType::GlobalNode, NodeTier::Feedback, "eu-west");
        harness.add_peer("validator-1", NodeType::RegionalNode, NodeTier::Aggregator, "eu-west");
        harness.add_peer("worker-inf", NodeType::Individual, NodeTier::Inference, "eu-west");

        // Inference-tier capacity is 5: saturate it
        for _ in 0..5 {
            let mut task = Task::new(TaskType::Inference, 50.0, "global-a");
            task.requirements.max_nodes = 1;
            harness.engine.broadcast_task(task).unwrap();
        }
        let loaded = harness.engine.node_stats(&PeerId::from("worker-inf"));
        assert_eq!(loaded.active, 5);

        // The sixth task finds nobody eligible
        let mut task = Task::new(TaskType::Inference, 50.0, "global-a");
        task.requirements.max_nodes = 1;
        let task_id = harness.engine.broadcast_task(task).unwrap();
        assert_eq!(
            harness.engine.get_task(&task_id).unwrap().state,
            TaskState::Pending
        );
    }

    #[tokio::test]
    async fn test_gpu_requirement_needs_capable_tier() {
        let mut harness = Harness::new(EngineConfig::default());
        harness.add_peer("global-a", NodeType::GlobalNode, NodeTier::Feedback, "eu-west");
        harness.add_peer("validator-1", NodeType::RegionalNode, NodeTier::Aggregator, "eu-west");
        harness.add_peer("worker-agg", NodeType::Individual, NodeTier::Aggregator, "eu-west");
        harness.add_peer("worker-train", NodeType::Individual, NodeTier::Training, "eu-west");

        let mut task = train_task(200.0, "global-a");
        task.requirements.gpu = true;
        let task_id = harness.engine.broadcast_task(task).unwrap();

        let task = harness.engine.get_task(&task_id).unwrap();
        assert_eq!(task.assigned_nodes, vec![PeerId::from("worker-train")]);
    }

    #[tokio::test]
    async fn test_validator_selection_prefers_least_loaded() {
        let mut harness = Harness::new(EngineConfig::default());
        harness.add_peer("global-a", NodeType::GlobalNode, NodeTier::Feedback, "eu-west");
        harness.add_peer("validator-1", NodeType::RegionalNode, NodeTier::Aggregator, "eu-west");
        harness.add_peer("validator-2", NodeType::RegionalNode, NodeTier::Aggregator, "eu-west");
        harness.add_peer("worker-1", NodeType::Individual, NodeTier::Aggregator, "eu-west");

        // Load validator-1 with an active supervision
        harness
            .engine
            .stats
            .entry(PeerId::from("validator-1"))
            .or_default()
            .active = 3;

        let task_id = harness
            .engine
            .broadcast_task(train_task(200.0, "global-a"))
            .unwrap();
        let task = harness.engine.get_task(&task_id).unwrap();
        assert_eq!(task.regional_validators, vec![PeerId::from("validator-2")]);
    }

    #[tokio::test]
    async fn test_retry_resets_and_redistributes() {
        let mut harness = standard_harness();
        let task_id = harness
            .engine
            .broadcast_task(train_task(200.0, "global-a"))
            .unwrap();
        harness.engine.fail_task(task_id, "all assigned nodes failed");
        assert_eq!(
            harness.engine.get_task(&task_id).unwrap().state,
            TaskState::Failed
        );

        harness.engine.retry_task(task_id).unwrap();

        let task = harness.engine.get_task(&task_id).unwrap();
        assert_eq!(task.state, TaskState::Assigned);
        assert!(task.error.is_none());
        assert_eq!(task.assigned_nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_gc_purges_old_terminal_tasks() {
        let mut config = EngineConfig::default();
        config.retention = Duration::from_millis(0);
        let mut harness = Harness::new(config);
        harness.add_peer("global-a", NodeType::GlobalNode, NodeTier::Feedback, "eu-west");

        let task_id = harness
            .engine
            .broadcast_task(train_task(200.0, "global-a"))
            .unwrap();
        harness.engine.fail_task(task_id, "no takers");

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(harness.engine.gc_once(), 1);
        assert!(harness.engine.get_task(&task_id).is_none());

        // Active tasks survive the sweep
        let task_id = harness
            .engine
            .broadcast_task(train_task(200.0, "global-a"))
            .unwrap();
        assert_eq!(harness.engine.gc_once(), 0);
        assert!(harness.engine.get_task(&task_id).is_some());
    }

    #[tokio::test]
    async fn test_adopt_task_last_writer_wins() {
        let harness = standard_harness();
        let mut task = train_task(200.0, "global-a");
        task.state = TaskState::Processing;
        let task_id = task.id;

        harness.engine.adopt_task(task.clone());
        assert_eq!(
            harness.engine.get_task(&task_id).unwrap().state,
            TaskState::Processing
        );

        // A stale copy loses
        let mut stale = task.clone();
        stale.state = TaskState::Pending;
        stale.updated_at -= 10_000;
        harness.engine.adopt_task(stale);
        assert_eq!(
            harness.engine.get_task(&task_id).unwrap().state,
            TaskState::Processing
        );

        // A newer copy wins
        let mut newer = task;
        newer.state = TaskState::Completed;
        newer.updated_at += 10_000;
        harness.engine.adopt_task(newer);
        assert_eq!(
            harness.engine.get_task(&task_id).unwrap().state,
            TaskState::Completed
        );
    }

    #[tokio::test]
    async fn test_quorum_counts_accepted_nodes_only() {
        let mut harness = standard_harness();
        let task_id = harness
            .engine
            .broadcast_task(train_task(200.0, "global-a"))
            .unwrap();
        let w1 = PeerId::from("worker-1");
        harness.engine.accept_task(task_id, &w1).unwrap();

        // worker-2 is assigned but never accepts; the quorum is the
        // accepted set, so worker-1's report finalizes the task
        harness.engine.complete_task(task_id, &w1, None).unwrap();
        assert_eq!(
            harness.engine.get_task(&task_id).unwrap().state,
            TaskState::Completed
        );

        // The ledger is cleared once the task finalizes
        assert!(harness.engine.pending_rewards().is_empty());
    }

    #[tokio::test]
    async fn test_pending_rewards_visible_before_finalize() {
        let mut harness = standard_harness();
        let task_id = harness
            .engine
            .broadcast_task(train_task(200.0, "global-a"))
            .unwrap();
        let w1 = PeerId::from("worker-1");
        let w2 = PeerId::from("worker-2");
        harness.engine.accept_task(task_id, &w1).unwrap();
        harness.engine.accept_task(task_id, &w2).unwrap();
        harness.engine.complete_task(task_id, &w1, None).unwrap();

        let pending = harness.engine.pending_rewards();
        assert_eq!(pending.get(&w1), Some(&90.0));

        harness.engine.fail_task(task_id, "deadline abandoned");
        assert!(harness.engine.pending_rewards().is_empty());
    }
}
