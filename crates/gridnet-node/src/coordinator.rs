//! Global-validator health monitoring, failover and synchronization.
//!
//! The coordinator runs two independent cycles: the health cycle probes every
//! tracked global validator and derives a composite status, and the sync
//! cycle pushes a state snapshot to every healthy global validator.
//! A validator turning failing, or disconnecting outright, triggers failover
//! of its attributed tasks onto the first active backup.

use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use gridnet_core::{
    FailoverRecord, GlobalNodeHealth, GridError, HealthStatus, NodeType, PeerId, Result,
};
use gridnet_protocol::messages::{
    now_ts, GlobalNodeFailoverMessage, GlobalNodeHealthMessage, Message, SyncRequestMessage,
    SyncSnapshot, TaskReassignmentMessage,
};

use crate::engine::TaskEngine;
use crate::metrics::MetricsRecorder;
use crate::registry::PeerRegistry;

/// Coordinator tuning knobs
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub health_interval: Duration,
    pub probe_timeout: Duration,
    pub sync_interval: Duration,
    /// Responsiveness lost per failed probe
    pub responsiveness_step: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(3),
            sync_interval: Duration::from_secs(60),
            responsiveness_step: 20.0,
        }
    }
}

/// The global-node coordinator
pub struct GlobalCoordinator {
    registry: Arc<PeerRegistry>,
    engine: Arc<TaskEngine>,
    metrics: Arc<MetricsRecorder>,
    config: CoordinatorConfig,

    /// Tracked global validators
    health: DashMap<PeerId, GlobalNodeHealth>,

    /// Append-only failover audit log
    failovers: Mutex<Vec<FailoverRecord>>,

    shutdown_tx: broadcast::Sender<()>,
}

impl GlobalCoordinator {
    pub fn new(
        registry: Arc<PeerRegistry>,
        engine: Arc<TaskEngine>,
        metrics: Arc<MetricsRecorder>,
        config: CoordinatorConfig,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            registry,
            engine,
            metrics,
            config,
            health: DashMap::new(),
            failovers: Mutex::new(Vec::new()),
            shutdown_tx,
        })
    }

    /// Begin tracking a global validator.
    pub fn track(&self, peer_id: PeerId) {
        self.health
            .entry(peer_id.clone())
            .or_insert_with(|| GlobalNodeHealth::new(peer_id));
    }

    pub fn is_tracked(&self, peer_id: &PeerId) -> bool {
        self.health.contains_key(peer_id)
    }

    pub fn tracked_health(&self) -> Vec<GlobalNodeHealth> {
        self.health.iter().map(|e| e.clone()).collect()
    }

    pub fn failover_log(&self) -> Vec<FailoverRecord> {
        self.failovers.lock().unwrap().clone()
    }

    /// Start the health and sync cycles.
    pub fn start(self: &Arc<Self>) {
        let coordinator = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(coordinator.config.health_interval);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => coordinator.health_check_once().await,
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        let coordinator = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(coordinator.config.sync_interval);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => coordinator.sync_once(),
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    // ─────────────────────────────────────────────────────────────────────
    // Health cycle
    // ─────────────────────────────────────────────────────────────────────

    /// Probe every tracked validator once and rebroadcast updated records.
    /// Safe to overlap with a previous slow run; each probe re-reads state.
    pub async fn health_check_once(&self) {
        let tracked: Vec<PeerId> = self.health.iter().map(|e| e.key().clone()).collect();
        for peer_id in tracked {
            let (probe_ok, latency_ms) = self.probe(&peer_id).await;

            let (snapshot, prev_status, new_status) = {
                let Some(mut entry) = self.health.get_mut(&peer_id) else {
                    continue; // untracked while we were probing
                };
                let prev_status = entry.status;

                if probe_ok {
                    entry.metrics.responsiveness = 100.0;
                    entry.metrics.network_latency = latency_ms;
                } else {
                    entry.metrics.responsiveness =
                        (entry.metrics.responsiveness - self.config.responsiveness_step).max(0.0);
                    entry.record_issue("ping timeout");
                }

                entry.metrics.task_completion =
                    self.engine.node_stats(&peer_id).completion_ratio();
                if let Some(status) = self.registry.status(&peer_id) {
                    entry.metrics.resource_utilization = status.resource_utilization();
                }

                entry.last_check = chrono::Utc::now().timestamp();
                let new_status = entry.derive_status();
                (entry.clone(), prev_status, new_status)
            };

            debug!(
                peer_id = %peer_id,
                responsiveness = snapshot.metrics.responsiveness,
                status = ?new_status,
                "Health check"
            );

            if new_status == HealthStatus::Failing && prev_status != HealthStatus::Failing {
                if let Err(e) = self.failover(&peer_id, "health degraded below failing threshold")
                {
                    error!(peer_id = %peer_id, error = %e, "Failover aborted");
                }
            }

            self.broadcast_health(&snapshot);
        }
    }

    /// Liveness probe: push a ping and watch for any activity on the peer's
    /// connection within the probe window.
    async fn probe(&self, peer_id: &PeerId) -> (bool, f64) {
        let sent_at = Instant::now();
        if self.registry.send_to(peer_id, Message::ping()).is_err() {
            return (false, 0.0);
        }
        tokio::time::sleep(self.config.probe_timeout).await;

        match self.registry.last_activity(peer_id) {
            Some(last) if last >= sent_at => {
                let latency = last.duration_since(sent_at).as_millis() as f64;
                (true, latency)
            }
            _ => (false, 0.0),
        }
    }

    /// Push an updated health record to every currently healthy global.
    fn broadcast_health(&self, health: &GlobalNodeHealth) {
        let message = Message::GlobalNodeHealth(GlobalNodeHealthMessage {
            health: health.clone(),
            timestamp: now_ts(),
        });
        for peer_id in self.healthy_validators(None) {
            if peer_id == health.node_id {
                continue;
            }
            if let Err(e) = self.registry.send_to(&peer_id, message.clone()) {
                debug!(peer_id = %peer_id, error = %e, "Health broadcast delivery failed");
            }
        }
    }

    /// Merge a health record broadcast by another coordinator; the newer
    /// check wins.
    pub fn receive_health(&self, health: GlobalNodeHealth) {
        match self.health.get_mut(&health.node_id) {
            Some(mut entry) => {
                if health.last_check > entry.last_check {
                    *entry = health;
                }
            }
            None => {
                self.health.insert(health.node_id.clone(), health);
            }
        }
    }

    fn healthy_validators(&self, exclude: Option<&PeerId>) -> Vec<PeerId> {
        self.health
            .iter()
            .filter(|e| {
                matches!(e.status, HealthStatus::Active | HealthStatus::Degraded)
            })
            .filter(|e| exclude.map(|ex| ex != e.key()).unwrap_or(true))
            .map(|e| e.key().clone())
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Failover
    // ─────────────────────────────────────────────────────────────────────

    /// Reassign every task attributed to the failed validator onto the first
    /// active backup. Fails loudly when no backup exists.
    pub fn failover(&self, failed: &PeerId, reason: &str) -> Result<FailoverRecord> {
        let backup = self
            .health
            .iter()
            .find(|e| e.key() != failed && e.status == HealthStatus::Active)
            .map(|e| e.key().clone());
        let Some(backup) = backup else {
            error!(
                failed = %failed,
                "No active global validator available for failover, aborting"
            );
            return Err(GridError::NoBackupAvailable);
        };

        let standbys: Vec<PeerId> = self
            .healthy_validators(Some(failed))
            .into_iter()
            .filter(|id| id != &backup)
            .collect();

        let affected = self.engine.tasks_attributed_to(failed);
        for task_id in &affected {
            if let Err(e) = self
                .engine
                .reassign_global(*task_id, &backup, standbys.clone())
            {
                warn!(task_id = %task_id, error = %e, "Task reassignment failed");
                continue;
            }
            let notice = Message::TaskReassignment(TaskReassignmentMessage {
                task_id: *task_id,
                new_validator: backup.clone(),
                backup_validators: standbys.clone(),
                timestamp: now_ts(),
            });
            if let Err(e) = self.registry.send_to(&backup, notice) {
                debug!(task_id = %task_id, error = %e, "Reassignment notice delivery failed");
            }
        }

        let record = FailoverRecord::new(
            failed.clone(),
            backup.clone(),
            affected.clone(),
            reason,
        );
        self.failovers.lock().unwrap().push(record.clone());

        let announcement = Message::GlobalNodeFailover(GlobalNodeFailoverMessage {
            record: record.clone(),
            timestamp: now_ts(),
        });
        self.registry
            .broadcast_type(NodeType::GlobalNode, &announcement, None);

        info!(
            failed = %failed,
            backup = %backup,
            tasks = affected.len(),
            reason,
            "Failover completed"
        );
        Ok(record)
    }

    /// A coordinator elsewhere completed a failover; keep the audit trail.
    pub fn record_remote_failover(&self, record: FailoverRecord) {
        self.failovers.lock().unwrap().push(record);
    }

    /// Explicit disconnect: mark offline, note the issue, fail over, then
    /// drop the node from all coordinator tables.
    pub fn remove_node(&self, peer_id: &PeerId) {
        let was_tracked = match self.health.get_mut(peer_id) {
            Some(mut entry) => {
                entry.status = HealthStatus::Offline;
                entry.record_issue("disconnected");
                true
            }
            None => false,
        };
        if !was_tracked {
            return;
        }

        if let Err(e) = self.failover(peer_id, "node disconnected") {
            error!(peer_id = %peer_id, error = %e, "Failover on disconnect aborted");
        }
        self.health.remove(peer_id);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sync cycle
    // ─────────────────────────────────────────────────────────────────────

    /// Assemble a snapshot and push it to every healthy global validator.
    /// Skipped entirely while no validators are tracked.
    pub fn sync_once(&self) {
        if self.health.is_empty() {
            return;
        }

        let snapshot = SyncSnapshot {
            tasks: self.engine.active_tasks(),
            global_validators: self.engine.global_validators(),
            regional_validators: self.engine.regional_validator_ids(),
            metrics: self.metrics.snapshot_json(),
            taken_at: now_ts(),
        };
        let message = Message::SyncRequest(SyncRequestMessage {
            snapshot,
            timestamp: now_ts(),
        });

        for peer_id in self.healthy_validators(None) {
            if let Err(e) = self.registry.send_to(&peer_id, message.clone()) {
                debug!(peer_id = %peer_id, error = %e, "Sync delivery failed");
            }
        }
    }

    /// Merge an incoming snapshot: tasks reconcile last-writer-wins on their
    /// update stamp, validator identities are unioned into tracking.
    pub fn handle_sync(&self, snapshot: SyncSnapshot) {
        let task_count = snapshot.tasks.len();
        for task in snapshot.tasks {
            self.engine.adopt_task(task);
        }
        for validator in snapshot.global_validators {
            self.track(validator);
        }
        debug!(tasks = task_count, "Sync snapshot merged");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::metrics::{HealthThresholds, MetricsRecorder};
    use gridnet_core::{NodeTier, PeerInfo, Task, TaskType};
    use tokio::sync::mpsc;

    struct Harness {
        registry: Arc<PeerRegistry>,
        engine: Arc<TaskEngine>,
        coordinator: Arc<GlobalCoordinator>,
    }

    fn harness(config: CoordinatorConfig) -> Harness {
        let registry = Arc::new(PeerRegistry::new());
        let engine = TaskEngine::new(Arc::clone(&registry), EngineConfig::default());
        let metrics = Arc::new(MetricsRecorder::new(HealthThresholds {
            min_active_ratio: 0.5,
            min_validators: 1,
        }));
        let coordinator = GlobalCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&engine),
            metrics,
            config,
        );
        Harness {
            registry,
            engine,
            coordinator,
        }
    }

    fn global(id: &str) -> PeerInfo {
        PeerInfo::new(id, NodeType::GlobalNode, NodeTier::Feedback, "global")
            .with_token_balance(10_000.0)
    }

    fn add_global(
        harness: &Harness,
        id: &str,
        with_sender: bool,
    ) -> Option<mpsc::Receiver<Message>> {
        let info = global(id);
        let receiver = if with_sender {
            let (tx, rx) = mpsc::channel(64);
            harness.registry.register(info.clone(), Some(tx));
            Some(rx)
        } else {
            harness.registry.register(info.clone(), None);
            None
        };
        harness.engine.register_peer(&info);
        harness.coordinator.track(PeerId::from(id));
        receiver
    }

    #[tokio::test]
    async fn test_failover_reassigns_tasks_and_records_once() {
        let h = harness(CoordinatorConfig::default());
        add_global(&h, "global-a", false);
        add_global(&h, "global-b", false);

        let task = Task::new(TaskType::Train, 200.0, "global-a");
        let task_id = h.engine.broadcast_task(task).unwrap();

        let record = h
            .coordinator
            .failover(&PeerId::from("global-a"), "health degraded below failing threshold")
            .unwrap();

        assert_eq!(record.failed_node, PeerId::from("global-a"));
        assert_eq!(record.backup_node, PeerId::from("global-b"));
        assert_eq!(record.affected_tasks, vec![task_id]);
        assert_eq!(h.coordinator.failover_log().len(), 1);

        let task = h.engine.get_task(&task_id).unwrap();
        assert_eq!(task.global_validator, Some(PeerId::from("global-b")));
    }

    #[tokio::test]
    async fn test_failover_without_backup_aborts_loudly() {
        let h = harness(CoordinatorConfig::default());
        add_global(&h, "global-a", false);

        let result = h.coordinator.failover(&PeerId::from("global-a"), "test");
        assert!(matches!(result, Err(GridError::NoBackupAvailable)));
        assert!(h.coordinator.failover_log().is_empty());
    }

    #[tokio::test]
    async fn test_health_cycle_drives_failover() {
        let config = CoordinatorConfig {
            health_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_millis(10),
            sync_interval: Duration::from_secs(60),
            responsiveness_step: 60.0,
        };
        let h = harness(config);

        // global-a has no connection: every probe fails immediately
        add_global(&h, "global-a", false);
        // global-b stays responsive: its activity stamp is pumped while the
        // probe window is open
        let _rx_b = add_global(&h, "global-b", true);
        let registry = Arc::clone(&h.registry);
        let pump = tokio::spawn(async move {
            for _ in 0..50 {
                registry.mark_activity(&PeerId::from("global-b"));
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        });

        let task = Task::new(TaskType::Train, 200.0, "global-a");
        let task_id = h.engine.broadcast_task(task).unwrap();

        // One failed probe at step 60 drops responsiveness to 40: failing
        h.coordinator.health_check_once().await;
        pump.abort();

        let health: Vec<_> = h.coordinator.tracked_health();
        let a = health
            .iter()
            .find(|x| x.node_id == PeerId::from("global-a"))
            .unwrap();
        assert_eq!(a.status, HealthStatus::Failing);
        assert!(a.issues.iter().any(|i| i == "ping timeout"));

        // Exactly one failover record, pointing at the healthy backup
        let log = h.coordinator.failover_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].backup_node, PeerId::from("global-b"));
        assert_eq!(
            h.engine.get_task(&task_id).unwrap().global_validator,
            Some(PeerId::from("global-b"))
        );

        // A second cycle degrades further but does not fail over again
        h.coordinator.health_check_once().await;
        assert_eq!(h.coordinator.failover_log().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_node_fails_over_and_drops() {
        let h = harness(CoordinatorConfig::default());
        add_global(&h, "global-a", false);
        add_global(&h, "global-b", false);

        h.coordinator.remove_node(&PeerId::from("global-a"));

        assert!(!h.coordinator.is_tracked(&PeerId::from("global-a")));
        assert!(h.coordinator.is_tracked(&PeerId::from("global-b")));
        assert_eq!(h.coordinator.failover_log().len(), 1);
        assert_eq!(
            h.coordinator.failover_log()[0].reason,
            "node disconnected"
        );
    }

    #[tokio::test]
    async fn test_sync_snapshot_merges_tasks_and_validators() {
        let h = harness(CoordinatorConfig::default());
        add_global(&h, "global-a", false);

        let mut foreign = Task::new(TaskType::Validate, 100.0, "global-x");
        foreign.state = gridnet_core::TaskState::Processing;
        let foreign_id = foreign.id;

        h.coordinator.handle_sync(SyncSnapshot {
            tasks: vec![foreign],
            global_validators: vec![PeerId::from("global-x")],
            regional_validators: vec![],
            metrics: serde_json::Value::Null,
            taken_at: now_ts(),
        });

        assert!(h.engine.get_task(&foreign_id).is_some());
        assert!(h.coordinator.is_tracked(&PeerId::from("global-x")));
    }

    #[tokio::test]
    async fn test_received_health_merges_by_recency() {
        let h = harness(CoordinatorConfig::default());
        add_global(&h, "global-a", false);

        let mut newer = GlobalNodeHealth::new(PeerId::from("global-a"));
        newer.status = HealthStatus::Degraded;
        newer.last_check = chrono::Utc::now().timestamp() + 100;
        h.coordinator.receive_health(newer);

        let health = h.coordinator.tracked_health();
        assert_eq!(health[0].status, HealthStatus::Degraded);

        let mut stale = GlobalNodeHealth::new(PeerId::from("global-a"));
        stale.status = HealthStatus::Failing;
        stale.last_check = 0;
        h.coordinator.receive_health(stale);

        let health = h.coordinator.tracked_health();
        assert_eq!(health[0].status, HealthStatus::Degraded);
    }
}
