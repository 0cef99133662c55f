//! Passive network-metrics recorder.
//!
//! The router pushes fresh snapshots in on its metrics interval; readers
//! (HTTP surface, sync snapshots) only ever see the last recorded state.

use serde::{Deserialize, Serialize};
use std::sync::RwLock;

use gridnet_core::{NodeType, TaskState};

use crate::engine::TaskEngine;
use crate::registry::PeerRegistry;

/// Aggregate network metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkMetrics {
    pub total_peers: usize,
    pub online_peers: usize,
    pub individuals: usize,
    pub regional_validators: usize,
    pub global_validators: usize,
    pub total_regions: usize,
    pub tasks_pending: usize,
    pub tasks_active: usize,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub total_rewards_distributed: f64,
    pub average_completion_time_ms: f64,
    pub updated_at: i64,
}

/// Health thresholds evaluated against the latest snapshot
#[derive(Debug, Clone, Copy)]
pub struct HealthThresholds {
    pub min_active_ratio: f64,
    pub min_validators: usize,
}

/// Snapshot store the core pushes into
pub struct MetricsRecorder {
    inner: RwLock<NetworkMetrics>,
    thresholds: HealthThresholds,
}

impl MetricsRecorder {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self {
            inner: RwLock::new(NetworkMetrics::default()),
            thresholds,
        }
    }

    /// Recompute the snapshot from current registry and engine state.
    pub fn refresh(&self, registry: &PeerRegistry, engine: &TaskEngine) {
        let tasks = engine.all_tasks();
        let mut pending = 0;
        let mut active = 0;
        let mut completed = 0;
        let mut failed = 0;
        let mut total_time = 0.0;
        for task in &tasks {
            match task.state {
                TaskState::Pending => pending += 1,
                TaskState::Assigned | TaskState::Accepted | TaskState::Processing => active += 1,
                TaskState::Completed => {
                    completed += 1;
                    if let (Some(start), Some(end)) = (task.start_time, task.completion_time) {
                        total_time += (end - start) as f64;
                    }
                }
                TaskState::Failed => failed += 1,
            }
        }

        let snapshot = NetworkMetrics {
            total_peers: registry.peer_count(),
            online_peers: registry.online_count(),
            individuals: registry.count_by_type(NodeType::Individual),
            regional_validators: registry.count_by_type(NodeType::RegionalNode),
            global_validators: registry.count_by_type(NodeType::GlobalNode),
            total_regions: registry.all_regions().len(),
            tasks_pending: pending,
            tasks_active: active,
            tasks_completed: completed,
            tasks_failed: failed,
            total_rewards_distributed: engine.total_rewards_distributed(),
            average_completion_time_ms: if completed > 0 {
                total_time / completed as f64
            } else {
                0.0
            },
            updated_at: chrono::Utc::now().timestamp(),
        };

        *self.inner.write().unwrap() = snapshot;
    }

    pub fn snapshot(&self) -> NetworkMetrics {
        self.inner.read().unwrap().clone()
    }

    pub fn snapshot_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or_default()
    }

    /// Evaluate the health thresholds against the last snapshot.
    pub fn is_healthy(&self) -> bool {
        let snapshot = self.snapshot();
        if snapshot.total_peers == 0 {
            // An empty network is idle, not unhealthy
            return true;
        }
        let active_ratio = snapshot.online_peers as f64 / snapshot.total_peers as f64;
        let validators = snapshot.regional_validators + snapshot.global_validators;
        active_ratio >= self.thresholds.min_active_ratio
            && validators >= self.thresholds.min_validators
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use gridnet_core::{NodeTier, PeerInfo};
    use std::sync::Arc;

    fn recorder() -> MetricsRecorder {
        MetricsRecorder::new(HealthThresholds {
            min_active_ratio: 0.5,
            min_validators: 1,
        })
    }

    #[test]
    fn test_empty_network_is_healthy() {
        assert!(recorder().is_healthy());
    }

    #[test]
    fn test_refresh_counts_peers() {
        let registry = Arc::new(PeerRegistry::new());
        let engine = TaskEngine::new(Arc::clone(&registry), EngineConfig::default());
        registry.register(
            PeerInfo::new("w1", NodeType::Individual, NodeTier::Inference, "eu-west"),
            None,
        );
        registry.register(
            PeerInfo::new("v1", NodeType::RegionalNode, NodeTier::Aggregator, "eu-west")
                .with_token_balance(2000.0),
            None,
        );

        let metrics = recorder();
        metrics.refresh(&registry, &engine);
        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.total_peers, 2);
        assert_eq!(snapshot.individuals, 1);
        assert_eq!(snapshot.regional_validators, 1);
        assert_eq!(snapshot.total_regions, 1);
        assert!(metrics.is_healthy());
    }
}
