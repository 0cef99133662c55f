//! Global-validator health records and the failover audit log.

use serde::{Deserialize, Serialize};

use crate::peer::PeerId;
use crate::task::TaskId;

/// Composite health status of a global validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Active,
    Degraded,
    Failing,
    Offline,
}

/// Raw health signals collected for a global validator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMetrics {
    /// Ping responsiveness score (0-100)
    pub responsiveness: f64,

    /// Task completion ratio (0-100)
    pub task_completion: f64,

    /// Last observed probe latency in milliseconds
    pub network_latency: f64,

    /// Average resource load reported by the peer (0-100)
    pub resource_utilization: f64,
}

impl Default for HealthMetrics {
    fn default() -> Self {
        Self {
            responsiveness: 100.0,
            task_completion: 100.0,
            network_latency: 0.0,
            resource_utilization: 0.0,
        }
    }
}

/// Tracked health of a single global validator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalNodeHealth {
    pub node_id: PeerId,

    pub status: HealthStatus,

    /// Unix timestamp of the last completed check
    pub last_check: i64,

    pub metrics: HealthMetrics,

    /// Accumulated issue descriptions, newest last
    pub issues: Vec<String>,
}

impl GlobalNodeHealth {
    pub fn new(node_id: PeerId) -> Self {
        Self {
            node_id,
            status: HealthStatus::Active,
            last_check: chrono::Utc::now().timestamp(),
            metrics: HealthMetrics::default(),
            issues: Vec::new(),
        }
    }

    /// Derive composite status from the current metrics.
    ///
    /// responsiveness < 50 or completion < 50 ⇒ failing;
    /// either < 80 ⇒ degraded; otherwise active.
    pub fn derive_status(&mut self) -> HealthStatus {
        let m = &self.metrics;
        self.status = if m.responsiveness < 50.0 || m.task_completion < 50.0 {
            HealthStatus::Failing
        } else if m.responsiveness < 80.0 || m.task_completion < 80.0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Active
        };
        self.status
    }

    pub fn record_issue(&mut self, issue: impl Into<String>) {
        self.issues.push(issue.into());
    }
}

/// Append-only record of a completed failover
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverRecord {
    pub failed_node: PeerId,
    pub backup_node: PeerId,
    pub affected_tasks: Vec<TaskId>,
    pub timestamp: i64,
    pub reason: String,
}

impl FailoverRecord {
    pub fn new(
        failed_node: PeerId,
        backup_node: PeerId,
        affected_tasks: Vec<TaskId>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            failed_node,
            backup_node,
            affected_tasks,
            timestamp: chrono::Utc::now().timestamp(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_thresholds() {
        let mut health = GlobalNodeHealth::new(PeerId::from("global-1"));
        assert_eq!(health.derive_status(), HealthStatus::Active);

        health.metrics.responsiveness = 70.0;
        assert_eq!(health.derive_status(), HealthStatus::Degraded);

        health.metrics.responsiveness = 40.0;
        assert_eq!(health.derive_status(), HealthStatus::Failing);

        health.metrics.responsiveness = 90.0;
        health.metrics.task_completion = 45.0;
        assert_eq!(health.derive_status(), HealthStatus::Failing);
    }

    #[test]
    fn test_issue_accumulation() {
        let mut health = GlobalNodeHealth::new(PeerId::from("global-1"));
        health.record_issue("ping timeout");
        health.record_issue("ping timeout");
        assert_eq!(health.issues.len(), 2);
    }
}
