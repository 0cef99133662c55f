//! Region aggregates.
//!
//! A region is created lazily when the first peer joins from it and is never
//! explicitly destroyed; an empty region is acceptable garbage in an
//! in-memory cache.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::peer::PeerId;

/// Operational status of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionStatus {
    Active,
    Degraded,
    Offline,
}

/// Rolling per-region metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionMetrics {
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub active_nodes: usize,
    pub total_rewards: f64,
    pub average_completion_time: f64,
    pub success_rate: f64,
}

/// A geographic region and its membership
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    /// Region identifier (also its display name)
    pub name: String,

    /// All member peer ids
    pub members: HashSet<PeerId>,

    /// Non-individual members acting as validators
    pub validators: HashSet<PeerId>,

    pub metrics: RegionMetrics,

    pub status: RegionStatus,
}

impl Region {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: HashSet::new(),
            validators: HashSet::new(),
            metrics: RegionMetrics::default(),
            status: RegionStatus::Active,
        }
    }

    /// Add a member; validators are tracked separately as well
    pub fn add_member(&mut self, peer_id: PeerId, is_validator: bool) {
        if is_validator {
            self.validators.insert(peer_id.clone());
        }
        self.members.insert(peer_id);
        self.metrics.active_nodes = self.members.len();
    }

    pub fn remove_member(&mut self, peer_id: &PeerId) {
        self.members.remove(peer_id);
        self.validators.remove(peer_id);
        self.metrics.active_nodes = self.members.len();
        if self.members.is_empty() {
            self.status = RegionStatus::Offline;
        }
    }

    /// Fold a finished task into the rolling metrics
    pub fn record_task(&mut self, completed: bool, reward: f64, completion_time_ms: f64) {
        self.metrics.total_tasks += 1;
        if completed {
            let done = self.metrics.completed_tasks as f64;
            self.metrics.average_completion_time =
                (self.metrics.average_completion_time * done + completion_time_ms) / (done + 1.0);
            self.metrics.completed_tasks += 1;
            self.metrics.total_rewards += reward;
        }
        self.metrics.success_rate =
            self.metrics.completed_tasks as f64 / self.metrics.total_tasks as f64 * 100.0;
    }
}
