//! Node configuration.
//!
//! Every knob is environment-sourced with a CLI override; validation runs
//! once at startup and any violation is fatal.

use clap::Parser;
use std::time::Duration;

use gridnet_core::{GridError, NodeTier, NodeType, Result};

/// Gridnet regional node
#[derive(Parser, Debug, Clone)]
#[command(name = "gridnet-node")]
#[command(author, version, about, long_about = None)]
pub struct NodeConfig {
    /// Node identifier; generated when not provided
    #[arg(long, env = "GRIDNET_NODE_ID", default_value = "")]
    pub node_id: String,

    /// Node role: individual, regional_node or global_node
    #[arg(long, env = "GRIDNET_NODE_TYPE", default_value = "regional_node")]
    pub node_type: String,

    /// Capability tier: inference, aggregator, training or feedback
    #[arg(long, env = "GRIDNET_NODE_TIER", default_value = "aggregator")]
    pub node_tier: String,

    /// Geographic region
    #[arg(long, env = "GRIDNET_REGION", default_value = "default")]
    pub region: String,

    /// Token balance backing validator eligibility
    #[arg(long, env = "GRIDNET_TOKEN_BALANCE", default_value = "2000")]
    pub token_balance: f64,

    /// Signaling listen port
    #[arg(long, env = "GRIDNET_PORT", default_value = "7600")]
    pub port: u16,

    /// DHT listen port
    #[arg(long, env = "GRIDNET_DHT_PORT", default_value = "7601")]
    pub dht_port: u16,

    /// HTTP status surface port
    #[arg(long, env = "GRIDNET_HTTP_PORT", default_value = "7602")]
    pub http_port: u16,

    /// Comma-separated DHT bootstrap addresses
    #[arg(long, env = "GRIDNET_BOOTSTRAP", default_value = "")]
    pub bootstrap: String,

    // ─────────────────────────────────────────────────────────────────────
    // DHT parameters
    // ─────────────────────────────────────────────────────────────────────
    #[arg(long, env = "GRIDNET_DHT_REFRESH_SECS", default_value = "30")]
    pub dht_refresh_secs: u64,

    #[arg(long, env = "GRIDNET_DHT_TIMEOUT_SECS", default_value = "5")]
    pub dht_timeout_secs: u64,

    #[arg(long, env = "GRIDNET_DHT_REPLICATION", default_value = "3")]
    pub dht_replication: usize,

    /// Routing-table entries silent longer than this are evicted
    #[arg(long, env = "GRIDNET_DHT_STALENESS_SECS", default_value = "300")]
    pub dht_staleness_secs: i64,

    #[arg(long, env = "GRIDNET_DHT_RECONNECT_ATTEMPTS", default_value = "3")]
    pub dht_reconnect_attempts: u32,

    // ─────────────────────────────────────────────────────────────────────
    // Intervals
    // ─────────────────────────────────────────────────────────────────────
    #[arg(long, env = "GRIDNET_HEALTH_INTERVAL_SECS", default_value = "30")]
    pub health_interval_secs: u64,

    #[arg(long, env = "GRIDNET_PROBE_TIMEOUT_MS", default_value = "3000")]
    pub probe_timeout_ms: u64,

    #[arg(long, env = "GRIDNET_SYNC_INTERVAL_SECS", default_value = "60")]
    pub sync_interval_secs: u64,

    #[arg(long, env = "GRIDNET_CLEANUP_INTERVAL_SECS", default_value = "60")]
    pub cleanup_interval_secs: u64,

    /// Peers silent longer than this are treated as departed
    #[arg(long, env = "GRIDNET_PEER_TIMEOUT_SECS", default_value = "90")]
    pub peer_timeout_secs: u64,

    /// Liveness ping cadence
    #[arg(long, env = "GRIDNET_PROBE_INTERVAL_SECS", default_value = "20")]
    pub probe_interval_secs: u64,

    #[arg(long, env = "GRIDNET_METRICS_INTERVAL_SECS", default_value = "15")]
    pub metrics_interval_secs: u64,

    #[arg(long, env = "GRIDNET_BACKUP_INTERVAL_SECS", default_value = "45")]
    pub backup_interval_secs: u64,

    // ─────────────────────────────────────────────────────────────────────
    // Validator thresholds
    // ─────────────────────────────────────────────────────────────────────
    /// Minimum token balance for a regional validator
    #[arg(long, env = "GRIDNET_REGIONAL_TOKEN_THRESHOLD", default_value = "1000")]
    pub regional_token_threshold: f64,

    /// Minimum token balance for a global validator
    #[arg(long, env = "GRIDNET_GLOBAL_TOKEN_THRESHOLD", default_value = "5000")]
    pub global_token_threshold: f64,

    // ─────────────────────────────────────────────────────────────────────
    // Task bounds
    // ─────────────────────────────────────────────────────────────────────
    #[arg(long, env = "GRIDNET_TASK_MIN_DURATION_MS", default_value = "1000")]
    pub task_min_duration_ms: u64,

    #[arg(long, env = "GRIDNET_TASK_MAX_DURATION_MS", default_value = "86400000")]
    pub task_max_duration_ms: u64,

    #[arg(long, env = "GRIDNET_MAX_NODES_PER_TASK", default_value = "16")]
    pub max_nodes_per_task: usize,

    /// Acceptance window before a pending task fails
    #[arg(long, env = "GRIDNET_TASK_TIMEOUT_SECS", default_value = "120")]
    pub task_timeout_secs: u64,

    /// How long terminal tasks are retained before the GC purges them
    #[arg(long, env = "GRIDNET_TASK_RETENTION_SECS", default_value = "3600")]
    pub task_retention_secs: u64,

    // ─────────────────────────────────────────────────────────────────────
    // Health thresholds
    // ─────────────────────────────────────────────────────────────────────
    /// Minimum ratio of online peers for the node to report healthy
    #[arg(long, env = "GRIDNET_MIN_ACTIVE_RATIO", default_value = "0.5")]
    pub min_active_ratio: f64,

    /// Minimum number of registered validators for the node to report healthy
    #[arg(long, env = "GRIDNET_MIN_VALIDATORS", default_value = "1")]
    pub min_validators: usize,
}

impl NodeConfig {
    /// Validate the configuration; any violation aborts startup.
    pub fn validate(&self) -> Result<()> {
        self.node_type.parse::<NodeType>()?;
        self.node_tier.parse::<NodeTier>()?;

        if self.region.trim().is_empty() {
            return Err(GridError::Config("region must not be empty".into()));
        }
        if self.port == 0 || self.dht_port == 0 || self.http_port == 0 {
            return Err(GridError::Config("ports must be non-zero".into()));
        }
        if self.dht_replication == 0 {
            return Err(GridError::Config(
                "dht replication factor must be at least 1".into(),
            ));
        }
        if self.task_min_duration_ms >= self.task_max_duration_ms {
            return Err(GridError::Config(
                "task duration bounds must satisfy min < max".into(),
            ));
        }
        if self.max_nodes_per_task == 0 {
            return Err(GridError::Config("max nodes per task must be positive".into()));
        }
        if self.regional_token_threshold <= 0.0 || self.global_token_threshold <= 0.0 {
            return Err(GridError::Config("token thresholds must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.min_active_ratio) {
            return Err(GridError::Config(
                "min active ratio must lie in [0, 1]".into(),
            ));
        }
        Ok(())
    }

    pub fn parsed_node_type(&self) -> NodeType {
        self.node_type.parse().unwrap_or(NodeType::RegionalNode)
    }

    pub fn parsed_node_tier(&self) -> NodeTier {
        self.node_tier.parse().unwrap_or(NodeTier::Aggregator)
    }

    pub fn bootstrap_addrs(&self) -> Vec<String> {
        self.bootstrap
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn effective_node_id(&self) -> String {
        if self.node_id.is_empty() {
            format!("node-{}", uuid::Uuid::new_v4())
        } else {
            self.node_id.clone()
        }
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }
}
