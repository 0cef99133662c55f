//! Connection and message router.
//!
//! Turns raw bidirectional connections into registered peers: validates join
//! handshakes against role eligibility, maintains the peer/region registry,
//! dispatches task-lifecycle messages into the engine with sender role
//! checks, and runs the periodic liveness, inactivity and metrics duties.

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use gridnet_core::{GridError, NodeTier, NodeType, PeerId, PeerInfo, Result};
use gridnet_protocol::messages::{
    now_ts, JoinMessage, Message, NetworkStateMessage, PeerJoinedMessage, PeerLeftMessage,
};
use gridnet_protocol::JsonCodec;

use crate::config::NodeConfig;
use crate::coordinator::GlobalCoordinator;
use crate::engine::TaskEngine;
use crate::metrics::MetricsRecorder;
use crate::registry::PeerRegistry;

/// The signaling router
pub struct SignalingRouter {
    registry: Arc<PeerRegistry>,
    engine: Arc<TaskEngine>,
    coordinator: Arc<GlobalCoordinator>,
    metrics: Arc<MetricsRecorder>,
    config: NodeConfig,
    shutdown_tx: broadcast::Sender<()>,
}

impl SignalingRouter {
    pub fn new(
        registry: Arc<PeerRegistry>,
        engine: Arc<TaskEngine>,
        coordinator: Arc<GlobalCoordinator>,
        metrics: Arc<MetricsRecorder>,
        config: NodeConfig,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            registry,
            engine,
            coordinator,
            metrics,
            config,
            shutdown_tx,
        })
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Accept connections and run the periodic duties until shutdown.
    pub fn run(self: &Arc<Self>, listener: TcpListener) {
        self.start_sweeps();

        let router = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer_addr)) => {
                                debug!(peer = %peer_addr, "Inbound signaling connection");
                                let router = Arc::clone(&router);
                                tokio::spawn(async move {
                                    router.handle_connection(stream).await;
                                });
                            }
                            Err(e) => warn!(error = %e, "Signaling accept failed"),
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    /// Drive one peer connection to completion.
    pub async fn handle_connection<S>(self: Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let framed = Framed::new(stream, JsonCodec::<Message>::new());
        let (mut sink, mut source) = framed.split();

        let (tx, mut rx) = mpsc::channel::<Message>(64);
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
        });

        let mut peer_id: Option<PeerId> = None;

        while let Some(next) = source.next().await {
            match next {
                Ok(message) => {
                    if let Some(id) = &peer_id {
                        self.registry.mark_activity(id);
                    }
                    let leaving = matches!(message, Message::Leave(_));
                    if let Some(response) = self.process_message(message, &mut peer_id, &tx) {
                        if tx.send(response).await.is_err() {
                            break;
                        }
                    }
                    if leaving {
                        break;
                    }
                }
                Err(e) => {
                    // Protocol errors are answered, never fatal to the
                    // connection
                    warn!(error = %e, "Protocol error on signaling connection");
                    let reply = Message::error(format!("protocol error: {e}"));
                    if tx.send(reply).await.is_err() {
                        break;
                    }
                }
            }
        }

        // Disconnect is an implicit leave for a registered peer
        if let Some(id) = peer_id {
            if self.registry.contains(&id) {
                self.handle_peer_departure(&id);
            }
        }
        writer.abort();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Dispatch
    // ─────────────────────────────────────────────────────────────────────

    fn process_message(
        &self,
        message: Message,
        peer_id: &mut Option<PeerId>,
        tx: &mpsc::Sender<Message>,
    ) -> Option<Message> {
        // Join is the only message accepted before registration
        let Some(sender) = peer_id.clone() else {
            return match message {
                Message::Join(join) => self.handle_join(join, peer_id, tx),
                other => {
                    debug!(message_type = other.type_name(), "Message before join");
                    Some(Message::error("join required before any other message"))
                }
            };
        };

        match message {
            Message::Join(_) => Some(Message::error("already joined")),

            Message::Leave(_) => {
                self.handle_peer_departure(&sender);
                None
            }

            Message::NodeStatus(msg) => {
                self.registry
                    .update_status(&sender, msg.status.into_status());
                None
            }

            Message::Ping(_) => Some(Message::pong()),
            Message::Pong(_) => None, // activity already marked

            // ─────────────────────────────────────────────────────────────
            // Task lifecycle, role-checked against the sender
            // ─────────────────────────────────────────────────────────────
            Message::TaskBroadcast(msg) => {
                if let Err(e) = self.require_role(&sender, NodeType::GlobalNode) {
                    return Some(Message::error(e.to_string()));
                }
                match self.engine.broadcast_task(msg.task) {
                    Ok(task_id) => {
                        debug!(task_id = %task_id, submitter = %sender, "Task broadcast accepted");
                        None
                    }
                    Err(e) => Some(Message::error(e.to_string())),
                }
            }

            Message::TaskAccepted(msg) => self
                .engine
                .accept_task(msg.task_id, &sender)
                .err()
                .map(|e| Message::error(e.to_string())),

            Message::TaskCompleted(msg) => self
                .engine
                .complete_task(msg.task_id, &sender, msg.result)
                .err()
                .map(|e| Message::error(e.to_string())),

            Message::TaskFailed(msg) => self
                .engine
                .node_failure(msg.task_id, &sender, &msg.reason)
                .err()
                .map(|e| Message::error(e.to_string())),

            Message::TaskProgress(msg) => self
                .engine
                .update_progress(msg.task_id, msg.progress)
                .err()
                .map(|e| Message::error(e.to_string())),

            // ─────────────────────────────────────────────────────────────
            // Coordination traffic from global validators
            // ─────────────────────────────────────────────────────────────
            Message::GlobalNodeHealth(msg) => {
                if let Err(e) = self.require_role(&sender, NodeType::GlobalNode) {
                    return Some(Message::error(e.to_string()));
                }
                self.coordinator.receive_health(msg.health);
                None
            }

            Message::SyncRequest(msg) => {
                if let Err(e) = self.require_role(&sender, NodeType::GlobalNode) {
                    return Some(Message::error(e.to_string()));
                }
                self.coordinator.handle_sync(msg.snapshot);
                None
            }

            Message::TaskBackup(msg) => {
                if let Err(e) = self.require_role(&sender, NodeType::GlobalNode) {
                    return Some(Message::error(e.to_string()));
                }
                self.engine.adopt_task(msg.task);
                None
            }

            Message::TaskRecovery(msg) => {
                if let Err(e) = self.require_role(&sender, NodeType::GlobalNode) {
                    return Some(Message::error(e.to_string()));
                }
                self.engine.adopt_task(msg.task);
                None
            }

            Message::TaskReassignment(msg) => {
                if let Err(e) = self.require_role(&sender, NodeType::GlobalNode) {
                    return Some(Message::error(e.to_string()));
                }
                self.engine
                    .reassign_global(msg.task_id, &msg.new_validator, msg.backup_validators)
                    .err()
                    .map(|e| Message::error(e.to_string()))
            }

            Message::GlobalNodeFailover(msg) => {
                if let Err(e) = self.require_role(&sender, NodeType::GlobalNode) {
                    return Some(Message::error(e.to_string()));
                }
                self.coordinator.record_remote_failover(msg.record);
                None
            }

            Message::Error(msg) => {
                warn!(peer_id = %sender, message = %msg.message, "Error from peer");
                None
            }

            // Server-to-peer notices have no business arriving inbound
            other => {
                debug!(message_type = other.type_name(), "Unexpected inbound message");
                Some(Message::error(format!(
                    "unexpected message type: {}",
                    other.type_name()
                )))
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Join / leave
    // ─────────────────────────────────────────────────────────────────────

    fn handle_join(
        &self,
        join: JoinMessage,
        peer_id: &mut Option<PeerId>,
        tx: &mpsc::Sender<Message>,
    ) -> Option<Message> {
        if let Err(e) = self.check_join_eligibility(&join) {
            info!(peer_id = %join.peer_id, error = %e, "Join rejected");
            return Some(Message::error(e.to_string()));
        }

        let info = PeerInfo::new(
            join.peer_id.clone(),
            join.node_type,
            join.node_tier,
            join.region.clone(),
        )
        .with_token_balance(join.token_balance);

        self.registry.register(info.clone(), Some(tx.clone()));
        self.engine.register_peer(&info);
        if info.node_type == NodeType::GlobalNode {
            self.coordinator.track(info.peer_id.clone());
        }
        *peer_id = Some(info.peer_id.clone());

        self.metrics.refresh(&self.registry, &self.engine);

        // Same-region peers learn about the newcomer; the snapshot goes to
        // the newcomer alone
        let notice = Message::PeerJoined(PeerJoinedMessage {
            peer: info.clone(),
            timestamp: now_ts(),
        });
        self.registry
            .broadcast_region(&join.region, &notice, Some(&info.peer_id));

        Some(self.network_state_message())
    }

    /// Role eligibility: non-individual peers need the tier and stake for
    /// the validator role they request.
    fn check_join_eligibility(&self, join: &JoinMessage) -> Result<()> {
        match join.node_type {
            NodeType::Individual => Ok(()),
            NodeType::RegionalNode => {
                let tier_ok =
                    matches!(join.node_tier, NodeTier::Aggregator | NodeTier::Training);
                if !tier_ok {
                    return Err(GridError::NotEligible {
                        peer_id: join.peer_id.to_string(),
                        reason: format!(
                            "tier {} cannot act as a regional validator",
                            join.node_tier
                        ),
                    });
                }
                if join.token_balance < self.config.regional_token_threshold {
                    return Err(GridError::NotEligible {
                        peer_id: join.peer_id.to_string(),
                        reason: format!(
                            "token balance {} below the regional threshold {}",
                            join.token_balance, self.config.regional_token_threshold
                        ),
                    });
                }
                Ok(())
            }
            NodeType::GlobalNode => {
                let tier_ok = matches!(join.node_tier, NodeTier::Training | NodeTier::Feedback);
                if !tier_ok {
                    return Err(GridError::NotEligible {
                        peer_id: join.peer_id.to_string(),
                        reason: format!(
                            "tier {} cannot act as a global validator",
                            join.node_tier
                        ),
                    });
                }
                if join.token_balance < self.config.global_token_threshold {
                    return Err(GridError::NotEligible {
                        peer_id: join.peer_id.to_string(),
                        reason: format!(
                            "token balance {} below the global threshold {}",
                            join.token_balance, self.config.global_token_threshold
                        ),
                    });
                }
                Ok(())
            }
        }
    }

    /// Deregister a peer everywhere and tell its region.
    fn handle_peer_departure(&self, peer_id: &PeerId) {
        let Some(info) = self.registry.get(peer_id) else {
            return;
        };

        self.engine.handle_disconnect(peer_id);
        self.engine.unregister_peer(peer_id);
        if info.node_type == NodeType::GlobalNode {
            self.coordinator.remove_node(peer_id);
        }
        self.registry.unregister(peer_id);
        self.metrics.refresh(&self.registry, &self.engine);

        let notice = Message::PeerLeft(PeerLeftMessage {
            peer_id: peer_id.clone(),
            region: info.region.clone(),
            timestamp: now_ts(),
        });
        self.registry.broadcast_region(&info.region, &notice, None);
    }

    fn require_role(&self, peer_id: &PeerId, expected: NodeType) -> Result<()> {
        let info = self
            .registry
            .get(peer_id)
            .ok_or_else(|| GridError::PeerNotFound(peer_id.to_string()))?;
        if info.node_type != expected {
            return Err(GridError::NotEligible {
                peer_id: peer_id.to_string(),
                reason: format!("message requires role {expected}, sender is {}", info.node_type),
            });
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Periodic duties
    // ─────────────────────────────────────────────────────────────────────

    fn start_sweeps(self: &Arc<Self>) {
        // Liveness probes to every open connection
        let router = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(router.config.probe_interval_secs));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        router.registry.broadcast_all(&Message::ping());
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        // Inactivity sweep: silence beyond the window is an implicit leave
        let router = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(router.config.probe_interval_secs));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for peer_id in router.registry.stale_peers(router.config.peer_timeout()) {
                            info!(peer_id = %peer_id, "Peer timed out, treating as leave");
                            router.handle_peer_departure(&peer_id);
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        // Metrics snapshot refresh
        let router = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
                router.config.metrics_interval_secs,
            ));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        router.metrics.refresh(&router.registry, &router.engine);
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    // ─────────────────────────────────────────────────────────────────────
    // Read API
    // ─────────────────────────────────────────────────────────────────────

    pub fn network_state_message(&self) -> Message {
        Message::NetworkState(NetworkStateMessage {
            peers: self.registry.snapshots(),
            regions: self.registry.all_regions(),
            metrics: self.metrics.snapshot_json(),
            timestamp: now_ts(),
        })
    }
}
