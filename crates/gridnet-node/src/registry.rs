//! Peer and region registry.
//!
//! A flat peer store keyed by id, with an auxiliary index from region to
//! member ids; region aggregates live beside it. All mutation goes through
//! registry methods so iteration and removal stay consistent.

use dashmap::DashMap;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use gridnet_core::{GridError, NodeType, PeerId, PeerInfo, PeerStatus, Region, Result};
use gridnet_protocol::Message;

/// Registry lifecycle events
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    PeerJoined(PeerId),
    PeerLeft(PeerId),
    PeerTimeout(PeerId),
}

/// A registered peer: identity, live status and its outbound handle
pub struct PeerEntry {
    pub info: PeerInfo,
    pub status: PeerStatus,
    /// Push handle into the peer's connection writer; absent in tests
    sender: Option<mpsc::Sender<Message>>,
    pub connected_at: Instant,
    pub last_activity: Instant,
}

impl PeerEntry {
    fn new(info: PeerInfo, sender: Option<mpsc::Sender<Message>>) -> Self {
        let now = Instant::now();
        Self {
            info,
            status: PeerStatus::online_now(),
            sender,
            connected_at: now,
            last_activity: now,
        }
    }
}

/// Peer registry with region aggregates
pub struct PeerRegistry {
    peers: DashMap<PeerId, PeerEntry>,

    /// Region name → member peer ids
    region_index: DashMap<String, HashSet<PeerId>>,

    /// Region aggregates, created lazily, never destroyed
    regions: DashMap<String, Region>,

    event_tx: broadcast::Sender<RegistryEvent>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            peers: DashMap::new(),
            region_index: DashMap::new(),
            regions: DashMap::new(),
            event_tx,
        }
    }

    /// Subscribe to registry events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_tx.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Membership
    // ─────────────────────────────────────────────────────────────────────

    /// Register a peer built from a successful join handshake.
    pub fn register(&self, info: PeerInfo, sender: Option<mpsc::Sender<Message>>) -> PeerId {
        let peer_id = info.peer_id.clone();
        let region = info.region.clone();
        let is_validator = info.is_validator();

        self.region_index
            .entry(region.clone())
            .or_default()
            .insert(peer_id.clone());
        self.regions
            .entry(region.clone())
            .or_insert_with(|| Region::new(region.clone()))
            .add_member(peer_id.clone(), is_validator);
        self.peers
            .insert(peer_id.clone(), PeerEntry::new(info, sender));

        info!(peer_id = %peer_id, region = %region, "Peer registered");
        let _ = self.event_tx.send(RegistryEvent::PeerJoined(peer_id.clone()));
        peer_id
    }

    /// Remove a peer, deregistering it from its region.
    pub fn unregister(&self, peer_id: &PeerId) -> Option<PeerInfo> {
        let (_, entry) = self.peers.remove(peer_id)?;
        let region = entry.info.region.clone();

        if let Some(mut members) = self.region_index.get_mut(&region) {
            members.remove(peer_id);
        }
        if let Some(mut aggregate) = self.regions.get_mut(&region) {
            aggregate.remove_member(peer_id);
        }

        info!(
            peer_id = %peer_id,
            region = %region,
            connected_for = ?entry.connected_at.elapsed(),
            "Peer unregistered"
        );
        let _ = self.event_tx.send(RegistryEvent::PeerLeft(peer_id.clone()));
        Some(entry.info)
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<PeerInfo> {
        self.peers.get(peer_id).map(|e| e.info.clone())
    }

    pub fn status(&self, peer_id: &PeerId) -> Option<PeerStatus> {
        self.peers.get(peer_id).map(|e| e.status.clone())
    }

    pub fn is_online(&self, peer_id: &PeerId) -> bool {
        self.peers
            .get(peer_id)
            .map(|e| e.status.online)
            .unwrap_or(false)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Status & activity
    // ─────────────────────────────────────────────────────────────────────

    /// Replace the live status record from a status/heartbeat message.
    pub fn update_status(&self, peer_id: &PeerId, mut status: PeerStatus) -> bool {
        match self.peers.get_mut(peer_id) {
            Some(mut entry) => {
                status.touch();
                entry.status = status;
                entry.last_activity = Instant::now();
                true
            }
            None => {
                warn!(peer_id = %peer_id, "Status update from unknown peer");
                false
            }
        }
    }

    /// Refresh the last-activity stamp; called on every inbound message.
    pub fn mark_activity(&self, peer_id: &PeerId) {
        if let Some(mut entry) = self.peers.get_mut(peer_id) {
            entry.last_activity = Instant::now();
        }
    }

    /// Whether the peer has shown activity at or after the given instant.
    pub fn activity_since(&self, peer_id: &PeerId, since: Instant) -> bool {
        self.peers
            .get(peer_id)
            .map(|e| e.last_activity >= since)
            .unwrap_or(false)
    }

    pub fn last_activity(&self, peer_id: &PeerId) -> Option<Instant> {
        self.peers.get(peer_id).map(|e| e.last_activity)
    }

    /// Peers silent beyond the timeout window.
    pub fn stale_peers(&self, timeout: Duration) -> Vec<PeerId> {
        let stale: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|e| e.last_activity.elapsed() > timeout)
            .map(|e| e.key().clone())
            .collect();
        for peer_id in &stale {
            let _ = self.event_tx.send(RegistryEvent::PeerTimeout(peer_id.clone()));
        }
        stale
    }

    /// Credit a payout into the peer's status record.
    pub fn record_earnings(&self, peer_id: &PeerId, amount: f64) {
        if let Some(mut entry) = self.peers.get_mut(peer_id) {
            entry.status.earnings += amount;
        }
    }

    pub fn add_active_task(&self, peer_id: &PeerId) {
        if let Some(mut entry) = self.peers.get_mut(peer_id) {
            entry.status.active_tasks += 1;
        }
    }

    pub fn finish_task(&self, peer_id: &PeerId, completed: bool) {
        if let Some(mut entry) = self.peers.get_mut(peer_id) {
            entry.status.active_tasks = entry.status.active_tasks.saturating_sub(1);
            if completed {
                entry.status.completed_tasks += 1;
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Messaging
    // ─────────────────────────────────────────────────────────────────────

    /// Push a message to a peer's connection.
    pub fn send_to(&self, peer_id: &PeerId, message: Message) -> Result<()> {
        let entry = self
            .peers
            .get(peer_id)
            .ok_or_else(|| GridError::PeerNotFound(peer_id.to_string()))?;
        let sender = entry
            .sender
            .as_ref()
            .ok_or(GridError::ConnectionClosed)?;
        sender
            .try_send(message)
            .map_err(|e| GridError::SendFailed(e.to_string()))
    }

    /// Broadcast to every peer in a region, optionally excluding one.
    /// Individual failures are logged and skipped.
    pub fn broadcast_region(&self, region: &str, message: &Message, exclude: Option<&PeerId>) {
        let targets: Vec<PeerId> = match self.region_index.get(region) {
            Some(members) => members
                .iter()
                .filter(|id| exclude.map(|ex| ex != *id).unwrap_or(true))
                .cloned()
                .collect(),
            None => return,
        };
        for peer_id in targets {
            if let Err(e) = self.send_to(&peer_id, message.clone()) {
                debug!(peer_id = %peer_id, error = %e, "Region broadcast delivery failed");
            }
        }
    }

    /// Broadcast to every peer of a given role.
    pub fn broadcast_type(&self, node_type: NodeType, message: &Message, exclude: Option<&PeerId>) {
        let targets: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|e| e.info.node_type == node_type)
            .filter(|e| exclude.map(|ex| ex != e.key()).unwrap_or(true))
            .map(|e| e.key().clone())
            .collect();
        for peer_id in targets {
            if let Err(e) = self.send_to(&peer_id, message.clone()) {
                debug!(peer_id = %peer_id, error = %e, "Type broadcast delivery failed");
            }
        }
    }

    /// Broadcast to every registered peer.
    pub fn broadcast_all(&self, message: &Message) {
        let targets: Vec<PeerId> = self.peers.iter().map(|e| e.key().clone()).collect();
        for peer_id in targets {
            if let Err(e) = self.send_to(&peer_id, message.clone()) {
                debug!(peer_id = %peer_id, error = %e, "Broadcast delivery failed");
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Read API
    // ─────────────────────────────────────────────────────────────────────

    pub fn all_peers(&self) -> Vec<PeerInfo> {
        self.peers.iter().map(|e| e.info.clone()).collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn online_count(&self) -> usize {
        self.peers.iter().filter(|e| e.status.online).count()
    }

    pub fn count_by_type(&self, node_type: NodeType) -> usize {
        self.peers
            .iter()
            .filter(|e| e.info.node_type == node_type)
            .count()
    }

    pub fn peers_of_type(&self, node_type: NodeType) -> Vec<PeerInfo> {
        self.peers
            .iter()
            .filter(|e| e.info.node_type == node_type)
            .map(|e| e.info.clone())
            .collect()
    }

    pub fn peers_in_region(&self, region: &str) -> Vec<PeerInfo> {
        match self.region_index.get(region) {
            Some(members) => members
                .iter()
                .filter_map(|id| self.get(id))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn validators_in_region(&self, region: &str) -> Vec<PeerInfo> {
        self.peers_in_region(region)
            .into_iter()
            .filter(|info| info.is_validator())
            .collect()
    }

    pub fn region(&self, name: &str) -> Option<Region> {
        self.regions.get(name).map(|r| r.clone())
    }

    pub fn all_regions(&self) -> Vec<Region> {
        self.regions.iter().map(|r| r.clone()).collect()
    }

    pub fn region_names(&self) -> Vec<String> {
        self.regions.iter().map(|r| r.key().clone()).collect()
    }

    /// Fold a finished task into its region's rolling metrics.
    pub fn record_region_task(
        &self,
        region: &str,
        completed: bool,
        reward: f64,
        completion_time_ms: f64,
    ) {
        if let Some(mut aggregate) = self.regions.get_mut(region) {
            aggregate.record_task(completed, reward, completion_time_ms);
        }
    }

    /// Peer snapshots for the network-state message.
    pub fn snapshots(&self) -> Vec<gridnet_protocol::messages::PeerSnapshot> {
        self.peers
            .iter()
            .map(|e| gridnet_protocol::messages::PeerSnapshot {
                info: e.info.clone(),
                status: e.status.clone(),
            })
            .collect()
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
