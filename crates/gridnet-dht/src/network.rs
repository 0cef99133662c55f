//! The DHT overlay network.
//!
//! Maintains a routing table of discovered nodes and a disjoint table of
//! pinned direct connections, serves the DHT message namespace, and runs the
//! periodic refresh cycle: staleness eviction, opportunistic bootstrap
//! top-up, and direct-connection repair.

use dashmap::DashMap;
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use gridnet_core::{GridError, Result};
use gridnet_protocol::dht_messages::PeerQueryFilter;
use gridnet_protocol::messages::now_ts;
use gridnet_protocol::DhtMessage;

use crate::node_info::DhtNodeInfo;
use crate::store::DhtStore;
use crate::transport::{spawn_connection, DhtConnection, DhtTransport, TransportEvent};

/// DHT tuning knobs, environment-sourced by the node config
#[derive(Debug, Clone)]
pub struct DhtConfig {
    pub refresh_interval: Duration,
    pub request_timeout: Duration,
    pub replication_factor: usize,
    /// Routing-table entries silent longer than this are evicted
    pub staleness_secs: i64,
    /// Consecutive failures before a pinned direct connection is dropped
    pub reconnect_attempts: u32,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(5),
            replication_factor: 3,
            staleness_secs: 300,
            reconnect_attempts: 3,
        }
    }
}

/// A tracked node: its descriptor plus the live connection, if any
struct NodeEntry {
    info: DhtNodeInfo,
    conn: Option<Arc<dyn DhtConnection>>,
    /// Consecutive reconnect failures (direct connections only)
    failures: u32,
}

impl NodeEntry {
    fn new(info: DhtNodeInfo, conn: Option<Arc<dyn DhtConnection>>) -> Self {
        Self {
            info,
            conn,
            failures: 0,
        }
    }
}

/// The DHT overlay
pub struct DhtNetwork {
    self_info: DhtNodeInfo,
    bootstrap: Vec<String>,
    config: DhtConfig,
    transport: Arc<dyn DhtTransport>,

    /// Discovered nodes, evicted by staleness
    routing: DashMap<String, NodeEntry>,

    /// Routing-table insertion order, drives replica selection
    order: Mutex<Vec<String>>,

    /// Pinned direct connections, disjoint from the routing table
    direct: DashMap<String, NodeEntry>,

    /// Accepted connections not yet identified with a node id
    inbound: DashMap<String, Arc<dyn DhtConnection>>,

    store: Mutex<DhtStore>,

    connected: AtomicBool,
    request_counter: AtomicU64,

    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl DhtNetwork {
    pub fn new(
        self_info: DhtNodeInfo,
        bootstrap: Vec<String>,
        config: DhtConfig,
        transport: Arc<dyn DhtTransport>,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::channel(256);
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            self_info,
            bootstrap,
            config,
            transport,
            routing: DashMap::new(),
            order: Mutex::new(Vec::new()),
            direct: DashMap::new(),
            inbound: DashMap::new(),
            store: Mutex::new(DhtStore::new()),
            connected: AtomicBool::new(false),
            request_counter: AtomicU64::new(0),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            shutdown_tx,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn node_count(&self) -> usize {
        self.routing.len()
    }

    pub fn direct_count(&self) -> usize {
        self.direct.len()
    }

    fn next_request_id(&self) -> u64 {
        self.request_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Join the overlay: dial every bootstrap address (best effort), mark
    /// connected, start the refresh cycle and repair pinned connections.
    pub async fn join(self: &Arc<Self>) -> Result<()> {
        self.start_event_loop();

        for addr in self.bootstrap.clone() {
            match self.dial_and_identify(&addr).await {
                Ok(node) => {
                    info!(node_id = %node.id, addr = %addr, "Bootstrap connection established");
                }
                Err(e) => {
                    warn!(addr = %addr, error = %e, "Bootstrap connection failed, skipping");
                }
            }
        }

        self.connected.store(true, Ordering::SeqCst);
        self.start_refresh_loop();

        // Re-establish any pinned direct connections from a previous join
        let direct_ids: Vec<String> = self.direct.iter().map(|e| e.key().clone()).collect();
        for id in direct_ids {
            let needs_reconnect = self
                .direct
                .get(&id)
                .map(|e| e.conn.as_ref().map(|c| !c.is_open()).unwrap_or(true))
                .unwrap_or(false);
            if needs_reconnect {
                self.reconnect_direct(&id).await;
            }
        }

        info!(nodes = self.routing.len(), "DHT joined");
        Ok(())
    }

    /// Leave the overlay: notify peers, close everything, clear all state.
    pub async fn leave(&self) {
        let _ = self.shutdown_tx.send(());

        let leave = DhtMessage::leave(self.self_info.id.clone());
        for conn in self.known_connections() {
            if let Err(e) = conn.notify(leave.clone()).await {
                debug!(peer = %conn.remote_addr(), error = %e, "Leave notification failed");
            }
        }

        for entry in self.routing.iter() {
            if let Some(conn) = &entry.conn {
                conn.close().await;
            }
        }
        for entry in self.direct.iter() {
            if let Some(conn) = &entry.conn {
                conn.close().await;
            }
        }
        for conn in self.inbound.iter() {
            conn.close().await;
        }

        self.routing.clear();
        self.direct.clear();
        self.inbound.clear();
        self.order.lock().unwrap().clear();
        self.store.lock().unwrap().clear();
        self.connected.store(false, Ordering::SeqCst);
        info!("DHT left");
    }

    /// Accept inbound DHT connections on the given listener.
    pub fn serve(self: &Arc<Self>, listener: TcpListener) {
        let network = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer_addr)) => {
                                let addr = peer_addr.to_string();
                                debug!(peer = %addr, "Inbound DHT connection");
                                let conn = spawn_connection(
                                    stream,
                                    addr.clone(),
                                    network.events_tx.clone(),
                                    network.config.request_timeout,
                                );
                                network.inbound.insert(addr, conn);
                            }
                            Err(e) => {
                                warn!(error = %e, "DHT accept failed");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    fn start_event_loop(self: &Arc<Self>) {
        let Some(mut events_rx) = self.events_rx.lock().unwrap().take() else {
            return; // already running
        };
        let network = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events_rx.recv() => {
                        match event {
                            Some(event) => network.handle_event(event).await,
                            None => break,
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    fn start_refresh_loop(self: &Arc<Self>) {
        let network = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(network.config.refresh_interval);
            interval.tick().await; // first tick fires immediately
            loop {
                tokio::select! {
                    _ = interval.tick() => network.refresh_once().await,
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    /// One pass of the refresh cycle.
    pub async fn refresh_once(&self) {
        // Evict silent routing-table nodes
        let stale: Vec<String> = self
            .routing
            .iter()
            .filter(|e| e.info.is_stale(self.config.staleness_secs))
            .map(|e| e.key().clone())
            .collect();
        for id in stale {
            if let Some((_, entry)) = self.routing.remove(&id) {
                if let Some(conn) = entry.conn {
                    conn.close().await;
                }
                debug!(node_id = %id, "Evicted stale node");
            }
            self.order.lock().unwrap().retain(|known| known != &id);
        }

        // Top up from a random bootstrap when the table runs low
        if self.routing.len() < 3 && !self.bootstrap.is_empty() {
            let addr = {
                let mut rng = rand::thread_rng();
                self.bootstrap.choose(&mut rng).cloned()
            };
            if let Some(addr) = addr {
                if let Err(e) = self.dial_and_identify(&addr).await {
                    debug!(addr = %addr, error = %e, "Bootstrap top-up failed");
                }
            }
        }

        // Repair pinned direct connections
        let direct_ids: Vec<String> = self
            .direct
            .iter()
            .filter(|e| e.conn.as_ref().map(|c| !c.is_open()).unwrap_or(true))
            .map(|e| e.key().clone())
            .collect();
        for id in direct_ids {
            self.reconnect_direct(&id).await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────────────

    /// Publish our descriptor under `announcement:<selfId>` and broadcast it.
    pub async fn announce(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(GridError::NotConnected);
        }

        let mut descriptor = self.self_info.clone();
        descriptor.touch();

        let key = format!("announcement:{}", self.self_info.id);
        let value = serde_json::to_value(&descriptor)
            .map_err(|e| GridError::Serialization(e.to_string()))?;
        self.store.lock().unwrap().insert(key, value);

        let message = DhtMessage::Announce {
            request_id: self.next_request_id(),
            node: descriptor.to_descriptor(),
            timestamp: now_ts(),
        };
        for conn in self.known_connections() {
            if let Err(e) = conn.notify(message.clone()).await {
                debug!(peer = %conn.remote_addr(), error = %e, "Announce delivery failed");
            }
        }
        Ok(())
    }

    /// Find a node by id: direct table, then routing table, then ask every
    /// known node in turn. Returns the first positive answer.
    pub async fn find_node(&self, id: &str) -> Option<DhtNodeInfo> {
        if let Some(entry) = self.direct.get(id) {
            return Some(entry.info.clone());
        }
        if let Some(entry) = self.routing.get(id) {
            return Some(entry.info.clone());
        }

        for node_id in self.known_ids() {
            let Ok(conn) = self.ensure_connection(&node_id).await else {
                continue;
            };
            let request_id = self.next_request_id();
            match conn
                .request(request_id, DhtMessage::find_node(request_id, id))
                .await
            {
                Ok(DhtMessage::FindNodeResponse {
                    node: Some(descriptor),
                    ..
                }) => {
                    let info = DhtNodeInfo::from_descriptor(&descriptor);
                    self.insert_routing(info.clone(), None);
                    return Some(info);
                }
                Ok(_) => continue,
                Err(e) => {
                    debug!(peer = %node_id, error = %e, "findNode query failed");
                    continue;
                }
            }
        }
        None
    }

    /// Look up a value: local cache first, then peers, caching the first hit.
    pub async fn find_value(&self, key: &str) -> Option<serde_json::Value> {
        if let Some(value) = self.store.lock().unwrap().get(key) {
            return Some(value.clone());
        }

        for node_id in self.known_ids() {
            let Ok(conn) = self.ensure_connection(&node_id).await else {
                continue;
            };
            let request_id = self.next_request_id();
            match conn
                .request(request_id, DhtMessage::find_value(request_id, key))
                .await
            {
                Ok(DhtMessage::FindValueResponse {
                    value: Some(value), ..
                }) => {
                    self.store.lock().unwrap().insert(key.to_string(), value.clone());
                    return Some(value);
                }
                Ok(_) => continue,
                Err(e) => {
                    debug!(peer = %node_id, error = %e, "findValue query failed");
                    continue;
                }
            }
        }
        None
    }

    /// Store a value locally and replicate it to the first R known nodes,
    /// tolerating individual replica failures.
    pub async fn store(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.store
            .lock()
            .unwrap()
            .insert(key.to_string(), value.clone());

        let replicas: Vec<String> = {
            let order = self.order.lock().unwrap();
            order
                .iter()
                .take(self.config.replication_factor)
                .cloned()
                .collect()
        };

        let attempts = replicas.into_iter().map(|node_id| {
            let value = value.clone();
            async move {
                let conn = self.ensure_connection(&node_id).await?;
                let request_id = self.next_request_id();
                conn.request(request_id, DhtMessage::store(request_id, key, value))
                    .await
                    .map(|_| node_id)
            }
        });

        let results = futures::future::join_all(attempts).await;
        let delivered = results.iter().filter(|r| r.is_ok()).count();
        for result in &results {
            if let Err(e) = result {
                debug!(key = %key, error = %e, "Replica delivery failed");
            }
        }
        debug!(key = %key, delivered, "Value stored");
        Ok(())
    }

    /// Discover peers matching an optional filter: local tables merged and
    /// de-duplicated, then augmented by asking every known node for its own
    /// peer list (flooding depth 1).
    pub async fn get_peers(&self, filter: Option<&PeerQueryFilter>) -> Vec<DhtNodeInfo> {
        let mut merged: Vec<DhtNodeInfo> = Vec::new();
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();

        for info in self.local_peers(filter) {
            if seen.insert(info.id.clone()) {
                merged.push(info);
            }
        }

        for node_id in self.known_ids() {
            let Ok(conn) = self.ensure_connection(&node_id).await else {
                continue;
            };
            let request_id = self.next_request_id();
            let query = DhtMessage::get_peers(request_id, filter.cloned());
            match conn.request(request_id, query).await {
                Ok(DhtMessage::GetPeersResponse { peers, .. }) => {
                    for descriptor in peers {
                        if descriptor.id == self.self_info.id || seen.contains(&descriptor.id) {
                            continue;
                        }
                        let info = DhtNodeInfo::from_descriptor(&descriptor);
                        let matches = filter.map(|f| info.matches_filter(f)).unwrap_or(true);
                        if matches {
                            seen.insert(info.id.clone());
                            merged.push(info);
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(peer = %node_id, error = %e, "getPeers query failed");
                }
            }
        }
        merged
    }

    /// Pin a connection outside the bootstrap set. The remote's self-reported
    /// identity wins over the caller-supplied descriptor.
    pub async fn connect_directly(&self, target: DhtNodeInfo) -> Result<DhtNodeInfo> {
        let conn = self
            .transport
            .connect(&target.address, self.events_tx.clone())
            .await?;

        let request_id = self.next_request_id();
        let identity = match conn
            .request(request_id, DhtMessage::info_request(request_id))
            .await?
        {
            DhtMessage::InfoResponse { node, .. } => node,
            other => {
                conn.close().await;
                return Err(GridError::MalformedMessage(format!(
                    "unexpected reply to info_request: {other:?}"
                )));
            }
        };

        let request_id = self.next_request_id();
        let accepted = match conn
            .request(
                request_id,
                DhtMessage::DirectConnect {
                    request_id,
                    node: self.self_info.to_descriptor(),
                    timestamp: now_ts(),
                },
            )
            .await?
        {
            DhtMessage::DirectConnectAck { accepted, .. } => accepted,
            _ => false,
        };
        if !accepted {
            conn.close().await;
            return Err(GridError::ConnectionFailed(format!(
                "direct connect rejected by {}",
                target.address
            )));
        }

        let mut info = DhtNodeInfo::from_descriptor(&identity);
        info.metadata.direct = true;

        // Direct and routing tables stay disjoint
        if self.routing.remove(&info.id).is_some() {
            self.order.lock().unwrap().retain(|id| id != &info.id);
        }
        self.direct
            .insert(info.id.clone(), NodeEntry::new(info.clone(), Some(conn)));
        info!(node_id = %info.id, addr = %info.address, "Direct connection pinned");

        if self.is_connected() {
            if let Err(e) = self.announce().await {
                warn!(error = %e, "Post-connect announce failed");
            }
        }
        Ok(info)
    }

    /// Tear down a pinned direct connection.
    pub async fn disconnect_direct(&self, id: &str) -> Result<()> {
        match self.direct.remove(id) {
            Some((_, entry)) => {
                if let Some(conn) = entry.conn {
                    conn.close().await;
                }
                info!(node_id = %id, "Direct connection dropped");
                Ok(())
            }
            None => Err(GridError::PeerNotFound(id.to_string())),
        }
    }

    /// Snapshot of every known node, direct connections first.
    pub fn known_nodes(&self) -> Vec<DhtNodeInfo> {
        let mut nodes: Vec<DhtNodeInfo> =
            self.direct.iter().map(|e| e.info.clone()).collect();
        nodes.extend(self.routing.iter().map(|e| e.info.clone()));
        nodes
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    async fn dial_and_identify(&self, addr: &str) -> Result<DhtNodeInfo> {
        let conn = self.transport.connect(addr, self.events_tx.clone()).await?;
        let request_id = self.next_request_id();
        match conn
            .request(request_id, DhtMessage::info_request(request_id))
            .await?
        {
            DhtMessage::InfoResponse { node, .. } => {
                let info = DhtNodeInfo::from_descriptor(&node);
                self.insert_routing(info.clone(), Some(conn));
                Ok(info)
            }
            other => {
                conn.close().await;
                Err(GridError::MalformedMessage(format!(
                    "unexpected reply to info_request: {other:?}"
                )))
            }
        }
    }

    fn insert_routing(&self, info: DhtNodeInfo, conn: Option<Arc<dyn DhtConnection>>) {
        if info.id == self.self_info.id {
            return;
        }
        // Pinned nodes are not duplicated into the routing table
        if let Some(mut entry) = self.direct.get_mut(&info.id) {
            entry.info.last_seen = info.last_seen;
            if conn.is_some() {
                entry.conn = conn;
            }
            return;
        }

        match self.routing.get_mut(&info.id) {
            Some(mut entry) => {
                entry.info = info;
                if conn.is_some() {
                    entry.conn = conn;
                }
            }
            None => {
                self.order.lock().unwrap().push(info.id.clone());
                self.routing
                    .insert(info.id.clone(), NodeEntry::new(info, conn));
            }
        }
    }

    /// Known node ids, direct connections first, then routing-table order.
    fn known_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.direct.iter().map(|e| e.key().clone()).collect();
        for id in self.order.lock().unwrap().iter() {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }

    fn known_connections(&self) -> Vec<Arc<dyn DhtConnection>> {
        let mut conns: Vec<Arc<dyn DhtConnection>> = Vec::new();
        for entry in self.direct.iter() {
            if let Some(conn) = &entry.conn {
                if conn.is_open() {
                    conns.push(Arc::clone(conn));
                }
            }
        }
        for entry in self.routing.iter() {
            if let Some(conn) = &entry.conn {
                if conn.is_open() {
                    conns.push(Arc::clone(conn));
                }
            }
        }
        conns
    }

    /// Fetch the live connection for a known node, dialing if necessary.
    async fn ensure_connection(&self, id: &str) -> Result<Arc<dyn DhtConnection>> {
        let existing = self
            .direct
            .get(id)
            .and_then(|e| e.conn.clone())
            .or_else(|| self.routing.get(id).and_then(|e| e.conn.clone()));
        if let Some(conn) = existing {
            if conn.is_open() {
                return Ok(conn);
            }
        }

        let address = self
            .direct
            .get(id)
            .map(|e| e.info.address.clone())
            .or_else(|| self.routing.get(id).map(|e| e.info.address.clone()))
            .ok_or_else(|| GridError::PeerNotFound(id.to_string()))?;

        let conn = self
            .transport
            .connect(&address, self.events_tx.clone())
            .await?;
        if let Some(mut entry) = self.direct.get_mut(id) {
            entry.conn = Some(Arc::clone(&conn));
        } else if let Some(mut entry) = self.routing.get_mut(id) {
            entry.conn = Some(Arc::clone(&conn));
        }
        Ok(conn)
    }

    async fn reconnect_direct(&self, id: &str) {
        let Some(address) = self.direct.get(id).map(|e| e.info.address.clone()) else {
            return;
        };

        let result = async {
            let conn = self
                .transport
                .connect(&address, self.events_tx.clone())
                .await?;
            let request_id = self.next_request_id();
            conn.request(
                request_id,
                DhtMessage::DirectConnect {
                    request_id,
                    node: self.self_info.to_descriptor(),
                    timestamp: now_ts(),
                },
            )
            .await?;
            Ok::<_, GridError>(conn)
        }
        .await;

        match result {
            Ok(conn) => {
                if let Some(mut entry) = self.direct.get_mut(id) {
                    entry.conn = Some(conn);
                    entry.failures = 0;
                    entry.info.touch();
                }
                info!(node_id = %id, "Direct connection re-established");
            }
            Err(e) => {
                let drop_now = match self.direct.get_mut(id) {
                    Some(mut entry) => {
                        entry.failures += 1;
                        entry.failures > self.config.reconnect_attempts
                    }
                    None => false,
                };
                if drop_now {
                    self.direct.remove(id);
                    warn!(node_id = %id, error = %e, "Direct connection dropped after repeated failures");
                } else {
                    debug!(node_id = %id, error = %e, "Direct reconnect failed, will retry");
                }
            }
        }
    }

    /// Local tables merged and filtered, no flooding.
    fn local_peers(&self, filter: Option<&PeerQueryFilter>) -> Vec<DhtNodeInfo> {
        self.known_nodes()
            .into_iter()
            .filter(|info| filter.map(|f| info.matches_filter(f)).unwrap_or(true))
            .collect()
    }

    fn find_conn_by_addr(&self, addr: &str) -> Option<Arc<dyn DhtConnection>> {
        if let Some(conn) = self.inbound.get(addr) {
            return Some(Arc::clone(&conn));
        }
        for entry in self.direct.iter().chain(self.routing.iter()) {
            if let Some(conn) = &entry.conn {
                if conn.remote_addr() == addr {
                    return Some(Arc::clone(conn));
                }
            }
        }
        None
    }

    fn touch_by_addr(&self, addr: &str) {
        for mut entry in self.routing.iter_mut() {
            let matches = entry.info.address == addr
                || entry
                    .conn
                    .as_ref()
                    .map(|c| c.remote_addr() == addr)
                    .unwrap_or(false);
            if matches {
                entry.info.touch();
                return;
            }
        }
        for mut entry in self.direct.iter_mut() {
            let matches = entry.info.address == addr
                || entry
                    .conn
                    .as_ref()
                    .map(|c| c.remote_addr() == addr)
                    .unwrap_or(false);
            if matches {
                entry.info.touch();
                return;
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Inbound dispatch
    // ─────────────────────────────────────────────────────────────────────

    async fn handle_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Request {
                from_addr,
                message,
                reply,
            } => {
                self.touch_by_addr(&from_addr);
                if let Some(response) = self.handle_request(&from_addr, message) {
                    if let Err(e) = reply.send(response).await {
                        debug!(peer = %from_addr, error = %e, "Reply delivery failed");
                    }
                }
            }
            TransportEvent::Disconnected { addr } => {
                self.inbound.remove(&addr);

                // A disconnected routing-table node is simply removed
                let routed: Option<String> = self
                    .routing
                    .iter()
                    .find(|e| e.info.address == addr)
                    .map(|e| e.key().clone());
                if let Some(id) = routed {
                    self.routing.remove(&id);
                    self.order.lock().unwrap().retain(|known| known != &id);
                    debug!(node_id = %id, "Node removed after disconnect");
                }

                // A pinned direct connection gets a reconnection attempt
                let pinned: Option<String> = self
                    .direct
                    .iter()
                    .find(|e| e.info.address == addr)
                    .map(|e| e.key().clone());
                if let Some(id) = pinned {
                    let network = Arc::clone(self);
                    tokio::spawn(async move {
                        network.reconnect_direct(&id).await;
                    });
                }
            }
        }
    }

    fn handle_request(&self, from_addr: &str, message: DhtMessage) -> Option<DhtMessage> {
        match message {
            DhtMessage::FindNode {
                request_id, target, ..
            } => {
                let node = self
                    .direct
                    .get(&target)
                    .map(|e| e.info.to_descriptor())
                    .or_else(|| self.routing.get(&target).map(|e| e.info.to_descriptor()));
                Some(DhtMessage::FindNodeResponse {
                    request_id,
                    node,
                    timestamp: now_ts(),
                })
            }

            DhtMessage::FindValue {
                request_id, key, ..
            } => {
                let value = self.store.lock().unwrap().get(&key).cloned();
                Some(DhtMessage::FindValueResponse {
                    request_id,
                    value,
                    timestamp: now_ts(),
                })
            }

            DhtMessage::Store {
                request_id,
                key,
                value,
                ..
            } => {
                let stored = self.store.lock().unwrap().insert(key, value);
                Some(DhtMessage::StoreResponse {
                    request_id,
                    stored,
                    timestamp: now_ts(),
                })
            }

            DhtMessage::GetPeers {
                request_id, filter, ..
            } => {
                let peers = self
                    .local_peers(filter.as_ref())
                    .iter()
                    .map(|info| info.to_descriptor())
                    .collect();
                Some(DhtMessage::GetPeersResponse {
                    request_id,
                    peers,
                    timestamp: now_ts(),
                })
            }

            DhtMessage::Announce {
                request_id, node, ..
            } => {
                if node.id != self.self_info.id {
                    let info = DhtNodeInfo::from_descriptor(&node);
                    let conn = self.find_conn_by_addr(from_addr);
                    self.insert_routing(info, conn);
                }
                Some(DhtMessage::AnnounceAck {
                    request_id,
                    timestamp: now_ts(),
                })
            }

            DhtMessage::InfoRequest { request_id, .. } => Some(DhtMessage::InfoResponse {
                request_id,
                node: self.self_info.to_descriptor(),
                timestamp: now_ts(),
            }),

            DhtMessage::DirectConnect {
                request_id, node, ..
            } => {
                let accepted = match self.find_conn_by_addr(from_addr) {
                    Some(conn) => {
                        let mut info = DhtNodeInfo::from_descriptor(&node);
                        info.metadata.direct = true;
                        if self.routing.remove(&info.id).is_some() {
                            self.order.lock().unwrap().retain(|id| id != &info.id);
                        }
                        self.inbound.remove(from_addr);
                        self.direct
                            .insert(info.id.clone(), NodeEntry::new(info, Some(conn)));
                        true
                    }
                    None => false,
                };
                Some(DhtMessage::DirectConnectAck {
                    request_id,
                    accepted,
                    timestamp: now_ts(),
                })
            }

            DhtMessage::Leave { node_id, .. } => {
                if self.routing.remove(&node_id).is_some() {
                    self.order.lock().unwrap().retain(|id| id != &node_id);
                }
                self.direct.remove(&node_id);
                debug!(node_id = %node_id, "Node left the overlay");
                None
            }

            other => {
                debug!(message = ?other, "Ignoring unexpected DHT message");
                None
            }
        }
    }
}
