//! Transport abstraction for DHT connections.
//!
//! The overlay sends queries through the [`DhtTransport`] trait so it is not
//! coupled to the network layer implementation; the TCP implementation lives
//! here, tests substitute an in-memory mock.
//!
//! Correlation is explicit: every request carries a `request_id` and the
//! connection keeps a pending-request map, so several requests may be in
//! flight on a single connection concurrently.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use gridnet_core::{GridError, Result};
use gridnet_protocol::{DhtMessage, JsonCodec};

/// Events surfaced by a connection to its owner
#[derive(Debug)]
pub enum TransportEvent {
    /// An inbound request arrived; answers go back through `reply`
    Request {
        from_addr: String,
        message: DhtMessage,
        reply: mpsc::Sender<DhtMessage>,
    },
    /// The connection's transport closed
    Disconnected { addr: String },
}

/// A live bidirectional DHT connection
#[async_trait]
pub trait DhtConnection: Send + Sync {
    /// Send a request and await the response matching `request_id`
    async fn request(&self, request_id: u64, message: DhtMessage) -> Result<DhtMessage>;

    /// Fire-and-forget send
    async fn notify(&self, message: DhtMessage) -> Result<()>;

    fn is_open(&self) -> bool;

    fn remote_addr(&self) -> String;

    async fn close(&self);
}

/// Connection factory
#[async_trait]
pub trait DhtTransport: Send + Sync {
    /// Dial an address. Inbound traffic and lifecycle events flow into
    /// `events`.
    async fn connect(
        &self,
        addr: &str,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn DhtConnection>>;
}

// ═══════════════════════════════════════════════════════════════════════════
// TCP implementation
// ═══════════════════════════════════════════════════════════════════════════

/// TCP transport speaking line-delimited JSON
pub struct TcpDhtTransport {
    request_timeout: Duration,
}

impl TcpDhtTransport {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

#[async_trait]
impl DhtTransport for TcpDhtTransport {
    async fn connect(
        &self,
        addr: &str,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn DhtConnection>> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| GridError::ConnectionFailed(format!("{addr}: {e}")))?;
        Ok(spawn_connection(
            stream,
            addr.to_string(),
            events,
            self.request_timeout,
        ))
    }
}

/// Wrap an established stream (dialed or accepted) into a tracked connection
pub fn spawn_connection(
    stream: TcpStream,
    addr: String,
    events: mpsc::Sender<TransportEvent>,
    request_timeout: Duration,
) -> Arc<dyn DhtConnection> {
    let framed = Framed::new(stream, JsonCodec::<DhtMessage>::new());
    let (mut sink, mut source) = framed.split();

    let (out_tx, mut out_rx) = mpsc::channel::<DhtMessage>(64);
    let pending: Arc<DashMap<u64, oneshot::Sender<DhtMessage>>> = Arc::new(DashMap::new());
    let open = Arc::new(AtomicBool::new(true));

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if let Err(e) = sink.send(message).await {
                warn!(error = %e, "DHT send failed, closing writer");
                break;
            }
        }
    });

    let reader = {
        let pending = Arc::clone(&pending);
        let open = Arc::clone(&open);
        let out_tx = out_tx.clone();
        let addr = addr.clone();
        tokio::spawn(async move {
            while let Some(next) = source.next().await {
                match next {
                    Ok(message) => {
                        if message.is_response() {
                            let id = message.request_id().unwrap_or_default();
                            match pending.remove(&id) {
                                Some((_, tx)) => {
                                    let _ = tx.send(message);
                                }
                                None => {
                                    debug!(peer = %addr, request_id = id, "Response with no matching request");
                                }
                            }
                        } else {
                            let event = TransportEvent::Request {
                                from_addr: addr.clone(),
                                message,
                                reply: out_tx.clone(),
                            };
                            if events.send(event).await.is_err() {
                                break; // owner gone
                            }
                        }
                    }
                    Err(e) => {
                        warn!(peer = %addr, error = %e, "DHT protocol error");
                        break;
                    }
                }
            }
            open.store(false, Ordering::SeqCst);
            pending.clear();
            let _ = events.send(TransportEvent::Disconnected { addr }).await;
        })
    };

    Arc::new(TcpConnection {
        addr,
        out_tx,
        pending,
        open,
        request_timeout,
        writer: writer.abort_handle(),
        reader: reader.abort_handle(),
    })
}

struct TcpConnection {
    addr: String,
    out_tx: mpsc::Sender<DhtMessage>,
    pending: Arc<DashMap<u64, oneshot::Sender<DhtMessage>>>,
    open: Arc<AtomicBool>,
    request_timeout: Duration,
    writer: AbortHandle,
    reader: AbortHandle,
}

#[async_trait]
impl DhtConnection for TcpConnection {
    async fn request(&self, request_id: u64, message: DhtMessage) -> Result<DhtMessage> {
        if !self.is_open() {
            return Err(GridError::ConnectionClosed);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, tx);

        if let Err(e) = self.out_tx.send(message).await {
            self.pending.remove(&request_id);
            return Err(GridError::SendFailed(e.to_string()));
        }

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            // Sender dropped: connection torn down while we waited
            Ok(Err(_)) => Err(GridError::ConnectionClosed),
            Err(_) => {
                self.pending.remove(&request_id);
                Err(GridError::RequestTimeout(
                    self.request_timeout.as_millis() as u64
                ))
            }
        }
    }

    async fn notify(&self, message: DhtMessage) -> Result<()> {
        if !self.is_open() {
            return Err(GridError::ConnectionClosed);
        }
        self.out_tx
            .send(message)
            .await
            .map_err(|e| GridError::SendFailed(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn remote_addr(&self) -> String {
        self.addr.clone()
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.reader.abort();
        self.writer.abort();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridnet_protocol::messages::now_ts;
    use tokio::net::TcpListener;

    /// Echo peer answering every findNode with an empty response
    async fn spawn_echo_peer() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, JsonCodec::<DhtMessage>::new());
            while let Some(Ok(message)) = framed.next().await {
                if let Some(request_id) = message.request_id() {
                    let response = DhtMessage::FindNodeResponse {
                        request_id,
                        node: None,
                        timestamp: now_ts(),
                    };
                    if framed.send(response).await.is_err() {
                        break;
                    }
                }
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_request_response_correlation() {
        let addr = spawn_echo_peer().await;
        let (events_tx, _events_rx) = mpsc::channel(16);

        let transport = TcpDhtTransport::new(Duration::from_secs(2));
        let conn = transport.connect(&addr, events_tx).await.unwrap();

        let response = conn
            .request(11, DhtMessage::find_node(11, "node-x"))
            .await
            .unwrap();
        assert_eq!(response.request_id(), Some(11));
        assert!(conn.is_open());

        conn.close().await;
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_connection() {
        let addr = spawn_echo_peer().await;
        let (events_tx, _events_rx) = mpsc::channel(16);

        let transport = TcpDhtTransport::new(Duration::from_secs(2));
        let conn = transport.connect(&addr, events_tx).await.unwrap();

        let (a, b) = tokio::join!(
            conn.request(1, DhtMessage::find_node(1, "a")),
            conn.request(2, DhtMessage::find_node(2, "b")),
        );
        assert_eq!(a.unwrap().request_id(), Some(1));
        assert_eq!(b.unwrap().request_id(), Some(2));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (events_tx, _events_rx) = mpsc::channel(16);
        let transport = TcpDhtTransport::new(Duration::from_secs(1));
        let result = transport.connect("127.0.0.1:1", events_tx).await;
        assert!(matches!(result, Err(GridError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_disconnect_event_on_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let (events_tx, mut events_rx) = mpsc::channel(16);
        let transport = TcpDhtTransport::new(Duration::from_secs(1));
        let _conn = transport.connect(&addr, events_tx).await.unwrap();

        match events_rx.recv().await {
            Some(TransportEvent::Disconnected { .. }) => {}
            other => panic!("expected disconnect event, got {other:?}"),
        }
    }
}
