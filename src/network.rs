/// Wire messages, subjects, and transport for the replicated host inventory.
///
/// This module owns two things: the four wire message types the gossip
/// engine exchanges (`InternalHostEvent`, `InternalHostRemovedEvent`,
/// `HostAntiEntropyAdvertisement`, `HostFragmentId`), and a `Transport`
/// trait describing the subject-based pub/sub the cluster layer is
/// expected to provide. The trait is the out-of-scope "consumed
/// interface" from the design; `TcpTransport` is a minimal concrete
/// implementation adapted from the length-prefixed JSON framing used
/// elsewhere in this codebase, sufficient for local demos and tests.
use crate::clock::Timestamp;
use crate::error::{HostMeshError, HostMeshResult};
use crate::types::{HostDescription, HostId, ProviderId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Default port for HostMesh cluster communication.
pub const DEFAULT_PORT: u16 = 7979;

/// Maximum message size (16 MB), matching the framing limit used for the
/// rest of this codebase's wire protocols.
const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// The subject an `InternalHostEvent` is published on.
pub const HOST_UPDATED: &str = "HOST_UPDATED";
/// The subject an `InternalHostRemovedEvent` is published on.
pub const HOST_REMOVED: &str = "HOST_REMOVED";
/// The subject a `HostAntiEntropyAdvertisement` is published on.
pub const HOST_ANTI_ENTROPY_ADVERTISEMENT: &str = "HOST_ANTI_ENTROPY_ADVERTISEMENT";

/// Unique identifier for a controller node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Keys an anti-entropy advertisement entry by `(hostId, providerId)`, so
/// that a future multi-provider deployment can advertise per-provider
/// timestamps without changing the wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostFragmentId {
    pub host_id: HostId,
    pub provider_id: ProviderId,
}

/// Full update, broadcast on `HOST_UPDATED` after a local
/// create-or-update, and the payload anti-entropy pushes when it finds a
/// peer is behind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalHostEvent {
    pub provider_id: ProviderId,
    pub host_id: HostId,
    pub host_description: HostDescription,
    pub timestamp: Timestamp,
}

/// Deletion notice, broadcast on `HOST_REMOVED` after a local remove, and
/// the payload anti-entropy pushes for a zombie or a remote-ahead
/// tombstone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalHostRemovedEvent {
    pub host_id: HostId,
    pub timestamp: Timestamp,
}

/// The periodic anti-entropy digest: every live host's timestamp, and
/// every tombstone's timestamp, known to `sender`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostAntiEntropyAdvertisement {
    pub sender: NodeId,
    pub timestamps: HashMap<HostFragmentId, Timestamp>,
    pub tombstones: HashMap<HostId, Timestamp>,
}

/// The three wire messages the gossip engine sends and receives, as one
/// enum for convenience of framing; subjects still distinguish them on
/// the wire for transports that dispatch by subject rather than by
/// message shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    Update(InternalHostEvent),
    Remove(InternalHostRemovedEvent),
    Advertisement(HostAntiEntropyAdvertisement),
}

impl GossipMessage {
    pub fn subject(&self) -> &'static str {
        match self {
            GossipMessage::Update(_) => HOST_UPDATED,
            GossipMessage::Remove(_) => HOST_REMOVED,
            GossipMessage::Advertisement(_) => HOST_ANTI_ENTROPY_ADVERTISEMENT,
        }
    }
}

/// A handler invoked for every inbound message on a subscribed subject.
pub type SubscriptionHandler = Arc<dyn Fn(GossipMessage) + Send + Sync>;

/// Identifies one `add_subscriber` registration so it can later be
/// removed with `remove_subscriber`. Opaque and transport-assigned;
/// callers only ever compare it for equality or hand it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Mint a new id. Exposed so `Transport` implementations outside this
    /// crate (including test doubles) can assign their own.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// The cluster transport this engine consumes: broadcast, unicast, and
/// subject-based subscription over an opaque, best-effort channel.
///
/// Messages may be lost, reordered, or duplicated; nothing here assumes
/// otherwise. Implementations must not block the caller for long: per
/// §5 of the design, message handlers enqueue and return, they don't
/// process inline.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Register `handler` to be invoked for every inbound message on
    /// `subject`. A transport may support multiple handlers per subject.
    /// The returned id can be passed to `remove_subscriber` to undo this
    /// registration, e.g. on engine shutdown.
    fn add_subscriber(&self, subject: &str, handler: SubscriptionHandler) -> SubscriptionId;

    /// Undo a prior `add_subscriber` registration. A no-op if `id` is not
    /// currently registered under `subject` (already removed, or never
    /// valid for this transport).
    fn remove_subscriber(&self, subject: &str, id: SubscriptionId);

    /// Best-effort send to every known peer.
    async fn broadcast(&self, message: GossipMessage) -> HostMeshResult<()>;

    /// Best-effort send to a single peer.
    async fn unicast(&self, message: GossipMessage, peer: NodeId) -> HostMeshResult<()>;
}

/// One peer's address, as known to `TcpTransport`.
///
/// `connected_at` is wall-clock bookkeeping only — purely for operator
/// visibility (how long has this peer been in our roster), never
/// consulted by the replication algorithm itself, which orders writes by
/// the logical `Timestamp` from `clock`, not by when a peer was added.
#[derive(Debug, Clone)]
struct PeerHandle {
    addr: SocketAddr,
    connected_at: DateTime<Utc>,
}

/// A minimal TCP-backed `Transport`: each peer is a long-lived outbound
/// connection, and one background task accepts inbound connections and
/// fans messages out to subscribed handlers. Adequate for a demo cluster
/// or integration test; a production deployment would plug in whatever
/// messaging fabric it already runs.
pub struct TcpTransport {
    peers: dashmap::DashMap<NodeId, PeerHandle>,
    subscribers: dashmap::DashMap<String, Vec<(SubscriptionId, SubscriptionHandler)>>,
    next_subscription_id: AtomicU64,
    outbox: mpsc::UnboundedSender<(NodeId, GossipMessage)>,
}

impl TcpTransport {
    /// Bind a listener on `addr` and start the accept loop. Returns the
    /// transport and the local address actually bound (useful when `addr`
    /// requests an ephemeral port).
    pub async fn bind(addr: SocketAddr) -> HostMeshResult<(Arc<Self>, SocketAddr)> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HostMeshError::TransportError(format!("bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| HostMeshError::TransportError(format!("local_addr: {e}")))?;

        let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            peers: dashmap::DashMap::new(),
            subscribers: dashmap::DashMap::new(),
            next_subscription_id: AtomicU64::new(0),
            outbox: outbox_tx,
        });

        let accept_transport = transport.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        let transport = accept_transport.clone();
                        tokio::spawn(async move {
                            if let Err(err) = serve_inbound(stream, &transport).await {
                                tracing::debug!(%peer_addr, %err, "inbound connection closed");
                            }
                        });
                    }
                    Err(err) => {
                        tracing::warn!(%err, "accept failed");
                    }
                }
            }
        });

        let send_transport = transport.clone();
        tokio::spawn(async move {
            while let Some((peer, message)) = outbox_rx.recv().await {
                let addr = match send_transport.peers.get(&peer) {
                    Some(handle) => handle.addr,
                    None => {
                        tracing::debug!(?peer, "unicast to unknown peer dropped");
                        continue;
                    }
                };
                if let Err(err) = send_once(addr, &message).await {
                    tracing::debug!(?peer, %addr, %err, "send failed, will reconcile via anti-entropy");
                }
            }
        });

        Ok((transport, local_addr))
    }

    /// Register a peer's address so `unicast` and `broadcast` can reach it.
    pub fn add_peer(&self, node_id: NodeId, addr: SocketAddr) {
        self.peers.insert(
            node_id,
            PeerHandle {
                addr,
                connected_at: Utc::now(),
            },
        );
    }

    pub fn remove_peer(&self, node_id: &NodeId) {
        self.peers.remove(node_id);
    }

    /// When `node_id` was added to this transport's peer roster, if known.
    /// Operator-facing only; see `PeerHandle::connected_at`.
    pub fn peer_connected_at(&self, node_id: &NodeId) -> Option<DateTime<Utc>> {
        self.peers.get(node_id).map(|h| h.connected_at)
    }

    fn dispatch(&self, message: GossipMessage) {
        if let Some(handlers) = self.subscribers.get(message.subject()) {
            for (_, handler) in handlers.iter() {
                handler(message.clone());
            }
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn add_subscriber(&self, subject: &str, handler: SubscriptionHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription_id.fetch_add(1, Ordering::SeqCst));
        self.subscribers
            .entry(subject.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    fn remove_subscriber(&self, subject: &str, id: SubscriptionId) {
        if let Some(mut handlers) = self.subscribers.get_mut(subject) {
            handlers.retain(|(existing, _)| *existing != id);
        }
    }

    async fn broadcast(&self, message: GossipMessage) -> HostMeshResult<()> {
        for entry in self.peers.iter() {
            let peer = *entry.key();
            if self.outbox.send((peer, message.clone())).is_err() {
                return Err(HostMeshError::TransportError(
                    "transport send queue closed".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn unicast(&self, message: GossipMessage, peer: NodeId) -> HostMeshResult<()> {
        if !self.peers.contains_key(&peer) {
            return Err(HostMeshError::UnknownPeer(peer.to_string()));
        }
        self.outbox
            .send((peer, message))
            .map_err(|_| HostMeshError::TransportError("transport send queue closed".to_string()))
    }
}

async fn send_once(addr: SocketAddr, message: &GossipMessage) -> HostMeshResult<()> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| HostMeshError::TransportError(format!("connect {addr}: {e}")))?;
    write_framed(&mut stream, message).await
}

async fn serve_inbound(mut stream: TcpStream, transport: &Arc<TcpTransport>) -> HostMeshResult<()> {
    loop {
        let message = read_framed(&mut stream).await?;
        transport.dispatch(message);
    }
}

async fn write_framed(stream: &mut TcpStream, message: &GossipMessage) -> HostMeshResult<()> {
    let bytes = serde_json::to_vec(message)?;
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(HostMeshError::TransportError(format!(
            "message too large: {} bytes",
            bytes.len()
        )));
    }
    let len = bytes.len() as u32;
    stream
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| HostMeshError::TransportError(format!("write length: {e}")))?;
    stream
        .write_all(&bytes)
        .await
        .map_err(|e| HostMeshError::TransportError(format!("write body: {e}")))?;
    stream
        .flush()
        .await
        .map_err(|e| HostMeshError::TransportError(format!("flush: {e}")))
}

async fn read_framed(stream: &mut TcpStream) -> HostMeshResult<GossipMessage> {
    let mut len_bytes = [0u8; 4];
    stream
        .read_exact(&mut len_bytes)
        .await
        .map_err(|e| HostMeshError::TransportError(format!("read length: {e}")))?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(HostMeshError::TransportError(format!(
            "message too large: {len} bytes"
        )));
    }
    let mut bytes = vec![0u8; len];
    stream
        .read_exact(&mut bytes)
        .await
        .map_err(|e| HostMeshError::TransportError(format!("read body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| HostMeshError::DecodeError {
        reason: e.to_string(),
    })
}
