/// Cluster membership: the external collaborator this engine consumes
/// but does not implement.
///
/// The design treats node identity and membership discovery as out of
/// scope — a real deployment already has a cluster membership service
/// (Raft, a gossip membership protocol, a static config file) and this
/// crate just needs to ask it two things: who am I, and who else is
/// there. `ClusterMembership` is that seam; `StaticMembership` is the
/// trivial fixed-roster implementation used by the demo binary and by
/// tests that don't care about dynamic join/leave.
use crate::network::NodeId;
use std::collections::HashSet;
use std::sync::RwLock;

/// What the gossip engine needs to know about the cluster: its own
/// identity, and the current peer set (excluding itself).
pub trait ClusterMembership: Send + Sync {
    /// This process's node id.
    fn local_node(&self) -> NodeId;

    /// Every other known node in the cluster. Does not include
    /// `local_node()`.
    fn nodes(&self) -> HashSet<NodeId>;
}

/// A fixed membership roster, mutable only by explicit add/remove calls.
///
/// Sufficient for single-process demos and for tests that want to
/// control the peer set directly rather than exercise a real discovery
/// protocol.
pub struct StaticMembership {
    local: NodeId,
    peers: RwLock<HashSet<NodeId>>,
}

impl StaticMembership {
    pub fn new(local: NodeId, peers: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            local,
            peers: RwLock::new(peers.into_iter().filter(|p| *p != local).collect()),
        }
    }

    /// Add a peer at runtime, e.g. after a demo process dials a new node.
    pub fn add_peer(&self, peer: NodeId) {
        if peer != self.local {
            self.peers
                .write()
                .expect("membership lock poisoned")
                .insert(peer);
        }
    }

    pub fn remove_peer(&self, peer: &NodeId) {
        self.peers
            .write()
            .expect("membership lock poisoned")
            .remove(peer);
    }
}

impl ClusterMembership for StaticMembership {
    fn local_node(&self) -> NodeId {
        self.local
    }

    fn nodes(&self) -> HashSet<NodeId> {
        self.peers.read().expect("membership lock poisoned").clone()
    }
}
