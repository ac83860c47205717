//! Integration tests for multi-node convergence: two or more
//! `HostMeshEngine`s wired together over a small in-memory hub that
//! implements the `Transport` trait, with a `ScriptedClock` standing in
//! for the timestamp oracle so exact timestamp orderings can be
//! reproduced deterministically.
use async_trait::async_trait;
use dashmap::DashMap;
use hostmesh::clock::TimestampOracle;
use hostmesh::network::{SubscriptionHandler, SubscriptionId};
use hostmesh::prelude::*;
use hostmesh::{GossipMessage, HostMeshResult, Timestamp};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A timestamp oracle that hands out a fixed, pre-scripted sequence of
/// timestamps regardless of which `HostId` asks — enough control to
/// reproduce exact, hand-picked timestamp orderings in a test.
struct ScriptedClock(Mutex<VecDeque<u64>>);

impl ScriptedClock {
    fn new(values: impl IntoIterator<Item = u64>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(values.into_iter().collect())))
    }
}

impl TimestampOracle for ScriptedClock {
    fn timestamp(&self, _host_id: &HostId) -> Timestamp {
        Timestamp(
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .expect("scripted clock ran out of timestamps"),
        )
    }
}

/// A shared in-memory switchboard standing in for the cluster transport:
/// every node registers its subject handlers here, and `deliver` fans a
/// message out to one node's handlers for a given subject.
#[derive(Default)]
struct Hub {
    subscribers: DashMap<NodeId, DashMap<String, Vec<(SubscriptionId, SubscriptionHandler)>>>,
}

impl Hub {
    fn deliver(&self, node: NodeId, message: GossipMessage) {
        if let Some(subjects) = self.subscribers.get(&node) {
            if let Some(handlers) = subjects.get(message.subject()) {
                for (_, handler) in handlers.iter() {
                    handler(message.clone());
                }
            }
        }
    }
}

/// One node's handle onto the shared `Hub`. `broadcast_peers` controls
/// who this node's `broadcast` calls reach — deliberately separate from
/// the hub-wide reachability `unicast` has, so a test can simulate a
/// lost broadcast while anti-entropy's direct pushes still get through.
struct NodeTransport {
    hub: Arc<Hub>,
    node: NodeId,
    broadcast_peers: Vec<NodeId>,
    next_subscription_id: AtomicU64,
}

impl NodeTransport {
    fn new(hub: Arc<Hub>, node: NodeId, broadcast_peers: Vec<NodeId>) -> Arc<Self> {
        hub.subscribers.entry(node).or_default();
        Arc::new(Self {
            hub,
            node,
            broadcast_peers,
            next_subscription_id: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl Transport for NodeTransport {
    fn add_subscriber(&self, subject: &str, handler: SubscriptionHandler) -> SubscriptionId {
        let id = SubscriptionId::new(self.next_subscription_id.fetch_add(1, Ordering::SeqCst));
        self.hub
            .subscribers
            .entry(self.node)
            .or_default()
            .entry(subject.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    fn remove_subscriber(&self, subject: &str, id: SubscriptionId) {
        if let Some(subjects) = self.hub.subscribers.get(&self.node) {
            if let Some(mut handlers) = subjects.get_mut(subject) {
                handlers.retain(|(existing, _)| *existing != id);
            }
        }
    }

    async fn broadcast(&self, message: GossipMessage) -> HostMeshResult<()> {
        for peer in &self.broadcast_peers {
            self.hub.deliver(*peer, message.clone());
        }
        Ok(())
    }

    async fn unicast(&self, message: GossipMessage, peer: NodeId) -> HostMeshResult<()> {
        self.hub.deliver(peer, message);
        Ok(())
    }
}

fn fast_anti_entropy_config() -> HostMeshConfig {
    HostMeshConfig {
        anti_entropy_initial_delay: Duration::from_millis(15),
        anti_entropy_period: Duration::from_millis(30),
        ..HostMeshConfig::default()
    }
}

fn sample_mac() -> MacAddress {
    MacAddress::parse("aa:bb:cc:dd:ee:01").unwrap()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

/// Node A applies a create at t=5; node B applies a create for the same
/// host at t=6 with a different location. Both broadcasts are delivered
/// (in either order — last applied wins by timestamp, not arrival
/// order): the final location on both nodes must be B's, since 6 is
/// newer than 5.
#[tokio::test]
async fn concurrent_conflicting_moves_converge_on_the_newer_timestamp() {
    let hub = Arc::new(Hub::default());
    let node_a = NodeId::new();
    let node_b = NodeId::new();

    let transport_a = NodeTransport::new(hub.clone(), node_a, vec![node_b]);
    let transport_b = NodeTransport::new(hub.clone(), node_b, vec![node_a]);

    let membership_a = Arc::new(StaticMembership::new(node_a, [node_b]));
    let membership_b = Arc::new(StaticMembership::new(node_b, [node_a]));

    let engine_a = HostMeshEngine::new(
        fast_anti_entropy_config(),
        transport_a,
        membership_a,
        ScriptedClock::new([5]),
    );
    let engine_b = HostMeshEngine::new(
        fast_anti_entropy_config(),
        transport_b,
        membership_b,
        ScriptedClock::new([6]),
    );
    engine_a.activate().await.unwrap();
    engine_b.activate().await.unwrap();

    let mac = sample_mac();
    let vlan = VlanId(10);
    let host_id = HostId::from_parts(mac, vlan);
    let provider = ProviderId::new("lldp", "p1");

    engine_a
        .create_or_update_host(
            provider.clone(),
            host_id.clone(),
            HostDescription::new(mac, vlan, ConnectPoint::new("of:a", 1)),
        )
        .await;
    engine_b
        .create_or_update_host(
            provider,
            host_id.clone(),
            HostDescription::new(mac, vlan, ConnectPoint::new("of:b", 1)),
        )
        .await;

    let expected = ConnectPoint::new("of:b", 1);
    assert_eq!(engine_a.get_host(&host_id).unwrap().location, expected);
    assert_eq!(engine_b.get_host(&host_id).unwrap().location, expected);

    engine_a.deactivate().await.unwrap();
    engine_b.deactivate().await.unwrap();
}

/// A has h1@t=10 that never reached B (broadcast suppressed); once B's
/// periodic advertisement reaches A, A notices B is behind and pushes
/// the full host back to B directly.
#[tokio::test]
async fn anti_entropy_fills_a_gap_left_by_a_lost_broadcast() {
    let hub = Arc::new(Hub::default());
    let node_a = NodeId::new();
    let node_b = NodeId::new();

    // A's broadcasts reach nobody: this is the "lost in transit" premise.
    let transport_a = NodeTransport::new(hub.clone(), node_a, vec![]);
    let transport_b = NodeTransport::new(hub.clone(), node_b, vec![]);

    let membership_a = Arc::new(StaticMembership::new(node_a, [node_b]));
    let membership_b = Arc::new(StaticMembership::new(node_b, [node_a]));

    let engine_a = HostMeshEngine::new(
        fast_anti_entropy_config(),
        transport_a,
        membership_a,
        ScriptedClock::new([10]),
    );
    let engine_b = HostMeshEngine::new(
        fast_anti_entropy_config(),
        transport_b,
        membership_b,
        ScriptedClock::new([]),
    );
    engine_a.activate().await.unwrap();
    engine_b.activate().await.unwrap();

    let mac = sample_mac();
    let vlan = VlanId(10);
    let host_id = HostId::from_parts(mac, vlan);
    let provider = ProviderId::new("lldp", "p1");

    engine_a
        .create_or_update_host(
            provider,
            host_id.clone(),
            HostDescription::new(mac, vlan, ConnectPoint::new("of:a", 1)),
        )
        .await;
    assert!(engine_b.get_host(&host_id).is_none());

    settle().await;

    let host = engine_b
        .get_host(&host_id)
        .expect("anti-entropy should have filled B in on h1");
    assert_eq!(host.location, ConnectPoint::new("of:a", 1));

    engine_a.deactivate().await.unwrap();
    engine_b.deactivate().await.unwrap();
}

/// A has tombstoned h1 at t=20; B still thinks h1 is live at t=15. Once
/// B's advertisement reaches A, A notices the zombie and pushes the
/// remove back to B.
#[tokio::test]
async fn anti_entropy_pushes_a_remove_for_a_zombie_still_live_on_a_peer() {
    let hub = Arc::new(Hub::default());
    let node_a = NodeId::new();
    let node_b = NodeId::new();

    let transport_a = NodeTransport::new(hub.clone(), node_a, vec![]);
    let transport_b = NodeTransport::new(hub.clone(), node_b, vec![]);

    let membership_a = Arc::new(StaticMembership::new(node_a, [node_b]));
    let membership_b = Arc::new(StaticMembership::new(node_b, [node_a]));

    let engine_a = HostMeshEngine::new(
        fast_anti_entropy_config(),
        transport_a,
        membership_a,
        ScriptedClock::new([1, 20]),
    );
    let engine_b = HostMeshEngine::new(
        fast_anti_entropy_config(),
        transport_b,
        membership_b,
        ScriptedClock::new([15]),
    );
    engine_a.activate().await.unwrap();
    engine_b.activate().await.unwrap();

    let mac = sample_mac();
    let vlan = VlanId(10);
    let host_id = HostId::from_parts(mac, vlan);
    let provider = ProviderId::new("lldp", "p1");

    engine_a
        .create_or_update_host(
            provider.clone(),
            host_id.clone(),
            HostDescription::new(mac, vlan, ConnectPoint::new("of:a", 1)),
        )
        .await;
    engine_a.remove_host(host_id.clone()).await;

    engine_b
        .create_or_update_host(
            provider,
            host_id.clone(),
            HostDescription::new(mac, vlan, ConnectPoint::new("of:b", 1)),
        )
        .await;
    assert!(engine_b.get_host(&host_id).is_some());

    settle().await;

    assert!(
        engine_b.get_host(&host_id).is_none(),
        "B should have been told to remove the zombie host"
    );

    engine_a.deactivate().await.unwrap();
    engine_b.deactivate().await.unwrap();
}

/// A has h1 live at t=8; B has a tombstone for h1 at t=12. Once B's
/// advertisement reaches A, A applies the newer remote tombstone
/// locally even though it never saw a direct remove message.
#[tokio::test]
async fn a_newer_remote_tombstone_catches_up_a_live_host() {
    let hub = Arc::new(Hub::default());
    let node_a = NodeId::new();
    let node_b = NodeId::new();

    let transport_a = NodeTransport::new(hub.clone(), node_a, vec![]);
    let transport_b = NodeTransport::new(hub.clone(), node_b, vec![]);

    let membership_a = Arc::new(StaticMembership::new(node_a, [node_b]));
    let membership_b = Arc::new(StaticMembership::new(node_b, [node_a]));

    let engine_a = HostMeshEngine::new(
        fast_anti_entropy_config(),
        transport_a,
        membership_a,
        ScriptedClock::new([8]),
    );
    let engine_b = HostMeshEngine::new(
        fast_anti_entropy_config(),
        transport_b,
        membership_b,
        ScriptedClock::new([1, 12]),
    );
    engine_a.activate().await.unwrap();
    engine_b.activate().await.unwrap();

    let mac = sample_mac();
    let vlan = VlanId(10);
    let host_id = HostId::from_parts(mac, vlan);
    let provider = ProviderId::new("lldp", "p1");

    engine_a
        .create_or_update_host(
            provider.clone(),
            host_id.clone(),
            HostDescription::new(mac, vlan, ConnectPoint::new("of:a", 1)),
        )
        .await;

    engine_b
        .create_or_update_host(
            provider,
            host_id.clone(),
            HostDescription::new(mac, vlan, ConnectPoint::new("of:b", 1)),
        )
        .await;
    engine_b.remove_host(host_id.clone()).await;

    assert!(engine_a.get_host(&host_id).is_some());

    settle().await;

    assert!(
        engine_a.get_host(&host_id).is_none(),
        "A should have applied B's newer tombstone"
    );

    engine_a.deactivate().await.unwrap();
    engine_b.deactivate().await.unwrap();
}

/// Once a remove has been applied, replaying an older update must not
/// bring the host back, even through the same public API a peer message
/// would use.
#[tokio::test]
async fn replaying_a_stale_update_after_a_remove_does_not_resurrect() {
    let hub = Arc::new(Hub::default());
    let node = NodeId::new();
    let transport = NodeTransport::new(hub, node, vec![]);
    let membership = Arc::new(StaticMembership::new(node, []));

    let engine = HostMeshEngine::new(
        fast_anti_entropy_config(),
        transport,
        membership,
        ScriptedClock::new([1, 2, 3, 1]),
    );
    engine.activate().await.unwrap();

    let mac = sample_mac();
    let vlan = VlanId(10);
    let host_id = HostId::from_parts(mac, vlan);
    let provider = ProviderId::new("lldp", "p1");
    let descr = HostDescription::new(mac, vlan, ConnectPoint::new("of:a", 1));

    engine
        .create_or_update_host(provider.clone(), host_id.clone(), descr.clone())
        .await;
    engine
        .create_or_update_host(
            provider.clone(),
            host_id.clone(),
            HostDescription::new(mac, vlan, ConnectPoint::new("of:a", 2)),
        )
        .await;
    engine.remove_host(host_id.clone()).await;
    assert!(engine.get_host(&host_id).is_none());

    // Replay the original t=1 update: the scripted clock's fourth value
    // (1) stands in for a peer resending its original message.
    engine
        .create_or_update_host(provider, host_id.clone(), descr)
        .await;
    assert!(engine.get_host(&host_id).is_none());

    engine.deactivate().await.unwrap();
}
