//! The top-level `HostMeshEngine`: wires the host table, gossip engine,
//! address bindings, transport, membership, and clock together behind a
//! single activate/deactivate lifecycle.
//!
//! This is the "exposed interfaces" surface from the design: the public
//! operations in §4.1 (create/update/remove/query), §4.5's address
//! binding operations, and the start/stop lifecycle from §5. Everything
//! below it — `host_table`, `gossip`, `bindings` — is reusable on its
//! own; `HostMeshEngine` just assembles the pieces a deployment actually
//! runs.
use crate::bindings::{AddressBindings, PortAddresses};
use crate::clock::{MonotonicClock, TimestampOracle};
use crate::cluster::ClusterMembership;
use crate::config::HostMeshConfig;
use crate::error::{HostMeshError, HostMeshResult};
use crate::events::{BroadcastDispatcher, HostEventDispatcher, HostEventSubscription};
use crate::gossip::GossipEngine;
use crate::host_table::HostTable;
use crate::network::Transport;
use crate::types::{ConnectPoint, DeviceId, Host, HostDescription, HostId, MacAddress, ProviderId, VlanId};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

/// A running (or not-yet-running) instance of the replicated host
/// inventory for one controller node.
///
/// `activate` is idempotent-unsafe by design (calling it twice returns
/// `HostMeshError::AlreadyActive`) the same way the source's lifecycle
/// methods guard against double-start; `deactivate` on an inactive
/// engine returns `HostMeshError::NotActive`.
pub struct HostMeshEngine {
    host_table: Arc<HostTable>,
    bindings: Arc<AddressBindings>,
    gossip: Arc<GossipEngine>,
    dispatcher: Arc<BroadcastDispatcher>,
    config: HostMeshConfig,
    active: AtomicBool,
    anti_entropy_task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl HostMeshEngine {
    /// Assemble an engine from its external collaborators: a transport,
    /// a membership view, and (optionally) a timestamp oracle. A
    /// `MonotonicClock` is used when no oracle is supplied, sufficient
    /// for a single process or for tests.
    pub fn new(
        config: HostMeshConfig,
        transport: Arc<dyn Transport>,
        membership: Arc<dyn ClusterMembership>,
        clock: Arc<dyn TimestampOracle>,
    ) -> Self {
        let host_table = Arc::new(HostTable::new(config.host_table_config()));
        let bindings = Arc::new(AddressBindings::new());
        let dispatcher = Arc::new(BroadcastDispatcher::new());
        let gossip = Arc::new(GossipEngine::new(
            host_table.clone(),
            transport,
            membership,
            clock,
            dispatcher.clone(),
        ));

        Self {
            host_table,
            bindings,
            gossip,
            dispatcher,
            config,
            active: AtomicBool::new(false),
            anti_entropy_task: AsyncMutex::new(None),
        }
    }

    /// Convenience constructor: a `MonotonicClock` for the timestamp
    /// oracle, used by the demo binary and most tests.
    pub fn with_default_clock(
        config: HostMeshConfig,
        transport: Arc<dyn Transport>,
        membership: Arc<dyn ClusterMembership>,
    ) -> Self {
        Self::new(config, transport, membership, Arc::new(MonotonicClock::new()))
    }

    /// Start the engine: subscribe the gossip handlers to their subjects
    /// and schedule the periodic anti-entropy task.
    pub async fn activate(&self) -> HostMeshResult<()> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(HostMeshError::AlreadyActive);
        }

        self.gossip.subscribe();
        let handle = self.gossip.clone().spawn_anti_entropy_task(&self.config);
        *self.anti_entropy_task.lock().await = Some(handle);
        Ok(())
    }

    /// Stop the engine: signal the anti-entropy task to stop and wait up
    /// to `executor_shutdown_grace` for it to drain.
    pub async fn deactivate(&self) -> HostMeshResult<()> {
        if self
            .active
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(HostMeshError::NotActive);
        }

        self.gossip.request_shutdown();
        if let Some(handle) = self.anti_entropy_task.lock().await.take() {
            let grace = self.config.executor_shutdown_grace;
            let abort_handle = handle.abort_handle();
            if tokio::time::timeout(grace, handle).await.is_err() {
                tracing::warn!(
                    "anti-entropy task did not stop within the shutdown grace period, aborting"
                );
                abort_handle.abort();
            }
        }

        self.gossip.unsubscribe();
        self.host_table.clear();
        self.bindings.clear_all();

        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    // -- §4.1 host operations --------------------------------------------

    pub async fn create_or_update_host(
        &self,
        provider_id: ProviderId,
        host_id: HostId,
        descr: HostDescription,
    ) {
        self.gossip
            .create_or_update_host(provider_id, host_id, descr)
            .await;
    }

    pub async fn remove_host(&self, host_id: HostId) {
        self.gossip.remove_host(host_id).await;
    }

    pub fn get_host(&self, host_id: &HostId) -> Option<Host> {
        self.host_table.get_host(host_id)
    }

    pub fn get_hosts(&self) -> Vec<Host> {
        self.host_table.get_hosts()
    }

    pub fn get_hosts_by_vlan(&self, vlan: VlanId) -> Vec<Host> {
        self.host_table.get_hosts_by_vlan(vlan)
    }

    pub fn get_hosts_by_mac(&self, mac: MacAddress) -> Vec<Host> {
        self.host_table.get_hosts_by_mac(mac)
    }

    pub fn get_hosts_by_ip(&self, ip: IpAddr) -> Vec<Host> {
        self.host_table.get_hosts_by_ip(ip)
    }

    pub fn get_connected_hosts(&self, cp: &ConnectPoint) -> Vec<Host> {
        self.host_table.get_connected_hosts(cp)
    }

    pub fn get_connected_hosts_on_device(&self, device_id: &DeviceId) -> Vec<Host> {
        self.host_table.get_connected_hosts_on_device(device_id)
    }

    // -- §4.5 address bindings --------------------------------------------

    pub fn update_address_bindings(
        &self,
        cp: ConnectPoint,
        macs: impl IntoIterator<Item = MacAddress>,
        ips: impl IntoIterator<Item = IpAddr>,
    ) {
        self.bindings.update(cp, macs, ips);
    }

    pub fn remove_address_bindings(
        &self,
        cp: &ConnectPoint,
        macs: impl IntoIterator<Item = MacAddress>,
        ips: impl IntoIterator<Item = IpAddr>,
    ) {
        self.bindings.remove(cp, macs, ips);
    }

    pub fn clear_address_bindings(&self, cp: &ConnectPoint) {
        self.bindings.clear(cp);
    }

    pub fn get_address_bindings(&self) -> Vec<(ConnectPoint, PortAddresses)> {
        self.bindings.get_all()
    }

    pub fn get_address_bindings_for_port(&self, cp: &ConnectPoint) -> PortAddresses {
        self.bindings.get_for_port(cp)
    }

    // -- event subscription -----------------------------------------------

    /// Subscribe to local `HostEvent`s as they are emitted.
    pub fn subscribe_events(&self) -> HostEventSubscription {
        self.dispatcher.subscribe()
    }
}
