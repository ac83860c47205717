//! # HostMesh
//!
//! A replicated inventory of end-station hosts, maintained across a
//! cluster of controller nodes through optimistic replication with
//! last-writer-wins semantics and periodic anti-entropy gossip.
//!
//! Each node keeps a full local copy of the host table. Updates
//! originate anywhere — a local discovery provider, or a peer's gossip
//! message — propagate by best-effort broadcast, and converge through a
//! background anti-entropy task that periodically reconciles state with
//! a random peer. Queries are always served from the local copy; there
//! is no synchronous cross-node coordination.
//!
//! ## Quick start
//!
//! ```ignore
//! use hostmesh::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     hostmesh::init_logging();
//!
//!     let (transport, addr) = TcpTransport::bind("127.0.0.1:0".parse()?).await?;
//!     let membership = Arc::new(StaticMembership::new(NodeId::new(), []));
//!     let engine = HostMeshEngine::with_default_clock(
//!         HostMeshConfig::default(),
//!         transport,
//!         membership,
//!     );
//!     engine.activate().await?;
//!
//!     let mac = MacAddress::parse("aa:bb:cc:dd:ee:ff").unwrap();
//!     let vlan = VlanId(10);
//!     engine
//!         .create_or_update_host(
//!             ProviderId::new("lldp", "demo"),
//!             HostId::from_parts(mac, vlan),
//!             HostDescription::new(mac, vlan, ConnectPoint::new("of:1", 1)),
//!         )
//!         .await;
//!
//!     println!("{} hosts known", engine.get_hosts().len());
//!     engine.deactivate().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## What this crate does not do
//!
//! Cluster membership discovery, transport implementation beyond a
//! minimal TCP demo, durable storage, and strong consistency are all out
//! of scope — see `DESIGN.md` for the full rationale. `HostMeshEngine`
//! consumes these as pluggable traits (`ClusterMembership`,
//! `Transport`, `TimestampOracle`) so a real deployment can substitute
//! its own.

pub mod bindings;
pub mod clock;
pub mod cluster;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod gossip;
pub mod host_table;
pub mod network;
pub mod types;

pub use clock::{MonotonicClock, Timestamp, TimestampOracle};
pub use cluster::{ClusterMembership, StaticMembership};
pub use config::HostMeshConfig;
pub use engine::HostMeshEngine;
pub use error::{HostMeshError, HostMeshResult};
pub use events::{BroadcastDispatcher, HostEventDispatcher, HostEventSubscription};
pub use network::{
    GossipMessage, HostAntiEntropyAdvertisement, HostFragmentId, InternalHostEvent,
    InternalHostRemovedEvent, NodeId, SubscriptionId, TcpTransport, Transport, DEFAULT_PORT,
};
pub use types::{
    merge_annotations, Annotations, ConnectPoint, DeviceId, Host, HostDescription, HostEvent,
    HostEventKind, HostId, MacAddress, PortNumber, ProviderId, Timestamped, VlanId,
};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use hostmesh::prelude::*;
/// ```
pub mod prelude {
    pub use crate::bindings::{AddressBindings, PortAddresses};
    pub use crate::clock::{MonotonicClock, Timestamp, TimestampOracle};
    pub use crate::cluster::{ClusterMembership, StaticMembership};
    pub use crate::config::HostMeshConfig;
    pub use crate::engine::HostMeshEngine;
    pub use crate::error::{HostMeshError, HostMeshResult};
    pub use crate::events::{BroadcastDispatcher, HostEventDispatcher};
    pub use crate::network::{NodeId, SubscriptionId, TcpTransport, Transport};
    pub use crate::types::{
        ConnectPoint, DeviceId, Host, HostDescription, HostEvent, HostEventKind, HostId,
        MacAddress, ProviderId, VlanId,
    };
}

/// Initialize the logging system.
///
/// Configures a `tracing_subscriber` with an environment filter. Call
/// once at process startup.
///
/// The log level can be controlled via the `HOSTMESH_LOG` environment
/// variable: `error`, `warn`, `info` (default), `debug`, or `trace`.
pub fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_env("HOSTMESH_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Initialize logging with an explicit level, ignoring `HOSTMESH_LOG`.
pub fn init_logging_with_level(level: &str) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::registry()
        .with(EnvFilter::new(level))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
