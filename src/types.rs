/// Core data model for the replicated host inventory.
///
/// This module defines the identity, description, and snapshot types that
/// flow through `host_table` and across the wire. Nothing here is
/// replication-aware: `HostId`, `HostDescription`, and friends are plain
/// value types, the same shapes whether they arrived from a local caller
/// or a peer's gossip message.
use crate::clock::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::IpAddr;

/// Identity of a discovery source that reported a host.
///
/// Mirrors ONOS's notion of a `ProviderId`: a scheme plus an identifier,
/// e.g. `(lldp, org.foo.provider.host)`. Two providers reporting the same
/// `HostId` is an open question (see `DESIGN.md`); the live path merges
/// by `HostId` alone and simply keeps whichever provider last wrote.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderId {
    pub scheme: String,
    pub id: String,
}

impl ProviderId {
    pub fn new(scheme: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.id)
    }
}

/// A MAC address, stored as six octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Parse a colon-separated MAC string such as `"aa:bb:cc:dd:ee:ff"`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut octets = [0u8; 6];
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return None;
        }
        for (i, part) in parts.iter().enumerate() {
            octets[i] = u8::from_str_radix(part, 16).ok()?;
        }
        Some(Self(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

/// A VLAN identifier. `NONE` represents an untagged host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VlanId(pub u16);

impl VlanId {
    pub const NONE: VlanId = VlanId(0);
}

/// Identity of a switching device, as an opaque URI-like string
/// (`of:0000000000000001`, in the style ONOS uses for OpenFlow datapaths).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A physical or logical port number on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortNumber(pub u32);

/// A host's attachment point to the network: a `(device, port)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectPoint {
    pub device_id: DeviceId,
    pub port: PortNumber,
}

impl ConnectPoint {
    pub fn new(device_id: impl Into<String>, port: u32) -> Self {
        Self {
            device_id: DeviceId::new(device_id),
            port: PortNumber(port),
        }
    }
}

impl fmt::Display for ConnectPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_id, self.port.0)
    }
}

/// Identity of an end-station: commonly `mac + vlan`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostId {
    pub mac: MacAddress,
    pub vlan: VlanId,
}

impl HostId {
    pub fn new(mac: &str, vlan: u16) -> Self {
        Self {
            mac: MacAddress::parse(mac).expect("valid mac address"),
            vlan: VlanId(vlan),
        }
    }

    pub fn from_parts(mac: MacAddress, vlan: VlanId) -> Self {
        Self { mac, vlan }
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.mac, self.vlan.0)
    }
}

/// Free-form key/value metadata attached to a host.
///
/// Annotations never carry a timestamp of their own: they accumulate by
/// key/value merge (rhs wins on key collision), so concurrent writers can
/// never "regress" them the way a location update could.
pub type Annotations = HashMap<String, String>;

/// Merge `incoming` into `base`, with `incoming` winning key collisions.
pub fn merge_annotations(base: &Annotations, incoming: &Annotations) -> Annotations {
    let mut merged = base.clone();
    for (k, v) in incoming {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// Input to `createOrUpdateHost`: what a provider (local or remote)
/// observed about a host. This is the payload half of a host update;
/// the timestamp is supplied separately by the caller (local: the clock
/// oracle, peer: the wire message).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDescription {
    pub mac: MacAddress,
    pub vlan: VlanId,
    pub location: ConnectPoint,
    pub ip_addresses: HashSet<IpAddr>,
    pub annotations: Annotations,
}

impl HostDescription {
    pub fn new(mac: MacAddress, vlan: VlanId, location: ConnectPoint) -> Self {
        Self {
            mac,
            vlan,
            location,
            ip_addresses: HashSet::new(),
            annotations: Annotations::new(),
        }
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip_addresses.insert(ip);
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}

/// A value paired with the logical timestamp at which it was observed.
///
/// Only `location` in `StoredHost` carries one of these: it is the sole
/// attribute with conflict potential (a host can only be in one place),
/// so it is the only field that needs a last-writer-wins comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamped<T> {
    pub value: T,
    pub timestamp: Timestamp,
}

impl<T> Timestamped<T> {
    pub fn new(value: T, timestamp: Timestamp) -> Self {
        Self { value, timestamp }
    }
}

/// Read-only projection of a stored host, returned from all query
/// operations.
///
/// Composition, not inheritance: rather than a mutable `location` field
/// threaded through a base "host" type, `Host` is assembled fresh from
/// `StoredHost`'s immutable fields plus its separately-held
/// `(location, timestamp)` pair each time a caller asks for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub provider_id: ProviderId,
    pub id: HostId,
    pub mac: MacAddress,
    pub vlan: VlanId,
    pub location: ConnectPoint,
    pub ip_addresses: HashSet<IpAddr>,
    pub annotations: Annotations,
}

impl Host {
    /// Re-derive the `HostDescription` that would produce this host, for
    /// anti-entropy's Scan A: when a peer is behind, we push the current
    /// host back out as a fresh `InternalHostEvent`.
    pub fn to_description(&self) -> HostDescription {
        HostDescription {
            mac: self.mac,
            vlan: self.vlan,
            location: self.location.clone(),
            ip_addresses: self.ip_addresses.clone(),
            annotations: self.annotations.clone(),
        }
    }
}

/// The four event kinds emitted to the delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostEventKind {
    Added,
    Moved,
    Updated,
    Removed,
}

/// A notification of an observed state transition in the host table.
///
/// Exactly one of these is emitted per call that actually changes state;
/// no-op updates emit nothing (see `host_table::update`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostEvent {
    pub kind: HostEventKind,
    pub subject: Host,
    /// For `Moved`, the connect point the host was leaving.
    pub previous_location: Option<ConnectPoint>,
}
