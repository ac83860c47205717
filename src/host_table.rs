/// The replicated host table and its update/remove algorithm.
///
/// This is the core of HostMesh: a map from `HostId` to the best known
/// `StoredHost`, a tombstone map of removed hosts, and a secondary index
/// from `ConnectPoint` to the hosts currently attached there.
///
/// All three structures are mutated together, under one lock, so that a
/// caller never observes a host present in `hosts` but missing from
/// `locations`, or present in both `hosts` and `removed`. This is the
/// "single monitor" the design calls for: anti-entropy reconciliation and
/// local/peer updates all go through `apply_update` / `apply_remove`,
/// which take the lock once per host and release it before returning.
///
/// The update and remove algorithms are pure state transitions: given the
/// current state, a description, and a timestamp, they produce a new
/// state and at most one `HostEvent`. Local callers (`engine::HostMeshEngine`)
/// and the peer message handler in `gossip` both funnel through the same
/// two methods; only the local callers additionally broadcast.
use crate::clock::Timestamp;
use crate::types::{
    merge_annotations, ConnectPoint, DeviceId, Host, HostDescription, HostEvent, HostEventKind,
    HostId, MacAddress, ProviderId, Timestamped, VlanId,
};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Mutex;

/// The internal representation of a live host.
///
/// Only `location` carries a timestamp: it's the one attribute with
/// conflict potential (a host can only be attached in one place at a
/// time). IP addresses and annotations accumulate by set-union / map-merge
/// and can never regress, so they need no ordering of their own.
#[derive(Debug, Clone)]
struct StoredHost {
    provider_id: ProviderId,
    id: HostId,
    mac: MacAddress,
    vlan: VlanId,
    location: Timestamped<ConnectPoint>,
    ip_addresses: HashSet<IpAddr>,
    annotations: crate::types::Annotations,
}

impl StoredHost {
    fn to_host(&self) -> Host {
        Host {
            provider_id: self.provider_id.clone(),
            id: self.id.clone(),
            mac: self.mac,
            vlan: self.vlan,
            location: self.location.value.clone(),
            ip_addresses: self.ip_addresses.clone(),
            annotations: self.annotations.clone(),
        }
    }
}

/// Capacity hints and behavior knobs for a fresh `HostTable`.
#[derive(Debug, Clone, Copy)]
pub struct HostTableConfig {
    /// Initial capacity hint for the live and tombstone maps.
    pub hosts_expected: usize,
}

impl Default for HostTableConfig {
    fn default() -> Self {
        Self { hosts_expected: 64 }
    }
}

struct Inner {
    hosts: HashMap<HostId, StoredHost>,
    removed: HashMap<HostId, Timestamped<Host>>,
    locations: HashMap<ConnectPoint, HashSet<HostId>>,
}

/// The replicated host inventory.
///
/// Deliberately not `Clone`: callers share a `HostTable` behind an `Arc`
/// (see `engine::HostMeshEngine`), the same way the rest of the crate
/// shares its concurrent state.
pub struct HostTable {
    inner: Mutex<Inner>,
}

impl HostTable {
    pub fn new(config: HostTableConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                hosts: HashMap::with_capacity(config.hosts_expected),
                removed: HashMap::with_capacity(config.hosts_expected),
                locations: HashMap::new(),
            }),
        }
    }

    /// Apply a create-or-update for `host_id`, as described by `descr`,
    /// observed at `timestamp`. This is the pure algorithm shared by the
    /// local API and the peer update handler; neither broadcasting nor
    /// logging happens here.
    ///
    /// Returns the event to emit, if any. No event means the update was a
    /// stale resurrection, a tie, or a true no-op.
    pub fn apply_update(
        &self,
        provider_id: ProviderId,
        host_id: HostId,
        descr: HostDescription,
        timestamp: Timestamp,
    ) -> Option<HostEvent> {
        let mut inner = self.inner.lock().expect("host table lock poisoned");

        if let Some(tombstone) = inner.removed.get(&host_id) {
            if tombstone.timestamp.is_newer(&timestamp) {
                // A newer remove already happened; this update is a stale
                // resurrection attempt and must not bring the host back.
                return None;
            }
            // The update postdates the tombstone: resurrect as a create.
            inner.removed.remove(&host_id);
        }

        match inner.hosts.get(&host_id).cloned() {
            None => {
                let stored = StoredHost {
                    provider_id,
                    id: host_id.clone(),
                    mac: descr.mac,
                    vlan: descr.vlan,
                    location: Timestamped::new(descr.location.clone(), timestamp),
                    ip_addresses: descr.ip_addresses,
                    annotations: descr.annotations,
                };
                let host = stored.to_host();
                inner
                    .locations
                    .entry(descr.location)
                    .or_default()
                    .insert(host_id.clone());
                inner.hosts.insert(host_id, stored);
                Some(HostEvent {
                    kind: HostEventKind::Added,
                    subject: host,
                    previous_location: None,
                })
            }
            Some(existing) => {
                let moved = timestamp.is_newer(&existing.location.timestamp)
                    && descr.location != existing.location.value;

                if moved {
                    let previous_location = existing.location.value.clone();
                    if let Some(set) = inner.locations.get_mut(&previous_location) {
                        set.remove(&host_id);
                        if set.is_empty() {
                            inner.locations.remove(&previous_location);
                        }
                    }
                    inner
                        .locations
                        .entry(descr.location.clone())
                        .or_default()
                        .insert(host_id.clone());

                    let mut stored = existing;
                    stored.location = Timestamped::new(descr.location, timestamp);
                    let host = stored.to_host();
                    inner.hosts.insert(host_id, stored);
                    return Some(HostEvent {
                        kind: HostEventKind::Moved,
                        subject: host,
                        previous_location: Some(previous_location),
                    });
                }

                let no_new_ips = descr.ip_addresses.is_subset(&existing.ip_addresses);
                if no_new_ips && descr.annotations.is_empty() {
                    return None;
                }

                let mut stored = existing;
                stored.ip_addresses.extend(descr.ip_addresses);
                stored.annotations = merge_annotations(&stored.annotations, &descr.annotations);
                let host = stored.to_host();
                inner.hosts.insert(host_id, stored);
                Some(HostEvent {
                    kind: HostEventKind::Updated,
                    subject: host,
                    previous_location: None,
                })
            }
        }
    }

    /// Remove `host_id`, recording a tombstone at `timestamp`.
    ///
    /// No-op (returns `None`) if the host is not currently live: either it
    /// was never seen, or it's already tombstoned.
    pub fn apply_remove(&self, host_id: HostId, timestamp: Timestamp) -> Option<HostEvent> {
        let mut inner = self.inner.lock().expect("host table lock poisoned");

        let stored = inner.hosts.remove(&host_id)?;
        if let Some(set) = inner.locations.get_mut(&stored.location.value) {
            set.remove(&host_id);
            if set.is_empty() {
                inner.locations.remove(&stored.location.value);
            }
        }
        let host = stored.to_host();
        inner
            .removed
            .insert(host_id, Timestamped::new(host.clone(), timestamp));

        Some(HostEvent {
            kind: HostEventKind::Removed,
            subject: host,
            previous_location: None,
        })
    }

    /// The live timestamp and tombstone timestamp, if any, for `host_id`.
    /// Used by anti-entropy reconciliation.
    pub fn timestamps_for(&self, host_id: &HostId) -> (Option<Timestamp>, Option<Timestamp>) {
        let inner = self.inner.lock().expect("host table lock poisoned");
        let live = inner.hosts.get(host_id).map(|h| h.location.timestamp);
        let dead = inner.removed.get(host_id).map(|t| t.timestamp);
        (live, dead)
    }

    pub fn get_host(&self, host_id: &HostId) -> Option<Host> {
        let inner = self.inner.lock().expect("host table lock poisoned");
        inner.hosts.get(host_id).map(StoredHost::to_host)
    }

    pub fn get_hosts(&self) -> Vec<Host> {
        let inner = self.inner.lock().expect("host table lock poisoned");
        inner.hosts.values().map(StoredHost::to_host).collect()
    }

    pub fn get_hosts_by_vlan(&self, vlan: VlanId) -> Vec<Host> {
        let inner = self.inner.lock().expect("host table lock poisoned");
        inner
            .hosts
            .values()
            .filter(|h| h.vlan == vlan)
            .map(StoredHost::to_host)
            .collect()
    }

    pub fn get_hosts_by_mac(&self, mac: MacAddress) -> Vec<Host> {
        let inner = self.inner.lock().expect("host table lock poisoned");
        inner
            .hosts
            .values()
            .filter(|h| h.mac == mac)
            .map(StoredHost::to_host)
            .collect()
    }

    pub fn get_hosts_by_ip(&self, ip: IpAddr) -> Vec<Host> {
        let inner = self.inner.lock().expect("host table lock poisoned");
        inner
            .hosts
            .values()
            .filter(|h| h.ip_addresses.contains(&ip))
            .map(StoredHost::to_host)
            .collect()
    }

    /// Hosts currently attached at `cp`. This is the location index
    /// lookup: O(1) plus the size of the result set, not a full scan.
    pub fn get_connected_hosts(&self, cp: &ConnectPoint) -> Vec<Host> {
        let inner = self.inner.lock().expect("host table lock poisoned");
        inner
            .locations
            .get(cp)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.hosts.get(id))
            .map(StoredHost::to_host)
            .collect()
    }

    /// Hosts attached anywhere on `device_id`. Cardinality is bounded by
    /// the device's port count, so a scan over `locations` is acceptable.
    pub fn get_connected_hosts_on_device(&self, device_id: &DeviceId) -> Vec<Host> {
        let inner = self.inner.lock().expect("host table lock poisoned");
        inner
            .locations
            .iter()
            .filter(|(cp, _)| &cp.device_id == device_id)
            .flat_map(|(_, ids)| ids.iter())
            .filter_map(|id| inner.hosts.get(id))
            .map(StoredHost::to_host)
            .collect()
    }

    /// A snapshot of every live host's id, provider and location
    /// timestamp — the payload of an anti-entropy advertisement.
    pub fn live_digest(&self) -> Vec<(HostId, ProviderId, Timestamp)> {
        let inner = self.inner.lock().expect("host table lock poisoned");
        inner
            .hosts
            .values()
            .map(|h| (h.id.clone(), h.provider_id.clone(), h.location.timestamp))
            .collect()
    }

    /// A snapshot of every tombstone's host id and removal timestamp.
    pub fn tombstone_digest(&self) -> Vec<(HostId, Timestamp)> {
        let inner = self.inner.lock().expect("host table lock poisoned");
        inner
            .removed
            .iter()
            .map(|(id, t)| (id.clone(), t.timestamp))
            .collect()
    }

    /// A snapshot of every tombstone's host id, last known provider, and
    /// removal timestamp. Used by anti-entropy Scan B, which must key its
    /// advertisement lookups by `(hostId, providerId)` just like Scan A.
    pub fn tombstone_provider_digest(&self) -> Vec<(HostId, ProviderId, Timestamp)> {
        let inner = self.inner.lock().expect("host table lock poisoned");
        inner
            .removed
            .iter()
            .map(|(id, t)| (id.clone(), t.value.provider_id.clone(), t.timestamp))
            .collect()
    }

    pub fn is_tombstoned(&self, host_id: &HostId) -> bool {
        let inner = self.inner.lock().expect("host table lock poisoned");
        inner.removed.contains_key(host_id)
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("host table lock poisoned");
        inner.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tombstone_count(&self) -> usize {
        let inner = self.inner.lock().expect("host table lock poisoned");
        inner.removed.len()
    }

    /// Discard every live host, tombstone, and location entry. Used on
    /// engine shutdown so a later `activate()` on the same engine starts
    /// from an empty table instead of replaying state from a prior run.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("host table lock poisoned");
        inner.hosts.clear();
        inner.removed.clear();
        inner.locations.clear();
    }
}
