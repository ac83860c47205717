/// Address bindings: a pure local, unreplicated adjunct.
///
/// §4.5 of the design calls this out explicitly as included only because
/// it shares the component boundary with the host table, not because it
/// is interesting engineering: a `ConnectPoint → PortAddresses` multimap,
/// synchronized independently of `HostTable`'s single monitor, with no
/// gossip, no timestamps, and no tombstones.
use crate::types::ConnectPoint;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;

use crate::types::MacAddress;

/// The MAC addresses and IP addresses bound to a single switch port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortAddresses {
    pub mac_addresses: HashSet<MacAddress>,
    pub ip_addresses: HashSet<IpAddr>,
}

impl PortAddresses {
    pub fn is_empty(&self) -> bool {
        self.mac_addresses.is_empty() && self.ip_addresses.is_empty()
    }
}

/// Local-only multimap of addresses observed per `ConnectPoint`. Not
/// gossiped, not versioned: last local write simply wins, and restart
/// loses it, same as everything else in this crate.
#[derive(Default)]
pub struct AddressBindings {
    bindings: DashMap<ConnectPoint, PortAddresses>,
}

impl AddressBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `macs`/`ips` into whatever is already bound at `cp`.
    pub fn update(
        &self,
        cp: ConnectPoint,
        macs: impl IntoIterator<Item = MacAddress>,
        ips: impl IntoIterator<Item = IpAddr>,
    ) {
        let mut entry = self.bindings.entry(cp).or_default();
        entry.mac_addresses.extend(macs);
        entry.ip_addresses.extend(ips);
    }

    /// Remove specific addresses from `cp`'s bindings, dropping the entry
    /// entirely once it is empty.
    pub fn remove(
        &self,
        cp: &ConnectPoint,
        macs: impl IntoIterator<Item = MacAddress>,
        ips: impl IntoIterator<Item = IpAddr>,
    ) {
        if let Some(mut entry) = self.bindings.get_mut(cp) {
            for mac in macs {
                entry.mac_addresses.remove(&mac);
            }
            for ip in ips {
                entry.ip_addresses.remove(&ip);
            }
            if entry.is_empty() {
                drop(entry);
                self.bindings.remove(cp);
            }
        }
    }

    /// Drop every binding recorded at `cp`.
    pub fn clear(&self, cp: &ConnectPoint) {
        self.bindings.remove(cp);
    }

    /// Drop every binding at every connect point. Used on engine shutdown.
    pub fn clear_all(&self) {
        self.bindings.clear();
    }

    /// A snapshot of every connect point's bindings.
    pub fn get_all(&self) -> Vec<(ConnectPoint, PortAddresses)> {
        self.bindings
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn get_for_port(&self, cp: &ConnectPoint) -> PortAddresses {
        self.bindings.get(cp).map(|e| e.clone()).unwrap_or_default()
    }
}
