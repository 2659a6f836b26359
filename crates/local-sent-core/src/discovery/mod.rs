//! Dual-channel LAN discovery.
//!
//! Receivers advertise over mDNS and answer UDP broadcast probes; senders run
//! both channels in parallel and merge the results keyed by `host:port`.
//! Addresses are normalized to IPv4 dotted quads and filtered to RFC1918 by
//! default, and devices matching a local interface address are removed unless
//! self-discovery is requested.

pub mod addr;
pub mod mdns;
pub mod probe;

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

pub use mdns::MdnsAdvertiser;
pub use probe::UdpResponder;

/// A receiver found on the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Advertised instance name.
    pub name: String,
    /// IPv4 dotted quad to connect to.
    pub host: String,
    /// Transfer port.
    pub port: u16,
    /// All advertised IPv4 addresses, de-duplicated.
    pub addresses: Vec<String>,
}

/// Discovery filter options.
#[derive(Debug, Clone)]
pub struct DiscoverOptions {
    /// Keep devices whose addresses match a local interface.
    pub include_self: bool,
    /// Keep loopback addresses.
    pub include_loopback: bool,
    /// Keep only RFC1918 IPv4 addresses and drop link-local.
    pub only_lan_ipv4: bool,
}

impl Default for DiscoverOptions {
    fn default() -> Self {
        Self {
            include_self: false,
            include_loopback: false,
            only_lan_ipv4: true,
        }
    }
}

/// Browse mDNS and probe over UDP broadcast concurrently, then merge,
/// normalize, filter, and self-filter the results.
pub async fn discover_devices(
    timeout: Duration,
    options: &DiscoverOptions,
) -> Result<Vec<DiscoveredDevice>> {
    let (mdns_result, probe_result) =
        tokio::join!(mdns::browse(timeout), probe::broadcast_probe(timeout));

    let mut raw = Vec::new();
    let mut failures = Vec::new();
    match mdns_result {
        Ok(devices) => raw.extend(devices),
        Err(e) => {
            warn!(error = %e, "mDNS browse unavailable");
            failures.push(e);
        }
    }
    match probe_result {
        Ok(devices) => raw.extend(devices),
        Err(e) => {
            warn!(error = %e, "UDP probe unavailable");
            failures.push(e);
        }
    }
    if raw.is_empty() && failures.len() == 2 {
        return Err(failures.remove(0));
    }

    let local = local_addresses();
    let mut merged: BTreeMap<String, DiscoveredDevice> = BTreeMap::new();

    for device in raw {
        let Some(device) = normalize_device(device, options) else {
            continue;
        };
        if !options.include_self && is_self(&device, &local) {
            continue;
        }
        let key = format!("{}:{}", device.host, device.port);
        match merged.get_mut(&key) {
            None => {
                merged.insert(key, device);
            }
            Some(existing) => {
                if existing.name.is_empty() {
                    existing.name = device.name;
                }
                for address in device.addresses {
                    if !existing.addresses.contains(&address) {
                        existing.addresses.push(address);
                    }
                }
            }
        }
    }

    Ok(merged.into_values().collect())
}

/// Normalize a device's host and address list; drop it if nothing usable
/// remains.
fn normalize_device(
    device: DiscoveredDevice,
    options: &DiscoverOptions,
) -> Option<DiscoveredDevice> {
    let mut addresses = Vec::new();
    for raw in device
        .addresses
        .iter()
        .chain(std::iter::once(&device.host))
    {
        let Some(ip) = addr::normalize_address(raw) else {
            continue;
        };
        if !addr::keep_address(&ip, options) {
            continue;
        }
        let text = ip.to_string();
        if !addresses.contains(&text) {
            addresses.push(text);
        }
    }

    let host = addr::normalize_address(&device.host)
        .filter(|ip| addr::keep_address(ip, options))
        .map(|ip| ip.to_string())
        .or_else(|| addresses.first().cloned())?;

    Some(DiscoveredDevice {
        name: device.name,
        host,
        port: device.port,
        addresses,
    })
}

fn is_self(device: &DiscoveredDevice, local: &HashSet<String>) -> bool {
    local.contains(&device.host) || device.addresses.iter().any(|a| local.contains(a))
}

/// All local interface IPv4 addresses plus loopback names.
fn local_addresses() -> HashSet<String> {
    let mut addresses: HashSet<String> = ["127.0.0.1".to_string(), "localhost".to_string()]
        .into_iter()
        .collect();

    match if_addrs::get_if_addrs() {
        Ok(interfaces) => {
            for interface in interfaces {
                addresses.insert(interface.ip().to_string());
            }
        }
        Err(e) => warn!(error = %e, "failed to enumerate local interfaces"),
    }
    addresses
}
