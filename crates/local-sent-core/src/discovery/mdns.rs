//! mDNS advertisement and browsing of `_localsent._tcp` receivers.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tracing::{debug, warn};

use crate::constants::SERVICE_TYPE;
use crate::discovery::DiscoveredDevice;
use crate::error::{Error, Result};

/// A registered mDNS service; unregisters on shutdown.
pub struct MdnsAdvertiser {
    daemon: ServiceDaemon,
    fullname: String,
}

impl std::fmt::Debug for MdnsAdvertiser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MdnsAdvertiser")
            .field("fullname", &self.fullname)
            .finish_non_exhaustive()
    }
}

impl MdnsAdvertiser {
    /// Publish a `_localsent._tcp` record with the given instance name and
    /// transfer port on all interfaces.
    pub fn register(name: &str, port: u16) -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| Error::discovery(format!("mDNS daemon unavailable: {e}")))?;

        let host = format!("{}.local.", sanitize_label(name));
        let info = ServiceInfo::new(
            SERVICE_TYPE,
            name,
            &host,
            "",
            port,
            HashMap::<String, String>::new(),
        )
        .map_err(|e| Error::discovery(format!("invalid mDNS service info: {e}")))?
        .enable_addr_auto();

        let fullname = info.get_fullname().to_string();
        daemon
            .register(info)
            .map_err(|e| Error::discovery(format!("mDNS register failed: {e}")))?;
        debug!(fullname, port, "mDNS service registered");

        Ok(Self { daemon, fullname })
    }

    /// Unregister the record and stop the daemon.
    pub fn shutdown(self) {
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            warn!(error = %e, "mDNS unregister failed");
        }
        let _ = self.daemon.shutdown();
    }
}

/// Browse for receivers until the timeout elapses.
pub async fn browse(timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
    let daemon = ServiceDaemon::new()
        .map_err(|e| Error::discovery(format!("mDNS daemon unavailable: {e}")))?;
    let events = daemon
        .browse(SERVICE_TYPE)
        .map_err(|e| Error::discovery(format!("mDNS browse failed: {e}")))?;

    let deadline = Instant::now() + timeout;
    let mut devices = Vec::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, events.recv_async()).await {
            Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                if let Some(device) = device_from_service(&info) {
                    debug!(name = device.name, host = device.host, "mDNS resolved");
                    devices.push(device);
                }
            }
            Ok(Ok(_)) => continue,
            Ok(Err(_)) => break,
            Err(_) => break,
        }
    }

    let _ = daemon.stop_browse(SERVICE_TYPE);
    let _ = daemon.shutdown();
    Ok(devices)
}

fn device_from_service(info: &ServiceInfo) -> Option<DiscoveredDevice> {
    let addresses: Vec<String> = info
        .get_addresses()
        .iter()
        .map(|a| a.to_string())
        .collect();
    let host = addresses.first()?.clone();

    Some(DiscoveredDevice {
        name: instance_name(info.get_fullname()),
        host,
        port: info.get_port(),
        addresses,
    })
}

/// The instance portion of a fullname like `den._localsent._tcp.local.`.
fn instance_name(fullname: &str) -> String {
    fullname
        .strip_suffix(&format!(".{SERVICE_TYPE}"))
        .unwrap_or(fullname)
        .to_string()
}

/// mDNS host labels must not contain dots or spaces.
fn sanitize_label(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    if cleaned.is_empty() {
        "local-sent".to_string()
    } else {
        cleaned
    }
}
