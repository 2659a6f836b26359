//! UDP broadcast probe and responder.
//!
//! The receiver binds UDP 37374 in reuse-address mode and answers any
//! datagram whose payload is exactly the discovery magic with a one-line JSON
//! `{ magic, name, port }`. The sender broadcasts the magic and collects
//! replies until its timeout elapses.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::constants::{DISCOVER_MAGIC, DISCOVERY_PORT};
use crate::discovery::DiscoveredDevice;
use crate::error::{Error, Result};

/// Reply datagram to a discovery probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProbeReply {
    magic: String,
    name: String,
    port: u16,
}

/// Running UDP responder; aborted on shutdown.
#[derive(Debug)]
pub struct UdpResponder {
    task: JoinHandle<()>,
}

impl UdpResponder {
    /// Bind the discovery port and answer probes with this receiver's name
    /// and transfer port.
    pub async fn spawn(name: String, port: u16) -> Result<Self> {
        let socket = bind_reuse(DISCOVERY_PORT)?;
        let task = tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            loop {
                let (len, peer) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => {
                        warn!(error = %e, "UDP responder receive failed");
                        continue;
                    }
                };
                if &buf[..len] != DISCOVER_MAGIC.as_bytes() {
                    continue;
                }
                let reply = ProbeReply {
                    magic: DISCOVER_MAGIC.to_string(),
                    name: name.clone(),
                    port,
                };
                match serde_json::to_vec(&reply) {
                    Ok(bytes) => {
                        if let Err(e) = socket.send_to(&bytes, peer).await {
                            warn!(error = %e, %peer, "UDP reply failed");
                        } else {
                            debug!(%peer, "answered discovery probe");
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to encode probe reply"),
                }
            }
        });
        Ok(Self { task })
    }

    /// Stop answering probes.
    pub fn shutdown(self) {
        self.task.abort();
    }
}

/// Broadcast the discovery magic and collect replies until `timeout` elapses.
pub async fn broadcast_probe(timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;

    let target = SocketAddr::from((Ipv4Addr::BROADCAST, DISCOVERY_PORT));
    socket
        .send_to(DISCOVER_MAGIC.as_bytes(), target)
        .await
        .map_err(|e| Error::discovery(format!("broadcast send failed: {e}")))?;

    let deadline = Instant::now() + timeout;
    let mut devices = Vec::new();
    let mut buf = [0u8; 2048];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let (len, peer) = match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                warn!(error = %e, "probe receive failed");
                continue;
            }
            Err(_) => break,
        };

        let reply: ProbeReply = match serde_json::from_slice(&buf[..len]) {
            Ok(reply) => reply,
            Err(_) => continue,
        };
        if reply.magic != DISCOVER_MAGIC {
            continue;
        }

        let host = peer.ip().to_string();
        debug!(name = reply.name, host, port = reply.port, "probe reply");
        devices.push(DiscoveredDevice {
            name: reply.name,
            host: host.clone(),
            port: reply.port,
            addresses: vec![host],
        });
    }

    Ok(devices)
}

fn bind_reuse(port: u16) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&addr.into())?;
    Ok(UdpSocket::from_std(socket.into())?)
}
