// Outward address discovery
//
// "Connecting" a UDP socket sends no packets; it only asks the OS which
// local interface would route towards the probe target. That interface's
// address is what other hosts see for us on a flat network.

use std::net::{IpAddr, Ipv4Addr};
use tokio::net::UdpSocket;
use tracing::debug;

/// Default probe target; any routable address works
pub const DEFAULT_PROBE_TARGET: &str = "8.8.8.8:10002";

/// Address reported when no route to the probe target exists
pub const UNSPECIFIED: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Discover the local address used to reach `probe_target`.
///
/// Never fails: falls back to `0.0.0.0` when the host has no route.
pub async fn outward_ip(probe_target: &str) -> IpAddr {
    match try_outward_ip(probe_target).await {
        Ok(ip) => ip,
        Err(e) => {
            debug!("Outward address probe via {} failed: {}", probe_target, e);
            UNSPECIFIED
        }
    }
}

async fn try_outward_ip(probe_target: &str) -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(probe_target).await?;
    Ok(socket.local_addr()?.ip())
}
