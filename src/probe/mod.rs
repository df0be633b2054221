// probe/mod.rs
//! Stateless address and port queries used around the transports. Nothing
//! here keeps a socket open past the call.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, UdpSocket};

use tokio::net::lookup_host;
use tracing::{debug, trace};

// Documentation range (TEST-NET-1); only used to pick a route, never sent to.
const ROUTE_PROBE: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 9);

/// A TCP port that was free at the moment of the call.
pub fn free_tcp_port() -> io::Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    Ok(listener.local_addr()?.port())
}

/// A UDP port that was free at the moment of the call.
pub fn free_udp_port() -> io::Result<u16> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    Ok(socket.local_addr()?.port())
}

/// IPv4 address of the interface that carries the default route. `None` on a
/// host with no route off the loopback.
pub fn primary_local_address() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;

    // connect() on a datagram socket only selects a route; nothing is sent.
    if let Err(e) = socket.connect(ROUTE_PROBE) {
        debug!("no default route: {e}");
        return None;
    }

    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_unspecified() => Some(v4),
        other => {
            trace!("route probe picked {other}");
            None
        }
    }
}

/// IPv4 addresses `host` resolves to, in resolver order.
pub async fn resolve_v4(host: &str) -> io::Result<Vec<Ipv4Addr>> {
    let found = lookup_host((host, 0)).await?;

    Ok(found
        .filter_map(|addr| match addr.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .collect())
}

/// IPv6 addresses `host` resolves to, in resolver order.
pub async fn resolve_v6(host: &str) -> io::Result<Vec<Ipv6Addr>> {
    let found = lookup_host((host, 0)).await?;

    Ok(found
        .filter_map(|addr| match addr.ip() {
            IpAddr::V6(v6) => Some(v6),
            IpAddr::V4(_) => None,
        })
        .collect())
}
