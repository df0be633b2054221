use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tracing::debug;

use crate::errors::{NetError, NetResult};
use crate::net::PeerAddress;
use crate::net::peer_address::wildcard_for;

/// Send one datagram from a throwaway socket bound to `local_port`
/// (0 = system-assigned). Broadcast is enabled only for a broadcast target.
pub async fn send_once(bytes: &[u8], remote: SocketAddr, local_port: u16) -> NetResult<()> {
    let target = PeerAddress::from(remote);
    if !target.is_routable() {
        return Err(NetError::NotSupported("datagram target needs an address and a port"));
    }

    let local = wildcard_for(&remote, local_port);

    let socket = UdpSocket::bind(local)
        .await
        .map_err(|source| NetError::Bind { addr: local, source })?;

    if target.is_broadcast() {
        socket.set_broadcast(true)?;
    }

    socket.send_to(bytes, remote).await?;
    debug!(bytes = bytes.len(), "datagram once to {remote}");
    Ok(())
}

/// `send_once` reduced to a success flag.
pub async fn send_once_quiet(bytes: &[u8], remote: SocketAddr, local_port: u16) -> bool {
    match send_once(bytes, remote, local_port).await {
        Ok(()) => true,
        Err(e) => {
            debug!("datagram once to {remote} failed: {e}");
            false
        }
    }
}
