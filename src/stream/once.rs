use std::net::SocketAddr;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpSocket;
use tracing::debug;

use crate::errors::{NetError, NetResult};
use crate::net::peer_address::wildcard_for;

/// Connect, write `bytes`, close. No manager and no receive loop.
pub async fn send_once(bytes: &[u8], remote: SocketAddr, local_port: u16) -> NetResult<()> {
    let socket = if remote.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    if local_port != 0 {
        let local = wildcard_for(&remote, local_port);
        socket
            .bind(local)
            .map_err(|source| NetError::Bind { addr: local, source })?;
    }

    let mut stream = socket
        .connect(remote)
        .await
        .map_err(|source| NetError::Connect { addr: remote, source })?;

    stream.write_all(bytes).await?;
    stream.shutdown().await?;

    debug!(bytes = bytes.len(), "sent once to {remote}");
    Ok(())
}

/// `send_once` reduced to a success flag.
pub async fn send_once_quiet(bytes: &[u8], remote: SocketAddr, local_port: u16) -> bool {
    match send_once(bytes, remote, local_port).await {
        Ok(()) => true,
        Err(e) => {
            debug!("send once to {remote} failed: {e}");
            false
        }
    }
}
