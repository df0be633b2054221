use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use crate::correlator::{self, Correlate};
use crate::errors::{NetError, NetResult};
use crate::net::peer_address::wildcard_for;
use crate::net::{
    EventHub, InboundMessage, LoopTask, PeerAddress, ReceiveBuffer, SessionOptions,
};

// -----------------------------------------------------------------------------
// ----- ChannelShared ---------------------------------------------------------

struct ChannelShared {
    socket: UdpSocket,
    local_addr: SocketAddr,
    remote: Option<PeerAddress>,
    options: SessionOptions,
    closed: AtomicBool,

    // The broadcast flag is socket-wide, so sends take turns.
    send_lock: tokio::sync::Mutex<()>,
    correlation: tokio::sync::Mutex<()>,

    received: EventHub<InboundMessage>,
}

impl ChannelShared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn send_to(&self, bytes: &[u8], target: PeerAddress) -> NetResult<()> {
        if self.is_closed() {
            return Err(NetError::Closed);
        }

        let _turn = self.send_lock.lock().await;

        if !target.is_broadcast() {
            self.socket.send_to(bytes, target.socket_addr()).await?;
            debug!(bytes = bytes.len(), "datagram to {target}");
            return Ok(());
        }

        self.socket.set_broadcast(true)?;
        let sent = self.socket.send_to(bytes, target.socket_addr()).await;

        // Switch broadcast back off whatever the send returned.
        if let Err(e) = self.socket.set_broadcast(false) {
            warn!("could not disable broadcast on {}: {e}", self.local_addr);
            sent?;
            return Err(e.into());
        }

        sent?;
        debug!(bytes = bytes.len(), "broadcast datagram to port {}", target.port());
        Ok(())
    }

    fn paired_remote(&self) -> NetResult<PeerAddress> {
        match self.remote {
            Some(remote) if remote.is_routable() => Ok(remote),
            _ => Err(NetError::NotSupported("send requires a paired remote address")),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- DatagramChannel -------------------------------------------------------

/// One local datagram socket with a background receive loop. Every datagram
/// becomes one `received` notification tagged with its sender.
pub struct DatagramChannel {
    shared: Arc<ChannelShared>,
    recv_task: LoopTask,
}

// -----------------------------------------------------------------------------
// ----- DatagramChannel: Static -----------------------------------------------

impl DatagramChannel {
    /// Wildcard address, system-assigned port.
    pub async fn bind() -> NetResult<Self> {
        Self::bind_port(0).await
    }

    pub async fn bind_port(port: u16) -> NetResult<Self> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        Self::bind_addr(addr, SessionOptions::default()).await
    }

    pub async fn bind_addr(addr: SocketAddr, options: SessionOptions) -> NetResult<Self> {
        Self::open(addr, None, options).await
    }

    /// Channel whose `send` and paired requests go to `remote`. The socket
    /// stays unconnected, so datagrams from other senders still arrive.
    pub async fn paired(
        remote: SocketAddr,
        local_port: u16,
        options: SessionOptions,
    ) -> NetResult<Self> {
        let local = wildcard_for(&remote, local_port);
        Self::open(local, Some(PeerAddress::from(remote)), options).await
    }

    async fn open(
        addr: SocketAddr,
        remote: Option<PeerAddress>,
        options: SessionOptions,
    ) -> NetResult<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| NetError::Bind { addr, source })?;

        let local_addr = socket.local_addr()?;
        let shared = Arc::new(ChannelShared {
            socket,
            local_addr,
            remote,
            options,
            closed: AtomicBool::new(false),
            send_lock: tokio::sync::Mutex::new(()),
            correlation: tokio::sync::Mutex::new(()),
            received: EventHub::new("received"),
        });

        let span = info_span!("datagram", port = local_addr.port());
        let task = LoopTask::spawn(receive_loop(shared.clone()).instrument(span));

        match remote {
            Some(remote) => info!("datagram channel on {local_addr} paired with {remote}"),
            None => info!("datagram channel on {local_addr}"),
        }

        Ok(Self {
            shared,
            recv_task: task,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- DatagramChannel: Public -----------------------------------------------

impl DatagramChannel {
    pub fn received(&self) -> &EventHub<InboundMessage> {
        &self.shared.received
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    pub fn remote_addr(&self) -> Option<PeerAddress> {
        self.shared.remote
    }

    pub fn options(&self) -> &SessionOptions {
        &self.shared.options
    }

    /// Current state of the socket's broadcast option.
    pub fn broadcast_enabled(&self) -> NetResult<bool> {
        Ok(self.shared.socket.broadcast()?)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Whether the receive loop is still running.
    pub fn is_receiving(&self) -> bool {
        self.recv_task.is_running()
    }

    /// Wait for the receive loop to end and report why: `Ok` after `close`,
    /// the socket error if receiving failed.
    pub async fn stopped(&self) -> NetResult<()> {
        self.recv_task.stopped().await
    }

    pub fn sender(&self) -> DatagramSender {
        DatagramSender {
            shared: self.shared.clone(),
        }
    }

    pub async fn send_to(&self, bytes: &[u8], target: impl Into<PeerAddress>) -> NetResult<()> {
        self.shared.send_to(bytes, target.into()).await
    }

    /// Send to the paired remote address.
    pub async fn send(&self, bytes: &[u8]) -> NetResult<()> {
        let remote = self.shared.paired_remote()?;
        self.shared.send_to(bytes, remote).await
    }

    pub async fn send_and_receive(
        &self,
        bytes: &[u8],
        target: impl Into<PeerAddress>,
        timeout: Duration,
    ) -> NetResult<Option<InboundMessage>> {
        correlator::send_and_receive(self, bytes, target.into(), timeout).await
    }

    /// Request to the paired remote address. `None` uses the configured
    /// response timeout.
    pub async fn send_and_receive_paired(
        &self,
        bytes: &[u8],
        timeout: Option<Duration>,
    ) -> NetResult<Option<InboundMessage>> {
        let remote = self.shared.paired_remote()?;
        let timeout = timeout.unwrap_or(self.shared.options.response_timeout);
        self.send_and_receive(bytes, remote, timeout).await
    }

    /// Stop receiving and drop every observer. Safe to call more than once.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.recv_task.stop();
        self.shared.received.clear();

        info!("datagram channel on {} closed", self.shared.local_addr);
    }
}

impl Drop for DatagramChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for DatagramChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatagramChannel")
            .field("local_addr", &self.shared.local_addr)
            .field("remote", &self.shared.remote)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Correlate for DatagramChannel {
    fn inbound(&self) -> &EventHub<InboundMessage> {
        &self.shared.received
    }

    fn correlation_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.shared.correlation
    }

    fn send_request<'a>(
        &'a self,
        bytes: &'a [u8],
        target: PeerAddress,
    ) -> impl Future<Output = NetResult<()>> + Send + 'a {
        self.shared.send_to(bytes, target)
    }
}

// -----------------------------------------------------------------------------
// ----- DatagramSender --------------------------------------------------------

/// Send-side view of a `DatagramChannel`, for replying from inside observers.
#[derive(Clone)]
pub struct DatagramSender {
    shared: Arc<ChannelShared>,
}

impl DatagramSender {
    pub async fn send_to(&self, bytes: &[u8], target: impl Into<PeerAddress>) -> NetResult<()> {
        self.shared.send_to(bytes, target.into()).await
    }

    pub async fn send(&self, bytes: &[u8]) -> NetResult<()> {
        let remote = self.shared.paired_remote()?;
        self.shared.send_to(bytes, remote).await
    }
}

impl fmt::Debug for DatagramSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatagramSender")
            .field("local_addr", &self.shared.local_addr)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Receive Loop ------------------------------------------------

async fn receive_loop(shared: Arc<ChannelShared>) -> NetResult<()> {
    let mut buffer = ReceiveBuffer::with_scratch_size(shared.options.scratch_size);

    loop {
        let (n, from) = match shared.socket.recv_from(buffer.scratch_mut()).await {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) if shared.is_closed() => return Ok(()),
            Err(e) => {
                error!("receive on {} failed: {e}", shared.local_addr);
                return Err(e.into());
            }
        };

        if n == 0 {
            trace!("empty datagram from {from}");
            continue;
        }

        buffer.commit(n);
        let message = InboundMessage::new(Some(PeerAddress::from(from)), buffer.take_message());

        debug!(bytes = n, "datagram from {from}");
        shared.received.emit(&message);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
