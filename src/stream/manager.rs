use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use crate::correlator::{self, Correlate};
use crate::errors::{NetError, NetResult};
use crate::net::peer_address::wildcard_for;
use crate::net::{
    EventHub, FramingStrategy, InboundMessage, LoopTask, PeerAddress, PeerRegistry,
    SessionOptions,
};

use super::session::{DisconnectReason, Session, SessionHandle};

// -----------------------------------------------------------------------------
// ----- Role ------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => f.write_str("server"),
            Role::Client => f.write_str("client"),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Shared ----------------------------------------------------------------

/// State reachable from the manager, its senders, the accept loop and every
/// session loop. Registry mutations all go through the one mutex.
pub(crate) struct Shared {
    role: Role,
    local_addr: SocketAddr,
    options: SessionOptions,
    framing: Arc<dyn FramingStrategy>,
    registry: Mutex<PeerRegistry<SessionHandle>>,
    closed: AtomicBool,
    correlation: tokio::sync::Mutex<()>,

    pub(crate) accepted: EventHub<PeerAddress>,
    pub(crate) received: EventHub<InboundMessage>,
    pub(crate) disconnected: EventHub<PeerAddress>,
}

impl Shared {
    fn new(role: Role, local_addr: SocketAddr, options: SessionOptions) -> Arc<Self> {
        Arc::new(Self {
            role,
            local_addr,
            framing: options.framing_strategy(),
            options,
            registry: Mutex::new(PeerRegistry::new()),
            closed: AtomicBool::new(false),
            correlation: tokio::sync::Mutex::new(()),
            accepted: EventHub::new("accepted"),
            received: EventHub::new("received"),
            disconnected: EventHub::new("disconnected"),
        })
    }

    pub(crate) fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub(crate) fn framing(&self) -> Arc<dyn FramingStrategy> {
        self.framing.clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Flip to closed. Returns true if it already was.
    fn mark_closed(&self) -> bool {
        let _registry = self.registry.lock();
        self.closed.swap(true, Ordering::AcqRel)
    }

    /// Register a freshly connected stream. The caller spawns the returned loop.
    fn register(self: &Arc<Self>, stream: TcpStream) -> NetResult<Session> {
        let (peer, handle, session) = Session::open(stream, self.clone())?;

        // `closed` only flips under the registry lock, so a peer added here
        // is always seen by the teardown drain.
        let mut registry = self.registry.lock();
        if self.is_closed() {
            return Err(NetError::Closed);
        }
        registry.add(peer, handle)?;

        Ok(session)
    }

    fn find(&self, peer: &PeerAddress) -> NetResult<SessionHandle> {
        self.registry.lock().find(peer).cloned()
    }

    fn take(&self, peer: &PeerAddress) -> NetResult<SessionHandle> {
        self.registry.lock().remove(peer)
    }

    fn take_all(&self) -> Vec<(PeerAddress, SessionHandle)> {
        self.registry.lock().drain()
    }

    fn snapshot(&self) -> Vec<(PeerAddress, SessionHandle)> {
        self.registry.lock().all()
    }

    /// Remove `peer` and announce it, unless someone already did.
    pub(crate) fn drop_peer(&self, peer: &PeerAddress, reason: DisconnectReason) {
        let Ok(handle) = self.take(peer) else {
            trace!("{peer} already removed");
            return;
        };

        handle.stop();
        info!("disconnected from {peer} ({reason})");
        self.disconnected.emit(peer);
    }

    async fn send_to(&self, bytes: &[u8], peer: PeerAddress) -> NetResult<()> {
        if self.is_closed() {
            return Err(NetError::Closed);
        }

        let handle = self.find(&peer)?;
        handle.write_all(bytes).await?;

        debug!(bytes = bytes.len(), "sent to {peer}");
        Ok(())
    }

    async fn broadcast(&self, bytes: &[u8]) -> usize {
        let mut delivered = 0;

        for (peer, handle) in self.snapshot() {
            match handle.write_all(bytes).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!("send to {peer} failed: {e}"),
            }
        }

        debug!(bytes = bytes.len(), delivered, "broadcast");
        delivered
    }

    async fn disconnect_from(&self, peer: PeerAddress) -> NetResult<()> {
        let handle = self.take(&peer)?;
        handle.shutdown().await;

        info!("disconnected {peer} ({})", DisconnectReason::Local);
        self.disconnected.emit(&peer);
        Ok(())
    }

    async fn disconnect_all(&self) -> usize {
        let sessions = self.take_all();

        for (peer, handle) in &sessions {
            handle.shutdown().await;

            info!("disconnected {peer} ({})", DisconnectReason::Local);
            self.disconnected.emit(peer);
        }

        sessions.len()
    }

    fn clear_observers(&self) {
        self.accepted.clear();
        self.received.clear();
        self.disconnected.clear();
    }
}

// -----------------------------------------------------------------------------
// ----- StreamSessions --------------------------------------------------------

/// Stream session manager. Either listens and accepts any number of peers
/// (server) or holds the one peer it connected to (client).
pub struct StreamSessions {
    shared: Arc<Shared>,
    accept_task: Option<LoopTask>,
}

// -----------------------------------------------------------------------------
// ----- StreamSessions: Static ------------------------------------------------

impl StreamSessions {
    /// Server on every local address, `port` 0 meaning system-assigned.
    pub async fn listen(port: u16) -> NetResult<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        Self::listen_on(addr, SessionOptions::default()).await
    }

    pub async fn listen_on(addr: SocketAddr, options: SessionOptions) -> NetResult<Self> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };

        socket
            .bind(addr)
            .map_err(|source| NetError::Bind { addr, source })?;

        let listener = socket
            .listen(options.backlog)
            .map_err(|source| NetError::Bind { addr, source })?;

        let local_addr = listener.local_addr()?;
        let shared = Shared::new(Role::Server, local_addr, options);

        let span = info_span!("accept", port = local_addr.port());
        let task = LoopTask::spawn(accept_loop(listener, shared.clone()).instrument(span));

        info!("start listen port: {}", local_addr.port());

        Ok(Self {
            shared,
            accept_task: Some(task),
        })
    }

    pub async fn connect(remote: SocketAddr) -> NetResult<Self> {
        Self::connect_from(remote, 0, SessionOptions::default()).await
    }

    /// Client bound to `local_port` (0 = system-assigned) on the wildcard address.
    pub async fn connect_from(
        remote: SocketAddr,
        local_port: u16,
        options: SessionOptions,
    ) -> NetResult<Self> {
        let socket = if remote.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };

        if local_port != 0 {
            let local = wildcard_for(&remote, local_port);
            socket
                .bind(local)
                .map_err(|source| NetError::Bind {
                    addr: local,
                    source,
                })?;
        }

        let stream = socket
            .connect(remote)
            .await
            .map_err(|source| NetError::Connect {
                addr: remote,
                source,
            })?;

        let local_addr = stream.local_addr()?;
        let shared = Shared::new(Role::Client, local_addr, options);

        let session = shared.register(stream)?;
        info!("connected to {}", session.peer());
        session.spawn();

        Ok(Self {
            shared,
            accept_task: None,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- StreamSessions: Notifications -----------------------------------------

impl StreamSessions {
    pub fn accepted(&self) -> &EventHub<PeerAddress> {
        &self.shared.accepted
    }

    pub fn received(&self) -> &EventHub<InboundMessage> {
        &self.shared.received
    }

    pub fn disconnected(&self) -> &EventHub<PeerAddress> {
        &self.shared.disconnected
    }
}

// -----------------------------------------------------------------------------
// ----- StreamSessions: Public ------------------------------------------------

impl StreamSessions {
    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    pub fn options(&self) -> &SessionOptions {
        &self.shared.options
    }

    pub fn peers(&self) -> Vec<PeerAddress> {
        self.shared.registry.lock().addresses()
    }

    pub fn peer_count(&self) -> usize {
        self.shared.registry.lock().len()
    }

    pub fn contains(&self, peer: impl Into<PeerAddress>) -> bool {
        self.shared.registry.lock().contains(&peer.into())
    }

    /// The connected peer of a client-mode manager.
    pub fn remote_addr(&self) -> Option<PeerAddress> {
        match self.shared.role {
            Role::Client => self.peers().first().copied(),
            Role::Server => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Whether the accept loop is still serving (server mode only).
    pub fn is_accepting(&self) -> bool {
        self.accept_task.as_ref().is_some_and(LoopTask::is_running)
    }

    /// Wait for the accept loop to end and report why. `Ok` after `close`
    /// and in client mode; the listener error if the socket stopped serving.
    pub async fn stopped(&self) -> NetResult<()> {
        match &self.accept_task {
            Some(task) => task.stopped().await,
            None => Ok(()),
        }
    }

    /// Cloneable send-side handle, usable from inside observers.
    pub fn sender(&self) -> StreamSender {
        StreamSender {
            shared: self.shared.clone(),
        }
    }

    pub async fn send_to(&self, bytes: &[u8], peer: impl Into<PeerAddress>) -> NetResult<()> {
        self.shared.send_to(bytes, peer.into()).await
    }

    /// Best effort to every registered peer. Returns how many sends succeeded.
    pub async fn send(&self, bytes: &[u8]) -> usize {
        self.shared.broadcast(bytes).await
    }

    pub async fn disconnect_from(&self, peer: impl Into<PeerAddress>) -> NetResult<()> {
        self.shared.disconnect_from(peer.into()).await
    }

    /// Returns how many peers were disconnected.
    pub async fn disconnect_all(&self) -> usize {
        self.shared.disconnect_all().await
    }

    pub async fn send_and_receive(
        &self,
        bytes: &[u8],
        target: impl Into<PeerAddress>,
        timeout: Duration,
    ) -> NetResult<Option<InboundMessage>> {
        correlator::send_and_receive(self, bytes, target.into(), timeout).await
    }

    /// Client-mode request to the connected peer. `None` uses the configured
    /// response timeout.
    pub async fn send_and_receive_paired(
        &self,
        bytes: &[u8],
        timeout: Option<Duration>,
    ) -> NetResult<Option<InboundMessage>> {
        if self.shared.role != Role::Client {
            return Err(NetError::NotSupported("paired request requires client mode"));
        }

        let target = self.remote_addr().ok_or(NetError::Closed)?;
        let timeout = timeout.unwrap_or(self.shared.options.response_timeout);

        self.send_and_receive(bytes, target, timeout).await
    }

    /// Disconnect every peer, then close the listening socket. Safe to call
    /// more than once.
    pub async fn close(&self) {
        if self.shared.mark_closed() {
            return;
        }

        self.stop_accepting();
        let count = self.shared.disconnect_all().await;
        self.shared.clear_observers();

        info!("{} on {} closed, {count} peers dropped", self.shared.role, self.shared.local_addr);
    }
}

// -----------------------------------------------------------------------------
// ----- StreamSessions: Private -----------------------------------------------

impl StreamSessions {
    fn stop_accepting(&self) {
        if let Some(task) = &self.accept_task {
            task.stop();
        }
    }
}

impl Drop for StreamSessions {
    fn drop(&mut self) {
        if self.shared.mark_closed() {
            return;
        }

        self.stop_accepting();

        let sessions = self.shared.take_all();
        for (peer, handle) in &sessions {
            handle.stop();
            self.shared.disconnected.emit(peer);
        }

        self.shared.clear_observers();
        debug!("{} dropped with {} peers", self.shared.role, sessions.len());
    }
}

impl fmt::Debug for StreamSessions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSessions")
            .field("role", &self.shared.role)
            .field("local_addr", &self.shared.local_addr)
            .field("peers", &self.peer_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Correlate for StreamSessions {
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
// ----- StreamSender ----------------------------------------------------------

/// Send-side view of a `StreamSessions`. Does not keep the manager open.
#[derive(Clone)]
pub struct StreamSender {
    shared: Arc<Shared>,
}

impl StreamSender {
    pub async fn send_to(&self, bytes: &[u8], peer: impl Into<PeerAddress>) -> NetResult<()> {
        self.shared.send_to(bytes, peer.into()).await
    }

    pub async fn send(&self, bytes: &[u8]) -> usize {
        self.shared.broadcast(bytes).await
    }

    pub async fn disconnect_from(&self, peer: impl Into<PeerAddress>) -> NetResult<()> {
        self.shared.disconnect_from(peer.into()).await
    }
}

impl fmt::Debug for StreamSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSender")
            .field("local_addr", &self.shared.local_addr)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Accept Loop -------------------------------------------------

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) -> NetResult<()> {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(v) => v,
            Err(e) if is_per_connection_error(&e) => {
                warn!("accept failure: {e}");
                continue;
            }
            Err(e) => {
                error!("listener on {} stopped: {e}", shared.local_addr);
                return Err(e.into());
            }
        };

        if shared.is_closed() {
            return Ok(());
        }

        let session = match shared.register(stream) {
            Ok(session) => session,
            Err(e) => {
                warn!("dropping connection from {addr}: {e}");
                continue;
            }
        };

        let peer = session.peer();
        info!("connected from {peer}");

        shared.accepted.emit(&peer);
        session.spawn();
    }
}

/// Errors that belong to one half-open connection, not to the listener.
fn is_per_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
