//! stream/session.rs
//!
//! One connected stream peer. The read half and the receive buffer belong to
//! the session's receive loop; the write half sits behind a `SessionHandle`
//! stored in the peer registry so senders can reach it.

use std::fmt;
use std::io;
use std::mem::MaybeUninit;
use std::sync::Arc;

use bytes::Bytes;
use socket2::SockRef;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::select;
use tokio::sync::{Mutex, Notify};
use tracing::{Instrument, debug, info_span, trace, warn};

use crate::net::{InboundMessage, PeerAddress, ReceiveBuffer};

use super::manager::Shared;

// -----------------------------------------------------------------------------
// ----- DisconnectReason ------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// A read failed with reset/abort.
    Reset,
    /// The peer closed its write side with nothing pending.
    RemoteClosed,
    /// The socket failed while arming the next read.
    RearmFailed,
    /// The framing strategy rejected the byte stream.
    Protocol,
    /// `disconnect_from`, `disconnect_all` or teardown on this side.
    Local,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisconnectReason::Reset => "reset",
            DisconnectReason::RemoteClosed => "remote closed",
            DisconnectReason::RearmFailed => "re-arm failed",
            DisconnectReason::Protocol => "protocol violation",
            DisconnectReason::Local => "local",
        };
        f.write_str(s)
    }
}

// -----------------------------------------------------------------------------
// ----- SessionHandle ---------------------------------------------------------

#[derive(Clone, Debug)]
pub(crate) struct SessionHandle {
    writer: Arc<Mutex<OwnedWriteHalf>>,
    stop: Arc<Notify>,
}

impl SessionHandle {
    fn new(writer: OwnedWriteHalf) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
            stop: Arc::new(Notify::new()),
        }
    }

    pub(crate) async fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await
    }

    /// Stop the receive loop and send FIN to the peer.
    pub(crate) async fn shutdown(&self) {
        self.stop();

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            trace!("write shutdown failed: {e}");
        }
    }

    /// Stop the receive loop. The write half closes once the last handle drops.
    pub(crate) fn stop(&self) {
        // notify_one keeps a permit if the loop is busy delivering
        self.stop.notify_one();
    }
}

// -----------------------------------------------------------------------------
// ----- Session ---------------------------------------------------------------

pub(crate) struct Session {
    peer: PeerAddress,
    reader: OwnedReadHalf,
    buffer: ReceiveBuffer,
    stop: Arc<Notify>,
    shared: Arc<Shared>,
}

// -----------------------------------------------------------------------------
// ----- Session: Static -------------------------------------------------------

impl Session {
    /// Split `stream` into a registry handle and the loop that will own the read half.
    pub(crate) fn open(
        stream: TcpStream,
        shared: Arc<Shared>,
    ) -> io::Result<(PeerAddress, SessionHandle, Session)> {
        let peer = PeerAddress::from(stream.peer_addr()?);

        if shared.options().nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                debug!("set_nodelay failed for {peer}: {e}");
            }
        }

        let (reader, writer) = stream.into_split();
        let handle = SessionHandle::new(writer);

        let session = Session {
            peer,
            reader,
            buffer: ReceiveBuffer::with_scratch_size(shared.options().scratch_size),
            stop: handle.stop.clone(),
            shared,
        };

        Ok((peer, handle, session))
    }
}

// -----------------------------------------------------------------------------
// ----- Session: Public -------------------------------------------------------

impl Session {
    pub(crate) fn peer(&self) -> PeerAddress {
        self.peer
    }

    pub(crate) fn spawn(self) {
        let span = info_span!("session", peer = %self.peer);
        tokio::spawn(self.run().instrument(span));
    }

    /// Receive loop. Reads are strictly sequential: a read completes, its
    /// messages are delivered, and only then is the next read issued.
    async fn run(mut self) {
        let framing = self.shared.framing();

        let reason = 'receive: loop {
            let read = select! {
                biased;

                _ = self.stop.notified() => {
                    trace!("receive loop stopped locally");
                    return;
                }

                read = self.reader.read(self.buffer.scratch_mut()) => read,
            };

            let n = match read {
                Ok(n) => n,
                Err(e) => {
                    trace!("read failed: {e}");
                    break DisconnectReason::Reset;
                }
            };

            if n == 0 {
                if !self.buffer.is_empty() {
                    warn!(
                        "discarding {} undelivered bytes from {}",
                        self.buffer.pending_len(),
                        self.peer
                    );
                }
                break DisconnectReason::RemoteClosed;
            }

            self.buffer.commit(n);
            trace!(bytes = n, pending = self.buffer.pending_len(), "raw read");

            let mut rearm_failed = false;
            let more_queued = if framing.wants_queue_probe() {
                match bytes_queued(&self.reader) {
                    Ok(queued) => queued,
                    Err(e) => {
                        trace!("queue probe failed: {e}");
                        rearm_failed = true;
                        false
                    }
                }
            } else {
                false
            };

            loop {
                match framing.next_message(self.buffer.pending_mut(), more_queued) {
                    Ok(Some(payload)) => self.deliver(payload),
                    Ok(None) => break,
                    Err(e) => {
                        warn!("dropping {}: {e}", self.peer);
                        break 'receive DisconnectReason::Protocol;
                    }
                }
            }

            if rearm_failed {
                break DisconnectReason::RearmFailed;
            }
        };

        self.shared.drop_peer(&self.peer, reason);
    }
}

// -----------------------------------------------------------------------------
// ----- Session: Private ------------------------------------------------------

impl Session {
    fn deliver(&self, payload: Bytes) {
        debug!(bytes = payload.len(), "received from {}", self.peer);

        let message = InboundMessage::new(Some(self.peer), payload);
        self.shared.received.emit(&message);
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

/// Whether the kernel already holds unread bytes for this socket. Peeks one
/// byte without consuming it; an EOF counts as nothing queued.
fn bytes_queued(reader: &OwnedReadHalf) -> io::Result<bool> {
    let stream: &TcpStream = reader.as_ref();
    let mut probe = [MaybeUninit::<u8>::uninit(); 1];

    match SockRef::from(stream).peek(&mut probe) {
        Ok(n) => Ok(n > 0),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(false),
        Err(e) => Err(e),
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
