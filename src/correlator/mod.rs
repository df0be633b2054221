//! Request/response on top of the `received` notification.
//!
//! A call subscribes a one-shot observer, sends, and waits for the first
//! message that arrives afterwards. The reply is not matched against the
//! target address: whatever the transport receives first is the answer.
//! Calls on one transport take turns through its correlation lock, so two
//! callers never wait on the same reply. Time spent waiting for a turn counts
//! against the caller's timeout.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, trace};

use crate::errors::NetResult;
use crate::net::{EventHub, InboundMessage, PeerAddress};

// -----------------------------------------------------------------------------
// ----- Correlate -------------------------------------------------------------

/// A transport that can carry a correlated request.
pub trait Correlate {
    fn inbound(&self) -> &EventHub<InboundMessage>;

    fn correlation_lock(&self) -> &tokio::sync::Mutex<()>;

    fn send_request<'a>(
        &'a self,
        bytes: &'a [u8],
        target: PeerAddress,
    ) -> impl Future<Output = NetResult<()>> + Send + 'a;
}

// -----------------------------------------------------------------------------
// ----- Public ----------------------------------------------------------------

/// Send `bytes` to `target` and wait up to `timeout` for the next inbound
/// message. `Ok(None)` means nothing arrived in time. A failed send is
/// returned as the error; the observer is gone on every exit path.
pub async fn send_and_receive<T>(
    transport: &T,
    bytes: &[u8],
    target: PeerAddress,
    timeout: Duration,
) -> NetResult<Option<InboundMessage>>
where
    T: Correlate + Sync + ?Sized,
{
    let deadline = Instant::now() + timeout;

    let Ok(_turn) = timeout_at(deadline, transport.correlation_lock().lock()).await else {
        debug!("no turn for request to {target} within {timeout:?}");
        return Ok(None);
    };

    let (tx, rx) = oneshot::channel();
    let slot = Arc::new(Mutex::new(Some(tx)));

    let _observer = transport.inbound().subscribe_scoped(move |message| {
        if let Some(tx) = slot.lock().take() {
            let _ = tx.send(message.clone());
        }
    });

    transport.send_request(bytes, target).await?;
    trace!(bytes = bytes.len(), "request sent to {target}");

    match timeout_at(deadline, rx).await {
        Ok(Ok(reply)) => {
            debug!(bytes = reply.len(), "reply for request to {target}");
            Ok(Some(reply))
        }
        Ok(Err(_)) | Err(_) => {
            debug!("no reply from {target} within {timeout:?}");
            Ok(None)
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
