//! net/task.rs
//!
//! Background loop owned by a transport: the accept loop of a stream server
//! or the receive loop of a datagram channel. Stopping goes through the abort
//! handle so it works from `Drop`; the loop's own outcome stays available to
//! whoever awaits `stopped`.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};

use crate::errors::{NetError, NetResult};

// -----------------------------------------------------------------------------
// ----- LoopTask --------------------------------------------------------------

pub(crate) struct LoopTask {
    abort: AbortHandle,
    stopping: AtomicBool,
    join: Mutex<Option<JoinHandle<NetResult<()>>>>,
}

impl LoopTask {
    pub(crate) fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = NetResult<()>> + Send + 'static,
    {
        let join = tokio::spawn(future);

        Self {
            abort: join.abort_handle(),
            stopping: AtomicBool::new(false),
            join: Mutex::new(Some(join)),
        }
    }

    /// False as soon as `stop` is called, even before the task unwinds.
    pub(crate) fn is_running(&self) -> bool {
        !self.stopping.load(Ordering::Acquire) && !self.abort.is_finished()
    }

    pub(crate) fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        self.abort.abort();
    }

    /// Wait for the loop to end. A stopped loop counts as a clean exit; a
    /// failed one hands back its error to the first caller only.
    pub(crate) async fn stopped(&self) -> NetResult<()> {
        let mut join = self.join.lock().await;
        let Some(handle) = join.as_mut() else {
            return Ok(());
        };

        let outcome = handle.await;
        *join = None;

        match outcome {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(NetError::Io(io::Error::other(format!("loop task failed: {e}")))),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
