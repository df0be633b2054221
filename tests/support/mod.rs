use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};
use tokio::time::{Instant, sleep};
use tracing_subscriber::{EnvFilter, fmt};

use peerlink::{InboundMessage, PeerAddress, SessionOptions};

static TRACING: OnceCell<()> = OnceCell::new();

// Call at the top of a test to see the library's logs with RUST_LOG set.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

#[allow(dead_code)]
pub fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

/// Server side bound to loopback with a system port.
#[allow(dead_code)]
pub fn loopback_any() -> SocketAddr {
    loopback(0)
}

#[allow(dead_code)]
pub fn options() -> SessionOptions {
    SessionOptions::default().with_response_timeout(Duration::from_secs(2))
}

/// Poll `check` until it holds or five seconds pass.
#[allow(dead_code)]
pub async fn wait_until<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        if Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// Give in-flight notifications a moment to (not) arrive.
#[allow(dead_code)]
pub async fn settle() {
    sleep(Duration::from_millis(200)).await;
}

#[allow(dead_code)]
pub async fn within<T>(what: &str, fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .unwrap_or_else(|_| panic!("timed out: {what}"))
}

// -----------------------------------------------------------------------------
// ----- Recorder --------------------------------------------------------------

/// Collects every event an observer sees.
#[derive(Clone)]
pub struct Recorder<T> {
    events: Arc<Mutex<Vec<T>>>,
}

#[allow(dead_code)]
impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Observer closure that appends into this recorder.
    pub fn observer(&self) -> impl Fn(&T) + Send + Sync + 'static {
        let events = self.events.clone();
        move |event: &T| events.lock().push(event.clone())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn events(&self) -> Vec<T> {
        self.events.lock().clone()
    }
}

#[allow(dead_code)]
impl Recorder<InboundMessage> {
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.events
            .lock()
            .iter()
            .map(|m| m.payload.to_vec())
            .collect()
    }

    pub fn total_bytes(&self) -> usize {
        self.events.lock().iter().map(|m| m.len()).sum()
    }
}

#[allow(dead_code)]
impl Recorder<PeerAddress> {
    pub fn count_of(&self, peer: PeerAddress) -> usize {
        self.events.lock().iter().filter(|p| **p == peer).count()
    }
}
