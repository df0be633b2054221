use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use super::framing::{DEFAULT_MAX_FRAME_LEN, FramingKind, FramingStrategy};
use super::receive_buffer::SCRATCH_SIZE;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const DEFAULT_BACKLOG: u32 = 1000;

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

// -----------------------------------------------------------------------------
// ----- SessionOptions --------------------------------------------------------

/// Tunables shared by stream sessions and datagram channels.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionOptions {
    /// Pending-connection queue length for listening sockets.
    pub backlog: u32,

    /// Size of the per-read scratch slab, and the largest datagram received whole.
    pub scratch_size: usize,

    pub framing: FramingKind,

    /// Only consulted by length-prefixed framing.
    pub max_frame_len: usize,

    /// Wait used by the paired request helpers when the caller gives none.
    #[serde(deserialize_with = "de_duration")]
    pub response_timeout: Duration,

    /// Disable Nagle on every stream socket.
    pub nodelay: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            backlog: DEFAULT_BACKLOG,
            scratch_size: SCRATCH_SIZE,
            framing: FramingKind::Drain,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            nodelay: true,
        }
    }
}

impl SessionOptions {
    pub fn with_framing(mut self, framing: FramingKind) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn framing_strategy(&self) -> Arc<dyn FramingStrategy> {
        self.framing.build(self.max_frame_len)
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
