//! net/framing.rs
//!
//! Decides where one logical message ends inside a byte stream. The session
//! loop appends every raw read to the pending buffer and then asks the
//! strategy for completed messages until it returns `None`.

use std::fmt;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Deserialize;
use thiserror::Error;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const LENGTH_HEADER_LEN: usize = 4;

pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

// -----------------------------------------------------------------------------
// ----- FramingStrategy -------------------------------------------------------

pub trait FramingStrategy: Send + Sync + fmt::Debug {
    /// Split the next complete message off `pending`, if there is one.
    ///
    /// `more_queued` tells whether the socket already holds further unread
    /// bytes at the moment of the call.
    fn next_message(
        &self,
        pending: &mut BytesMut,
        more_queued: bool,
    ) -> Result<Option<Bytes>, FramingError>;

    /// Whether `next_message` looks at `more_queued` at all. When false the
    /// session skips the queued-bytes probe.
    fn wants_queue_probe(&self) -> bool {
        true
    }
}

// -----------------------------------------------------------------------------
// ----- DrainFraming ----------------------------------------------------------

/// Heuristic boundary: whatever has accumulated once the socket has nothing
/// more queued is one message. Holds for request/response bursts, not for
/// arbitrary concurrent streaming.
#[derive(Clone, Copy, Debug, Default)]
pub struct DrainFraming;

impl FramingStrategy for DrainFraming {
    fn next_message(
        &self,
        pending: &mut BytesMut,
        more_queued: bool,
    ) -> Result<Option<Bytes>, FramingError> {
        if more_queued || pending.is_empty() {
            return Ok(None);
        }

        Ok(Some(pending.split().freeze()))
    }
}

// -----------------------------------------------------------------------------
// ----- LengthPrefixedFraming -------------------------------------------------

/// `u32` big-endian payload length followed by the payload.
#[derive(Clone, Copy, Debug)]
pub struct LengthPrefixedFraming {
    max_len: usize,
}

impl LengthPrefixedFraming {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    /// Build a wire frame for `payload`, refusing anything this framing
    /// would reject on receive or the header cannot express.
    pub fn encode(&self, payload: &[u8]) -> Result<Bytes, FramingError> {
        let len = payload.len();
        let oversized = FramingError::Oversized {
            len,
            max: self.max_len,
        };

        if len > self.max_len {
            return Err(oversized);
        }
        let header = u32::try_from(len).map_err(|_| oversized)?;

        let mut buf = BytesMut::with_capacity(LENGTH_HEADER_LEN + len);
        buf.put_u32(header);
        buf.extend_from_slice(payload);
        Ok(buf.freeze())
    }

    /// Cheap header look. Returns the payload length once the frame is complete.
    #[inline]
    fn peek(&self, buf: &[u8]) -> Result<Option<usize>, FramingError> {
        if buf.len() < LENGTH_HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if len > self.max_len {
            return Err(FramingError::Oversized {
                len,
                max: self.max_len,
            });
        }

        if buf.len() < LENGTH_HEADER_LEN + len {
            return Ok(None);
        }

        Ok(Some(len))
    }
}

impl Default for LengthPrefixedFraming {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FramingStrategy for LengthPrefixedFraming {
    fn next_message(
        &self,
        pending: &mut BytesMut,
        _more_queued: bool,
    ) -> Result<Option<Bytes>, FramingError> {
        let Some(len) = self.peek(pending)? else {
            return Ok(None);
        };

        pending.advance(LENGTH_HEADER_LEN);
        Ok(Some(pending.split_to(len).freeze()))
    }

    fn wants_queue_probe(&self) -> bool {
        false
    }
}

// -----------------------------------------------------------------------------
// ----- FramingKind -----------------------------------------------------------

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FramingKind {
    #[default]
    Drain,
    LengthPrefixed,
}

impl FramingKind {
    pub fn build(self, max_frame_len: usize) -> Arc<dyn FramingStrategy> {
        match self {
            FramingKind::Drain => Arc::new(DrainFraming),
            FramingKind::LengthPrefixed => Arc::new(LengthPrefixedFraming::new(max_frame_len)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FramingKind::Drain => "drain",
            FramingKind::LengthPrefixed => "length-prefixed",
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("frame of {len} bytes exceeds limit of {max}")]
    Oversized { len: usize, max: usize },
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
