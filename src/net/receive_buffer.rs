//! net/receive_buffer.rs
//!
//! Per-peer receive accumulator: a fixed scratch slab that each raw read lands
//! in, plus a growable buffer holding the bytes of the message still in flight.
//! Owned by exactly one receive loop; never shared between peers.

use bytes::{Bytes, BytesMut};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const SCRATCH_SIZE: usize = 2048;

// -----------------------------------------------------------------------------
// ----- ReceiveBuffer ---------------------------------------------------------

#[derive(Debug)]
pub struct ReceiveBuffer {
    scratch: Box<[u8]>,
    pending: BytesMut,
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        Self::with_scratch_size(SCRATCH_SIZE)
    }

    pub fn with_scratch_size(size: usize) -> Self {
        let size = size.max(1);

        Self {
            scratch: vec![0u8; size].into_boxed_slice(),
            pending: BytesMut::with_capacity(size),
        }
    }
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// -----------------------------------------------------------------------------
// ----- ReceiveBuffer: Public Methods -----------------------------------------

impl ReceiveBuffer {
    /// Target for the next raw read.
    #[inline]
    pub fn scratch_mut(&mut self) -> &mut [u8] {
        &mut self.scratch
    }

    #[inline]
    pub fn scratch_len(&self) -> usize {
        self.scratch.len()
    }

    /// Move the first `n` bytes of the scratch slab onto the pending message.
    #[inline]
    pub fn commit(&mut self, n: usize) {
        debug_assert!(n <= self.scratch.len(), "commit past scratch end");

        let n = n.min(self.scratch.len());
        self.pending.extend_from_slice(&self.scratch[..n]);
    }

    #[inline]
    pub fn append(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Bytes received but not yet delivered as a message.
    #[inline]
    pub fn pending_mut(&mut self) -> &mut BytesMut {
        &mut self.pending
    }

    #[inline]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Hand out everything pending as one message and start a fresh one.
    pub fn take_message(&mut self) -> Bytes {
        self.pending.split().freeze()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
