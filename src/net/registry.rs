//! net/registry.rs
//!
//! Peer registry: one entry per live peer, keyed by `PeerAddress`.
//! Not synchronized; the owner serializes access.

use std::collections::HashMap;

use crate::errors::{NetError, NetResult};

use super::PeerAddress;

// -----------------------------------------------------------------------------
// ----- PeerRegistry ----------------------------------------------------------

#[derive(Debug)]
pub struct PeerRegistry<S> {
    entries: HashMap<PeerAddress, S>,
}

impl<S> PeerRegistry<S> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<S> Default for PeerRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

// -----------------------------------------------------------------------------
// ----- PeerRegistry: Public Methods ------------------------------------------

impl<S> PeerRegistry<S> {
    pub fn add(&mut self, peer: PeerAddress, session: S) -> NetResult<()> {
        if self.entries.contains_key(&peer) {
            return Err(NetError::DuplicateKey { peer });
        }

        self.entries.insert(peer, session);
        Ok(())
    }

    pub fn remove(&mut self, peer: &PeerAddress) -> NetResult<S> {
        self.entries
            .remove(peer)
            .ok_or(NetError::NotFound { peer: *peer })
    }

    pub fn find(&self, peer: &PeerAddress) -> NetResult<&S> {
        self.entries
            .get(peer)
            .ok_or(NetError::NotFound { peer: *peer })
    }

    #[inline]
    pub fn contains(&self, peer: &PeerAddress) -> bool {
        self.entries.contains_key(peer)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn addresses(&self) -> Vec<PeerAddress> {
        self.entries.keys().copied().collect()
    }

    /// Point-in-time copy of every entry.
    pub fn all(&self) -> Vec<(PeerAddress, S)>
    where
        S: Clone,
    {
        self.entries
            .iter()
            .map(|(peer, session)| (*peer, session.clone()))
            .collect()
    }

    /// Remove every entry, handing them back to the caller.
    pub fn drain(&mut self) -> Vec<(PeerAddress, S)> {
        self.entries.drain().collect()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
