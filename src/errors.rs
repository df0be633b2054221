use std::net::SocketAddr;

use thiserror::Error;

use crate::net::PeerAddress;

// -----------------------------------------------------------------------------
// ----- NetResult -------------------------------------------------------------

pub type NetResult<T> = Result<T, NetError>;

// -----------------------------------------------------------------------------
// ----- NetError --------------------------------------------------------------

#[derive(Debug, Error)]
pub enum NetError {
    /// No session is registered under an address equal to `peer`.
    #[error("connected address not found: {peer}")]
    NotFound { peer: PeerAddress },

    #[error("a session for {peer} is already registered")]
    DuplicateKey { peer: PeerAddress },

    #[error("not supported: {0}")]
    NotSupported(&'static str),

    #[error("transport is closed")]
    Closed,

    #[error("bind error for {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("connect error for {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, NetError::NotFound { .. })
    }

    pub fn is_not_supported(&self) -> bool {
        matches!(self, NetError::NotSupported(_))
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
