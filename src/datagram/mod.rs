// datagram/mod.rs
//! Connectionless channel: one local socket, one receive loop, one
//! notification per datagram.

pub mod channel;
pub mod once;

pub use channel::{DatagramChannel, DatagramSender};
pub use once::{send_once, send_once_quiet};
