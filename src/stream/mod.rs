// stream/mod.rs
//! Connection-oriented sessions: a server that accepts many peers or a
//! client paired with one, plus the fire-and-forget one-shot sender.

pub mod manager;
pub mod once;
pub mod session;

pub use manager::{Role, StreamSender, StreamSessions};
pub use once::{send_once, send_once_quiet};
pub use session::DisconnectReason;
