// net/mod.rs
//! Transport-agnostic building blocks: peer keys, receive buffers, framing,
//! the peer registry and the notification hubs.

pub mod events;
pub mod framing;
pub mod options;
pub mod peer_address;
pub mod receive_buffer;
pub mod registry;
pub(crate) mod task;

pub use events::{EventHub, InboundMessage, ObserverGuard, ObserverId};
pub use framing::{DrainFraming, FramingKind, FramingStrategy, LengthPrefixedFraming};
pub use options::SessionOptions;
pub use peer_address::PeerAddress;
pub use receive_buffer::ReceiveBuffer;
pub use registry::PeerRegistry;

pub(crate) use task::LoopTask;
