pub mod config;
pub mod correlator;
pub mod datagram;
pub mod errors;
pub mod net;
pub mod probe;
pub mod stream;

pub use config::Config;
pub use correlator::Correlate;
pub use datagram::DatagramChannel;
pub use errors::{NetError, NetResult};
pub use net::{InboundMessage, PeerAddress, SessionOptions};
pub use stream::StreamSessions;
