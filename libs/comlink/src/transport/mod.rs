//! Transport layer: the dial/send/close/liveness seam and its implementations

pub mod mock;
pub mod tcp;
pub mod traits;

pub use mock::{MockConnectionHandle, MockTransport};
pub use tcp::{TcpTransport, TcpTransportConfig};
pub use traits::{Connection, Endpoint, LinkState, LinkStats, LivenessObserver, Transport};
