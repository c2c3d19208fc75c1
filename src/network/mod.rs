//! Network Layer
//!
//! Address classification and the per-match transports. Which backend a
//! match uses is decided once by [`TransportSelector`].

pub mod address;
pub mod direct;
pub mod relayed;
pub mod selector;
pub mod transport;

pub use address::{local_interface, same_subnet, AddressError};
pub use direct::DirectTransport;
pub use relayed::RelayedTransport;
pub use selector::{plan, TransportPlan, TransportSelector};
pub use transport::{SignalSink, Transport, TransportError, TransportKind};
