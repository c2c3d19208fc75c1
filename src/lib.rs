//! # duel-net
//!
//! Two-player matchmaking and signal transport for a turn-based game.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         DUEL-NET                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Plain values                             │
//! │  ├── signal.rs    - Signal bytes and the control codes       │
//! │  ├── participant.rs - Queue records and role tokens          │
//! │  └── integrity.rs - Check values interleaved with payloads   │
//! │                                                              │
//! │  store/           - Shared text resources                    │
//! │  ├── http.rs      - HTTP file host                           │
//! │  └── memory.rs    - In-process store                         │
//! │                                                              │
//! │  matchmaking/     - Pairing through the queue resource       │
//! │  ├── queue.rs     - Typed queue view                         │
//! │  └── coordinator.rs - Join / poll / restart algorithm        │
//! │                                                              │
//! │  network/         - Per-match transports                     │
//! │  ├── address.rs   - Interface discovery, subnet test         │
//! │  ├── selector.rs  - Direct or relayed, decided once          │
//! │  ├── transport.rs - Queue, sink and shutdown plumbing        │
//! │  ├── direct.rs    - TCP between same-subnet peers            │
//! │  └── relayed.rs   - Mailboxes in the store                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Flow
//!
//! A client discovers its interface, joins the queue through a
//! [`Matchmaker`], and hands the resulting [`Match`] to a
//! [`TransportSelector`]. The returned [`Transport`] carries [`Signal`]s in
//! both directions until one side closes it.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod matchmaking;
pub mod network;
pub mod store;

// Re-export commonly used types
pub use config::NetConfig;
pub use core::integrity::{Stamper, Verifier};
pub use core::participant::{Participant, Side};
pub use core::signal::Signal;
pub use matchmaking::{Match, Matchmaker, PendingMatch};
pub use network::{SignalSink, Transport, TransportSelector};
pub use store::{HttpTextStore, MemoryStore, RemoteTextStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
