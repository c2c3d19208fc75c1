//! Core values.
//!
//! Signals, participants and check values. Nothing in here performs I/O.

pub mod integrity;
pub mod participant;
pub mod signal;

// Re-export core types
pub use integrity::{IntegrityError, Stamper, Verified, Verifier};
pub use participant::{Participant, ParticipantError, Side};
pub use signal::{Control, Signal, SignalError, SignalKind};
