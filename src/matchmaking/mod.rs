//! Matchmaking
//!
//! Two players find each other through a queue resource in the shared store.

pub mod coordinator;
pub mod queue;

use thiserror::Error;

use crate::store::StoreError;

pub use coordinator::{Match, Matchmaker, PendingMatch};
pub use queue::WaitingQueue;

/// Matchmaking errors. Contention is never an error.
#[derive(Debug, Error)]
pub enum MatchmakingError {
    /// The store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// The background join task panicked or was cancelled.
    #[error("join task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
