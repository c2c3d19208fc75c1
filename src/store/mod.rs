//! Remote Text Store
//!
//! Named text resources shared by both peers: the matchmaking queue and the
//! relay mailboxes. The store offers no locking and no atomic
//! read-modify-write; callers get safety from re-validation, not from here.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpTextStore;
pub use memory::MemoryStore;

/// Well-known name of the matchmaking queue resource.
pub const MATCHMAKING_QUEUE: &str = "PlayerPool.txt";

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Resource does not exist.
    #[error("resource not found: {0}")]
    NotFound(String),
    /// Deleting this resource is not allowed.
    #[error("refusing to delete protected resource: {0}")]
    Protected(String),
    /// Store could not be reached.
    #[error("store unreachable: {0}")]
    Unreachable(String),
    /// Store answered with an unexpected status.
    #[error("store request for {resource} failed with status {status}")]
    Status {
        /// Resource the request was about.
        resource: String,
        /// HTTP status code.
        status: u16,
    },
    /// Transport-level HTTP failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Shared named text resources.
#[async_trait]
pub trait RemoteTextStore: Send + Sync {
    /// Whether the resource exists.
    async fn exists(&self, name: &str) -> Result<bool, StoreError>;

    /// Create (or truncate) the resource.
    async fn create(&self, name: &str) -> Result<(), StoreError>;

    /// Full contents. Empty string if the resource has no content,
    /// `StoreError::NotFound` if it does not exist.
    async fn read(&self, name: &str) -> Result<String, StoreError>;

    /// Append a line after the existing content, creating the resource if needed.
    async fn append_line(&self, name: &str, line: &str) -> Result<(), StoreError>;

    /// Remove every exact occurrence of each of `lines`.
    async fn remove_lines(&self, name: &str, lines: &[String]) -> Result<(), StoreError>;

    /// Remove every exact occurrence of `line`.
    async fn remove_line(&self, name: &str, line: &str) -> Result<(), StoreError> {
        self.remove_lines(name, &[line.to_string()]).await
    }

    /// Empty the resource without deleting it.
    async fn clear(&self, name: &str) -> Result<(), StoreError>;

    /// Delete the resource. Refuses [`MATCHMAKING_QUEUE`].
    async fn delete(&self, name: &str) -> Result<(), StoreError>;
}

/// Refuse deletion of the matchmaking queue.
pub(crate) fn guard_delete(name: &str) -> Result<(), StoreError> {
    if name == MATCHMAKING_QUEUE {
        return Err(StoreError::Protected(name.to_string()));
    }
    Ok(())
}

/// `content` with `line` appended as its last line.
pub(crate) fn with_line_appended(content: &str, line: &str) -> String {
    let content = content.trim();
    let line = line.trim();
    if content.is_empty() {
        line.to_string()
    } else {
        format!("{content}\n{line}")
    }
}

/// `content` without any line equal to one of `lines`; blank lines dropped.
pub(crate) fn without_lines(content: &str, lines: &[String]) -> String {
    content
        .split('\n')
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.is_empty() && !lines.iter().any(|r| r == l))
        .fold(String::new(), |mut acc, l| {
            acc.push_str(l);
            acc.push('\n');
            acc
        })
}

/// Non-blank lines of a resource.
pub fn lines_of(content: &str) -> impl Iterator<Item = &str> {
    content.lines().map(str::trim).filter(|l| !l.is_empty())
}
