//! Waiting Queue
//!
//! Typed view over the queue resource. Every operation is one store call;
//! nothing here is atomic across calls.

use std::sync::Arc;

use tracing::warn;

use crate::core::participant::Participant;
use crate::store::{lines_of, RemoteTextStore, StoreError, MATCHMAKING_QUEUE};

/// Participants waiting for an opponent, oldest first.
#[derive(Clone)]
pub struct WaitingQueue {
    store: Arc<dyn RemoteTextStore>,
    name: String,
}

impl WaitingQueue {
    /// Queue at the well-known resource name.
    pub fn new(store: Arc<dyn RemoteTextStore>) -> Self {
        Self::named(store, MATCHMAKING_QUEUE)
    }

    /// Queue at a custom resource name.
    pub fn named(store: Arc<dyn RemoteTextStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    /// Resource name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current entries. A missing resource is an empty queue; malformed lines
    /// are skipped.
    pub async fn snapshot(&self) -> Result<Vec<Participant>, StoreError> {
        let content = match self.store.read(&self.name).await {
            Ok(content) => content,
            Err(StoreError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        Ok(lines_of(&content)
            .filter_map(|line| match line.parse::<Participant>() {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(queue = %self.name, %line, error = %e, "skipping malformed queue record");
                    None
                }
            })
            .collect())
    }

    /// Append `participant`'s record.
    pub async fn push(&self, participant: &Participant) -> Result<(), StoreError> {
        self.store
            .append_line(&self.name, &participant.to_record())
            .await
    }

    /// Remove every record of `participants`. Records already gone are fine.
    pub async fn remove(&self, participants: &[Participant]) -> Result<(), StoreError> {
        let records: Vec<String> = participants.iter().map(Participant::to_record).collect();
        self.store.remove_lines(&self.name, &records).await
    }

    /// Drop every entry.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.clear(&self.name).await
    }
}
