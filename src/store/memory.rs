//! In-memory text store.
//!
//! Same contract as the remote store, shared between clones of the handle.
//! Each call is atomic on its own; sequences of calls are not, which keeps the
//! races matchmaking has to survive.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{guard_delete, with_line_appended, without_lines, RemoteTextStore, StoreError};

/// In-memory [`RemoteTextStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    resources: Arc<RwLock<BTreeMap<String, String>>>,
    offline: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreError::Unreachable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Names of all existing resources.
    pub async fn names(&self) -> Vec<String> {
        self.resources.read().await.keys().cloned().collect()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unreachable("memory store is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteTextStore for MemoryStore {
    async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        self.check_online()?;
        Ok(self.resources.read().await.contains_key(name))
    }

    async fn create(&self, name: &str) -> Result<(), StoreError> {
        self.check_online()?;
        self.resources
            .write()
            .await
            .insert(name.to_string(), String::new());
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<String, StoreError> {
        self.check_online()?;
        self.resources
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn append_line(&self, name: &str, line: &str) -> Result<(), StoreError> {
        self.check_online()?;
        let mut resources = self.resources.write().await;
        let content = resources.entry(name.to_string()).or_default();
        let updated = with_line_appended(content, line);
        *content = updated;
        Ok(())
    }

    async fn remove_lines(&self, name: &str, lines: &[String]) -> Result<(), StoreError> {
        self.check_online()?;
        let mut resources = self.resources.write().await;
        if let Some(content) = resources.get_mut(name) {
            let updated = without_lines(content, lines);
            *content = updated;
        }
        Ok(())
    }

    async fn clear(&self, name: &str) -> Result<(), StoreError> {
        self.check_online()?;
        self.resources
            .write()
            .await
            .insert(name.to_string(), String::new());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.check_online()?;
        guard_delete(name)?;
        self.resources.write().await.remove(name);
        Ok(())
    }
}
