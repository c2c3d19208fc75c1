//! HTTP text store.
//!
//! Talks to the plain web host the game used for its shared files:
//!
//! - read: `GET {base}/{name}` (404 means the resource does not exist)
//! - overwrite: `POST {base}/write.php` with body `name:data`
//! - delete: `POST {base}/delete.php` with body `name`
//!
//! Append and remove are read-modify-write on the client, so two writers can
//! lose each other's update.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use super::{guard_delete, with_line_appended, without_lines, RemoteTextStore, StoreError};

const WRITE_SCRIPT: &str = "write.php";
const DELETE_SCRIPT: &str = "delete.php";

/// [`RemoteTextStore`] backed by an HTTP file host.
#[derive(Debug, Clone)]
pub struct HttpTextStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTextStore {
    /// Store rooted at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self { client, base_url })
    }

    /// Base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn resource_url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name)
    }

    fn script_url(&self, script: &str) -> String {
        format!("{}/{}", self.base_url, script)
    }

    async fn post(&self, script: &str, resource: &str, body: String) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.script_url(script))
            .body(body)
            .send()
            .await
            .map_err(unreachable)?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status {
                resource: resource.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    async fn write(&self, name: &str, data: &str) -> Result<(), StoreError> {
        debug!(resource = name, bytes = data.len(), "store write");
        self.post(WRITE_SCRIPT, name, format!("{name}:{data}")).await
    }
}

/// Connection-level failures mean the store is unreachable; anything else
/// stays a plain HTTP error.
fn unreachable(e: reqwest::Error) -> StoreError {
    if e.is_connect() || e.is_timeout() {
        StoreError::Unreachable(e.to_string())
    } else {
        StoreError::Http(e)
    }
}

#[async_trait]
impl RemoteTextStore for HttpTextStore {
    async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        match self.read(name).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, name: &str) -> Result<(), StoreError> {
        self.write(name, "").await
    }

    async fn read(&self, name: &str) -> Result<String, StoreError> {
        let response = self
            .client
            .get(self.resource_url(name))
            .send()
            .await
            .map_err(unreachable)?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(name.to_string())),
            status if status.is_success() => Ok(response.text().await?),
            status => Err(StoreError::Status {
                resource: name.to_string(),
                status: status.as_u16(),
            }),
        }
    }

    async fn append_line(&self, name: &str, line: &str) -> Result<(), StoreError> {
        let content = match self.read(name).await {
            Ok(content) => content,
            Err(StoreError::NotFound(_)) => String::new(),
            Err(e) => return Err(e),
        };
        self.write(name, &with_line_appended(&content, line)).await
    }

    async fn remove_lines(&self, name: &str, lines: &[String]) -> Result<(), StoreError> {
        let content = match self.read(name).await {
            Ok(content) => content,
            Err(StoreError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        if content.is_empty() {
            return Ok(());
        }
        self.write(name, &without_lines(&content, lines)).await
    }

    async fn clear(&self, name: &str) -> Result<(), StoreError> {
        self.write(name, "").await
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        guard_delete(name)?;
        debug!(resource = name, "store delete");
        self.post(DELETE_SCRIPT, name, name.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MATCHMAKING_QUEUE;

    #[test]
    fn test_urls() {
        let store = HttpTextStore::new("http://example.org/~duel/", Duration::from_secs(1)).unwrap();
        assert_eq!(store.base_url(), "http://example.org/~duel");
        assert_eq!(
            store.resource_url("PlayerPool.txt"),
            "http://example.org/~duel/PlayerPool.txt"
        );
        assert_eq!(
            store.script_url(WRITE_SCRIPT),
            "http://example.org/~duel/write.php"
        );
    }

    #[tokio::test]
    async fn test_queue_delete_refused_before_any_request() {
        // Nothing listens on port 9; the guard must fire first.
        let store = HttpTextStore::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        assert!(matches!(
            store.delete(MATCHMAKING_QUEUE).await,
            Err(StoreError::Protected(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        let store = HttpTextStore::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        assert!(matches!(
            store.read("anything.txt").await,
            Err(StoreError::Unreachable(_))
        ));
    }
}
