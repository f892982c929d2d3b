//! Ports to the worker's external collaborators.
//!
//! The browser session and the document store are both outside this crate's
//! control; the engine only ever talks to these traits, so every component can
//! be exercised against scripted fakes without a real browser or database.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors surfaced by a remote browser session. All of them are recoverable at
/// the cycle level: the loop reacts by resetting the session, never by exiting.
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("no element matches selector '{0}'")]
    SelectorNotFound(String),

    #[error("timed out after {timeout:?} waiting for '{selector}'")]
    Timeout { selector: String, timeout: Duration },

    #[error("session protocol error: {0}")]
    Protocol(String),

    #[error("session is gone: {0}")]
    Gone(String),
}

/// A controllable browser session with one current page.
///
/// The worker never assumes the session is authenticated; it verifies via
/// [`RemoteSession::current_url`] and page content. All calls are strictly
/// sequential: a session must not be shared across tasks.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), SessionError>;

    async fn current_url(&self) -> Result<String, SessionError>;

    /// Full serialized markup of the current page.
    async fn page_html(&self) -> Result<String, SessionError>;

    /// Clear the first element matching `selector` and type `text` into it.
    async fn fill(&self, selector: &str, text: &str) -> Result<(), SessionError>;

    async fn click(&self, selector: &str) -> Result<(), SessionError>;

    /// Poll until `selector` matches an element or `timeout` elapses.
    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), SessionError>;

    /// Unconditional pause, used to let slow portal pages settle.
    async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Tear the session down. Best effort; errors are ignored by callers.
    async fn close(&self);
}

/// Creates fresh [`RemoteSession`]s for the worker loop, which discards and
/// recreates the session on every unrecoverable failure.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn RemoteSession>, SessionError>;
}

/// Merge `fields` into an existing document body, the semantics every
/// [`DocumentStore::upsert`] implementation must provide: named fields are
/// replaced, unnamed fields are left untouched.
pub fn merge_fields(existing: &mut Value, fields: Map<String, Value>) {
    if !existing.is_object() {
        *existing = Value::Object(Map::new());
    }
    if let Value::Object(body) = existing {
        for (key, value) in fields {
            body.insert(key, value);
        }
    }
}

/// Idempotent document persistence keyed by `(collection, key)`.
///
/// `upsert` has merge semantics: fields absent from `fields` are left
/// untouched, so partial enrichment can never blank out previously good data.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn upsert(&self, collection: &str, key: &str, fields: Map<String, Value>) -> Result<()>;

    async fn delete(&self, collection: &str, key: &str) -> Result<()>;

    /// All documents in a collection as `(key, body)` pairs.
    async fn get_all(&self, collection: &str) -> Result<Vec<(String, Value)>>;

    /// Insert a document under a fresh generated key and return that key.
    async fn insert(&self, collection: &str, fields: Map<String, Value>) -> Result<String>;

    /// Documents whose top-level `field` equals `value`. Collections here are
    /// small (subscriber lists), so the default scan is adequate.
    async fn query_eq(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(String, Value)>> {
        let all = self.get_all(collection).await?;
        Ok(all
            .into_iter()
            .filter(|(_, body)| body.get(field) == Some(value))
            .collect())
    }
}
