//! External work-item store boundary.
//!
//! The compiler and the worker only ever talk to the board through the
//! [`WorkItemStore`] trait: listing pending items, reading details, moving
//! items between states, posting comments and shipping artifacts. Whether
//! the backend is the hosted REST board or an in-memory table is invisible
//! to the engine.

pub mod body;
pub mod memory;
pub mod remote;

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Opaque handle to a work item in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItemRef(pub String);

impl fmt::Display for WorkItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A tag known to the board, by name and opaque id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRef {
    pub name: String,
    pub id: String,
}

/// Full detail view of a work item.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub reference: WorkItemRef,
    pub name: String,
    /// Free-text body; structure inside it is `body`'s business.
    pub body: String,
    pub state_id: String,
    /// Worker-identity claim marker, if any.
    pub assignee: Option<String>,
}

/// Narrow surface of the durable task board.
///
/// Consistency is whatever the backend offers: the hosted board is
/// eventually consistent, so a read right after a write may be stale.
/// Callers that care (the claim protocol) re-read and verify.
#[async_trait]
pub trait WorkItemStore: Send + Sync {
    /// Item references currently in `state_id`, oldest first, at most
    /// `limit` of them.
    async fn list_items(&self, state_id: &str, limit: usize) -> Result<Vec<WorkItemRef>>;

    async fn get_details(&self, reference: &WorkItemRef) -> Result<WorkItem>;

    async fn set_state(&self, reference: &WorkItemRef, state_id: &str) -> Result<()>;

    /// Write (or clear) the claim marker on an item.
    async fn set_assignee(&self, reference: &WorkItemRef, assignee: Option<&str>) -> Result<()>;

    async fn create_item(
        &self,
        name: &str,
        body: &str,
        state_id: &str,
        tags: &[TagRef],
    ) -> Result<WorkItemRef>;

    async fn append_comment(&self, reference: &WorkItemRef, text: &str) -> Result<()>;

    async fn upload_artifact(&self, reference: &WorkItemRef, path: &Path) -> Result<()>;

    /// Download every attachment of `reference` into `dest`. Returns how
    /// many files were written.
    async fn download_artifacts(&self, reference: &WorkItemRef, dest: &Path) -> Result<usize>;

    async fn list_tags(&self) -> Result<Vec<TagRef>>;

    async fn create_tag(&self, name: &str) -> Result<TagRef>;
}

/// Retry policy applied at every store boundary call.
pub const MAX_ATTEMPTS: u32 = 5;
const BASE_BACKOFF_MS: u64 = 500;

/// Wraps any store, retrying transient failures with exponential backoff.
///
/// Only errors the crate classifies as transient are retried; compilation
/// or lookup errors pass straight through. Exhausting the attempt budget
/// surfaces the last error.
pub struct RetryingStore<S> {
    inner: S,
    max_attempts: u32,
    base_backoff: Duration,
}

impl<S: WorkItemStore> RetryingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            max_attempts: MAX_ATTEMPTS,
            base_backoff: Duration::from_millis(BASE_BACKOFF_MS),
        }
    }

    pub fn with_policy(inner: S, max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            inner,
            max_attempts,
            base_backoff,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn retry<T, F, Fut>(&self, op: &str, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        let mut backoff = self.base_backoff;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    tracing::warn!(
                        op,
                        attempt,
                        error = %err,
                        backoff_ms = backoff.as_millis() as u64,
                        "transient store error, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl<S: WorkItemStore> WorkItemStore for RetryingStore<S> {
    async fn list_items(&self, state_id: &str, limit: usize) -> Result<Vec<WorkItemRef>> {
        self.retry("list_items", || self.inner.list_items(state_id, limit))
            .await
    }

    async fn get_details(&self, reference: &WorkItemRef) -> Result<WorkItem> {
        self.retry("get_details", || self.inner.get_details(reference))
            .await
    }

    async fn set_state(&self, reference: &WorkItemRef, state_id: &str) -> Result<()> {
        self.retry("set_state", || self.inner.set_state(reference, state_id))
            .await
    }

    async fn set_assignee(&self, reference: &WorkItemRef, assignee: Option<&str>) -> Result<()> {
        self.retry("set_assignee", || {
            self.inner.set_assignee(reference, assignee)
        })
        .await
    }

    async fn create_item(
        &self,
        name: &str,
        body: &str,
        state_id: &str,
        tags: &[TagRef],
    ) -> Result<WorkItemRef> {
        self.retry("create_item", || {
            self.inner.create_item(name, body, state_id, tags)
        })
        .await
    }

    async fn append_comment(&self, reference: &WorkItemRef, text: &str) -> Result<()> {
        self.retry("append_comment", || {
            self.inner.append_comment(reference, text)
        })
        .await
    }

    async fn upload_artifact(&self, reference: &WorkItemRef, path: &Path) -> Result<()> {
        self.retry("upload_artifact", || {
            self.inner.upload_artifact(reference, path)
        })
        .await
    }

    async fn download_artifacts(&self, reference: &WorkItemRef, dest: &Path) -> Result<usize> {
        self.retry("download_artifacts", || {
            self.inner.download_artifacts(reference, dest)
        })
        .await
    }

    async fn list_tags(&self) -> Result<Vec<TagRef>> {
        self.retry("list_tags", || self.inner.list_tags()).await
    }

    async fn create_tag(&self, name: &str) -> Result<TagRef> {
        self.retry("create_tag", || self.inner.create_tag(name)).await
    }
}
