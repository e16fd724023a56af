//! In-memory work-item store.
//!
//! Backs integration tests and offline dry runs. Single mutex around all
//! tables; listing order is creation order, matching the board's FIFO-ish
//! backlog. Supports injecting transient failures to exercise the retry
//! wrapper.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Result, SweepboardError};
use crate::store::{TagRef, WorkItem, WorkItemRef, WorkItemStore};

/// One stored item with everything the board would persist for it.
#[derive(Debug, Clone, Default)]
pub struct ItemRecord {
    pub name: String,
    pub body: String,
    pub state_id: String,
    pub assignee: Option<String>,
    pub tags: Vec<TagRef>,
    pub comments: Vec<String>,
    /// Attachment file names and contents.
    pub attachments: Vec<(String, Vec<u8>)>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    /// Creation order; listing preserves it.
    order: Vec<String>,
    items: HashMap<String, ItemRecord>,
    tags: Vec<TagRef>,
    /// Remaining operations that fail before the store recovers.
    fail_budget: u32,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` operations fail with a transient store error.
    pub fn inject_failures(&self, count: u32) {
        self.inner.lock().unwrap().fail_budget = count;
    }

    /// Snapshot of one item, for assertions.
    pub fn item(&self, reference: &WorkItemRef) -> Option<ItemRecord> {
        self.inner.lock().unwrap().items.get(&reference.0).cloned()
    }

    /// References currently in `state_id`, in creation order.
    pub fn items_in_state(&self, state_id: &str) -> Vec<WorkItemRef> {
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .filter(|id| inner.items[*id].state_id == state_id)
            .map(|id| WorkItemRef(id.clone()))
            .collect()
    }

    /// Attach a file to an existing item, as an out-of-band uploader would.
    pub fn seed_attachment(&self, reference: &WorkItemRef, name: &str, data: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(item) = inner.items.get_mut(&reference.0) {
            item.attachments.push((name.to_string(), data.to_vec()));
        }
    }

    fn check_failure(&self, inner: &mut Inner) -> Result<()> {
        if inner.fail_budget > 0 {
            inner.fail_budget -= 1;
            return Err(SweepboardError::Store("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkItemStore for InMemoryStore {
    async fn list_items(&self, state_id: &str, limit: usize) -> Result<Vec<WorkItemRef>> {
        let mut inner = self.inner.lock().unwrap();
        self.check_failure(&mut inner)?;
        Ok(inner
            .order
            .iter()
            .filter(|id| inner.items[*id].state_id == state_id)
            .take(limit)
            .map(|id| WorkItemRef(id.clone()))
            .collect())
    }

    async fn get_details(&self, reference: &WorkItemRef) -> Result<WorkItem> {
        let mut inner = self.inner.lock().unwrap();
        self.check_failure(&mut inner)?;
        let item = inner
            .items
            .get(&reference.0)
            .ok_or_else(|| SweepboardError::NotFound(reference.0.clone()))?;
        Ok(WorkItem {
            reference: reference.clone(),
            name: item.name.clone(),
            body: item.body.clone(),
            state_id: item.state_id.clone(),
            assignee: item.assignee.clone(),
        })
    }

    async fn set_state(&self, reference: &WorkItemRef, state_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        self.check_failure(&mut inner)?;
        let item = inner
            .items
            .get_mut(&reference.0)
            .ok_or_else(|| SweepboardError::NotFound(reference.0.clone()))?;
        item.state_id = state_id.to_string();
        Ok(())
    }

    async fn set_assignee(&self, reference: &WorkItemRef, assignee: Option<&str>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        self.check_failure(&mut inner)?;
        let item = inner
            .items
            .get_mut(&reference.0)
            .ok_or_else(|| SweepboardError::NotFound(reference.0.clone()))?;
        match (item.assignee.as_deref(), assignee) {
            // An existing different marker sticks, so a racing claimant
            // observes the earlier winner on re-read.
            (Some(current), Some(incoming)) if current != incoming => {}
            _ => item.assignee = assignee.map(str::to_string),
        }
        Ok(())
    }

    async fn create_item(
        &self,
        name: &str,
        body: &str,
        state_id: &str,
        tags: &[TagRef],
    ) -> Result<WorkItemRef> {
        let mut inner = self.inner.lock().unwrap();
        self.check_failure(&mut inner)?;
        inner.next_id += 1;
        let id = format!("{:04}", inner.next_id);
        inner.order.push(id.clone());
        inner.items.insert(
            id.clone(),
            ItemRecord {
                name: name.to_string(),
                body: body.to_string(),
                state_id: state_id.to_string(),
                tags: tags.to_vec(),
                ..ItemRecord::default()
            },
        );
        Ok(WorkItemRef(id))
    }

    async fn append_comment(&self, reference: &WorkItemRef, text: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        self.check_failure(&mut inner)?;
        let item = inner
            .items
            .get_mut(&reference.0)
            .ok_or_else(|| SweepboardError::NotFound(reference.0.clone()))?;
        item.comments.push(text.to_string());
        Ok(())
    }

    async fn upload_artifact(&self, reference: &WorkItemRef, path: &Path) -> Result<()> {
        let data = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        let mut inner = self.inner.lock().unwrap();
        self.check_failure(&mut inner)?;
        let item = inner
            .items
            .get_mut(&reference.0)
            .ok_or_else(|| SweepboardError::NotFound(reference.0.clone()))?;
        item.attachments.push((file_name, data));
        Ok(())
    }

    async fn download_artifacts(&self, reference: &WorkItemRef, dest: &Path) -> Result<usize> {
        let attachments = {
            let mut inner = self.inner.lock().unwrap();
            self.check_failure(&mut inner)?;
            inner
                .items
                .get(&reference.0)
                .ok_or_else(|| SweepboardError::NotFound(reference.0.clone()))?
                .attachments
                .clone()
        };
        for (name, data) in &attachments {
            std::fs::write(dest.join(name), data)?;
        }
        Ok(attachments.len())
    }

    async fn list_tags(&self) -> Result<Vec<TagRef>> {
        let mut inner = self.inner.lock().unwrap();
        self.check_failure(&mut inner)?;
        Ok(inner.tags.clone())
    }

    async fn create_tag(&self, name: &str) -> Result<TagRef> {
        let mut inner = self.inner.lock().unwrap();
        self.check_failure(&mut inner)?;
        let tag = TagRef {
            name: name.to_string(),
            id: format!("tag-{}", inner.tags.len() + 1),
        };
        inner.tags.push(tag.clone());
        Ok(tag)
    }
}
