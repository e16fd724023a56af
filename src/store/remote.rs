//! REST adapter for the hosted task board.
//!
//! Thin translation layer: every trait call is one or two HTTP requests.
//! Non-success statuses become transient store errors so the retry wrapper
//! can decide whether to try again.

use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart;
use reqwest::Client;
use serde::Deserialize;

use crate::config::BoardConfig;
use crate::error::{Result, SweepboardError};
use crate::store::{TagRef, WorkItem, WorkItemRef, WorkItemStore};

pub struct RemoteStore {
    client: Client,
    base_url: String,
    token: String,
    workspace: String,
    project: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct ItemSummary {
    gid: String,
}

#[derive(Deserialize)]
struct ItemDetail {
    gid: String,
    name: String,
    #[serde(default)]
    notes: String,
    #[serde(default)]
    memberships: Vec<Membership>,
    #[serde(default)]
    assignee: Option<Assignee>,
}

#[derive(Deserialize)]
struct Membership {
    section: SectionRef,
}

#[derive(Deserialize)]
struct SectionRef {
    gid: String,
}

#[derive(Deserialize)]
struct Assignee {
    name: String,
}

#[derive(Deserialize)]
struct TagSummary {
    gid: String,
    name: String,
}

#[derive(Deserialize)]
struct AttachmentSummary {
    name: String,
    download_url: String,
}

impl RemoteStore {
    pub fn new(config: &BoardConfig, token: String) -> Self {
        tracing::info!(base_url = %config.base_url, "using remote board");
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
            workspace: config.workspace.clone(),
            project: config.project.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Check the response status, surfacing failures as store errors with
    /// the body text attached.
    async fn expect_success(op: &str, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(SweepboardError::Store(format!(
            "{op} failed: {status} - {text}"
        )))
    }
}

#[async_trait]
impl WorkItemStore for RemoteStore {
    async fn list_items(&self, state_id: &str, limit: usize) -> Result<Vec<WorkItemRef>> {
        let url = self.url(&format!("sections/{state_id}/tasks?limit={limit}"));
        tracing::debug!(%url, "GET");
        let response = self.client.get(&url).bearer_auth(&self.token).send().await?;
        let items: Envelope<Vec<ItemSummary>> =
            Self::expect_success("list_items", response).await?.json().await?;
        Ok(items.data.into_iter().map(|i| WorkItemRef(i.gid)).collect())
    }

    async fn get_details(&self, reference: &WorkItemRef) -> Result<WorkItem> {
        let url = self.url(&format!(
            "tasks/{}?opt_fields=name,notes,assignee.name,memberships.section",
            reference
        ));
        tracing::debug!(%url, "GET");
        let response = self.client.get(&url).bearer_auth(&self.token).send().await?;
        let detail: Envelope<ItemDetail> =
            Self::expect_success("get_details", response).await?.json().await?;
        let detail = detail.data;
        Ok(WorkItem {
            reference: WorkItemRef(detail.gid),
            name: detail.name,
            body: detail.notes,
            state_id: detail
                .memberships
                .first()
                .map(|m| m.section.gid.clone())
                .unwrap_or_default(),
            assignee: detail.assignee.map(|a| a.name),
        })
    }

    async fn set_state(&self, reference: &WorkItemRef, state_id: &str) -> Result<()> {
        let url = self.url(&format!("sections/{state_id}/addTask"));
        tracing::debug!(%url, item = %reference, "POST");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "data": { "task": reference.0 } }))
            .send()
            .await?;
        Self::expect_success("set_state", response).await?;
        Ok(())
    }

    async fn set_assignee(&self, reference: &WorkItemRef, assignee: Option<&str>) -> Result<()> {
        let url = self.url(&format!("tasks/{reference}"));
        tracing::debug!(%url, assignee = ?assignee, "PUT");
        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "data": { "assignee": assignee } }))
            .send()
            .await?;
        Self::expect_success("set_assignee", response).await?;
        Ok(())
    }

    async fn create_item(
        &self,
        name: &str,
        body: &str,
        state_id: &str,
        tags: &[TagRef],
    ) -> Result<WorkItemRef> {
        let url = self.url("tasks");
        tracing::debug!(%url, name, "POST");
        let tag_ids: Vec<&str> = tags.iter().map(|t| t.id.as_str()).collect();
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({
                "data": {
                    "name": name,
                    "notes": body,
                    "projects": [self.project],
                    "memberships": [{ "project": self.project, "section": state_id }],
                    "tags": tag_ids,
                }
            }))
            .send()
            .await?;
        let created: Envelope<ItemSummary> =
            Self::expect_success("create_item", response).await?.json().await?;
        Ok(WorkItemRef(created.data.gid))
    }

    async fn append_comment(&self, reference: &WorkItemRef, text: &str) -> Result<()> {
        let url = self.url(&format!("tasks/{reference}/stories"));
        tracing::debug!(%url, "POST");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "data": { "text": text } }))
            .send()
            .await?;
        Self::expect_success("append_comment", response).await?;
        Ok(())
    }

    async fn upload_artifact(&self, reference: &WorkItemRef, path: &Path) -> Result<()> {
        let url = self.url("attachments");
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        tracing::debug!(%url, file = %file_name, "POST multipart");
        let data = tokio::fs::read(path).await?;
        let form = multipart::Form::new()
            .text("parent", reference.0.clone())
            .part("file", multipart::Part::bytes(data).file_name(file_name));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;
        Self::expect_success("upload_artifact", response).await?;
        Ok(())
    }

    async fn download_artifacts(&self, reference: &WorkItemRef, dest: &Path) -> Result<usize> {
        let url = self.url(&format!(
            "tasks/{reference}/attachments?opt_fields=name,download_url&limit=50"
        ));
        tracing::debug!(%url, "GET");
        let response = self.client.get(&url).bearer_auth(&self.token).send().await?;
        let attachments: Envelope<Vec<AttachmentSummary>> =
            Self::expect_success("download_artifacts", response)
                .await?
                .json()
                .await?;
        let mut written = 0;
        for attachment in attachments.data {
            let data = self
                .client
                .get(&attachment.download_url)
                .send()
                .await?
                .bytes()
                .await?;
            tokio::fs::write(dest.join(&attachment.name), &data).await?;
            written += 1;
        }
        Ok(written)
    }

    async fn list_tags(&self) -> Result<Vec<TagRef>> {
        let url = self.url(&format!("workspaces/{}/tags?limit=100", self.workspace));
        tracing::debug!(%url, "GET");
        let response = self.client.get(&url).bearer_auth(&self.token).send().await?;
        let tags: Envelope<Vec<TagSummary>> =
            Self::expect_success("list_tags", response).await?.json().await?;
        Ok(tags
            .data
            .into_iter()
            .map(|t| TagRef {
                name: t.name,
                id: t.gid,
            })
            .collect())
    }

    async fn create_tag(&self, name: &str) -> Result<TagRef> {
        let url = self.url("tags");
        tracing::debug!(%url, name, "POST");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({
                "data": { "name": name, "workspace": self.workspace }
            }))
            .send()
            .await?;
        let created: Envelope<TagSummary> =
            Self::expect_success("create_tag", response).await?.json().await?;
        Ok(TagRef {
            name: created.data.name,
            id: created.data.gid,
        })
    }
}
