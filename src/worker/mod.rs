//! Worker lifecycle: poll, claim, execute, report.
//!
//! One worker is one single-threaded polling loop. Many workers run as
//! separate processes and coordinate only through the shared board; the
//! sole in-process concurrency is the per-job [`monitor`] task, which
//! talks to the loop through a cancellation token.
//!
//! # Lifecycle
//!
//! 1. Register a work item for this worker in the active-workers state
//! 2. Scan the backlog, claim the best-scoring dependency-free item
//! 3. Stage attachments, execute the script, report state and logs
//! 4. When nothing is claimable, sleep; after enough continuous idle
//!    time, deregister and run the configured shutdown command

pub mod executor;
pub mod monitor;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, StateMap, WorkerConfig};
use crate::error::Result;
use crate::scheduler::{self, Candidate, WorkerCache};
use crate::store::{WorkItemRef, WorkItemStore};

const WORKER_ID_FILE: &str = "worker_id";
const LOG_FILE: &str = "job_logs.txt";
const UPLOADS_DIR: &str = "uploads";

/// Stable worker identity, created on first start and reused across
/// restarts from the state directory.
pub fn get_or_create_worker_id(state_dir: &Path) -> Result<String> {
    let path = state_dir.join(WORKER_ID_FILE);
    if path.exists() {
        return Ok(std::fs::read_to_string(&path)?.trim().to_string());
    }
    let id = format!("worker-{}", Utc::now().format("%Y%m%d%H%M%S"));
    std::fs::create_dir_all(state_dir)?;
    std::fs::write(&path, &id)?;
    Ok(id)
}

/// Why an execution stopped.
enum JobEnd {
    Succeeded,
    Failed,
    /// The item was moved off the board's running state mid-execution.
    Interrupted,
    /// The operator asked this process to stop.
    OperatorStop,
}

pub struct Worker {
    store: Arc<dyn WorkItemStore>,
    config: WorkerConfig,
    states: StateMap,
    page_size: usize,
    id: String,
    cache: WorkerCache,
    registration: Option<WorkItemRef>,
}

impl Worker {
    pub fn new(store: Arc<dyn WorkItemStore>, config: &Config) -> Result<Self> {
        let id = get_or_create_worker_id(&config.worker.state_dir)?;
        let cache = WorkerCache::load(&config.worker.state_dir);
        Ok(Self {
            store,
            config: config.worker.clone(),
            states: config.board.states.clone(),
            page_size: config.board.page_size,
            id,
            cache,
            registration: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Main polling loop. Returns after idle shutdown or when `shutdown`
    /// fires; either way the worker has deregistered itself.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        self.register().await?;
        let poll = Duration::from_secs(self.config.poll_interval_secs);
        let idle_limit = Duration::from_secs(self.config.idle_shutdown_secs);
        let mut idle_since: Option<Instant> = None;

        while !shutdown.is_cancelled() {
            let candidate =
                scheduler::select(&*self.store, &self.states, &self.cache, self.page_size).await?;
            match candidate {
                Some(candidate) => {
                    if !scheduler::try_claim(&*self.store, &candidate.item.reference, &self.id)
                        .await?
                    {
                        tokio::time::sleep(poll).await;
                        continue;
                    }
                    idle_since = None;
                    self.cache.observe(&candidate.parsed.context);
                    if let Err(err) = self.cache.persist() {
                        tracing::warn!(error = %err, "could not persist affinity cache");
                    }
                    self.execute(candidate, &shutdown).await?;
                }
                None => {
                    let now = Instant::now();
                    let since = *idle_since.get_or_insert(now);
                    if !idle_limit.is_zero() && now.duration_since(since) >= idle_limit {
                        tracing::info!(
                            worker = %self.id,
                            idle_secs = now.duration_since(since).as_secs(),
                            "idle past threshold, shutting down"
                        );
                        self.deregister().await;
                        self.run_shutdown_cmd().await;
                        return Ok(());
                    }
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(poll) => {}
                    }
                }
            }
        }

        tracing::info!(worker = %self.id, "stop requested, deregistering");
        self.deregister().await;
        Ok(())
    }

    /// Execute one claimed item end to end.
    async fn execute(&self, candidate: Candidate, shutdown: &CancellationToken) -> Result<()> {
        let reference = candidate.item.reference.clone();
        tracing::info!(item = %reference, name = %candidate.item.name, "running job");
        self.store.set_state(&reference, &self.states.running).await?;

        let task_dir = self.create_task_dir(&reference)?;
        self.store.download_artifacts(&reference, &task_dir).await?;

        let cancel = shutdown.child_token();
        let watcher = monitor::watch(
            Arc::clone(&self.store),
            reference.clone(),
            self.states.running.clone(),
            Duration::from_secs(self.config.monitor_interval_secs),
            cancel.clone(),
        );

        let log_path = task_dir.join(LOG_FILE);
        let command = format!("set -e; {}", candidate.parsed.script);
        let outcome = executor::run(
            &command,
            &task_dir,
            &log_path,
            &cancel,
            Duration::from_secs(self.config.kill_grace_secs),
        )
        .await;
        cancel.cancel();
        watcher.abort();
        let outcome = outcome?;

        let end = if outcome.cancelled {
            if shutdown.is_cancelled() {
                JobEnd::OperatorStop
            } else {
                JobEnd::Interrupted
            }
        } else if outcome.succeeded() {
            JobEnd::Succeeded
        } else {
            JobEnd::Failed
        };

        match end {
            JobEnd::Succeeded => {
                self.store.set_state(&reference, &self.states.done).await?;
                self.report(&reference, "succeeded", &log_path).await?;
                self.upload_outputs(&reference, &task_dir).await?;
            }
            JobEnd::Failed => {
                self.store.set_state(&reference, &self.states.failed).await?;
                tracing::warn!(item = %reference, exit_code = ?outcome.exit_code, "job failed");
                self.report(&reference, "failed", &log_path).await?;
                self.upload_outputs(&reference, &task_dir).await?;
            }
            JobEnd::Interrupted => {
                // The board move already happened; drop our claim marker
                // so another worker can take the item wherever it went.
                tracing::warn!(item = %reference, "job interrupted externally");
                self.store.set_assignee(&reference, None).await?;
            }
            JobEnd::OperatorStop => {
                tracing::warn!(item = %reference, "job aborted by operator stop");
                self.store.set_assignee(&reference, None).await?;
                self.store.set_state(&reference, &self.states.backlog).await?;
            }
        }
        Ok(())
    }

    fn create_task_dir(&self, reference: &WorkItemRef) -> Result<PathBuf> {
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let task_dir = self
            .config
            .work_root
            .join(format!("task_{reference}_{stamp}"));
        std::fs::create_dir_all(task_dir.join(UPLOADS_DIR))?;
        Ok(task_dir)
    }

    /// Post the leading log lines as a comment; if the log is longer, the
    /// full file goes up as an artifact.
    async fn report(&self, reference: &WorkItemRef, status: &str, log_path: &Path) -> Result<()> {
        let log = std::fs::read_to_string(log_path).unwrap_or_default();
        let lines: Vec<&str> = log.lines().collect();
        let budget = self.config.log_comment_lines;
        let shown = lines[..lines.len().min(budget)].join("\n");
        let mut comment = format!("Status: {status} with logs:\n```\n{shown}\n```\n");
        if lines.len() > budget {
            comment.push_str(&format!("... and {} more lines", lines.len() - budget));
            self.store.upload_artifact(reference, log_path).await?;
        }
        self.post_comment_capped(reference, &comment).await
    }

    /// Comments have a hard length cap; overflow is uploaded instead.
    async fn post_comment_capped(&self, reference: &WorkItemRef, text: &str) -> Result<()> {
        let limit = self.config.comment_limit;
        if text.chars().count() <= limit {
            return self.store.append_comment(reference, text).await;
        }
        let overflow_path = self.config.work_root.join(format!("comment-{reference}.txt"));
        std::fs::write(&overflow_path, text)?;
        self.store.upload_artifact(reference, &overflow_path).await?;
        let mut clipped: String = text.chars().take(limit).collect();
        clipped.push_str("\nComment too long. See attached file.");
        self.store.append_comment(reference, &clipped).await
    }

    /// Ship everything the job left under `uploads/`.
    async fn upload_outputs(&self, reference: &WorkItemRef, task_dir: &Path) -> Result<()> {
        let mut pending = vec![task_dir.join(UPLOADS_DIR)];
        while let Some(dir) = pending.pop() {
            let mut files = Vec::new();
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                } else {
                    files.push(path);
                }
            }
            for path in files {
                tracing::debug!(item = %reference, file = %path.display(), "uploading output");
                self.store.upload_artifact(reference, &path).await?;
            }
        }
        Ok(())
    }

    async fn register(&mut self) -> Result<()> {
        let name = format!("Worker {}", self.id);
        let body = format!("Starting worker {}", self.id);
        let item = self
            .store
            .create_item(&name, &body, &self.states.workers, &[])
            .await?;
        tracing::info!(worker = %self.id, item = %item, "worker registered");
        self.registration = Some(item);
        Ok(())
    }

    /// Move the registration item to done. Failures are logged, not
    /// propagated: deregistration runs on the way out.
    async fn deregister(&mut self) {
        let Some(registration) = self.registration.take() else {
            return;
        };
        match self.store.set_state(&registration, &self.states.done).await {
            Ok(()) => tracing::info!(worker = %self.id, "worker deregistered"),
            Err(err) => {
                tracing::error!(worker = %self.id, error = %err, "deregistration failed");
            }
        }
    }

    async fn run_shutdown_cmd(&self) {
        let Some(cmd) = self.config.shutdown_cmd.as_deref() else {
            return;
        };
        tracing::info!(cmd, "running shutdown command");
        let log_path = self.config.work_root.join(format!("shutdown-{}.log", self.id));
        let result = executor::run(
            cmd,
            Path::new("."),
            &log_path,
            &CancellationToken::new(),
            Duration::from_secs(self.config.kill_grace_secs),
        )
        .await;
        if let Err(err) = result {
            tracing::error!(error = %err, "shutdown command failed to run");
        }
    }
}
