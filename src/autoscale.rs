//! Backlog-driven scale-up loop.
//!
//! Counts backlog items against registered workers and, while workers are
//! both below the cap and outnumbered, runs the configured scale-up
//! command. Each attempt is recorded as its own work item with the
//! command's logs, so fleet growth shows up on the board like any other
//! work.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::store::WorkItemStore;
use crate::worker::executor;

const COUNT_LIMIT: usize = 100;
const CHECK_INTERVAL: Duration = Duration::from_secs(5);
const SCALE_CMD_GRACE: Duration = Duration::from_secs(30);

/// One scale decision. Returns whether a scale-up ran.
pub async fn scale_once(store: &dyn WorkItemStore, config: &Config) -> Result<bool> {
    let states = &config.board.states;
    let backlog = store.list_items(&states.backlog, COUNT_LIMIT).await?.len();
    let active = store.list_items(&states.workers, COUNT_LIMIT).await?.len();
    if active >= config.scale.max_workers || backlog <= active {
        tracing::debug!(backlog, active, "no scale-up needed");
        return Ok(false);
    }
    let Some(cmd) = config.scale.cmd.as_deref() else {
        tracing::warn!(backlog, active, "backlog calls for a scale-up but no scale command is configured");
        return Ok(false);
    };

    let worker_id = format!("worker-{}", Utc::now().timestamp());
    let name = format!("Starting worker {worker_id}");
    let item = store.create_item(&name, &name, &states.workers, &[]).await?;
    tracing::info!(backlog, active, item = %item, "scaling up");

    let log_path = std::env::temp_dir().join(format!("scale-{worker_id}.log"));
    let outcome = executor::run(
        cmd,
        Path::new("."),
        &log_path,
        &CancellationToken::new(),
        SCALE_CMD_GRACE,
    )
    .await?;

    let log = std::fs::read_to_string(&log_path).unwrap_or_default();
    let (status, target) = if outcome.succeeded() {
        ("succeeded", &states.done)
    } else {
        ("failed", &states.failed)
    };
    let mut comment = format!("Scale up {status}. Logs:\n```\n{log}\n```");
    if comment.chars().count() > config.worker.comment_limit {
        store.upload_artifact(&item, &log_path).await?;
        comment = comment.chars().take(config.worker.comment_limit).collect();
        comment.push_str("\nComment too long. See attached file.");
    }
    store.append_comment(&item, &comment).await?;
    store.set_state(&item, target).await?;
    Ok(true)
}

/// Poll the board and scale until `shutdown` fires. After a scale-up the
/// next check waits a randomized interval so a fleet of autoscalers does
/// not stampede the provider.
pub async fn run(
    store: &dyn WorkItemStore,
    config: &Config,
    shutdown: CancellationToken,
) -> Result<()> {
    while !shutdown.is_cancelled() {
        let scaled = scale_once(store, config).await?;
        let wait = if scaled {
            let bound = config.scale.wait_between_scales_secs.max(1);
            Duration::from_secs(rand::thread_rng().gen_range(0..bound))
        } else {
            CHECK_INTERVAL
        };
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }
    Ok(())
}
