//! Shell command execution.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// How one execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub exit_code: Option<i32>,
    /// True when the command was terminated through the cancellation
    /// token rather than exiting on its own.
    pub cancelled: bool,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        !self.cancelled && self.exit_code == Some(0)
    }
}

/// Run `command` under `sh -c` in `cwd`, streaming stdout and stderr into
/// `log_path`.
///
/// Blocks until the child exits or `cancel` fires. On cancellation the
/// child is killed and reaped within `kill_grace`; a child that survives
/// the grace period is left to the OS.
pub async fn run(
    command: &str,
    cwd: &Path,
    log_path: &Path,
    cancel: &CancellationToken,
    kill_grace: Duration,
) -> Result<ExecutionOutcome> {
    let log = std::fs::File::create(log_path)?;
    let err_log = log.try_clone()?;
    tracing::info!(cwd = %cwd.display(), log = %log_path.display(), "executing command");

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(err_log))
        .spawn()?;

    tokio::select! {
        status = child.wait() => {
            let status = status?;
            let exit_code = status.code();
            tracing::info!(exit_code = ?exit_code, "command finished");
            Ok(ExecutionOutcome {
                exit_code,
                cancelled: false,
            })
        }
        _ = cancel.cancelled() => {
            tracing::warn!("cancellation requested, killing command");
            child.start_kill()?;
            let _ = tokio::time::timeout(kill_grace, child.wait()).await;
            Ok(ExecutionOutcome {
                exit_code: None,
                cancelled: true,
            })
        }
    }
}
