use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, SweepboardError};

/// Environment variable holding the board API token.
pub const TOKEN_ENV: &str = "SWEEPBOARD_TOKEN";

const DEFAULT_CONFIG_FILE: &str = "sweepboard.yaml";

/// Opaque identifiers for the board columns a work item moves through.
///
/// The engine only ever compares and forwards these; what they mean is the
/// board's business. Defaults use the state names themselves, which is what
/// the in-memory store expects.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StateMap {
    pub backlog: String,
    pub running: String,
    pub done: String,
    pub failed: String,
    /// Column tracking one registration item per live worker.
    pub workers: String,
}

impl Default for StateMap {
    fn default() -> Self {
        Self {
            backlog: "backlog".to_string(),
            running: "running".to_string(),
            done: "done".to_string(),
            failed: "failed".to_string(),
            workers: "workers".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// Base URL of the board's REST API.
    pub base_url: String,
    pub workspace: String,
    pub project: String,
    pub states: StateMap,
    /// How many pending items one scheduling scan considers.
    pub page_size: usize,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8440/api/1.0".to_string(),
            workspace: String::new(),
            project: String::new(),
            states: StateMap::default(),
            page_size: 25,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Seconds to sleep between backlog scans when nothing is claimable.
    pub poll_interval_secs: u64,
    /// Seconds between interruption checks while a job is executing.
    pub monitor_interval_secs: u64,
    /// Continuous idle seconds before the worker deregisters and shuts
    /// down. Zero disables idle shutdown.
    pub idle_shutdown_secs: u64,
    /// Grace period for a cancelled job's process to exit after the kill.
    pub kill_grace_secs: u64,
    /// How many leading log lines go into the result comment.
    pub log_comment_lines: usize,
    /// Hard cap on posted comment length; overflow is uploaded instead.
    pub comment_limit: usize,
    /// Directory holding the worker id file and the affinity cache.
    pub state_dir: PathBuf,
    /// Directory under which per-task working directories are created.
    pub work_root: PathBuf,
    /// Command run after idle deregistration (e.g. instance self-stop).
    pub shutdown_cmd: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            monitor_interval_secs: 10,
            idle_shutdown_secs: 900,
            kill_grace_secs: 10,
            log_comment_lines: 100,
            comment_limit: 2000,
            state_dir: default_state_dir(),
            work_root: std::env::temp_dir(),
            shutdown_cmd: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScaleConfig {
    /// Upper bound on concurrently registered workers.
    pub max_workers: usize,
    /// Command that brings one more worker online.
    pub cmd: Option<String>,
    /// Upper bound of the randomized pause after a scale-up, in seconds.
    pub wait_between_scales_secs: u64,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            cmd: None,
            wait_between_scales_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub board: BoardConfig,
    pub worker: WorkerConfig,
    pub scale: ScaleConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SweepboardError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// Load an explicit config path, or `sweepboard.yaml` from the working
    /// directory when present, or fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let local = Path::new(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    Self::load(local)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Board API token from the environment. Missing token is an error only
    /// for commands that actually talk to the remote board.
    pub fn api_token() -> Result<String> {
        std::env::var(TOKEN_ENV)
            .map_err(|_| SweepboardError::Config(format!("{} is not set", TOKEN_ENV)))
    }
}

fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sweepboard")
}
