use thiserror::Error;

#[derive(Error, Debug)]
pub enum SweepboardError {
    #[error("Invalid sweep spec: {0}")]
    Spec(String),

    #[error("Placeholder cycle while resolving: {0}")]
    PlaceholderCycle(String),

    #[error("Unresolved reference $({job}.{field})")]
    UnresolvedReference { job: String, field: String },

    #[error("Duplicate job name in sweep run: {0}")]
    DuplicateJobName(String),

    #[error("Work item not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),
}

impl SweepboardError {
    /// Whether the error is worth retrying at a store boundary.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Http(_))
    }
}

pub type Result<T> = std::result::Result<T, SweepboardError>;
