use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Backpressure signal, never fatal: the sliding-window quota declined
    /// further calls. Handled by pausing and enqueueing continuation work.
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Transient transport-level failure (HTTP 5xx, stale browser element).
    /// Requeued with backoff when it escapes to the orchestrator.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Network-level failure reaching the tracker.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Authentication rejected by the tracker. Requires a configuration
    /// fix, never retried automatically.
    #[error("Authentication rejected: {0}")]
    Auth(String),

    /// Permanent failure (malformed query, disabled transport). Not retried
    /// automatically.
    #[error("Permanent failure: {0}")]
    Permanent(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Model error: {0}")]
    Model(#[from] cadence_model::ModelError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl SyncError {
    /// Whether the failure is worth an automatic retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::QuotaExceeded(_)
                | SyncError::Transport(_)
                | SyncError::Network(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
