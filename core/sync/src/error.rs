use memo_mirror_store::StoreError;
use thiserror::Error;

/// Failure of a single remote page fetch
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("network error: {message}")]
    Network { message: String, transient: bool },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("malformed response: {0}")]
    Parse(String),

    #[error("remote rejected the request (code {code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("client setup failed: {0}")]
    Client(String),
}

impl RemoteError {
    pub fn transient(message: impl Into<String>) -> Self {
        RemoteError::Network {
            message: message.into(),
            transient: true,
        }
    }

    /// Whether the same page may be requested again
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Network { transient: true, .. })
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a sync is already running")]
    AlreadyRunning,

    /// Another process holds the writer lease on the same store
    #[error("store is busy: {owner} is writing to it")]
    HeldElsewhere { owner: String },

    #[error("token must not be empty")]
    InvalidToken,

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: RemoteError,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("sync cancelled")]
    Cancelled,

    #[error("page limit of {0} reached")]
    PageLimitExceeded(usize),

    #[error("background task failed: {0}")]
    Task(String),
}
