use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("writer lease held by {owner} until {expires_at}")]
    LeaseHeld { owner: String, expires_at: i64 },

    #[error("writer lease of {0} was lost")]
    LeaseLost(String),

    #[error("database connection lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;
