//! Memo Mirror sync service.
//!
//! Pulls pages of memos from the remote service into the local store,
//! reports progress, and serves reads and exports over HTTP.

pub mod config;
pub mod error;
pub mod flomo;
pub mod orchestrator;
pub mod query;
pub mod remote;
pub mod service;

pub use config::{ConfigError, SyncConfig};
pub use error::{RemoteError, SyncError};
pub use flomo::{html_to_text, FlomoClient, RequestSigner, SaltedDigestSigner};
pub use orchestrator::{SyncHandle, SyncOptions, SyncOrchestrator, SyncReport};
pub use query::{QueryService, MAX_PAGE_LIMIT};
pub use remote::{Cursor, RemotePage, RemoteSource};
pub use service::{router, AppState};

use memo_mirror_store::Database;
use std::sync::Arc;

/// Open the store at the configured path, creating its directory if needed
pub fn open_database(config: &SyncConfig) -> anyhow::Result<Arc<Database>> {
    config.ensure_db_dir()?;
    let db = Database::new(&config.db_path)?;
    Ok(Arc::new(db))
}
