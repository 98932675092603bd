use crate::error::RemoteError;
use async_trait::async_trait;
use chrono::{FixedOffset, Offset, Utc};
use memo_mirror_schemas::{parse_timestamp_in, Memo};
use serde::{Deserialize, Serialize};

/// Position in the remote collection, which is ordered by update time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Number of memos consumed before this page
    pub offset: usize,
    pub latest_slug: Option<String>,
    /// Epoch seconds of the last memo of the previous page
    pub latest_updated_at: Option<i64>,
}

impl Cursor {
    pub fn start() -> Self {
        Self::default()
    }

    /// Cursor positioned right after `memos`, which were fetched at `self`
    pub fn after(&self, memos: &[Memo]) -> Self {
        self.after_in(memos, &Utc.fix())
    }

    /// Like [`Cursor::after`] for a remote whose naive timestamps are local
    /// time at `offset`
    pub fn after_in(&self, memos: &[Memo], offset: &FixedOffset) -> Self {
        let last = memos.last();
        Self {
            offset: self.offset + memos.len(),
            latest_slug: last
                .map(|memo| memo.slug.clone())
                .or_else(|| self.latest_slug.clone()),
            latest_updated_at: last
                .and_then(|memo| parse_timestamp_in(&memo.updated_at, offset))
                .map(|ts| ts.timestamp())
                .or(self.latest_updated_at),
        }
    }
}

/// One fetched page; `next` is `None` once the collection is exhausted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePage {
    pub memos: Vec<Memo>,
    pub next: Option<Cursor>,
}

impl RemotePage {
    pub fn is_last(&self) -> bool {
        self.next.is_none()
    }
}

/// Source of remote memo pages.
///
/// Implementations are stateless per call and must not retry on their own;
/// retry policy belongs to the orchestrator.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn fetch_page(&self, cursor: &Cursor, token: &str) -> Result<RemotePage, RemoteError>;
}
