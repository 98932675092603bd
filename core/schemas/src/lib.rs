use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ID Types
// ============================================================================

/// Identifier of one sync run (`run_` + ULID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Memo Schema
// ============================================================================

/// A single note mirrored from the remote service.
///
/// `slug` is the stable identity. Timestamps keep the remote's string form;
/// use [`parse_timestamp`] when an instant is needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memo {
    pub slug: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Memo {
    /// Epoch seconds of `created_at`, 0 when unparseable
    pub fn created_epoch(&self) -> i64 {
        epoch_or_zero(&self.created_at)
    }

    /// Epoch seconds of `updated_at`, 0 when unparseable
    pub fn updated_epoch(&self) -> i64 {
        epoch_or_zero(&self.updated_at)
    }

    /// Tags with duplicates removed, first occurrence wins
    pub fn unique_tags(&self) -> Vec<String> {
        let mut seen = Vec::with_capacity(self.tags.len());
        for tag in &self.tags {
            if !seen.contains(tag) {
                seen.push(tag.clone());
            }
        }
        seen
    }
}

// ============================================================================
// Sync Metadata Schema
// ============================================================================

/// Lifecycle of a sync run. `Idle` is the resting state before any run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    #[serde(rename = "idle")]
    Idle,
    #[serde(rename = "starting")]
    Starting,
    #[serde(rename = "fetching")]
    Fetching,
    #[serde(rename = "upserting")]
    Upserting,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Starting => "starting",
            SyncStatus::Fetching => "fetching",
            SyncStatus::Upserting => "upserting",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
            SyncStatus::Cancelled => "cancelled",
        }
    }

    /// True while a run owns the store as writer
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            SyncStatus::Starting | SyncStatus::Fetching | SyncStatus::Upserting
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Completed | SyncStatus::Failed | SyncStatus::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: SyncStatus) -> bool {
        use SyncStatus::*;
        match (self, next) {
            (Idle | Completed | Failed | Cancelled, Starting) => true,
            (Starting, Fetching) => true,
            (Fetching, Upserting) => true,
            (Upserting, Fetching) => true,
            (Starting | Fetching | Upserting, Completed | Failed | Cancelled) => true,
            (Completed | Failed | Cancelled, Idle) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "idle" => Ok(SyncStatus::Idle),
            "starting" => Ok(SyncStatus::Starting),
            "fetching" => Ok(SyncStatus::Fetching),
            "upserting" => Ok(SyncStatus::Upserting),
            "completed" => Ok(SyncStatus::Completed),
            "failed" => Ok(SyncStatus::Failed),
            "cancelled" => Ok(SyncStatus::Cancelled),
            other => Err(format!("unknown sync status: {}", other)),
        }
    }
}

/// Singleton record describing the last (or current) sync run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub last_sync_at: Option<String>, // RFC3339
    pub total_memos: u64,
    pub status: SyncStatus,
    pub error_message: Option<String>,
    pub last_run_id: Option<RunId>,
}

impl Default for SyncMetadata {
    fn default() -> Self {
        Self {
            last_sync_at: None,
            total_memos: 0,
            status: SyncStatus::Idle,
            error_message: None,
            last_run_id: None,
        }
    }
}

// ============================================================================
// Progress Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressStatus {
    #[serde(rename = "syncing")]
    Syncing,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Syncing => "syncing",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Failed => "failed",
            ProgressStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressStatus::Syncing)
    }
}

/// Snapshot pushed to progress subscribers after each page and at the end of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub run_id: RunId,
    pub total: usize,
    pub current: usize,
    pub status: ProgressStatus,
    pub message: String,
}

// ============================================================================
// Paging
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderBy {
    #[default]
    #[serde(rename = "created_at")]
    CreatedAt,
    #[serde(rename = "updated_at")]
    UpdatedAt,
}

impl OrderBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderBy::CreatedAt => "created_at",
            OrderBy::UpdatedAt => "updated_at",
        }
    }
}

impl FromStr for OrderBy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "created_at" | "created" => Ok(OrderBy::CreatedAt),
            "updated_at" | "updated" => Ok(OrderBy::UpdatedAt),
            other => Err(format!("unknown order field: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    #[serde(rename = "asc")]
    Asc,
    #[default]
    #[serde(rename = "desc")]
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(format!("unknown sort direction: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub order_by: OrderBy,
    pub direction: SortDirection,
    pub offset: usize,
    pub limit: usize,
}

impl PageRequest {
    pub fn new(order_by: OrderBy, direction: SortDirection, offset: usize, limit: usize) -> Self {
        Self {
            order_by,
            direction,
            offset,
            limit,
        }
    }

    /// The request for the page following this one
    pub fn next(&self) -> Self {
        Self {
            offset: self.offset + self.limit,
            ..*self
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(OrderBy::CreatedAt, SortDirection::Desc, 0, 50)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoPage {
    pub memos: Vec<Memo>,
    pub has_more: bool,
}

/// A tag from the tag index with the number of memos carrying it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCount {
    pub tag: String,
    pub memo_count: usize,
}

// ============================================================================
// Helper Functions
// ============================================================================

pub fn generate_run_id() -> RunId {
    RunId(format!("run_{}", ulid::Ulid::new()))
}

/// Parse a remote timestamp.
///
/// The remote sends `YYYY-MM-DD HH:MM:SS` (treated as UTC); RFC 3339 and the
/// `T`-separated naive form are accepted as well.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    parse_timestamp_in(raw, &Utc.fix())
}

/// Like [`parse_timestamp`], reading naive values as local time at `offset`
pub fn parse_timestamp_in(raw: &str, offset: &FixedOffset) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|naive| offset.from_local_datetime(&naive).single())
        .map(|dt| dt.with_timezone(&Utc))
}

fn epoch_or_zero(raw: &str) -> i64 {
    parse_timestamp(raw).map(|dt| dt.timestamp()).unwrap_or(0)
}
