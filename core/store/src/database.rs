use crate::error::{Result, StoreError};
use chrono::Utc;
use memo_mirror_schemas::{
    Memo, MemoPage, PageRequest, OrderBy, RunId, SyncMetadata, SyncStatus, TagCount,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const MEMO_COLUMNS: &str = "m.slug, m.content, m.created_at, m.updated_at, m.tags, m.url";

/// Outcome of applying one page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
    /// Rows left alone because the stored version is newer
    pub skipped: usize,
}

impl UpsertSummary {
    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Live holder of the cross-process writer lease
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriterLease {
    pub owner: String,
    /// Epoch milliseconds
    pub expires_at: i64,
}

/// SQLite-backed memo store.
///
/// One connection behind a mutex; a reader waits at most for the page
/// transaction currently being committed.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the store and make sure the schema exists
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let journal: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        info!(
            "Database initialized at {} (journal: {})",
            path.as_ref().display(),
            journal
        );
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS memos (
                slug TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                search_text TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                created_ts INTEGER NOT NULL,
                updated_ts INTEGER NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                url TEXT,
                synced_at TEXT NOT NULL
            )",
            [],
        )?;

        // Tag index, rebuilt per memo on every accepted upsert
        conn.execute(
            "CREATE TABLE IF NOT EXISTS memo_tags (
                slug TEXT NOT NULL REFERENCES memos(slug) ON DELETE CASCADE,
                tag TEXT NOT NULL,
                tag_lower TEXT NOT NULL,
                PRIMARY KEY (slug, tag)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS sync_metadata (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_sync_at TEXT,
                total_memos INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'idle',
                error_message TEXT,
                last_run_id TEXT
            )",
            [],
        )?;

        conn.execute(
            "INSERT OR IGNORE INTO sync_metadata (id, total_memos, status) VALUES (1, 0, 'idle')",
            [],
        )?;

        // At most one writer per database file, across processes
        conn.execute(
            "CREATE TABLE IF NOT EXISTS writer_lease (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                owner TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_memos_created_ts ON memos(created_ts, slug)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_memos_updated_ts ON memos(updated_ts, slug)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_memo_tags_lower ON memo_tags(tag_lower)",
            [],
        )?;

        Ok(())
    }

    // ========== MEMO WRITES ==========

    /// Apply one page of memos atomically.
    ///
    /// A known slug is overwritten only when the incoming `updated_at` is not
    /// older than the stored one. Either every row of the page commits or
    /// none does.
    pub fn upsert_page(&self, memos: &[Memo]) -> Result<UpsertSummary> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut summary = UpsertSummary::default();
        let synced_at = Utc::now().to_rfc3339();

        {
            let mut select_ts =
                tx.prepare_cached("SELECT updated_ts FROM memos WHERE slug = ?1")?;
            let mut upsert = tx.prepare_cached(
                "INSERT INTO memos (slug, content, search_text, created_at, updated_at,
                                    created_ts, updated_ts, tags, url, synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(slug) DO UPDATE SET
                    content = excluded.content,
                    search_text = excluded.search_text,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at,
                    created_ts = excluded.created_ts,
                    updated_ts = excluded.updated_ts,
                    tags = excluded.tags,
                    url = excluded.url,
                    synced_at = excluded.synced_at",
            )?;
            let mut clear_tags = tx.prepare_cached("DELETE FROM memo_tags WHERE slug = ?1")?;
            let mut insert_tag = tx.prepare_cached(
                "INSERT OR IGNORE INTO memo_tags (slug, tag, tag_lower) VALUES (?1, ?2, ?3)",
            )?;

            for memo in memos {
                let incoming_ts = memo.updated_epoch();
                let stored_ts: Option<i64> = select_ts
                    .query_row(params![memo.slug], |row| row.get(0))
                    .optional()?;

                match stored_ts {
                    Some(stored) if incoming_ts < stored => {
                        debug!("Skipping stale version of memo {}", memo.slug);
                        summary.skipped += 1;
                        continue;
                    }
                    Some(_) => summary.updated += 1,
                    None => summary.inserted += 1,
                }

                let tags = memo.unique_tags();
                let tags_json = serde_json::to_string(&tags)?;

                upsert.execute(params![
                    memo.slug,
                    memo.content,
                    memo.content.to_lowercase(),
                    memo.created_at,
                    memo.updated_at,
                    memo.created_epoch(),
                    incoming_ts,
                    tags_json,
                    memo.url,
                    synced_at,
                ])?;

                clear_tags.execute(params![memo.slug])?;
                for tag in &tags {
                    insert_tag.execute(params![memo.slug, tag, tag.to_lowercase()])?;
                }
            }
        }

        tx.commit()?;

        debug!(
            "Upserted page of {} memos (inserted: {}, updated: {}, skipped: {})",
            memos.len(),
            summary.inserted,
            summary.updated,
            summary.skipped
        );
        Ok(summary)
    }

    /// Irreversibly remove every memo and reset the sync metadata
    pub fn clear_all(&self) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM memo_tags", [])?;
        let removed = tx.execute("DELETE FROM memos", [])?;
        tx.execute(
            "UPDATE sync_metadata
             SET last_sync_at = NULL, total_memos = 0, status = 'idle',
                 error_message = NULL, last_run_id = NULL
             WHERE id = 1",
            [],
        )?;

        tx.commit()?;

        info!("Cleared {} memos from the store", removed);
        Ok(removed)
    }

    // ========== MEMO READS ==========

    fn row_to_memo(row: &Row) -> rusqlite::Result<Memo> {
        let tags_json: String = row.get(4)?;
        let tags: Vec<String> = serde_json::from_str(&tags_json).map_err(json_error)?;

        Ok(Memo {
            slug: row.get(0)?,
            content: row.get(1)?,
            created_at: row.get(2)?,
            updated_at: row.get(3)?,
            tags,
            url: row.get(5)?,
        })
    }

    /// Ordered page of memos; ties on the ordering field break by slug
    pub fn get_page(&self, request: &PageRequest) -> Result<MemoPage> {
        let (limit, offset) = bounds(request)?;

        let sql = format!(
            "SELECT {MEMO_COLUMNS} FROM memos m
             ORDER BY {} LIMIT ?1 OFFSET ?2",
            order_clause(request)
        );

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let memos = stmt
            .query_map(
                params![limit, offset],
                Self::row_to_memo,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(into_page(memos, request.limit))
    }

    /// Case-insensitive substring search over content and tag names
    pub fn search_page(&self, query: &str, request: &PageRequest) -> Result<MemoPage> {
        let (limit, offset) = bounds(request)?;

        let pattern = format!("%{}%", escape_like(&query.trim().to_lowercase()));
        let sql = format!(
            "SELECT {MEMO_COLUMNS} FROM memos m
             WHERE m.search_text LIKE ?1 ESCAPE '\\'
                OR EXISTS (
                    SELECT 1 FROM memo_tags t
                    WHERE t.slug = m.slug AND t.tag_lower LIKE ?1 ESCAPE '\\'
                )
             ORDER BY {} LIMIT ?2 OFFSET ?3",
            order_clause(request)
        );

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let memos = stmt
            .query_map(
                params![pattern, limit, offset],
                Self::row_to_memo,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(into_page(memos, request.limit))
    }

    pub fn get_memo(&self, slug: &str) -> Result<Option<Memo>> {
        let conn = self.lock()?;
        let memo = conn
            .query_row(
                &format!("SELECT {MEMO_COLUMNS} FROM memos m WHERE m.slug = ?1"),
                params![slug],
                Self::row_to_memo,
            )
            .optional()?;
        Ok(memo)
    }

    /// Count stored memos
    pub fn count_memos(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM memos", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Tag index with memo counts, most used first
    pub fn list_tags(&self) -> Result<Vec<TagCount>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT tag, COUNT(*) AS memo_count
             FROM memo_tags
             GROUP BY tag
             ORDER BY memo_count DESC, tag ASC",
        )?;

        let tags = stmt
            .query_map([], |row| {
                Ok(TagCount {
                    tag: row.get(0)?,
                    memo_count: row.get::<_, i64>(1)? as usize,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(tags)
    }

    // ========== SYNC METADATA ==========

    pub fn get_sync_metadata(&self) -> Result<SyncMetadata> {
        let conn = self.lock()?;
        let metadata = conn
            .query_row(
                "SELECT last_sync_at, total_memos, status, error_message, last_run_id
                 FROM sync_metadata WHERE id = 1",
                [],
                |row| {
                    let status_raw: String = row.get(2)?;
                    let status = status_raw.parse::<SyncStatus>().map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into())
                    })?;
                    Ok(SyncMetadata {
                        last_sync_at: row.get(0)?,
                        total_memos: row.get::<_, i64>(1)? as u64,
                        status,
                        error_message: row.get(3)?,
                        last_run_id: row.get::<_, Option<String>>(4)?.map(RunId),
                    })
                },
            )
            .optional()?;

        Ok(metadata.unwrap_or_default())
    }

    pub fn set_sync_metadata(&self, metadata: &SyncMetadata) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_metadata (id, last_sync_at, total_memos, status, error_message, last_run_id)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                last_sync_at = excluded.last_sync_at,
                total_memos = excluded.total_memos,
                status = excluded.status,
                error_message = excluded.error_message,
                last_run_id = excluded.last_run_id",
            params![
                metadata.last_sync_at,
                metadata.total_memos as i64,
                metadata.status.as_str(),
                metadata.error_message,
                metadata.last_run_id.as_ref().map(|id| id.0.as_str()),
            ],
        )?;

        debug!("Sync metadata set to {}", metadata.status);
        Ok(())
    }

    // ========== WRITER LEASE ==========

    /// Current holder of the writer lease, if it has not expired
    pub fn writer_lease(&self) -> Result<Option<WriterLease>> {
        let conn = self.lock()?;
        let lease = conn
            .query_row(
                "SELECT owner, expires_at FROM writer_lease WHERE id = 1 AND expires_at > ?1",
                params![now_millis()],
                |row| {
                    Ok(WriterLease {
                        owner: row.get(0)?,
                        expires_at: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(lease)
    }

    /// Take the writer lease for `owner` for `ttl`.
    ///
    /// Fails with [`StoreError::LeaseHeld`] while another owner holds a live
    /// lease. An expired lease is taken over.
    pub fn acquire_writer_lease(&self, owner: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_millis();

        let holder: Option<(String, i64)> = tx
            .query_row(
                "SELECT owner, expires_at FROM writer_lease WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((holder, expires_at)) = holder {
            if holder != owner && expires_at > now {
                return Err(StoreError::LeaseHeld {
                    owner: holder,
                    expires_at,
                });
            }
            if holder != owner {
                info!("Taking over expired writer lease from {}", holder);
            }
        }

        tx.execute(
            "INSERT INTO writer_lease (id, owner, expires_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET
                owner = excluded.owner,
                expires_at = excluded.expires_at",
            params![owner, expiry(now, ttl)],
        )?;
        tx.commit()?;

        debug!("Writer lease taken by {}", owner);
        Ok(())
    }

    /// Drop the lease if `owner` still holds it; returns whether it did
    pub fn release_writer_lease(&self, owner: &str) -> Result<bool> {
        let conn = self.lock()?;
        let released = conn.execute("DELETE FROM writer_lease WHERE owner = ?1", params![owner])?;
        Ok(released > 0)
    }

    /// Write `metadata` on behalf of the lease holder `owner`.
    ///
    /// With `renew = Some(ttl)` the lease is extended, with `None` it is
    /// released in the same transaction. Fails with
    /// [`StoreError::LeaseLost`] when `owner` no longer holds the lease.
    pub fn set_sync_metadata_as(
        &self,
        owner: &str,
        metadata: &SyncMetadata,
        renew: Option<Duration>,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let held = match renew {
            Some(ttl) => tx.execute(
                "UPDATE writer_lease SET expires_at = ?2 WHERE owner = ?1",
                params![owner, expiry(now_millis(), ttl)],
            )?,
            None => tx.execute("DELETE FROM writer_lease WHERE owner = ?1", params![owner])?,
        };
        if held == 0 {
            return Err(StoreError::LeaseLost(owner.to_string()));
        }

        tx.execute(
            "UPDATE sync_metadata
             SET last_sync_at = ?1, total_memos = ?2, status = ?3,
                 error_message = ?4, last_run_id = ?5
             WHERE id = 1",
            params![
                metadata.last_sync_at,
                metadata.total_memos as i64,
                metadata.status.as_str(),
                metadata.error_message,
                metadata.last_run_id.as_ref().map(|id| id.0.as_str()),
            ],
        )?;
        tx.commit()?;

        debug!("Sync metadata set to {} by {}", metadata.status, owner);
        Ok(())
    }
}

/// SQL `LIMIT` (one extra row to detect `has_more`) and `OFFSET` for `request`
fn bounds(request: &PageRequest) -> Result<(i64, i64)> {
    if request.limit == 0 {
        return Err(StoreError::InvalidRequest(
            "page limit must be at least 1".to_string(),
        ));
    }
    let limit = i64::try_from(request.limit.saturating_add(1)).map_err(|_| {
        StoreError::InvalidRequest(format!("page limit {} is too large", request.limit))
    })?;
    let offset = i64::try_from(request.offset).map_err(|_| {
        StoreError::InvalidRequest(format!("page offset {} is too large", request.offset))
    })?;
    Ok((limit, offset))
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry(now: i64, ttl: Duration) -> i64 {
    now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

fn order_clause(request: &PageRequest) -> String {
    let column = match request.order_by {
        OrderBy::CreatedAt => "m.created_ts",
        OrderBy::UpdatedAt => "m.updated_ts",
    };
    format!("{} {}, m.slug ASC", column, request.direction.as_sql())
}

fn into_page(mut memos: Vec<Memo>, limit: usize) -> MemoPage {
    let has_more = memos.len() > limit;
    memos.truncate(limit);
    MemoPage { memos, has_more }
}

/// Escape `%`, `_` and the escape character itself for a LIKE pattern
fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn json_error(err: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use memo_mirror_schemas::SortDirection;
    use tempfile::NamedTempFile;

    fn memo(slug: &str, content: &str, updated_at: &str, tags: &[&str]) -> Memo {
        Memo {
            slug: slug.to_string(),
            content: content.to_string(),
            created_at: "2024-01-01 00:00:00".to_string(),
            updated_at: updated_at.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            url: Some(format!("https://example.com/mine/?memo_id={}", slug)),
        }
    }

    fn page(order_by: OrderBy, direction: SortDirection, offset: usize, limit: usize) -> PageRequest {
        PageRequest::new(order_by, direction, offset, limit)
    }

    #[test]
    fn test_database_creation() {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::new(temp_file.path()).unwrap();

        assert_eq!(db.count_memos().unwrap(), 0);
        let metadata = db.get_sync_metadata().unwrap();
        assert_eq!(metadata, SyncMetadata::default());
    }

    #[test]
    fn test_reopen_keeps_rows() {
        let temp_file = NamedTempFile::new().unwrap();
        {
            let db = Database::new(temp_file.path()).unwrap();
            db.upsert_page(&[memo("a", "first", "2024-01-02 00:00:00", &[])])
                .unwrap();
        }
        let db = Database::new(temp_file.path()).unwrap();
        assert_eq!(db.count_memos().unwrap(), 1);
    }

    #[test]
    fn test_upsert_keeps_newest_version() {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::new(temp_file.path()).unwrap();

        let first = db
            .upsert_page(&[memo("a", "v2", "2024-01-02 00:00:00", &["new"])])
            .unwrap();
        assert_eq!(first.inserted, 1);

        let stale = db
            .upsert_page(&[memo("a", "v1", "2024-01-01 00:00:00", &["old"])])
            .unwrap();
        assert_eq!(stale.skipped, 1);
        assert_eq!(db.get_memo("a").unwrap().unwrap().content, "v2");

        let same_instant = db
            .upsert_page(&[memo("a", "v2b", "2024-01-02 00:00:00", &["new"])])
            .unwrap();
        assert_eq!(same_instant.updated, 1);
        assert_eq!(db.get_memo("a").unwrap().unwrap().content, "v2b");
    }

    #[test]
    fn test_duplicate_slug_within_page() {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::new(temp_file.path()).unwrap();

        let summary = db
            .upsert_page(&[
                memo("a", "newer", "2024-02-01 00:00:00", &[]),
                memo("a", "older", "2024-01-01 00:00:00", &[]),
            ])
            .unwrap();

        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(db.get_memo("a").unwrap().unwrap().content, "newer");
        assert_eq!(db.count_memos().unwrap(), 1);
    }

    #[test]
    fn test_failed_page_is_rolled_back() {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::new(temp_file.path()).unwrap();

        db.upsert_page(&[memo("a", "kept", "2024-01-01 00:00:00", &[])])
            .unwrap();

        db.lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_poison BEFORE INSERT ON memos
                 WHEN NEW.slug = 'poison'
                 BEGIN SELECT RAISE(ABORT, 'poisoned row'); END;",
            )
            .unwrap();

        let result = db.upsert_page(&[
            memo("b", "lost", "2024-01-01 00:00:00", &["x"]),
            memo("poison", "boom", "2024-01-01 00:00:00", &[]),
        ]);

        assert!(matches!(result, Err(StoreError::Sqlite(_))));
        assert_eq!(db.count_memos().unwrap(), 1);
        assert!(db.get_memo("b").unwrap().is_none());
        assert!(db.list_tags().unwrap().is_empty());
    }

    #[test]
    fn test_ordering_breaks_ties_by_slug() {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::new(temp_file.path()).unwrap();

        db.upsert_page(&[
            memo("c", "3", "2024-01-05 00:00:00", &[]),
            memo("b", "2", "2024-01-05 00:00:00", &[]),
            memo("a", "1", "2024-01-01 00:00:00", &[]),
        ])
        .unwrap();

        let desc = db
            .get_page(&page(OrderBy::UpdatedAt, SortDirection::Desc, 0, 10))
            .unwrap();
        let slugs: Vec<_> = desc.memos.iter().map(|m| m.slug.as_str()).collect();
        assert_eq!(slugs, vec!["b", "c", "a"]);
        assert!(!desc.has_more);

        let asc = db
            .get_page(&page(OrderBy::UpdatedAt, SortDirection::Asc, 0, 2))
            .unwrap();
        let slugs: Vec<_> = asc.memos.iter().map(|m| m.slug.as_str()).collect();
        assert_eq!(slugs, vec!["a", "b"]);
        assert!(asc.has_more);
    }

    #[test]
    fn test_zero_limit_rejected() {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::new(temp_file.path()).unwrap();

        let result = db.get_page(&page(OrderBy::CreatedAt, SortDirection::Desc, 0, 0));
        assert!(matches!(result, Err(StoreError::InvalidRequest(_))));
    }

    #[test]
    fn test_oversized_bounds_rejected() {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::new(temp_file.path()).unwrap();
        db.upsert_page(&[memo("a", "x", "2024-01-01 00:00:00", &[])])
            .unwrap();

        let huge_limit = page(OrderBy::CreatedAt, SortDirection::Desc, 0, usize::MAX);
        assert!(matches!(
            db.get_page(&huge_limit),
            Err(StoreError::InvalidRequest(_))
        ));
        assert!(matches!(
            db.search_page("x", &huge_limit),
            Err(StoreError::InvalidRequest(_))
        ));

        let huge_offset = page(OrderBy::CreatedAt, SortDirection::Desc, usize::MAX, 10);
        assert!(matches!(
            db.get_page(&huge_offset),
            Err(StoreError::InvalidRequest(_))
        ));

        let past_end = page(OrderBy::CreatedAt, SortDirection::Desc, i64::MAX as usize, 10);
        let empty = db.get_page(&past_end).unwrap();
        assert!(empty.memos.is_empty());
        assert!(!empty.has_more);
    }

    #[test]
    fn test_search_matches_content_and_tags() {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::new(temp_file.path()).unwrap();

        db.upsert_page(&[
            memo("a", "Quarterly PLANNING notes", "2024-01-01 00:00:00", &[]),
            memo("b", "groceries", "2024-01-02 00:00:00", &["Project"]),
            memo("c", "100% done_ish", "2024-01-03 00:00:00", &[]),
        ])
        .unwrap();

        let request = page(OrderBy::CreatedAt, SortDirection::Asc, 0, 10);

        let by_content = db.search_page("planning", &request).unwrap();
        assert_eq!(by_content.memos.len(), 1);
        assert_eq!(by_content.memos[0].slug, "a");

        let by_tag = db.search_page("proj", &request).unwrap();
        assert_eq!(by_tag.memos.len(), 1);
        assert_eq!(by_tag.memos[0].slug, "b");

        // wildcards are literal
        let percent = db.search_page("0%", &request).unwrap();
        assert_eq!(percent.memos.len(), 1);
        assert_eq!(percent.memos[0].slug, "c");
        assert!(db.search_page("_", &request).unwrap().memos.len() == 1);

        let everything = db.search_page("", &request).unwrap();
        assert_eq!(everything.memos.len(), 3);
    }

    #[test]
    fn test_list_tags_counts() {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::new(temp_file.path()).unwrap();

        db.upsert_page(&[
            memo("a", "x", "2024-01-01 00:00:00", &["work", "ideas", "work"]),
            memo("b", "y", "2024-01-01 00:00:00", &["work"]),
        ])
        .unwrap();

        let tags = db.list_tags().unwrap();
        assert_eq!(tags[0].tag, "work");
        assert_eq!(tags[0].memo_count, 2);
        assert_eq!(tags[1].tag, "ideas");
        assert_eq!(tags[1].memo_count, 1);

        let stored = db.get_memo("a").unwrap().unwrap();
        assert_eq!(stored.tags, vec!["work".to_string(), "ideas".to_string()]);
    }

    #[test]
    fn test_sync_metadata_round_trip() {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::new(temp_file.path()).unwrap();

        let metadata = SyncMetadata {
            last_sync_at: Some("2024-05-01T10:00:00+00:00".into()),
            total_memos: 42,
            status: SyncStatus::Failed,
            error_message: Some("token expired".into()),
            last_run_id: Some(RunId("run_01HXYZ".into())),
        };
        db.set_sync_metadata(&metadata).unwrap();

        assert_eq!(db.get_sync_metadata().unwrap(), metadata);
    }

    #[test]
    fn test_clear_all_resets_everything() {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::new(temp_file.path()).unwrap();

        db.upsert_page(&[memo("a", "x", "2024-01-01 00:00:00", &["t"])])
            .unwrap();
        db.set_sync_metadata(&SyncMetadata {
            total_memos: 1,
            status: SyncStatus::Completed,
            ..SyncMetadata::default()
        })
        .unwrap();

        assert_eq!(db.clear_all().unwrap(), 1);
        assert_eq!(db.count_memos().unwrap(), 0);
        assert!(db.list_tags().unwrap().is_empty());
        assert_eq!(db.get_sync_metadata().unwrap(), SyncMetadata::default());
    }

    #[test]
    fn test_writer_lease_excludes_other_connections() {
        let temp_file = NamedTempFile::new().unwrap();
        let first = Database::new(temp_file.path()).unwrap();
        let second = Database::new(temp_file.path()).unwrap();
        let ttl = Duration::from_secs(60);

        first.acquire_writer_lease("run_a", ttl).unwrap();
        first.acquire_writer_lease("run_a", ttl).unwrap();

        match second.acquire_writer_lease("run_b", ttl) {
            Err(StoreError::LeaseHeld { owner, .. }) => assert_eq!(owner, "run_a"),
            other => panic!("expected LeaseHeld, got {:?}", other),
        }
        assert_eq!(second.writer_lease().unwrap().unwrap().owner, "run_a");

        assert!(!second.release_writer_lease("run_b").unwrap());
        assert!(first.release_writer_lease("run_a").unwrap());
        assert!(second.writer_lease().unwrap().is_none());
        second.acquire_writer_lease("run_b", ttl).unwrap();
    }

    #[test]
    fn test_expired_lease_is_taken_over() {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::new(temp_file.path()).unwrap();

        db.acquire_writer_lease("dead", Duration::ZERO).unwrap();
        assert!(db.writer_lease().unwrap().is_none());

        db.acquire_writer_lease("alive", Duration::from_secs(60))
            .unwrap();
        assert_eq!(db.writer_lease().unwrap().unwrap().owner, "alive");
    }

    #[test]
    fn test_metadata_written_only_by_lease_holder() {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::new(temp_file.path()).unwrap();
        let ttl = Duration::from_secs(60);

        let running = SyncMetadata {
            status: SyncStatus::Fetching,
            last_run_id: Some(RunId("run_a".into())),
            ..SyncMetadata::default()
        };
        assert!(matches!(
            db.set_sync_metadata_as("run_a", &running, Some(ttl)),
            Err(StoreError::LeaseLost(_))
        ));
        assert_eq!(db.get_sync_metadata().unwrap().status, SyncStatus::Idle);

        db.acquire_writer_lease("run_a", ttl).unwrap();
        db.set_sync_metadata_as("run_a", &running, Some(ttl))
            .unwrap();
        assert_eq!(db.get_sync_metadata().unwrap(), running);

        let done = SyncMetadata {
            status: SyncStatus::Completed,
            ..running
        };
        db.set_sync_metadata_as("run_a", &done, None).unwrap();
        assert_eq!(db.get_sync_metadata().unwrap().status, SyncStatus::Completed);
        assert!(db.writer_lease().unwrap().is_none());
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }
}
