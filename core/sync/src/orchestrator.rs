//! Sync state machine.
//!
//! One background task per run drives `fetch -> upsert -> progress` page by
//! page. The orchestrator is the only writer of the store while a run is
//! active: the phase lock excludes a second run in this process, the store's
//! writer lease excludes one in another process. Readers go through
//! [`crate::QueryService`] at any time.

use crate::error::{RemoteError, SyncError};
use crate::remote::{Cursor, RemotePage, RemoteSource};
use chrono::Utc;
use memo_mirror_schemas::{
    generate_run_id, ProgressStatus, RunId, SyncMetadata, SyncProgress, SyncStatus,
};
use memo_mirror_store::{Database, StoreError, UpsertSummary};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const PROGRESS_CAPACITY: usize = 64;
const INTERRUPTED_MESSAGE: &str = "sync interrupted";

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Upper bound for one page fetch
    pub fetch_timeout: Duration,
    /// Attempts per page, including the first
    pub max_attempts: u32,
    /// First retry delay; doubles on each further attempt
    pub retry_backoff: Duration,
    pub max_pages: usize,
    /// Writer lease lifetime; renewed before every page
    pub lease_ttl: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            max_pages: 10_000,
            lease_ttl: Duration::from_secs(300),
        }
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub run_id: RunId,
    pub status: SyncStatus,
    pub pages: usize,
    pub memos_synced: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub error_message: Option<String>,
}

/// Handle to a run started with [`SyncOrchestrator::start`].
///
/// Dropping it leaves the run going in the background.
pub struct SyncHandle {
    run_id: RunId,
    task: JoinHandle<SyncReport>,
}

impl SyncHandle {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Wait for the run to reach a terminal state
    pub async fn wait(self) -> Result<SyncReport, SyncError> {
        self.task.await.map_err(|e| SyncError::Task(e.to_string()))
    }
}

#[derive(Debug, Default)]
struct RunCounters {
    pages: usize,
    current: usize,
    total: usize,
    written: UpsertSummary,
}

struct Inner {
    db: Arc<Database>,
    remote: Arc<dyn RemoteSource>,
    options: SyncOptions,
    phase: Mutex<SyncStatus>,
    cancel: AtomicBool,
    progress: broadcast::Sender<SyncProgress>,
}

/// Owns the sync state machine; cheap to clone
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    /// Build an orchestrator over `db`.
    ///
    /// A persisted running status left behind by a dead process is rewritten
    /// to `Failed` before anything else happens. A status backed by a live
    /// writer lease belongs to another process and is left alone.
    pub fn new(
        db: Arc<Database>,
        remote: Arc<dyn RemoteSource>,
        options: SyncOptions,
    ) -> Result<Self, SyncError> {
        let mut metadata = db.get_sync_metadata()?;
        if metadata.status.is_running() {
            Self::recover(&db, &mut metadata)?;
        }

        let (progress, _) = broadcast::channel(PROGRESS_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                db,
                remote,
                options: SyncOptions {
                    max_attempts: options.max_attempts.max(1),
                    ..options
                },
                phase: Mutex::new(SyncStatus::Idle),
                cancel: AtomicBool::new(false),
                progress,
            }),
        })
    }

    fn recover(db: &Database, metadata: &mut SyncMetadata) -> Result<(), SyncError> {
        if let Some(lease) = db.writer_lease()? {
            info!(
                "Sync {} is running in another process (status: {})",
                lease.owner, metadata.status
            );
            return Ok(());
        }

        warn!(
            "Previous sync {} did not finish (status: {}), marking it failed",
            metadata
                .last_run_id
                .as_ref()
                .map(|id| id.0.as_str())
                .unwrap_or("<unknown>"),
            metadata.status
        );
        metadata.status = SyncStatus::Failed;
        metadata.error_message = Some(INTERRUPTED_MESSAGE.to_string());
        metadata.total_memos = db.count_memos()? as u64;
        db.set_sync_metadata(metadata)?;
        Ok(())
    }

    /// Start a run in the background. Must be called within a tokio runtime.
    pub fn start(&self, token: &str) -> Result<SyncHandle, SyncError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(SyncError::InvalidToken);
        }

        let run_id = generate_run_id();
        {
            let mut phase = self.inner.lock_phase();
            if phase.is_running() {
                return Err(SyncError::AlreadyRunning);
            }
            self.inner.acquire_lease(&run_id)?;
            *phase = SyncStatus::Starting;
            self.inner.cancel.store(false, Ordering::SeqCst);
        }

        info!("[{}] Sync accepted", run_id);

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(inner.run(run_id.clone(), token.to_string()));

        Ok(SyncHandle { run_id, task })
    }

    /// Ask the running sync to stop at the next page boundary.
    ///
    /// Returns `false` when nothing is running.
    pub fn cancel(&self) -> bool {
        let phase = self.inner.lock_phase();
        if !phase.is_running() {
            debug!("Cancel requested with no sync running");
            return false;
        }
        self.inner.cancel.store(true, Ordering::SeqCst);
        info!("Cancellation requested (phase: {})", *phase);
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncProgress> {
        self.inner.progress.subscribe()
    }

    /// In-memory phase of the state machine
    pub fn phase(&self) -> SyncStatus {
        *self.inner.lock_phase()
    }

    pub fn is_running(&self) -> bool {
        self.phase().is_running()
    }

    /// Persisted sync metadata
    pub fn status(&self) -> Result<SyncMetadata, SyncError> {
        Ok(self.inner.db.get_sync_metadata()?)
    }

    /// Remove every memo and reset the metadata; refused while a run is
    /// active here or in another process
    pub fn clear_all(&self) -> Result<usize, SyncError> {
        let phase = self.inner.lock_phase();
        if phase.is_running() {
            return Err(SyncError::AlreadyRunning);
        }

        let writer = generate_run_id();
        self.inner.acquire_lease(&writer)?;
        let removed = self.inner.db.clear_all();
        self.inner.release_lease(&writer);
        drop(phase);

        Ok(removed?)
    }
}

impl Inner {
    fn lock_phase(&self) -> MutexGuard<'_, SyncStatus> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, run_id: &RunId, next: SyncStatus) {
        let mut phase = self.lock_phase();
        if !phase.can_transition_to(next) {
            warn!("[{}] Unexpected transition {} -> {}", run_id, *phase, next);
        }
        *phase = next;
    }

    fn acquire_lease(&self, owner: &RunId) -> Result<(), SyncError> {
        self.db
            .acquire_writer_lease(&owner.0, self.options.lease_ttl)
            .map_err(|err| match err {
                StoreError::LeaseHeld { owner, .. } => SyncError::HeldElsewhere { owner },
                other => SyncError::Storage(other),
            })
    }

    fn release_lease(&self, owner: &RunId) {
        if let Err(err) = self.db.release_writer_lease(&owner.0) {
            warn!("[{}] Could not release writer lease: {}", owner, err);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    async fn run(self: Arc<Self>, run_id: RunId, token: String) -> SyncReport {
        let mut counters = RunCounters::default();
        let outcome = self.drive(&run_id, &token, &mut counters).await;
        self.finish(run_id, outcome, counters).await
    }

    async fn drive(
        &self,
        run_id: &RunId,
        token: &str,
        counters: &mut RunCounters,
    ) -> Result<(), SyncError> {
        self.record(run_id, SyncStatus::Starting).await?;

        let mut cursor = Cursor::start();
        loop {
            if counters.pages >= self.options.max_pages {
                return Err(SyncError::PageLimitExceeded(self.options.max_pages));
            }

            self.set_phase(run_id, SyncStatus::Fetching);
            self.record(run_id, SyncStatus::Fetching).await?;

            let page = self.fetch_with_retry(run_id, &cursor, token).await?;
            if self.is_cancelled() {
                info!(
                    "[{}] Cancelled with page at offset {} in flight, discarding it",
                    run_id, cursor.offset
                );
                return Err(SyncError::Cancelled);
            }

            let RemotePage { memos, next } = page;
            let page_len = memos.len();

            self.set_phase(run_id, SyncStatus::Upserting);
            self.record(run_id, SyncStatus::Upserting).await?;

            let summary = self.blocking(move |db| db.upsert_page(&memos)).await?;

            counters.pages += 1;
            counters.current += page_len;
            counters.written.inserted += summary.inserted;
            counters.written.updated += summary.updated;
            counters.written.skipped += summary.skipped;
            // best guess: one more page of the same size while the remote has more
            counters.total = match next {
                Some(_) => counters.current + page_len,
                None => counters.current,
            };

            info!(
                "[{}] Page {} applied: {} memos at offset {} (inserted: {}, updated: {}, skipped: {})",
                run_id,
                counters.pages,
                page_len,
                cursor.offset,
                summary.inserted,
                summary.updated,
                summary.skipped
            );

            self.emit(SyncProgress {
                run_id: run_id.clone(),
                total: counters.total,
                current: counters.current,
                status: ProgressStatus::Syncing,
                message: format!("Synced {} memos...", counters.current),
            });

            match next {
                Some(next) => cursor = next,
                None => return Ok(()),
            }

            if self.is_cancelled() {
                info!("[{}] Cancelled at page boundary", run_id);
                return Err(SyncError::Cancelled);
            }
        }
    }

    /// Fetch one page, retrying transient failures with exponential backoff
    async fn fetch_with_retry(
        &self,
        run_id: &RunId,
        cursor: &Cursor,
        token: &str,
    ) -> Result<RemotePage, SyncError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let result = match tokio::time::timeout(
                self.options.fetch_timeout,
                self.remote.fetch_page(cursor, token),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(RemoteError::transient(format!(
                    "fetch timed out after {:?}",
                    self.options.fetch_timeout
                ))),
            };

            let err = match result {
                Ok(page) => return Ok(page),
                Err(err) => err,
            };

            if !err.is_transient() {
                error!("[{}] Fatal remote error: {}", run_id, err);
                return Err(SyncError::Remote(err));
            }
            if attempt >= self.options.max_attempts {
                error!(
                    "[{}] Giving up on offset {} after {} attempts: {}",
                    run_id, cursor.offset, attempt, err
                );
                return Err(SyncError::RetriesExhausted {
                    attempts: attempt,
                    source: err,
                });
            }

            let delay = self
                .options
                .retry_backoff
                .saturating_mul(2u32.saturating_pow(attempt - 1));
            warn!(
                "[{}] Attempt {} at offset {} failed ({}), retrying in {:?}",
                run_id, attempt, cursor.offset, err, delay
            );
            tokio::time::sleep(delay).await;

            if self.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
        }
    }

    async fn finish(
        &self,
        run_id: RunId,
        outcome: Result<(), SyncError>,
        counters: RunCounters,
    ) -> SyncReport {
        let (status, progress_status, error_message, message) = match &outcome {
            Ok(()) => (
                SyncStatus::Completed,
                ProgressStatus::Completed,
                None,
                format!("Sync completed: {} memos", counters.current),
            ),
            Err(SyncError::Cancelled) => (
                SyncStatus::Cancelled,
                ProgressStatus::Cancelled,
                None,
                format!("Sync cancelled after {} memos", counters.current),
            ),
            Err(err) => (
                SyncStatus::Failed,
                ProgressStatus::Failed,
                Some(err.to_string()),
                format!("Sync failed: {}", err),
            ),
        };

        // still in a running phase here: no other run may start until the
        // final write has landed
        let persisted = self
            .record_terminal(&run_id, status, error_message.clone())
            .await;
        if let Err(err) = persisted {
            error!("[{}] Could not persist terminal status {}: {}", run_id, status, err);
            let owner = run_id.clone();
            if let Err(err) = self
                .blocking(move |db| db.release_writer_lease(&owner.0))
                .await
            {
                warn!("[{}] Could not release writer lease: {}", run_id, err);
            }
        }

        self.emit(SyncProgress {
            run_id: run_id.clone(),
            total: counters.current,
            current: counters.current,
            status: progress_status,
            message,
        });

        // terminal and idle in one step: `start` sees this run or none
        let previous = std::mem::replace(&mut *self.lock_phase(), SyncStatus::Idle);
        if !previous.can_transition_to(status) {
            warn!("[{}] Unexpected transition {} -> {}", run_id, previous, status);
        }

        match status {
            SyncStatus::Failed => error!(
                "[{}] Sync failed after {} pages: {}",
                run_id,
                counters.pages,
                error_message.as_deref().unwrap_or_default()
            ),
            _ => info!(
                "[{}] Sync {} after {} pages ({} memos)",
                run_id, status, counters.pages, counters.current
            ),
        }

        SyncReport {
            run_id,
            status,
            pages: counters.pages,
            memos_synced: counters.current,
            inserted: counters.written.inserted,
            updated: counters.written.updated,
            skipped: counters.written.skipped,
            error_message,
        }
    }

    /// Persist a non-terminal status with a fresh row count, renewing the
    /// writer lease
    async fn record(&self, run_id: &RunId, status: SyncStatus) -> Result<(), SyncError> {
        let run_id = run_id.clone();
        let ttl = self.options.lease_ttl;
        self.blocking(move |db| {
            let mut metadata = db.get_sync_metadata()?;
            metadata.status = status;
            metadata.total_memos = db.count_memos()? as u64;
            metadata.error_message = None;
            metadata.last_run_id = Some(run_id.clone());
            db.set_sync_metadata_as(&run_id.0, &metadata, Some(ttl))
        })
        .await
    }

    /// Persist the final status and give up the writer lease
    async fn record_terminal(
        &self,
        run_id: &RunId,
        status: SyncStatus,
        error_message: Option<String>,
    ) -> Result<(), SyncError> {
        let run_id = run_id.clone();
        self.blocking(move |db| {
            let mut metadata = db.get_sync_metadata()?;
            metadata.status = status;
            metadata.total_memos = db.count_memos()? as u64;
            metadata.error_message = error_message;
            metadata.last_run_id = Some(run_id.clone());
            if status == SyncStatus::Completed {
                metadata.last_sync_at = Some(Utc::now().to_rfc3339());
            }
            db.set_sync_metadata_as(&run_id.0, &metadata, None)
        })
        .await
    }

    /// Run a store operation on the blocking pool
    async fn blocking<T, F>(&self, op: F) -> Result<T, SyncError>
    where
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let result = tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| SyncError::Task(e.to_string()))?;
        Ok(result?)
    }

    fn emit(&self, progress: SyncProgress) {
        // no subscribers is fine
        if self.progress.send(progress).is_err() {
            debug!("No progress subscribers");
        }
    }
}
