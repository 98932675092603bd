#![allow(dead_code)]

use async_trait::async_trait;
use memo_mirror_schemas::{Memo, SyncProgress};
use memo_mirror_store::Database;
use memo_mirror_sync::{
    Cursor, QueryService, RemoteError, RemotePage, RemoteSource, SyncOptions, SyncOrchestrator,
};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, Notify};

/// One scripted answer of the fake remote
pub enum Step {
    Page { memos: Vec<Memo>, more: bool },
    Fail(RemoteError),
    /// Answer only after `delay`
    Slow { delay: Duration, memos: Vec<Memo>, more: bool },
    /// Signal `entered`, then wait for `gate` before answering
    Gated { memos: Vec<Memo>, more: bool },
}

pub fn page(memos: Vec<Memo>, more: bool) -> Step {
    Step::Page { memos, more }
}

pub struct ScriptedRemote {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    pub entered: Notify,
    pub gate: Notify,
}

impl ScriptedRemote {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
            entered: Notify::new(),
            gate: Notify::new(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn push(&self, steps: Vec<Step>) {
        self.steps.lock().unwrap().extend(steps);
    }
}

fn answer(cursor: &Cursor, memos: Vec<Memo>, more: bool) -> RemotePage {
    let next = more.then(|| cursor.after(&memos));
    RemotePage { memos, next }
}

#[async_trait]
impl RemoteSource for ScriptedRemote {
    async fn fetch_page(&self, cursor: &Cursor, token: &str) -> Result<RemotePage, RemoteError> {
        assert!(!token.is_empty());
        self.calls.fetch_add(1, Ordering::SeqCst);

        let step = self.steps.lock().unwrap().pop_front();
        match step {
            None => Ok(answer(cursor, vec![], false)),
            Some(Step::Page { memos, more }) => Ok(answer(cursor, memos, more)),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Slow { delay, memos, more }) => {
                tokio::time::sleep(delay).await;
                Ok(answer(cursor, memos, more))
            }
            Some(Step::Gated { memos, more }) => {
                self.entered.notify_one();
                self.gate.notified().await;
                Ok(answer(cursor, memos, more))
            }
        }
    }
}

pub fn memo(i: usize, updated_at: &str) -> Memo {
    Memo {
        slug: format!("memo{:04}", i),
        content: format!("content of memo {}", i),
        created_at: format!("2024-01-01 00:{:02}:{:02}", (i / 60) % 60, i % 60),
        updated_at: updated_at.to_string(),
        tags: if i % 10 == 0 {
            vec!["project".to_string()]
        } else {
            vec![]
        },
        url: Some(format!("https://v.flomoapp.com/mine/?memo_id=memo{:04}", i)),
    }
}

pub fn memos(range: std::ops::Range<usize>) -> Vec<Memo> {
    range.map(|i| memo(i, "2024-02-01 12:00:00")).collect()
}

pub fn fast_options() -> SyncOptions {
    SyncOptions {
        fetch_timeout: Duration::from_secs(2),
        max_attempts: 3,
        retry_backoff: Duration::from_millis(1),
        max_pages: 100,
        lease_ttl: Duration::from_secs(60),
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub db_path: PathBuf,
    pub db: Arc<Database>,
    pub remote: Arc<ScriptedRemote>,
    pub orchestrator: SyncOrchestrator,
    pub query: QueryService,
}

pub fn harness(steps: Vec<Step>, options: SyncOptions) -> Harness {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("memos.db");
    let db = Arc::new(Database::new(&db_path).unwrap());
    let remote = Arc::new(ScriptedRemote::new(steps));
    let orchestrator = SyncOrchestrator::new(db.clone(), remote.clone(), options).unwrap();
    let query = QueryService::new(db.clone());

    Harness {
        dir,
        db_path,
        db,
        remote,
        orchestrator,
        query,
    }
}

/// Everything currently buffered on a progress receiver
pub fn drain(rx: &mut broadcast::Receiver<SyncProgress>) -> Vec<SyncProgress> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
