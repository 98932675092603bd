use crate::error::SyncError;
use crate::orchestrator::SyncOrchestrator;
use crate::query::QueryService;
use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use memo_mirror_export::{format_export, ExportConfig, ExportError};
use memo_mirror_schemas::{Memo, OrderBy, SortDirection, SyncMetadata, SyncProgress, SyncStatus};
use memo_mirror_store::StoreError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const DEFAULT_PAGE_LIMIT: usize = 50;

#[derive(Clone)]
pub struct AppState {
    orchestrator: SyncOrchestrator,
    query: QueryService,
    latest_progress: Arc<Mutex<Option<SyncProgress>>>,
}

impl AppState {
    /// Must be called within a tokio runtime: spawns the progress tracker
    pub fn new(orchestrator: SyncOrchestrator, query: QueryService) -> Self {
        let latest_progress = Arc::new(Mutex::new(None));
        let mut progress = orchestrator.subscribe();
        let latest = Arc::clone(&latest_progress);

        tokio::spawn(async move {
            loop {
                match progress.recv().await {
                    Ok(event) => *latest.lock().await = Some(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Progress tracker lagged, skipped {} events", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Self {
            orchestrator,
            query,
            latest_progress,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/sync/start", post(start_sync))
        .route("/sync/cancel", post(cancel_sync))
        .route("/sync/status", get(sync_status))
        .route("/sync/progress", get(sync_progress))
        .route("/memos", get(list_memos).delete(clear_memos))
        .route("/memos/search", get(search_memos))
        .route("/tags", get(list_tags))
        .route("/export", post(export_memos))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "memo-mirror",
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[derive(Debug, Deserialize)]
struct StartSyncRequest {
    token: String,
}

async fn start_sync(
    State(state): State<AppState>,
    Json(req): Json<StartSyncRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let handle = state.orchestrator.start(&req.token).map_err(sync_error)?;
    info!("Started sync {}", handle.run_id());

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "run_id": handle.run_id() })),
    ))
}

async fn cancel_sync(State(state): State<AppState>) -> impl IntoResponse {
    let cancelled = state.orchestrator.cancel();
    Json(serde_json::json!({ "cancelled": cancelled }))
}

#[derive(Debug, Serialize)]
struct SyncStatusResponse {
    #[serde(flatten)]
    metadata: SyncMetadata,
    phase: SyncStatus,
}

async fn sync_status(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let orchestrator = state.orchestrator.clone();
    let metadata = blocking(move || orchestrator.status().map_err(sync_error)).await?;
    Ok(Json(SyncStatusResponse {
        metadata,
        phase: state.orchestrator.phase(),
    }))
}

async fn sync_progress(State(state): State<AppState>) -> impl IntoResponse {
    let latest = state.latest_progress.lock().await.clone();
    Json(latest)
}

#[derive(Debug, Deserialize)]
struct PageParams {
    order_by: Option<OrderBy>,
    dir: Option<SortDirection>,
    offset: Option<usize>,
    limit: Option<usize>,
}

async fn list_memos(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let query = state.query.clone();
    let page = blocking(move || {
        query
            .get_page(
                params.order_by.unwrap_or_default(),
                params.dir.unwrap_or_default(),
                params.offset.unwrap_or(0),
                params.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
            )
            .map_err(store_error)
    })
    .await?;

    Ok(Json(page))
}

// serde(flatten) breaks numeric query fields, hence the repetition
#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
    order_by: Option<OrderBy>,
    dir: Option<SortDirection>,
    offset: Option<usize>,
    limit: Option<usize>,
}

async fn search_memos(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let query = state.query.clone();
    let page = blocking(move || {
        query
            .search_page(
                params.q.as_deref().unwrap_or(""),
                params.order_by.unwrap_or_default(),
                params.dir.unwrap_or_default(),
                params.offset.unwrap_or(0),
                params.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
            )
            .map_err(store_error)
    })
    .await?;

    Ok(Json(page))
}

async fn list_tags(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let query = state.query.clone();
    let tags = blocking(move || query.tags().map_err(store_error)).await?;
    Ok(Json(tags))
}

async fn clear_memos(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let orchestrator = state.orchestrator.clone();
    let removed = blocking(move || orchestrator.clear_all().map_err(sync_error)).await?;
    info!("Cleared local store ({} memos)", removed);
    Ok(Json(serde_json::json!({ "removed": removed })))
}

#[derive(Debug, Deserialize)]
struct ExportRequest {
    /// Memos to render; the whole store when absent
    #[serde(default)]
    memos: Option<Vec<Memo>>,
    #[serde(default)]
    config: ExportConfig,
}

async fn export_memos(
    State(state): State<AppState>,
    Json(req): Json<ExportRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let memos = match req.memos {
        Some(memos) => memos,
        None => {
            let query = state.query.clone();
            blocking(move || {
                query
                    .collect_all(OrderBy::CreatedAt, SortDirection::Desc)
                    .map_err(store_error)
            })
            .await?
        }
    };

    let text = format_export(&memos, &req.config).map_err(|e| {
        let status = match e {
            ExportError::InvalidDateFormat(_) => StatusCode::BAD_REQUEST,
            ExportError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!("Export failed: {}", e);
        (status, e.to_string())
    })?;

    Ok(text)
}

/// Run a store call on the blocking pool, off the async workers
async fn blocking<T, F>(op: F) -> Result<T, (StatusCode, String)>
where
    F: FnOnce() -> Result<T, (StatusCode, String)> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op).await.map_err(|e| {
        error!("Store task failed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?
}

fn sync_error(err: SyncError) -> (StatusCode, String) {
    let status = match err {
        SyncError::AlreadyRunning | SyncError::HeldElsewhere { .. } => StatusCode::CONFLICT,
        SyncError::InvalidToken => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("Sync request failed: {}", err);
    } else {
        warn!("Sync request rejected: {}", err);
    }
    (status, err.to_string())
}

fn store_error(err: StoreError) -> (StatusCode, String) {
    let status = match err {
        StoreError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error!("Store query failed: {}", err);
    (status, err.to_string())
}
