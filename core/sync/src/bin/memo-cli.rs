//! Memo Mirror command line client
//!
//! Usage:
//!   memo-cli sync --token <token>
//!   memo-cli list --order-by updated_at --dir asc --limit 20
//!   memo-cli search <query>
//!   memo-cli export --format markdown --date-format yyyy-MM-dd --output memos.md
//!
//! Logs go to stderr; command output goes to stdout.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use memo_mirror_export::{format_export, ExportConfig, ExportFormat, UrlMode};
use memo_mirror_schemas::{MemoPage, OrderBy, SortDirection, SyncStatus};
use memo_mirror_sync::{open_database, FlomoClient, QueryService, SyncConfig, SyncOrchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "memo-cli")]
#[command(about = "Mirror flomo memos into a local store and browse them offline")]
struct Cli {
    /// Path to SQLite database file (overrides MEMO_DB_PATH)
    #[arg(long, short, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct Paging {
    #[arg(long, default_value = "created_at")]
    order_by: OrderBy,

    #[arg(long, default_value = "desc")]
    dir: SortDirection,

    #[arg(long, default_value_t = 0)]
    offset: usize,

    #[arg(long, default_value_t = 20)]
    limit: usize,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pull every memo from the remote service (Ctrl-C cancels)
    Sync {
        #[arg(long, env = "MEMO_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// Show the persisted sync status
    Status,
    /// List one page of memos
    List {
        #[command(flatten)]
        paging: Paging,
    },
    /// Search content and tags
    Search {
        query: String,
        #[command(flatten)]
        paging: Paging,
    },
    /// List tags with memo counts
    Tags,
    /// Delete every local memo and reset the sync status
    Clear {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
    /// Export stored memos
    Export {
        #[arg(long, default_value = "markdown")]
        format: ExportFormat,

        /// strftime (`%Y-%m-%d`) or token form (`yyyy-MM-dd HH:mm`)
        #[arg(long)]
        date_format: Option<String>,

        #[arg(long, default_value = "full")]
        url_mode: UrlMode,

        /// One line per memo (markdown)
        #[arg(long)]
        minimal: bool,

        /// Minified output (json)
        #[arg(long)]
        compact: bool,

        /// Only export memos matching this search
        #[arg(long)]
        query: Option<String>,

        /// Write to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut config = SyncConfig::from_env()?;
    if let Some(path) = cli.db_path {
        config.db_path = path;
    }
    info!("Database: {}", config.db_path.display());

    let db = open_database(&config)
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    let query = QueryService::new(Arc::clone(&db));

    match cli.command {
        Command::Sync { token } => {
            let remote = Arc::new(FlomoClient::new(&config)?);
            let orchestrator = SyncOrchestrator::new(db, remote, config.sync_options())?;
            run_sync(&orchestrator, &token).await?;
        }
        Command::Status => {
            let metadata = db.get_sync_metadata()?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }
        Command::List { paging } => {
            let page = query.get_page(paging.order_by, paging.dir, paging.offset, paging.limit)?;
            print_page(&page, paging.offset);
        }
        Command::Search { query: text, paging } => {
            let page = query.search_page(
                &text,
                paging.order_by,
                paging.dir,
                paging.offset,
                paging.limit,
            )?;
            print_page(&page, paging.offset);
        }
        Command::Tags => {
            for tag in query.tags()? {
                println!("{:>5}  {}", tag.memo_count, tag.tag);
            }
        }
        Command::Clear { yes } => {
            if !yes {
                bail!("refusing to clear the local store without --yes");
            }
            let remote = Arc::new(FlomoClient::new(&config)?);
            let orchestrator = SyncOrchestrator::new(db, remote, config.sync_options())?;
            let removed = orchestrator.clear_all()?;
            println!("Removed {} memos", removed);
        }
        Command::Export {
            format,
            date_format,
            url_mode,
            minimal,
            compact,
            query: filter,
            output,
        } => {
            let memos = match filter {
                Some(text) => query.collect_matching(&text, OrderBy::CreatedAt, SortDirection::Desc)?,
                None => query.collect_all(OrderBy::CreatedAt, SortDirection::Desc)?,
            };
            let export_config = ExportConfig {
                format,
                date_format,
                url_mode,
                minimal,
                compact,
            };
            let text = format_export(&memos, &export_config)?;

            match output {
                Some(path) => {
                    std::fs::write(&path, text)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("Exported {} memos to {}", memos.len(), path.display());
                }
                None => print!("{}", text),
            }
        }
    }

    Ok(())
}

async fn run_sync(orchestrator: &SyncOrchestrator, token: &str) -> Result<()> {
    let mut progress = orchestrator.subscribe();
    let handle = orchestrator.start(token)?;
    println!("Sync {} started", handle.run_id());

    let mut cancel_requested = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                cancel_requested = true;
                if orchestrator.cancel() {
                    eprintln!("Cancelling at the next page boundary...");
                }
            }
            event = progress.recv() => match event {
                Ok(event) => {
                    println!("[{}] {}/{} {}", event.status.as_str(), event.current, event.total, event.message);
                    if event.status.is_terminal() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} progress events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    }

    let report = handle.wait().await?;
    println!(
        "Pages: {}  memos: {}  inserted: {}  updated: {}  skipped: {}",
        report.pages, report.memos_synced, report.inserted, report.updated, report.skipped
    );

    if report.status == SyncStatus::Failed {
        bail!(
            "sync failed: {}",
            report.error_message.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(())
}

fn print_page(page: &MemoPage, offset: usize) {
    for (i, memo) in page.memos.iter().enumerate() {
        let first_line = memo.content.lines().next().unwrap_or("");
        println!("{:>4}. {}  {}  {}", offset + i + 1, memo.created_at, memo.slug, first_line);
        if !memo.tags.is_empty() {
            println!("      #{}", memo.tags.join(" #"));
        }
    }
    if page.has_more {
        println!("(more: --offset {})", offset + page.memos.len());
    }
}
