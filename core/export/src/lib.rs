//! Export formatter for mirrored memos.
//!
//! Rendering is a pure function of the memo slice and an [`ExportConfig`].

pub mod config;
pub mod formatter;

pub use config::{ExportConfig, ExportFormat, UrlMode};
pub use formatter::ExportFormatter;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("invalid date format: {0}")]
    InvalidDateFormat(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Render `memos` with the given configuration
pub fn format_export(
    memos: &[memo_mirror_schemas::Memo],
    config: &ExportConfig,
) -> Result<String, ExportError> {
    ExportFormatter::new().render(memos, config)
}
