use crate::config::{ExportConfig, ExportFormat, UrlMode};
use crate::ExportError;
use chrono::format::{Item, StrftimeItems};
use memo_mirror_schemas::{parse_timestamp, Memo};
use serde::Serialize;
use tracing::debug;

const PREVIEW_CHARS: usize = 30;

/// Token form (`yyyy-MM-dd HH:mm:ss`) to strftime
const DATE_TOKENS: &[(&str, &str)] = &[
    ("yyyy", "%Y"),
    ("MM", "%m"),
    ("dd", "%d"),
    ("HH", "%H"),
    ("mm", "%M"),
    ("ss", "%S"),
];

#[derive(Serialize)]
struct ExportEntry<'a> {
    index: usize,
    slug: &'a str,
    content: &'a str,
    created_at: String,
    updated_at: String,
    tags: &'a [String],
    url: Option<&'a str>,
}

/// Renders memo slices as JSON, Markdown or a fixed-column table
#[derive(Debug, Default, Clone, Copy)]
pub struct ExportFormatter;

impl ExportFormatter {
    pub fn new() -> Self {
        Self
    }

    /// Render `memos` in the configured format
    pub fn render(&self, memos: &[Memo], config: &ExportConfig) -> Result<String, ExportError> {
        let dates = DateRenderer::new(config.date_format())?;

        debug!(
            "Rendering {} memos as {} (minimal: {}, compact: {})",
            memos.len(),
            config.format,
            config.minimal,
            config.compact
        );

        match config.format {
            ExportFormat::Json => self.render_json(memos, &dates, config.compact),
            ExportFormat::Markdown if config.minimal => {
                Ok(self.render_markdown_minimal(memos, &dates, config.url_mode))
            }
            ExportFormat::Markdown => Ok(self.render_markdown(memos, &dates, config.url_mode)),
            ExportFormat::Table => Ok(self.render_table(memos, &dates, config.url_mode)),
        }
    }

    fn render_json(
        &self,
        memos: &[Memo],
        dates: &DateRenderer,
        compact: bool,
    ) -> Result<String, ExportError> {
        let entries: Vec<ExportEntry> = memos
            .iter()
            .enumerate()
            .map(|(i, memo)| ExportEntry {
                index: i + 1,
                slug: &memo.slug,
                content: &memo.content,
                created_at: dates.render(&memo.created_at),
                updated_at: dates.render(&memo.updated_at),
                tags: &memo.tags,
                url: memo.url.as_deref(),
            })
            .collect();

        let output = if compact {
            serde_json::to_string(&entries)?
        } else {
            serde_json::to_string_pretty(&entries)?
        };
        Ok(output)
    }

    fn render_markdown(&self, memos: &[Memo], dates: &DateRenderer, url_mode: UrlMode) -> String {
        let mut output = String::from("# Memos\n\n");

        for (i, memo) in memos.iter().enumerate() {
            if dates.is_set() {
                output.push_str(&format!("## {}. {}\n\n", i + 1, dates.render(&memo.created_at)));
            } else {
                output.push_str(&format!("## {}\n\n", i + 1));
            }

            output.push_str(memo.content.trim());
            output.push('\n');

            match url_mode {
                UrlMode::Full => {
                    if let Some(url) = &memo.url {
                        output.push_str(&format!("**Link**: {}\n", url));
                    }
                }
                UrlMode::Id => output.push_str(&format!("**ID**: {}\n", memo.slug)),
                UrlMode::None => {}
            }

            if !memo.tags.is_empty() {
                output.push_str(&format!("**Tags**: {}\n", memo.tags.join(", ")));
            }

            output.push_str("\n---\n\n");
        }

        output
    }

    /// One line per memo: index, optional date, content, tags, location
    fn render_markdown_minimal(
        &self,
        memos: &[Memo],
        dates: &DateRenderer,
        url_mode: UrlMode,
    ) -> String {
        let mut output = String::new();

        for (i, memo) in memos.iter().enumerate() {
            let mut fields = vec![(i + 1).to_string()];
            if dates.is_set() {
                fields.push(dates.render(&memo.created_at));
            }
            fields.push(single_line(&memo.content));
            if !memo.tags.is_empty() {
                fields.push(
                    memo.tags
                        .iter()
                        .map(|t| format!("#{}", t))
                        .collect::<Vec<_>>()
                        .join(" "),
                );
            }
            if let Some(location) = location(memo, url_mode) {
                fields.push(location);
            }

            output.push_str(&fields.join(" | "));
            output.push('\n');
        }

        output
    }

    fn render_table(&self, memos: &[Memo], dates: &DateRenderer, url_mode: UrlMode) -> String {
        let mut header = vec![
            format!("{:>3}", "No."),
            format!("{:<19}", "Date"),
            format!("{:<33}", "Content"),
        ];
        let with_location = url_mode != UrlMode::None;
        if with_location {
            header.push(format!("{:<20}", "Tags"));
            header.push(
                match url_mode {
                    UrlMode::Id => "ID",
                    _ => "Link",
                }
                .to_string(),
            );
        } else {
            header.push("Tags".to_string());
        }

        let header_line = header.join(" | ");
        let mut output = format!("{}\n{}\n", header_line, "-".repeat(header_line.chars().count()));

        for (i, memo) in memos.iter().enumerate() {
            let date = if dates.is_set() {
                dates.render(&memo.created_at)
            } else {
                // date part of "YYYY-MM-DD HH:MM:SS"
                memo.created_at
                    .split([' ', 'T'])
                    .next()
                    .unwrap_or(&memo.created_at)
                    .to_string()
            };
            let tags = memo.tags.join(", ");

            let mut row = vec![
                format!("{:>3}", i + 1),
                format!("{:<19}", date),
                format!("{:<33}", preview(&memo.content)),
            ];
            if with_location {
                row.push(format!("{:<20}", tags));
                row.push(location(memo, url_mode).unwrap_or_default());
            } else {
                row.push(tags);
            }

            output.push_str(row.join(" | ").trim_end());
            output.push('\n');
        }

        output
    }
}

/// Resolved date pattern; `None` leaves timestamps as stored
struct DateRenderer {
    pattern: Option<String>,
}

impl DateRenderer {
    fn new(raw: Option<&str>) -> Result<Self, ExportError> {
        let Some(raw) = raw else {
            return Ok(Self { pattern: None });
        };

        let pattern = if raw.contains('%') {
            raw.to_string()
        } else {
            DATE_TOKENS
                .iter()
                .fold(raw.to_string(), |acc, (token, strftime)| acc.replace(token, strftime))
        };

        if StrftimeItems::new(&pattern).any(|item| matches!(item, Item::Error)) {
            return Err(ExportError::InvalidDateFormat(raw.to_string()));
        }

        Ok(Self {
            pattern: Some(pattern),
        })
    }

    fn is_set(&self) -> bool {
        self.pattern.is_some()
    }

    /// Unparseable timestamps come back verbatim
    fn render(&self, raw: &str) -> String {
        match (&self.pattern, parse_timestamp(raw)) {
            (Some(pattern), Some(instant)) => instant.format(pattern).to_string(),
            _ => raw.to_string(),
        }
    }
}

fn location(memo: &Memo, url_mode: UrlMode) -> Option<String> {
    match url_mode {
        UrlMode::Full => memo.url.clone(),
        UrlMode::Id => Some(memo.slug.clone()),
        UrlMode::None => None,
    }
}

fn single_line(content: &str) -> String {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn preview(content: &str) -> String {
    let flat = single_line(content);
    if flat.chars().count() > PREVIEW_CHARS {
        let head: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        flat
    }
}
