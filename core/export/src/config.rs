use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportFormat {
    #[serde(rename = "json")]
    Json,
    #[default]
    #[serde(rename = "markdown")]
    Markdown,
    #[serde(rename = "table")]
    Table,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "markdown",
            ExportFormat::Table => "table",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            "table" => Ok(ExportFormat::Table),
            other => Err(format!("unknown export format: {}", other)),
        }
    }
}

/// How a memo's location is shown in Markdown and table output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UrlMode {
    #[default]
    #[serde(rename = "full")]
    Full,
    #[serde(rename = "id")]
    Id,
    #[serde(rename = "none")]
    None,
}

impl FromStr for UrlMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "full" => Ok(UrlMode::Full),
            "id" => Ok(UrlMode::Id),
            "none" => Ok(UrlMode::None),
            other => Err(format!("unknown url mode: {}", other)),
        }
    }
}

/// Export options.
///
/// `minimal` only affects Markdown, `compact` only affects JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(rename = "dateFormat", default)]
    pub date_format: Option<String>,
    #[serde(rename = "urlMode", default)]
    pub url_mode: UrlMode,
    #[serde(default)]
    pub minimal: bool,
    #[serde(default)]
    pub compact: bool,
}

impl ExportConfig {
    pub fn new(format: ExportFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    /// The date format, with an empty string treated as absent
    pub fn date_format(&self) -> Option<&str> {
        self.date_format
            .as_deref()
            .map(str::trim)
            .filter(|fmt| !fmt.is_empty())
    }
}
