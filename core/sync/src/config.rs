use crate::orchestrator::SyncOptions;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_API_BASE_URL: &str = "https://flomoapp.com";
pub const DEFAULT_WEB_BASE_URL: &str = "https://v.flomoapp.com";
pub const DEFAULT_SIGN_SALT: &str = "dbbc3dd73364b4084c3a69346e0ce2b2";
pub const DEFAULT_SERVICE_ADDR: &str = "127.0.0.1:21960";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Runtime configuration, read from `MEMO_*` environment variables
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub db_path: PathBuf,
    pub api_base_url: String,
    pub web_base_url: String,
    pub sign_salt: String,
    pub page_limit: usize,
    pub fetch_timeout: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub max_pages: usize,
    /// Writer lease lifetime between heartbeats of a running sync
    pub lease_ttl: Duration,
    pub service_addr: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(std::env::var("HOME").ok()),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            web_base_url: DEFAULT_WEB_BASE_URL.to_string(),
            sign_salt: DEFAULT_SIGN_SALT.to_string(),
            page_limit: 200,
            fetch_timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            max_pages: 10_000,
            lease_ttl: Duration::from_secs(300),
            service_addr: DEFAULT_SERVICE_ADDR.to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self {
            db_path: default_db_path(lookup("HOME")),
            ..Self::default()
        };

        Ok(Self {
            db_path: lookup("MEMO_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            api_base_url: lookup("MEMO_API_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base_url),
            web_base_url: lookup("MEMO_WEB_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.web_base_url),
            sign_salt: lookup("MEMO_SIGN_SALT").unwrap_or(defaults.sign_salt),
            page_limit: parse_number(&lookup, "MEMO_PAGE_LIMIT", defaults.page_limit)?,
            fetch_timeout: Duration::from_secs(parse_number(
                &lookup,
                "MEMO_FETCH_TIMEOUT_SECS",
                defaults.fetch_timeout.as_secs(),
            )?),
            max_attempts: parse_number(&lookup, "MEMO_MAX_ATTEMPTS", defaults.max_attempts)?,
            retry_backoff: Duration::from_millis(parse_number(
                &lookup,
                "MEMO_RETRY_BACKOFF_MS",
                defaults.retry_backoff.as_millis() as u64,
            )?),
            max_pages: parse_number(&lookup, "MEMO_MAX_PAGES", defaults.max_pages)?,
            lease_ttl: Duration::from_secs(parse_number(
                &lookup,
                "MEMO_LEASE_TTL_SECS",
                defaults.lease_ttl.as_secs(),
            )?),
            service_addr: lookup("MEMO_SERVICE_ADDR").unwrap_or(defaults.service_addr),
        })
    }

    /// Orchestrator knobs derived from this configuration
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            fetch_timeout: self.fetch_timeout,
            max_attempts: self.max_attempts,
            retry_backoff: self.retry_backoff,
            max_pages: self.max_pages,
            lease_ttl: self.lease_ttl,
        }
    }

    /// Create the parent directory of the database file if needed
    pub fn ensure_db_dir(&self) -> std::io::Result<()> {
        match self.db_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
            _ => Ok(()),
        }
    }
}

fn default_db_path(home: Option<String>) -> PathBuf {
    match home {
        Some(home) => PathBuf::from(home).join(".local/share/memo-mirror/memos.db"),
        None => PathBuf::from("memos.db"),
    }
}

fn parse_number<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialOrd + Default,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) if value > T::default() => Ok(value),
            _ => Err(ConfigError::Invalid { key, value: raw }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::from_lookup(lookup(&[("HOME", "/home/me")])).unwrap();
        assert_eq!(
            config.db_path,
            PathBuf::from("/home/me/.local/share/memo-mirror/memos.db")
        );
        assert_eq!(config.page_limit, 200);
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_backoff, Duration::from_millis(500));
        assert_eq!(config.lease_ttl, Duration::from_secs(300));
        assert_eq!(config.service_addr, "127.0.0.1:21960");

        let homeless = SyncConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(homeless.db_path, PathBuf::from("memos.db"));
    }

    #[test]
    fn test_overrides() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("MEMO_DB_PATH", "/tmp/x.db"),
            ("MEMO_API_BASE_URL", "http://localhost:9000/"),
            ("MEMO_PAGE_LIMIT", "50"),
            ("MEMO_MAX_ATTEMPTS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.api_base_url, "http://localhost:9000");
        assert_eq!(config.page_limit, 50);
        assert_eq!(config.sync_options().max_attempts, 5);
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        let bad = SyncConfig::from_lookup(lookup(&[("MEMO_PAGE_LIMIT", "lots")]));
        assert!(matches!(
            bad,
            Err(ConfigError::Invalid {
                key: "MEMO_PAGE_LIMIT",
                ..
            })
        ));

        let zero = SyncConfig::from_lookup(lookup(&[("MEMO_MAX_ATTEMPTS", "0")]));
        assert!(zero.is_err());
    }
}
