use crate::config::SyncConfig;
use crate::error::RemoteError;
use crate::remote::{Cursor, RemotePage, RemoteSource};
use async_trait::async_trait;
use chrono::FixedOffset;
use memo_mirror_schemas::Memo;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

const UPDATED_PATH: &str = "/api/v1/memo/updated/";

/// Zone the client declares with `tz`; the remote writes naive timestamps in it
const REMOTE_TZ_HOURS: i32 = 8;

/// Line width handed to the HTML renderer, wide enough to never wrap a memo line
const TEXT_WIDTH: usize = 10_000;

/// Produces the `sign` parameter for a request
pub trait RequestSigner: Send + Sync {
    fn sign(&self, params: &BTreeMap<String, String>) -> String;
}

/// MD5 hex digest of the sorted `k=v&...` string followed by a secret salt
pub struct SaltedDigestSigner {
    salt: String,
}

impl SaltedDigestSigner {
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }
}

impl RequestSigner for SaltedDigestSigner {
    fn sign(&self, params: &BTreeMap<String, String>) -> String {
        let canonical = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        format!("{:x}", md5::compute(format!("{}{}", canonical, self.salt)))
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<Vec<ApiMemo>>,
}

#[derive(Debug, Deserialize)]
struct ApiMemo {
    slug: String,
    content: String,
    created_at: String,
    updated_at: String,
    #[serde(default)]
    tags: Vec<String>,
}

/// HTTP client for the flomo "updated memos" endpoint
pub struct FlomoClient {
    http: reqwest::Client,
    api_base_url: String,
    web_base_url: String,
    page_limit: usize,
    signer: Arc<dyn RequestSigner>,
    remote_offset: FixedOffset,
}

impl FlomoClient {
    pub fn new(config: &SyncConfig) -> Result<Self, RemoteError> {
        let signer = Arc::new(SaltedDigestSigner::new(config.sign_salt.clone()));
        Self::with_signer(config, signer)
    }

    pub fn with_signer(
        config: &SyncConfig,
        signer: Arc<dyn RequestSigner>,
    ) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .map_err(|e| RemoteError::Client(e.to_string()))?;
        let remote_offset = FixedOffset::east_opt(REMOTE_TZ_HOURS * 3600).ok_or_else(|| {
            RemoteError::Client(format!("invalid remote offset {}h", REMOTE_TZ_HOURS))
        })?;

        Ok(Self {
            http,
            api_base_url: config.api_base_url.clone(),
            web_base_url: config.web_base_url.clone(),
            page_limit: config.page_limit,
            signer,
            remote_offset,
        })
    }

    /// Query parameters for `cursor`, including the signature
    fn params(&self, cursor: &Cursor, timestamp: i64) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("limit".to_string(), self.page_limit.to_string());
        params.insert("tz".to_string(), format!("{}:0", REMOTE_TZ_HOURS));
        params.insert("timestamp".to_string(), timestamp.to_string());
        params.insert("api_key".to_string(), "flomo_web".to_string());
        params.insert("app_version".to_string(), "5.25.64".to_string());
        params.insert("platform".to_string(), "mac".to_string());
        params.insert("webp".to_string(), "1".to_string());

        if let Some(slug) = &cursor.latest_slug {
            params.insert("latest_slug".to_string(), slug.clone());
        }
        if let Some(updated_at) = cursor.latest_updated_at {
            params.insert("latest_updated_at".to_string(), updated_at.to_string());
        }

        let sign = self.signer.sign(&params);
        params.insert("sign".to_string(), sign);
        params
    }

    fn memo_url(&self, slug: &str) -> String {
        format!("{}/mine/?memo_id={}", self.web_base_url, slug)
    }

    fn into_memo(&self, raw: ApiMemo) -> Memo {
        Memo {
            url: Some(self.memo_url(&raw.slug)),
            content: html_to_text(&raw.content),
            slug: raw.slug,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            tags: raw.tags,
        }
    }
}

#[async_trait]
impl RemoteSource for FlomoClient {
    async fn fetch_page(&self, cursor: &Cursor, token: &str) -> Result<RemotePage, RemoteError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(RemoteError::Auth("empty token".to_string()));
        }

        let params = self.params(cursor, chrono::Utc::now().timestamp());
        let url = format!("{}{}", self.api_base_url, UPDATED_PATH);
        debug!("Fetching memos at offset {} from {}", cursor.offset, url);

        let response = self
            .http
            .get(&url)
            .header(AUTHORIZATION, bearer(token))
            .query(&params)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RemoteError::Auth(format!("HTTP {}", status)));
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RemoteError::transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(RemoteError::Rejected {
                code: i64::from(status.as_u16()),
                message: format!("HTTP {}", status),
            });
        }

        let body = response.text().await.map_err(classify_transport)?;
        let api: ApiResponse =
            serde_json::from_str(&body).map_err(|e| RemoteError::Parse(e.to_string()))?;

        if api.code != 0 {
            warn!("Remote rejected request with code {}", api.code);
            return Err(RemoteError::Rejected {
                code: api.code,
                message: api.message.unwrap_or_default(),
            });
        }

        let memos: Vec<Memo> = api
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|raw| self.into_memo(raw))
            .collect();

        // a short page is the last one
        let next = if memos.len() >= self.page_limit {
            Some(cursor.after_in(&memos, &self.remote_offset))
        } else {
            None
        };

        debug!("Fetched {} memos (more: {})", memos.len(), next.is_some());
        Ok(RemotePage { memos, next })
    }
}

fn bearer(token: &str) -> String {
    if token.starts_with("Bearer ") {
        token.to_string()
    } else {
        format!("Bearer {}", token)
    }
}

fn classify_transport(err: reqwest::Error) -> RemoteError {
    if err.is_decode() {
        return RemoteError::Parse(err.to_string());
    }
    RemoteError::Network {
        transient: err.is_timeout() || err.is_connect(),
        message: err.to_string(),
    }
}

/// Plain text rendering of a memo body
pub fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), TEXT_WIDTH)
        .trim()
        .to_string()
}
