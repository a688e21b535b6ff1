//! Review source contracts, source implementations, and the record normalizer.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arv_core::{ContinuationToken, RawReviewRecord, ReviewPage};
use arv_storage::{FetchError, HttpFetcher, RetryDisposition};
use async_trait::async_trait;
use reqwest::Url;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

mod normalize;

pub use normalize::{
    load_raw_table, normalize, FormatError, RawTableLoad, DATE_FIELDS, RATING_FIELDS,
    REVIEW_TEXT_FIELDS,
};

pub const CRATE_NAME: &str = "arv-adapters";

pub const MAX_PAGE_SIZE: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Newest,
    MostRelevant,
    Rating,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Newest => "newest",
            SortOrder::MostRelevant => "most_relevant",
            SortOrder::Rating => "rating",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceQuery {
    pub lang: String,
    pub country: String,
    pub sort: SortOrder,
}

impl Default for SourceQuery {
    fn default() -> Self {
        Self {
            lang: "en".to_string(),
            country: "et".to_string(),
            sort: SortOrder::Newest,
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport failure for {app_id}: {source}")]
    Transport {
        app_id: String,
        #[source]
        source: FetchError,
    },
    #[error("page fetch for {app_id} timed out after {timeout:?}")]
    Timeout { app_id: String, timeout: Duration },
    #[error("malformed page for {app_id}: {details}")]
    Decode { app_id: String, details: String },
    #[error("continuation token rejected for {app_id}")]
    InvalidToken { app_id: String },
    #[error("source has no reviews for app {0}")]
    UnknownApp(String),
    #[error("collection cancelled")]
    Cancelled,
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Transport { source, .. } => {
                source.disposition() == RetryDisposition::Retryable
            }
            SourceError::Timeout { .. } => true,
            _ => false,
        }
    }
}

#[async_trait]
pub trait ReviewSource: Send + Sync {
    fn source_id(&self) -> &str;

    fn max_page_size(&self) -> usize {
        MAX_PAGE_SIZE
    }

    async fn fetch_page(
        &self,
        app_id: &str,
        token: Option<&ContinuationToken>,
        page_size: usize,
    ) -> Result<ReviewPage, SourceError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSpec {
    Http { base_url: String },
    Fixture { path: PathBuf },
}

pub fn source_for_spec(
    spec: &SourceSpec,
    http: Arc<HttpFetcher>,
    query: SourceQuery,
) -> Result<Arc<dyn ReviewSource>> {
    match spec {
        SourceSpec::Http { base_url } => Ok(Arc::new(HttpReviewSource::new(
            http,
            base_url,
            query,
        )?)),
        SourceSpec::Fixture { path } => Ok(Arc::new(FixtureReviewSource::load(path)?)),
    }
}

#[derive(Debug, Deserialize)]
struct HttpPageBody {
    #[serde(default)]
    reviews: Vec<JsonValue>,
    #[serde(default, alias = "continuation_token")]
    next_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpReviewSource {
    http: Arc<HttpFetcher>,
    base_url: Url,
    query: SourceQuery,
}

impl HttpReviewSource {
    pub fn new(http: Arc<HttpFetcher>, base_url: &str, query: SourceQuery) -> Result<Self> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).with_context(|| format!("parsing source url {base}"))?;
        Ok(Self {
            http,
            base_url,
            query,
        })
    }

    pub fn page_url(
        &self,
        app_id: &str,
        token: Option<&ContinuationToken>,
        page_size: usize,
    ) -> Result<Url, SourceError> {
        let mut url = self
            .base_url
            .join(&format!("apps/{app_id}/reviews"))
            .map_err(|e| SourceError::Decode {
                app_id: app_id.to_string(),
                details: format!("building page url: {e}"),
            })?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("lang", &self.query.lang)
                .append_pair("country", &self.query.country)
                .append_pair("sort", self.query.sort.as_str())
                .append_pair("count", &page_size.to_string());
            if let Some(token) = token {
                let token = std::str::from_utf8(token.as_bytes()).map_err(|_| {
                    SourceError::InvalidToken {
                        app_id: app_id.to_string(),
                    }
                })?;
                pairs.append_pair("token", token);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl ReviewSource for HttpReviewSource {
    fn source_id(&self) -> &str {
        "http"
    }

    async fn fetch_page(
        &self,
        app_id: &str,
        token: Option<&ContinuationToken>,
        page_size: usize,
    ) -> Result<ReviewPage, SourceError> {
        let page_size = page_size.clamp(1, self.max_page_size());
        let url = self.page_url(app_id, token, page_size)?;
        let response = self
            .http
            .fetch_bytes(app_id, url.as_str())
            .await
            .map_err(|source| SourceError::Transport {
                app_id: app_id.to_string(),
                source,
            })?;
        let body: HttpPageBody =
            serde_json::from_slice(&response.body).map_err(|e| SourceError::Decode {
                app_id: app_id.to_string(),
                details: e.to_string(),
            })?;
        Ok(ReviewPage {
            records: body.reviews.into_iter().map(RawReviewRecord::new).collect(),
            next_token: body
                .next_token
                .filter(|t| !t.trim().is_empty())
                .map(ContinuationToken::from_bytes),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct FixtureFile {
    apps: BTreeMap<String, Vec<JsonValue>>,
}

#[derive(Debug, Clone)]
pub struct FixtureReviewSource {
    apps: BTreeMap<String, Vec<JsonValue>>,
    max_page_size: usize,
}

impl FixtureReviewSource {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file: FixtureFile = read_json_file(path)?;
        Ok(Self::from_records(file.apps))
    }

    pub fn from_records(apps: BTreeMap<String, Vec<JsonValue>>) -> Self {
        Self {
            apps,
            max_page_size: MAX_PAGE_SIZE,
        }
    }

    pub fn with_max_page_size(mut self, max_page_size: usize) -> Self {
        self.max_page_size = max_page_size.max(1);
        self
    }

    fn decode_offset(app_id: &str, token: Option<&ContinuationToken>) -> Result<usize, SourceError> {
        let Some(token) = token else {
            return Ok(0);
        };
        std::str::from_utf8(token.as_bytes())
            .ok()
            .and_then(|s| s.strip_prefix("offset:"))
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| SourceError::InvalidToken {
                app_id: app_id.to_string(),
            })
    }
}

#[async_trait]
impl ReviewSource for FixtureReviewSource {
    fn source_id(&self) -> &str {
        "fixture"
    }

    fn max_page_size(&self) -> usize {
        self.max_page_size
    }

    async fn fetch_page(
        &self,
        app_id: &str,
        token: Option<&ContinuationToken>,
        page_size: usize,
    ) -> Result<ReviewPage, SourceError> {
        let records = self
            .apps
            .get(app_id)
            .ok_or_else(|| SourceError::UnknownApp(app_id.to_string()))?;
        let offset = Self::decode_offset(app_id, token)?;
        if offset > records.len() {
            return Err(SourceError::InvalidToken {
                app_id: app_id.to_string(),
            });
        }
        let end = (offset + page_size.clamp(1, self.max_page_size)).min(records.len());
        let next_token = (end < records.len())
            .then(|| ContinuationToken::from_bytes(format!("offset:{end}")));
        Ok(ReviewPage {
            records: records[offset..end]
                .iter()
                .cloned()
                .map(RawReviewRecord::new)
                .collect(),
            next_token,
        })
    }
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}
