//! Canonical table persistence + HTTP fetch utilities for review ingestion.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use arrow_array::{RecordBatch, StringArray, UInt8Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use arv_core::{CanonicalReview, ReviewDraft, CANONICAL_COLUMNS, RAW_COLUMNS};
use parquet::arrow::ArrowWriter;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "arv-storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Csv,
    Parquet,
}

impl TableFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("parquet") => TableFormat::Parquet,
            _ => TableFormat::Csv,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TableFormat::Csv => "csv",
            TableFormat::Parquet => "parquet",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PersistedTable {
    pub path: PathBuf,
    pub format: TableFormat,
    pub rows: usize,
    pub byte_size: usize,
    pub content_hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct TableStore;

impl TableStore {
    pub fn new() -> Self {
        Self
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub async fn write_canonical(
        &self,
        path: impl AsRef<Path>,
        rows: &[CanonicalReview],
    ) -> anyhow::Result<PersistedTable> {
        let path = path.as_ref();
        let format = TableFormat::from_path(path);
        let bytes = match format {
            TableFormat::Csv => encode_canonical_csv(rows)?,
            TableFormat::Parquet => encode_canonical_parquet(rows)?,
        };
        self.replace_file(path, format, rows.len(), &bytes).await
    }

    pub async fn write_raw(
        &self,
        path: impl AsRef<Path>,
        drafts: &[ReviewDraft],
    ) -> anyhow::Result<PersistedTable> {
        let path = path.as_ref();
        let format = TableFormat::from_path(path);
        if format != TableFormat::Csv {
            bail!("raw tables are written as CSV only: {}", path.display());
        }
        let bytes = encode_raw_csv(drafts)?;
        self.replace_file(path, format, drafts.len(), &bytes).await
    }

    async fn replace_file(
        &self,
        path: &Path,
        format: TableFormat,
        rows: usize,
        bytes: &[u8],
    ) -> anyhow::Result<PersistedTable> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating table directory {}", parent.display()))?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("table path has no file name: {}", path.display()))?;
        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), file_name));

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp table file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp table file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp table file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp table {} -> {}",
                    temp_path.display(),
                    path.display()
                )
            });
        }

        debug!(path = %path.display(), rows, bytes = bytes.len(), "table written");
        Ok(PersistedTable {
            path: path.to_path_buf(),
            format,
            rows,
            byte_size: bytes.len(),
            content_hash: Self::sha256_hex(bytes),
        })
    }
}

fn encode_canonical_csv(rows: &[CanonicalReview]) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(CANONICAL_COLUMNS)
        .context("writing canonical csv header")?;
    for row in rows {
        let rating = row.rating.to_string();
        let date = row.date_string();
        writer
            .write_record([
                row.app.as_str(),
                row.review_text.as_str(),
                rating.as_str(),
                date.as_str(),
                row.source.as_str(),
            ])
            .context("writing canonical csv row")?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("finishing canonical csv: {}", e.error()))
}

fn encode_raw_csv(drafts: &[ReviewDraft]) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(RAW_COLUMNS).context("writing raw csv header")?;
    for draft in drafts {
        writer
            .write_record([
                draft.app.as_str(),
                draft.review_text.as_deref().unwrap_or_default(),
                draft.rating.as_deref().unwrap_or_default(),
                draft.date.as_deref().unwrap_or_default(),
            ])
            .context("writing raw csv row")?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("finishing raw csv: {}", e.error()))
}

fn encode_canonical_parquet(rows: &[CanonicalReview]) -> anyhow::Result<Vec<u8>> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("app", DataType::Utf8, false),
        ArrowField::new("review_text", DataType::Utf8, false),
        ArrowField::new("rating", DataType::UInt8, false),
        ArrowField::new("date", DataType::Utf8, false),
        ArrowField::new("source", DataType::Utf8, false),
    ]));

    let apps = StringArray::from(rows.iter().map(|r| r.app.as_str()).collect::<Vec<_>>());
    let texts = StringArray::from(
        rows.iter()
            .map(|r| r.review_text.as_str())
            .collect::<Vec<_>>(),
    );
    let ratings = UInt8Array::from(rows.iter().map(|r| r.rating).collect::<Vec<_>>());
    let dates = StringArray::from(rows.iter().map(|r| r.date_string()).collect::<Vec<_>>());
    let sources = StringArray::from(rows.iter().map(|r| r.source.as_str()).collect::<Vec<_>>());

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(apps),
            Arc::new(texts),
            Arc::new(ratings),
            Arc::new(dates),
            Arc::new(sources),
        ],
    )
    .context("building canonical record batch")?;

    let mut writer = ArrowWriter::try_new(Vec::new(), batch.schema(), None)
        .context("opening parquet writer")?;
    writer.write(&batch).context("writing canonical record batch")?;
    writer.into_inner().context("closing parquet writer")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub max_in_flight: usize,
    pub max_requests_per_sec: Option<f64>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            max_in_flight: 8,
            max_requests_per_sec: None,
        }
    }
}

#[derive(Debug)]
pub struct RequestPacer {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RequestPacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub fn per_second(rate: f64) -> Option<Self> {
        (rate.is_finite() && rate > 0.0).then(|| Self::new(Duration::from_secs_f64(1.0 / rate)))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn wait_turn(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let slot = (*next).max(Instant::now());
            *next = slot + self.interval;
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    in_flight: Semaphore,
    pacer: Option<RequestPacer>,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("http client closed")]
    Closed,
}

impl FetchError {
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            FetchError::Request(err) => classify_reqwest_error(err),
            FetchError::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(classify_status)
                .unwrap_or(RetryDisposition::NonRetryable),
            FetchError::Closed => RetryDisposition::NonRetryable,
        }
    }
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            in_flight: Semaphore::new(config.max_in_flight.max(1)),
            pacer: config.max_requests_per_sec.and_then(RequestPacer::per_second),
        })
    }

    pub async fn fetch_bytes(
        &self,
        app_id: &str,
        url: &str,
    ) -> Result<FetchedResponse, FetchError> {
        let _permit = self.in_flight.acquire().await.map_err(|_| FetchError::Closed)?;
        if let Some(pacer) = &self.pacer {
            pacer.wait_turn().await;
        }

        let span = info_span!("http_fetch", app_id, url);
        self.fetch_once(url).instrument(span).await
    }

    async fn fetch_once(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }
        let body = resp.bytes().await?.to_vec();
        Ok(FetchedResponse {
            status,
            final_url,
            body,
        })
    }
}
