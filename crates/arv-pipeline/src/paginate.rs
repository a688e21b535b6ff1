//! Per-app pagination over a `ReviewSource`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arv_adapters::{ReviewSource, SourceError};
use arv_core::{ContinuationToken, RawReviewRecord, ReviewPage};
use arv_storage::BackoffPolicy;
use tracing::{debug, info, warn};

const MAX_EMPTY_PAGES: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PaginationPolicy {
    pub page_size: usize,
    pub page_timeout: Duration,
    pub page_delay: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for PaginationPolicy {
    fn default() -> Self {
        Self {
            page_size: 100,
            page_timeout: Duration::from_secs(30),
            page_delay: Duration::from_secs(2),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Clone)]
pub struct Paginator {
    source: Arc<dyn ReviewSource>,
    policy: PaginationPolicy,
    cancel: CancelFlag,
}

impl Paginator {
    pub fn new(source: Arc<dyn ReviewSource>, policy: PaginationPolicy, cancel: CancelFlag) -> Self {
        Self {
            source,
            policy,
            cancel,
        }
    }

    pub fn source_id(&self) -> &str {
        self.source.source_id()
    }

    pub async fn collect(
        &self,
        app_id: &str,
        app_label: &str,
        target_count: usize,
    ) -> Result<Vec<RawReviewRecord>, SourceError> {
        let mut records: Vec<RawReviewRecord> = Vec::new();
        if target_count == 0 {
            return Ok(records);
        }

        let mut token: Option<ContinuationToken> = None;
        let mut pages = 0usize;
        let mut empty_pages = 0usize;
        loop {
            if self.cancel.is_cancelled() {
                return Err(SourceError::Cancelled);
            }
            if pages > 0 && !self.policy.page_delay.is_zero() {
                tokio::time::sleep(self.policy.page_delay).await;
            }

            let page = self.fetch_with_retry(app_id, token.as_ref()).await?;
            pages += 1;
            let page_len = page.records.len();
            records.extend(page.records);
            debug!(app = app_label, page = pages, page_len, total = records.len(), "page fetched");

            if records.len() >= target_count {
                records.truncate(target_count);
                break;
            }
            let Some(next) = page.next_token else {
                debug!(app = app_label, total = records.len(), "source exhausted");
                break;
            };
            if page_len == 0 {
                empty_pages += 1;
                if empty_pages >= MAX_EMPTY_PAGES {
                    warn!(app = app_label, pages, "source keeps returning empty pages; stopping");
                    break;
                }
            } else {
                empty_pages = 0;
            }
            token = Some(next);
        }

        info!(app = app_label, app_id, pages, collected = records.len(), "collection finished");
        Ok(records)
    }

    async fn fetch_with_retry(
        &self,
        app_id: &str,
        token: Option<&ContinuationToken>,
    ) -> Result<ReviewPage, SourceError> {
        let page_size = self.policy.page_size.min(self.source.max_page_size()).max(1);
        let mut attempt = 0usize;
        loop {
            let result = match tokio::time::timeout(
                self.policy.page_timeout,
                self.source.fetch_page(app_id, token, page_size),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(SourceError::Timeout {
                    app_id: app_id.to_string(),
                    timeout: self.policy.page_timeout,
                }),
            };

            match result {
                Ok(page) => return Ok(page),
                Err(err) if err.is_retryable() && attempt < self.policy.backoff.max_retries => {
                    let delay = self.policy.backoff.delay_for_attempt(attempt);
                    warn!(app_id, attempt, ?delay, error = %err, "page fetch failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    if self.cancel.is_cancelled() {
                        return Err(SourceError::Cancelled);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}
