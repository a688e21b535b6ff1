//! Review pipeline orchestration: paginate, normalize, clean, persist.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use arv_adapters::{
    load_raw_table, normalize, source_for_spec, ReviewSource, SourceError, SourceQuery, SourceSpec,
};
use arv_core::{AppTarget, RawReviewRecord, ReviewDraft, DEFAULT_SOURCE_LABEL};
use arv_storage::{BackoffPolicy, HttpClientConfig, HttpFetcher, PersistedTable, TableStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod clean;
pub mod paginate;

pub use clean::{
    clean_text, coerce_rating, draft_from_canonical, parse_review_date, CleanOutput, Cleaner,
    CleaningReport, InvalidDateRow, StageCounts, TableStage, ValidationError,
};
pub use paginate::{CancelFlag, PaginationPolicy, Paginator};

pub const CRATE_NAME: &str = "arv-pipeline";

#[derive(Debug, Clone, Deserialize)]
pub struct AppRegistry {
    #[serde(default)]
    pub apps: Vec<AppConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub label: String,
    pub package_id: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl AppRegistry {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Configuration(format!("reading app registry {}: {e}", path.display()))
        })?;
        serde_yaml::from_str(&text).map_err(|e| {
            PipelineError::Configuration(format!("parsing app registry {}: {e}", path.display()))
        })
    }

    pub fn enabled_targets(&self) -> Vec<AppTarget> {
        self.apps
            .iter()
            .filter(|a| a.enabled)
            .map(|a| AppTarget::new(a.label.trim(), a.package_id.trim()))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub apps_file: PathBuf,
    pub output_path: Option<PathBuf>,
    pub raw_output_path: Option<PathBuf>,
    pub reviews_per_app: usize,
    pub page_size: usize,
    pub source: SourceSpec,
    pub query: SourceQuery,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub page_timeout_secs: u64,
    pub page_delay_ms: u64,
    pub max_retries: usize,
    pub app_concurrency: usize,
    pub rate_limit_per_sec: Option<f64>,
    pub reports_dir: Option<PathBuf>,
    pub source_label: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            apps_file: PathBuf::from("apps.yaml"),
            output_path: None,
            raw_output_path: None,
            reviews_per_app: 400,
            page_size: 100,
            source: SourceSpec::Http {
                base_url: "http://127.0.0.1:8080/".to_string(),
            },
            query: SourceQuery::default(),
            user_agent: "arv-bot/0.1".to_string(),
            http_timeout_secs: 20,
            page_timeout_secs: 30,
            page_delay_ms: 2000,
            max_retries: 2,
            app_concurrency: 3,
            rate_limit_per_sec: None,
            reports_dir: Some(PathBuf::from("reports")),
            source_label: DEFAULT_SOURCE_LABEL.to_string(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let source = match env_path("ARV_FIXTURES") {
            Some(path) => SourceSpec::Fixture { path },
            None => match std::env::var("ARV_SOURCE_URL") {
                Ok(base_url) if !base_url.trim().is_empty() => SourceSpec::Http { base_url },
                _ => defaults.source.clone(),
            },
        };
        let reports_dir = match std::env::var("ARV_REPORTS_DIR") {
            Ok(v) if v.trim().is_empty() => None,
            Ok(v) => Some(PathBuf::from(v)),
            Err(_) => defaults.reports_dir.clone(),
        };
        Self {
            apps_file: env_path("ARV_APPS_FILE").unwrap_or(defaults.apps_file),
            output_path: env_path("ARV_OUTPUT_PATH"),
            raw_output_path: env_path("ARV_RAW_OUTPUT_PATH"),
            reviews_per_app: env_parse("ARV_REVIEWS_PER_APP", defaults.reviews_per_app),
            page_size: env_parse("ARV_PAGE_SIZE", defaults.page_size),
            source,
            query: SourceQuery {
                lang: std::env::var("ARV_LANG").unwrap_or(defaults.query.lang),
                country: std::env::var("ARV_COUNTRY").unwrap_or(defaults.query.country),
                sort: defaults.query.sort,
            },
            user_agent: std::env::var("ARV_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: env_parse("ARV_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs),
            page_timeout_secs: env_parse("ARV_PAGE_TIMEOUT_SECS", defaults.page_timeout_secs),
            page_delay_ms: env_parse("ARV_PAGE_DELAY_MS", defaults.page_delay_ms),
            max_retries: env_parse("ARV_MAX_RETRIES", defaults.max_retries),
            app_concurrency: env_parse("ARV_APP_CONCURRENCY", defaults.app_concurrency),
            rate_limit_per_sec: Some(env_parse("ARV_RATE_LIMIT_PER_SEC", 0.0_f64))
                .filter(|rate| *rate > 0.0)
                .or(defaults.rate_limit_per_sec),
            reports_dir,
            source_label: std::env::var("ARV_SOURCE_LABEL").unwrap_or(defaults.source_label),
        }
    }

    pub fn pagination_policy(&self) -> PaginationPolicy {
        PaginationPolicy {
            page_size: self.page_size,
            page_timeout: Duration::from_secs(self.page_timeout_secs.max(1)),
            page_delay: Duration::from_millis(self.page_delay_ms),
            backoff: BackoffPolicy {
                max_retries: self.max_retries,
                ..BackoffPolicy::default()
            },
        }
    }

    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs.max(1)),
            user_agent: Some(self.user_agent.clone()),
            max_in_flight: self.app_concurrency.max(1),
            max_requests_per_sec: self.rate_limit_per_sec,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("run cancelled; nothing was persisted")]
    Cancelled,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Run,
    Collect,
    Clean,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Run => "run",
            RunMode::Collect => "collect",
            RunMode::Clean => "clean",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppSummary {
    pub app: String,
    pub package_id: String,
    pub collected: usize,
    pub format_errors: usize,
    pub duplicates: usize,
    pub dropped_missing: usize,
    pub final_rows: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputSummary {
    pub path: String,
    pub format: String,
    pub rows: usize,
    pub bytes: usize,
    pub sha256: String,
}

impl From<&PersistedTable> for OutputSummary {
    fn from(table: &PersistedTable) -> Self {
        Self {
            path: table.path.display().to_string(),
            format: table.format.as_str().to_string(),
            rows: table.rows,
            bytes: table.byte_size,
            sha256: table.content_hash.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub source_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub apps: Vec<AppSummary>,
    pub rejected_rows: usize,
    pub final_stage: TableStage,
    pub output: Option<OutputSummary>,
    pub report_dir: Option<String>,
}

impl RunSummary {
    pub fn failed_apps(&self) -> Vec<&AppSummary> {
        self.apps.iter().filter(|a| a.error.is_some()).collect()
    }

    pub fn final_rows(&self) -> usize {
        self.apps.iter().map(|a| a.final_rows).sum()
    }

    pub fn render_markdown(&self) -> String {
        let mut lines = vec![
            "# Review Run Summary".to_string(),
            String::new(),
            format!("- Run ID: `{}`", self.run_id),
            format!("- Mode: {}", self.mode.as_str()),
            format!("- Source: {}", self.source_id),
            format!("- Started: {}", self.started_at),
            format!("- Finished: {}", self.finished_at),
        ];
        if let Some(output) = &self.output {
            lines.push(format!(
                "- Output: `{}` ({} rows, {}, sha256 {})",
                output.path, output.rows, output.format, output.sha256
            ));
        }
        if self.rejected_rows > 0 {
            lines.push(format!("- Rejected input rows: {}", self.rejected_rows));
        }
        lines.push(String::new());
        lines.push(
            "| app | collected | format errors | duplicates | dropped missing | final rows | status |"
                .to_string(),
        );
        lines.push("|---|---|---|---|---|---|---|".to_string());
        for app in &self.apps {
            lines.push(format!(
                "| {} | {} | {} | {} | {} | {} | {} |",
                app.app,
                app.collected,
                app.format_errors,
                app.duplicates,
                app.dropped_missing,
                app.final_rows,
                app.error.as_deref().map(|e| format!("failed: {e}")).unwrap_or_else(|| "ok".to_string())
            ));
        }
        lines.push(String::new());
        lines.join("\n")
    }
}

#[derive(Debug, Clone)]
struct AppCollection {
    target: AppTarget,
    drafts: Vec<ReviewDraft>,
    collected: usize,
    format_errors: usize,
    error: Option<String>,
}

impl AppCollection {
    fn from_records(target: AppTarget, records: Vec<RawReviewRecord>) -> Self {
        let collected = records.len();
        let mut drafts = Vec::with_capacity(collected);
        let mut format_errors = 0usize;
        for (idx, record) in records.iter().enumerate() {
            match normalize(record, &target.label) {
                Ok(draft) => drafts.push(draft),
                Err(err) => {
                    warn!(app = %target.label, record = idx, error = %err, "dropping raw review");
                    format_errors += 1;
                }
            }
        }
        Self {
            target,
            drafts,
            collected,
            format_errors,
            error: None,
        }
    }

    fn failed(target: AppTarget, error: String) -> Self {
        Self {
            target,
            drafts: Vec::new(),
            collected: 0,
            format_errors: 0,
            error: Some(error),
        }
    }
}

fn validate_apps(apps: &[AppTarget]) -> Result<(), PipelineError> {
    if apps.is_empty() {
        return Err(PipelineError::Configuration(
            "no enabled apps to collect".to_string(),
        ));
    }
    let mut labels = HashSet::new();
    for app in apps {
        if app.label.is_empty() || app.package_id.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "app entry needs both a label and a package id (label={:?}, package_id={:?})",
                app.label, app.package_id
            )));
        }
        if !labels.insert(app.label.as_str()) {
            return Err(PipelineError::Configuration(format!(
                "duplicate app label {}",
                app.label
            )));
        }
    }
    Ok(())
}

pub struct ReviewPipeline {
    config: PipelineConfig,
    apps: Vec<AppTarget>,
    paginator: Option<Paginator>,
    cleaner: Cleaner,
    store: TableStore,
}

impl ReviewPipeline {
    pub fn new(config: PipelineConfig, cancel: CancelFlag) -> Result<Self, PipelineError> {
        let apps = AppRegistry::load(&config.apps_file)?.enabled_targets();
        validate_apps(&apps)?;
        let http = Arc::new(HttpFetcher::new(config.http_config())?);
        let source = source_for_spec(&config.source, http, config.query.clone())
            .map_err(|e| PipelineError::Configuration(format!("building review source: {e:#}")))?;
        Self::with_source(config, apps, source, cancel)
    }

    /// For `clean_file` only: no review source is built, so source settings are never read.
    pub fn offline(config: PipelineConfig) -> Result<Self, PipelineError> {
        let apps = AppRegistry::load(&config.apps_file)?.enabled_targets();
        Self::build(config, apps, None)
    }

    pub fn with_source(
        config: PipelineConfig,
        apps: Vec<AppTarget>,
        source: Arc<dyn ReviewSource>,
        cancel: CancelFlag,
    ) -> Result<Self, PipelineError> {
        if config.page_size == 0 {
            return Err(PipelineError::Configuration(
                "page size must be at least 1".to_string(),
            ));
        }
        let paginator = Paginator::new(source, config.pagination_policy(), cancel);
        Self::build(config, apps, Some(paginator))
    }

    fn build(
        config: PipelineConfig,
        apps: Vec<AppTarget>,
        paginator: Option<Paginator>,
    ) -> Result<Self, PipelineError> {
        validate_apps(&apps)?;
        let cleaner = Cleaner::new(config.source_label.clone());
        Ok(Self {
            config,
            apps,
            paginator,
            cleaner,
            store: TableStore::new(),
        })
    }

    fn paginator(&self) -> Result<&Paginator, PipelineError> {
        self.paginator.as_ref().ok_or_else(|| {
            PipelineError::Configuration("pipeline was built without a review source".to_string())
        })
    }

    fn require_path<'a>(path: &'a Option<PathBuf>, what: &str) -> Result<&'a Path, PipelineError> {
        path.as_deref()
            .ok_or_else(|| PipelineError::Configuration(format!("missing {what}")))
    }

    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        let output_path = Self::require_path(&self.config.output_path, "output path")?;
        let paginator = self.paginator()?;
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        info!(%run_id, apps = self.apps.len(), source = paginator.source_id(), "review run started");

        let collections = self.collect_all(paginator).await?;
        let drafts = collections
            .iter()
            .flat_map(|c| c.drafts.iter().cloned())
            .collect::<Vec<_>>();
        let cleaned = self.clean_or_report(drafts)?;
        let persisted = self.store.write_canonical(output_path, &cleaned.rows).await?;
        info!(%run_id, rows = persisted.rows, path = %persisted.path.display(), "canonical table persisted");

        let apps = collections
            .iter()
            .map(|c| {
                let counts = cleaned
                    .report
                    .per_app
                    .get(&c.target.label)
                    .copied()
                    .unwrap_or_default();
                AppSummary {
                    app: c.target.label.clone(),
                    package_id: c.target.package_id.clone(),
                    collected: c.collected,
                    format_errors: c.format_errors,
                    duplicates: counts.duplicates,
                    dropped_missing: counts.dropped_missing,
                    final_rows: counts.output,
                    error: c.error.clone(),
                }
            })
            .collect();

        let mut summary = RunSummary {
            run_id,
            mode: RunMode::Run,
            source_id: paginator.source_id().to_string(),
            started_at,
            finished_at: Utc::now(),
            apps,
            rejected_rows: 0,
            final_stage: cleaned.stage.next().unwrap_or(TableStage::Persisted),
            output: Some(OutputSummary::from(&persisted)),
            report_dir: None,
        };
        self.write_report(&mut summary).await?;
        Ok(summary)
    }

    pub async fn collect(&self) -> Result<RunSummary, PipelineError> {
        let raw_path = Self::require_path(&self.config.raw_output_path, "raw output path")?;
        let paginator = self.paginator()?;
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        info!(%run_id, apps = self.apps.len(), "review collection started");

        let collections = self.collect_all(paginator).await?;
        let drafts = collections
            .iter()
            .flat_map(|c| c.drafts.iter().cloned())
            .collect::<Vec<_>>();
        let persisted = self.store.write_raw(raw_path, &drafts).await?;

        let apps = collections
            .iter()
            .map(|c| AppSummary {
                app: c.target.label.clone(),
                package_id: c.target.package_id.clone(),
                collected: c.collected,
                format_errors: c.format_errors,
                duplicates: 0,
                dropped_missing: 0,
                final_rows: c.drafts.len(),
                error: c.error.clone(),
            })
            .collect();

        let mut summary = RunSummary {
            run_id,
            mode: RunMode::Collect,
            source_id: paginator.source_id().to_string(),
            started_at,
            finished_at: Utc::now(),
            apps,
            rejected_rows: 0,
            final_stage: TableStage::Raw,
            output: Some(OutputSummary::from(&persisted)),
            report_dir: None,
        };
        self.write_report(&mut summary).await?;
        Ok(summary)
    }

    pub async fn clean_file(&self, input: impl AsRef<Path>) -> Result<RunSummary, PipelineError> {
        let input = input.as_ref();
        let output_path = Self::require_path(&self.config.output_path, "output path")?;
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        let tracked = self
            .apps
            .iter()
            .map(|a| a.label.clone())
            .collect::<BTreeSet<_>>();
        let input_path = input.to_path_buf();
        let load = tokio::task::spawn_blocking(move || load_raw_table(&input_path, &tracked))
            .await
            .context("raw table loader task failed")??;
        info!(%run_id, rows = load.drafts.len(), rejected = load.rejected_rows, input = %input.display(), "raw table loaded");

        let cleaned = self.clean_or_report(load.drafts)?;
        let persisted = self.store.write_canonical(output_path, &cleaned.rows).await?;

        let apps = self
            .apps
            .iter()
            .map(|target| {
                let counts = cleaned
                    .report
                    .per_app
                    .get(&target.label)
                    .copied()
                    .unwrap_or_default();
                AppSummary {
                    app: target.label.clone(),
                    package_id: target.package_id.clone(),
                    collected: counts.input,
                    format_errors: 0,
                    duplicates: counts.duplicates,
                    dropped_missing: counts.dropped_missing,
                    final_rows: counts.output,
                    error: None,
                }
            })
            .collect();

        let mut summary = RunSummary {
            run_id,
            mode: RunMode::Clean,
            source_id: input.display().to_string(),
            started_at,
            finished_at: Utc::now(),
            apps,
            rejected_rows: load.rejected_rows,
            final_stage: cleaned.stage.next().unwrap_or(TableStage::Persisted),
            output: Some(OutputSummary::from(&persisted)),
            report_dir: None,
        };
        self.write_report(&mut summary).await?;
        Ok(summary)
    }

    fn clean_or_report(&self, drafts: Vec<ReviewDraft>) -> Result<CleanOutput, PipelineError> {
        self.cleaner.clean(drafts).map_err(|err| {
            for row in &err.rows {
                error!(position = row.position, app = %row.app, raw_date = ?row.raw_date, "unparseable review date");
            }
            PipelineError::Validation(err)
        })
    }

    async fn collect_all(&self, paginator: &Paginator) -> Result<Vec<AppCollection>, PipelineError> {
        let limit = Arc::new(Semaphore::new(self.config.app_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for (idx, target) in self.apps.iter().cloned().enumerate() {
            let paginator = paginator.clone();
            let limit = limit.clone();
            let count = self.config.reviews_per_app;
            tasks.spawn(async move {
                let _permit = limit.acquire_owned().await.ok();
                let span = info_span!("collect_app", app = %target.label, package = %target.package_id);
                let result = paginator
                    .collect(&target.package_id, &target.label, count)
                    .instrument(span)
                    .await;
                (idx, target, result)
            });
        }

        let mut slots: Vec<Option<AppCollection>> = (0..self.apps.len()).map(|_| None).collect();
        let mut cancelled = false;
        while let Some(joined) = tasks.join_next().await {
            let (idx, target, result) = joined.context("review collection task failed")?;
            let collection = match result {
                Ok(records) => AppCollection::from_records(target, records),
                Err(SourceError::Cancelled) => {
                    cancelled = true;
                    continue;
                }
                Err(err) => {
                    error!(app = %target.label, error = %err, "collection failed; continuing without this app");
                    AppCollection::failed(target, err.to_string())
                }
            };
            slots[idx] = Some(collection);
        }

        if cancelled {
            warn!("run cancelled at a page boundary");
            return Err(PipelineError::Cancelled);
        }
        Ok(slots.into_iter().flatten().collect())
    }

    async fn write_report(&self, summary: &mut RunSummary) -> Result<(), PipelineError> {
        let Some(reports_root) = &self.config.reports_dir else {
            return Ok(());
        };
        let report_dir = reports_root.join(summary.run_id.to_string());
        fs::create_dir_all(&report_dir)
            .await
            .with_context(|| format!("creating {}", report_dir.display()))?;
        summary.report_dir = Some(report_dir.display().to_string());

        let json = serde_json::to_vec_pretty(&*summary).context("serializing run summary")?;
        fs::write(report_dir.join("run_summary.json"), json)
            .await
            .context("writing run_summary.json")?;
        fs::write(report_dir.join("summary.md"), summary.render_markdown())
            .await
            .context("writing summary.md")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn registry_filters_disabled_apps() {
        let registry: AppRegistry = serde_yaml::from_str(
            "apps:\n  - label: CBE\n    package_id: com.cbe.mobilebanking\n  - label: BOA\n    package_id: com.boa.mobilebanking\n    enabled: false\n",
        )
        .unwrap();
        assert_eq!(
            registry.enabled_targets(),
            vec![AppTarget::new("CBE", "com.cbe.mobilebanking")]
        );
    }

    #[test]
    fn missing_registry_is_a_configuration_error() {
        let dir = tempdir().unwrap();
        let err = AppRegistry::load(dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn app_validation_rejects_empty_and_duplicate_sets() {
        assert!(matches!(
            validate_apps(&[]),
            Err(PipelineError::Configuration(_))
        ));
        assert!(matches!(
            validate_apps(&[AppTarget::new("CBE", "a"), AppTarget::new("CBE", "b")]),
            Err(PipelineError::Configuration(_))
        ));
        assert!(matches!(
            validate_apps(&[AppTarget::new("CBE", "")]),
            Err(PipelineError::Configuration(_))
        ));
        assert!(validate_apps(&[AppTarget::new("CBE", "a"), AppTarget::new("BOA", "b")]).is_ok());
    }

    #[test]
    fn pagination_policy_follows_config() {
        let config = PipelineConfig {
            page_size: 150,
            page_delay_ms: 0,
            max_retries: 4,
            ..Default::default()
        };
        let policy = config.pagination_policy();
        assert_eq!(policy.page_size, 150);
        assert!(policy.page_delay.is_zero());
        assert_eq!(policy.backoff.max_retries, 4);
    }

    #[test]
    fn http_config_carries_the_rate_limit() {
        let config = PipelineConfig {
            app_concurrency: 4,
            rate_limit_per_sec: Some(2.0),
            ..Default::default()
        };
        let http = config.http_config();
        assert_eq!(http.max_in_flight, 4);
        assert_eq!(http.max_requests_per_sec, Some(2.0));
        assert_eq!(PipelineConfig::default().http_config().max_requests_per_sec, None);
    }

    #[test]
    fn summary_markdown_lists_every_app() {
        let summary = RunSummary {
            run_id: Uuid::nil(),
            mode: RunMode::Run,
            source_id: "fixture".into(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            apps: vec![
                AppSummary {
                    app: "CBE".into(),
                    package_id: "com.cbe.mobilebanking".into(),
                    collected: 5,
                    format_errors: 0,
                    duplicates: 1,
                    dropped_missing: 1,
                    final_rows: 3,
                    error: None,
                },
                AppSummary {
                    app: "BOA".into(),
                    package_id: "com.boa.mobilebanking".into(),
                    collected: 0,
                    format_errors: 0,
                    duplicates: 0,
                    dropped_missing: 0,
                    final_rows: 0,
                    error: Some("http status 503".into()),
                },
            ],
            rejected_rows: 0,
            final_stage: TableStage::Persisted,
            output: None,
            report_dir: None,
        };
        let md = summary.render_markdown();
        assert!(md.contains("| CBE | 5 | 0 | 1 | 1 | 3 | ok |"));
        assert!(md.contains("| BOA | 0 | 0 | 0 | 0 | 0 | failed: http status 503 |"));
        assert_eq!(summary.failed_apps().len(), 1);
        assert_eq!(summary.final_rows(), 3);
    }
}
