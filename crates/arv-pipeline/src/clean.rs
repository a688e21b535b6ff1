//! Table-level cleaning: dedup, missing-data filter, date normalization, text cleanup.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use arv_core::{CanonicalReview, ReviewDraft};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("static regex compiles"));
static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static regex compiles"));
static EPOCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)(?:\.\d+)?$").expect("static regex compiles"));

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const OFFSET_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];

/// Processing status of the review table. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TableStage {
    Raw,
    Deduped,
    Validated,
    DateNormalized,
    TextCleaned,
    Persisted,
}

impl TableStage {
    pub fn next(self) -> Option<Self> {
        match self {
            TableStage::Raw => Some(TableStage::Deduped),
            TableStage::Deduped => Some(TableStage::Validated),
            TableStage::Validated => Some(TableStage::DateNormalized),
            TableStage::DateNormalized => Some(TableStage::TextCleaned),
            TableStage::TextCleaned => Some(TableStage::Persisted),
            TableStage::Persisted => None,
        }
    }
}

pub fn clean_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped = NON_WORD.replace_all(&lowered, "");
    WHITESPACE_RUN.replace_all(&stripped, " ").trim().to_string()
}

pub fn coerce_rating(raw: &str) -> Option<u8> {
    let value: f64 = raw.trim().parse().ok()?;
    if !value.is_finite() || value.fract() != 0.0 || !(1.0..=5.0).contains(&value) {
        return None;
    }
    Some(value as u8)
}

pub fn parse_review_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    for fmt in OFFSET_DATETIME_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.date_naive());
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.date());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(d);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.date_naive());
    }

    if raw.len() == 8 && raw.bytes().all(|b| b.is_ascii_digit()) {
        return compact_date(raw);
    }
    epoch_date(raw)
}

// YYYYMMDD
fn compact_date(raw: &str) -> Option<NaiveDate> {
    let year = raw[0..4].parse().ok()?;
    let month = raw[4..6].parse().ok()?;
    let day = raw[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

// Whole part decides the unit: 9-10 digits are seconds, 12-13 are milliseconds.
fn epoch_date(raw: &str) -> Option<NaiveDate> {
    let whole = EPOCH.captures(raw)?.get(1)?.as_str();
    let n: i64 = whole.parse().ok()?;
    match whole.len() {
        9 | 10 => DateTime::from_timestamp(n, 0).map(|dt| dt.date_naive()),
        12 | 13 => DateTime::from_timestamp_millis(n).map(|dt| dt.date_naive()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidDateRow {
    pub position: usize,
    pub app: String,
    pub raw_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} row(s) have unparseable dates: {}", .rows.len(), describe_rows(.rows))]
pub struct ValidationError {
    pub rows: Vec<InvalidDateRow>,
}

fn describe_rows(rows: &[InvalidDateRow]) -> String {
    const SHOWN: usize = 10;
    let mut parts = rows
        .iter()
        .take(SHOWN)
        .map(|r| {
            format!(
                "#{} app={} date={}",
                r.position,
                r.app,
                r.raw_date.as_deref().unwrap_or("<missing>")
            )
        })
        .collect::<Vec<_>>();
    if rows.len() > SHOWN {
        parts.push(format!("... and {} more", rows.len() - SHOWN));
    }
    parts.join("; ")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    pub input: usize,
    pub duplicates: usize,
    pub dropped_missing: usize,
    pub output: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleaningReport {
    pub per_app: BTreeMap<String, StageCounts>,
}

impl CleaningReport {
    pub fn totals(&self) -> StageCounts {
        self.per_app.values().fold(StageCounts::default(), |acc, c| StageCounts {
            input: acc.input + c.input,
            duplicates: acc.duplicates + c.duplicates,
            dropped_missing: acc.dropped_missing + c.dropped_missing,
            output: acc.output + c.output,
        })
    }

    fn app(&mut self, app: &str) -> &mut StageCounts {
        self.per_app.entry(app.to_string()).or_default()
    }
}

#[derive(Debug, Clone)]
pub struct CleanOutput {
    pub rows: Vec<CanonicalReview>,
    pub report: CleaningReport,
    pub stage: TableStage,
}

#[derive(Debug, Clone)]
struct Tracked<T> {
    position: usize,
    row: T,
}

#[derive(Debug, Clone)]
struct ValidRow {
    app: String,
    review_text: String,
    rating: u8,
    date: Option<String>,
}

#[derive(Debug, Clone)]
struct DatedRow {
    app: String,
    review_text: String,
    rating: u8,
    date: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct Cleaner {
    source_label: String,
}

impl Cleaner {
    pub fn new(source_label: impl Into<String>) -> Self {
        Self {
            source_label: source_label.into(),
        }
    }

    pub fn clean(&self, drafts: Vec<ReviewDraft>) -> Result<CleanOutput, ValidationError> {
        let mut report = CleaningReport::default();
        for draft in &drafts {
            report.app(&draft.app).input += 1;
        }

        let mut stage = TableStage::Raw;
        let rows = drafts
            .into_iter()
            .enumerate()
            .map(|(position, row)| Tracked { position, row })
            .collect::<Vec<_>>();

        let rows = deduplicate(rows, &mut report);
        stage = advance(stage);
        let rows = drop_missing(rows, &mut report);
        stage = advance(stage);
        let rows = normalize_dates(rows)?;
        stage = advance(stage);
        let rows = self.clean_texts(rows);
        stage = advance(stage);

        for row in &rows {
            report.app(&row.app).output += 1;
        }
        let totals = report.totals();
        info!(
            input = totals.input,
            duplicates = totals.duplicates,
            dropped_missing = totals.dropped_missing,
            output = totals.output,
            "review table cleaned"
        );
        Ok(CleanOutput {
            rows,
            report,
            stage,
        })
    }

    fn clean_texts(&self, rows: Vec<Tracked<DatedRow>>) -> Vec<CanonicalReview> {
        rows.into_iter()
            .map(|Tracked { row, .. }| CanonicalReview {
                review_text: clean_text(&row.review_text),
                app: row.app,
                rating: row.rating,
                date: row.date,
                source: self.source_label.clone(),
            })
            .collect()
    }
}

fn advance(stage: TableStage) -> TableStage {
    let next = stage.next().unwrap_or(stage);
    debug!(from = ?stage, to = ?next, "table stage transition");
    next
}

fn deduplicate(
    rows: Vec<Tracked<ReviewDraft>>,
    report: &mut CleaningReport,
) -> Vec<Tracked<ReviewDraft>> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut kept = Vec::with_capacity(rows.len());
    for tracked in rows {
        let key_text = tracked
            .row
            .review_text
            .as_deref()
            .map(clean_text)
            .unwrap_or_default();
        if key_text.is_empty() || seen.insert((tracked.row.app.clone(), key_text)) {
            kept.push(tracked);
        } else {
            report.app(&tracked.row.app).duplicates += 1;
        }
    }
    kept
}

fn drop_missing(rows: Vec<Tracked<ReviewDraft>>, report: &mut CleaningReport) -> Vec<Tracked<ValidRow>> {
    let mut kept = Vec::with_capacity(rows.len());
    for Tracked { position, row } in rows {
        let text = row
            .review_text
            .filter(|t| !clean_text(t).is_empty());
        let rating = row.rating.as_deref().and_then(coerce_rating);
        match (text, rating) {
            (Some(review_text), Some(rating)) => kept.push(Tracked {
                position,
                row: ValidRow {
                    app: row.app,
                    review_text,
                    rating,
                    date: row.date,
                },
            }),
            _ => {
                debug!(position, app = %row.app, "dropping row with missing text or rating");
                report.app(&row.app).dropped_missing += 1;
            }
        }
    }
    kept
}

fn normalize_dates(rows: Vec<Tracked<ValidRow>>) -> Result<Vec<Tracked<DatedRow>>, ValidationError> {
    let mut dated = Vec::with_capacity(rows.len());
    let mut invalid = Vec::new();
    for Tracked { position, row } in rows {
        match row.date.as_deref().and_then(parse_review_date) {
            Some(date) => dated.push(Tracked {
                position,
                row: DatedRow {
                    app: row.app,
                    review_text: row.review_text,
                    rating: row.rating,
                    date,
                },
            }),
            None => invalid.push(InvalidDateRow {
                position,
                app: row.app,
                raw_date: row.date,
            }),
        }
    }
    if !invalid.is_empty() {
        warn!(rows = invalid.len(), "date normalization failed");
        return Err(ValidationError { rows: invalid });
    }
    Ok(dated)
}

pub fn draft_from_canonical(row: &CanonicalReview) -> ReviewDraft {
    ReviewDraft {
        app: row.app.clone(),
        review_text: Some(row.review_text.clone()),
        rating: Some(row.rating.to_string()),
        date: Some(row.date_string()),
    }
}
