//! Field mapping from the raw record shapes seen across sources into `ReviewDraft`.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use arv_core::{RawReviewRecord, ReviewDraft};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tracing::warn;

pub const REVIEW_TEXT_FIELDS: &[&str] = &["content", "review", "text", "review_text"];
pub const RATING_FIELDS: &[&str] = &["score", "rating"];
pub const DATE_FIELDS: &[&str] = &["at", "date", "timestamp"];

const APP_COLUMNS: &[&str] = &["app", "app_name"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("raw review is a JSON {0}, expected an object")]
    NotAnObject(&'static str),
    #[error("raw review has no recognizable fields (keys: {keys:?})")]
    Unrecognized { keys: Vec<String> },
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

fn scalar_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn first_present(object: &Map<String, JsonValue>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find_map(scalar_text)
}

fn has_any(object: &Map<String, JsonValue>, keys: &[&str]) -> bool {
    keys.iter().any(|key| object.contains_key(*key))
}

/// Map one raw record onto canonical field names.
pub fn normalize(raw: &RawReviewRecord, app_label: &str) -> Result<ReviewDraft, FormatError> {
    let object = raw
        .as_value()
        .as_object()
        .ok_or_else(|| FormatError::NotAnObject(json_kind(raw.as_value())))?;

    if !has_any(object, REVIEW_TEXT_FIELDS)
        && !has_any(object, RATING_FIELDS)
        && !has_any(object, DATE_FIELDS)
    {
        return Err(FormatError::Unrecognized {
            keys: object.keys().cloned().collect(),
        });
    }

    Ok(ReviewDraft {
        app: app_label.to_string(),
        review_text: first_present(object, REVIEW_TEXT_FIELDS),
        rating: first_present(object, RATING_FIELDS),
        date: first_present(object, DATE_FIELDS),
    })
}

#[derive(Debug, Clone, Default)]
pub struct RawTableLoad {
    pub drafts: Vec<ReviewDraft>,
    pub rejected_rows: usize,
}

pub fn load_raw_table(path: impl AsRef<Path>, tracked_apps: &BTreeSet<String>) -> Result<RawTableLoad> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening raw table {}", path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("reading header of {}", path.display()))?
        .clone();
    let app_idx = headers
        .iter()
        .position(|h| APP_COLUMNS.contains(&h.trim()))
        .with_context(|| format!("{} has no app column", path.display()))?;

    let mut load = RawTableLoad::default();
    for (row_no, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading row {} of {}", row_no + 1, path.display()))?;
        let app = record.get(app_idx).unwrap_or_default().trim().to_string();
        if app.is_empty() || !tracked_apps.contains(&app) {
            warn!(row = row_no + 1, app = %app, "skipping raw row for untracked app");
            load.rejected_rows += 1;
            continue;
        }

        let fields = headers
            .iter()
            .zip(record.iter())
            .enumerate()
            .filter(|(idx, _)| *idx != app_idx)
            .map(|(_, (header, value))| (header.trim().to_string(), JsonValue::from(value)))
            .collect::<Map<_, _>>();

        match normalize(&RawReviewRecord::new(JsonValue::Object(fields)), &app) {
            Ok(draft) => load.drafts.push(draft),
            Err(err) => {
                warn!(row = row_no + 1, app = %app, error = %err, "dropping unrecognizable raw row");
                load.rejected_rows += 1;
            }
        }
    }
    Ok(load)
}
