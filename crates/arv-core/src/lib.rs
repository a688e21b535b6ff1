//! Core domain model for app review ingestion.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CRATE_NAME: &str = "arv-core";

pub const DEFAULT_SOURCE_LABEL: &str = "Google Play";

pub const CANONICAL_COLUMNS: [&str; 5] = ["app", "review_text", "rating", "date", "source"];

pub const RAW_COLUMNS: [&str; 4] = ["app", "review_text", "rating", "date"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppTarget {
    pub label: String,
    pub package_id: String,
}

impl AppTarget {
    pub fn new(label: impl Into<String>, package_id: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            package_id: package_id.into(),
        }
    }
}

/// Opaque pagination cursor issued by a review source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContinuationToken(Vec<u8>);

impl ContinuationToken {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawReviewRecord(JsonValue);

impl RawReviewRecord {
    pub fn new(value: JsonValue) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &JsonValue {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReviewPage {
    pub records: Vec<RawReviewRecord>,
    pub next_token: Option<ContinuationToken>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDraft {
    pub app: String,
    pub review_text: Option<String>,
    pub rating: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalReview {
    pub app: String,
    pub review_text: String,
    pub rating: u8,
    pub date: NaiveDate,
    pub source: String,
}

impl CanonicalReview {
    pub fn date_string(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}
