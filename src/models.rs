//! Core data models.
//!
//! These types represent the retrieval hits, citations, and conversation
//! records that flow through the chat pipeline, plus the small records the
//! sync triggers exchange with the ingestion service.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Days a stored conversation lives before the store expires it.
pub const CONVERSATION_RETENTION_DAYS: i64 = 90;

/// Where a retrieved chunk came from.
#[derive(Debug, Clone, PartialEq)]
pub enum HitLocation {
    /// A private blob store object (`s3://bucket/key`).
    S3 { uri: String },
    /// A crawled public web page.
    Web { url: String },
}

/// One chunk returned by the knowledge base.
#[derive(Debug, Clone, Default)]
pub struct RetrievalHit {
    pub content: String,
    pub location: Option<HitLocation>,
    /// Collaborator-defined attributes; values are strings or numbers.
    pub metadata: Map<String, Value>,
    pub score: Option<f64>,
}

impl RetrievalHit {
    /// Metadata value as text. Numbers are rendered, anything else is ignored.
    pub fn metadata_str(&self, key: &str) -> Option<String> {
        match self.metadata.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceType {
    Document,
    Web,
}

/// A de-duplicated citation shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub title: String,
    /// Link the user can open (possibly a short-lived signed URL).
    pub url: String,
    /// Canonical origin address, used for de-duplication.
    pub uri: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub score: f64,
}

/// The part of a [`Source`] that is persisted with a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSource {
    pub title: String,
    pub url: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
}

impl From<&Source> for StoredSource {
    fn from(source: &Source) -> Self {
        Self {
            title: source.title.clone(),
            url: source.url.clone(),
            source_type: source.source_type,
        }
    }
}

/// One persisted question/answer exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub conversation_id: String,
    pub session_id: String,
    /// ISO-8601 creation time (UTC).
    pub timestamp: String,
    /// `YYYY-MM-DD` creation date, used for date filtering.
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub sources: Vec<StoredSource>,
    /// Expiry as Unix epoch seconds, enforced by the store.
    #[serde(default)]
    pub ttl: i64,
}

/// ISO-8601 UTC timestamp with microseconds and no offset suffix.
pub fn iso_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

fn default_language() -> String {
    "en".to_string()
}

impl ConversationRecord {
    /// Build a fresh record with a new id, stamped at `now`.
    pub fn new(
        session_id: &str,
        question: &str,
        answer: &str,
        language: &str,
        sources: &[Source],
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            conversation_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            timestamp: iso_timestamp(now),
            date: now.format("%Y-%m-%d").to_string(),
            question: question.to_string(),
            answer: answer.to_string(),
            language: language.to_string(),
            sources: sources.iter().map(StoredSource::from).collect(),
            ttl: (now + Duration::days(CONVERSATION_RETENTION_DAYS)).timestamp(),
        }
    }
}

/// Filters applied when listing stored conversations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationFilter {
    /// Prefix of the `date` field (`2024-06` or `2024-06-01`).
    pub date_prefix: Option<String>,
    pub language: Option<String>,
}

impl ConversationFilter {
    pub fn matches(&self, record: &ConversationRecord) -> bool {
        if let Some(ref prefix) = self.date_prefix {
            if !record.date.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(ref language) = self.language {
            if record.language != *language {
                return false;
            }
        }
        true
    }
}

/// An ingestion job as reported by the ingestion service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionJob {
    pub ingestion_job_id: String,
    #[serde(default)]
    pub data_source_id: Option<String>,
    #[serde(default)]
    pub status: String,
}

impl IngestionJob {
    pub fn is_complete(&self) -> bool {
        matches!(self.status.as_str(), "COMPLETE" | "FAILED" | "STOPPED")
    }

    pub fn is_success(&self) -> bool {
        self.status == "COMPLETE"
    }
}

/// A knowledge base data source summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceSummary {
    pub data_source_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// A blob store object listing entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: i64,
}
