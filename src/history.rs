//! Admin listing of stored conversations.
//!
//! The store is scanned to exhaustion with the filters applied, then the
//! records are ordered newest first and one page is cut out. Paging after
//! sorting keeps page boundaries stable regardless of the store's scan
//! order.

use std::collections::HashMap;

use serde::Serialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::models::{ConversationFilter, ConversationRecord, StoredSource};
use crate::traits::ConversationStore;

pub const DEFAULT_PAGE: usize = 1;
pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 100;

/// Parsed `GET /admin/conversations` query.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationListQuery {
    pub page: usize,
    pub limit: usize,
    pub filter: ConversationFilter,
}

impl Default for ConversationListQuery {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
            filter: ConversationFilter::default(),
        }
    }
}

impl ConversationListQuery {
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        let page = parse_number(params, "page", DEFAULT_PAGE)?;
        if page < 1 {
            return Err(Error::validation("page must be at least 1"));
        }
        let limit = parse_number(params, "limit", DEFAULT_LIMIT)?;
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(Error::validation(format!(
                "limit must be between 1 and {}",
                MAX_LIMIT
            )));
        }

        let non_empty = |key: &str| params.get(key).filter(|v| !v.is_empty()).cloned();
        Ok(Self {
            page,
            limit,
            filter: ConversationFilter {
                date_prefix: non_empty("date"),
                language: non_empty("language"),
            },
        })
    }

    fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.limit)
    }
}

fn parse_number(params: &HashMap<String, String>, key: &str, default: usize) -> Result<usize> {
    match params.get(key).map(|v| v.trim()) {
        None | Some("") => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::validation(format!("{} must be a positive integer", key))),
    }
}

/// One conversation as the admin dashboard expects it. Question and answer
/// appear under two names each for older dashboard builds.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub message: String,
    pub question: String,
    pub response: String,
    pub answer: String,
    pub timestamp: String,
    pub created_at: String,
    pub date: String,
    pub language: String,
    pub sources: Vec<StoredSource>,
}

impl From<ConversationRecord> for ConversationSummary {
    fn from(record: ConversationRecord) -> Self {
        Self {
            id: record.conversation_id,
            session_id: record.session_id,
            message: record.question.clone(),
            question: record.question,
            response: record.answer.clone(),
            answer: record.answer,
            created_at: record.timestamp.clone(),
            timestamp: record.timestamp,
            date: record.date,
            language: record.language,
            sources: record.sources,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationPage {
    pub success: bool,
    pub conversations: Vec<ConversationSummary>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
}

/// Order `records` newest first and cut out the requested page.
pub fn paginate(mut records: Vec<ConversationRecord>, query: &ConversationListQuery) -> ConversationPage {
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    let total = records.len();
    let conversations = records
        .into_iter()
        .skip(query.offset())
        .take(query.limit)
        .map(ConversationSummary::from)
        .collect();

    ConversationPage {
        success: true,
        conversations,
        total,
        page: query.page,
        limit: query.limit,
        has_more: total > query.page.saturating_mul(query.limit),
    }
}

pub async fn list_conversations(
    store: &dyn ConversationStore,
    query: &ConversationListQuery,
) -> Result<ConversationPage> {
    let records = store.scan(&query.filter).await?;
    let page = paginate(records, query);
    info!(
        total = page.total,
        returned = page.conversations.len(),
        page = page.page,
        "listed conversations"
    );
    Ok(page)
}
