//! Answer assembly.
//!
//! One chat turn, end to end:
//!
//! ```text
//! question ─▶ retrieve ─▶ extract sources ─▶ build prompt ─▶ model
//!                                                              │
//!   payload ◀─ persist ◀─ locator citation ◀─ normalize ◀──────┘
//! ```
//!
//! A failing model call never fails the turn: the caller gets the fixed
//! fallback sentence for their language instead. Persistence failures are
//! logged and the turn still succeeds.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::error::{Error, Result};
use crate::markdown::{has_markdown_formatting, process_markdown_response};
use crate::models::{iso_timestamp, ConversationRecord, RetrievalHit, Source, SourceType};
use crate::prompt::{build_context_text, create_prompt, fallback_response, Language};
use crate::sources::extract_sources;
use crate::traits::Services;

pub const LOCATOR_URL: &str = "https://americasblood.org/for-donors/find-a-blood-center/";
pub const LOCATOR_TITLE: &str = "Blood Center Locator - Find a Donation Location Near You";

const LOCATION_KEYWORDS: [&str; 12] = [
    "where can i donate",
    "where to donate",
    "find blood center",
    "blood center near",
    "donation location",
    "donate near me",
    "donde puedo donar",
    "dónde puedo donar",
    "centro de sangre",
    "find a center",
    "locate blood center",
    "donation site",
];

/// Body of a chat request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMetadata {
    pub source_count: usize,
    /// Answer length in characters.
    pub response_length: usize,
    pub model: String,
    pub language: String,
    pub retrieval_results: usize,
    pub has_markdown: bool,
}

/// Reply payload for a successful chat turn.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub success: bool,
    pub message: String,
    pub sources: Vec<Source>,
    pub timestamp: String,
    pub conversation_id: String,
    pub session_id: String,
    pub metadata: ChatMetadata,
}

/// Whether the question asks where to donate.
pub fn is_location_question(message: &str) -> bool {
    let lower = message.to_lowercase();
    LOCATION_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Put the blood center locator first when the question asks where to
/// donate and no locator citation is present yet.
pub fn add_location_source_if_needed(message: &str, sources: &mut Vec<Source>) {
    if !is_location_question(message) || sources.iter().any(|s| s.url == LOCATOR_URL) {
        return;
    }
    sources.insert(
        0,
        Source {
            title: LOCATOR_TITLE.to_string(),
            url: LOCATOR_URL.to_string(),
            uri: LOCATOR_URL.to_string(),
            source_type: SourceType::Web,
            score: 1.0,
        },
    );
    info!("added blood center locator citation");
}

/// Run one chat turn.
///
/// Fails only on an empty message or a missing knowledge base id. Other
/// retrieval failures produce an answer without context.
pub async fn answer(
    services: &Services,
    config: &ChatConfig,
    request: ChatRequest,
) -> Result<ChatResponse> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err(Error::validation("Message is required"));
    }
    let language_tag = request
        .language
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| "en".to_string());
    let language = Language::from_tag(&language_tag);
    let session_id = request
        .session_id
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    info!(language = %language_tag, session_id = %session_id, "processing chat request");
    debug!(question = %message, "full question");

    let hits = retrieve(services, config, message).await?;
    let mut sources = extract_sources(
        &hits,
        services.presigner.as_ref(),
        Duration::from_secs(config.presigned_url_expiry_secs),
    );
    if sources.is_empty() && !hits.is_empty() {
        warn!(hits = hits.len(), "no sources could be extracted from retrieval hits");
    }

    let context = build_context_text(&hits);
    let prompt = create_prompt(message, &context, language);
    debug!(prompt = %prompt, "prompt");

    let raw = match services.model.generate(&prompt).await {
        Ok(text) => {
            debug!(response = %text, "model output");
            text
        }
        Err(e) => {
            warn!(error = %e, "model invocation failed, using fallback answer");
            fallback_response(language).to_string()
        }
    };
    let answer = process_markdown_response(&raw);

    add_location_source_if_needed(message, &mut sources);

    let now = Utc::now();
    let record = ConversationRecord::new(&session_id, message, &answer, &language_tag, &sources, now);
    match services.conversations.put(&record).await {
        Ok(()) => info!(conversation_id = %record.conversation_id, "saved conversation"),
        Err(e) => warn!(error = %e, "failed to save conversation"),
    }

    let model = services.model.model_id().to_string();
    info!(
        sources = sources.len(),
        response_chars = answer.chars().count(),
        model = %model,
        "chat response ready"
    );

    Ok(ChatResponse {
        success: true,
        metadata: ChatMetadata {
            source_count: sources.len(),
            response_length: answer.chars().count(),
            model,
            language: language_tag,
            retrieval_results: hits.len(),
            has_markdown: has_markdown_formatting(&answer),
        },
        message: answer,
        sources,
        timestamp: iso_timestamp(now),
        conversation_id: record.conversation_id,
        session_id,
    })
}

async fn retrieve(services: &Services, config: &ChatConfig, query: &str) -> Result<Vec<RetrievalHit>> {
    match services
        .knowledge_base
        .retrieve(query, config.number_of_results)
        .await
    {
        Ok(hits) => {
            info!(hits = hits.len(), max = config.number_of_results, "retrieved context");
            Ok(hits)
        }
        Err(e @ Error::Config(_)) => Err(e),
        Err(e) => {
            warn!(error = %e, "retrieval failed, answering without context");
            Ok(Vec::new())
        }
    }
}
