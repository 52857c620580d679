//! Amazon Bedrock collaborators.
//!
//! - [`BedrockKnowledgeBase`] — `Retrieve` on the agent runtime API.
//! - [`BedrockModel`] — `InvokeModel` on the runtime API.
//! - [`BedrockAgent`] — ingestion jobs and data sources on the agent API.
//!
//! All three sign requests with the `bedrock` signing name. Request and
//! response shapes that depend on the model family are handled by the pure
//! functions [`build_model_request`] and [`parse_model_response`].

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::aws::{encode_path, AwsClient, AwsRequest};
use crate::config::ChatConfig;
use crate::error::{Error, Result};
use crate::models::{DataSourceSummary, HitLocation, IngestionJob, RetrievalHit};
use crate::traits::{IngestionService, KnowledgeBase, LanguageModel};

const SIGNING_NAME: &str = "bedrock";
const JSON: &str = "application/json";

fn require_kb_id(id: &Option<String>) -> Result<&str> {
    id.as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::config("KNOWLEDGE_BASE_ID is not set"))
}

// ═══════════════════════════════════════════════════════════════════════
// Knowledge base retrieval
// ═══════════════════════════════════════════════════════════════════════

pub struct BedrockKnowledgeBase {
    aws: AwsClient,
    knowledge_base_id: Option<String>,
}

impl BedrockKnowledgeBase {
    pub fn new(aws: AwsClient, knowledge_base_id: Option<String>) -> Self {
        Self {
            aws,
            knowledge_base_id,
        }
    }
}

#[async_trait]
impl KnowledgeBase for BedrockKnowledgeBase {
    fn id(&self) -> Option<&str> {
        self.knowledge_base_id.as_deref()
    }

    async fn retrieve(&self, query: &str, max_results: u32) -> Result<Vec<RetrievalHit>> {
        let kb_id = require_kb_id(&self.knowledge_base_id)?;
        let body = json!({
            "retrievalQuery": { "text": query },
            "retrievalConfiguration": {
                "vectorSearchConfiguration": {
                    "numberOfResults": max_results,
                    "overrideSearchType": "SEMANTIC"
                }
            }
        });

        let request = AwsRequest::new(
            Method::POST,
            SIGNING_NAME,
            self.aws.endpoint("bedrock-agent-runtime"),
            encode_path(&["knowledgebases", kb_id, "retrieve"]),
        )
        .json(&body, JSON);

        let response = self.aws.send_json(request).await?;
        Ok(parse_retrieval_results(&response))
    }
}

/// Convert a `Retrieve` response into hits, preserving order.
pub fn parse_retrieval_results(response: &Value) -> Vec<RetrievalHit> {
    let Some(results) = response.get("retrievalResults").and_then(Value::as_array) else {
        return Vec::new();
    };

    results
        .iter()
        .map(|result| {
            let content = result
                .pointer("/content/text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            let location = result.get("location").and_then(|loc| {
                if let Some(uri) = loc.pointer("/s3Location/uri").and_then(Value::as_str) {
                    Some(HitLocation::S3 {
                        uri: uri.to_string(),
                    })
                } else {
                    loc.pointer("/webLocation/url")
                        .and_then(Value::as_str)
                        .map(|url| HitLocation::Web {
                            url: url.to_string(),
                        })
                }
            });

            let metadata = result
                .get("metadata")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_else(Map::new);

            RetrievalHit {
                content,
                location,
                metadata,
                score: result.get("score").and_then(Value::as_f64),
            }
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════
// Model invocation
// ═══════════════════════════════════════════════════════════════════════

pub struct BedrockModel {
    aws: AwsClient,
    model_id: String,
    max_tokens: u32,
    temperature: f64,
}

impl BedrockModel {
    pub fn new(aws: AwsClient, chat: &ChatConfig) -> Self {
        Self {
            aws,
            model_id: chat.model_id.clone(),
            max_tokens: chat.max_tokens,
            temperature: chat.temperature,
        }
    }
}

fn is_claude(model_id: &str) -> bool {
    model_id.to_lowercase().contains("claude")
}

/// Request body for `model_id`: messages API for Claude, prompt API otherwise.
pub fn build_model_request(model_id: &str, prompt: &str, max_tokens: u32, temperature: f64) -> Value {
    if is_claude(model_id) {
        json!({
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": max_tokens,
            "temperature": temperature,
            "anthropic_version": "bedrock-2023-05-31"
        })
    } else {
        json!({
            "prompt": prompt,
            "max_gen_len": max_tokens,
            "temperature": temperature,
            "top_p": 0.9
        })
    }
}

/// Extract the generated text from an `InvokeModel` response body.
pub fn parse_model_response(model_id: &str, body: &Value) -> Result<String> {
    let text = if is_claude(model_id) {
        body.pointer("/content/0/text").and_then(Value::as_str)
    } else {
        body.get("generation")
            .and_then(Value::as_str)
            .or_else(|| body.pointer("/outputs/0/text").and_then(Value::as_str))
    };

    text.map(str::to_string).ok_or_else(|| {
        Error::upstream(
            SIGNING_NAME,
            format!("model {} returned no text", model_id),
        )
    })
}

#[async_trait]
impl LanguageModel for BedrockModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = build_model_request(&self.model_id, prompt, self.max_tokens, self.temperature);
        let request = AwsRequest::new(
            Method::POST,
            SIGNING_NAME,
            self.aws.endpoint("bedrock-runtime"),
            encode_path(&["model", &self.model_id, "invoke"]),
        )
        .header("accept", JSON)
        .json(&body, JSON);

        let response = self.aws.send_json(request).await?;
        debug!(model = %self.model_id, response = %response, "model response");
        parse_model_response(&self.model_id, &response)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Ingestion jobs and data sources
// ═══════════════════════════════════════════════════════════════════════

pub struct BedrockAgent {
    aws: AwsClient,
    knowledge_base_id: Option<String>,
}

impl BedrockAgent {
    pub fn new(aws: AwsClient, knowledge_base_id: Option<String>) -> Self {
        Self {
            aws,
            knowledge_base_id,
        }
    }

    fn job_from(response: &Value) -> Result<IngestionJob> {
        let job = response
            .get("ingestionJob")
            .cloned()
            .ok_or_else(|| Error::upstream(SIGNING_NAME, "response has no ingestionJob"))?;
        serde_json::from_value(job)
            .map_err(|e| Error::upstream(SIGNING_NAME, format!("invalid ingestionJob: {}", e)))
    }
}

#[async_trait]
impl IngestionService for BedrockAgent {
    async fn start_ingestion_job(
        &self,
        data_source_id: &str,
        description: &str,
    ) -> Result<IngestionJob> {
        let kb_id = require_kb_id(&self.knowledge_base_id)?;
        let body = json!({
            "description": description,
            "clientToken": uuid::Uuid::new_v4().to_string(),
        });
        let mut path = encode_path(&["knowledgebases", kb_id, "datasources", data_source_id, "ingestionjobs"]);
        path.push('/');

        let request = AwsRequest::new(
            Method::PUT,
            SIGNING_NAME,
            self.aws.endpoint("bedrock-agent"),
            path,
        )
        .json(&body, JSON);

        Self::job_from(&self.aws.send_json(request).await?)
    }

    async fn get_ingestion_job(&self, data_source_id: &str, job_id: &str) -> Result<IngestionJob> {
        let kb_id = require_kb_id(&self.knowledge_base_id)?;
        let request = AwsRequest::new(
            Method::GET,
            SIGNING_NAME,
            self.aws.endpoint("bedrock-agent"),
            encode_path(&[
                "knowledgebases",
                kb_id,
                "datasources",
                data_source_id,
                "ingestionjobs",
                job_id,
            ]),
        );

        Self::job_from(&self.aws.send_json(request).await?)
    }

    async fn list_data_sources(&self) -> Result<Vec<DataSourceSummary>> {
        let kb_id = require_kb_id(&self.knowledge_base_id)?;
        let mut sources = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut body = json!({ "maxResults": 100 });
            if let Some(ref token) = next_token {
                body["nextToken"] = json!(token);
            }
            let mut path = encode_path(&["knowledgebases", kb_id, "datasources"]);
            path.push('/');

            let request = AwsRequest::new(
                Method::POST,
                SIGNING_NAME,
                self.aws.endpoint("bedrock-agent"),
                path,
            )
            .json(&body, JSON);
            let response = self.aws.send_json(request).await?;

            if let Some(items) = response.get("dataSourceSummaries") {
                let batch: Vec<DataSourceSummary> = serde_json::from_value(items.clone())
                    .map_err(|e| {
                        Error::upstream(SIGNING_NAME, format!("invalid dataSourceSummaries: {}", e))
                    })?;
                sources.extend(batch);
            }

            match response.get("nextToken").and_then(Value::as_str) {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(sources)
    }
}
