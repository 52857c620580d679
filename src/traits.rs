//! Collaborator traits.
//!
//! Every managed service the handlers talk to sits behind one of these
//! traits. Production implementations live in [`crate::bedrock`],
//! [`crate::s3`], [`crate::dynamo`] and [`crate::amplify`]; tests supply
//! in-memory fakes.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      Services                        │
//! │  ┌───────────┐ ┌───────────┐ ┌───────────────────┐   │
//! │  │ Knowledge │ │ Language  │ │ ConversationStore │   │
//! │  │   Base    │ │   Model   │ │                   │   │
//! │  └───────────┘ └───────────┘ └───────────────────┘   │
//! │  ┌───────────┐ ┌───────────┐ ┌───────────────────┐   │
//! │  │ Presigner │ │ BlobStore │ │ IngestionService  │   │
//! │  └───────────┘ └───────────┘ └───────────────────┘   │
//! └──────────────┬───────────────────────────────────────┘
//!                ▼
//!     chat / history / ingest / sync_ops handlers
//! ```
//!
//! The bundle is built once per process and cloned into each handler;
//! there is no teardown.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::models::{
    ConversationFilter, ConversationRecord, DataSourceSummary, IngestionJob, ObjectSummary,
    RetrievalHit,
};

// ═══════════════════════════════════════════════════════════════════════
// Retrieval and generation
// ═══════════════════════════════════════════════════════════════════════

/// Vector knowledge base queried for context chunks.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Identifier reported by health checks.
    fn id(&self) -> Option<&str>;

    /// Return up to `max_results` chunks relevant to `query`, best first.
    async fn retrieve(&self, query: &str, max_results: u32) -> Result<Vec<RetrievalHit>>;
}

/// Hosted language model endpoint.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_id(&self) -> &str;

    /// Generate a completion for a single-turn prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Turns private storage addresses into links a browser can open.
pub trait UrlPresigner: Send + Sync {
    /// Sign a GET for `s3://bucket/key`, valid for `expires_in`.
    fn presign_get(&self, s3_uri: &str, expires_in: Duration) -> Result<String>;
}

// ═══════════════════════════════════════════════════════════════════════
// Persistence
// ═══════════════════════════════════════════════════════════════════════

/// Wide-column store holding chat exchanges.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Insert a record. Records are never updated.
    async fn put(&self, record: &ConversationRecord) -> Result<()>;

    /// Return every record matching `filter`, in no particular order.
    async fn scan(&self, filter: &ConversationFilter) -> Result<Vec<ConversationRecord>>;
}

/// Blob store holding the documents corpus.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch an object body. `Ok(None)` when the key does not exist.
    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: &[(String, String)],
    ) -> Result<()>;

    /// List objects under `prefix`. With a delimiter, only direct children.
    async fn list_objects(&self, prefix: &str, delimiter: Option<&str>)
        -> Result<Vec<ObjectSummary>>;

    /// Server-side copy replacing the destination's metadata.
    async fn copy_object(
        &self,
        source_key: &str,
        dest_key: &str,
        metadata: &[(String, String)],
    ) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════
// Ingestion
// ═══════════════════════════════════════════════════════════════════════

/// Knowledge base ingestion scheduling.
#[async_trait]
pub trait IngestionService: Send + Sync {
    async fn start_ingestion_job(
        &self,
        data_source_id: &str,
        description: &str,
    ) -> Result<IngestionJob>;

    async fn get_ingestion_job(&self, data_source_id: &str, job_id: &str)
        -> Result<IngestionJob>;

    async fn list_data_sources(&self) -> Result<Vec<DataSourceSummary>>;
}

/// Downloads source documents from the public web.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    /// Fetch `url`, returning the body and the reported content type.
    async fn fetch(&self, url: &str) -> Result<(Vec<u8>, Option<String>)>;
}

/// Static-site hosting that can deploy a build archive.
#[async_trait]
pub trait DeploymentService: Send + Sync {
    /// Start a deployment and return the job id.
    async fn start_deployment(&self, app_id: &str, branch: &str, source_url: &str)
        -> Result<String>;
}

// ═══════════════════════════════════════════════════════════════════════
// Bundle
// ═══════════════════════════════════════════════════════════════════════

/// All collaborators the HTTP handlers and triggers need.
#[derive(Clone)]
pub struct Services {
    pub knowledge_base: Arc<dyn KnowledgeBase>,
    pub model: Arc<dyn LanguageModel>,
    pub presigner: Arc<dyn UrlPresigner>,
    pub conversations: Arc<dyn ConversationStore>,
    pub documents: Arc<dyn BlobStore>,
    pub ingestion: Arc<dyn IngestionService>,
    pub fetcher: Arc<dyn DocumentFetcher>,
}
