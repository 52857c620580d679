//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kb_chat::config::Config;
use kb_chat::error::{Error, Result};
use kb_chat::memory::InMemoryConversationStore;
use kb_chat::models::{
    ConversationFilter, ConversationRecord, DataSourceSummary, HitLocation, IngestionJob,
    ObjectSummary, RetrievalHit,
};
use kb_chat::traits::{
    BlobStore, ConversationStore, DeploymentService, DocumentFetcher, IngestionService,
    KnowledgeBase, LanguageModel, Services, UrlPresigner,
};

pub const MODEL_ID: &str = "anthropic.claude-3-haiku-20240307-v1:0";

// ─── Retrieval and generation ───────────────────────────────────────

pub enum Retrieval {
    Hits(Vec<RetrievalHit>),
    MissingId,
    Outage,
}

pub struct FakeKnowledgeBase {
    pub retrieval: Retrieval,
}

#[async_trait]
impl KnowledgeBase for FakeKnowledgeBase {
    fn id(&self) -> Option<&str> {
        match self.retrieval {
            Retrieval::MissingId => None,
            _ => Some("KB123"),
        }
    }

    async fn retrieve(&self, _query: &str, max_results: u32) -> Result<Vec<RetrievalHit>> {
        match self.retrieval {
            Retrieval::Hits(ref hits) => Ok(hits.iter().take(max_results as usize).cloned().collect()),
            Retrieval::MissingId => Err(Error::config("KNOWLEDGE_BASE_ID is not set")),
            Retrieval::Outage => Err(Error::upstream_status("bedrock", 503, "throttled")),
        }
    }
}

/// Replies with a fixed answer, or fails when `reply` is `None`.
pub struct FakeModel {
    pub reply: Option<String>,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeModel {
    pub fn answering(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    fn model_id(&self) -> &str {
        MODEL_ID
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply
            .clone()
            .ok_or_else(|| Error::upstream_status("bedrock", 500, "model unavailable"))
    }
}

pub struct FakePresigner;

impl UrlPresigner for FakePresigner {
    fn presign_get(&self, s3_uri: &str, _expires_in: Duration) -> Result<String> {
        let (bucket, key) = s3_uri
            .strip_prefix("s3://")
            .and_then(|rest| rest.split_once('/'))
            .ok_or_else(|| Error::validation("not an s3 uri"))?;
        Ok(format!(
            "https://{}.s3.amazonaws.com/{}?X-Amz-Signature=fake",
            bucket, key
        ))
    }
}

// ─── Conversation log ───────────────────────────────────────────────

/// A conversation table that rejects every write and read.
pub struct UnavailableConversationStore;

#[async_trait]
impl ConversationStore for UnavailableConversationStore {
    async fn put(&self, _record: &ConversationRecord) -> Result<()> {
        Err(Error::Persistence("table unavailable".into()))
    }

    async fn scan(&self, _filter: &ConversationFilter) -> Result<Vec<ConversationRecord>> {
        Err(Error::Persistence("table unavailable".into()))
    }
}

// ─── Blob store ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
    pub metadata: Vec<(String, String)>,
}

#[derive(Default)]
pub struct FakeBlobStore {
    pub objects: Mutex<BTreeMap<String, StoredObject>>,
}

impl FakeBlobStore {
    pub fn with(objects: &[(&str, &[u8])]) -> Self {
        let store = Self::default();
        {
            let mut map = store.objects.lock().unwrap();
            for (key, body) in objects {
                map.insert(
                    key.to_string(),
                    StoredObject {
                        body: body.to_vec(),
                        content_type: "application/octet-stream".into(),
                        metadata: Vec::new(),
                    },
                );
            }
        }
        store
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl BlobStore for FakeBlobStore {
    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get(key).map(|o| o.body))
    }

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: &[(String, String)],
    ) -> Result<()> {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
                metadata: metadata.to_vec(),
            },
        );
        Ok(())
    }

    async fn list_objects(&self, prefix: &str, delimiter: Option<&str>) -> Result<Vec<ObjectSummary>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| match delimiter {
                Some(d) => !key[prefix.len()..].contains(d),
                None => true,
            })
            .map(|(key, object)| ObjectSummary {
                key: key.clone(),
                size: object.body.len() as i64,
            })
            .collect())
    }

    async fn copy_object(
        &self,
        source_key: &str,
        dest_key: &str,
        metadata: &[(String, String)],
    ) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        let source = objects
            .get(source_key)
            .cloned()
            .ok_or_else(|| Error::upstream_status("s3", 404, "NoSuchKey"))?;
        objects.insert(
            dest_key.to_string(),
            StoredObject {
                metadata: metadata.to_vec(),
                ..source
            },
        );
        Ok(())
    }
}

// ─── Ingestion ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeIngestion {
    pub data_sources: Vec<DataSourceSummary>,
    /// Data source ids whose job start fails.
    pub failing: Vec<String>,
    /// Status reported by `get_ingestion_job`.
    pub job_status: String,
    pub started: Mutex<Vec<(String, String)>>,
}

impl FakeIngestion {
    pub fn with_sources(names: &[(&str, &str)]) -> Self {
        Self {
            data_sources: names
                .iter()
                .map(|(id, name)| DataSourceSummary {
                    data_source_id: id.to_string(),
                    name: name.to_string(),
                    status: Some("AVAILABLE".into()),
                })
                .collect(),
            job_status: "IN_PROGRESS".into(),
            ..Default::default()
        }
    }

    pub fn started(&self) -> Vec<(String, String)> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl IngestionService for FakeIngestion {
    async fn start_ingestion_job(&self, data_source_id: &str, description: &str) -> Result<IngestionJob> {
        if self.failing.iter().any(|id| id == data_source_id) {
            return Err(Error::upstream_status("bedrock", 409, "ConflictException"));
        }
        let mut started = self.started.lock().unwrap();
        started.push((data_source_id.to_string(), description.to_string()));
        Ok(IngestionJob {
            ingestion_job_id: format!("job-{}-{}", data_source_id, started.len()),
            data_source_id: Some(data_source_id.to_string()),
            status: "STARTING".into(),
        })
    }

    async fn get_ingestion_job(&self, data_source_id: &str, job_id: &str) -> Result<IngestionJob> {
        Ok(IngestionJob {
            ingestion_job_id: job_id.to_string(),
            data_source_id: Some(data_source_id.to_string()),
            status: self.job_status.clone(),
        })
    }

    async fn list_data_sources(&self) -> Result<Vec<DataSourceSummary>> {
        Ok(self.data_sources.clone())
    }
}

/// Serves canned downloads; unknown URLs fail with 404.
#[derive(Default)]
pub struct FakeFetcher {
    pub pages: HashMap<String, (Vec<u8>, Option<String>)>,
}

impl FakeFetcher {
    pub fn with(pages: &[(&str, &[u8], Option<&str>)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(url, body, ct)| (url.to_string(), (body.to_vec(), ct.map(str::to_string))))
                .collect(),
        }
    }
}

#[async_trait]
impl DocumentFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<(Vec<u8>, Option<String>)> {
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| Error::upstream_status("http", 404, format!("{} not found", url)))
    }
}

// ─── Deployment ─────────────────────────────────────────────────────

pub enum DeployOutcome {
    Started(&'static str),
    Fails(u16),
}

pub struct FakeHosting {
    pub outcome: DeployOutcome,
    pub calls: Mutex<Vec<(String, String, String)>>,
}

impl FakeHosting {
    pub fn new(outcome: DeployOutcome) -> Self {
        Self {
            outcome,
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DeploymentService for FakeHosting {
    async fn start_deployment(&self, app_id: &str, branch: &str, source_url: &str) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((app_id.into(), branch.into(), source_url.into()));
        match self.outcome {
            DeployOutcome::Started(job) => Ok(job.to_string()),
            DeployOutcome::Fails(status) => {
                Err(Error::upstream_status("amplify", status, "request rejected"))
            }
        }
    }
}

// ─── Wiring ─────────────────────────────────────────────────────────

/// A `Services` bundle plus handles on the fakes for inspection.
pub struct TestEnv {
    pub services: Services,
    pub model: Arc<FakeModel>,
    pub conversations: Arc<InMemoryConversationStore>,
    pub documents: Arc<FakeBlobStore>,
    pub ingestion: Arc<FakeIngestion>,
}

pub struct TestEnvBuilder {
    retrieval: Retrieval,
    model: FakeModel,
    documents: FakeBlobStore,
    ingestion: FakeIngestion,
    fetcher: FakeFetcher,
}

impl TestEnvBuilder {
    pub fn new() -> Self {
        Self {
            retrieval: Retrieval::Hits(Vec::new()),
            model: FakeModel::answering("Most healthy adults can donate."),
            documents: FakeBlobStore::default(),
            ingestion: FakeIngestion::default(),
            fetcher: FakeFetcher::default(),
        }
    }

    pub fn retrieval(mut self, retrieval: Retrieval) -> Self {
        self.retrieval = retrieval;
        self
    }

    pub fn model(mut self, model: FakeModel) -> Self {
        self.model = model;
        self
    }

    pub fn documents(mut self, documents: FakeBlobStore) -> Self {
        self.documents = documents;
        self
    }

    pub fn ingestion(mut self, ingestion: FakeIngestion) -> Self {
        self.ingestion = ingestion;
        self
    }

    pub fn fetcher(mut self, fetcher: FakeFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn build(self) -> TestEnv {
        let model = Arc::new(self.model);
        let conversations = Arc::new(InMemoryConversationStore::new());
        let documents = Arc::new(self.documents);
        let ingestion = Arc::new(self.ingestion);
        let services = Services {
            knowledge_base: Arc::new(FakeKnowledgeBase {
                retrieval: self.retrieval,
            }),
            model: model.clone(),
            presigner: Arc::new(FakePresigner),
            conversations: conversations.clone(),
            documents: documents.clone(),
            ingestion: ingestion.clone(),
            fetcher: Arc::new(self.fetcher),
        };
        TestEnv {
            services,
            model,
            conversations,
            documents,
            ingestion,
        }
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.chat.knowledge_base_id = Some("KB123".into());
    config.ingestion.documents_bucket = Some("docs-bucket".into());
    config
}

pub fn s3_hit(uri: &str, content: &str, score: f64) -> RetrievalHit {
    RetrievalHit {
        content: content.into(),
        location: Some(HitLocation::S3 { uri: uri.into() }),
        score: Some(score),
        ..Default::default()
    }
}

pub fn web_hit(url: &str, title: &str, content: &str, score: f64) -> RetrievalHit {
    let mut hit = RetrievalHit {
        content: content.into(),
        location: Some(HitLocation::Web { url: url.into() }),
        score: Some(score),
        ..Default::default()
    };
    hit.metadata
        .insert("title".into(), serde_json::Value::String(title.into()));
    hit
}
