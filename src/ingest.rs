//! Ingestion trigger.
//!
//! Prepares the document corpus in the blob store and starts knowledge base
//! ingestion jobs. Invoked by a scheduler, by `kbchat ingest`, or through
//! `POST /admin/sync`.
//!
//! # Steps
//!
//! 1. For `initial`/`manual` syncs of the `s3` source: download every PDF
//!    listed in `urls.txt` into `pdfs/`, then copy hand-uploaded PDFs from
//!    `data-sources/` into `pdfs/`.
//! 2. Note any URLs handed in for the web source; the web crawler data
//!    source fetches them itself.
//! 3. Start one ingestion job per selected data source.
//!
//! Individual download, copy, or job-start failures are logged and counted
//! out of the summary; they never abort the run.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::iso_timestamp;
use crate::traits::{BlobStore, DocumentFetcher, IngestionService, Services};

/// Keys checked, in order, for the list of PDF URLs.
pub const URL_LIST_KEYS: [&str; 2] = ["data-sources/urls.txt", "documents/urls.txt"];
pub const MANUAL_UPLOAD_PREFIX: &str = "data-sources/";
pub const PDF_PREFIX: &str = "pdfs/";
const DATA_SOURCE_TAG: &str = "s3_bedrock_automation";
const MAX_NAME_LEN: usize = 100;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    Initial,
    #[default]
    Manual,
    Daily,
}

impl SyncType {
    fn as_str(self) -> &'static str {
        match self {
            SyncType::Initial => "initial",
            SyncType::Manual => "manual",
            SyncType::Daily => "daily",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceType {
    #[default]
    Both,
    S3,
    Web,
}

impl DataSourceType {
    fn includes_s3(self) -> bool {
        matches!(self, DataSourceType::Both | DataSourceType::S3)
    }

    fn includes_web(self) -> bool {
        matches!(self, DataSourceType::Both | DataSourceType::Web)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IngestRequest {
    pub sync_type: SyncType,
    pub data_source_type: DataSourceType,
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestionResults {
    pub s3_ingestion_job: Option<String>,
    pub web_ingestion_job: Option<String>,
    pub daily_sync_job: Option<String>,
    pub pdfs_processed: usize,
    pub manual_pdfs_processed: usize,
    pub urls_noted: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionSummary {
    pub message: String,
    pub sync_type: SyncType,
    pub data_source_type: DataSourceType,
    pub results: IngestionResults,
    pub timestamp: String,
}

/// Run the ingestion trigger end to end.
pub async fn run_ingestion(
    config: &Config,
    services: &Services,
    request: IngestRequest,
) -> Result<IngestionSummary> {
    info!(
        sync_type = request.sync_type.as_str(),
        data_source_type = ?request.data_source_type,
        urls = request.urls.len(),
        "starting data ingestion"
    );
    let mut results = IngestionResults::default();

    if matches!(request.sync_type, SyncType::Initial | SyncType::Manual)
        && request.data_source_type.includes_s3()
    {
        if config.ingestion.documents_bucket.is_none() {
            return Err(Error::config("DOCUMENTS_BUCKET is not set"));
        }
        results.pdfs_processed =
            process_listed_pdfs(services.documents.as_ref(), services.fetcher.as_ref()).await;
        results.manual_pdfs_processed = process_manual_pdfs(services.documents.as_ref()).await;
        info!(
            downloaded = results.pdfs_processed,
            manual = results.manual_pdfs_processed,
            "pdf processing complete"
        );
    }

    if !request.urls.is_empty() && request.data_source_type.includes_web() {
        info!(urls = ?request.urls, "urls left to the web crawler data source");
        results.urls_noted = request.urls.len();
    }

    let ingestion = services.ingestion.as_ref();
    let ids = &config.ingestion;
    let sync = request.sync_type.as_str();

    if request.data_source_type.includes_s3() {
        if let Some(ds) = ids.default_data_source_id() {
            results.s3_ingestion_job = start_job(
                ingestion,
                ds,
                &format!("{} ingestion of PDF documents", sync),
            )
            .await;
        }
    }

    if request.data_source_type.includes_web() {
        match (request.sync_type, &ids.daily_sync_data_source_id, &ids.web_data_source_id) {
            (SyncType::Daily, Some(ds), _) => {
                results.daily_sync_job = start_job(
                    ingestion,
                    ds,
                    "Daily sync of specific blood donation pages",
                )
                .await;
            }
            (_, _, Some(ds)) => {
                results.web_ingestion_job = start_job(
                    ingestion,
                    ds,
                    &format!("{} crawling of America's Blood Centers websites", sync),
                )
                .await;
            }
            _ => warn!("no web data source configured, skipping web ingestion"),
        }
    }

    Ok(IngestionSummary {
        message: "Data ingestion completed successfully".to_string(),
        sync_type: request.sync_type,
        data_source_type: request.data_source_type,
        results,
        timestamp: iso_timestamp(Utc::now()),
    })
}

async fn start_job(
    ingestion: &dyn IngestionService,
    data_source_id: &str,
    description: &str,
) -> Option<String> {
    match ingestion.start_ingestion_job(data_source_id, description).await {
        Ok(job) => {
            info!(data_source_id, job_id = %job.ingestion_job_id, "started ingestion job");
            Some(job.ingestion_job_id)
        }
        Err(e) => {
            error!(data_source_id, error = %e, "failed to start ingestion job");
            None
        }
    }
}

// ============ PDF corpus ============

/// Extract PDF URLs from a `urls.txt` body: one per line, `#` comments and
/// non-HTTP lines ignored.
pub fn parse_pdf_urls(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| line.starts_with("http") && line.to_lowercase().ends_with(".pdf"))
        .map(str::to_string)
        .collect()
}

async fn read_url_list(store: &dyn BlobStore) -> Vec<String> {
    for key in URL_LIST_KEYS {
        match store.get_object(key).await {
            Ok(Some(body)) => {
                let urls = parse_pdf_urls(&String::from_utf8_lossy(&body));
                info!(key, urls = urls.len(), "read pdf url list");
                return urls;
            }
            Ok(None) => continue,
            Err(e) => {
                error!(key, error = %e, "failed to read pdf url list");
                return Vec::new();
            }
        }
    }
    warn!("urls.txt not found in documents bucket");
    Vec::new()
}

/// Object-key-safe name for a URL: host and path with `/` and `.` replaced
/// by `_`, at most 100 characters.
pub fn safe_filename(url: &str) -> String {
    let raw = match url::Url::parse(url) {
        Ok(parsed) => format!("{}{}", parsed.host_str().unwrap_or_default(), parsed.path()),
        Err(_) => url.to_string(),
    };
    raw.replace(['/', '.'], "_").chars().take(MAX_NAME_LEN).collect()
}

/// Human title from a PDF URL's file name: extension dropped, dashes and
/// underscores as spaces, each word capitalized.
pub fn title_from_url(url: &str) -> String {
    let file = url.rsplit('/').next().unwrap_or(url);
    let spaced = file.replace(".pdf", "").replace(['-', '_'], " ");
    let title = spaced
        .split_whitespace()
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ");
    let title: String = title.chars().take(MAX_NAME_LEN).collect();
    if title.is_empty() {
        "Blood Centers Document".to_string()
    } else {
        title
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn is_pdf_response(url: &str, content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.to_lowercase().starts_with("application/pdf"))
        || url.to_lowercase().ends_with(".pdf")
}

/// Download each listed PDF into `pdfs/`. Returns the number stored.
async fn process_listed_pdfs(store: &dyn BlobStore, fetcher: &dyn DocumentFetcher) -> usize {
    let urls = read_url_list(store).await;
    if urls.is_empty() {
        warn!("no pdf urls to process");
        return 0;
    }

    let mut processed = 0;
    let mut failed = 0;
    for url in &urls {
        match store_pdf(store, fetcher, url).await {
            Ok(key) => {
                info!(url = %url, key = %key, "stored pdf");
                processed += 1;
            }
            Err(e) => {
                error!(url = %url, error = %e, "failed to process pdf");
                failed += 1;
            }
        }
    }
    info!(processed, failed, "downloaded pdfs");
    processed
}

async fn store_pdf(store: &dyn BlobStore, fetcher: &dyn DocumentFetcher, url: &str) -> Result<String> {
    let (body, content_type) = fetcher.fetch(url).await?;
    if body.is_empty() || !is_pdf_response(url, content_type.as_deref()) {
        return Err(Error::validation(format!("{} did not return a pdf", url)));
    }

    let key = format!("{}{}.pdf", PDF_PREFIX, safe_filename(url));
    let metadata = vec![
        ("source_url".to_string(), url.to_string()),
        ("download_date".to_string(), iso_timestamp(Utc::now())),
        ("content_type".to_string(), "pdf_document".to_string()),
        ("title".to_string(), title_from_url(url)),
        ("data_source".to_string(), DATA_SOURCE_TAG.to_string()),
    ];
    store
        .put_object(&key, body, "application/pdf", &metadata)
        .await?;
    Ok(key)
}

/// Copy PDFs uploaded directly under `data-sources/` into `pdfs/`.
async fn process_manual_pdfs(store: &dyn BlobStore) -> usize {
    let objects = match store.list_objects(MANUAL_UPLOAD_PREFIX, Some("/")).await {
        Ok(objects) => objects,
        Err(e) => {
            error!(error = %e, "failed to list manual pdfs");
            return 0;
        }
    };

    let mut processed = 0;
    for object in objects
        .iter()
        .filter(|o| o.key.to_lowercase().ends_with(".pdf"))
    {
        let file = object.key.rsplit('/').next().unwrap_or(&object.key);
        let dest = format!("{}{}", PDF_PREFIX, file);
        let metadata = vec![
            ("source".to_string(), "manual_upload".to_string()),
            ("original_key".to_string(), object.key.clone()),
            ("processed_date".to_string(), iso_timestamp(Utc::now())),
            ("data_source".to_string(), DATA_SOURCE_TAG.to_string()),
        ];
        match store.copy_object(&object.key, &dest, &metadata).await {
            Ok(()) => {
                info!(from = %object.key, to = %dest, size = object.size, "copied manual pdf");
                processed += 1;
            }
            Err(e) => error!(key = %object.key, error = %e, "failed to copy manual pdf"),
        }
    }
    processed
}

// ============ HTTP fetcher ============

/// Downloads documents over HTTP(S) with a browser user agent.
pub struct HttpDocumentFetcher {
    client: reqwest::Client,
}

impl HttpDocumentFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .user_agent(BROWSER_USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DocumentFetcher for HttpDocumentFetcher {
    async fn fetch(&self, url: &str) -> Result<(Vec<u8>, Option<String>)> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();
        Ok((body, content_type))
    }
}
