//! Integration tests for the sync and deployment triggers.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{
    test_config, DeployOutcome, FakeBlobStore, FakeFetcher, FakeHosting, FakeIngestion,
    TestEnvBuilder,
};
use kb_chat::config::{Config, DeployConfig};
use kb_chat::error::Error;
use kb_chat::ingest::{run_ingestion, DataSourceType, IngestRequest, SyncType};
use kb_chat::{deploy, sync_ops};

const GUIDE_URL: &str = "https://americasblood.org/wp-content/uploads/donor-eligibility-guide.pdf";
const MISSING_URL: &str = "https://americasblood.org/wp-content/uploads/retired.pdf";

fn ingestion_config() -> Config {
    let mut config = test_config();
    config.ingestion.s3_data_source_id = Some("S3DS".into());
    config.ingestion.web_data_source_id = Some("WEB1".into());
    config
}

fn request(sync_type: SyncType, data_source_type: DataSourceType) -> IngestRequest {
    IngestRequest {
        sync_type,
        data_source_type,
        urls: Vec::new(),
    }
}

fn metadata_value<'a>(metadata: &'a [(String, String)], key: &str) -> Option<&'a str> {
    metadata
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

// ─── Ingestion ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_initial_ingestion_downloads_copies_and_starts_jobs() {
    let url_list = format!("# donor PDFs\n{}\n{}\nhttps://americasblood.org/about\n", GUIDE_URL, MISSING_URL);
    let env = TestEnvBuilder::new()
        .documents(FakeBlobStore::with(&[
            ("data-sources/urls.txt", url_list.as_bytes()),
            ("data-sources/board-minutes.pdf", b"%PDF-1.7 manual"),
            ("data-sources/archive/old.pdf", b"%PDF-1.2 nested"),
        ]))
        .fetcher(FakeFetcher::with(&[(
            GUIDE_URL,
            b"%PDF-1.4 guide",
            Some("application/pdf"),
        )]))
        .ingestion(FakeIngestion::with_sources(&[]))
        .build();

    let mut req = request(SyncType::Initial, DataSourceType::Both);
    req.urls = vec!["https://americasblood.org/".into()];
    let summary = run_ingestion(&ingestion_config(), &env.services, req)
        .await
        .unwrap();

    assert_eq!(summary.message, "Data ingestion completed successfully");
    assert_eq!(summary.results.pdfs_processed, 1);
    assert_eq!(summary.results.manual_pdfs_processed, 1);
    assert_eq!(summary.results.urls_noted, 1);
    assert_eq!(summary.results.s3_ingestion_job.as_deref(), Some("job-S3DS-1"));
    assert_eq!(summary.results.web_ingestion_job.as_deref(), Some("job-WEB1-2"));
    assert_eq!(summary.results.daily_sync_job, None);

    let stored = env
        .documents
        .get("pdfs/americasblood_org_wp-content_uploads_donor-eligibility-guide_pdf.pdf")
        .expect("downloaded pdf stored");
    assert_eq!(stored.body, b"%PDF-1.4 guide");
    assert_eq!(stored.content_type, "application/pdf");
    assert_eq!(metadata_value(&stored.metadata, "title"), Some("Donor Eligibility Guide"));
    assert_eq!(metadata_value(&stored.metadata, "source_url"), Some(GUIDE_URL));
    assert_eq!(metadata_value(&stored.metadata, "data_source"), Some("s3_bedrock_automation"));

    let copied = env.documents.get("pdfs/board-minutes.pdf").expect("manual pdf copied");
    assert_eq!(copied.body, b"%PDF-1.7 manual");
    assert_eq!(metadata_value(&copied.metadata, "source"), Some("manual_upload"));
    assert_eq!(
        metadata_value(&copied.metadata, "original_key"),
        Some("data-sources/board-minutes.pdf")
    );
    assert!(env.documents.get("pdfs/old.pdf").is_none());

    let started = env.ingestion.started();
    assert_eq!(
        started,
        vec![
            ("S3DS".to_string(), "initial ingestion of PDF documents".to_string()),
            (
                "WEB1".to_string(),
                "initial crawling of America's Blood Centers websites".to_string()
            ),
        ]
    );
}

#[tokio::test]
async fn test_url_list_falls_back_to_documents_prefix() {
    let env = TestEnvBuilder::new()
        .documents(FakeBlobStore::with(&[(
            "documents/urls.txt",
            GUIDE_URL.as_bytes(),
        )]))
        .fetcher(FakeFetcher::with(&[(GUIDE_URL, b"%PDF-1.4", None)]))
        .ingestion(FakeIngestion::with_sources(&[]))
        .build();

    let summary = run_ingestion(
        &ingestion_config(),
        &env.services,
        request(SyncType::Manual, DataSourceType::S3),
    )
    .await
    .unwrap();

    assert_eq!(summary.results.pdfs_processed, 1);
    assert_eq!(summary.results.web_ingestion_job, None);
    assert_eq!(env.ingestion.started().len(), 1);
}

#[tokio::test]
async fn test_non_pdf_download_is_skipped() {
    let html_url = "https://americasblood.org/eligibility";
    let pdf_like = "https://americasblood.org/files/report.pdf";
    let env = TestEnvBuilder::new()
        .documents(FakeBlobStore::with(&[(
            "data-sources/urls.txt",
            format!("{}\n{}\n", html_url, pdf_like).as_bytes(),
        )]))
        .fetcher(FakeFetcher::with(&[(pdf_like, b"", Some("application/pdf"))]))
        .build();

    let summary = run_ingestion(
        &test_config(),
        &env.services,
        request(SyncType::Manual, DataSourceType::S3),
    )
    .await
    .unwrap();

    // The page is filtered out of the list and the PDF body is empty.
    assert_eq!(summary.results.pdfs_processed, 0);
    assert!(env.ingestion.started().is_empty());
}

#[tokio::test]
async fn test_daily_ingestion_uses_daily_source() {
    let mut config = ingestion_config();
    config.ingestion.daily_sync_data_source_id = Some("DAILY".into());
    let env = TestEnvBuilder::new()
        .ingestion(FakeIngestion::with_sources(&[]))
        .build();

    let summary = run_ingestion(&config, &env.services, request(SyncType::Daily, DataSourceType::Web))
        .await
        .unwrap();

    assert_eq!(summary.results.daily_sync_job.as_deref(), Some("job-DAILY-1"));
    assert_eq!(summary.results.web_ingestion_job, None);
    assert_eq!(summary.results.s3_ingestion_job, None);
    assert_eq!(summary.results.pdfs_processed, 0);
    assert_eq!(
        env.ingestion.started()[0].1,
        "Daily sync of specific blood donation pages"
    );
}

#[tokio::test]
async fn test_failed_job_start_is_reported_as_missing() {
    let mut ingestion = FakeIngestion::with_sources(&[]);
    ingestion.failing = vec!["S3DS".into()];
    let env = TestEnvBuilder::new().ingestion(ingestion).build();

    let summary = run_ingestion(
        &ingestion_config(),
        &env.services,
        request(SyncType::Manual, DataSourceType::Both),
    )
    .await
    .unwrap();

    assert_eq!(summary.results.s3_ingestion_job, None);
    assert_eq!(summary.results.web_ingestion_job.as_deref(), Some("job-WEB1-1"));
}

#[tokio::test]
async fn test_pdf_processing_requires_bucket() {
    let mut config = ingestion_config();
    config.ingestion.documents_bucket = None;
    let env = TestEnvBuilder::new().build();

    let err = run_ingestion(&config, &env.services, request(SyncType::Initial, DataSourceType::Both))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    // Web-only runs never touch the bucket.
    let summary = run_ingestion(&config, &env.services, request(SyncType::Manual, DataSourceType::Web))
        .await
        .unwrap();
    assert_eq!(summary.results.web_ingestion_job.as_deref(), Some("job-WEB1-1"));
}

// ─── Workflow sync operations ───────────────────────────────────────

fn knowledge_base_sources() -> FakeIngestion {
    FakeIngestion::with_sources(&[
        ("DS-PDF", "BloodCentersDocuments"),
        ("DS-DAILY", "BloodCentersWebsiteDailySync-v2"),
        ("DS-WEB", "BloodCentersWebsite"),
    ])
}

#[tokio::test]
async fn test_start_sync_picks_source_by_name() {
    let ingestion = knowledge_base_sources();

    let result = sync_ops::run_sync_operation(
        &ingestion,
        &json!({ "operation": "start_sync", "source_type": "web" }),
    )
    .await;
    assert_eq!(result["success"], true);
    assert_eq!(result["source_type"], "web");
    assert_eq!(result["dataSourceName"], "BloodCentersWebsite");
    assert_eq!(result["dataSourceId"], "DS-WEB");
    assert_eq!(result["jobId"], "job-DS-WEB-1");
    assert_eq!(result["status"], "STARTED");

    let result = sync_ops::run_sync_operation(
        &ingestion,
        &json!({ "operation": "start_sync", "source_type": "daily" }),
    )
    .await;
    assert_eq!(result["dataSourceId"], "DS-DAILY");
    assert!(ingestion.started()[1].1.starts_with("Step Functions sync - daily - "));
}

#[tokio::test]
async fn test_start_sync_without_sources() {
    let empty = FakeIngestion::default();
    let result = sync_ops::run_sync_operation(
        &empty,
        &json!({ "operation": "start_sync", "source_type": "pdf" }),
    )
    .await;
    assert_eq!(result, json!({ "success": false, "error": "No data sources found" }));

    let only_pdf = FakeIngestion::with_sources(&[("DS-PDF", "BloodCentersDocuments")]);
    let result = sync_ops::run_sync_operation(
        &only_pdf,
        &json!({ "operation": "start_sync", "source_type": "web" }),
    )
    .await;
    assert_eq!(result["error"], "No data source found for type: web");
}

#[tokio::test]
async fn test_check_status_reports_completion() {
    let mut ingestion = knowledge_base_sources();
    ingestion.job_status = "COMPLETE".into();

    let result = sync_ops::run_sync_operation(
        &ingestion,
        &json!({
            "operation": "check_status",
            "dataSourceId": "DS-PDF",
            "jobId": "J1",
            "source_type": "pdf",
        }),
    )
    .await;
    assert_eq!(result["success"], true);
    assert_eq!(result["jobId"], "J1");
    assert_eq!(result["source_type"], "pdf");
    assert_eq!(result["status"], "COMPLETE");
    assert_eq!(result["isComplete"], true);
    assert_eq!(result["isSuccess"], true);

    ingestion.job_status = "FAILED".into();
    let result = sync_ops::run_sync_operation(
        &ingestion,
        &json!({ "operation": "check_status", "dataSourceId": "DS-PDF", "jobId": "J1" }),
    )
    .await;
    assert_eq!(result["isComplete"], true);
    assert_eq!(result["isSuccess"], false);
    assert_eq!(result["source_type"], serde_json::Value::Null);
}

#[tokio::test]
async fn test_list_data_sources_by_kind() {
    let ingestion = knowledge_base_sources();
    let result = sync_ops::run_sync_operation(&ingestion, &json!({ "operation": "list_data_sources" })).await;

    assert_eq!(result["success"], true);
    let sources = &result["dataSources"];
    assert_eq!(sources["pdf"]["dataSourceId"], "DS-PDF");
    assert_eq!(sources["web"]["dataSourceId"], "DS-WEB");
    assert_eq!(sources["daily"]["dataSourceId"], "DS-DAILY");
    assert_eq!(sources["daily"]["name"], "BloodCentersWebsiteDailySync-v2");
}

#[tokio::test]
async fn test_unknown_operation() {
    let ingestion = knowledge_base_sources();
    let result = sync_ops::run_sync_operation(&ingestion, &json!({ "operation": "purge" })).await;
    assert_eq!(result["success"], false);
    assert!(result["error"]
        .as_str()
        .unwrap()
        .starts_with("Unknown operation: purge"));
    assert!(ingestion.started().is_empty());
}

// ─── Daily sync ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_daily_sync_starts_named_source() {
    let mut config = test_config();
    config.ingestion.daily_sync_data_source_name = "BloodCentersWebsiteDailySync-v2".into();
    let ingestion = knowledge_base_sources();

    let (status, body) = sync_ops::run_daily_sync(&config, &ingestion).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["ingestion_job_id"], "job-DS-DAILY-1");
    assert_eq!(body["data_source_id"], "DS-DAILY");
    assert!(ingestion.started()[0].1.starts_with("Automated daily sync - "));
}

#[tokio::test]
async fn test_daily_sync_missing_source() {
    let ingestion = FakeIngestion::with_sources(&[("DS-PDF", "BloodCentersDocuments")]);

    let (status, body) = sync_ops::run_daily_sync(&test_config(), &ingestion).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Data source BloodCentersDailySync-v2 not found");
}

// ─── Deployment ─────────────────────────────────────────────────────

fn deploy_config() -> DeployConfig {
    DeployConfig {
        amplify_app_id: Some("d2abc".into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_deploy_build_archive() {
    let hosting = FakeHosting::new(DeployOutcome::Started("42"));
    let event = json!({
        "Records": [{
            "s3": {
                "bucket": { "name": "site-builds" },
                "object": { "key": "builds/release+2024%2D06.zip" }
            }
        }]
    });

    let (status, body) = deploy::run_deploy(&deploy_config(), &hosting, &event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Amplify deployment started successfully");
    assert_eq!(body["jobId"], "42");
    assert_eq!(body["appId"], "d2abc");
    assert_eq!(body["branchName"], "main");
    assert_eq!(body["sourceUrl"], "s3://site-builds/builds/release 2024-06.zip");
    assert_eq!(body["deploymentUrl"], "https://main.d2abc.amplifyapp.com");

    let calls = hosting.calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![(
            "d2abc".to_string(),
            "main".to_string(),
            "s3://site-builds/builds/release 2024-06.zip".to_string()
        )]
    );
}

#[tokio::test]
async fn test_deploy_ignores_other_files() {
    let hosting = FakeHosting::new(DeployOutcome::Started("1"));
    let event = json!({ "bucket": "site-builds", "key": "assets/logo.png" });

    let (status, body) = deploy::run_deploy(&deploy_config(), &hosting, &event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "File ignored (not a build artifact)");
    assert_eq!(body["file"], "assets/logo.png");
    assert!(hosting.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_deploy_failures_map_to_status() {
    let event = json!({ "bucket": "site-builds", "key": "builds/site.zip" });

    let (status, body) = deploy::run_deploy(
        &deploy_config(),
        &FakeHosting::new(DeployOutcome::Fails(404)),
        &event,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Amplify app not found");
    assert_eq!(body["appId"], "d2abc");

    let (status, body) = deploy::run_deploy(
        &deploy_config(),
        &FakeHosting::new(DeployOutcome::Fails(403)),
        &event,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Unauthorized");

    let (status, body) = deploy::run_deploy(
        &deploy_config(),
        &FakeHosting::new(DeployOutcome::Fails(500)),
        &event,
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Deployment failed");
    assert_eq!(body["sourceUrl"], "s3://site-builds/builds/site.zip");
}

#[tokio::test]
async fn test_deploy_requires_app_id() {
    let hosting = FakeHosting::new(DeployOutcome::Started("1"));
    let event = json!({ "bucket": "site-builds", "key": "builds/site.zip" });

    for app_id in [None, Some("PLACEHOLDER_APP_ID".to_string())] {
        let config = DeployConfig {
            amplify_app_id: app_id,
            ..Default::default()
        };
        let (status, body) = deploy::run_deploy(&config, &hosting, &event).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "AMPLIFY_APP_ID not configured");
    }

    let (status, body) = deploy::run_deploy(&deploy_config(), &hosting, &json!({ "key": 7 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid event format");
    assert!(hosting.calls.lock().unwrap().is_empty());
}
