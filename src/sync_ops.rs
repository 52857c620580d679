//! Sync operations for a step-orchestration workflow, plus the daily sync
//! trigger.
//!
//! A workflow drives ingestion in small steps (`start_sync`, then
//! `check_status` in a polling loop) and each step is one call here. Data
//! sources are located by naming convention:
//!
//! | Kind    | Data source name contains          |
//! |---------|------------------------------------|
//! | `pdf`   | `Documents`                        |
//! | `daily` | `DailySync`                        |
//! | `web`   | `Website`, but not `DailySync`     |
//!
//! Operation failures are reported in the payload (`success: false`), never
//! as an `Err`, so the workflow can branch on them.

use axum::http::StatusCode;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{iso_timestamp, DataSourceSummary};
use crate::traits::IngestionService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Pdf,
    Daily,
    Web,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Pdf => "pdf",
            SourceKind::Daily => "daily",
            SourceKind::Web => "web",
        }
    }

    pub fn matches(self, name: &str) -> bool {
        match self {
            SourceKind::Pdf => name.contains("Documents"),
            SourceKind::Daily => name.contains("DailySync"),
            SourceKind::Web => name.contains("Website") && !name.contains("DailySync"),
        }
    }

    /// Kind of a data source by name, checked in `pdf`, `web`, `daily` order.
    pub fn classify(name: &str) -> Option<Self> {
        [SourceKind::Pdf, SourceKind::Web, SourceKind::Daily]
            .into_iter()
            .find(|kind| kind.matches(name))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum SyncOperation {
    StartSync {
        source_type: SourceKind,
    },
    CheckStatus {
        #[serde(rename = "dataSourceId")]
        data_source_id: String,
        #[serde(rename = "jobId")]
        job_id: String,
        #[serde(default)]
        source_type: Option<String>,
    },
    ListDataSources,
}

/// Parse and run one workflow step.
pub async fn run_sync_operation(ingestion: &dyn IngestionService, event: &Value) -> Value {
    let operation = match SyncOperation::deserialize(event) {
        Ok(op) => op,
        Err(e) => {
            let name = event
                .get("operation")
                .and_then(Value::as_str)
                .unwrap_or_default();
            warn!(operation = name, error = %e, "rejected sync operation");
            return failure(format!("Unknown operation: {} ({})", name, e));
        }
    };

    let outcome = match operation {
        SyncOperation::StartSync { source_type } => start_sync(ingestion, source_type).await,
        SyncOperation::CheckStatus {
            data_source_id,
            job_id,
            source_type,
        } => check_status(ingestion, &data_source_id, &job_id, source_type).await,
        SyncOperation::ListDataSources => list_data_sources(ingestion).await,
    };

    outcome.unwrap_or_else(|e| {
        error!(error = %e, "sync operation failed");
        failure(e.to_string())
    })
}

fn failure(message: impl Into<String>) -> Value {
    json!({ "success": false, "error": message.into() })
}

async fn start_sync(ingestion: &dyn IngestionService, kind: SourceKind) -> Result<Value> {
    let sources = ingestion.list_data_sources().await?;
    if sources.is_empty() {
        return Ok(failure("No data sources found"));
    }
    let Some(target) = sources.iter().find(|ds| kind.matches(&ds.name)) else {
        return Ok(failure(format!(
            "No data source found for type: {}",
            kind.as_str()
        )));
    };

    let description = format!(
        "Step Functions sync - {} - {}",
        kind.as_str(),
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );
    let job = ingestion
        .start_ingestion_job(&target.data_source_id, &description)
        .await?;
    info!(data_source = %target.name, job_id = %job.ingestion_job_id, "started sync job");

    Ok(json!({
        "success": true,
        "source_type": kind.as_str(),
        "dataSourceName": target.name,
        "dataSourceId": target.data_source_id,
        "jobId": job.ingestion_job_id,
        "status": "STARTED",
    }))
}

async fn check_status(
    ingestion: &dyn IngestionService,
    data_source_id: &str,
    job_id: &str,
    source_type: Option<String>,
) -> Result<Value> {
    let mut job = ingestion.get_ingestion_job(data_source_id, job_id).await?;
    if job.status.is_empty() {
        job.status = "UNKNOWN".to_string();
    }
    Ok(json!({
        "success": true,
        "source_type": source_type,
        "jobId": job_id,
        "status": job.status,
        "isComplete": job.is_complete(),
        "isSuccess": job.is_success(),
    }))
}

async fn list_data_sources(ingestion: &dyn IngestionService) -> Result<Value> {
    let mut by_kind = Map::new();
    for ds in ingestion.list_data_sources().await? {
        if let Some(kind) = SourceKind::classify(&ds.name) {
            by_kind.insert(kind.as_str().to_string(), summary_json(&ds)?);
        }
    }
    Ok(json!({ "success": true, "dataSources": by_kind }))
}

fn summary_json(ds: &DataSourceSummary) -> Result<Value> {
    serde_json::to_value(ds).map_err(|e| Error::upstream("bedrock", e.to_string()))
}

// ============ Daily sync ============

/// Start an ingestion job on the daily sync data source, found by name.
pub async fn run_daily_sync(config: &Config, ingestion: &dyn IngestionService) -> (StatusCode, Value) {
    let name = config.ingestion.daily_sync_data_source_name.as_str();
    info!(data_source = name, "starting daily sync");

    let sources = match ingestion.list_data_sources().await {
        Ok(sources) => sources,
        Err(e) => {
            error!(error = %e, "failed to list data sources");
            return (StatusCode::INTERNAL_SERVER_ERROR, failure(e.to_string()));
        }
    };
    let Some(target) = sources.into_iter().find(|ds| ds.name == name) else {
        error!(data_source = name, "daily sync data source not found");
        return (
            StatusCode::NOT_FOUND,
            failure(format!("Data source {} not found", name)),
        );
    };

    let description = format!(
        "Automated daily sync - {}",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );
    match ingestion
        .start_ingestion_job(&target.data_source_id, &description)
        .await
    {
        Ok(job) => {
            info!(job_id = %job.ingestion_job_id, "daily sync ingestion job started");
            (
                StatusCode::OK,
                json!({
                    "success": true,
                    "message": "Daily sync ingestion job started successfully",
                    "ingestion_job_id": job.ingestion_job_id,
                    "data_source_id": target.data_source_id,
                    "timestamp": iso_timestamp(Utc::now()),
                }),
            )
        }
        Err(e) => {
            error!(error = %e, "failed to start daily sync ingestion job");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                failure(format!("Failed to start daily sync ingestion job: {}", e)),
            )
        }
    }
}
