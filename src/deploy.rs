//! Deployment trigger.
//!
//! Watches for frontend build archives landing in the blob store
//! (`builds/*.zip`) and starts a hosting deployment from them. Accepts
//! either a direct `{bucket, key}` invocation or a storage event record.

use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::config::DeployConfig;
use crate::error::{Error, Result};
use crate::traits::DeploymentService;

const BUILD_PREFIX: &str = "builds/";
const BUILD_SUFFIX: &str = ".zip";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DeployEvent {
    Direct {
        bucket: String,
        key: String,
    },
    Storage {
        #[serde(rename = "Records")]
        records: Vec<StorageRecord>,
    },
}

#[derive(Debug, Deserialize)]
struct StorageRecord {
    s3: StorageEntity,
}

#[derive(Debug, Deserialize)]
struct StorageEntity {
    bucket: BucketRef,
    object: ObjectRef,
}

#[derive(Debug, Deserialize)]
struct BucketRef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ObjectRef {
    key: String,
}

/// Object keys in storage events are form-encoded.
fn decode_event_key(key: &str) -> Result<String> {
    urlencoding::decode(&key.replace('+', " "))
        .map(|k| k.into_owned())
        .map_err(|e| Error::validation(format!("object key is not valid UTF-8: {}", e)))
}

/// Extract the bucket and decoded object key from a trigger event.
pub fn parse_event(event: &Value) -> Result<(String, String)> {
    let invalid = || Error::validation("Event must contain S3 bucket and key information");
    match DeployEvent::deserialize(event).map_err(|_| invalid())? {
        DeployEvent::Direct { bucket, key } => Ok((bucket, key)),
        DeployEvent::Storage { records } => {
            let record = records.into_iter().next().ok_or_else(invalid)?;
            Ok((record.s3.bucket.name, decode_event_key(&record.s3.object.key)?))
        }
    }
}

pub fn is_build_artifact(key: &str) -> bool {
    key.starts_with(BUILD_PREFIX) && key.ends_with(BUILD_SUFFIX)
}

/// Handle one deployment event, returning the status and body to report.
pub async fn run_deploy(
    config: &DeployConfig,
    hosting: &dyn DeploymentService,
    event: &Value,
) -> (StatusCode, Value) {
    let Some(app_id) = config.app_id() else {
        error!("AMPLIFY_APP_ID not configured");
        return (
            StatusCode::BAD_REQUEST,
            json!({
                "error": "AMPLIFY_APP_ID not configured",
                "message": "Environment variable AMPLIFY_APP_ID must be set",
            }),
        );
    };
    let branch = config.amplify_branch_name.as_str();

    let (bucket, key) = match parse_event(event) {
        Ok(parsed) => parsed,
        Err(e) => {
            error!(error = %e, "invalid deployment event");
            return (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Invalid event format", "message": e.to_string() }),
            );
        }
    };

    if !is_build_artifact(&key) {
        info!(key = %key, "ignoring non-build file");
        return (
            StatusCode::OK,
            json!({ "message": "File ignored (not a build artifact)", "file": key }),
        );
    }

    let source_url = format!("s3://{}/{}", bucket, key);
    info!(app_id, branch, source_url = %source_url, "starting deployment");

    match hosting.start_deployment(app_id, branch, &source_url).await {
        Ok(job_id) => {
            info!(job_id = %job_id, "deployment started");
            (
                StatusCode::OK,
                json!({
                    "message": "Amplify deployment started successfully",
                    "jobId": job_id,
                    "appId": app_id,
                    "branchName": branch,
                    "sourceUrl": source_url,
                    "deploymentUrl": format!("https://{}.{}.amplifyapp.com", branch, app_id),
                }),
            )
        }
        Err(e) => {
            let status = e.status_code();
            error!(error = %e, status = status.as_u16(), "deployment failed");
            let body = match status {
                StatusCode::NOT_FOUND => json!({
                    "error": "Amplify app not found",
                    "appId": app_id,
                    "message": "The specified Amplify app does not exist",
                }),
                StatusCode::FORBIDDEN => json!({
                    "error": "Unauthorized",
                    "message": "Missing permission to access Amplify",
                }),
                _ => json!({
                    "error": "Deployment failed",
                    "message": e.to_string(),
                    "appId": app_id,
                    "sourceUrl": source_url,
                }),
            };
            let status = match status {
                StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => status,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, body)
        }
    }
}
