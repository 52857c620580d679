//! AWS Amplify hosting client.
//!
//! Starts a manual deployment of a build archive already stored in S3.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};

use crate::aws::{encode_path, AwsClient, AwsRequest};
use crate::error::{Error, Result};
use crate::traits::DeploymentService;

const SIGNING_NAME: &str = "amplify";

pub struct AmplifyClient {
    aws: AwsClient,
}

impl AmplifyClient {
    pub fn new(aws: AwsClient) -> Self {
        Self { aws }
    }
}

#[async_trait]
impl DeploymentService for AmplifyClient {
    async fn start_deployment(&self, app_id: &str, branch: &str, source_url: &str) -> Result<String> {
        let request = AwsRequest::new(
            Method::POST,
            SIGNING_NAME,
            self.aws.endpoint("amplify"),
            encode_path(&["apps", app_id, "branches", branch, "deployments", "start"]),
        )
        .json(&json!({ "sourceUrl": source_url }), "application/json");

        let response = self.aws.send_json(request).await?;
        response
            .pointer("/jobSummary/jobId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::upstream(SIGNING_NAME, "response has no jobSummary.jobId"))
    }
}
