//! Amazon S3 client.
//!
//! Reads and writes objects in the documents bucket through the S3 REST API
//! and builds presigned GET links for private objects cited in answers.
//!
//! Objects are addressed virtual-hosted style
//! (`<bucket>.s3.<region>.amazonaws.com/<key>`) unless an endpoint override
//! is configured, in which case path style (`<endpoint>/<bucket>/<key>`) is
//! used so S3-compatible services (LocalStack, MinIO) work.
//!
//! Large listings are handled via the `ListObjectsV2` continuation token.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, StatusCode};
use std::time::Duration;

use crate::aws::{encode_key, presign_url, uri_encode, AwsClient, AwsRequest, Endpoint};
use crate::error::{Error, Result};
use crate::models::ObjectSummary;
use crate::traits::{BlobStore, UrlPresigner};

const SERVICE: &str = "s3";

/// S3 access bound to one bucket, plus presigning for any bucket.
#[derive(Clone)]
pub struct S3Client {
    aws: AwsClient,
    bucket: Option<String>,
}

impl S3Client {
    pub fn new(aws: AwsClient, bucket: Option<String>) -> Self {
        Self { aws, bucket }
    }

    fn bucket(&self) -> Result<&str> {
        self.bucket
            .as_deref()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| Error::config("DOCUMENTS_BUCKET is not set"))
    }

    /// Endpoint and encoded path for `bucket`/`key`.
    fn object_location(&self, bucket: &str, key: &str) -> (Endpoint, String) {
        match self.aws.endpoint_override() {
            Some(endpoint) => (
                endpoint.clone(),
                format!("/{}/{}", uri_encode(bucket), encode_key(key)),
            ),
            None => (
                Endpoint::https(format!("{}.s3.{}.amazonaws.com", bucket, self.aws.region())),
                format!("/{}", encode_key(key)),
            ),
        }
    }

    fn bucket_location(&self, bucket: &str) -> (Endpoint, String) {
        match self.aws.endpoint_override() {
            Some(endpoint) => (endpoint.clone(), format!("/{}", uri_encode(bucket))),
            None => (
                Endpoint::https(format!("{}.s3.{}.amazonaws.com", bucket, self.aws.region())),
                "/".to_string(),
            ),
        }
    }
}

/// Split `s3://bucket/key` into its parts.
pub fn parse_s3_uri(uri: &str) -> Result<(&str, &str)> {
    let rest = uri
        .strip_prefix("s3://")
        .ok_or_else(|| Error::validation(format!("not an s3:// URI: {}", uri)))?;
    let (bucket, key) = rest
        .split_once('/')
        .ok_or_else(|| Error::validation(format!("s3 URI has no object key: {}", uri)))?;
    if bucket.is_empty() || key.is_empty() {
        return Err(Error::validation(format!("incomplete s3 URI: {}", uri)));
    }
    Ok((bucket, key))
}

impl UrlPresigner for S3Client {
    fn presign_get(&self, s3_uri: &str, expires_in: Duration) -> Result<String> {
        let (bucket, key) = parse_s3_uri(s3_uri)?;
        let (endpoint, path) = self.object_location(bucket, key);
        Ok(presign_url(
            self.aws.credentials(),
            self.aws.region(),
            &endpoint,
            &path,
            expires_in,
            Utc::now(),
        ))
    }
}

#[async_trait]
impl BlobStore for S3Client {
    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let bucket = self.bucket()?;
        let (endpoint, path) = self.object_location(bucket, key);
        let resp = self
            .aws
            .send(AwsRequest::new(Method::GET, SERVICE, endpoint, path))
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            return Err(Error::upstream_status(
                SERVICE,
                status.as_u16(),
                format!("GetObject failed (HTTP {}) for key '{}'", status, key),
            ));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::upstream(SERVICE, format!("s3://{}/{}: {}", bucket, key, e)))?;
        Ok(Some(bytes.to_vec()))
    }

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: &[(String, String)],
    ) -> Result<()> {
        let bucket = self.bucket()?;
        let (endpoint, path) = self.object_location(bucket, key);
        let mut request = AwsRequest::new(Method::PUT, SERVICE, endpoint, path)
            .header("content-type", content_type)
            .body(body);
        for (name, value) in metadata {
            request = request.header(&format!("x-amz-meta-{}", name), value.as_str());
        }

        self.aws.send_checked(request).await?;
        Ok(())
    }

    async fn list_objects(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
    ) -> Result<Vec<ObjectSummary>> {
        let bucket = self.bucket()?;
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let (endpoint, path) = self.bucket_location(bucket);
            let mut request = AwsRequest::new(Method::GET, SERVICE, endpoint, path)
                .query("list-type", "2")
                .query("max-keys", "1000");
            if !prefix.is_empty() {
                request = request.query("prefix", prefix);
            }
            if let Some(delimiter) = delimiter {
                request = request.query("delimiter", delimiter);
            }
            if let Some(ref token) = continuation_token {
                request = request.query("continuation-token", token.as_str());
            }

            let resp = self.aws.send_checked(request).await?;
            let xml_body = resp
                .text()
                .await
                .map_err(|e| Error::upstream(SERVICE, e.to_string()))?;
            let (batch, is_truncated, next_token) = parse_list_objects_response(&xml_body);
            objects.extend(batch);

            match next_token {
                Some(token) if is_truncated => continuation_token = Some(token),
                _ => break,
            }
        }

        Ok(objects)
    }

    async fn copy_object(
        &self,
        source_key: &str,
        dest_key: &str,
        metadata: &[(String, String)],
    ) -> Result<()> {
        let bucket = self.bucket()?;
        let (endpoint, path) = self.object_location(bucket, dest_key);
        let mut request = AwsRequest::new(Method::PUT, SERVICE, endpoint, path)
            .header(
                "x-amz-copy-source",
                format!("/{}/{}", uri_encode(bucket), encode_key(source_key)),
            )
            .header("x-amz-metadata-directive", "REPLACE");
        for (name, value) in metadata {
            request = request.header(&format!("x-amz-meta-{}", name), value.as_str());
        }

        let resp = self.aws.send_checked(request).await?;
        // CopyObject can answer 200 with an <Error> document.
        let body = resp.text().await.unwrap_or_default();
        if body.contains("<Error>") {
            return Err(Error::upstream(
                SERVICE,
                format!(
                    "CopyObject {} -> {} failed: {}",
                    source_key,
                    dest_key,
                    extract_xml_value(&body, "Message").unwrap_or(body)
                ),
            ));
        }
        Ok(())
    }
}

// ============ XML Parsing (minimal, no extra deps) ============

/// Parse a `ListObjectsV2` XML response into a list of [`ObjectSummary`]s.
///
/// Also returns whether the listing is truncated and the next continuation
/// token for pagination.
fn parse_list_objects_response(xml: &str) -> (Vec<ObjectSummary>, bool, Option<String>) {
    let mut objects = Vec::new();
    let is_truncated = extract_xml_value(xml, "IsTruncated")
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_token = extract_xml_value(xml, "NextContinuationToken");

    let mut remaining = xml;
    while let Some(start) = remaining.find("<Contents>") {
        let block_start = start + "<Contents>".len();
        let Some(end) = remaining[block_start..].find("</Contents>") else {
            break;
        };
        let block = &remaining[block_start..block_start + end];

        let key = extract_xml_value(block, "Key").unwrap_or_default();
        if !key.is_empty() && !key.ends_with('/') {
            let size = extract_xml_value(block, "Size")
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(0);
            objects.push(ObjectSummary { key, size });
        }

        remaining = &remaining[block_start + end + "</Contents>".len()..];
    }

    (objects, is_truncated, next_token)
}

/// Extract the text content of an XML tag (simple, non-nested).
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(unescape_xml(&xml[start..start + end]))
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
