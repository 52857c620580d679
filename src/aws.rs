//! AWS request signing and transport.
//!
//! Every managed collaborator is reached through its REST API with requests
//! signed using [AWS Signature Version 4]. The signing implementation is
//! pure Rust (`hmac`, `sha2`, `hex`) so no SDK or C dependency is needed.
//!
//! Two signing styles are supported:
//!
//! - **Header signing** ([`AwsClient::send`]) for ordinary API calls. The
//!   `Authorization`, `x-amz-date`, `x-amz-content-sha256` and (when a session
//!   token is present) `x-amz-security-token` headers are added.
//! - **Query signing** ([`presign_url`]) for presigned S3 GET links, which
//!   carry the signature in the URL and use `UNSIGNED-PAYLOAD`.
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID` — required
//! - `AWS_SECRET_ACCESS_KEY` — required
//! - `AWS_SESSION_TOKEN` — optional (temporary credentials / IAM roles)
//!
//! [AWS Signature Version 4]: https://docs.aws.amazon.com/IAM/latest/UserGuide/reference_aws-signing.html

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Method;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::config::AwsConfig;
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

// ============ AWS Credentials ============

/// AWS credentials loaded from environment variables.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AwsCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }

    /// Load credentials from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
    /// and optionally `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| Error::config("AWS_ACCESS_KEY_ID environment variable not set"))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| Error::config("AWS_SECRET_ACCESS_KEY environment variable not set"))?;
        let session_token = std::env::var("AWS_SESSION_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

// ============ Requests ============

/// Scheme and authority a request is sent to.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub scheme: String,
    /// Host, including a port when it is not the scheme default.
    pub host: String,
}

impl Endpoint {
    pub fn https(host: impl Into<String>) -> Self {
        Self {
            scheme: "https".to_string(),
            host: host.into(),
        }
    }

    /// Parse an override such as `http://localhost:4566/`.
    fn parse(url: &str) -> Result<Self> {
        let parsed = url::Url::parse(url)
            .map_err(|e| Error::config(format!("invalid endpoint url '{}': {}", url, e)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| Error::config(format!("endpoint url '{}' has no host", url)))?;
        let host = match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        Ok(Self {
            scheme: parsed.scheme().to_string(),
            host,
        })
    }
}

/// A request to be signed and sent.
#[derive(Debug, Clone)]
pub struct AwsRequest {
    pub method: Method,
    /// Signing name of the service (`s3`, `bedrock`, `dynamodb`, ...).
    pub service: &'static str,
    pub endpoint: Endpoint,
    /// Wire path, already percent-encoded (see [`encode_path`]).
    pub path: String,
    /// Unencoded query parameters.
    pub query: Vec<(String, String)>,
    /// Extra headers to sign and send; names are lower-case.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl AwsRequest {
    pub fn new(method: Method, service: &'static str, endpoint: Endpoint, path: String) -> Self {
        Self {
            method,
            service,
            endpoint,
            path,
            query: Vec::new(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Attach a JSON body with the given content type.
    pub fn json(self, value: &serde_json::Value, content_type: &str) -> Self {
        self.header("content-type", content_type)
            .body(value.to_string().into_bytes())
    }

    fn url(&self) -> String {
        let query = canonical_query(&self.query);
        if query.is_empty() {
            format!("{}://{}{}", self.endpoint.scheme, self.endpoint.host, self.path)
        } else {
            format!(
                "{}://{}{}?{}",
                self.endpoint.scheme, self.endpoint.host, self.path, query
            )
        }
    }
}

// ============ Client ============

/// Signed HTTP transport shared by every AWS-backed collaborator.
///
/// Cheap to clone; the underlying connection pool and credentials are shared.
#[derive(Clone)]
pub struct AwsClient {
    http: reqwest::Client,
    credentials: Arc<AwsCredentials>,
    region: String,
    endpoint_override: Option<Endpoint>,
}

impl AwsClient {
    pub fn new(config: &AwsConfig, credentials: AwsCredentials) -> Result<Self> {
        let endpoint_override = config
            .endpoint_url
            .as_deref()
            .map(Endpoint::parse)
            .transpose()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            credentials: Arc::new(credentials),
            region: config.region.clone(),
            endpoint_override,
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn credentials(&self) -> &AwsCredentials {
        &self.credentials
    }

    /// The endpoint override, if one is configured.
    pub fn endpoint_override(&self) -> Option<&Endpoint> {
        self.endpoint_override.as_ref()
    }

    /// Regional endpoint for a service host prefix, e.g. `bedrock-runtime`.
    pub fn endpoint(&self, host_prefix: &str) -> Endpoint {
        match self.endpoint_override {
            Some(ref endpoint) => endpoint.clone(),
            None => Endpoint::https(format!("{}.{}.amazonaws.com", host_prefix, self.region)),
        }
    }

    /// Sign and send a request. Any HTTP status is returned as-is.
    pub async fn send(&self, request: AwsRequest) -> Result<reqwest::Response> {
        let signed = sign_headers(&self.credentials, &self.region, &request, Utc::now());
        let url = request.url();

        let mut builder = self.http.request(request.method.clone(), &url);
        for (name, value) in request.headers.iter().chain(signed.iter()) {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder
            .body(request.body)
            .send()
            .await
            .map_err(|e| Error::upstream(request.service, format!("{} {}: {}", request.method, url, e)))
    }

    /// Sign and send a request, failing on a non-success status.
    pub async fn send_checked(&self, request: AwsRequest) -> Result<reqwest::Response> {
        let service = request.service;
        let resp = self.send(request).await?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(Error::upstream_status(
            service,
            status.as_u16(),
            format!(
                "HTTP {}: {}",
                status,
                body.chars().take(500).collect::<String>()
            ),
        ))
    }

    /// Sign and send a request and decode a JSON response.
    pub async fn send_json(&self, request: AwsRequest) -> Result<serde_json::Value> {
        let service = request.service;
        let resp = self.send_checked(request).await?;
        let text = resp
            .text()
            .await
            .map_err(|e| Error::upstream(service, e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| Error::upstream(service, format!("invalid JSON response: {}", e)))
    }
}

// ============ Signing ============

/// Compute the signing headers for `request` at time `now`.
pub fn sign_headers(
    creds: &AwsCredentials,
    region: &str,
    request: &AwsRequest,
    now: DateTime<Utc>,
) -> Vec<(String, String)> {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let payload_hash = hex_sha256(&request.body);

    let mut headers: Vec<(String, String)> = request
        .headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    headers.push(("host".to_string(), request.endpoint.host.clone()));
    headers.push(("x-amz-content-sha256".to_string(), payload_hash.clone()));
    headers.push(("x-amz-date".to_string(), amz_date.clone()));
    if let Some(ref token) = creds.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers: String = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method.as_str(),
        canonical_uri(&request.path, request.service),
        canonical_query(&request.query),
        canonical_headers,
        signed_headers,
        payload_hash
    );

    let credential_scope = format!(
        "{}/{}/{}/aws4_request",
        date_stamp, region, request.service
    );
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(
        &creds.secret_access_key,
        &date_stamp,
        region,
        request.service,
    );
    let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, creds.access_key_id, credential_scope, signed_headers, signature
    );

    let mut out = vec![
        ("authorization".to_string(), authorization),
        ("x-amz-content-sha256".to_string(), payload_hash),
        ("x-amz-date".to_string(), amz_date),
    ];
    if let Some(ref token) = creds.session_token {
        out.push(("x-amz-security-token".to_string(), token.clone()));
    }
    out
}

/// Build a presigned S3 GET URL.
///
/// `path` is the encoded object path (`/key` for virtual-hosted style,
/// `/bucket/key` for path style). Only the `host` header is signed.
pub fn presign_url(
    creds: &AwsCredentials,
    region: &str,
    endpoint: &Endpoint,
    path: &str,
    expires_in: Duration,
    now: DateTime<Utc>,
) -> String {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, region);

    let mut query = vec![
        ("X-Amz-Algorithm".to_string(), ALGORITHM.to_string()),
        (
            "X-Amz-Credential".to_string(),
            format!("{}/{}", creds.access_key_id, credential_scope),
        ),
        ("X-Amz-Date".to_string(), amz_date.clone()),
        (
            "X-Amz-Expires".to_string(),
            expires_in.as_secs().to_string(),
        ),
        ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
    ];
    if let Some(ref token) = creds.session_token {
        query.push(("X-Amz-Security-Token".to_string(), token.clone()));
    }
    let canonical_querystring = canonical_query(&query);

    let canonical_request = format!(
        "GET\n{}\n{}\nhost:{}\n\nhost\n{}",
        path, canonical_querystring, endpoint.host, UNSIGNED_PAYLOAD
    );
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );
    let signing_key = derive_signing_key(&creds.secret_access_key, &date_stamp, region, "s3");
    let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

    format!(
        "{}://{}{}?{}&X-Amz-Signature={}",
        endpoint.scheme, endpoint.host, path, canonical_querystring, signature
    )
}

// ============ AWS SigV4 Helpers ============

/// Canonical URI for signing.
///
/// S3 signs the path as sent; every other service signs each segment
/// encoded a second time.
fn canonical_uri(path: &str, service: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    if service == "s3" {
        path.to_string()
    } else {
        path.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
    }
}

/// Sorted, encoded query string shared by the wire URL and the signature.
fn canonical_query(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Encode path segments into a wire path: `["a b", "c"]` → `/a%20b/c`.
pub fn encode_path(segments: &[&str]) -> String {
    let mut path = String::new();
    for segment in segments {
        path.push('/');
        path.push_str(&uri_encode(segment));
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}

/// Encode an object key, keeping `/` separators.
pub fn encode_key(key: &str) -> String {
    key.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
}

/// Compute the hex-encoded SHA-256 hash of data.
pub fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute HMAC-SHA256 of data with the given key.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Compute hex-encoded HMAC-SHA256.
fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode a string per RFC 3986 (used in SigV4 canonical requests).
///
/// Encodes all characters except unreserved characters:
/// `A-Z a-z 0-9 - _ . ~`
pub fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
