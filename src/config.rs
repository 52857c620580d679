//! Configuration loading.
//!
//! Settings come from an optional TOML file and are then overridden by
//! environment variables, which is how a deployed instance is normally
//! configured. Every field has a default, so an empty file (or no file at
//! all) is valid until a handler needs a setting that has no default.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [chat]
//! knowledge_base_id = "KB12345"
//! model_id = "anthropic.claude-3-haiku-20240307-v1:0"
//!
//! [ingestion]
//! documents_bucket = "abc-documents"
//! s3_data_source_id = "DS1"
//! ```

use serde::Deserialize;
use std::path::Path;

use crate::error::{Error, Result};

pub const DEFAULT_MODEL_ID: &str = "anthropic.claude-3-haiku-20240307-v1:0";

/// Amplify app id value the deployment template ships with before a real app exists.
const PLACEHOLDER_APP_ID: &str = "PLACEHOLDER_APP_ID";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub aws: AwsConfig,
    pub chat: ChatConfig,
    pub ingestion: IngestionConfig,
    pub deploy: DeployConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Echo error detail back to callers.
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            debug: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AwsConfig {
    pub region: String,
    /// Send every service call to this endpoint instead of `*.amazonaws.com`
    /// (LocalStack and similar).
    pub endpoint_url: Option<String>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint_url: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChatConfig {
    pub knowledge_base_id: Option<String>,
    pub model_id: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub number_of_results: u32,
    pub presigned_url_expiry_secs: u64,
    pub chat_history_table: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            knowledge_base_id: None,
            model_id: DEFAULT_MODEL_ID.to_string(),
            max_tokens: 1000,
            temperature: 0.0,
            number_of_results: 50,
            presigned_url_expiry_secs: 3600,
            chat_history_table: "BloodCentersChatHistory".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestionConfig {
    pub documents_bucket: Option<String>,
    pub s3_data_source_id: Option<String>,
    pub web_data_source_id: Option<String>,
    pub daily_sync_data_source_id: Option<String>,
    /// Legacy single data source id; falls back to `s3_data_source_id`.
    pub data_source_id: Option<String>,
    pub daily_sync_data_source_name: String,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            documents_bucket: None,
            s3_data_source_id: None,
            web_data_source_id: None,
            daily_sync_data_source_id: None,
            data_source_id: None,
            daily_sync_data_source_name: "BloodCentersDailySync-v2".to_string(),
        }
    }
}

impl IngestionConfig {
    /// The data source used when a job is started without an explicit id.
    pub fn default_data_source_id(&self) -> Option<&str> {
        self.data_source_id
            .as_deref()
            .or(self.s3_data_source_id.as_deref())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeployConfig {
    pub amplify_app_id: Option<String>,
    pub amplify_branch_name: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            amplify_app_id: None,
            amplify_branch_name: "main".to_string(),
        }
    }
}

impl DeployConfig {
    /// The configured app id, treating the template placeholder as unset.
    pub fn app_id(&self) -> Option<&str> {
        self.amplify_app_id
            .as_deref()
            .filter(|id| !id.is_empty() && *id != PLACEHOLDER_APP_ID)
    }
}

impl Config {
    /// Knowledge base id, or a configuration error naming the variable.
    pub fn knowledge_base_id(&self) -> Result<&str> {
        self.chat
            .knowledge_base_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::config("KNOWLEDGE_BASE_ID is not set"))
    }

    /// Override fields from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Override fields from an arbitrary variable lookup.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("BIND_ADDR") {
            self.server.bind = v;
        }
        if let Some(v) = get("DEBUG") {
            self.server.debug = v == "true";
        }

        if let Some(v) = get("AWS_REGION").or_else(|| get("AWS_DEFAULT_REGION")) {
            self.aws.region = v;
        }
        if let Some(v) = get("AWS_ENDPOINT_URL") {
            self.aws.endpoint_url = Some(v);
        }

        if let Some(v) = get("KNOWLEDGE_BASE_ID") {
            self.chat.knowledge_base_id = Some(v);
        }
        if let Some(v) = get("MODEL_ID") {
            self.chat.model_id = v;
        }
        if let Some(v) = get("MAX_TOKENS") {
            self.chat.max_tokens = parse_var("MAX_TOKENS", &v)?;
        }
        if let Some(v) = get("TEMPERATURE") {
            self.chat.temperature = parse_var("TEMPERATURE", &v)?;
        }
        if let Some(v) = get("NUMBER_OF_RESULTS") {
            self.chat.number_of_results = parse_var("NUMBER_OF_RESULTS", &v)?;
        }
        if let Some(v) = get("PRESIGNED_URL_EXPIRY_SECS") {
            self.chat.presigned_url_expiry_secs = parse_var("PRESIGNED_URL_EXPIRY_SECS", &v)?;
        }
        if let Some(v) = get("CHAT_HISTORY_TABLE") {
            self.chat.chat_history_table = v;
        }

        if let Some(v) = get("DOCUMENTS_BUCKET") {
            self.ingestion.documents_bucket = Some(v);
        }
        if let Some(v) = get("S3_DATA_SOURCE_ID") {
            self.ingestion.s3_data_source_id = Some(v);
        }
        if let Some(v) = get("WEB_DATA_SOURCE_ID") {
            self.ingestion.web_data_source_id = Some(v);
        }
        if let Some(v) = get("DAILY_SYNC_DATA_SOURCE_ID") {
            self.ingestion.daily_sync_data_source_id = Some(v);
        }
        if let Some(v) = get("DATA_SOURCE_ID") {
            self.ingestion.data_source_id = Some(v);
        }
        if let Some(v) = get("DAILY_SYNC_DATA_SOURCE_NAME") {
            self.ingestion.daily_sync_data_source_name = v;
        }

        if let Some(v) = get("AMPLIFY_APP_ID") {
            self.deploy.amplify_app_id = Some(v);
        }
        if let Some(v) = get("AMPLIFY_BRANCH_NAME") {
            self.deploy.amplify_branch_name = v;
        }

        Ok(())
    }

    /// Reject values no handler can work with.
    pub fn validate(&self) -> Result<()> {
        if self.chat.max_tokens == 0 {
            return Err(Error::config("MAX_TOKENS must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.chat.temperature) {
            return Err(Error::config("TEMPERATURE must be in [0.0, 1.0]"));
        }
        if self.chat.number_of_results == 0 {
            return Err(Error::config("NUMBER_OF_RESULTS must be > 0"));
        }
        // SigV4 presigned URLs are capped at seven days.
        if !(1..=604_800).contains(&self.chat.presigned_url_expiry_secs) {
            return Err(Error::config(
                "PRESIGNED_URL_EXPIRY_SECS must be between 1 and 604800",
            ));
        }
        if self.chat.model_id.trim().is_empty() {
            return Err(Error::config("MODEL_ID must not be empty"));
        }
        if self.aws.region.trim().is_empty() {
            return Err(Error::config("AWS_REGION must not be empty"));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("{} has an invalid value: '{}'", key, value)))
}

/// Load configuration from an optional TOML file, then the environment.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(|e| {
                Error::config(format!(
                    "Failed to read config file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            toml::from_str(&content)
                .map_err(|e| Error::config(format!("Failed to parse config file: {}", e)))?
        }
        None => Config::default(),
    };

    config.apply_env()?;
    config.validate()?;
    Ok(config)
}
