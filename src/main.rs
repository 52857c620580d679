//! # kbchat
//!
//! Runs the chat HTTP server and the sync/deploy triggers.
//!
//! ## Usage
//!
//! ```bash
//! kbchat [--config ./kbchat.toml] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbchat serve` | Start the chat HTTP server |
//! | `kbchat ingest` | Refresh the PDF corpus and start ingestion jobs |
//! | `kbchat sync-op --event '{...}'` | Run one workflow sync step |
//! | `kbchat daily-sync` | Start the daily sync ingestion job |
//! | `kbchat deploy --event '{...}'` | Deploy a frontend build archive |
//!
//! Trigger commands print their JSON result on stdout and exit non-zero
//! when the result reports a failure.
//!
//! ## Examples
//!
//! ```bash
//! # Local server with an in-process conversation log
//! kbchat serve --bind 127.0.0.1:8080 --memory-history
//!
//! # Initial load of both data sources
//! kbchat ingest --sync-type initial --data-source-type both
//!
//! # Poll an ingestion job from a workflow
//! kbchat sync-op --event '{"operation":"check_status","dataSourceId":"DS","jobId":"J"}'
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use kb_chat::amplify::AmplifyClient;
use kb_chat::aws::{AwsClient, AwsCredentials};
use kb_chat::bedrock::{BedrockAgent, BedrockKnowledgeBase, BedrockModel};
use kb_chat::config::{self, Config};
use kb_chat::dynamo::DynamoConversationStore;
use kb_chat::ingest::{HttpDocumentFetcher, IngestRequest};
use kb_chat::memory::InMemoryConversationStore;
use kb_chat::s3::S3Client;
use kb_chat::server::{self, AppState};
use kb_chat::traits::{ConversationStore, Services};
use kb_chat::{deploy, ingest, logging, sync_ops};

/// Chat bridge and sync triggers for a managed knowledge base.
///
/// Settings come from an optional TOML file and the environment
/// (`KNOWLEDGE_BASE_ID`, `MODEL_ID`, `DOCUMENTS_BUCKET`, ...); environment
/// variables win.
#[derive(Parser)]
#[command(name = "kbchat", version)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log this crate at debug level (full prompts and model output).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the chat HTTP server.
    Serve {
        /// Override the bind address.
        #[arg(long)]
        bind: Option<String>,

        /// Keep conversations in memory instead of DynamoDB.
        #[arg(long)]
        memory_history: bool,
    },

    /// Refresh the PDF corpus and start ingestion jobs.
    ///
    /// Either pass a full trigger event with `--event` or build one from
    /// the individual flags.
    Ingest {
        /// Trigger event as JSON.
        #[arg(long, conflicts_with_all = ["sync_type", "data_source_type", "url"])]
        event: Option<String>,

        /// `initial`, `manual` or `daily`.
        #[arg(long)]
        sync_type: Option<String>,

        /// `both`, `s3` or `web`.
        #[arg(long)]
        data_source_type: Option<String>,

        /// URL to note for the web crawler. Repeatable.
        #[arg(long)]
        url: Vec<String>,
    },

    /// Run one step-orchestration sync operation.
    SyncOp {
        /// Operation event as JSON, e.g. `{"operation":"list_data_sources"}`.
        #[arg(long)]
        event: String,
    },

    /// Start an ingestion job on the daily sync data source.
    DailySync,

    /// Start a hosting deployment from a build archive event.
    Deploy {
        /// `{bucket, key}` or a storage event record as JSON.
        #[arg(long)]
        event: String,
    },
}

fn aws_client(cfg: &Config) -> anyhow::Result<AwsClient> {
    let credentials = AwsCredentials::from_env()?;
    Ok(AwsClient::new(&cfg.aws, credentials)?)
}

fn build_services(cfg: &Config, aws: &AwsClient, memory_history: bool) -> anyhow::Result<Services> {
    let s3 = Arc::new(S3Client::new(
        aws.clone(),
        cfg.ingestion.documents_bucket.clone(),
    ));
    let conversations: Arc<dyn ConversationStore> = if memory_history {
        Arc::new(InMemoryConversationStore::new())
    } else {
        Arc::new(DynamoConversationStore::new(
            aws.clone(),
            cfg.chat.chat_history_table.clone(),
        ))
    };

    Ok(Services {
        knowledge_base: Arc::new(BedrockKnowledgeBase::new(
            aws.clone(),
            cfg.chat.knowledge_base_id.clone(),
        )),
        model: Arc::new(BedrockModel::new(aws.clone(), &cfg.chat)),
        presigner: s3.clone(),
        conversations,
        documents: s3,
        ingestion: Arc::new(BedrockAgent::new(
            aws.clone(),
            cfg.chat.knowledge_base_id.clone(),
        )),
        fetcher: Arc::new(HttpDocumentFetcher::new()?),
    })
}

fn parse_event(raw: &str) -> anyhow::Result<Value> {
    serde_json::from_str(raw).context("--event is not valid JSON")
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut cfg = config::load_config(cli.config.as_deref())?;
    let aws = aws_client(&cfg)?;

    match cli.command {
        Commands::Serve {
            bind,
            memory_history,
        } => {
            if let Some(bind) = bind {
                cfg.server.bind = bind;
            }
            let services = build_services(&cfg, &aws, memory_history)?;
            server::run_server(AppState::new(cfg, services)).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Ingest {
            event,
            sync_type,
            data_source_type,
            url,
        } => {
            let event = match event {
                Some(raw) => parse_event(&raw)?,
                None => {
                    let mut event = json!({ "urls": url });
                    if let Some(sync_type) = sync_type {
                        event["sync_type"] = json!(sync_type);
                    }
                    if let Some(data_source_type) = data_source_type {
                        event["data_source_type"] = json!(data_source_type);
                    }
                    event
                }
            };
            let request: IngestRequest =
                serde_json::from_value(event).context("invalid ingestion event")?;

            let services = build_services(&cfg, &aws, true)?;
            match ingest::run_ingestion(&cfg, &services, request).await {
                Ok(summary) => {
                    print_json(&serde_json::to_value(&summary)?)?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    print_json(&json!({
                        "error": "Data ingestion failed",
                        "details": e.to_string(),
                    }))?;
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::SyncOp { event } => {
            let event = parse_event(&event)?;
            let agent = BedrockAgent::new(aws, Some(cfg.knowledge_base_id()?.to_string()));
            let result = sync_ops::run_sync_operation(&agent, &event).await;
            print_json(&result)?;
            Ok(exit_code(result["success"] == json!(true)))
        }
        Commands::DailySync => {
            let agent = BedrockAgent::new(aws, Some(cfg.knowledge_base_id()?.to_string()));
            let (status, body) = sync_ops::run_daily_sync(&cfg, &agent).await;
            print_json(&body)?;
            Ok(exit_code(status.is_success()))
        }
        Commands::Deploy { event } => {
            let event = parse_event(&event)?;
            let hosting = AmplifyClient::new(aws);
            let (status, body) = deploy::run_deploy(&cfg.deploy, &hosting, &event).await;
            print_json(&body)?;
            Ok(exit_code(status.is_success()))
        }
    }
}
