//! # kb-chat
//!
//! Stateless handlers bridging an HTTP chat interface to a managed
//! retrieval-augmented-generation backend, plus the sync triggers that keep
//! the knowledge base's document corpus current.
//!
//! Retrieval, inference and ingestion scheduling are delegated to managed
//! services reached through the traits in [`traits`]. This crate owns the
//! data shaping around them: citation extraction and de-duplication, prompt
//! construction, answer normalization, conversation logging and paging.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────────────┐   ┌─────────────────┐
//! │   HTTP   │──▶│ chat: sources → prompt →      │──▶│ Knowledge base  │
//! │ (server) │   │ model → markdown → persist    │   │ Model, DynamoDB │
//! └──────────┘   └──────────────────────────────┘   └─────────────────┘
//!                                                           ▲
//! ┌──────────┐   ┌──────────────────────────────┐           │
//! │   CLI    │──▶│ ingest / sync_ops / deploy    │───────────┘
//! │ (kbchat) │   │ triggers                      │   S3, Amplify
//! └──────────┘   └──────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML + environment configuration |
//! | [`error`] | Error kinds and HTTP status mapping |
//! | [`logging`] | Tracing subscriber setup |
//! | [`models`] | Retrieval hits, sources, conversation records |
//! | [`traits`] | Collaborator traits and the [`traits::Services`] bundle |
//! | [`aws`] | Signature V4 signing and signed transport |
//! | [`s3`] | Blob store client and presigned links |
//! | [`bedrock`] | Retrieval, model invocation, ingestion jobs |
//! | [`dynamo`] | DynamoDB conversation store |
//! | [`amplify`] | Hosting deployments |
//! | [`memory`] | In-process conversation store |
//! | [`sources`] | Citation extraction and de-duplication |
//! | [`prompt`] | Prompt templates and fallback answers |
//! | [`markdown`] | Answer normalization |
//! | [`chat`] | One chat turn end to end |
//! | [`history`] | Conversation listing and paging |
//! | [`server`] | HTTP surface |
//! | [`ingest`] | Ingestion trigger |
//! | [`sync_ops`] | Workflow sync steps and daily sync |
//! | [`deploy`] | Deployment trigger |

pub mod amplify;
pub mod aws;
pub mod bedrock;
pub mod chat;
pub mod config;
pub mod deploy;
pub mod dynamo;
pub mod error;
pub mod history;
pub mod ingest;
pub mod logging;
pub mod markdown;
pub mod memory;
pub mod models;
pub mod prompt;
pub mod s3;
pub mod server;
pub mod sources;
pub mod sync_ops;
pub mod traits;
