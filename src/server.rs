//! Chat HTTP server.
//!
//! One dispatcher serves every path, so the service works unchanged behind
//! an API gateway stage prefix (`/prod/...`).
//!
//! # Endpoints
//!
//! | Method    | Path                          | Description |
//! |-----------|-------------------------------|-------------|
//! | `OPTIONS` | any                           | CORS preflight |
//! | `GET`     | `*/admin/conversations`       | Paginated conversation log |
//! | `POST`    | `*/admin/sync`                | Run the ingestion trigger |
//! | `GET`     | `*/admin/status`              | System status |
//! | `GET`     | any other                     | Health check |
//! | `POST`    | any other                     | Chat turn |
//!
//! Admin paths are matched by substring. Any other method gets `405`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": "Message is required", "success": false, "details": null }
//! ```
//!
//! `details` carries the underlying error text only when `DEBUG=true`.
//!
//! # CORS
//!
//! Every response allows all origins, `GET, POST, OPTIONS`, and the headers
//! browser clients send through the gateway.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::chat::{self, ChatRequest};
use crate::config::Config;
use crate::error::Error;
use crate::history::{self, ConversationListQuery};
use crate::ingest::{self, IngestRequest};
use crate::models::iso_timestamp;
use crate::traits::Services;

const SERVICE_NAME: &str = "America's Blood Centers Bedrock Chatbot";
const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";
const ALLOWED_HEADERS: &str =
    "Content-Type, Authorization, X-Amz-Date, X-Api-Key, X-Amz-Security-Token";

/// Shared state for the dispatcher.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub services: Services,
}

impl AppState {
    pub fn new(config: Config, services: Services) -> Self {
        Self {
            config: Arc::new(config),
            services,
        }
    }
}

/// Build the router with CORS headers and request tracing applied.
pub fn router(state: AppState) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until the process is terminated.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind.clone();
    let app = router(state);

    info!(bind = %bind_addr, "chat server listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    success: bool,
    details: Option<String>,
}

/// Error converted into the JSON error contract.
struct AppError {
    status: StatusCode,
    message: String,
    details: Option<String>,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
        }
    }

    /// Map a library error. Client errors show their own text; server errors
    /// show `server_message` and keep the cause for `details`.
    fn from_error(err: &Error, debug: bool, server_message: &str) -> Self {
        let status = err.status_code();
        let message = if status.is_server_error() {
            error!(error = %err, "request failed");
            server_message.to_string()
        } else {
            err.to_string()
        };
        Self {
            status,
            message,
            details: debug.then(|| err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            success: false,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Parse a JSON body. An empty body yields `empty` when given.
fn parse_body<T: DeserializeOwned>(body: &Bytes, empty: Option<T>) -> Result<T, Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return empty.ok_or_else(|| Error::validation("Request body is missing"));
    }
    serde_json::from_slice(body).map_err(|e| Error::validation(format!("Invalid request body: {}", e)))
}

// ============ Dispatch ============

async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let path = uri.path();

    if method == Method::OPTIONS {
        return Json(json!({ "message": "CORS preflight successful" })).into_response();
    }
    if path.contains("/admin/") {
        return handle_admin(&state, &method, path, &params, &body).await;
    }

    if method == Method::GET {
        handle_health(&state).into_response()
    } else if method == Method::POST {
        handle_chat(&state, &body).await
    } else {
        AppError::new(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed. Use POST for chat requests or GET for health checks.",
        )
        .into_response()
    }
}

fn knowledge_base_label(state: &AppState) -> Option<String> {
    state.services.knowledge_base.id().map(str::to_string)
}

// ============ GET (health) ============

fn handle_health(state: &AppState) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "timestamp": iso_timestamp(Utc::now()),
        "model": state.services.model.model_id(),
        "knowledge_base": knowledge_base_label(state),
    }))
}

// ============ POST (chat) ============

async fn handle_chat(state: &AppState, body: &Bytes) -> Response {
    let debug = state.config.server.debug;
    let request: ChatRequest = match parse_body(body, None) {
        Ok(request) => request,
        Err(e) => return AppError::from_error(&e, debug, "Internal server error").into_response(),
    };

    match chat::answer(&state.services, &state.config.chat, request).await {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => AppError::from_error(&e, debug, "Internal server error").into_response(),
    }
}

// ============ Admin ============

async fn handle_admin(
    state: &AppState,
    method: &Method,
    path: &str,
    params: &HashMap<String, String>,
    body: &Bytes,
) -> Response {
    let debug = state.config.server.debug;

    if path.contains("/admin/conversations") && method == Method::GET {
        let result = match ConversationListQuery::from_params(params) {
            Ok(query) => {
                history::list_conversations(state.services.conversations.as_ref(), &query).await
            }
            Err(e) => Err(e),
        };
        return match result {
            Ok(page) => Json(page).into_response(),
            Err(e) => AppError::from_error(&e, debug, "Failed to retrieve conversations")
                .into_response(),
        };
    }

    if path.contains("/admin/sync") && method == Method::POST {
        let result = match parse_body(body, Some(IngestRequest::default())) {
            Ok(request) => ingest::run_ingestion(&state.config, &state.services, request).await,
            Err(e) => Err(e),
        };
        return match result {
            Ok(summary) => Json(summary).into_response(),
            Err(e) => AppError::from_error(&e, debug, "Data ingestion failed").into_response(),
        };
    }

    if path.contains("/admin/status") && method == Method::GET {
        return Json(json!({
            "success": true,
            "status": "healthy",
            "timestamp": iso_timestamp(Utc::now()),
            "model": state.services.model.model_id(),
            "knowledge_base": knowledge_base_label(state),
        }))
        .into_response();
    }

    AppError::new(StatusCode::NOT_FOUND, "Admin endpoint not found").into_response()
}
