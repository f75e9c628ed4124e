//! HTTP tool server for agent integrations.
//!
//! Exposes the map store and resolution dispatcher as a small JSON API an
//! agent framework can call instead of shelling out to the CLI.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/tools/list` | List the available tools with parameter schemas |
//! | `POST` | `/tools/{name}` | Call a tool by name |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Tools: `list_resources` (the agent-context index), `get_structure` (one
//! map's node tree), `resolve` (node → evidence, pointer or materializing).
//!
//! # Error Contract
//!
//! All error responses share one shape:
//!
//! ```json
//! { "error": { "code": "not_found", "message": "no map found for resource 'x'" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `tool_error` (500),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::aggregate::{create_agent_context, ContextFormat};
use crate::config::Config;
use crate::resolve::{Dispatcher, ResolveError, ResolveMode};
use crate::store::MapStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    store: MapStore,
    dispatcher: Arc<Dispatcher>,
}

/// Starts the tool server.
///
/// Binds to `[server].bind` and serves until the process is terminated.
/// Ingestion is deliberately not exposed; the server is a read/resolve
/// surface over maps produced by the CLI.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let store = MapStore::new(&config.storage.maps_dir);
    let dispatcher = Arc::new(Dispatcher::with_default_backends(
        store.clone(),
        &config.storage.output_dir,
    ));

    let state = AppState { store, dispatcher };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("tool server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn tool_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "tool_error".to_string(),
        message: message.into(),
    }
}

impl From<ResolveError> for AppError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::ResourceNotFound(_) | ResolveError::NodeNotFound { .. } => {
                not_found(e.to_string())
            }
            ResolveError::BackendUnavailable(_) => bad_request(e.to_string()),
            other => tool_error(other.to_string()),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    /// Always `"ok"` when the server is running.
    status: String,
    /// The crate version from `Cargo.toml`.
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolInfo {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools() -> Json<ToolListResponse> {
    let tools = vec![
        ToolInfo {
            name: "list_resources".to_string(),
            description: "Index of every mapped resource with its node ids and summaries"
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "format": { "type": "string", "enum": ["markdown", "json"] }
                }
            }),
        },
        ToolInfo {
            name: "get_structure".to_string(),
            description: "Full node tree of one resource map".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "resource_id": { "type": "string" }
                },
                "required": ["resource_id"]
            }),
        },
        ToolInfo {
            name: "resolve".to_string(),
            description: "Resolve a node into evidence: a canonical address, and an \
                          extracted file unless pointer mode is requested"
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "resource_id": { "type": "string" },
                    "node_id": { "type": "string" },
                    "pointer": { "type": "boolean" }
                },
                "required": ["resource_id", "node_id"]
            }),
        },
    ];
    Json(ToolListResponse { tools })
}

// ============ POST /tools/{name} ============

#[derive(Deserialize)]
struct ListResourcesParams {
    #[serde(default)]
    format: Option<String>,
}

#[derive(Deserialize)]
struct GetStructureParams {
    resource_id: String,
}

#[derive(Deserialize)]
struct ResolveParams {
    resource_id: String,
    node_id: String,
    #[serde(default)]
    pointer: bool,
}

/// Unified tool dispatch. Returns `404` for unknown tools and missing
/// resources/nodes, `400` for parameter errors, and `500` for execution
/// failures.
async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = match name.as_str() {
        "list_resources" => {
            let params: ListResourcesParams =
                serde_json::from_value(params).map_err(|e| bad_request(e.to_string()))?;
            let format = params
                .format
                .as_deref()
                .unwrap_or("markdown")
                .parse::<ContextFormat>()
                .map_err(bad_request)?;
            let maps = state
                .store
                .load_all()
                .await
                .map_err(|e| tool_error(e.to_string()))?;
            serde_json::json!({ "context": create_agent_context(&maps, format) })
        }
        "get_structure" => {
            let params: GetStructureParams =
                serde_json::from_value(params).map_err(|e| bad_request(e.to_string()))?;
            let map = state
                .store
                .load(&params.resource_id)
                .await
                .map_err(|e| match e {
                    crate::store::StoreError::NotFound(_) => not_found(e.to_string()),
                    other => tool_error(other.to_string()),
                })?;
            serde_json::to_value(&map).map_err(|e| tool_error(e.to_string()))?
        }
        "resolve" => {
            let params: ResolveParams =
                serde_json::from_value(params).map_err(|e| bad_request(e.to_string()))?;
            let mode = if params.pointer {
                ResolveMode::Virtual
            } else {
                ResolveMode::Physical
            };
            let evidence = state
                .dispatcher
                .resolve(&params.resource_id, &params.node_id, mode)
                .await?;
            serde_json::to_value(&evidence).map_err(|e| tool_error(e.to_string()))?
        }
        other => return Err(not_found(format!("no tool registered with name: {}", other))),
    };

    Ok(Json(serde_json::json!({ "result": result })))
}
