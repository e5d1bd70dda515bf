//! Rootline server — HTTP API for todo outlines.
//!
//! Thin axum server wrapping the shared rootline database layer. The
//! authenticated user id arrives in the `x-user-id` header; authentication
//! itself happens upstream of this process.
//!
//! Usage:
//!   ROOTLINE_DB=/path/to/rootline.db ROOTLINE_BIND=0.0.0.0:4217 rootline-server
//!
//! Or with args:
//!   rootline-server --db /path/to/rootline.db --bind 0.0.0.0:4217

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use rootline::db::{
    get_todo_nodes, update_todo_nodes, ApiError, Database, OutlineData, SaveBatch, Todo,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

// ============================================================================
// AppState
// ============================================================================

#[derive(Clone)]
struct AppState {
    db: Arc<Database>,
    start_time: Instant,
}

// ============================================================================
// Error type
// ============================================================================

struct AppError(StatusCode, String, Option<&'static str>);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({"error": self.1});
        if let Some(code) = self.2 {
            body["code"] = code.into();
        }
        (self.0, Json(body)).into_response()
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError(StatusCode::INTERNAL_SERVER_ERROR, s, None)
    }
}

impl From<ApiError> for AppError {
    fn from(e: ApiError) -> Self {
        let status = match &e {
            ApiError::TodoDoesNotExist => StatusCode::NOT_FOUND,
            ApiError::Db(_) | ApiError::CorruptRow(_) => StatusCode::INTERNAL_SERVER_ERROR,
            // Every referential-integrity rejection is a conflict with
            // persisted state.
            _ => StatusCode::CONFLICT,
        };
        AppError(status, e.to_string(), Some(e.code()))
    }
}

fn not_found(msg: impl Into<String>) -> AppError {
    AppError(StatusCode::NOT_FOUND, msg.into(), None)
}

fn bad_request(msg: impl Into<String>) -> AppError {
    AppError(StatusCode::BAD_REQUEST, msg.into(), None)
}

// ============================================================================
// Request / Response types
// ============================================================================

#[derive(Deserialize)]
struct CreateTodoRequest {
    name: String,
}

#[derive(Deserialize)]
struct RenameTodoRequest {
    name: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_secs: u64,
}

// ============================================================================
// Helpers
// ============================================================================

fn user_id(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .ok_or_else(|| bad_request("Missing x-user-id header"))
}

// ============================================================================
// Handlers
// ============================================================================

// POST /todos
async fn create_todo_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateTodoRequest>,
) -> Result<(StatusCode, Json<Todo>), AppError> {
    let user = user_id(&headers)?;
    if req.name.trim().is_empty() {
        return Err(bad_request("Todo name cannot be empty"));
    }

    let todo = state
        .db
        .create_todo(&user, req.name.trim())
        .map_err(|e| AppError::from(e.to_string()))?;

    println!("[POST /todos] Created '{}' for {} (id: {})", todo.name, user, &todo.id[..8]);

    Ok((StatusCode::CREATED, Json(todo)))
}

// GET /todos
async fn list_todos_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Todo>>, AppError> {
    let user = user_id(&headers)?;
    let todos = state
        .db
        .list_todos(&user)
        .map_err(|e| AppError::from(e.to_string()))?;
    Ok(Json(todos))
}

// GET /todos/:id
async fn get_todo_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Todo>, AppError> {
    let user = user_id(&headers)?;
    let todo = state
        .db
        .get_todo(&id, &user)
        .map_err(|e| AppError::from(e.to_string()))?
        .ok_or_else(|| not_found(format!("Todo '{}' not found", id)))?;
    Ok(Json(todo))
}

// PATCH /todos/:id
async fn rename_todo_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<RenameTodoRequest>,
) -> Result<Json<Todo>, AppError> {
    let user = user_id(&headers)?;
    if req.name.trim().is_empty() {
        return Err(bad_request("Todo name cannot be empty"));
    }

    let renamed = state
        .db
        .rename_todo(&id, &user, req.name.trim())
        .map_err(|e| AppError::from(e.to_string()))?;
    if !renamed {
        return Err(not_found(format!("Todo '{}' not found", id)));
    }

    let todo = state
        .db
        .get_todo(&id, &user)
        .map_err(|e| AppError::from(e.to_string()))?
        .ok_or_else(|| not_found(format!("Todo '{}' not found after rename", id)))?;

    println!("[PATCH /todos/{}] Renamed to '{}'", &id[..8.min(id.len())], todo.name);

    Ok(Json(todo))
}

// DELETE /todos/:id
async fn delete_todo_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let user = user_id(&headers)?;
    let deleted = state
        .db
        .delete_todo(&id, &user)
        .map_err(|e| AppError::from(e.to_string()))?;
    if !deleted {
        return Err(not_found(format!("Todo '{}' not found", id)));
    }

    println!("[DELETE /todos/{}] Deleted by {}", &id[..8.min(id.len())], user);

    Ok(StatusCode::NO_CONTENT)
}

// GET /todos/:id/nodes
async fn get_nodes_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<OutlineData>, AppError> {
    let user = user_id(&headers)?;
    let data = get_todo_nodes(&state.db, &id, &user)?;
    Ok(Json(data))
}

// PATCH /todos/:id/nodes
async fn save_nodes_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(batch): Json<SaveBatch>,
) -> Result<StatusCode, AppError> {
    let user = user_id(&headers)?;

    let inserts = batch.mutations.insert.len();
    let updates = batch.mutations.update.len();
    let deletes = batch.mutations.delete.len();

    if let Err(e) = update_todo_nodes(&state.db, &id, &user, &batch) {
        eprintln!("[PATCH /todos/{}/nodes] Rejected: {}", &id[..8.min(id.len())], e);
        return Err(AppError::from(e));
    }

    println!(
        "[PATCH /todos/{}/nodes] Applied {} insert, {} update, {} delete",
        &id[..8.min(id.len())],
        inserts,
        updates,
        deletes
    );

    Ok(StatusCode::NO_CONTENT)
}

// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Database path resolution
// ============================================================================

fn find_database(db_arg: Option<&str>) -> PathBuf {
    // 1. CLI argument
    if let Some(path) = db_arg {
        return PathBuf::from(path);
    }

    // 2. Environment variable
    if let Ok(path) = std::env::var("ROOTLINE_DB") {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    // 3. Default app data directory
    dirs::data_dir()
        .map(|p| p.join("rootline/rootline.db"))
        .unwrap_or_else(|| PathBuf::from("rootline.db"))
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    // Parse simple args (no clap to keep binary small)
    let args: Vec<String> = std::env::args().collect();
    let mut db_arg: Option<&str> = None;
    let mut bind_arg: Option<&str> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" if i + 1 < args.len() => {
                db_arg = Some(&args[i + 1]);
                i += 2;
            }
            "--bind" if i + 1 < args.len() => {
                bind_arg = Some(&args[i + 1]);
                i += 2;
            }
            "--help" | "-h" => {
                println!("rootline-server — Todo outline HTTP API");
                println!();
                println!("Usage: rootline-server [--db PATH] [--bind ADDR:PORT]");
                println!();
                println!("Environment variables:");
                println!("  ROOTLINE_DB    Database path");
                println!("  ROOTLINE_BIND  Bind address (default: 0.0.0.0:4217)");
                std::process::exit(0);
            }
            _ => {
                i += 1;
            }
        }
    }

    let bind_addr = bind_arg
        .map(|s| s.to_string())
        .or_else(|| std::env::var("ROOTLINE_BIND").ok())
        .unwrap_or_else(|| "0.0.0.0:4217".to_string());

    let db_path = find_database(db_arg);
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }
    println!("[Server] Database: {}", db_path.display());
    println!("[Server] Binding to: {}", bind_addr);

    // Open database
    let db = match Database::new(&db_path) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            eprintln!("[Server] Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    // Build router
    let state = AppState {
        db,
        start_time: Instant::now(),
    };

    let app = Router::new()
        .route("/todos", post(create_todo_handler).get(list_todos_handler))
        .route(
            "/todos/{id}",
            get(get_todo_handler)
                .patch(rename_todo_handler)
                .delete(delete_todo_handler),
        )
        .route("/todos/{id}/nodes", get(get_nodes_handler).patch(save_nodes_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    // Bind and serve
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("[Server] Failed to bind to {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };

    println!("[Server] Listening on {}", bind_addr);
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("[Server] Server error: {}", e);
        std::process::exit(1);
    }
}
