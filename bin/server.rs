// Provider Validation - Query API Server
// Runs the pipeline once at startup, then serves the enriched table over HTTP.

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use provider_validation::{
    describe_schema, execute_query, load_flags, run_pipeline, PipelineConfig, QualityReport,
    RunReport,
};

const DEFAULT_CONFIG: &str = "provider-validation.toml";
const DEFAULT_ADDR: &str = "0.0.0.0:3000";

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    table: String,
    state_column: String,
    startup: Arc<RunReport>,
}

impl AppState {
    fn conn(&self) -> Result<MutexGuard<'_, Connection>, Response> {
        self.db
            .lock()
            .map_err(|_| error_response(StatusCode::INTERNAL_SERVER_ERROR, "database lock poisoned"))
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

fn error_response(status: StatusCode, message: impl ToString) -> Response {
    let body: ApiResponse<()> = ApiResponse {
        success: false,
        data: None,
        error: Some(message.to_string()),
    };
    (status, Json(body)).into_response()
}

#[derive(Deserialize)]
struct ExecuteSqlRequest {
    sql: Option<String>,
}

#[derive(Serialize)]
struct SummaryResponse {
    run: RunReport,
    current: QualityReport,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/schema - Every table with its columns
async fn get_schema(State(state): State<AppState>) -> Response {
    let conn = match state.conn() {
        Ok(conn) => conn,
        Err(resp) => return resp,
    };

    match describe_schema(&conn) {
        Ok(schema) => (StatusCode::OK, Json(ApiResponse::ok(schema))).into_response(),
        Err(e) => {
            error!(error = %e, "schema lookup failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

/// GET /api/summary - Startup run plus data quality of the table as it is now
async fn get_summary(State(state): State<AppState>) -> Response {
    let conn = match state.conn() {
        Ok(conn) => conn,
        Err(resp) => return resp,
    };

    match load_flags(&conn, &state.table, &state.state_column) {
        Ok(rows) => {
            let summary = SummaryResponse {
                run: (*state.startup).clone(),
                current: QualityReport::from_flags(&rows),
            };
            (StatusCode::OK, Json(ApiResponse::ok(summary))).into_response()
        }
        Err(e) => {
            error!(error = %e, "summary failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

/// POST /api/execute_sql - Run one SQL statement, rows as JSON objects
async fn execute_sql(
    State(state): State<AppState>,
    Json(request): Json<ExecuteSqlRequest>,
) -> Response {
    let sql = match request.sql.as_deref().map(str::trim) {
        Some(sql) if !sql.is_empty() => sql.to_string(),
        _ => return error_response(StatusCode::BAD_REQUEST, "No SQL query provided"),
    };

    let conn = match state.conn() {
        Ok(conn) => conn,
        Err(resp) => return resp,
    };

    match execute_query(&conn, &sql) {
        Ok(rows) => {
            info!(rows = rows.len(), "query executed");
            (StatusCode::OK, Json(ApiResponse::ok(rows))).into_response()
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, e),
    }
}

fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/schema", get(get_schema))
        .route("/summary", get(get_summary))
        .route("/execute_sql", post(execute_sql))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("provider_validation=info,provider_server=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("🌐 Provider Validation - Query API");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = match std::env::args().nth(1) {
        Some(path) => PipelineConfig::from_path(Path::new(&path))
            .with_context(|| format!("Failed to load config {}", path))?,
        None if Path::new(DEFAULT_CONFIG).exists() => PipelineConfig::from_path(Path::new(DEFAULT_CONFIG))
            .with_context(|| format!("Failed to load config {}", DEFAULT_CONFIG))?,
        None => PipelineConfig::default(),
    };

    let output = tokio::task::spawn_blocking(move || run_pipeline(&config).map(|out| (out, config)))
        .await
        .context("Pipeline task panicked")?
        .context("Validation pipeline failed")?;
    let (output, config) = output;
    println!("✓ {}", output.report.quality.overall.summary());

    let state = AppState {
        db: Arc::new(Mutex::new(output.store.into_connection())),
        table: config.output.table.clone(),
        state_column: config.columns.normalized().roster.license_state,
        startup: Arc::new(output.report),
    };

    let addr = std::env::var("PROVIDER_SERVER_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    println!("\n🚀 Server running on http://{}", addr);
    println!("   POST /api/execute_sql   {{\"sql\": \"SELECT ...\"}}");
    println!("   GET  /api/schema | /api/summary | /api/health");
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, router(state))
        .await
        .context("Server error")?;

    Ok(())
}
