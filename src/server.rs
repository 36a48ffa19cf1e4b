use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;

use crate::engine::{QueryEngine, QueryResult};
use crate::error::QueryError;

/// Shared application state for the HTTP handlers.
#[derive(Clone)]
struct AppState {
    engine: Arc<QueryEngine>,
    stats: Arc<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    question: String,
}

/// Liveness probe handler - always returns 200 OK if the process is alive.
async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe handler - the index is loaded before the server starts,
/// so a serving process is ready by construction.
async fn readyz() -> StatusCode {
    StatusCode::OK
}

async fn stats(State(state): State<AppState>) -> axum::Json<serde_json::Value> {
    axum::Json(state.stats.as_ref().clone())
}

/// The question endpoint. Infrastructure failures surface as non-2xx;
/// "no relevant content" is a 200 carrying the fallback sentence.
async fn ask(
    State(state): State<AppState>,
    axum::Json(request): axum::Json<AskRequest>,
) -> Result<axum::Json<QueryResult>, (StatusCode, String)> {
    let question = request.question.trim();
    if question.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "question must not be empty".to_string()));
    }

    match state.engine.answer_question(question).await {
        Ok(result) => Ok(axum::Json(result)),
        Err(e @ QueryError::StoreUnavailable(_)) => {
            tracing::error!("query failed: {e}");
            Err((StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
        }
        Err(e @ QueryError::UpstreamUnavailable(_)) => {
            tracing::error!("query failed: {e}");
            Err((StatusCode::BAD_GATEWAY, e.to_string()))
        }
    }
}

/// Serves the question endpoint plus probe and stats routes until ctrl-c.
pub async fn serve(
    engine: Arc<QueryEngine>,
    stats_payload: serde_json::Value,
    bind: &str,
) -> Result<()> {
    let state = AppState {
        engine,
        stats: Arc::new(stats_payload),
    };

    let router = axum::Router::new()
        .route("/healthz", axum::routing::get(healthz))
        .route("/readyz", axum::routing::get(readyz))
        .route("/stats", axum::routing::get(stats))
        .route("/ask", axum::routing::post(ask))
        .with_state(state);

    tracing::info!("HTTP endpoints: POST /ask, GET /stats, /healthz, /readyz");

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("listening on http://{bind}");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    Ok(())
}
