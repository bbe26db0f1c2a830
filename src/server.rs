//! HTTP API for the tutor
//!
//! - POST /chat - ask one question through the request pipeline
//! - GET /health - liveness check
//!
//! The server is stateless: it never reads or writes the session history.

use crate::config::Config;
use crate::error::{MathchatError, Result};
use crate::pipeline::{validate_message, Outcome, RequestPipeline};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

const UPSTREAM_FAILURE: &str = "Failed to get response from AI";

type ApiResponse = (StatusCode, Json<Value>);

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RequestPipeline>,
}

/// Create the router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP server until Ctrl-C
pub async fn serve(config: &Config) -> Result<()> {
    let pipeline = RequestPipeline::from_config(&config.completion)?;
    let app = create_router(AppState {
        pipeline: Arc::new(pipeline),
    });

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .map_err(|e| {
            MathchatError::Config(format!("Cannot bind {}: {}", config.server.bind, e))
        })?;
    let addr = listener.local_addr()?;

    tracing::info!(%addr, "Chat API listening");
    println!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Chat API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn chat_handler(State(state): State<AppState>, body: Bytes) -> ApiResponse {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::debug!("Rejected non-JSON chat body: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid JSON body", "details": e.to_string() })),
            );
        }
    };

    let raw = payload.get("message").and_then(Value::as_str).unwrap_or("");
    let message = match validate_message(raw) {
        Ok(message) => message,
        Err(e) => return error_response(&e),
    };

    outcome_response(state.pipeline.send(message).await)
}

/// Maps a pipeline outcome onto the wire
fn outcome_response(outcome: Outcome) -> ApiResponse {
    match outcome {
        Outcome::Answered { text } => (
            StatusCode::OK,
            Json(json!({ "response": text, "usage": null })),
        ),
        Outcome::Fallback { text } => (
            StatusCode::OK,
            Json(json!({ "response": text, "usage": null, "mock": true })),
        ),
        Outcome::Failed { message, .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": UPSTREAM_FAILURE, "details": message })),
        ),
    }
}

/// Client errors become 400 with their own message, anything else 500
fn error_response(error: &anyhow::Error) -> ApiResponse {
    match error.downcast_ref::<MathchatError>() {
        Some(MathchatError::Validation(message)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": message })),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": UPSTREAM_FAILURE, "details": format!("{:#}", error) })),
        ),
    }
}
