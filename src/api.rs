//! REST API server for the trading agent
//!
//! Exposes submit, resume and thread inspection over HTTP so a front end
//! can collect approvals asynchronously.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::checkpoint::snapshot_digest;
use crate::error::AgentError;
use crate::graph::ExecutionGraph;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ResumeRequest {
    pub decision: String,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiReply = (StatusCode, Json<ApiResponse>);

fn status_for(error: &AgentError) -> StatusCode {
    match error {
        AgentError::InvalidState { .. } | AgentError::ConcurrentRun(_) => StatusCode::CONFLICT,
        AgentError::Gateway(_) => StatusCode::BAD_GATEWAY,
        AgentError::MaxTurnsExceeded(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reply<T: Serialize>(thread_id: &str, result: crate::Result<T>) -> ApiReply {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))),
        Err(e) => {
            let status = status_for(&e);
            warn!(thread_id, status = status.as_u16(), error = %e, "Request failed");
            (status, Json(ApiResponse::error(e.to_string())))
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub graph: Arc<ExecutionGraph>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Thread Endpoints
/// =============================

async fn submit_message(
    State(state): State<ApiState>,
    Path(thread_id): Path<String>,
    Json(req): Json<SubmitRequest>,
) -> ApiReply {
    if req.content.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Message content is empty".into())),
        );
    }

    info!(thread_id = %thread_id, "Received message");
    let result = state.graph.submit(&thread_id, &req.content).await;
    reply(&thread_id, result)
}

async fn resume_thread(
    State(state): State<ApiState>,
    Path(thread_id): Path<String>,
    Json(req): Json<ResumeRequest>,
) -> ApiReply {
    info!(thread_id = %thread_id, "Received decision");
    let result = state.graph.resume(&thread_id, &req.decision).await;
    reply(&thread_id, result)
}

async fn get_thread(State(state): State<ApiState>, Path(thread_id): Path<String>) -> ApiReply {
    let result = state.graph.thread_state(&thread_id).await.map(|snapshot| {
        serde_json::json!({
            "status": snapshot.status(),
            "digest": snapshot_digest(&snapshot),
            "snapshot": snapshot,
        })
    });
    reply(&thread_id, result)
}

/// =============================
/// Router
/// =============================

pub fn create_router(graph: Arc<ExecutionGraph>) -> Router {
    let state = ApiState { graph };

    Router::new()
        .route("/health", get(health))
        .route("/api/threads/:thread_id", get(get_thread))
        .route("/api/threads/:thread_id/messages", post(submit_message))
        .route("/api/threads/:thread_id/resume", post(resume_thread))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    graph: Arc<ExecutionGraph>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(graph);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::InMemoryCheckpointStore;
    use crate::gateway::{KeywordGateway, ScriptedGateway};
    use crate::tools::trading::{BuyStocksTool, GetStockPriceTool, TradeLedger};
    use crate::tools::ToolRegistry;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    fn trading_router(ledger: &TradeLedger) -> Router {
        let mut registry = ToolRegistry::new();
        registry
            .register(GetStockPriceTool::schema(), Arc::new(GetStockPriceTool))
            .unwrap();
        registry
            .register(
                BuyStocksTool::schema(),
                Arc::new(BuyStocksTool::new(ledger.clone())),
            )
            .unwrap();
        let graph = ExecutionGraph::new(
            Box::new(KeywordGateway::new()),
            registry,
            Arc::new(InMemoryCheckpointStore::new()),
        );
        create_router(Arc::new(graph))
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())).unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let router = trading_router(&TradeLedger::new());
        let (status, body) = call(&router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_buy_flow_over_http() {
        let ledger = TradeLedger::new();
        let router = trading_router(&ledger);

        let (status, body) = call(
            &router,
            "POST",
            "/api/threads/buy_thread/messages",
            Some(json!({"content": "Buy 10 MSFT at 200.3"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "suspended");
        assert_eq!(body["data"]["prompt"], "Approve buying 10 MSFT stocks for $2003.00?");

        let (status, body) = call(&router, "GET", "/api/threads/buy_thread", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "suspended");
        assert_eq!(body["data"]["digest"].as_str().unwrap().len(), 64);
        assert_eq!(
            body["data"]["snapshot"]["pending_interrupt"]["tool_name"],
            "buy_stocks"
        );

        let (status, body) = call(
            &router,
            "POST",
            "/api/threads/buy_thread/messages",
            Some(json!({"content": "What is the price of MSFT?"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);

        let (status, body) = call(
            &router,
            "POST",
            "/api/threads/buy_thread/resume",
            Some(json!({"decision": "yes"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "completed");
        assert_eq!(
            body["data"]["final_text"],
            "You bought 10 shares of MSFT for a total price of 2003.0"
        );
        assert_eq!(ledger.trades().await.len(), 1);
    }

    #[tokio::test]
    async fn test_resume_without_suspension_conflicts() {
        let router = trading_router(&TradeLedger::new());
        let (status, body) = call(
            &router,
            "POST",
            "/api/threads/idle/resume",
            Some(json!({"decision": "yes"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("idle"));
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let router = trading_router(&TradeLedger::new());
        let (status, _) = call(
            &router,
            "POST",
            "/api/threads/t1/messages",
            Some(json!({"content": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_gateway_failure_maps_to_bad_gateway() {
        let gateway = ScriptedGateway::with_results(vec![Err(AgentError::Gateway(
            "backend unavailable".into(),
        ))]);
        let graph = ExecutionGraph::new(
            Box::new(gateway),
            ToolRegistry::new(),
            Arc::new(InMemoryCheckpointStore::new()),
        );
        let router = create_router(Arc::new(graph));

        let (status, body) = call(
            &router,
            "POST",
            "/api/threads/t1/messages",
            Some(json!({"content": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains("backend unavailable"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&AgentError::ConcurrentRun("t1".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&AgentError::MaxTurnsExceeded(25)),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&AgentError::CheckpointError("corrupt".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
