// Monitor REST API handlers
// Replay, completion, comparison and introspection endpoints

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::state::AppState;
use crate::engine::{CompletionRequest, CostEstimateRequest, ReplayOverrides, ReplayRequest};
use crate::llm::LLMError;
use crate::models::ComparisonBatch;
use crate::{MonitorError, Result};

/// Success envelope shared by every JSON endpoint
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ModelsQuery {
    pub provider: Option<String>,
}

fn parse_json<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| MonitorError::Validation(rejection.body_text()))
}

/// Parse an optional JSON body; an empty body yields the default
fn parse_optional<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| MonitorError::Validation(format!("Invalid JSON body: {}", e)))
}

/// Health check endpoint - GET /health
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "llm-monitor",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// POST /api/replay
pub async fn replay(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ReplayRequest>, JsonRejection>,
) -> Result<Response> {
    let request = parse_json(payload)?;
    let response = state.replay.replay(request).await?;
    Ok(ApiResponse::ok(response).into_response())
}

/// POST /api/replay/log/:request_id
pub async fn replay_from_log(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    body: Bytes,
) -> Result<Response> {
    let overrides: ReplayOverrides = parse_optional(&body)?;
    let response = state.replay.replay_from_log(&request_id, overrides).await?;
    Ok(ApiResponse::ok(response).into_response())
}

/// POST /api/providers/:provider/complete
pub async fn complete(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    payload: std::result::Result<Json<CompletionRequest>, JsonRejection>,
) -> Result<Response> {
    let request = parse_json(payload)?;
    let response = state.replay.complete(&provider, request).await?;
    Ok(ApiResponse::ok(response).into_response())
}

/// GET /api/providers/:provider/test
pub async fn test_provider(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<Response> {
    let connected = state.replay.test_connection(&provider).await?;
    info!("Connection test for {}: {}", provider, connected);
    Ok(ApiResponse::ok(json!({ "provider": provider, "connected": connected })).into_response())
}

/// POST /api/compare
pub async fn compare(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ComparisonBatch>, JsonRejection>,
) -> Result<Response> {
    let batch = parse_json(payload)?;
    let report = state.comparison.compare(batch).await?;
    Ok(ApiResponse::ok(report).into_response())
}

/// GET /api/models?provider=
pub async fn list_models(
    State(state): State<AppState>,
    Query(query): Query<ModelsQuery>,
) -> Result<Response> {
    let models = state
        .replay
        .available_models(query.provider.as_deref())
        .await?;
    Ok(ApiResponse::ok(models).into_response())
}

/// POST /api/cost-estimate
pub async fn cost_estimate(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CostEstimateRequest>, JsonRejection>,
) -> Result<Response> {
    let request = parse_json(payload)?;
    let estimate = state.replay.estimate_cost(&request)?;
    Ok(ApiResponse::ok(estimate).into_response())
}

/// GET /api/active-requests
pub async fn active_requests(State(state): State<AppState>) -> impl IntoResponse {
    let requests = state.active_requests().snapshot();
    ApiResponse::ok(json!({
        "count": requests.len(),
        "requests": requests,
    }))
}

/// GET /api/circuit-breakers
pub async fn circuit_breakers(State(state): State<AppState>) -> impl IntoResponse {
    ApiResponse::ok(state.resilience.breakers().snapshot())
}

/// POST /proxy/:provider/v1/chat/completions
pub async fn proxy_chat_completions(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    state
        .proxy
        .forward(&provider, "/chat/completions", &headers, body)
        .await
}

/// POST /proxy/ollama/api/generate
pub async fn proxy_ollama_generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    state
        .proxy
        .forward("ollama", "/api/generate", &headers, body)
        .await
}

/// Fallback for unknown routes
pub async fn not_found() -> impl IntoResponse {
    MonitorError::NotFound("Route not found".to_string())
}

fn llm_status(err: &LLMError) -> StatusCode {
    match err {
        LLMError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
        LLMError::ProviderNotFound(_) | LLMError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        LLMError::RetriesExhausted { last_error, .. } if last_error.is_circuit_open() => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => match (err.status_code(), err.error_code()) {
            (Some(429), _) => StatusCode::TOO_MANY_REQUESTS,
            (Some(504), _) | (_, Some("ETIMEDOUT")) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        },
    }
}

impl MonitorError {
    /// HTTP status this error is reported with
    pub fn status_code(&self) -> StatusCode {
        match self {
            MonitorError::Llm(err) => llm_status(err),
            MonitorError::Validation(_) | MonitorError::UnsupportedProvider(_) => {
                StatusCode::BAD_REQUEST
            }
            MonitorError::NotFound(_) => StatusCode::NOT_FOUND,
            MonitorError::Storage(_)
            | MonitorError::Config(_)
            | MonitorError::Serialization(_)
            | MonitorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Value {
        match self {
            MonitorError::Llm(LLMError::RetriesExhausted {
                last_error,
                retry_history,
                total_attempts,
            }) => json!({
                "lastError": last_error.to_string(),
                "code": last_error.error_code(),
                "statusCode": last_error.status_code(),
                "totalAttempts": total_attempts,
                "retryHistory": retry_history,
            }),
            MonitorError::Llm(err) => json!({
                "code": err.error_code(),
                "statusCode": err.status_code(),
                "circuitOpen": err.is_circuit_open(),
            }),
            _ => Value::Null,
        }
    }
}

impl IntoResponse for MonitorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed ({}): {}", status, self);
        } else {
            warn!("Request rejected ({}): {}", status, self);
        }

        let body = json!({
            "success": false,
            "error": self.to_string(),
            "details": self.details(),
        });
        (status, Json(body)).into_response()
    }
}
