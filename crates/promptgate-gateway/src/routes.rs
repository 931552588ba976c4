//! HTTP routes and handlers

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use promptgate_core::{Error, Recommendation, ThreatKind, ValidationMode, ValidationRequest};
use promptgate_reputation::{AdminOps, AuditFilter, ReputationFilter};
use promptgate_session::SessionTracker;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{info, warn};

use crate::pipeline::Orchestrator;
use crate::profile::ProfileResolver;

/// Request body cap: a 32KB prompt plus JSON envelope headroom
const MAX_BODY_BYTES: usize = 128 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub admin: Arc<AdminOps>,
    pub sessions: Arc<SessionTracker>,
    pub profiles: Arc<dyn ProfileResolver>,
    pub metrics_handle: Option<PrometheusHandle>,
}

/// Build the gateway router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/validate", post(validate))
        .route("/admin/ips", get(list_ip_records))
        .route("/admin/ips/block", post(block_ip))
        .route("/admin/ips/unblock", post(unblock_ip))
        .route("/admin/whitelist", post(whitelist_add).delete(whitelist_remove))
        .route("/admin/blacklist", post(blacklist_add).delete(blacklist_remove))
        .route("/admin/audit-log", get(audit_log))
        .route("/admin/privacy/purge", delete(purge_user_sessions))
        .fallback(fallback)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn metrics(State(state): State<AppState>) -> String {
    state
        .metrics_handle
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default()
}

/// Validation request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateBody {
    prompt: String,
    #[serde(default)]
    session_token: Option<String>,
    #[serde(default)]
    mode: Option<ValidationMode>,
}

/// Validation response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateResponse {
    safe: bool,
    confidence: f64,
    threats: Vec<ThreatKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    recommendation: Option<Recommendation>,
    session_token: String,
    processing_time_ms: u64,
    ip_reputation_checked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    ip_reputation_score: Option<f64>,
}

/// Main validation handler
async fn validate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ValidateBody>,
) -> Result<Response, AppError> {
    let api_key = required_header(&headers, "api-key")?;
    let user_ip = required_header(&headers, "user-ip")?;

    let profile = state
        .profiles
        .resolve(&api_key)
        .await?
        .ok_or(AppError::Unauthorized)?;

    let mut request = ValidationRequest::new(body.prompt, user_ip);
    request.session_token = body.session_token;
    request.mode = body.mode.unwrap_or_default();
    request.user_agent = header_value(&headers, "user-agent");
    request.user_id = profile.user_id;
    request.tier = profile.tier;
    request.auto_block_enabled = profile.auto_block_enabled;
    request.share_intelligence = profile.share_intelligence;

    let outcome = state.orchestrator.validate(&request).await?;
    let verdict = outcome.verdict;

    Ok(Json(ValidateResponse {
        safe: verdict.safe,
        confidence: verdict.confidence,
        threats: verdict.threats,
        reasoning: (!verdict.reasoning.is_empty()).then_some(verdict.reasoning),
        recommendation: verdict.recommendation,
        session_token: outcome.session_token,
        processing_time_ms: verdict.processing_time_ms,
        ip_reputation_checked: outcome.ip_reputation_checked,
        ip_reputation_score: outcome.ip_reputation_score,
    })
    .into_response())
}

/// Admin mutation body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdminActionBody {
    ip: String,
    reason: String,
    admin_id: String,
    #[serde(default)]
    severity: Option<String>,
}

async fn block_ip(
    State(state): State<AppState>,
    Json(body): Json<AdminActionBody>,
) -> Result<Response, AppError> {
    state
        .admin
        .block_ip(&body.ip, &body.reason, &body.admin_id)
        .await?;
    Ok(Json(json!({"success": true})).into_response())
}

async fn unblock_ip(
    State(state): State<AppState>,
    Json(body): Json<AdminActionBody>,
) -> Result<Response, AppError> {
    state
        .admin
        .unblock_ip(&body.ip, &body.reason, &body.admin_id)
        .await?;
    Ok(Json(json!({"success": true})).into_response())
}

async fn whitelist_add(
    State(state): State<AppState>,
    Json(body): Json<AdminActionBody>,
) -> Result<Response, AppError> {
    state
        .admin
        .whitelist_add(&body.ip, &body.reason, &body.admin_id)
        .await?;
    Ok(Json(json!({"success": true})).into_response())
}

async fn whitelist_remove(
    State(state): State<AppState>,
    Json(body): Json<AdminActionBody>,
) -> Result<Response, AppError> {
    state
        .admin
        .whitelist_remove(&body.ip, &body.reason, &body.admin_id)
        .await?;
    Ok(Json(json!({"success": true})).into_response())
}

async fn blacklist_add(
    State(state): State<AppState>,
    Json(body): Json<AdminActionBody>,
) -> Result<Response, AppError> {
    let severity = body.severity.as_deref().unwrap_or("medium");
    state
        .admin
        .blacklist_add(&body.ip, &body.reason, severity, &body.admin_id)
        .await?;
    Ok(Json(json!({"success": true})).into_response())
}

async fn blacklist_remove(
    State(state): State<AppState>,
    Json(body): Json<AdminActionBody>,
) -> Result<Response, AppError> {
    state
        .admin
        .blacklist_remove(&body.ip, &body.reason, &body.admin_id)
        .await?;
    Ok(Json(json!({"success": true})).into_response())
}

async fn list_ip_records(
    State(state): State<AppState>,
    Query(filter): Query<ReputationFilter>,
) -> Result<Response, AppError> {
    let records = state.admin.list_records(&filter).await?;
    Ok(Json(json!({
        "total": records.len(),
        "records": records,
    }))
    .into_response())
}

async fn audit_log(
    State(state): State<AppState>,
    Query(filter): Query<AuditFilter>,
) -> Result<Response, AppError> {
    let entries = state.admin.audit_log(&filter).await?;
    Ok(Json(json!({
        "total": entries.len(),
        "entries": entries,
    }))
    .into_response())
}

/// Privacy-deletion body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PurgeBody {
    user_id: String,
}

async fn purge_user_sessions(
    State(state): State<AppState>,
    Json(body): Json<PurgeBody>,
) -> Result<Response, AppError> {
    if body.user_id.trim().is_empty() {
        return Err(AppError::from(Error::admin("user id is required")));
    }
    let purged = state.sessions.purge_user(&body.user_id).await?;
    info!(user_id = %body.user_id, purged, "privacy deletion completed");
    Ok(Json(json!({"success": true, "purged": purged})).into_response())
}

async fn fallback() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not found")
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn required_header(headers: &HeaderMap, name: &str) -> Result<String, AppError> {
    header_value(headers, name)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::MissingHeader(name.to_string()))
}

/// Error handling
#[derive(Debug)]
enum AppError {
    MissingHeader(String),
    Unauthorized,
    Core(Error),
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError::Core(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            AppError::MissingHeader(name) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                format!("missing required header: {}", name),
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "unknown API key".to_string(),
            ),
            AppError::Core(err) => {
                let status = match &err {
                    Error::InputTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                    Error::InvalidAdminInput(_) => StatusCode::BAD_REQUEST,
                    Error::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    Error::ModelUnavailable(_) => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    warn!("request failed: {}", err);
                }
                (status, "validation_error", err.to_string())
            }
        };

        let body = json!({
            "error": {
                "message": message,
                "type": kind,
            }
        });

        (status, Json(body)).into_response()
    }
}
