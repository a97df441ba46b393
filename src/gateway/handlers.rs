//! HTTP handlers

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use validator::Validate;

use crate::auth::AuthenticatedUser;
use crate::transfer::{
    ExternalTransferRequest, HistoryEntry, InternalTransferRequest, TransferSummary,
};

use super::state::AppState;
use super::types::{ApiError, ApiResponse};

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

/// Health check
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "System",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse),
        (status = 503, description = "Database unreachable")
    )
)]
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, ApiError> {
    match state.db.health_check().await {
        Ok(()) => Ok(Json(HealthResponse {
            status: "ok",
            database: "up",
        })),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed");
            Err(ApiError {
                status: axum::http::StatusCode::SERVICE_UNAVAILABLE,
                code: "DATABASE_ERROR",
                message: "Database unreachable".to_string(),
            })
        }
    }
}

/// Create an internal transfer
#[utoipa::path(
    post,
    path = "/api/v1/transfers/internal",
    tag = "Transfer",
    security(("bearer_auth" = [])),
    request_body = InternalTransferRequest,
    responses(
        (status = 200, description = "Transfer completed", body = ApiResponse<TransferSummary>),
        (status = 400, description = "Validation failure or insufficient funds"),
        (status = 401, description = "Missing or invalid token"),
        (status = 404, description = "Unknown currency, receiver or wallet")
    )
)]
pub async fn create_internal_transfer(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    headers: HeaderMap,
    Json(req): Json<InternalTransferRequest>,
) -> Result<Json<ApiResponse<TransferSummary>>, ApiError> {
    req.validate()?;
    let summary = state
        .service
        .internal_transfer(user.caller(), client_ip(&headers), &req)
        .await?;
    Ok(Json(ApiResponse::success(summary)))
}

/// Create an external withdrawal
#[utoipa::path(
    post,
    path = "/api/v1/transfers/external",
    tag = "Transfer",
    security(("bearer_auth" = [])),
    request_body = ExternalTransferRequest,
    responses(
        (status = 200, description = "Withdrawal accepted as PENDING", body = ApiResponse<TransferSummary>),
        (status = 400, description = "Validation failure or insufficient funds"),
        (status = 401, description = "Missing or invalid token"),
        (status = 404, description = "Unknown currency or wallet")
    )
)]
pub async fn create_external_transfer(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<ExternalTransferRequest>,
) -> Result<Json<ApiResponse<TransferSummary>>, ApiError> {
    req.validate()?;
    let summary = state
        .service
        .external_transfer(user.caller(), &req)
        .await?;
    Ok(Json(ApiResponse::success(summary)))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct HistoryQuery {
    /// Page size, capped at 100 (default 20)
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// The caller's transfer history, newest first
#[utoipa::path(
    get,
    path = "/api/v1/transfers/history",
    tag = "Transfer",
    security(("bearer_auth" = [])),
    params(HistoryQuery),
    responses(
        (status = 200, description = "History page", body = ApiResponse<Vec<HistoryEntry>>),
        (status = 401, description = "Missing or invalid token")
    )
)]
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<HistoryEntry>>>, ApiError> {
    let entries = state
        .service
        .history(user.caller(), query.limit, query.offset)
        .await?;
    Ok(Json(ApiResponse::success(entries)))
}

/// Look a transfer up by id.
///
/// An unknown (or unparseable) id is not an error: the response is 200 with
/// `data: null`, which existing clients depend on.
#[utoipa::path(
    get,
    path = "/api/v1/transfers/{transfer_id}",
    tag = "Transfer",
    security(("bearer_auth" = [])),
    params(("transfer_id" = String, Path, description = "ULID transfer id")),
    responses(
        (status = 200, description = "Transfer, or data:null when unknown", body = ApiResponse<TransferSummary>),
        (status = 401, description = "Missing or invalid token")
    )
)]
pub async fn get_transfer(
    State(state): State<Arc<AppState>>,
    Extension(_user): Extension<AuthenticatedUser>,
    Path(transfer_id): Path<String>,
) -> Result<Json<ApiResponse<TransferSummary>>, ApiError> {
    match state.service.get(&transfer_id).await? {
        Some(summary) => Ok(Json(ApiResponse::success(summary))),
        None => Ok(Json(ApiResponse::null())),
    }
}

/// Best-effort client address from proxy headers
fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_takes_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.1.2.3, 172.16.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers), Some("10.1.2.3".to_string()));
    }

    #[test]
    fn test_client_ip_absent_or_empty() {
        assert_eq!(client_ip(&HeaderMap::new()), None);

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "".parse().unwrap());
        assert_eq!(client_ip(&headers), None);
    }
}
