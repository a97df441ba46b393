//! Gateway wire envelope
//!
//! Success responses carry `{"status": "SUCCESS", "data": ...}`; errors carry
//! `{"status": "ERROR", "message": ..., "code": ...}`. `data` is always
//! present on success, including the explicit `null` the lookup endpoint
//! returns for an unknown transfer id.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::transfer::TransferError;

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub status: &'static str,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "SUCCESS",
            data: Some(data),
        }
    }

    /// A successful response with `data: null`, used by lookups that treat an
    /// unknown id as an empty result rather than an error
    pub fn null() -> Self {
        Self {
            status: "SUCCESS",
            data: None,
        }
    }
}

/// Error envelope, convertible from the domain error taxonomy
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub status: &'static str,
    pub message: String,
    pub code: &'static str,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "INVALID_PARAMETER",
            message: message.into(),
        }
    }
}

impl From<TransferError> for ApiError {
    fn from(e: TransferError) -> Self {
        Self {
            status: StatusCode::from_u16(e.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            code: e.code(),
            message: e.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(e: validator::ValidationErrors) -> Self {
        ApiError::bad_request(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            status: "ERROR",
            message: self.message,
            code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_success_envelope() {
        let json = serde_json::to_value(ApiResponse::success(vec![1, 2])).unwrap();
        assert_eq!(json["status"], "SUCCESS");
        assert_eq!(json["data"], serde_json::json!([1, 2]));
    }

    #[test]
    fn test_null_data_is_serialized_not_omitted() {
        let json = serde_json::to_value(ApiResponse::<i64>::null()).unwrap();
        assert_eq!(json["status"], "SUCCESS");
        assert!(json.as_object().unwrap().contains_key("data"));
        assert!(json["data"].is_null());
    }

    #[test]
    fn test_error_envelope_shape() {
        let err: ApiError = TransferError::InsufficientFunds {
            required: Decimal::from(10),
            available: Decimal::ONE,
        }
        .into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "INSUFFICIENT_FUNDS");

        let body = ApiErrorBody {
            status: "ERROR",
            message: err.message,
            code: err.code,
        };
        let json = serde_json::to_value(body).unwrap();
        assert_eq!(json["status"], "ERROR");
        assert_eq!(json["code"], "INSUFFICIENT_FUNDS");
        assert!(json["message"].as_str().unwrap().contains("10"));
    }
}
