//! Envelope responses and HTTP status mapping

use crate::devices::{OperationError, OperationResult};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use protocol::{Envelope, ErrorCode};
use serde::Serialize;

/// `operationId` attached to successful mutations
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRef {
    pub operation_id: u64,
}

pub fn success<T: Serialize>(envelope: Envelope<T>) -> Response {
    (StatusCode::OK, Json(envelope)).into_response()
}

pub fn failure(error: OperationError) -> Response {
    let code = error.code();
    let envelope: Envelope = Envelope::error(code, error.to_string()).with_reason(error.reason());
    (status_of(code), Json(envelope)).into_response()
}

pub fn invalid(message: impl Into<String>) -> Response {
    failure(OperationError::InvalidRequest(message.into()))
}

/// Success with the operation id, or the typed failure
pub fn outcome(result: Result<OperationResult, OperationError>) -> Response {
    match result {
        Ok(result) => success(
            Envelope::data(OperationRef {
                operation_id: result.id,
            })
            .with_message(result.message),
        ),
        Err(e) => failure(e),
    }
}

fn status_of(code: ErrorCode) -> StatusCode {
    StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}
