//! Uniform `{code, message, data, kind}` response envelope.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Machine-readable failure discriminator, so clients can pick a recovery
/// strategy without parsing `message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input; retrying the same request will not help.
    InvalidRequest,
    /// One chunk failed to persist; retry that chunk.
    ChunkWriteFailed,
    /// Compose failed (usually a missing chunk); re-probe with `init`.
    MergeFailed,
    /// Requested object does not exist.
    NotFound,
    /// Any other store failure.
    StorageError,
}

/// Response body shared by every upload endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub message: String,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            message: "success".into(),
            data: Some(data),
            kind: None,
        }
    }

    pub fn error(status: StatusCode, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: status.as_u16(),
            message: message.into(),
            data: None,
            kind: Some(kind),
        }
    }
}

impl ApiResponse<()> {
    /// Success with `data: null`.
    pub fn empty() -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            message: "success".into(),
            data: None,
            kind: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}
