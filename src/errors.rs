use crate::{
    models::envelope::{ApiResponse, ErrorKind},
    services::object_store::StorageError,
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;
use thiserror::Error;

/// Failures of the upload operations, one variant per recovery strategy.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A single chunk failed to persist; retrying that chunk is safe.
    #[error("failed to store chunk {index} of `{hash}`: {source}")]
    ChunkWrite {
        hash: String,
        index: u32,
        #[source]
        source: StorageError,
    },

    /// Compose failed and no final object was created.
    #[error("failed to merge chunks of `{hash}`: {source}")]
    Merge {
        hash: String,
        #[source]
        source: StorageError,
    },

    /// The chunk body is over the configured limit; retrying cannot succeed.
    #[error("chunk exceeds {max} bytes")]
    TooLarge { max: usize },

    #[error("`{0}` not found")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) | Self::TooLarge { .. } => ErrorKind::InvalidRequest,
            Self::ChunkWrite { .. } => ErrorKind::ChunkWriteFailed,
            Self::Merge { .. } => ErrorKind::MergeFailed,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Storage(_) => ErrorKind::StorageError,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ChunkWrite { .. } | Self::Merge { .. } | Self::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Handler-facing error rendered as the standard response envelope.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub kind: ErrorKind,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: msg.into(),
        }
    }

    /// Shortcut for a 400 with `kind: invalid_request`.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorKind::InvalidRequest, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        ApiResponse::<()>::error(self.status, self.kind, self.message).into_response()
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        AppError::new(err.status(), err.kind(), err.to_string())
    }
}
