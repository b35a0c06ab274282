//! HTTP handlers for the resumable upload protocol.
//!
//! Every response, success or failure, uses the `{code, message, data, kind}`
//! envelope; extractor rejections are folded into it as `invalid_request`.

use crate::{
    errors::{AppError, UploadError},
    models::{
        envelope::ApiResponse,
        object::StoredObject,
        upload::{CompleteUploadReq, CompleteUploadResp, InitUploadReq, SessionState},
    },
    services::object_store::{bytes_stream, limit_stream},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{
        Multipart, Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use futures::StreamExt;
use std::io;

/// `POST /upload/init`: report whether the file is complete or which chunks
/// are already stored.
pub async fn init_upload(
    State(state): State<AppState>,
    payload: Result<Json<InitUploadReq>, JsonRejection>,
) -> Result<ApiResponse<SessionState>, AppError> {
    let Json(req) = payload.map_err(|err| AppError::bad_request(err.body_text()))?;
    let session = state.uploads.init(req).await?;
    Ok(ApiResponse::ok(session))
}

/// `POST /upload/chunk`: multipart form with `file`, `fileMD5` and
/// `chunkIndex` fields, in any order.
pub async fn upload_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<ApiResponse<()>, AppError> {
    let mut hash: Option<String> = None;
    let mut index: Option<String> = None;
    let mut data: Option<Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.body_text()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("fileMD5") | Some("fileHash") => hash = Some(read_text(field).await?),
            Some("chunkIndex") => index = Some(read_text(field).await?),
            Some("file") => {
                data = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|err| AppError::bad_request(err.body_text()))?,
                )
            }
            _ => {}
        }
    }

    let hash = hash.ok_or_else(|| AppError::bad_request("missing fileMD5 field"))?;
    let index = index.ok_or_else(|| AppError::bad_request("missing chunkIndex field"))?;
    let index = index
        .trim()
        .parse::<i64>()
        .map_err(|_| AppError::bad_request(format!("chunkIndex `{}` is not an integer", index)))?;
    let data = data.ok_or_else(|| AppError::bad_request("missing file field"))?;
    if data.len() > state.max_chunk_bytes {
        return Err(too_large(state.max_chunk_bytes));
    }

    let length = data.len() as u64;
    state
        .uploads
        .upload_chunk(&hash, index, bytes_stream(data), Some(length))
        .await?;
    Ok(ApiResponse::empty())
}

/// `PUT /upload/chunk/{hash}/{index}`: raw request body streamed straight
/// into the store.
pub async fn put_chunk(
    State(state): State<AppState>,
    path: Result<Path<(String, i64)>, PathRejection>,
    headers: HeaderMap,
    body: Body,
) -> Result<ApiResponse<()>, AppError> {
    let Path((hash, index)) = path.map_err(|err| AppError::bad_request(err.body_text()))?;

    let declared_len = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let max = state.max_chunk_bytes;
    if declared_len.is_some_and(|len| len > max as u64) {
        return Err(too_large(max));
    }

    let stream = limit_stream(
        Box::pin(body.into_data_stream().map(|chunk| chunk.map_err(io::Error::other))),
        max,
    );
    state
        .uploads
        .upload_chunk(&hash, index, stream, declared_len)
        .await?;
    Ok(ApiResponse::empty())
}

/// `POST /upload/complete`: merge all chunks into the final object.
pub async fn complete_upload(
    State(state): State<AppState>,
    payload: Result<Json<CompleteUploadReq>, JsonRejection>,
) -> Result<ApiResponse<CompleteUploadResp>, AppError> {
    let Json(req) = payload.map_err(|err| AppError::bad_request(err.body_text()))?;
    let resp = state.uploads.complete(req).await?;
    Ok(ApiResponse::ok(resp))
}

/// `GET /files/{hash}/{fileName}`: stream a merged file.
pub async fn download_file(
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> Result<Response, AppError> {
    let Path((hash, file_name)) = path.map_err(|err| AppError::bad_request(err.body_text()))?;
    let (meta, stream) = state.uploads.open_file(&hash, &file_name).await?;

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|err| AppError::bad_request(err.body_text()))
}

fn too_large(max: usize) -> AppError {
    UploadError::TooLarge { max }.into()
}

fn set_object_headers(headers: &mut HeaderMap, meta: &StoredObject) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&meta.size_bytes.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.etag)) {
        headers.insert(header::ETAG, value);
    }
    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
