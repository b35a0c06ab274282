//! Defines routes for the resumable upload protocol.
//!
//! ## Structure
//! - **Upload endpoints**
//!   - `POST /upload/init`: resume probe (completed, or stored chunk indices)
//!   - `POST /upload/chunk`: multipart chunk upload
//!   - `PUT  /upload/chunk/{hash}/{index}`: raw streaming chunk upload
//!   - `POST /upload/complete`: merge chunks into the final object
//!
//! - **File endpoints**
//!   - `GET  /files/{hash}/{fileName}`: download a merged file
//!
//! - **Legacy prefix**
//!   - `/minio/upload/{init,chunk,complete}` route to the same handlers
//!
//! - **Probes**
//!   - `GET  /healthz`, `GET /readyz`

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::{complete_upload, download_file, init_upload, put_chunk, upload_chunk},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};

/// Room for multipart boundaries and the small text fields around a chunk.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// Build the router. `max_chunk_bytes` bounds buffered request bodies
/// (multipart chunks and JSON).
pub fn routes(max_chunk_bytes: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // upload protocol
        .route("/upload/init", post(init_upload))
        .route("/upload/chunk", post(upload_chunk))
        .route("/upload/chunk/{hash}/{index}", put(put_chunk))
        .route("/upload/complete", post(complete_upload))
        // path used by existing clients
        .route("/minio/upload/init", post(init_upload))
        .route("/minio/upload/chunk", post(upload_chunk))
        .route("/minio/upload/complete", post(complete_upload))
        // merged files
        .route("/files/{hash}/{file_name}", get(download_file))
        .layer(DefaultBodyLimit::max(
            max_chunk_bytes.saturating_add(FORM_OVERHEAD_BYTES),
        ))
}
