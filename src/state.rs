//! Shared state handed to every handler.

use crate::services::upload_service::UploadService;

#[derive(Clone)]
pub struct AppState {
    pub uploads: UploadService,

    /// Largest accepted chunk body, in bytes.
    pub max_chunk_bytes: usize,
}

impl AppState {
    pub fn new(uploads: UploadService, max_chunk_bytes: usize) -> Self {
        Self {
            uploads,
            max_chunk_bytes,
        }
    }
}
