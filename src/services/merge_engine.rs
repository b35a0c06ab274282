//! Composes stored chunks into the final object and schedules their removal.

use crate::{
    errors::UploadError,
    models::upload::{FileIdentity, chunk_key},
    services::{
        cleanup::{CleanupJob, CleanupPool},
        object_store::ObjectStore,
    },
};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct MergeEngine {
    store: Arc<dyn ObjectStore>,
    cleanup: CleanupPool,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn ObjectStore>, cleanup: CleanupPool) -> Self {
        Self { store, cleanup }
    }

    /// Compose chunks `0..chunk_count` of `identity.hash`, in index order,
    /// into the final key and return that key.
    ///
    /// Relies on the store's all-or-nothing compose to reject missing chunks.
    /// Cleanup is queued after success and may still be pending on return.
    /// No existence check or locking happens here; see
    /// [`UploadService::complete`](crate::services::upload_service::UploadService::complete).
    pub async fn merge(
        &self,
        identity: &FileIdentity,
        chunk_count: u32,
    ) -> Result<String, UploadError> {
        let sources: Vec<String> = (0..chunk_count)
            .map(|index| chunk_key(&identity.hash, index))
            .collect();
        let final_key = identity.final_key();

        let merged = self
            .store
            .compose(&final_key, &sources)
            .await
            .map_err(|source| {
                warn!(key = %final_key, chunk_count, error = %source, "merge failed");
                UploadError::Merge {
                    hash: identity.hash.clone(),
                    source,
                }
            })?;
        info!(
            key = %final_key,
            chunk_count,
            size = merged.size_bytes,
            etag = %merged.etag,
            "chunks merged"
        );

        self.cleanup.submit(CleanupJob {
            hash: identity.hash.clone(),
            chunk_count,
        });
        Ok(final_key)
    }
}
