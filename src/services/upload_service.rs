//! UploadService: the `init` / `upload_chunk` / `complete` operations the
//! HTTP layer exposes, built from the resolver, chunk writer and merge engine
//! over one injected [`ObjectStore`].

use crate::{
    errors::UploadError,
    models::{
        object::StoredObject,
        upload::{
            CompleteUploadReq, CompleteUploadResp, DeclaredUpload, FileIdentity, InitUploadReq,
            SessionState,
        },
    },
    services::{
        chunk_writer::ChunkWriter,
        cleanup::CleanupPool,
        merge_engine::MergeEngine,
        object_store::{ByteStream, ObjectStore, StorageError},
        resolver::SessionResolver,
    },
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};
use tracing::{info, warn};

const MAX_SEGMENT_LEN: usize = 255;

/// Per-hash async locks serializing `complete` within this process.
#[derive(Default)]
struct MergeLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MergeLocks {
    fn acquire(&self, hash: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(hash.to_string()).or_default().clone()
    }

    /// Forget `hash` once nobody else holds or waits on its lock.
    fn release(&self, hash: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one in `lock`.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(hash);
        }
    }
}

#[derive(Clone)]
pub struct UploadService {
    store: Arc<dyn ObjectStore>,
    resolver: SessionResolver,
    writer: ChunkWriter,
    merger: MergeEngine,
    merge_locks: Option<Arc<MergeLocks>>,
}

impl UploadService {
    /// `merge_guard` enables per-hash serialization of `complete` plus a
    /// create-if-absent check on the final object.
    pub fn new(store: Arc<dyn ObjectStore>, cleanup: CleanupPool, merge_guard: bool) -> Self {
        Self {
            resolver: SessionResolver::new(store.clone()),
            writer: ChunkWriter::new(store.clone()),
            merger: MergeEngine::new(store.clone(), cleanup),
            merge_locks: merge_guard.then(Default::default),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Resume probe: `COMPLETED` with the final key, or `UPLOADING` with the
    /// indices already stored.
    pub async fn init(&self, req: InitUploadReq) -> Result<SessionState, UploadError> {
        ensure_segment("fileMD5", &req.file_hash)?;
        ensure_segment("fileName", &req.file_name)?;
        let declared = DeclaredUpload {
            chunk_count: req
                .chunk_count
                .map(|count| non_negative("chunkCount", count))
                .transpose()?,
            file_size: req
                .file_size
                .map(|size| {
                    u64::try_from(size)
                        .map_err(|_| UploadError::InvalidRequest("fileSize must be >= 0".into()))
                })
                .transpose()?,
        };

        let identity = FileIdentity::new(req.file_hash, req.file_name);
        Ok(self.resolver.resolve(&identity, declared).await)
    }

    /// Store one chunk. `length`, when known, must match the body.
    pub async fn upload_chunk(
        &self,
        hash: &str,
        index: i64,
        body: ByteStream,
        length: Option<u64>,
    ) -> Result<StoredObject, UploadError> {
        ensure_segment("fileMD5", hash)?;
        let index = non_negative("chunkIndex", index)?;
        self.writer.write_chunk(hash, index, body, length).await
    }

    /// Merge chunks `0..chunkCount` into `files/{hash}/{fileName}`.
    ///
    /// With the merge guard on, concurrent calls for one hash run one at a
    /// time and a call that finds the final object already present returns
    /// its key without composing again.
    pub async fn complete(&self, req: CompleteUploadReq) -> Result<CompleteUploadResp, UploadError> {
        ensure_segment("fileMD5", &req.file_hash)?;
        ensure_segment("fileName", &req.file_name)?;
        let chunk_count = non_negative("chunkCount", req.chunk_count)?;
        if chunk_count == 0 {
            return Err(UploadError::InvalidRequest("chunkCount must be >= 1".into()));
        }
        let identity = FileIdentity::new(req.file_hash, req.file_name);

        let url = match &self.merge_locks {
            None => self.merger.merge(&identity, chunk_count).await?,
            Some(locks) => {
                let lock = locks.acquire(&identity.hash);
                let result = {
                    let _guard = lock.lock().await;
                    self.merge_if_absent(&identity, chunk_count).await
                };
                locks.release(&identity.hash, lock);
                result?
            }
        };
        Ok(CompleteUploadResp { url })
    }

    async fn merge_if_absent(
        &self,
        identity: &FileIdentity,
        chunk_count: u32,
    ) -> Result<String, UploadError> {
        let final_key = identity.final_key();
        match self.store.exists(&final_key).await {
            Ok(true) => {
                info!(key = %final_key, "already merged, skipping compose");
                return Ok(final_key);
            }
            Ok(false) => {}
            Err(err) => warn!(key = %final_key, error = %err, "final object check failed"),
        }
        self.merger.merge(identity, chunk_count).await
    }

    /// Metadata and payload stream of a merged file.
    pub async fn open_file(
        &self,
        hash: &str,
        file_name: &str,
    ) -> Result<(StoredObject, ByteStream), UploadError> {
        ensure_segment("fileMD5", hash)?;
        ensure_segment("fileName", file_name)?;
        let key = FileIdentity::new(hash, file_name).final_key();

        let not_found = |err: StorageError| match err {
            StorageError::NotFound(key) => UploadError::NotFound(key),
            other => UploadError::Storage(other),
        };
        let meta = self.store.stat(&key).await.map_err(not_found)?;
        let body = self.store.get(&key).await.map_err(not_found)?;
        Ok((meta, body))
    }
}

/// Content hashes and file names become single key segments.
fn ensure_segment(field: &str, value: &str) -> Result<(), UploadError> {
    let valid = !value.is_empty()
        && value.len() <= MAX_SEGMENT_LEN
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\'])
        && !value.chars().any(char::is_control);
    if valid {
        Ok(())
    } else {
        Err(UploadError::InvalidRequest(format!(
            "{field} must be a non-empty name without path separators"
        )))
    }
}

fn non_negative(field: &str, value: i64) -> Result<u32, UploadError> {
    u32::try_from(value)
        .map_err(|_| UploadError::InvalidRequest(format!("{field} must be between 0 and {}", u32::MAX)))
}
