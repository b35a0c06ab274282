//! In-process object store for development (`--store memory`) and tests.

use crate::{
    models::object::StoredObject,
    services::object_store::{
        ByteStream, ObjectStore, StorageError, StorageResult, bytes_stream, collect_stream,
        ensure_key_safe,
    },
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Clone)]
struct Entry {
    data: Bytes,
    meta: StoredObject,
}

impl Entry {
    fn new(key: &str, data: Bytes) -> Self {
        let meta = StoredObject {
            key: key.to_string(),
            size_bytes: data.len() as i64,
            etag: format!("{:x}", md5::compute(&data)),
            last_modified: Utc::now(),
        };
        Self { data, meta }
    }
}

/// Keeps every object in a sorted map; nothing survives a restart.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, Entry>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn stat(&self, key: &str) -> StorageResult<StoredObject> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|entry| entry.meta.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn put(
        &self,
        key: &str,
        body: ByteStream,
        expected_len: Option<u64>,
    ) -> StorageResult<StoredObject> {
        ensure_key_safe(key)?;
        let data = collect_stream(body).await?;
        if let Some(expected) = expected_len {
            if data.len() as u64 != expected {
                return Err(StorageError::LengthMismatch {
                    key: key.to_string(),
                    expected,
                    actual: data.len() as u64,
                });
            }
        }

        let entry = Entry::new(key, data);
        let meta = entry.meta.clone();
        self.objects.write().await.insert(key.to_string(), entry);
        Ok(meta)
    }

    async fn get(&self, key: &str) -> StorageResult<ByteStream> {
        let data = self
            .objects
            .read()
            .await
            .get(key)
            .map(|entry| entry.data.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(bytes_stream(data))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let objects = self.objects.read().await;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn compose(&self, dest: &str, sources: &[String]) -> StorageResult<StoredObject> {
        ensure_key_safe(dest)?;
        // Held across read and insert so the composition is atomic.
        let mut objects = self.objects.write().await;

        let mut buf = BytesMut::new();
        for source in sources {
            let entry = objects
                .get(source)
                .ok_or_else(|| StorageError::NotFound(source.clone()))?;
            buf.extend_from_slice(&entry.data);
        }

        let entry = Entry::new(dest, buf.freeze());
        let meta = entry.meta.clone();
        objects.insert(dest.to_string(), entry);
        Ok(meta)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
