//! Persists one chunk under its `(hash, index)` key.

use crate::{
    errors::UploadError,
    models::{object::StoredObject, upload::chunk_key},
    services::object_store::{ByteStream, ObjectStore},
};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct ChunkWriter {
    store: Arc<dyn ObjectStore>,
}

impl ChunkWriter {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Write chunk `index` of `hash`. A retry of the same index replaces the
    /// earlier object; no other chunk is touched.
    pub async fn write_chunk(
        &self,
        hash: &str,
        index: u32,
        body: ByteStream,
        length: Option<u64>,
    ) -> Result<StoredObject, UploadError> {
        let key = chunk_key(hash, index);
        match self.store.put(&key, body, length).await {
            Ok(meta) => {
                debug!(%key, size = meta.size_bytes, etag = %meta.etag, "chunk stored");
                Ok(meta)
            }
            Err(source) => match source.payload_limit() {
                Some(max) => {
                    warn!(%key, max, "chunk over size limit, rejected");
                    Err(UploadError::TooLarge { max })
                }
                None => {
                    warn!(%key, error = %source, "chunk write failed");
                    Err(UploadError::ChunkWrite {
                        hash: hash.to_string(),
                        index,
                        source,
                    })
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        object_store::{bytes_stream, collect_stream, limit_stream},
        testing::{FailingStore, Op},
    };

    #[tokio::test]
    async fn retry_overwrites_same_index() {
        let store = Arc::new(FailingStore::new());
        let writer = ChunkWriter::new(store.clone());

        writer.write_chunk("abc", 0, bytes_stream("first"), None).await.unwrap();
        writer.write_chunk("abc", 0, bytes_stream("again"), Some(5)).await.unwrap();

        assert_eq!(store.inner.list("chunks/abc/").await.unwrap(), vec!["chunks/abc/0"]);
        let data = collect_stream(store.inner.get("chunks/abc/0").await.unwrap())
            .await
            .unwrap();
        assert_eq!(&data[..], b"again");
    }

    #[tokio::test]
    async fn store_failure_is_reported_as_chunk_write_error() {
        let store = Arc::new(FailingStore::new());
        let writer = ChunkWriter::new(store.clone());
        writer.write_chunk("abc", 0, bytes_stream("kept"), None).await.unwrap();

        store.fail(Op::Put);
        let err = writer
            .write_chunk("abc", 1, bytes_stream("lost"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::ChunkWrite { index: 1, .. }));

        assert_eq!(store.inner.list("chunks/abc/").await.unwrap(), vec!["chunks/abc/0"]);
    }

    #[tokio::test]
    async fn oversize_body_is_too_large_not_a_write_failure() {
        let store = Arc::new(FailingStore::new());
        let writer = ChunkWriter::new(store.clone());
        let body: ByteStream = Box::pin(futures::stream::iter(
            (0..4).map(|_| Ok::<_, std::io::Error>(bytes::Bytes::from(vec![7u8; 512]))),
        ));

        let err = writer
            .write_chunk("abc", 0, limit_stream(body, 1024), None)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::TooLarge { max: 1024 }));
        assert!(!store.inner.exists("chunks/abc/0").await.unwrap());
    }

    #[tokio::test]
    async fn large_indices_are_accepted() {
        let store = Arc::new(FailingStore::new());
        let writer = ChunkWriter::new(store.clone());
        writer
            .write_chunk("abc", 100_000, bytes_stream("x"), None)
            .await
            .unwrap();
        assert!(store.inner.exists("chunks/abc/100000").await.unwrap());
    }
}
