//! Derives upload progress from object-store state alone.

use crate::{
    models::upload::{DeclaredUpload, FileIdentity, SessionState, chunk_prefix, parse_chunk_index},
    services::object_store::ObjectStore,
};
use std::{collections::BTreeSet, sync::Arc};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct SessionResolver {
    store: Arc<dyn ObjectStore>,
}

impl SessionResolver {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Report whether `identity` is already merged or which chunks are stored.
    ///
    /// An existing final object wins regardless of chunk state. Store failures
    /// never surface: a failed existence check falls through to listing and a
    /// failed listing reports no chunks, since re-uploading a stored chunk is
    /// harmless.
    pub async fn resolve(&self, identity: &FileIdentity, declared: DeclaredUpload) -> SessionState {
        let final_key = identity.final_key();
        match self.store.exists(&final_key).await {
            Ok(true) => return SessionState::Completed { url: final_key },
            Ok(false) => {}
            Err(err) => warn!(
                key = %final_key,
                error = %err,
                "final object check failed, treating as absent"
            ),
        }

        let uploaded_chunks = self.uploaded_chunks(&identity.hash).await;
        debug!(
            hash = %identity.hash,
            declared_chunks = ?declared.chunk_count,
            declared_size = ?declared.file_size,
            stored = uploaded_chunks.len(),
            "resolved upload session"
        );
        SessionState::Uploading { uploaded_chunks }
    }

    /// Indices of stored chunks for `hash`, ascending and de-duplicated.
    pub async fn uploaded_chunks(&self, hash: &str) -> Vec<u32> {
        let prefix = chunk_prefix(hash);
        let keys = match self.store.list(&prefix).await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(%prefix, error = %err, "failed to list chunks, reporting none");
                return Vec::new();
            }
        };

        let mut indices = BTreeSet::new();
        for key in keys {
            match parse_chunk_index(&prefix, &key) {
                Some(index) => {
                    indices.insert(index);
                }
                None => warn!(%key, "invalid chunk name"),
            }
        }
        indices.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        object_store::bytes_stream,
        testing::{FailingStore, Op},
    };

    fn resolver_with(store: &Arc<FailingStore>) -> SessionResolver {
        SessionResolver::new(store.clone())
    }

    #[tokio::test]
    async fn unseen_hash_is_uploading_with_no_chunks() {
        let store = Arc::new(FailingStore::new());
        let state = resolver_with(&store)
            .resolve(&FileIdentity::new("never-seen", "a.bin"), DeclaredUpload::default())
            .await;
        assert_eq!(
            state,
            SessionState::Uploading {
                uploaded_chunks: vec![]
            }
        );
    }

    #[tokio::test]
    async fn stored_chunks_are_reported_sorted_and_junk_is_skipped() {
        let store = Arc::new(FailingStore::new());
        for key in ["chunks/abc/10", "chunks/abc/2", "chunks/abc/notes", "chunks/abc/0"] {
            store.inner.put(key, bytes_stream("x"), None).await.unwrap();
        }

        let state = resolver_with(&store)
            .resolve(&FileIdentity::new("abc", "a.bin"), DeclaredUpload::default())
            .await;
        assert_eq!(
            state,
            SessionState::Uploading {
                uploaded_chunks: vec![0, 2, 10]
            }
        );
    }

    #[tokio::test]
    async fn final_object_short_circuits_chunk_inspection() {
        let store = Arc::new(FailingStore::new());
        store
            .inner
            .put("files/abc/a.bin", bytes_stream("done"), None)
            .await
            .unwrap();
        store.fail(Op::List);

        let state = resolver_with(&store)
            .resolve(&FileIdentity::new("abc", "a.bin"), DeclaredUpload::default())
            .await;
        assert_eq!(
            state,
            SessionState::Completed {
                url: "files/abc/a.bin".into()
            }
        );
    }

    #[tokio::test]
    async fn completion_is_per_file_name() {
        let store = Arc::new(FailingStore::new());
        store
            .inner
            .put("files/abc/a.bin", bytes_stream("done"), None)
            .await
            .unwrap();

        let state = resolver_with(&store)
            .resolve(&FileIdentity::new("abc", "b.bin"), DeclaredUpload::default())
            .await;
        assert!(matches!(state, SessionState::Uploading { .. }));
    }

    #[tokio::test]
    async fn listing_failure_fails_open() {
        let store = Arc::new(FailingStore::new());
        store.inner.put("chunks/abc/0", bytes_stream("x"), None).await.unwrap();
        store.fail(Op::List);

        let state = resolver_with(&store)
            .resolve(&FileIdentity::new("abc", "a.bin"), DeclaredUpload::default())
            .await;
        assert_eq!(
            state,
            SessionState::Uploading {
                uploaded_chunks: vec![]
            }
        );
    }

    #[tokio::test]
    async fn existence_failure_falls_through_to_listing() {
        let store = Arc::new(FailingStore::new());
        store.inner.put("chunks/abc/1", bytes_stream("x"), None).await.unwrap();
        store.fail(Op::Exists);

        let state = resolver_with(&store)
            .resolve(&FileIdentity::new("abc", "a.bin"), DeclaredUpload::default())
            .await;
        assert_eq!(
            state,
            SessionState::Uploading {
                uploaded_chunks: vec![1]
            }
        );
    }
}
