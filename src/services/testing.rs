//! Fault-injecting store wrapper shared by the service tests.

use crate::{
    models::object::StoredObject,
    services::{
        memory_store::MemoryObjectStore,
        object_store::{ByteStream, ObjectStore, StorageError, StorageResult},
    },
};
use async_trait::async_trait;
use std::{
    collections::HashSet,
    io,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Exists,
    Put,
    List,
    Compose,
    Delete,
}

/// A [`MemoryObjectStore`] whose operations can be switched to fail, and
/// which counts compose calls.
#[derive(Default)]
pub struct FailingStore {
    pub inner: MemoryObjectStore,
    failing: Mutex<HashSet<Op>>,
    compose_calls: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, op: Op) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn heal(&self, op: Op) {
        self.failing.lock().unwrap().remove(&op);
    }

    pub fn compose_calls(&self) -> usize {
        self.compose_calls.load(Ordering::SeqCst)
    }

    fn check(&self, op: Op) -> StorageResult<()> {
        if self.failing.lock().unwrap().contains(&op) {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("injected {op:?} failure"),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FailingStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.check(Op::Exists)?;
        self.inner.exists(key).await
    }

    async fn stat(&self, key: &str) -> StorageResult<StoredObject> {
        self.check(Op::Exists)?;
        self.inner.stat(key).await
    }

    async fn put(
        &self,
        key: &str,
        body: ByteStream,
        expected_len: Option<u64>,
    ) -> StorageResult<StoredObject> {
        self.check(Op::Put)?;
        self.inner.put(key, body, expected_len).await
    }

    async fn get(&self, key: &str) -> StorageResult<ByteStream> {
        self.inner.get(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.check(Op::List)?;
        self.inner.list(prefix).await
    }

    async fn compose(&self, dest: &str, sources: &[String]) -> StorageResult<StoredObject> {
        self.compose_calls.fetch_add(1, Ordering::SeqCst);
        self.check(Op::Compose)?;
        self.inner.compose(dest, sources).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.check(Op::Delete)?;
        self.inner.delete(key).await
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}
