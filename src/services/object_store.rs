//! Object store capability set consumed by the upload core.
//!
//! Everything the resolver, chunk writer and merge engine need from storage
//! goes through [`ObjectStore`]; the handle is built once in `main` and
//! passed down as `Arc<dyn ObjectStore>`.

use crate::models::object::StoredObject;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::{io, pin::Pin};
use thiserror::Error;

/// A boxed stream of payload bytes, used for both writes and reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` length mismatch: expected {expected} bytes, received {actual}")]
    LengthMismatch {
        key: String,
        expected: u64,
        actual: u64,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Carried inside the `io::Error` a [`limit_stream`] yields once its body
/// passes `max` bytes, so stores report it as an ordinary I/O failure.
#[derive(Debug, Error)]
#[error("payload exceeds {max} bytes")]
pub struct PayloadTooLarge {
    pub max: usize,
}

impl StorageError {
    /// The byte limit, when this failure came from a [`limit_stream`] cutoff.
    pub fn payload_limit(&self) -> Option<usize> {
        match self {
            Self::Io(err) => err
                .get_ref()?
                .downcast_ref::<PayloadTooLarge>()
                .map(|limit| limit.max),
            _ => None,
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Whether `key` currently exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Metadata for `key`, or `NotFound`.
    async fn stat(&self, key: &str) -> StorageResult<StoredObject>;

    /// Write `body` to `key`, replacing any previous object.
    ///
    /// When `expected_len` is given and the stream length differs, the write
    /// fails with `LengthMismatch` and the previous object (if any) is kept.
    async fn put(
        &self,
        key: &str,
        body: ByteStream,
        expected_len: Option<u64>,
    ) -> StorageResult<StoredObject>;

    /// Stream the payload of `key`.
    async fn get(&self, key: &str) -> StorageResult<ByteStream>;

    /// All keys starting with `prefix`, at any depth, in lexicographic order.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Concatenate `sources` in order into `dest`.
    ///
    /// All-or-nothing: if any source is missing the call fails with
    /// `NotFound` and `dest` is left untouched.
    async fn compose(&self, dest: &str, sources: &[String]) -> StorageResult<StoredObject>;

    /// Remove `key`; `NotFound` if it does not exist.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Lightweight connectivity probe used by `/readyz`.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Short backend identifier for logs.
    fn backend_name(&self) -> &'static str;
}

/// Wrap an in-memory buffer as a single-item [`ByteStream`].
pub fn bytes_stream(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Drain a [`ByteStream`] into one contiguous buffer.
pub async fn collect_stream(mut stream: ByteStream) -> io::Result<Bytes> {
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(Bytes::from(buf))
}

/// Fail the stream once more than `max` bytes have passed through.
pub fn limit_stream(stream: ByteStream, max: usize) -> ByteStream {
    let mut seen = 0usize;
    Box::pin(stream.map(move |chunk| {
        let chunk = chunk?;
        seen += chunk.len();
        if seen > max {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                PayloadTooLarge { max },
            ));
        }
        Ok(chunk)
    }))
}

/// Reject keys that could escape the bucket root or confuse prefix listing.
pub fn ensure_key_safe(key: &str) -> StorageResult<()> {
    const MAX_OBJECT_KEY_LEN: usize = 1024;

    let invalid = key.is_empty()
        || key.len() > MAX_OBJECT_KEY_LEN
        || key.starts_with('/')
        || key.ends_with('/')
        || key.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..")
        || key.bytes().any(|b| b.is_ascii_control() || b == b'\\');
    if invalid {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
