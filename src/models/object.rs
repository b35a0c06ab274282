//! Metadata describing a stored object (a chunk or a merged file).

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// What `stat`, `put` and `compose` report about an object.
///
/// Carries metadata only; payload bytes are read through
/// [`ObjectStore::get`](crate::services::object_store::ObjectStore::get).
#[derive(Clone, FromRow, Debug, PartialEq, Eq)]
pub struct StoredObject {
    /// Full object key, e.g. `chunks/abc123/0` or `files/abc123/test.txt`.
    pub key: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Lowercase hex MD5 of the payload.
    pub etag: String,

    /// Timestamp of the last write to this key.
    pub last_modified: DateTime<Utc>,
}
