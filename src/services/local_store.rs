//! src/services/local_store.rs
//!
//! LocalObjectStore: the `ObjectStore` capability set backed by SQLite for
//! object metadata and local disk for payloads, sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`.

use crate::{
    models::{bucket::Bucket, object::StoredObject},
    services::object_store::{ByteStream, ObjectStore, StorageError, StorageResult, ensure_key_safe},
};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use md5::Context;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const COPY_BUF_SIZE: usize = 64 * 1024;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// Apply the embedded schema. Every statement is idempotent.
pub async fn run_migrations(db: &SqlitePool) -> StorageResult<()> {
    let statements = SCHEMA
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// The bucket every key of this store lives in.
    pub bucket: Bucket,
}

impl LocalObjectStore {
    /// Open the store for `bucket_name`, provisioning the bucket row and
    /// directory when they do not exist yet.
    pub async fn open(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        bucket_name: &str,
    ) -> StorageResult<Self> {
        ensure_bucket_name_safe(bucket_name)?;
        let base_path = base_path.into();

        let existing = sqlx::query_as::<_, Bucket>(
            "SELECT id, name, created_at FROM buckets WHERE name = ?",
        )
        .bind(bucket_name)
        .fetch_optional(&*db)
        .await?;

        let bucket = match existing {
            Some(bucket) => bucket,
            None => {
                let bucket = Bucket {
                    id: Uuid::new_v4(),
                    name: bucket_name.to_string(),
                    created_at: Utc::now(),
                };
                // Another process may have created it between the SELECT and here.
                sqlx::query(
                    "INSERT INTO buckets (id, name, created_at) VALUES (?, ?, ?)
                     ON CONFLICT(name) DO NOTHING",
                )
                .bind(bucket.id)
                .bind(&bucket.name)
                .bind(bucket.created_at)
                .execute(&*db)
                .await?;
                let bucket = sqlx::query_as::<_, Bucket>(
                    "SELECT id, name, created_at FROM buckets WHERE name = ?",
                )
                .bind(bucket_name)
                .fetch_one(&*db)
                .await?;
                tracing::info!("Provisioned bucket `{}`", bucket.name);
                bucket
            }
        };

        let store = Self {
            db,
            base_path,
            bucket,
        };
        fs::create_dir_all(store.bucket_root()).await?;
        Ok(store)
    }

    fn bucket_root(&self) -> PathBuf {
        self.base_path.join(&self.bucket.name)
    }

    /// Two-level shard identifiers derived from MD5(bucket/key), keeping the
    /// number of entries per directory small.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(&self.bucket.name, key);
        let mut path = self.bucket_root();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_object(&self, key: &str) -> StorageResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(
            "SELECT key, size_bytes, etag, last_modified
             FROM objects WHERE bucket_id = ? AND key = ?",
        )
        .bind(self.bucket.id)
        .bind(key)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn open_payload(&self, key: &str) -> StorageResult<File> {
        File::open(self.object_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(err)
            }
        })
    }

    /// Create a uniquely named temp file next to where `key` will live.
    async fn create_temp(&self, key: &str) -> StorageResult<(PathBuf, PathBuf, File)> {
        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let file = File::create(&tmp_path).await?;
        Ok((file_path, tmp_path, file))
    }

    /// fsync the temp file, then inside one metadata transaction upsert the
    /// row and rename the payload over the destination.
    ///
    /// The upsert takes the SQLite write lock before the rename, so a failed
    /// upsert leaves the previous row and payload untouched, and a concurrent
    /// `delete` of the same key cannot interleave with the rename.
    async fn commit(
        &self,
        key: &str,
        mut file: File,
        tmp_path: &Path,
        file_path: &Path,
        size_bytes: i64,
        etag: String,
    ) -> StorageResult<StoredObject> {
        let synced: io::Result<()> = async {
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(err) = synced {
            let _ = fs::remove_file(tmp_path).await;
            return Err(StorageError::Io(err));
        }

        let mut tx = match self.db.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                let _ = fs::remove_file(tmp_path).await;
                return Err(StorageError::Sqlx(err));
            }
        };

        let record = sqlx::query_as::<_, StoredObject>(
            r#"
            INSERT INTO objects (id, bucket_id, key, size_bytes, etag, last_modified)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING key, size_bytes, etag, last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(self.bucket.id)
        .bind(key)
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await;
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                let _ = fs::remove_file(tmp_path).await;
                return Err(StorageError::Sqlx(err));
            }
        };

        // Dropping `tx` on any error below rolls the upsert back.
        if let Err(err) = fs::rename(tmp_path, file_path).await {
            let _ = fs::remove_file(tmp_path).await;
            return Err(StorageError::Io(err));
        }

        if let Err(err) = tx.commit().await {
            // The new payload is in place but its row is not; drop both so the
            // key reads as absent instead of pointing at mismatched metadata.
            warn!(%key, error = %err, "metadata commit failed after rename");
            let _ = sqlx::query("DELETE FROM objects WHERE bucket_id = ? AND key = ?")
                .bind(self.bucket.id)
                .bind(key)
                .execute(&*self.db)
                .await;
            let _ = fs::remove_file(file_path).await;
            return Err(StorageError::Sqlx(err));
        }
        Ok(record)
    }

    /// Remove empty shard directories up to (not including) the bucket root.
    async fn prune_empty_dirs(&self, start: &Path) {
        let stop = self.bucket_root();
        let mut current = start.to_path_buf();
        while current.starts_with(&stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self.fetch_object(key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn stat(&self, key: &str) -> StorageResult<StoredObject> {
        ensure_key_safe(key)?;
        self.fetch_object(key).await
    }

    /// Stream `body` into a temp file while computing size and MD5, then
    /// atomically rename into place. Overwrites are last-write-wins.
    async fn put(
        &self,
        key: &str,
        mut body: ByteStream,
        expected_len: Option<u64>,
    ) -> StorageResult<StoredObject> {
        ensure_key_safe(key)?;
        let (file_path, tmp_path, mut file) = self.create_temp(key).await?;

        let mut size_bytes: u64 = 0;
        let mut digest = Context::new();
        while let Some(chunk_res) = body.next().await {
            let written = match chunk_res {
                Ok(chunk) => {
                    size_bytes += chunk.len() as u64;
                    digest.consume(&chunk);
                    file.write_all(&chunk).await
                }
                Err(err) => Err(err),
            };
            if let Err(err) = written {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }

        if let Some(expected) = expected_len {
            if expected != size_bytes {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::LengthMismatch {
                    key: key.to_string(),
                    expected,
                    actual: size_bytes,
                });
            }
        }

        let etag = format!("{:x}", digest.compute());
        self.commit(key, file, &tmp_path, &file_path, size_bytes as i64, etag)
            .await
    }

    async fn get(&self, key: &str) -> StorageResult<ByteStream> {
        ensure_key_safe(key)?;
        self.fetch_object(key).await?;
        let file = self.open_payload(key).await?;
        Ok(Box::pin(ReaderStream::new(file)))
    }

    /// Exact, case-sensitive prefix match; `LIKE` would fold ASCII case.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT key FROM objects
             WHERE bucket_id = ? AND substr(key, 1, length(?)) = ?
             ORDER BY key ASC",
        )
        .bind(self.bucket.id)
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&*self.db)
        .await?;
        Ok(keys)
    }

    /// Open every source first, then stream them in order into a temp file
    /// that replaces `dest` only once all bytes are written.
    async fn compose(&self, dest: &str, sources: &[String]) -> StorageResult<StoredObject> {
        ensure_key_safe(dest)?;

        let mut readers = Vec::with_capacity(sources.len());
        for source in sources {
            ensure_key_safe(source)?;
            self.fetch_object(source).await?;
            readers.push(self.open_payload(source).await?);
        }

        let (file_path, tmp_path, mut file) = self.create_temp(dest).await?;
        let mut size_bytes: u64 = 0;
        let mut digest = Context::new();
        let mut buf = vec![0u8; COPY_BUF_SIZE];

        for mut reader in readers {
            loop {
                let copied = match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        size_bytes += n as u64;
                        digest.consume(&buf[..n]);
                        file.write_all(&buf[..n]).await
                    }
                    Err(err) => Err(err),
                };
                if let Err(err) = copied {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err));
                }
            }
        }

        let etag = format!("{:x}", digest.compute());
        self.commit(dest, file, &tmp_path, &file_path, size_bytes as i64, etag)
            .await
    }

    /// Drop the metadata row and remove the payload under one transaction,
    /// then prune empty shards. A failed file removal rolls the row back.
    async fn delete(&self, key: &str) -> StorageResult<()> {
        ensure_key_safe(key)?;
        let mut tx = self.db.begin().await?;
        let result = sqlx::query("DELETE FROM objects WHERE bucket_id = ? AND key = ?")
            .bind(self.bucket.id)
            .bind(key)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(key.to_string()));
        }

        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }
        tx.commit().await?;

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    /// `SELECT 1` against SQLite plus a write/read/delete probe on disk.
    async fn health_check(&self) -> StorageResult<()> {
        let one = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        if one != 1 {
            return Err(StorageError::Io(io::Error::new(
                ErrorKind::Other,
                format!("unexpected SELECT 1 result: {}", one),
            )));
        }

        let probe = self.bucket_root().join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&probe, b"readyz").await?;
        let read_back = fs::read(&probe).await;
        let _ = fs::remove_file(&probe).await;
        if read_back? != b"readyz" {
            return Err(StorageError::Io(io::Error::new(
                ErrorKind::InvalidData,
                "readiness probe content mismatch",
            )));
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

/// Validate bucket name format: 3 to 63 characters of lowercase letters, digits,
/// dots and hyphens, starting and ending alphanumeric, not IPv4-like.
fn ensure_bucket_name_safe(name: &str) -> StorageResult<()> {
    let reject = |reason: &str| {
        Err(StorageError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.into(),
        })
    };

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return reject("must be between 3 and 63 characters");
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return reject("allowed characters are lowercase letters, digits, dots, and hyphens");
    }
    if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
        return reject("must start and end with a lowercase letter or digit");
    }
    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return reject("cannot contain consecutive dots or dot-hyphen combinations");
    }
    if is_ipv4_like(name) {
        return reject("must not be formatted like an IP address");
    }
    Ok(())
}

fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
