//! Represents the single bucket the local backend provisions at startup.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// A storage bucket: the namespace every chunk and final object lives under.
#[derive(Clone, FromRow, Debug)]
pub struct Bucket {
    /// Internal identifier used as the foreign key of object rows.
    pub id: Uuid,

    /// Bucket name (validated against S3-like naming rules).
    pub name: String,

    /// When this bucket was provisioned.
    pub created_at: DateTime<Utc>,
}
