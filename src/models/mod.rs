//! Data models for the chunked upload service.
//!
//! `bucket` and `object` map onto the local backend's SQLite tables via
//! `sqlx::FromRow`; `upload` and `envelope` are the JSON shapes exchanged
//! with clients.

pub mod bucket;
pub mod envelope;
pub mod object;
pub mod upload;
