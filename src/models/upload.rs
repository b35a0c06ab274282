//! Upload identities, derived session state and request/response bodies.
//!
//! Key layout is fixed for compatibility with existing clients and buckets:
//! - chunk: `chunks/{contentHash}/{chunkIndex}`
//! - final: `files/{contentHash}/{fileName}`

use serde::{Deserialize, Serialize};

const CHUNK_ROOT: &str = "chunks";
const FILE_ROOT: &str = "files";

/// Content hash plus declared file name: everything needed to address the
/// chunks and the final object of one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIdentity {
    pub hash: String,
    pub file_name: String,
}

impl FileIdentity {
    pub fn new(hash: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            file_name: file_name.into(),
        }
    }

    /// Key of the merged object.
    pub fn final_key(&self) -> String {
        format!("{}/{}/{}", FILE_ROOT, self.hash, self.file_name)
    }
}

/// Prefix under which every chunk of `hash` is stored (trailing slash included).
pub fn chunk_prefix(hash: &str) -> String {
    format!("{}/{}/", CHUNK_ROOT, hash)
}

/// Key of chunk `index` for `hash`.
pub fn chunk_key(hash: &str, index: u32) -> String {
    format!("{}/{}/{}", CHUNK_ROOT, hash, index)
}

/// Parse the index suffix of a listed chunk key.
///
/// Returns `None` when the key is not under `prefix` or the remainder is not
/// a plain non-negative integer (nested paths, stray temp objects, etc.).
pub fn parse_chunk_index(prefix: &str, key: &str) -> Option<u32> {
    let suffix = key.strip_prefix(prefix)?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Upload progress, derived on demand from object-store state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// The final object exists; `url` is its key.
    Completed { url: String },

    /// No final object yet; indices of chunks already stored, ascending.
    Uploading {
        #[serde(rename = "uploadedChunks")]
        uploaded_chunks: Vec<u32>,
    },
}

/// Client-declared context passed along with a resume probe.
///
/// Neither field is checked against the stored chunks; they are logged so a
/// resume can be correlated with the client's own plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredUpload {
    pub chunk_count: Option<u32>,
    pub file_size: Option<u64>,
}

/// Body of `POST /upload/init`.
#[derive(Debug, Deserialize)]
pub struct InitUploadReq {
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "fileMD5", alias = "fileHash")]
    pub file_hash: String,
    #[serde(rename = "chunkCount", default)]
    pub chunk_count: Option<i64>,
    #[serde(rename = "fileSize", default)]
    pub file_size: Option<i64>,
}

/// Body of `POST /upload/complete`.
#[derive(Debug, Deserialize)]
pub struct CompleteUploadReq {
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "fileMD5", alias = "fileHash")]
    pub file_hash: String,
    #[serde(rename = "chunkCount")]
    pub chunk_count: i64,
}

/// `data` payload of a successful `complete`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompleteUploadResp {
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_fixed_layout() {
        let id = FileIdentity::new("abc123", "test.txt");
        assert_eq!(id.final_key(), "files/abc123/test.txt");
        assert_eq!(chunk_key("abc123", 7), "chunks/abc123/7");
        assert_eq!(chunk_prefix("abc123"), "chunks/abc123/");
    }

    #[test]
    fn parse_chunk_index_accepts_only_plain_integers() {
        let prefix = chunk_prefix("abc123");
        assert_eq!(parse_chunk_index(&prefix, "chunks/abc123/0"), Some(0));
        assert_eq!(parse_chunk_index(&prefix, "chunks/abc123/42"), Some(42));
        assert_eq!(parse_chunk_index(&prefix, "chunks/abc123/x1"), None);
        assert_eq!(parse_chunk_index(&prefix, "chunks/abc123/-1"), None);
        assert_eq!(parse_chunk_index(&prefix, "chunks/abc123/1/2"), None);
        assert_eq!(parse_chunk_index(&prefix, "chunks/abc123/"), None);
        assert_eq!(parse_chunk_index(&prefix, "chunks/other/1"), None);
        assert_eq!(parse_chunk_index(&prefix, "chunks/abc123/99999999999"), None);
    }

    #[test]
    fn session_state_serializes_with_status_tag() {
        let uploading = SessionState::Uploading {
            uploaded_chunks: vec![0, 1],
        };
        assert_eq!(
            serde_json::to_value(&uploading).unwrap(),
            serde_json::json!({"status": "UPLOADING", "uploadedChunks": [0, 1]})
        );

        let completed = SessionState::Completed {
            url: "files/abc123/test.txt".into(),
        };
        assert_eq!(
            serde_json::to_value(&completed).unwrap(),
            serde_json::json!({"status": "COMPLETED", "url": "files/abc123/test.txt"})
        );
    }

    #[test]
    fn init_request_accepts_legacy_field_names() {
        let req: InitUploadReq = serde_json::from_str(
            r#"{"fileName":"a.bin","fileMD5":"abc","chunkCount":3,"fileSize":10}"#,
        )
        .unwrap();
        assert_eq!(req.file_hash, "abc");
        assert_eq!(req.chunk_count, Some(3));

        let req: InitUploadReq =
            serde_json::from_str(r#"{"fileName":"a.bin","fileHash":"abc"}"#).unwrap();
        assert_eq!(req.file_hash, "abc");
        assert_eq!(req.chunk_count, None);
        assert_eq!(req.file_size, None);
    }
}
