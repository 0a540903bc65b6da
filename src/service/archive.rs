//! File-backed audit service that replays a recorded dump.
//!
//! Layout of a dump directory:
//!
//! ```text
//! dump/
//!   chatdata.json        {"errcode":0,"errmsg":"ok","chatdata":[...]}
//!   media/<sdkfileid>    raw attachment bytes (name sanitized)
//! ```
//!
//! Media is served in fixed-size chunks. The continuation token is the next
//! byte offset rendered as text; callers treat it as opaque.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, trace};

use super::{status, AuditService, ServiceFailure, ServiceResult};
use crate::error::{AuditError, Result};
use crate::export::sanitize_filename_part;
use crate::model::media::MediaChunk;
use crate::model::record::{ChatBatch, EncryptedRecord, RetrievalCursor};

/// Default chunk size (512 KB, the service's own upper bound).
pub const DEFAULT_CHUNK_SIZE: usize = 512 * 1024;

#[derive(Deserialize)]
struct DumpFile {
    #[serde(default)]
    errcode: i32,
    #[serde(default)]
    errmsg: String,
    #[serde(default)]
    chatdata: Vec<EncryptedRecord>,
}

/// Replays `chatdata.json` and `media/` from a dump directory.
pub struct ArchiveService {
    media_dir: PathBuf,
    records: Vec<EncryptedRecord>,
    chunk_size: usize,
}

impl ArchiveService {
    /// Open a dump directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let path = dir.join("chatdata.json");
        let raw = std::fs::read(&path).map_err(|e| AuditError::io(&path, e))?;
        let dump: DumpFile = serde_json::from_slice(&raw).map_err(|e| {
            AuditError::Config(format!("{} is not a chat dump: {e}", path.display()))
        })?;
        if dump.errcode != status::OK {
            return Err(AuditError::Transport {
                status: dump.errcode,
                message: dump.errmsg,
            });
        }

        let mut records = dump.chatdata;
        records.sort_by_key(|r| r.seq);
        records.dedup_by_key(|r| r.seq);
        debug!(path = %path.display(), records = records.len(), "Opened chat dump");

        Ok(Self::from_records(records, dir.join("media")))
    }

    /// Build a service over in-memory records and a media directory.
    pub fn from_records(mut records: Vec<EncryptedRecord>, media_dir: impl Into<PathBuf>) -> Self {
        records.sort_by_key(|r| r.seq);
        Self {
            media_dir: media_dir.into(),
            records,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Number of records in the dump.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn media_path(&self, file_identifier: &str) -> PathBuf {
        self.media_dir
            .join(sanitize_filename_part(file_identifier, 200))
    }
}

impl AuditService for ArchiveService {
    fn fetch_chat_batch(
        &self,
        cursor: RetrievalCursor,
        limit: u32,
        timeout: Duration,
    ) -> ServiceResult<ChatBatch> {
        trace!(cursor = %cursor, limit, ?timeout, "Replaying chat batch");
        if limit == 0 {
            return Err(ServiceFailure::new(
                status::INVALID_PARAMS,
                "limit must be positive",
            ));
        }
        let start = self
            .records
            .partition_point(|r| r.seq <= cursor.sequence());
        let records = self
            .records
            .iter()
            .skip(start)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(ChatBatch::new(records))
    }

    fn fetch_media_chunk(
        &self,
        index_token: &str,
        file_identifier: &str,
        timeout: Duration,
    ) -> ServiceResult<MediaChunk> {
        trace!(file_identifier, index_token, ?timeout, "Replaying media chunk");
        let offset: u64 = if index_token.is_empty() {
            0
        } else {
            index_token.parse().map_err(|_| {
                ServiceFailure::new(status::INVALID_PARAMS, "unknown index token")
            })?
        };

        let path = self.media_path(file_identifier);
        let mut file = File::open(&path).map_err(|_| {
            ServiceFailure::new(
                status::INVALID_FILE_ID,
                format!("unknown sdkfileid {file_identifier}"),
            )
        })?;
        let io_failure = |e: std::io::Error| ServiceFailure::new(status::SYSTEM, e.to_string());
        let size = file.metadata().map_err(io_failure)?.len();
        if offset > size {
            return Err(ServiceFailure::new(
                status::INVALID_PARAMS,
                "index token past end of media",
            ));
        }

        file.seek(SeekFrom::Start(offset)).map_err(io_failure)?;
        let mut data = Vec::with_capacity(self.chunk_size);
        file.take(self.chunk_size as u64)
            .read_to_end(&mut data)
            .map_err(io_failure)?;

        let next = offset + data.len() as u64;
        Ok(MediaChunk::new(data, next.to_string(), next >= size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(seq: u64) -> EncryptedRecord {
        EncryptedRecord {
            seq,
            msgid: format!("m{seq}"),
            publickey_ver: 1,
            encrypt_random_key: String::new(),
            encrypt_chat_msg: String::new(),
        }
    }

    const T: Duration = Duration::from_secs(5);

    #[test]
    fn test_batches_start_after_cursor() {
        let svc = ArchiveService::from_records(vec![rec(7), rec(5), rec(6)], "/nonexistent");
        let batch = svc.fetch_chat_batch(RetrievalCursor::START, 2, T).unwrap();
        let seqs: Vec<u64> = batch.records.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![5, 6]);

        let batch = svc.fetch_chat_batch(RetrievalCursor::new(6), 2, T).unwrap();
        assert_eq!(batch.last_sequence(), Some(7));
        assert_eq!(batch.len(), 1);

        let batch = svc.fetch_chat_batch(RetrievalCursor::new(7), 2, T).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_zero_limit_rejected() {
        let svc = ArchiveService::from_records(vec![rec(1)], "/nonexistent");
        let err = svc.fetch_chat_batch(RetrievalCursor::START, 0, T).unwrap_err();
        assert_eq!(err.status, status::INVALID_PARAMS);
    }

    #[test]
    fn test_media_served_in_chunks() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("FILE1"), b"abcdefghij").unwrap();
        let svc = ArchiveService::from_records(Vec::new(), tmp.path()).with_chunk_size(4);

        let first = svc.fetch_media_chunk("", "FILE1", T).unwrap();
        assert_eq!(first.data, b"abcd");
        assert!(!first.is_final);
        let second = svc.fetch_media_chunk(&first.next_index, "FILE1", T).unwrap();
        assert_eq!(second.data, b"efgh");
        let third = svc.fetch_media_chunk(&second.next_index, "FILE1", T).unwrap();
        assert_eq!(third.data, b"ij");
        assert!(third.is_final);
    }

    #[test]
    fn test_unknown_media() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = ArchiveService::from_records(Vec::new(), tmp.path());
        let err = svc.fetch_media_chunk("", "missing", T).unwrap_err();
        assert_eq!(err.status, status::INVALID_FILE_ID);
        std::fs::write(tmp.path().join("present"), b"x").unwrap();
        let err = svc.fetch_media_chunk("garbage", "present", T).unwrap_err();
        assert_eq!(err.status, status::INVALID_PARAMS);
    }

    #[test]
    fn test_open_dump_with_error_code() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("chatdata.json"),
            r#"{"errcode":301042,"errmsg":"ip not allowed","chatdata":[]}"#,
        )
        .unwrap();
        match ArchiveService::open(tmp.path()) {
            Err(AuditError::Transport { status, .. }) => assert_eq!(status, 301042),
            other => panic!("expected transport error, got {:?}", other.map(|s| s.len())),
        }
    }
}
