//! The remote audit service, seen only through its call contract.
//!
//! The pipeline never talks to a transport directly. Anything that can answer
//! "fetch chat batch" and "fetch media chunk" with the status-code contract
//! below can drive it: the vendor SDK behind an FFI wrapper, a recorded
//! [`archive::ArchiveService`] dump, or a test double.

pub mod archive;

use std::time::Duration;

use thiserror::Error;

use crate::error::AuditError;
use crate::model::media::MediaChunk;
use crate::model::record::{ChatBatch, RetrievalCursor};

/// Status codes used by the service and the content cipher.
pub mod status {
    pub const OK: i32 = 0;
    pub const INVALID_PARAMS: i32 = 10000;
    /// Network failure or timeout. Retriable by the caller.
    pub const NETWORK: i32 = 10001;
    pub const PARSE_FAILED: i32 = 10002;
    pub const SYSTEM: i32 = 10003;
    pub const KEY_ERROR: i32 = 10004;
    pub const INVALID_FILE_ID: i32 = 10005;
    pub const DECRYPT_FAILED: i32 = 10006;
}

/// A non-zero status reported by the service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("status {status}: {message}")]
pub struct ServiceFailure {
    pub status: i32,
    pub message: String,
}

impl ServiceFailure {
    pub fn new(status: i32, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// The call did not complete within its timeout.
    pub fn timed_out(after: Duration) -> Self {
        Self::new(status::NETWORK, format!("timed out after {after:?}"))
    }

    /// Network-level failures (including timeouts) may succeed if the whole
    /// session is retried. The pipeline itself never retries.
    pub fn is_retriable(&self) -> bool {
        self.status == status::NETWORK
    }
}

impl From<ServiceFailure> for AuditError {
    fn from(f: ServiceFailure) -> Self {
        AuditError::Transport {
            status: f.status,
            message: f.message,
        }
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceFailure>;

/// Remote capabilities the pipeline depends on.
///
/// Shared read-only between decryption workers, hence `Send + Sync`. Every
/// call carries an explicit timeout.
pub trait AuditService: Send + Sync {
    /// Fetch up to `limit` records with a sequence greater than `cursor`.
    fn fetch_chat_batch(
        &self,
        cursor: RetrievalCursor,
        limit: u32,
        timeout: Duration,
    ) -> ServiceResult<ChatBatch>;

    /// Fetch the chunk of `file_identifier` addressed by `index_token`.
    ///
    /// An empty token requests the first chunk.
    fn fetch_media_chunk(
        &self,
        index_token: &str,
        file_identifier: &str,
        timeout: Duration,
    ) -> ServiceResult<MediaChunk>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_becomes_transport_error() {
        let err: AuditError = ServiceFailure::new(10002, "bad json").into();
        assert!(matches!(
            err,
            AuditError::Transport { status: 10002, ref message } if message == "bad json"
        ));
    }

    #[test]
    fn test_timeout_is_retriable() {
        let f = ServiceFailure::timed_out(Duration::from_secs(5));
        assert!(f.is_retriable());
        assert!(!ServiceFailure::new(status::INVALID_FILE_ID, "nope").is_retriable());
    }
}
