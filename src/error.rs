//! Centralized error types for wecom-audit.

use std::path::PathBuf;
use thiserror::Error;

/// Failures of the two decryption stages.
///
/// `KeyDecryptionFailed` carries no detail. The padding check cannot tell a
/// wrong key from a corrupt ciphertext, and the reason must not reach
/// whoever supplied the ciphertext.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The envelope key ciphertext is not valid base64.
    #[error("envelope key is not valid base64")]
    InvalidBase64,

    /// The private key could not be parsed.
    #[error("private key could not be parsed: {0}")]
    InvalidPrivateKey(String),

    /// The decoded ciphertext is longer than the key modulus.
    #[error("envelope key ciphertext is {len} bytes, modulus is {modulus} bytes")]
    CiphertextTooLong { len: usize, modulus: usize },

    /// The asymmetric decryption was rejected.
    #[error("envelope key decryption failed")]
    KeyDecryptionFailed,

    /// The symmetric cipher returned a non-zero status.
    #[error("content decryption failed with status {status}")]
    ContentDecryptionFailed { status: i32 },
}

/// All errors produced by the wecom-audit library.
#[derive(Error, Debug)]
pub enum AuditError {
    /// Missing or invalid configuration. Fatal before any retrieval starts.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The remote service reported a non-zero status for a batch or chunk fetch.
    #[error("Service error {status}: {message}")]
    Transport { status: i32, message: String },

    /// Envelope key or content decryption failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The decrypted payload is not a JSON document.
    #[error("Decrypted content is malformed: {0}")]
    MalformedContent(String),

    /// An attachment grew beyond the configured ceiling.
    #[error("Media '{file_identifier}' exceeds the {limit} byte limit")]
    MediaTooLarge {
        file_identifier: String,
        limit: usize,
    },

    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Writing output failed.
    #[error("Export error: {0}")]
    Export(String),
}

/// Convenience alias for `Result<T, AuditError>`.
pub type Result<T> = std::result::Result<T, AuditError>;

impl AuditError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// `true` for errors that only affect a single record.
    ///
    /// These are absorbed by the batch fetcher: the record is dropped and
    /// the batch carries on.
    pub fn is_record_level(&self) -> bool {
        matches!(self, Self::Crypto(_) | Self::MalformedContent(_))
    }

    /// Numeric status reported to callers in a `RetrievalResult`.
    pub fn status(&self) -> i32 {
        match self {
            Self::Transport { status, .. } => *status,
            Self::Crypto(CryptoError::ContentDecryptionFailed { status }) => *status,
            _ => -1,
        }
    }
}

impl From<std::io::Error> for AuditError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_level_classification() {
        assert!(AuditError::from(CryptoError::KeyDecryptionFailed).is_record_level());
        assert!(AuditError::MalformedContent("eof".into()).is_record_level());
        assert!(!AuditError::Transport {
            status: 10001,
            message: "timeout".into()
        }
        .is_record_level());
        assert!(!AuditError::Config("missing".into()).is_record_level());
    }

    #[test]
    fn test_status_codes() {
        let err = AuditError::Transport {
            status: 10002,
            message: "bad".into(),
        };
        assert_eq!(err.status(), 10002);
        assert_eq!(AuditError::Config("x".into()).status(), -1);
    }

    #[test]
    fn test_key_failure_message_has_no_detail() {
        let msg = CryptoError::KeyDecryptionFailed.to_string();
        assert_eq!(msg, "envelope key decryption failed");
    }
}
