//! Raw log entries and the retrieval cursor.

use serde::{Deserialize, Serialize};

/// Position in the append-only audit log.
///
/// The cursor only ever moves forward. `0` means "from the beginning".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetrievalCursor {
    sequence: u64,
}

impl RetrievalCursor {
    /// Start from the very first record.
    pub const START: Self = Self { sequence: 0 };

    pub fn new(sequence: u64) -> Self {
        Self { sequence }
    }

    /// The last consumed sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Move the cursor to `sequence`. Never moves backwards.
    ///
    /// Returns `true` if the cursor changed.
    pub fn advance_to(&mut self, sequence: u64) -> bool {
        if sequence > self.sequence {
            self.sequence = sequence;
            true
        } else {
            false
        }
    }
}

impl std::fmt::Display for RetrievalCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sequence)
    }
}

/// One raw log entry as returned by the remote service.
///
/// Field names follow the service's wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    /// Position of the record in the log.
    pub seq: u64,

    /// Service-assigned message identifier.
    pub msgid: String,

    /// Version of the organization key the envelope key was encrypted with.
    #[serde(default)]
    pub publickey_ver: u32,

    /// Base64 of the RSA-encrypted envelope key.
    pub encrypt_random_key: String,

    /// Opaque ciphertext of the message content.
    pub encrypt_chat_msg: String,
}

/// One page of records from a single `fetch_chat_batch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatBatch {
    #[serde(rename = "chatdata", default)]
    pub records: Vec<EncryptedRecord>,
}

impl ChatBatch {
    pub fn new(records: Vec<EncryptedRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Highest sequence in the page, if any.
    ///
    /// Records normally arrive ascending, but the page is not trusted to be
    /// ordered.
    pub fn last_sequence(&self) -> Option<u64> {
        self.records.iter().map(|r| r.seq).max()
    }
}
