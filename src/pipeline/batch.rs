//! One page of the audit log: fetch, then decrypt every record independently.

use std::time::Duration;

use tracing::{debug, warn};

use crate::crypto::content::ContentDecryptor;
use crate::error::Result;
use crate::model::message::DecryptedMessage;
use crate::model::record::{EncryptedRecord, RetrievalCursor};
use crate::service::AuditService;

/// What one batch fetch produced.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Records that decrypted, ordered by `seq`.
    pub messages: Vec<DecryptedMessage>,
    /// Number of raw records the service returned.
    pub record_count: usize,
    /// Highest `seq` among the raw records, decrypted or not.
    pub last_sequence: Option<u64>,
    /// Records dropped because a decryption stage failed.
    pub skipped: usize,
}

/// Fetches one page and decrypts it.
///
/// A failed fetch is a hard error for the batch. A record that fails to
/// decrypt is logged and left out; it never aborts the batch.
pub struct BatchFetcher<'a> {
    service: &'a dyn AuditService,
    decryptor: ContentDecryptor<'a>,
    workers: usize,
}

impl<'a> BatchFetcher<'a> {
    pub fn new(service: &'a dyn AuditService, decryptor: ContentDecryptor<'a>) -> Self {
        Self {
            service,
            decryptor,
            workers: 1,
        }
    }

    /// Decrypt records on up to `workers` threads. `1` keeps everything on
    /// the calling thread.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Fetch records after `cursor` (at most `limit`) and decrypt them.
    pub fn fetch(
        &self,
        cursor: RetrievalCursor,
        limit: u32,
        timeout: Duration,
    ) -> Result<BatchOutcome> {
        let batch = self.service.fetch_chat_batch(cursor, limit, timeout)?;
        debug!(cursor = %cursor, limit, records = batch.len(), "Fetched chat batch");

        let messages = self.decrypt_records(&batch.records);
        let skipped = batch.len() - messages.len();
        Ok(BatchOutcome {
            messages,
            record_count: batch.len(),
            last_sequence: batch.last_sequence(),
            skipped,
        })
    }

    /// Decrypt `records`, dropping failures. Output is ordered by `seq`
    /// whatever the worker scheduling was.
    pub fn decrypt_records(&self, records: &[EncryptedRecord]) -> Vec<DecryptedMessage> {
        let mut messages = if self.workers <= 1 || records.len() < 2 {
            decrypt_slice(self.decryptor, records)
        } else {
            let per_worker = records.len().div_ceil(self.workers);
            let decryptor = self.decryptor;
            std::thread::scope(|scope| {
                let handles: Vec<_> = records
                    .chunks(per_worker)
                    .map(|chunk| scope.spawn(move || decrypt_slice(decryptor, chunk)))
                    .collect();
                handles
                    .into_iter()
                    .flat_map(|h| match h.join() {
                        Ok(part) => part,
                        Err(_) => {
                            warn!("Decryption worker panicked; its records are dropped");
                            Vec::new()
                        }
                    })
                    .collect::<Vec<_>>()
            })
        };
        messages.sort_by_key(|m| m.seq);
        messages
    }
}

fn decrypt_slice(decryptor: ContentDecryptor<'_>, records: &[EncryptedRecord]) -> Vec<DecryptedMessage> {
    records
        .iter()
        .filter_map(|record| match decryptor.decrypt_record(record) {
            Ok(msg) => Some(msg),
            Err(e) => {
                warn!(
                    seq = record.seq,
                    msgid = %record.msgid,
                    error = %e,
                    "Skipping record that failed decryption"
                );
                None
            }
        })
        .collect()
}
