//! Shared helpers: sealing records with the fixture keys and a scripted
//! in-memory service.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::rand_core::OsRng;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use serde_json::{json, Value};

use wecom_audit::crypto::envelope::parse_private_key;
use wecom_audit::crypto::{AesCbcCipher, EnvelopeKeyDecryptor};
use wecom_audit::model::media::MediaChunk;
use wecom_audit::model::record::{ChatBatch, EncryptedRecord, RetrievalCursor};
use wecom_audit::service::{status, AuditService, ServiceFailure, ServiceResult};

pub const PRIVATE_PEM: &str = include_str!("../fixtures/private.pem");
pub const OTHER_PEM: &str = include_str!("../fixtures/other_private.pem");
pub const AES_KEY: &[u8; 32] = b"0123456789abcdef0123456789abcdef";

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn keys() -> EnvelopeKeyDecryptor {
    EnvelopeKeyDecryptor::from_pem(PRIVATE_PEM).unwrap()
}

/// Encrypt `plaintext` into a record the way the service would.
pub fn seal_raw(seq: u64, pem: &str, plaintext: &[u8]) -> EncryptedRecord {
    let public = RsaPublicKey::from(&parse_private_key(pem).unwrap());
    let wrapped = public.encrypt(&mut OsRng, Pkcs1v15Encrypt, AES_KEY).unwrap();
    EncryptedRecord {
        seq,
        msgid: format!("msg-{seq}"),
        publickey_ver: 1,
        encrypt_random_key: STANDARD.encode(wrapped),
        encrypt_chat_msg: AesCbcCipher::seal(AES_KEY, plaintext).unwrap(),
    }
}

/// A text message from `sender`.
pub fn text_content(seq: u64, sender: &str) -> Value {
    json!({
        "msgid": format!("msg-{seq}"),
        "action": "send",
        "from": sender,
        "tolist": ["room"],
        "msgtime": 1_700_000_000_000i64 + seq as i64 * 1000,
        "msgtype": "text",
        "text": {"content": format!("hello {seq}")}
    })
}

pub fn seal(seq: u64, content: &Value) -> EncryptedRecord {
    seal_raw(seq, PRIVATE_PEM, content.to_string().as_bytes())
}

pub fn text_record(seq: u64, sender: &str) -> EncryptedRecord {
    seal(seq, &text_content(seq, sender))
}

/// Records `seqs`, all from "alice".
pub fn text_records(seqs: impl IntoIterator<Item = u64>) -> Vec<EncryptedRecord> {
    seqs.into_iter().map(|s| text_record(s, "alice")).collect()
}

/// Serves records from memory with optional injected failures and short
/// pages, keyed by call number (0-based).
pub struct FakeService {
    records: Vec<EncryptedRecord>,
    failures: HashMap<usize, i32>,
    short_pages: HashMap<usize, usize>,
    reverse: bool,
    calls: Mutex<Vec<(u64, u32)>>,
}

impl FakeService {
    pub fn new(mut records: Vec<EncryptedRecord>) -> Self {
        records.sort_by_key(|r| r.seq);
        Self {
            records,
            failures: HashMap::new(),
            short_pages: HashMap::new(),
            reverse: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_on(mut self, call: usize, status: i32) -> Self {
        self.failures.insert(call, status);
        self
    }

    pub fn short_page_on(mut self, call: usize, len: usize) -> Self {
        self.short_pages.insert(call, len);
        self
    }

    /// Serve each page's records newest first.
    pub fn reverse_pages(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// `(cursor, limit)` of every batch request so far.
    pub fn calls(&self) -> Vec<(u64, u32)> {
        self.calls.lock().unwrap().clone()
    }
}

impl AuditService for FakeService {
    fn fetch_chat_batch(
        &self,
        cursor: RetrievalCursor,
        limit: u32,
        _timeout: Duration,
    ) -> ServiceResult<ChatBatch> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((cursor.sequence(), limit));
            calls.len() - 1
        };
        if let Some(&status) = self.failures.get(&call) {
            return Err(ServiceFailure::new(status, "injected failure"));
        }
        let take = self
            .short_pages
            .get(&call)
            .copied()
            .unwrap_or(limit as usize)
            .min(limit as usize);
        let mut records: Vec<EncryptedRecord> = self
            .records
            .iter()
            .filter(|r| r.seq > cursor.sequence())
            .take(take)
            .cloned()
            .collect();
        if self.reverse {
            records.reverse();
        }
        Ok(ChatBatch::new(records))
    }

    fn fetch_media_chunk(&self, _: &str, file_identifier: &str, _: Duration) -> ServiceResult<MediaChunk> {
        Err(ServiceFailure::new(
            status::INVALID_FILE_ID,
            format!("unknown sdkfileid {file_identifier}"),
        ))
    }
}

/// Write a dump directory for `ArchiveService`.
pub fn write_archive(dir: &Path, records: &[EncryptedRecord], media: &[(&str, &[u8])]) {
    let dump = json!({"errcode": 0, "errmsg": "ok", "chatdata": records});
    std::fs::write(dir.join("chatdata.json"), dump.to_string()).unwrap();
    let media_dir = dir.join("media");
    std::fs::create_dir_all(&media_dir).unwrap();
    for (id, bytes) in media {
        std::fs::write(media_dir.join(id), bytes).unwrap();
    }
}
