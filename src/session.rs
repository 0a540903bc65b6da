//! An audit session: the service handle, the private keys and the content
//! cipher, owned together for the length of one retrieval run.
//!
//! All pipeline components borrow from the session. Nothing in it changes
//! after construction, so the borrows can be shared with worker threads.

use std::time::Duration;

use tracing::{debug, info};

use crate::config::Config;
use crate::crypto::content::{AesCbcCipher, ContentCipher, ContentDecryptor};
use crate::crypto::envelope::{load_private_key, EnvelopeKeyDecryptor};
use crate::error::Result;
use crate::model::record::RetrievalCursor;
use crate::pipeline::{
    BatchFetcher, BatchProgress, MediaAssembler, PaginationEngine, PaginationOptions,
    RetrievalResult,
};
use crate::service::AuditService;

/// Tuning knobs for a session.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub page_size: u32,
    pub timeout: Duration,
    pub decrypt_workers: usize,
    pub max_media_size: Option<usize>,
    pub max_batches: Option<usize>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let paging = PaginationOptions::default();
        Self {
            page_size: paging.page_size,
            timeout: paging.timeout,
            decrypt_workers: 1,
            max_media_size: None,
            max_batches: None,
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            page_size: config.batch_size,
            timeout: config.timeout(),
            decrypt_workers: config.retrieval.decrypt_workers,
            max_media_size: Some(config.retrieval.max_media_size),
            max_batches: config.retrieval.max_batches,
        }
    }
}

/// Owns everything a retrieval run needs.
pub struct AuditSession {
    service: Box<dyn AuditService>,
    keys: EnvelopeKeyDecryptor,
    cipher: Box<dyn ContentCipher>,
    settings: SessionSettings,
}

impl AuditSession {
    pub fn new(
        service: Box<dyn AuditService>,
        keys: EnvelopeKeyDecryptor,
        cipher: Box<dyn ContentCipher>,
    ) -> Self {
        Self {
            service,
            keys,
            cipher,
            settings: SessionSettings::default(),
        }
    }

    /// Load the configured private keys and open a session over `service`
    /// with the AES content cipher.
    pub fn from_config(config: &Config, service: Box<dyn AuditService>) -> Result<Self> {
        config.validate()?;
        let mut keys = EnvelopeKeyDecryptor::new(load_private_key(&config.private_key_path)?);
        for extra in &config.keys {
            keys = keys.with_version(extra.version, load_private_key(&extra.path)?);
        }
        info!(
            corporation_id = %config.corporation_id,
            extra_keys = config.keys.len(),
            "Audit session initialized"
        );
        Ok(Self::new(service, keys, Box::new(AesCbcCipher)).with_settings(config.into()))
    }

    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn service(&self) -> &dyn AuditService {
        self.service.as_ref()
    }

    /// Decryptor borrowing the session's keys and cipher.
    pub fn decryptor(&self) -> ContentDecryptor<'_> {
        ContentDecryptor::new(&self.keys, self.cipher.as_ref())
    }

    /// Batch fetcher configured with the session's worker count.
    pub fn batch_fetcher(&self) -> BatchFetcher<'_> {
        BatchFetcher::new(self.service.as_ref(), self.decryptor())
            .with_workers(self.settings.decrypt_workers)
    }

    /// Pagination engine starting after `start`.
    pub fn pagination(&self, start: RetrievalCursor) -> PaginationEngine<'_> {
        let options = PaginationOptions {
            page_size: self.settings.page_size,
            timeout: self.settings.timeout,
            max_batches: self.settings.max_batches,
        };
        PaginationEngine::new(self.batch_fetcher(), options, start)
    }

    /// Retrieve and decrypt everything after `start`.
    pub fn retrieve(
        &self,
        start: RetrievalCursor,
        progress: Option<&dyn Fn(&BatchProgress)>,
    ) -> RetrievalResult {
        self.pagination(start).run(progress)
    }

    /// Media assembler with the session's timeout and size ceiling.
    pub fn media(&self) -> MediaAssembler<'_> {
        let assembler = MediaAssembler::new(self.service.as_ref(), self.settings.timeout);
        match self.settings.max_media_size {
            Some(limit) => assembler.with_max_size(limit),
            None => assembler,
        }
    }
}

impl Drop for AuditSession {
    fn drop(&mut self) {
        debug!("Audit session closed");
    }
}
