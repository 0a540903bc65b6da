//! Chunked media download.
//!
//! ```text
//! Requesting ──chunk──▶ Accumulating ──not final──▶ Requesting
//!     │ error                 │ is_final
//!     ▼                       ▼
//!   Failed                 Complete
//! ```
//!
//! The number of chunks is not known up front. Each response carries the
//! token for the next request and a flag marking the last chunk. A failure at
//! any point discards everything; the next attempt starts from the first
//! chunk again.

use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::error::{AuditError, Result};
use crate::service::{status, AuditService};

/// Where one assembly is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssemblyState {
    Requesting,
    Accumulating,
    Complete,
    Failed,
}

/// One in-flight download.
struct Assembly<'s> {
    file_identifier: &'s str,
    token: String,
    buffer: Vec<u8>,
    chunks: usize,
    state: AssemblyState,
}

/// Downloads attachments chunk by chunk into memory.
pub struct MediaAssembler<'a> {
    service: &'a dyn AuditService,
    timeout: Duration,
    max_size: Option<usize>,
}

impl<'a> MediaAssembler<'a> {
    pub fn new(service: &'a dyn AuditService, timeout: Duration) -> Self {
        Self {
            service,
            timeout,
            max_size: None,
        }
    }

    /// Refuse attachments larger than `limit` bytes.
    pub fn with_max_size(mut self, limit: usize) -> Self {
        self.max_size = Some(limit);
        self
    }

    /// Download a whole attachment.
    pub fn assemble(&self, file_identifier: &str) -> Result<Vec<u8>> {
        self.assemble_with_progress(file_identifier, None)
    }

    /// Download a whole attachment, reporting the byte count after each chunk.
    pub fn assemble_with_progress(
        &self,
        file_identifier: &str,
        progress: Option<&dyn Fn(usize)>,
    ) -> Result<Vec<u8>> {
        let mut assembly = Assembly {
            file_identifier,
            token: String::new(),
            buffer: Vec::new(),
            chunks: 0,
            state: AssemblyState::Requesting,
        };

        while assembly.state != AssemblyState::Complete {
            if let Err(e) = self.step(&mut assembly) {
                warn!(
                    file_identifier,
                    chunks = assembly.chunks,
                    error = %e,
                    "Media download failed; partial data discarded"
                );
                return Err(e);
            }
            if let Some(report) = progress {
                report(assembly.buffer.len());
            }
        }

        debug!(
            file_identifier,
            chunks = assembly.chunks,
            bytes = assembly.buffer.len(),
            "Media download complete"
        );
        Ok(assembly.buffer)
    }

    /// Request and absorb one chunk. Any error leaves the assembly `Failed`.
    fn step(&self, assembly: &mut Assembly<'_>) -> Result<()> {
        let result = self.request_chunk(assembly);
        if result.is_err() {
            assembly.state = AssemblyState::Failed;
        }
        result
    }

    fn request_chunk(&self, assembly: &mut Assembly<'_>) -> Result<()> {
        assembly.state = AssemblyState::Requesting;
        let chunk = self.service.fetch_media_chunk(
            &assembly.token,
            assembly.file_identifier,
            self.timeout,
        )?;
        assembly.chunks += 1;
        assembly.state = AssemblyState::Accumulating;
        trace!(
            file_identifier = assembly.file_identifier,
            chunk = assembly.chunks,
            len = chunk.data.len(),
            is_final = chunk.is_final,
            "Received media chunk"
        );

        if let Some(limit) = self.max_size {
            if assembly.buffer.len() + chunk.data.len() > limit {
                return Err(AuditError::MediaTooLarge {
                    file_identifier: assembly.file_identifier.to_string(),
                    limit,
                });
            }
        }

        if !chunk.is_final && chunk.data.is_empty() && chunk.next_index == assembly.token {
            return Err(AuditError::Transport {
                status: status::SYSTEM,
                message: format!(
                    "media stream for {} stopped advancing",
                    assembly.file_identifier
                ),
            });
        }

        assembly.buffer.extend_from_slice(&chunk.data);
        if chunk.is_final {
            assembly.state = AssemblyState::Complete;
        } else {
            assembly.token = chunk.next_index;
        }
        Ok(())
    }

    /// Download several unrelated attachments on up to `workers` threads.
    ///
    /// Results come back in the order of `file_identifiers`. Chunks within
    /// one attachment are always fetched sequentially.
    pub fn assemble_all(&self, file_identifiers: &[String], workers: usize) -> Vec<Result<Vec<u8>>> {
        if workers <= 1 || file_identifiers.len() < 2 {
            return file_identifiers.iter().map(|id| self.assemble(id)).collect();
        }
        let per_worker = file_identifiers.len().div_ceil(workers);
        std::thread::scope(|scope| {
            let handles: Vec<_> = file_identifiers
                .chunks(per_worker)
                .map(|ids| {
                    scope.spawn(move || ids.iter().map(|id| self.assemble(id)).collect::<Vec<_>>())
                })
                .collect();
            handles
                .into_iter()
                .zip(file_identifiers.chunks(per_worker))
                .flat_map(|(handle, ids)| match handle.join() {
                    Ok(results) => results,
                    Err(_) => ids
                        .iter()
                        .map(|id| {
                            Err(AuditError::Transport {
                                status: status::SYSTEM,
                                message: format!("download worker for {id} panicked"),
                            })
                        })
                        .collect(),
                })
                .collect()
        })
    }
}
