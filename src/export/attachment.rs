//! Download attachments referenced by decrypted messages and save them to disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{AuditError, Result};
use crate::model::message::{AttachmentRef, DecryptedMessage};
use crate::pipeline::MediaAssembler;

use super::{sanitize_filename_part, unique_path};

/// Options for a bulk download.
#[derive(Debug, Clone, Copy)]
pub struct DownloadOptions {
    /// Reject content whose MD5 differs from the message's `md5sum`.
    pub verify_md5: bool,
    /// Attachments downloaded concurrently.
    pub workers: usize,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            verify_md5: true,
            workers: 1,
        }
    }
}

/// What a bulk download produced.
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub saved: Vec<PathBuf>,
    pub failed: Vec<(AttachmentRef, String)>,
}

/// Unique attachments across `messages`, in message order.
///
/// An `sdkfileid` referenced more than once is downloaded once.
pub fn collect_attachments(messages: &[DecryptedMessage]) -> Vec<AttachmentRef> {
    let mut seen = HashSet::new();
    messages
        .iter()
        .flat_map(DecryptedMessage::attachments)
        .filter(|att| seen.insert(att.file_identifier.clone()))
        .collect()
}

/// Check `data` against an expected lowercase-hex MD5.
pub fn md5_matches(data: &[u8], expected: &str) -> bool {
    format!("{:x}", md5::compute(data)).eq_ignore_ascii_case(expected)
}

/// Save one downloaded attachment under `{output_dir}/{kind folder}/`.
///
/// Existing files are never overwritten; a counter is appended instead.
pub fn save_attachment(
    data: &[u8],
    attachment: &AttachmentRef,
    output_dir: &Path,
    verify_md5: bool,
) -> Result<PathBuf> {
    if verify_md5 {
        if let Some(expected) = &attachment.md5sum {
            if !md5_matches(data, expected) {
                return Err(AuditError::Export(format!(
                    "MD5 mismatch for {} (expected {expected})",
                    attachment.filename
                )));
            }
        }
    }

    let folder = output_dir.join(attachment.kind.folder());
    std::fs::create_dir_all(&folder).map_err(|e| AuditError::io(&folder, e))?;
    let filename = sanitize_filename_part(&attachment.filename, 150);
    let path = unique_path(&folder.join(filename));
    std::fs::write(&path, data).map_err(|e| AuditError::io(&path, e))?;
    Ok(path)
}

/// Download every attachment referenced by `messages` into `output_dir`.
///
/// A failed attachment is logged and recorded in the report; it does not
/// stop the others. The progress callback receives `(current, total)`.
pub fn download_attachments(
    assembler: &MediaAssembler<'_>,
    messages: &[DecryptedMessage],
    output_dir: &Path,
    options: DownloadOptions,
    progress: &dyn Fn(usize, usize),
) -> Result<DownloadReport> {
    std::fs::create_dir_all(output_dir).map_err(|e| AuditError::io(output_dir, e))?;
    let attachments = collect_attachments(messages);
    let total = attachments.len();
    let mut report = DownloadReport::default();
    let mut done = 0usize;

    for window in attachments.chunks(options.workers.max(1)) {
        progress(done, total);
        let ids: Vec<String> = window.iter().map(|a| a.file_identifier.clone()).collect();
        let results = assembler.assemble_all(&ids, options.workers);

        for (att, result) in window.iter().zip(results) {
            let saved = result.and_then(|data| save_attachment(&data, att, output_dir, options.verify_md5));
            match saved {
                Ok(path) => report.saved.push(path),
                Err(e) => {
                    tracing::warn!(
                        filename = %att.filename,
                        file_identifier = %att.file_identifier,
                        error = %e,
                        "Failed to download attachment"
                    );
                    report.failed.push((att.clone(), e.to_string()));
                }
            }
        }
        done += window.len();
    }
    progress(total, total);

    Ok(report)
}
