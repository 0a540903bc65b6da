//! JSON output: the retrieval result and per-sender groups.

use std::collections::HashSet;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::aggregate::SenderGroups;
use crate::error::{AuditError, Result};
use crate::pipeline::RetrievalResult;

use super::sanitize_filename_part;

fn write_pretty<T: serde::Serialize + ?Sized>(value: &T, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path).map_err(|e| AuditError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .map_err(|e| AuditError::Export(format!("{}: {e}", path.display())))?;
    writer.write_all(b"\n").map_err(|e| AuditError::io(path, e))?;
    writer.flush().map_err(|e| AuditError::io(path, e))
}

/// Write the whole result (status, cursor, messages) as pretty JSON.
pub fn write_messages(result: &RetrievalResult, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| AuditError::io(parent, e))?;
    }
    write_pretty(result, path)?;
    tracing::info!(
        path = %path.display(),
        messages = result.messages.len(),
        "Wrote messages"
    );
    Ok(())
}

/// Read a result previously written by [`write_messages`].
pub fn read_messages(path: &Path) -> Result<RetrievalResult> {
    let raw = std::fs::read(path).map_err(|e| AuditError::io(path, e))?;
    serde_json::from_slice(&raw)
        .map_err(|e| AuditError::Export(format!("{} is not a messages file: {e}", path.display())))
}

/// File stem used for messages without a sender.
const NO_SENDER_STEM: &str = "_no_sender";

/// Write one `<sender>.json` array per group into `dir`.
///
/// Senders whose names sanitize to the same stem get `_1`, `_2`, ...
/// suffixes so no group overwrites another. Returns the created paths, in
/// sender order.
pub fn write_grouped(groups: &SenderGroups<'_>, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).map_err(|e| AuditError::io(dir, e))?;
    let mut taken = HashSet::new();
    let mut paths = Vec::with_capacity(groups.len());
    for (sender, messages) in groups {
        let stem = match sender {
            Some(name) => sanitize_filename_part(name, 120),
            None => NO_SENDER_STEM.to_string(),
        };
        let mut name = format!("{stem}.json");
        let mut n = 1;
        while !taken.insert(name.to_lowercase()) {
            name = format!("{stem}_{n}.json");
            n += 1;
        }
        let path = dir.join(name);
        write_pretty(messages.as_slice(), &path)?;
        paths.push(path);
    }
    Ok(paths)
}
