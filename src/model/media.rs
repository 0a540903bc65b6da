//! Units of a chunked media download.

/// One chunk of a multi-part attachment transfer.
///
/// `next_index` is meaningful only to the remote service: it is handed back
/// verbatim on the next request and never inspected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaChunk {
    pub data: Vec<u8>,
    pub next_index: String,
    pub is_final: bool,
}

impl MediaChunk {
    pub fn new(data: Vec<u8>, next_index: impl Into<String>, is_final: bool) -> Self {
        Self {
            data,
            next_index: next_index.into(),
            is_final,
        }
    }
}
