//! The retrieval pipeline: pagination over batches of decrypted records, and
//! chunked media assembly.

pub mod batch;
pub mod media;
pub mod pagination;

pub use batch::{BatchFetcher, BatchOutcome};
pub use media::MediaAssembler;
pub use pagination::{
    BatchProgress, PaginationEngine, PaginationOptions, PaginationState, RetrievalResult,
    RetrievalStats,
};
