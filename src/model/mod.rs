//! Core data model types: log records, decrypted messages, and media chunks.

pub mod media;
pub mod message;
pub mod record;
