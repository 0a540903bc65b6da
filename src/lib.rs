//! `wecom-audit`: retrieve and decrypt an organization's encrypted chat
//! audit log.
//!
//! Records arrive in pages from an [`service::AuditService`]. Each record
//! carries an RSA-wrapped envelope key and a ciphertext sealed with that key;
//! the [`pipeline`] unwraps both, pages through the log, and downloads
//! chunked media attachments.

pub mod aggregate;
pub mod config;
pub mod crypto;
pub mod error;
pub mod export;
pub mod model;
pub mod pipeline;
pub mod service;
pub mod session;

pub use error::{AuditError, Result};
