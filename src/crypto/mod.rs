//! Two-stage decryption: RSA envelope keys, then symmetric message content.

pub mod content;
pub mod envelope;

pub use content::{AesCbcCipher, ContentCipher, ContentDecryptor};
pub use envelope::{EnvelopeKey, EnvelopeKeyDecryptor};
