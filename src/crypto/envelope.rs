//! Envelope key recovery: RSA (PKCS#1 v1.5) decryption of the per-message key.

use std::collections::HashMap;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use tracing::debug;
use zeroize::ZeroizeOnDrop;

use crate::error::{AuditError, CryptoError};

/// Symmetric key recovered for a single record.
///
/// Wiped from memory on drop. Not `Clone` and not serializable, so it cannot
/// outlive the decryption of the record it belongs to.
#[derive(ZeroizeOnDrop)]
pub struct EnvelopeKey(Vec<u8>);

impl EnvelopeKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for EnvelopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EnvelopeKey(<{} bytes redacted>)", self.0.len())
    }
}

/// Parse an RSA private key from PEM text.
///
/// Accepts PKCS#1 (`BEGIN RSA PRIVATE KEY`) and PKCS#8 (`BEGIN PRIVATE KEY`).
/// A leading BOM and surrounding whitespace are ignored.
pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, CryptoError> {
    let pem = pem.trim_start_matches('\u{feff}').trim();
    RsaPrivateKey::from_pkcs1_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
        .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))
}

/// Read and parse a PEM private key file.
pub fn load_private_key(path: &Path) -> crate::error::Result<RsaPrivateKey> {
    let pem = std::fs::read_to_string(path).map_err(|e| AuditError::io(path, e))?;
    let key = parse_private_key(&pem)?;
    debug!(path = %path.display(), bits = key.size() * 8, "Loaded private key");
    Ok(key)
}

/// Decrypts envelope keys with the organization's private key(s).
///
/// Records name the key version they were encrypted for (`publickey_ver`).
/// Versions without a registered key fall back to the default key.
pub struct EnvelopeKeyDecryptor {
    default_key: RsaPrivateKey,
    versions: HashMap<u32, RsaPrivateKey>,
}

impl EnvelopeKeyDecryptor {
    pub fn new(default_key: RsaPrivateKey) -> Self {
        Self {
            default_key,
            versions: HashMap::new(),
        }
    }

    /// Build a decryptor from PEM text.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        parse_private_key(pem).map(Self::new)
    }

    /// Register a key for a specific public key version.
    pub fn with_version(mut self, version: u32, key: RsaPrivateKey) -> Self {
        self.versions.insert(version, key);
        self
    }

    fn key_for(&self, version: u32) -> &RsaPrivateKey {
        self.versions.get(&version).unwrap_or(&self.default_key)
    }

    /// Recover the envelope key from its base64 ciphertext.
    ///
    /// Any rejection by the padding check is reported as the single
    /// `KeyDecryptionFailed` kind; wrong key and corrupt ciphertext are
    /// indistinguishable here.
    pub fn decrypt(&self, ciphertext_b64: &str, version: u32) -> Result<EnvelopeKey, CryptoError> {
        let compact: String = ciphertext_b64
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        let ciphertext = STANDARD
            .decode(compact.as_bytes())
            .map_err(|_| CryptoError::InvalidBase64)?;
        if ciphertext.is_empty() {
            return Err(CryptoError::InvalidBase64);
        }

        let key = self.key_for(version);
        let modulus = key.size();
        if ciphertext.len() > modulus {
            return Err(CryptoError::CiphertextTooLong {
                len: ciphertext.len(),
                modulus,
            });
        }

        key.decrypt_blinded(&mut OsRng, Pkcs1v15Encrypt, &ciphertext)
            .map(EnvelopeKey)
            .map_err(|_| CryptoError::KeyDecryptionFailed)
    }
}
