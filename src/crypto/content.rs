//! Content decryption: envelope key → symmetric decrypt → JSON document.

use aes::Aes256;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cbc::{Decryptor, Encryptor};
use cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use serde_json::Value;

use super::envelope::{EnvelopeKey, EnvelopeKeyDecryptor};
use crate::error::{AuditError, CryptoError, Result};
use crate::model::message::DecryptedMessage;
use crate::model::record::EncryptedRecord;
use crate::service::status;

type Aes256CbcEnc = Encryptor<Aes256>;
type Aes256CbcDec = Decryptor<Aes256>;

/// Plaintext bytes, or the primitive's non-zero status code.
pub type CipherResult = std::result::Result<Vec<u8>, i32>;

/// The symmetric decryption primitive.
///
/// Only the call contract is assumed: plaintext on success, a non-zero
/// status code on failure.
pub trait ContentCipher: Send + Sync {
    fn decrypt_content(&self, key: &EnvelopeKey, ciphertext: &str) -> CipherResult;
}

/// AES-256-CBC with PKCS#7 padding over base64 ciphertext.
///
/// The envelope key is the AES key; its first 16 bytes are the IV.
#[derive(Debug, Clone, Copy, Default)]
pub struct AesCbcCipher;

impl AesCbcCipher {
    const KEY_LEN: usize = 32;
    const IV_LEN: usize = 16;

    /// Encrypt `plaintext` the way the service does. Returns base64.
    pub fn seal(key: &[u8], plaintext: &[u8]) -> std::result::Result<String, i32> {
        if key.len() != Self::KEY_LEN {
            return Err(status::KEY_ERROR);
        }
        let enc = Aes256CbcEnc::new_from_slices(key, &key[..Self::IV_LEN])
            .map_err(|_| status::KEY_ERROR)?;
        Ok(STANDARD.encode(enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext)))
    }
}

impl ContentCipher for AesCbcCipher {
    fn decrypt_content(&self, key: &EnvelopeKey, ciphertext: &str) -> CipherResult {
        let key = key.as_bytes();
        if key.len() != Self::KEY_LEN {
            return Err(status::KEY_ERROR);
        }
        let compact: String = ciphertext
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        let mut buf = STANDARD
            .decode(compact.as_bytes())
            .map_err(|_| status::INVALID_PARAMS)?;

        let dec = Aes256CbcDec::new_from_slices(key, &key[..Self::IV_LEN])
            .map_err(|_| status::KEY_ERROR)?;
        let plain = dec
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|_| status::DECRYPT_FAILED)?;
        Ok(plain.to_vec())
    }
}

/// Turns one [`EncryptedRecord`] into a [`DecryptedMessage`].
///
/// Holds shared, read-only references so it can be used from several
/// decryption workers at once.
#[derive(Clone, Copy)]
pub struct ContentDecryptor<'a> {
    keys: &'a EnvelopeKeyDecryptor,
    cipher: &'a dyn ContentCipher,
}

impl<'a> ContentDecryptor<'a> {
    pub fn new(keys: &'a EnvelopeKeyDecryptor, cipher: &'a dyn ContentCipher) -> Self {
        Self { keys, cipher }
    }

    /// Decrypt the envelope key, then the content, then parse it.
    ///
    /// The envelope key is dropped (and wiped) before this returns.
    pub fn decrypt_record(&self, record: &EncryptedRecord) -> Result<DecryptedMessage> {
        let plaintext = {
            let key = self
                .keys
                .decrypt(&record.encrypt_random_key, record.publickey_ver)?;
            self.cipher
                .decrypt_content(&key, &record.encrypt_chat_msg)
                .map_err(|status| CryptoError::ContentDecryptionFailed { status })?
        };

        let content: Value = serde_json::from_slice(&plaintext)
            .map_err(|e| AuditError::MalformedContent(e.to_string()))?;
        if !content.is_object() {
            return Err(AuditError::MalformedContent(
                "expected a JSON object".to_string(),
            ));
        }

        Ok(DecryptedMessage {
            seq: record.seq,
            msgid: record.msgid.clone(),
            content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::rand_core::OsRng;
    use rsa::{Pkcs1v15Encrypt, RsaPublicKey};

    const PEM: &str = include_str!("../../tests/fixtures/private.pem");
    const AES_KEY: &[u8; 32] = b"0123456789abcdef0123456789abcdef";

    fn record(seq: u64, plaintext: &[u8]) -> EncryptedRecord {
        let key = crate::crypto::envelope::parse_private_key(PEM).unwrap();
        let sealed_key = RsaPublicKey::from(&key)
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, AES_KEY)
            .unwrap();
        EncryptedRecord {
            seq,
            msgid: format!("msg{seq}"),
            publickey_ver: 1,
            encrypt_random_key: STANDARD.encode(sealed_key),
            encrypt_chat_msg: AesCbcCipher::seal(AES_KEY, plaintext).unwrap(),
        }
    }

    /// Cipher that always reports the given status.
    struct FailingCipher(i32);

    impl ContentCipher for FailingCipher {
        fn decrypt_content(&self, _: &EnvelopeKey, _: &str) -> CipherResult {
            Err(self.0)
        }
    }

    #[test]
    fn test_cipher_roundtrip() {
        let sealed = AesCbcCipher::seal(AES_KEY, b"{\"a\":1}").unwrap();
        let key = EnvelopeKey::from_bytes(AES_KEY.to_vec());
        assert_eq!(
            AesCbcCipher.decrypt_content(&key, &sealed).unwrap(),
            b"{\"a\":1}"
        );
    }

    #[test]
    fn test_cipher_status_codes() {
        let short = EnvelopeKey::from_bytes(b"short".to_vec());
        assert_eq!(AesCbcCipher.decrypt_content(&short, "AAAA"), Err(status::KEY_ERROR));

        let key = EnvelopeKey::from_bytes(AES_KEY.to_vec());
        assert_eq!(AesCbcCipher.decrypt_content(&key, "@@@"), Err(status::INVALID_PARAMS));
        // 15 bytes is not a whole AES block
        let garbage = STANDARD.encode([0u8; 15]);
        assert_eq!(AesCbcCipher.decrypt_content(&key, &garbage), Err(status::DECRYPT_FAILED));
    }

    #[test]
    fn test_decrypt_record_attaches_metadata() {
        let keys = EnvelopeKeyDecryptor::from_pem(PEM).unwrap();
        let decryptor = ContentDecryptor::new(&keys, &AesCbcCipher);
        let msg = decryptor
            .decrypt_record(&record(7, br#"{"from":"lisi","msgtype":"text"}"#))
            .unwrap();
        assert_eq!(msg.seq, 7);
        assert_eq!(msg.msgid, "msg7");
        assert_eq!(msg.sender(), Some("lisi"));
    }

    #[test]
    fn test_cipher_status_is_carried() {
        let keys = EnvelopeKeyDecryptor::from_pem(PEM).unwrap();
        let cipher = FailingCipher(10006);
        let decryptor = ContentDecryptor::new(&keys, &cipher);
        let err = decryptor.decrypt_record(&record(1, b"{}")).unwrap_err();
        assert!(matches!(
            err,
            AuditError::Crypto(CryptoError::ContentDecryptionFailed { status: 10006 })
        ));
        assert_eq!(err.status(), 10006);
    }

    #[test]
    fn test_non_json_payload_is_malformed() {
        let keys = EnvelopeKeyDecryptor::from_pem(PEM).unwrap();
        let decryptor = ContentDecryptor::new(&keys, &AesCbcCipher);
        let err = decryptor.decrypt_record(&record(1, b"plain text")).unwrap_err();
        assert!(matches!(err, AuditError::MalformedContent(_)));
        let err = decryptor.decrypt_record(&record(2, b"[1,2]")).unwrap_err();
        assert!(matches!(err, AuditError::MalformedContent(_)));
    }

    #[test]
    fn test_bad_envelope_key_propagates() {
        let keys = EnvelopeKeyDecryptor::from_pem(PEM).unwrap();
        let decryptor = ContentDecryptor::new(&keys, &AesCbcCipher);
        let mut rec = record(3, b"{}");
        rec.encrypt_random_key = "%%%".into();
        let err = decryptor.decrypt_record(&rec).unwrap_err();
        assert!(matches!(err, AuditError::Crypto(CryptoError::InvalidBase64)));
        assert!(err.is_record_level());
    }
}
