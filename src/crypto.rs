// Copyright 2024 The amqp-courier Authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Symmetric encryption to and from portable hashes.
//!
//! A *portable hash* is the self-describing text form of an encrypted value:
//! `enc:v1:<base64(nonce ‖ ciphertext)>`. It is safe to embed in any message
//! field and survives both wire formats unchanged. Values are encrypted with
//! XChaCha20-Poly1305 under a key derived from the configured secret; the
//! configured pass count applies the scheme recursively and must match
//! between encode and decode.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::engine::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use ring::digest::{digest, SHA256};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::codec::{CodecError, WireFormat};

const HASH_PREFIX: &str = "enc:v1:";
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

/// Symmetric encryption settings for an endpoint or a single call.
///
/// # Examples
///
/// ```
/// use amqp_courier::EncryptionConfig;
///
/// let config = EncryptionConfig::new("sw0rdf1sh").passes(2);
/// let hash = amqp_courier::crypto::encrypt_str("hello", &config).unwrap();
/// assert!(amqp_courier::crypto::is_portable_hash(&hash));
/// assert_eq!(amqp_courier::crypto::decrypt_str(&hash, &config).unwrap(), "hello");
/// ```
#[derive(Clone)]
pub struct EncryptionConfig {
    secret: Zeroizing<String>,
    passes: u32,
    transport: bool,
}

impl EncryptionConfig {
    /// A single-pass configuration that applies to broker-bound payloads.
    pub fn new(secret: impl Into<String>) -> EncryptionConfig {
        EncryptionConfig {
            secret: Zeroizing::new(secret.into()),
            passes: 1,
            transport: true,
        }
    }

    /// Number of recursive applications of the cipher, clamped to at least one.
    pub fn passes(mut self, passes: u32) -> EncryptionConfig {
        self.passes = passes.max(1);
        self
    }

    /// Whether the configuration applies to the broker-bound payload.
    ///
    /// With `transport(false)` the configuration only encrypts offloaded
    /// documents at rest (together with the store's `encrypt_stored_objects`
    /// flag); the broker frame stays in the clear.
    pub fn transport(mut self, transport: bool) -> EncryptionConfig {
        self.transport = transport;
        self
    }

    pub(crate) fn applies_to_transport(&self) -> bool {
        self.transport
    }

    fn key(&self) -> Key {
        let derived = digest(&SHA256, self.secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(derived.as_ref());
        key.into()
    }
}

impl fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("secret", &"XXXXXXXX")
            .field("passes", &self.passes)
            .field("transport", &self.transport)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("value is not a portable encrypted hash")]
    InvalidHash,
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error("decryption failed: {0}")]
    Decrypt(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Whether `value` has the shape of a hash produced by this scheme.
///
/// Used to validate pre-encrypted payloads handed to the fluent surface
/// before they are accepted for publishing.
pub fn is_portable_hash(value: &str) -> bool {
    value
        .strip_prefix(HASH_PREFIX)
        .and_then(|rest| STANDARD.decode(rest).ok())
        .is_some_and(|raw| raw.len() >= NONCE_LEN + TAG_LEN)
}

/// Encrypts raw bytes into a portable hash, honoring the pass count.
pub fn encrypt_bytes(plaintext: &[u8], config: &EncryptionConfig) -> Result<String, CryptoError> {
    let mut hash = encrypt_once(plaintext, config)?;
    for _ in 1..config.passes {
        hash = encrypt_once(hash.as_bytes(), config)?;
    }
    Ok(hash)
}

/// Inverse of [encrypt_bytes]. Fails with [CryptoError::InvalidHash] when the
/// input was not produced by this scheme.
pub fn decrypt_bytes(hash: &str, config: &EncryptionConfig) -> Result<Vec<u8>, CryptoError> {
    let mut plain = decrypt_once(hash, config)?;
    for _ in 1..config.passes {
        let intermediate =
            String::from_utf8(plain).map_err(|_| CryptoError::InvalidHash)?;
        plain = decrypt_once(&intermediate, config)?;
    }
    Ok(plain)
}

/// Encrypts a UTF-8 string, byte-for-byte.
pub fn encrypt_str(plaintext: &str, config: &EncryptionConfig) -> Result<String, CryptoError> {
    encrypt_bytes(plaintext.as_bytes(), config)
}

pub fn decrypt_str(hash: &str, config: &EncryptionConfig) -> Result<String, CryptoError> {
    let plain = decrypt_bytes(hash, config)?;
    String::from_utf8(plain)
        .map_err(|_| CryptoError::Decrypt("plaintext is not valid UTF-8".into()))
}

/// Serialize-then-encrypt for arbitrary structured values.
///
/// The value is rendered in the given wire format before encryption so the
/// decrypting side can reconstruct it with [decrypt_value] and the same
/// format.
pub fn encrypt_value<T: Serialize>(
    format: WireFormat,
    value: &T,
    config: &EncryptionConfig,
) -> Result<String, CryptoError> {
    let bytes = format.to_bytes(value)?;
    encrypt_bytes(&bytes, config)
}

pub fn decrypt_value<T: DeserializeOwned>(
    format: WireFormat,
    hash: &str,
    config: &EncryptionConfig,
) -> Result<T, CryptoError> {
    let bytes = decrypt_bytes(hash, config)?;
    Ok(format.from_bytes(&bytes)?)
}

fn encrypt_once(plaintext: &[u8], config: &EncryptionConfig) -> Result<String, CryptoError> {
    let cipher = XChaCha20Poly1305::new(&config.key());
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|err| CryptoError::Encrypt(err.to_string()))?;

    let mut raw = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    raw.extend_from_slice(&nonce);
    raw.extend_from_slice(&ciphertext);
    Ok(format!("{HASH_PREFIX}{}", STANDARD.encode(raw)))
}

fn decrypt_once(hash: &str, config: &EncryptionConfig) -> Result<Vec<u8>, CryptoError> {
    let raw = hash
        .strip_prefix(HASH_PREFIX)
        .and_then(|rest| STANDARD.decode(rest).ok())
        .ok_or(CryptoError::InvalidHash)?;
    if raw.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::InvalidHash);
    }

    let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new(&config.key());
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|err| CryptoError::Decrypt(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        n: u32,
    }

    #[test]
    fn round_trip_for_any_pass_count() {
        for passes in 1..=4 {
            let config = EncryptionConfig::new("secret").passes(passes);
            let hash = encrypt_bytes(b"payload bytes", &config).unwrap();
            assert_eq!(decrypt_bytes(&hash, &config).unwrap(), b"payload bytes");
        }
    }

    #[test]
    fn zero_passes_behaves_as_one() {
        let config = EncryptionConfig::new("secret").passes(0);
        let hash = encrypt_str("x", &config).unwrap();
        assert_eq!(decrypt_str(&hash, &config).unwrap(), "x");
    }

    #[test]
    fn wrong_secret_fails() {
        let hash = encrypt_str("attack at dawn", &EncryptionConfig::new("right")).unwrap();
        let result = decrypt_str(&hash, &EncryptionConfig::new("wrong"));
        assert!(matches!(result, Err(CryptoError::Decrypt(_))));
    }

    #[test]
    fn mismatched_pass_count_fails() {
        let hash = encrypt_str("v", &EncryptionConfig::new("s").passes(2)).unwrap();
        assert!(decrypt_str(&hash, &EncryptionConfig::new("s").passes(3)).is_err());
    }

    #[test]
    fn tampered_hash_fails() {
        let config = EncryptionConfig::new("secret");
        let hash = encrypt_str("v", &config).unwrap();
        let mut raw = STANDARD.decode(hash.strip_prefix(HASH_PREFIX).unwrap()).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let tampered = format!("{HASH_PREFIX}{}", STANDARD.encode(raw));
        assert!(matches!(
            decrypt_str(&tampered, &config),
            Err(CryptoError::Decrypt(_))
        ));
    }

    #[test]
    fn validity_predicate() {
        let config = EncryptionConfig::new("secret");
        let hash = encrypt_str("v", &config).unwrap();
        assert!(is_portable_hash(&hash));
        assert!(!is_portable_hash("v"));
        assert!(!is_portable_hash("enc:v1:"));
        assert!(!is_portable_hash("enc:v1:!!!not-base64!!!"));
        assert!(matches!(
            decrypt_str("plaintext", &config),
            Err(CryptoError::InvalidHash)
        ));
    }

    #[test]
    fn value_round_trip_in_both_formats() {
        let config = EncryptionConfig::new("secret").passes(2);
        for format in [WireFormat::Json, WireFormat::Xml] {
            let hash = encrypt_value(format, &Payload { n: 42 }, &config).unwrap();
            assert!(!hash.contains("42"));
            let back: Payload = decrypt_value(format, &hash, &config).unwrap();
            assert_eq!(back, Payload { n: 42 });
        }
    }

    #[test]
    fn debug_redacts_the_secret() {
        let config = EncryptionConfig::new("sw0rdf1sh");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sw0rdf1sh"));
    }
}
