//! Authenticated encryption with associated data.
//!
//! Two AEAD constructions are available, both keyed with a 256-bit key
//! derived by Argon2id:
//! - XChaCha20-Poly1305 (default), 24-byte nonce
//! - AES-256-GCM, 12-byte nonce
//!
//! Each has a stable one-byte identifier that is written into containers so
//! a future algorithm never silently reinterprets old ciphertext.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::keys::DerivedKey;
use invisilock_common::{Error, Result};

/// Authentication tag size (16 bytes) for every supported algorithm.
pub const TAG_SIZE: usize = 16;

/// Width of the chunk counter appended to the base nonce.
pub const COUNTER_SIZE: usize = 8;

/// Supported AEAD algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Argon2id + XChaCha20-Poly1305.
    #[default]
    XChaCha20Poly1305,
    /// Argon2id + AES-256-GCM.
    Aes256Gcm,
}

impl Algorithm {
    /// Identifier stored in the container header.
    pub fn id(&self) -> u8 {
        match self {
            Algorithm::XChaCha20Poly1305 => 1,
            Algorithm::Aes256Gcm => 2,
        }
    }

    /// Resolve a header identifier.
    ///
    /// # Errors
    /// - `UnsupportedVersion` for identifiers this build does not know
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            1 => Ok(Algorithm::XChaCha20Poly1305),
            2 => Ok(Algorithm::Aes256Gcm),
            other => Err(Error::UnsupportedVersion(format!(
                "unknown algorithm id {}",
                other
            ))),
        }
    }

    /// Full nonce length for this algorithm.
    pub fn nonce_len(&self) -> usize {
        match self {
            Algorithm::XChaCha20Poly1305 => 24,
            Algorithm::Aes256Gcm => 12,
        }
    }

    /// Length of the random per-operation base nonce; the rest of the nonce
    /// is the chunk counter.
    pub fn base_nonce_len(&self) -> usize {
        self.nonce_len() - COUNTER_SIZE
    }

    /// Canonical lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::XChaCha20Poly1305 => "xchacha20poly1305",
            Algorithm::Aes256Gcm => "aes256gcm",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "xchacha20poly1305" | "xchacha" | "chacha" => Ok(Algorithm::XChaCha20Poly1305),
            "aes256gcm" | "aesgcm" | "aes" => Ok(Algorithm::Aes256Gcm),
            _ => Err(Error::InvalidInput(format!(
                "Unknown algorithm '{}'; use xchacha20poly1305 or aes256gcm",
                s
            ))),
        }
    }
}

fn check_nonce(algorithm: Algorithm, nonce: &[u8]) -> Result<()> {
    if nonce.len() != algorithm.nonce_len() {
        return Err(Error::InvalidInput(format!(
            "Invalid nonce length for {}: expected {}, got {}",
            algorithm,
            algorithm.nonce_len(),
            nonce.len()
        )));
    }
    Ok(())
}

/// Encrypt and authenticate `plaintext`, binding `aad`.
///
/// # Preconditions
/// - `nonce` is `algorithm.nonce_len()` bytes and never reused with `key`
///
/// # Postconditions
/// - Returns ciphertext || tag, `plaintext.len() + TAG_SIZE` bytes
///
/// # Errors
/// - `InvalidInput` if the nonce length is wrong
/// - `Crypto` if the primitive refuses the input
pub fn seal(
    key: &DerivedKey,
    algorithm: Algorithm,
    nonce: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    check_nonce(algorithm, nonce)?;

    match algorithm {
        Algorithm::XChaCha20Poly1305 => {
            use chacha20poly1305::aead::{generic_array::GenericArray, Aead, KeyInit, Payload};
            use chacha20poly1305::XChaCha20Poly1305;

            let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));
            cipher
                .encrypt(
                    GenericArray::from_slice(nonce),
                    Payload {
                        msg: plaintext,
                        aad,
                    },
                )
                .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))
        }
        Algorithm::Aes256Gcm => {
            use aes_gcm::aead::{generic_array::GenericArray, Aead, KeyInit, Payload};
            use aes_gcm::Aes256Gcm;

            let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));
            cipher
                .encrypt(
                    GenericArray::from_slice(nonce),
                    Payload {
                        msg: plaintext,
                        aad,
                    },
                )
                .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))
        }
    }
}

/// Verify and decrypt `sealed` (ciphertext || tag).
///
/// Tag comparison is constant-time inside the AEAD implementation. On any
/// mismatch no plaintext is returned.
///
/// # Errors
/// - `InvalidInput` if the nonce length is wrong
/// - `Authentication` if the input is shorter than a tag or fails verification
pub fn open(
    key: &DerivedKey,
    algorithm: Algorithm,
    nonce: &[u8],
    aad: &[u8],
    sealed: &[u8],
) -> Result<Vec<u8>> {
    check_nonce(algorithm, nonce)?;

    if sealed.len() < TAG_SIZE {
        return Err(Error::Authentication);
    }

    match algorithm {
        Algorithm::XChaCha20Poly1305 => {
            use chacha20poly1305::aead::{generic_array::GenericArray, Aead, KeyInit, Payload};
            use chacha20poly1305::XChaCha20Poly1305;

            let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));
            cipher
                .decrypt(
                    GenericArray::from_slice(nonce),
                    Payload { msg: sealed, aad },
                )
                .map_err(|_| Error::Authentication)
        }
        Algorithm::Aes256Gcm => {
            use aes_gcm::aead::{generic_array::GenericArray, Aead, KeyInit, Payload};
            use aes_gcm::Aes256Gcm;

            let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));
            cipher
                .decrypt(
                    GenericArray::from_slice(nonce),
                    Payload { msg: sealed, aad },
                )
                .map_err(|_| Error::Authentication)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KEY_LENGTH;

    const ALGORITHMS: [Algorithm; 2] = [Algorithm::XChaCha20Poly1305, Algorithm::Aes256Gcm];

    fn nonce_for(algorithm: Algorithm) -> Vec<u8> {
        vec![7u8; algorithm.nonce_len()]
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = DerivedKey::from_bytes([42u8; KEY_LENGTH]);
        for algorithm in ALGORITHMS {
            let nonce = nonce_for(algorithm);
            let sealed = seal(&key, algorithm, &nonce, b"header", b"Hello, World!").unwrap();
            assert_eq!(sealed.len(), 13 + TAG_SIZE);

            let opened = open(&key, algorithm, &nonce, b"header", &sealed).unwrap();
            assert_eq!(opened, b"Hello, World!");
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = DerivedKey::from_bytes([1u8; KEY_LENGTH]);
        let key2 = DerivedKey::from_bytes([2u8; KEY_LENGTH]);
        for algorithm in ALGORITHMS {
            let nonce = nonce_for(algorithm);
            let sealed = seal(&key1, algorithm, &nonce, b"", b"Secret data").unwrap();
            let result = open(&key2, algorithm, &nonce, b"", &sealed);
            assert!(matches!(result, Err(Error::Authentication)));
        }
    }

    #[test]
    fn test_aad_mismatch_fails() {
        let key = DerivedKey::generate();
        for algorithm in ALGORITHMS {
            let nonce = nonce_for(algorithm);
            let sealed = seal(&key, algorithm, &nonce, b"chunk-0", b"data").unwrap();
            let result = open(&key, algorithm, &nonce, b"chunk-1", &sealed);
            assert!(matches!(result, Err(Error::Authentication)));
        }
    }

    #[test]
    fn test_tampered_tag_fails() {
        let key = DerivedKey::generate();
        for algorithm in ALGORITHMS {
            let nonce = nonce_for(algorithm);
            let mut sealed = seal(&key, algorithm, &nonce, b"", b"Important data").unwrap();
            let last = sealed.len() - 1;
            sealed[last] ^= 0x01;
            assert!(open(&key, algorithm, &nonce, b"", &sealed).is_err());
        }
    }

    #[test]
    fn test_short_input_is_authentication_failure() {
        let key = DerivedKey::generate();
        let nonce = nonce_for(Algorithm::XChaCha20Poly1305);
        let result = open(&key, Algorithm::XChaCha20Poly1305, &nonce, b"", &[0u8; 5]);
        assert!(matches!(result, Err(Error::Authentication)));
    }

    #[test]
    fn test_wrong_nonce_length_rejected() {
        let key = DerivedKey::generate();
        let result = seal(&key, Algorithm::Aes256Gcm, &[0u8; 24], b"", b"data");
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_algorithm_ids_and_names() {
        for algorithm in ALGORITHMS {
            assert_eq!(Algorithm::from_id(algorithm.id()).unwrap(), algorithm);
            assert_eq!(algorithm.name().parse::<Algorithm>().unwrap(), algorithm);
        }
        assert_eq!("AES-256-GCM".parse::<Algorithm>().unwrap(), Algorithm::Aes256Gcm);
        assert!(matches!(
            Algorithm::from_id(9),
            Err(Error::UnsupportedVersion(_))
        ));
        assert!("des".parse::<Algorithm>().is_err());
        assert_eq!(Algorithm::XChaCha20Poly1305.base_nonce_len(), 16);
        assert_eq!(Algorithm::Aes256Gcm.base_nonce_len(), 4);
    }
}
