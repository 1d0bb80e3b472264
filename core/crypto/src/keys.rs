//! Key types with secure memory handling.
//!
//! Derived keys zeroize their memory on drop so that key material does not
//! outlive the operation that produced it.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use invisilock_common::{Error, Result};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of freshly generated salts.
pub const SALT_LENGTH: usize = 32;

/// Shortest salt accepted from a container.
pub const MIN_SALT_LENGTH: usize = 16;

/// Longest salt accepted from a container.
pub const MAX_SALT_LENGTH: usize = 64;

/// Symmetric key derived from a password for one operation.
///
/// Deliberately not `Clone`: the operation that derives a key is its only
/// owner, and dropping it (on success, error, or unwinding) wipes the bytes.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    key: [u8; KEY_LENGTH],
}

impl DerivedKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Generate a random key. Used where no password is involved, e.g. tests.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DerivedKey([REDACTED])")
    }
}

/// Salt for key derivation. Not secret; stored in the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt(Vec<u8>);

impl Salt {
    /// Generate a random salt of [`SALT_LENGTH`] bytes.
    pub fn generate() -> Self {
        let mut salt = vec![0u8; SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);
        Self(salt)
    }

    /// Create from bytes.
    ///
    /// # Errors
    /// - `InvalidInput` if the length is outside
    ///   [`MIN_SALT_LENGTH`]..=[`MAX_SALT_LENGTH`]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if !(MIN_SALT_LENGTH..=MAX_SALT_LENGTH).contains(&bytes.len()) {
            return Err(Error::InvalidInput(format!(
                "Salt must be {}..={} bytes, got {}",
                MIN_SALT_LENGTH,
                MAX_SALT_LENGTH,
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Salt length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a constructed salt; present for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_key_generate() {
        let key1 = DerivedKey::generate();
        let key2 = DerivedKey::generate();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derived_key_debug_redacted() {
        let key = DerivedKey::from_bytes([0xAB; KEY_LENGTH]);
        let shown = format!("{:?}", key);
        assert_eq!(shown, "DerivedKey([REDACTED])");
    }

    #[test]
    fn test_salt_generate() {
        let salt1 = Salt::generate();
        let salt2 = Salt::generate();

        assert_eq!(salt1.len(), SALT_LENGTH);
        assert_ne!(salt1.as_bytes(), salt2.as_bytes());
    }

    #[test]
    fn test_salt_length_bounds() {
        assert!(Salt::from_bytes(vec![0u8; MIN_SALT_LENGTH - 1]).is_err());
        assert!(Salt::from_bytes(vec![0u8; MIN_SALT_LENGTH]).is_ok());
        assert!(Salt::from_bytes(vec![0u8; MAX_SALT_LENGTH]).is_ok());
        assert!(Salt::from_bytes(vec![0u8; MAX_SALT_LENGTH + 1]).is_err());
    }
}
