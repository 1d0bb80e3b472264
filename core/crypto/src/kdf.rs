//! Key derivation using Argon2id.
//!
//! Argon2id is a memory-hard password hashing function that provides
//! resistance to both GPU and time-memory trade-off attacks.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroize;

use crate::keys::{DerivedKey, Salt, KEY_LENGTH};
use crate::secret::Password;
use invisilock_common::{Error, Result};

/// Default ceiling on Argon2 memory cost, in KiB (1 GiB).
pub const DEFAULT_MAX_MEMORY_KIB: u32 = 1024 * 1024;

/// Parameters for Argon2id key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Create parameters suitable for interactive use.
    ///
    /// These parameters provide a balance between security and usability,
    /// targeting approximately 0.5-1 second of derivation time.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Create parameters suitable for sensitive data.
    ///
    /// Higher security parameters that may take several seconds.
    pub fn sensitive() -> Self {
        Self {
            memory_cost: 262144, // 256 MiB
            time_cost: 4,
            parallelism: 4,
        }
    }

    /// Create moderate parameters for constrained devices.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }

    /// Look up a preset by name.
    pub fn from_strength(name: &str) -> Result<Self> {
        match name {
            "interactive" => Ok(Self::interactive()),
            "moderate" => Ok(Self::moderate()),
            "sensitive" => Ok(Self::sensitive()),
            other => Err(Error::InvalidInput(format!(
                "Unknown KDF strength '{}'; use interactive, moderate, or sensitive",
                other
            ))),
        }
    }

    /// Memory the derivation will allocate, in bytes.
    pub fn estimated_memory_bytes(&self) -> u64 {
        u64::from(self.memory_cost) * 1024
    }

    /// Check these parameters against Argon2's rules and a memory ceiling.
    ///
    /// # Errors
    /// - `ResourceExhausted` if `memory_cost` exceeds `max_memory_kib`
    /// - `InvalidInput` if Argon2 rejects the combination
    pub fn validate(&self, max_memory_kib: u32) -> Result<()> {
        self.to_argon2(max_memory_kib).map(|_| ())
    }

    fn to_argon2(&self, max_memory_kib: u32) -> Result<Params> {
        if self.memory_cost > max_memory_kib {
            return Err(Error::ResourceExhausted(format!(
                "KDF memory cost {} KiB exceeds the allowed {} KiB",
                self.memory_cost, max_memory_kib
            )));
        }

        Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(KEY_LENGTH),
        )
        .map_err(map_argon2_error)
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::moderate()
    }
}

fn map_argon2_error(err: argon2::Error) -> Error {
    match err {
        argon2::Error::MemoryTooMuch => {
            Error::ResourceExhausted(format!("Key derivation failed: {}", err))
        }
        other => Error::InvalidInput(format!("Invalid KDF parameters: {}", other)),
    }
}

/// Derive a key from a password and salt using Argon2id.
///
/// # Preconditions
/// - `password` must not be empty
/// - `params` must have valid Argon2id parameters within `max_memory_kib`
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
///
/// # Errors
/// - `InvalidInput` if password is empty or parameters are invalid
/// - `ResourceExhausted` if the memory cost is above the ceiling
pub fn derive_key(
    password: &Password,
    salt: &Salt,
    params: &KdfParams,
    max_memory_kib: u32,
) -> Result<DerivedKey> {
    password.require_non_empty()?;

    let argon2_params = params.to_argon2(max_memory_kib)?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    debug!(
        memory_kib = params.memory_cost,
        iterations = params.time_cost,
        lanes = params.parallelism,
        "Deriving key"
    );

    let mut key_bytes = [0u8; KEY_LENGTH];
    let outcome = argon2.hash_password_into(password.as_bytes(), salt.as_bytes(), &mut key_bytes);
    // The stack copy is wiped here; the key itself wipes on drop, including
    // when the error below returns early.
    let key = DerivedKey::from_bytes(key_bytes);
    key_bytes.zeroize();
    outcome.map_err(map_argon2_error)?;

    Ok(key)
}

/// Derive a key, generating a fresh salt when none is supplied.
///
/// Returns the key together with the salt that must be stored alongside
/// the ciphertext.
pub fn derive(
    password: &Password,
    salt: Option<Salt>,
    params: &KdfParams,
    max_memory_kib: u32,
) -> Result<(DerivedKey, Salt)> {
    let salt = salt.unwrap_or_else(Salt::generate);
    let key = derive_key(password, &salt, params, max_memory_kib)?;
    Ok((key, salt))
}

#[cfg(test)]
pub(crate) fn test_params() -> KdfParams {
    KdfParams {
        memory_cost: 64,
        time_cost: 1,
        parallelism: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn salt(byte: u8) -> Salt {
        Salt::from_bytes(vec![byte; 32]).unwrap()
    }

    #[test]
    fn test_derive_key_deterministic() {
        let password = Password::from("test-password-123");
        let params = test_params();

        let key1 = derive_key(&password, &salt(42), &params, DEFAULT_MAX_MEMORY_KIB).unwrap();
        let key2 = derive_key(&password, &salt(42), &params, DEFAULT_MAX_MEMORY_KIB).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_salt() {
        let password = Password::from("test-password-123");
        let params = test_params();

        let key1 = derive_key(&password, &salt(1), &params, DEFAULT_MAX_MEMORY_KIB).unwrap();
        let key2 = derive_key(&password, &salt(2), &params, DEFAULT_MAX_MEMORY_KIB).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_password() {
        let params = test_params();

        let key1 = derive_key(
            &Password::from("password1"),
            &salt(42),
            &params,
            DEFAULT_MAX_MEMORY_KIB,
        )
        .unwrap();
        let key2 = derive_key(
            &Password::from("password2"),
            &salt(42),
            &params,
            DEFAULT_MAX_MEMORY_KIB,
        )
        .unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_empty_password_fails() {
        let result = derive_key(
            &Password::new(Vec::new()),
            &Salt::generate(),
            &test_params(),
            DEFAULT_MAX_MEMORY_KIB,
        );

        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_derive_generates_salt_when_absent() {
        let password = Password::from("pw");
        let (key1, salt1) =
            derive(&password, None, &test_params(), DEFAULT_MAX_MEMORY_KIB).unwrap();
        let (key2, salt2) =
            derive(&password, None, &test_params(), DEFAULT_MAX_MEMORY_KIB).unwrap();

        assert_ne!(salt1, salt2);
        assert_ne!(key1.as_bytes(), key2.as_bytes());

        let (key3, salt3) = derive(
            &password,
            Some(salt1.clone()),
            &test_params(),
            DEFAULT_MAX_MEMORY_KIB,
        )
        .unwrap();
        assert_eq!(salt3, salt1);
        assert_eq!(key3.as_bytes(), key1.as_bytes());
    }

    #[test]
    fn test_memory_ceiling_is_resource_exhausted() {
        let params = KdfParams::sensitive();
        let result = derive_key(&Password::from("pw"), &salt(7), &params, 1024);

        assert!(matches!(result, Err(Error::ResourceExhausted(_))));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = KdfParams {
            memory_cost: 64,
            time_cost: 0,
            parallelism: 1,
        };
        assert!(matches!(
            params.validate(DEFAULT_MAX_MEMORY_KIB),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_strength_presets() {
        assert_eq!(KdfParams::from_strength("moderate").unwrap(), KdfParams::moderate());
        assert_eq!(
            KdfParams::from_strength("sensitive").unwrap(),
            KdfParams::sensitive()
        );
        assert!(KdfParams::from_strength("extreme").is_err());
        assert_eq!(KdfParams::sensitive().estimated_memory_bytes(), 256 * 1024 * 1024);
    }
}
