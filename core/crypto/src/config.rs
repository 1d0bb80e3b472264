//! Engine configuration.
//!
//! Configuration is always passed explicitly into each call; the engine
//! keeps no ambient state between operations.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::aead::Algorithm;
use crate::container::{validate_chunk_size, DEFAULT_CHUNK_SIZE};
use crate::kdf::{KdfParams, DEFAULT_MAX_MEMORY_KIB};
use invisilock_common::{Error, Result};

/// Upper bound on worker threads per operation.
pub const MAX_WORKERS: usize = 64;

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        .min(4)
}

fn default_max_kdf_memory() -> u32 {
    DEFAULT_MAX_MEMORY_KIB
}

/// Settings for encryption (and, through [`EngineConfig::decrypt_options`],
/// decryption).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// AEAD algorithm for new containers.
    #[serde(default)]
    pub algorithm: Algorithm,
    /// Argon2id parameters for new containers.
    #[serde(default)]
    pub kdf: KdfParams,
    /// Plaintext bytes per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Chunks sealed or opened concurrently; 1 disables the worker pool.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Largest Argon2 memory cost (KiB) this process will honour.
    #[serde(default = "default_max_kdf_memory")]
    pub max_kdf_memory_kib: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            kdf: KdfParams::default(),
            chunk_size: default_chunk_size(),
            workers: default_workers(),
            max_kdf_memory_kib: default_max_kdf_memory(),
        }
    }
}

impl EngineConfig {
    /// Use a different algorithm.
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Use different KDF parameters.
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// Set custom chunk size.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Set the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Check every field.
    ///
    /// # Errors
    /// - `InvalidInput` for out-of-range chunk size, worker count, or KDF parameters
    /// - `ResourceExhausted` if the KDF memory cost exceeds `max_kdf_memory_kib`
    pub fn validate(&self) -> Result<()> {
        validate_chunk_size(self.chunk_size)?;
        validate_workers(self.workers)?;
        self.kdf.validate(self.max_kdf_memory_kib)
    }

    /// Options for decrypting with the same resource limits.
    pub fn decrypt_options(&self) -> DecryptOptions {
        DecryptOptions {
            workers: self.workers,
            max_kdf_memory_kib: self.max_kdf_memory_kib,
        }
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize and validate configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Settings for decryption. Everything else comes from the container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptOptions {
    /// Chunks opened concurrently; 1 disables the worker pool.
    pub workers: usize,
    /// Largest Argon2 memory cost (KiB) accepted from a container header.
    pub max_kdf_memory_kib: u32,
}

impl Default for DecryptOptions {
    fn default() -> Self {
        EngineConfig::default().decrypt_options()
    }
}

impl DecryptOptions {
    /// Check every field.
    pub fn validate(&self) -> Result<()> {
        validate_workers(self.workers)
    }
}

fn validate_workers(workers: usize) -> Result<()> {
    if !(1..=MAX_WORKERS).contains(&workers) {
        return Err(Error::InvalidInput(format!(
            "Worker count must be between 1 and {}, got {}",
            MAX_WORKERS, workers
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.algorithm, Algorithm::XChaCha20Poly1305);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(config.workers >= 1);
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = EngineConfig::default()
            .with_algorithm(Algorithm::Aes256Gcm)
            .with_chunk_size(4096)
            .with_workers(2);

        let json = config.to_json().unwrap();
        assert!(json.contains("\"aes256gcm\""));
        let restored = EngineConfig::from_json(&json).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{ "chunk_size": 8192 }"#).unwrap();
        assert_eq!(config.chunk_size, 8192);
        assert_eq!(config.kdf, KdfParams::default());
        assert_eq!(config.max_kdf_memory_kib, DEFAULT_MAX_MEMORY_KIB);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(
            EngineConfig::from_json(r#"{ "chunksize": 8192 }"#),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(EngineConfig::default().with_chunk_size(10).validate().is_err());
        assert!(EngineConfig::default().with_workers(0).validate().is_err());

        let mut config = EngineConfig::default().with_kdf(KdfParams::sensitive());
        config.max_kdf_memory_kib = 1024;
        assert!(matches!(config.validate(), Err(Error::ResourceExhausted(_))));
    }
}
