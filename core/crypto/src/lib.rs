//! Password-based encryption engine for InvisiLock.
//!
//! This crate provides:
//! - Key derivation using Argon2id
//! - Authenticated encryption using XChaCha20-Poly1305 or AES-256-GCM
//! - A self-describing, chunked container format
//! - Streaming encryption and decryption with optional parallel workers
//! - Secret handling with automatic zeroization
//!
//! # Security Guarantees
//! - All key material is zeroized on drop
//! - No plaintext, password, or key material is ever logged
//! - No plaintext is released before its chunk authenticates
//! - Every operation uses a fresh salt and base nonce

pub mod aead;
pub mod armor;
pub mod config;
pub mod container;
pub mod engine;
pub mod kdf;
pub mod keys;
pub mod secret;
pub mod stream;

pub use aead::Algorithm;
pub use config::{DecryptOptions, EngineConfig};
pub use container::Header;
pub use engine::{decrypt, decrypt_to, decrypt_to_vec, encrypt, encrypt_to, inspect};
pub use kdf::KdfParams;
pub use keys::{DerivedKey, Salt};
pub use secret::Password;
pub use stream::{DecryptStream, EncryptStream};
