//! One-call encryption and decryption.
//!
//! Thin wrappers over [`EncryptStream`] and [`DecryptStream`] for callers
//! that want a finished result rather than an iterator.

use std::io::{Read, Write};

use crate::config::{DecryptOptions, EngineConfig};
use crate::container::{self, Header};
use crate::secret::Password;
use crate::stream::{DecryptStream, EncryptStream};
use invisilock_common::Result;

/// Encrypt a payload into an in-memory container.
///
/// # Errors
/// - `InvalidInput` for an empty password, empty payload, or invalid config
/// - `ResourceExhausted` if key derivation needs more memory than allowed
/// - `Io` if reading the payload fails
pub fn encrypt<R: Read>(password: &Password, payload: R, config: &EngineConfig) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encrypt_to(password, payload, &mut out, config)?;
    Ok(out)
}

/// Encrypt a payload, writing the container to `output`.
///
/// Returns the number of container bytes written. On error `output` holds a
/// partial container that must be discarded.
pub fn encrypt_to<R: Read, W: Write>(
    password: &Password,
    payload: R,
    mut output: W,
    config: &EngineConfig,
) -> Result<u64> {
    EncryptStream::new(password, payload, config)?.write_to(&mut output)
}

/// Start decrypting a container.
///
/// The returned stream yields authenticated plaintext chunks in order and
/// can also be used as a [`Read`].
pub fn decrypt<R: Read>(
    password: &Password,
    container: R,
    options: &DecryptOptions,
) -> Result<DecryptStream<R>> {
    DecryptStream::new(password, container, options)
}

/// Decrypt a container into memory.
///
/// Nothing is returned unless every chunk authenticates.
///
/// # Errors
/// - `Authentication` for a wrong password, tampering, or truncation
/// - `Format` / `UnsupportedVersion` for a malformed or foreign container
/// - `ResourceExhausted` if the header asks for too much KDF memory
pub fn decrypt_to_vec<R: Read>(
    password: &Password,
    container: R,
    options: &DecryptOptions,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for chunk in decrypt(password, container, options)? {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}

/// Decrypt a container, writing plaintext to `output`.
///
/// Returns the number of plaintext bytes written. On error `output` may hold
/// an authenticated prefix; callers must discard it.
pub fn decrypt_to<R: Read, W: Write>(
    password: &Password,
    container: R,
    mut output: W,
    options: &DecryptOptions,
) -> Result<u64> {
    decrypt(password, container, options)?.write_to(&mut output)
}

/// Read a container header without a password.
pub fn inspect<R: Read>(container: R) -> Result<Header> {
    container::inspect(container)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aead::Algorithm;
    use crate::container::{FORMAT_VERSION, MIN_CHUNK_SIZE};
    use crate::kdf::test_params;
    use invisilock_common::{Error, ErrorKind};

    fn config() -> EngineConfig {
        EngineConfig::default()
            .with_kdf(test_params())
            .with_chunk_size(MIN_CHUNK_SIZE)
            .with_workers(2)
    }

    #[test]
    fn test_hello_world_scenario() {
        let password = Password::from("correct horse");
        let container = encrypt(&password, &b"hello world"[..], &config()).unwrap();

        let header = inspect(&container[..]).unwrap();
        assert_eq!(header.version, FORMAT_VERSION);
        assert_eq!(header.algorithm, Algorithm::XChaCha20Poly1305);

        let (_, records) = crate::container::parse(&container).unwrap();
        let records: Vec<_> = records.collect::<Result<_>>().unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].1.terminal);

        let options = config().decrypt_options();
        let plaintext = decrypt_to_vec(&password, &container[..], &options).unwrap();
        assert_eq!(plaintext, b"hello world");

        let wrong = decrypt_to_vec(&Password::from("wrong horse"), &container[..], &options);
        assert!(matches!(wrong, Err(Error::Authentication)));
    }

    #[test]
    fn test_fresh_salt_and_nonce_per_call() {
        let password = Password::from("pw");
        let a = encrypt(&password, &b"same payload"[..], &config()).unwrap();
        let b = encrypt(&password, &b"same payload"[..], &config()).unwrap();
        assert_ne!(a, b);

        let ha = inspect(&a[..]).unwrap();
        let hb = inspect(&b[..]).unwrap();
        assert_ne!(ha.salt, hb.salt);
        assert_ne!(ha.base_nonce, hb.base_nonce);
    }

    #[test]
    fn test_encrypt_to_and_decrypt_to_writers() {
        let password = Password::from("pw");
        let payload: Vec<u8> = (0..5000u32).map(|i| (i * 7) as u8).collect();

        let mut container = Vec::new();
        let written = encrypt_to(&password, &payload[..], &mut container, &config()).unwrap();
        assert_eq!(written, container.len() as u64);

        let mut plaintext = Vec::new();
        let recovered = decrypt_to(
            &password,
            &container[..],
            &mut plaintext,
            &config().decrypt_options(),
        )
        .unwrap();
        assert_eq!(recovered, payload.len() as u64);
        assert_eq!(plaintext, payload);
    }

    #[test]
    fn test_header_errors() {
        let options = config().decrypt_options();
        let password = Password::from("pw");

        let err = decrypt_to_vec(&password, &b"not a container at all"[..], &options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);

        let mut container = encrypt(&password, &b"data"[..], &config()).unwrap();
        container[4] = 9;
        let err = decrypt_to_vec(&password, &container[..], &options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedVersion);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let password = Password::from("pw");
        let mut container = encrypt(&password, &b"data"[..], &config()).unwrap();
        container.extend_from_slice(b"extra");

        let result = decrypt_to_vec(&password, &container[..], &config().decrypt_options());
        assert!(matches!(result, Err(Error::Format(_))));
    }

    #[test]
    fn test_duplicated_chunk_rejected() {
        let password = Password::from("pw");
        let payload = vec![0x5au8; MIN_CHUNK_SIZE * 2 + 1];
        let container = encrypt(&password, &payload[..], &config()).unwrap();

        let header_len = inspect(&container[..]).unwrap().encoded_len();
        let record_len = crate::container::RECORD_PREFIX_SIZE
            + MIN_CHUNK_SIZE
            + crate::aead::TAG_SIZE;
        let first = &container[header_len..header_len + record_len];

        let mut duplicated = container[..header_len + record_len].to_vec();
        duplicated.extend_from_slice(first);
        duplicated.extend_from_slice(&container[header_len + 2 * record_len..]);

        let result = decrypt_to_vec(&password, &duplicated[..], &config().decrypt_options());
        assert!(matches!(result, Err(Error::Authentication)));
    }

    #[test]
    fn test_decrypt_stream_reads_as_io() {
        use std::io::Read;

        let password = Password::from("pw");
        let container = encrypt(&password, &b"read me back"[..], &config()).unwrap();

        let mut stream = decrypt(&password, &container[..], &config().decrypt_options()).unwrap();
        let mut text = String::new();
        stream.read_to_string(&mut text).unwrap();
        assert_eq!(text, "read me back");
        assert_eq!(stream.header().algorithm, Algorithm::XChaCha20Poly1305);
    }
}
