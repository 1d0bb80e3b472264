//! Container envelope: header and chunk records.
//!
//! # Layout (version 1, integers big-endian)
//! ```text
//! magic        4   "IVLK"
//! version      1   1
//! alg_id       1   1 = XChaCha20-Poly1305, 2 = AES-256-GCM
//! salt_len     1
//! salt         salt_len (16..=64)
//! kdf_memory   4   Argon2id memory cost, KiB
//! kdf_time     4   Argon2id iterations
//! kdf_lanes    4   Argon2id parallelism
//! nonce_len    1   must equal the algorithm's base nonce length
//! base_nonce   nonce_len
//! chunk_size   4
//! records      repeated until a record has the terminal flag:
//!   flags      1   bit 0 = terminal, other bits reserved (zero)
//!   ct_len     4   ciphertext length, tag excluded, <= chunk_size
//!   ciphertext ct_len
//!   tag        16
//! ```
//!
//! The header is parsed and validated in full before any record is read.
//! Every record is authenticated with the serialized header, its index and
//! its terminal flag as associated data.

use std::io::{self, Read, Write};

use rand::RngCore;
use tracing::debug;

use crate::aead::{Algorithm, COUNTER_SIZE, TAG_SIZE};
use crate::kdf::KdfParams;
use crate::keys::{Salt, MAX_SALT_LENGTH, MIN_SALT_LENGTH};
use invisilock_common::{Error, Result};

/// Format identifier at the start of every container.
pub const MAGIC: [u8; 4] = *b"IVLK";

/// Container format version written by this build.
pub const FORMAT_VERSION: u8 = 1;

/// Default chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Smallest chunk size accepted.
pub const MIN_CHUNK_SIZE: usize = 1024;

/// Largest chunk size accepted (16 MiB).
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Record flag marking the final chunk.
pub const FLAG_TERMINAL: u8 = 0x01;

/// Bytes preceding the ciphertext in each record: flags + length.
pub const RECORD_PREFIX_SIZE: usize = 5;

/// Check a chunk size against the accepted bounds.
pub fn validate_chunk_size(chunk_size: usize) -> Result<()> {
    if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
        return Err(Error::InvalidInput(format!(
            "Chunk size must be between {} and {} bytes, got {}",
            MIN_CHUNK_SIZE, MAX_CHUNK_SIZE, chunk_size
        )));
    }
    Ok(())
}

/// Container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Format version.
    pub version: u8,
    /// AEAD algorithm for every chunk.
    pub algorithm: Algorithm,
    /// Argon2id salt.
    pub salt: Salt,
    /// Argon2id parameters.
    pub kdf: KdfParams,
    /// Random per-operation nonce prefix.
    pub base_nonce: Vec<u8>,
    /// Plaintext bytes per chunk; only the terminal chunk may be shorter.
    pub chunk_size: u32,
}

impl Header {
    /// Build a header for a new container.
    ///
    /// # Errors
    /// - `InvalidInput` if the base nonce length does not match the algorithm
    ///   or the chunk size is out of bounds
    pub fn new(
        algorithm: Algorithm,
        salt: Salt,
        kdf: KdfParams,
        base_nonce: Vec<u8>,
        chunk_size: usize,
    ) -> Result<Self> {
        if base_nonce.len() != algorithm.base_nonce_len() {
            return Err(Error::InvalidInput(format!(
                "Base nonce for {} must be {} bytes, got {}",
                algorithm,
                algorithm.base_nonce_len(),
                base_nonce.len()
            )));
        }
        validate_chunk_size(chunk_size)?;

        Ok(Self {
            version: FORMAT_VERSION,
            algorithm,
            salt,
            kdf,
            base_nonce,
            chunk_size: chunk_size as u32,
        })
    }

    /// Generate a random base nonce for `algorithm`.
    pub fn generate_base_nonce(algorithm: Algorithm) -> Vec<u8> {
        let mut nonce = vec![0u8; algorithm.base_nonce_len()];
        rand::thread_rng().fill_bytes(&mut nonce);
        nonce
    }

    /// Chunk size as `usize`.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size as usize
    }

    /// Serialized length of this header.
    pub fn encoded_len(&self) -> usize {
        4 + 1 + 1 + 1 + self.salt.len() + 12 + 1 + self.base_nonce.len() + 4
    }

    /// Serialize the header.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&MAGIC);
        out.push(self.version);
        out.push(self.algorithm.id());
        out.push(self.salt.len() as u8);
        out.extend_from_slice(self.salt.as_bytes());
        out.extend_from_slice(&self.kdf.memory_cost.to_be_bytes());
        out.extend_from_slice(&self.kdf.time_cost.to_be_bytes());
        out.extend_from_slice(&self.kdf.parallelism.to_be_bytes());
        out.push(self.base_nonce.len() as u8);
        out.extend_from_slice(&self.base_nonce);
        out.extend_from_slice(&self.chunk_size.to_be_bytes());
        out
    }

    /// Read and validate a header.
    ///
    /// # Errors
    /// - `Format` for a wrong magic, truncated header, or inconsistent field
    /// - `UnsupportedVersion` for an unknown format version or algorithm id
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        read_field(reader, &mut magic, "magic")?;
        if magic != MAGIC {
            return Err(Error::Format("not an InvisiLock container".to_string()));
        }

        let version = read_u8(reader, "version")?;
        if version != FORMAT_VERSION {
            return Err(Error::UnsupportedVersion(format!(
                "format version {} (this build reads version {})",
                version, FORMAT_VERSION
            )));
        }

        let algorithm = Algorithm::from_id(read_u8(reader, "algorithm id")?)?;

        let salt_len = read_u8(reader, "salt length")? as usize;
        if !(MIN_SALT_LENGTH..=MAX_SALT_LENGTH).contains(&salt_len) {
            return Err(Error::Format(format!("invalid salt length {}", salt_len)));
        }
        let mut salt = vec![0u8; salt_len];
        read_field(reader, &mut salt, "salt")?;
        let salt = Salt::from_bytes(salt).map_err(|e| Error::Format(e.to_string()))?;

        let kdf = KdfParams {
            memory_cost: read_u32(reader, "KDF memory cost")?,
            time_cost: read_u32(reader, "KDF time cost")?,
            parallelism: read_u32(reader, "KDF parallelism")?,
        };
        // Structural check only; the caller applies its memory ceiling.
        kdf.validate(u32::MAX)
            .map_err(|_| Error::Format("invalid KDF parameters".to_string()))?;

        let nonce_len = read_u8(reader, "nonce length")? as usize;
        if nonce_len != algorithm.base_nonce_len() {
            return Err(Error::Format(format!(
                "base nonce length {} does not match {}",
                nonce_len, algorithm
            )));
        }
        let mut base_nonce = vec![0u8; nonce_len];
        read_field(reader, &mut base_nonce, "base nonce")?;

        let chunk_size = read_u32(reader, "chunk size")?;
        validate_chunk_size(chunk_size as usize)
            .map_err(|_| Error::Format(format!("invalid chunk size {}", chunk_size)))?;

        Ok(Self {
            version,
            algorithm,
            salt,
            kdf,
            base_nonce,
            chunk_size,
        })
    }

    /// Nonce for chunk `index`: base nonce followed by the big-endian index.
    ///
    /// Distinct indexes give distinct nonces, so a nonce is never reused
    /// under one key.
    pub fn chunk_nonce(&self, index: u64) -> Vec<u8> {
        let mut nonce = Vec::with_capacity(self.base_nonce.len() + COUNTER_SIZE);
        nonce.extend_from_slice(&self.base_nonce);
        nonce.extend_from_slice(&index.to_be_bytes());
        nonce
    }
}

/// Associated data for chunk `index`: serialized header, index, terminal flag.
pub fn chunk_aad(header_bytes: &[u8], index: u64, terminal: bool) -> Vec<u8> {
    let mut aad = Vec::with_capacity(header_bytes.len() + 9);
    aad.extend_from_slice(header_bytes);
    aad.extend_from_slice(&index.to_be_bytes());
    aad.push(u8::from(terminal));
    aad
}

/// One sealed chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    /// Whether this is the last chunk of the stream.
    pub terminal: bool,
    /// Ciphertext followed by the tag.
    pub sealed: Vec<u8>,
}

impl ChunkRecord {
    /// Ciphertext length without the tag.
    pub fn ciphertext_len(&self) -> usize {
        self.sealed.len().saturating_sub(TAG_SIZE)
    }

    /// Serialize the record.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RECORD_PREFIX_SIZE + self.sealed.len());
        out.push(if self.terminal { FLAG_TERMINAL } else { 0 });
        out.extend_from_slice(&(self.ciphertext_len() as u32).to_be_bytes());
        out.extend_from_slice(&self.sealed);
        out
    }

    /// Write the serialized record.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// Read one record.
    ///
    /// Returns `Ok(None)` if the input ends cleanly before the record starts.
    ///
    /// # Errors
    /// - `Format` for reserved flag bits or impossible lengths
    /// - `Authentication` if the input ends inside the record
    pub fn read_from<R: Read>(reader: &mut R, chunk_size: usize) -> Result<Option<Self>> {
        let mut prefix = [0u8; RECORD_PREFIX_SIZE];
        match read_full(reader, &mut prefix)? {
            0 => return Ok(None),
            n if n < RECORD_PREFIX_SIZE => return Err(Error::Authentication),
            _ => {}
        }

        let flags = prefix[0];
        if flags & !FLAG_TERMINAL != 0 {
            return Err(Error::Format(format!("reserved record flags set: {:#04x}", flags)));
        }
        let terminal = flags & FLAG_TERMINAL != 0;

        let ct_len = u32::from_be_bytes([prefix[1], prefix[2], prefix[3], prefix[4]]) as usize;
        if ct_len > chunk_size {
            return Err(Error::Format(format!(
                "record length {} exceeds chunk size {}",
                ct_len, chunk_size
            )));
        }
        if !terminal && ct_len != chunk_size {
            return Err(Error::Format(format!(
                "non-final record length {} differs from chunk size {}",
                ct_len, chunk_size
            )));
        }

        let mut sealed = vec![0u8; ct_len + TAG_SIZE];
        if read_full(reader, &mut sealed)? < sealed.len() {
            return Err(Error::Authentication);
        }

        Ok(Some(Self { terminal, sealed }))
    }
}

/// Serialize a complete container.
pub fn serialize(header: &Header, records: &[ChunkRecord]) -> Vec<u8> {
    let mut out = header.to_bytes();
    for record in records {
        out.extend_from_slice(&record.to_bytes());
    }
    out
}

/// Parse a container held in memory.
///
/// The header is fully validated before the returned iterator reads any
/// record.
pub fn parse(bytes: &[u8]) -> Result<(Header, ChunkRecords<&[u8]>)> {
    let mut reader = bytes;
    let header = Header::read_from(&mut reader)?;
    let records = ChunkRecords::new(reader, header.chunk_size());
    Ok((header, records))
}

/// Read only the header of a container.
pub fn inspect<R: Read>(mut reader: R) -> Result<Header> {
    Header::read_from(&mut reader)
}

/// Iterator over the records following a header.
///
/// Yields `(index, record)` pairs and stops after the terminal record. If
/// the input ends before a terminal record, yields `Authentication` (a
/// truncated stream is never a short valid one). Data after the terminal
/// record yields `Format` in place of the terminal record. The iterator is
/// fused after its first error.
pub struct ChunkRecords<R> {
    reader: R,
    chunk_size: usize,
    next_index: u64,
    done: bool,
}

impl<R: Read> ChunkRecords<R> {
    /// Wrap a reader positioned just after the header.
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size,
            next_index: 0,
            done: false,
        }
    }

    /// Index the next record will carry.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    fn read_next(&mut self) -> Result<(u64, ChunkRecord)> {
        let record = match ChunkRecord::read_from(&mut self.reader, self.chunk_size)? {
            Some(record) => record,
            None => {
                debug!("Container ended before its final chunk");
                return Err(Error::Authentication);
            }
        };

        let index = self.next_index;
        self.next_index = index
            .checked_add(1)
            .ok_or_else(|| Error::Format("chunk counter overflow".to_string()))?;

        if record.terminal {
            self.done = true;
            let mut extra = [0u8; 1];
            if read_full(&mut self.reader, &mut extra)? != 0 {
                return Err(Error::Format(
                    "unexpected data after final chunk".to_string(),
                ));
            }
        }

        Ok((index, record))
    }
}

impl<R: Read> Iterator for ChunkRecords<R> {
    type Item = Result<(u64, ChunkRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.read_next();
        if item.is_err() {
            self.done = true;
        }
        Some(item)
    }
}

/// Fill `buf` from `reader`, stopping early only at end of input.
/// Returns the number of bytes read.
pub(crate) fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_field<R: Read>(reader: &mut R, buf: &mut [u8], field: &str) -> Result<()> {
    if read_full(reader, buf)? < buf.len() {
        return Err(Error::Format(format!(
            "input truncated while reading {}",
            field
        )));
    }
    Ok(())
}

fn read_u8<R: Read>(reader: &mut R, field: &str) -> Result<u8> {
    let mut buf = [0u8; 1];
    read_field(reader, &mut buf, field)?;
    Ok(buf[0])
}

fn read_u32<R: Read>(reader: &mut R, field: &str) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_field(reader, &mut buf, field)?;
    Ok(u32::from_be_bytes(buf))
}
