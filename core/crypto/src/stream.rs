//! Streaming encryption for large payloads.
//!
//! Payloads are split into fixed-size chunks so memory use is bounded by
//! `workers * chunk_size` regardless of payload size. Each chunk is sealed
//! independently under nonce `base_nonce || index`, with the header, index
//! and terminal flag as associated data. Reordering, substituting, or
//! dropping chunks therefore fails authentication.
//!
//! Both directions are lazy iterators that consume their source once. A
//! consumer cancels simply by dropping the iterator; the key is wiped on
//! drop. Chunks are processed in batches of `workers`; with more than one
//! worker a private rayon pool handles a batch in parallel and results are
//! still emitted in index order.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::aead::{open, seal};
use crate::config::{DecryptOptions, EngineConfig};
use crate::container::{chunk_aad, read_full, ChunkRecord, ChunkRecords, Header};
use crate::kdf::{derive, derive_key};
use crate::keys::DerivedKey;
use crate::secret::Password;
use invisilock_common::{Error, Result};

fn build_pool(workers: usize, role: &'static str) -> Result<Option<ThreadPool>> {
    if workers <= 1 {
        return Ok(None);
    }
    ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(move |i| format!("invisilock-{}-{}", role, i))
        .build()
        .map(Some)
        .map_err(|e| Error::ResourceExhausted(format!("Failed to start worker pool: {}", e)))
}

/// Apply `f` to every item, on the pool when there is one. Output order
/// always matches input order.
fn run_ordered<T, U, F>(pool: Option<&ThreadPool>, items: &[T], f: F) -> Vec<U>
where
    T: Sync,
    U: Send,
    F: Fn(&T) -> U + Sync + Send,
{
    match pool {
        Some(pool) if items.len() > 1 => pool.install(|| items.par_iter().map(&f).collect()),
        _ => items.iter().map(f).collect(),
    }
}

fn read_chunk<R: Read>(source: &mut R, chunk_size: usize) -> Result<Option<Vec<u8>>> {
    let mut buf = vec![0u8; chunk_size];
    let n = read_full(source, &mut buf).map_err(Error::from_io)?;
    if n == 0 {
        return Ok(None);
    }
    buf.truncate(n);
    Ok(Some(buf))
}

struct SealJob {
    index: u64,
    terminal: bool,
    plaintext: Vec<u8>,
}

fn seal_chunk(
    key: &DerivedKey,
    header: &Header,
    header_bytes: &[u8],
    job: &SealJob,
) -> Result<Vec<u8>> {
    let nonce = header.chunk_nonce(job.index);
    let aad = chunk_aad(header_bytes, job.index, job.terminal);
    let sealed = seal(key, header.algorithm, &nonce, &aad, &job.plaintext)?;
    Ok(ChunkRecord {
        terminal: job.terminal,
        sealed,
    }
    .to_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Header,
    Body,
    Done,
}

/// Lazy encryption of a plaintext source.
///
/// Yields the serialized header first, then one serialized chunk record per
/// chunk. Concatenating every item gives the complete container.
pub struct EncryptStream<R> {
    source: R,
    key: Option<DerivedKey>,
    header: Header,
    header_bytes: Vec<u8>,
    pool: Option<ThreadPool>,
    batch_size: usize,
    lookahead: Option<Vec<u8>>,
    ready: VecDeque<Vec<u8>>,
    next_index: u64,
    plaintext_len: u64,
    phase: Phase,
}

impl<R: Read> EncryptStream<R> {
    /// Derive a key and prepare to encrypt `source`.
    ///
    /// Reads the first chunk eagerly so an empty payload is rejected before
    /// the key derivation cost is paid.
    ///
    /// # Errors
    /// - `InvalidInput` for an empty password, empty payload, or invalid config
    /// - `ResourceExhausted` if derivation parameters exceed the memory ceiling
    pub fn new(password: &Password, mut source: R, config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        password.require_non_empty()?;

        let first = read_chunk(&mut source, config.chunk_size)?
            .ok_or_else(|| Error::InvalidInput("Payload cannot be empty".to_string()))?;

        let (key, salt) = derive(password, None, &config.kdf, config.max_kdf_memory_kib)?;
        let base_nonce = Header::generate_base_nonce(config.algorithm);
        let header = Header::new(
            config.algorithm,
            salt,
            config.kdf,
            base_nonce,
            config.chunk_size,
        )?;
        let header_bytes = header.to_bytes();
        let pool = build_pool(config.workers, "seal")?;

        debug!(
            algorithm = %config.algorithm,
            chunk_size = config.chunk_size,
            workers = config.workers,
            "Encryption stream started"
        );

        Ok(Self {
            source,
            key: Some(key),
            header,
            header_bytes,
            pool,
            batch_size: config.workers,
            lookahead: Some(first),
            ready: VecDeque::new(),
            next_index: 0,
            plaintext_len: 0,
            phase: Phase::Header,
        })
    }

    /// Header of the container being produced.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Plaintext bytes consumed from the source so far.
    pub fn plaintext_len(&self) -> u64 {
        self.plaintext_len
    }

    /// Drive the stream to completion, writing the container to `writer`.
    ///
    /// Returns the number of container bytes written.
    pub fn write_to<W: Write>(self, writer: &mut W) -> Result<u64> {
        let mut written = 0u64;
        for piece in self {
            let piece = piece?;
            writer.write_all(&piece)?;
            written += piece.len() as u64;
        }
        writer.flush()?;
        Ok(written)
    }

    fn fill(&mut self) -> Result<()> {
        let chunk_size = self.header.chunk_size();
        let mut jobs = Vec::with_capacity(self.batch_size);

        while jobs.len() < self.batch_size {
            let Some(plaintext) = self.lookahead.take() else {
                break;
            };
            // One chunk of read-ahead decides whether this one is the last.
            let following = read_chunk(&mut self.source, chunk_size)?;
            let terminal = following.is_none();

            let index = self.next_index;
            self.next_index = index.checked_add(1).ok_or_else(|| {
                Error::InvalidInput("Payload too large: chunk counter exhausted".to_string())
            })?;
            self.plaintext_len += plaintext.len() as u64;

            jobs.push(SealJob {
                index,
                terminal,
                plaintext,
            });
            self.lookahead = following;
            if terminal {
                break;
            }
        }

        let key = self
            .key
            .as_ref()
            .ok_or_else(|| Error::Crypto("Key already released".to_string()))?;
        let header = &self.header;
        let header_bytes = &self.header_bytes;
        let records = run_ordered(self.pool.as_ref(), &jobs, |job| {
            seal_chunk(key, header, header_bytes, job)
        });

        for record in records {
            self.ready.push_back(record?);
        }
        Ok(())
    }

    fn release(&mut self) {
        self.phase = Phase::Done;
        self.key = None;
        self.pool = None;
        self.lookahead = None;
    }
}

impl<R: Read> Iterator for EncryptStream<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.phase {
            Phase::Done => return None,
            Phase::Header => {
                self.phase = Phase::Body;
                return Some(Ok(self.header_bytes.clone()));
            }
            Phase::Body => {}
        }

        if self.ready.is_empty() {
            if let Err(err) = self.fill() {
                self.release();
                return Some(Err(err));
            }
        }

        let record = self.ready.pop_front();
        if self.ready.is_empty() && self.lookahead.is_none() {
            debug!(
                chunks = self.next_index,
                bytes = self.plaintext_len,
                "Encryption stream finished"
            );
            self.release();
        }
        record.map(Ok)
    }
}

struct OpenJob {
    index: u64,
    record: ChunkRecord,
}

fn open_chunk(
    key: &DerivedKey,
    header: &Header,
    header_bytes: &[u8],
    job: &OpenJob,
) -> Result<Vec<u8>> {
    let nonce = header.chunk_nonce(job.index);
    let aad = chunk_aad(header_bytes, job.index, job.record.terminal);
    open(key, header.algorithm, &nonce, &aad, &job.record.sealed)
}

/// Lazy decryption of a container source.
///
/// Yields plaintext chunks in index order, each only after its tag has been
/// verified. Also usable as a plain [`Read`] of the recovered payload.
pub struct DecryptStream<R> {
    records: ChunkRecords<R>,
    key: Option<DerivedKey>,
    header: Header,
    header_bytes: Vec<u8>,
    pool: Option<ThreadPool>,
    batch_size: usize,
    ready: VecDeque<Vec<u8>>,
    pending_error: Option<Error>,
    exhausted: bool,
    done: bool,
    failure: Option<Error>,
    plaintext_len: u64,
    current: Vec<u8>,
    position: usize,
}

impl<R: Read> DecryptStream<R> {
    /// Parse the header, derive the key and prepare to decrypt.
    ///
    /// # Errors
    /// - `InvalidInput` for an empty password or invalid options
    /// - `Format` / `UnsupportedVersion` for a bad header
    /// - `ResourceExhausted` if the header asks for more KDF memory than allowed
    pub fn new(password: &Password, mut source: R, options: &DecryptOptions) -> Result<Self> {
        options.validate()?;
        password.require_non_empty()?;

        let header = Header::read_from(&mut source)?;
        // Untrusted parameters are checked before any memory is committed.
        header.kdf.validate(options.max_kdf_memory_kib)?;
        let key = derive_key(
            password,
            &header.salt,
            &header.kdf,
            options.max_kdf_memory_kib,
        )?;
        let header_bytes = header.to_bytes();
        let pool = build_pool(options.workers, "open")?;

        debug!(
            algorithm = %header.algorithm,
            chunk_size = header.chunk_size,
            workers = options.workers,
            "Decryption stream started"
        );

        Ok(Self {
            records: ChunkRecords::new(source, header.chunk_size()),
            key: Some(key),
            header,
            header_bytes,
            pool,
            batch_size: options.workers,
            ready: VecDeque::new(),
            pending_error: None,
            exhausted: false,
            done: false,
            failure: None,
            plaintext_len: 0,
            current: Vec::new(),
            position: 0,
        })
    }

    /// Header of the container being read.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Authenticated plaintext bytes produced so far.
    pub fn plaintext_len(&self) -> u64 {
        self.plaintext_len
    }

    /// Drive the stream to completion, writing plaintext to `writer`.
    ///
    /// Chunks are written as they are authenticated; on error, `writer` may
    /// hold a verified prefix and the caller must discard it.
    pub fn write_to<W: Write>(self, writer: &mut W) -> Result<u64> {
        let mut written = 0u64;
        for chunk in self {
            let chunk = chunk?;
            writer.write_all(&chunk)?;
            written += chunk.len() as u64;
        }
        writer.flush()?;
        Ok(written)
    }

    fn fill(&mut self) {
        let mut jobs = Vec::with_capacity(self.batch_size);
        let mut read_error = None;

        while jobs.len() < self.batch_size {
            match self.records.next() {
                Some(Ok((index, record))) => {
                    let terminal = record.terminal;
                    jobs.push(OpenJob { index, record });
                    if terminal {
                        self.exhausted = true;
                        break;
                    }
                }
                Some(Err(err)) => {
                    read_error = Some(err);
                    break;
                }
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }

        let Some(key) = self.key.as_ref() else {
            self.pending_error = Some(Error::Crypto("Key already released".to_string()));
            return;
        };
        let header = &self.header;
        let header_bytes = &self.header_bytes;
        let opened = run_ordered(self.pool.as_ref(), &jobs, |job| {
            open_chunk(key, header, header_bytes, job)
        });

        for result in opened {
            match result {
                Ok(plaintext) => {
                    self.plaintext_len += plaintext.len() as u64;
                    self.ready.push_back(plaintext);
                }
                Err(err) => {
                    // Nothing after the first failing chunk is released.
                    self.pending_error = Some(err);
                    return;
                }
            }
        }
        self.pending_error = read_error;
    }

    fn release(&mut self) {
        self.done = true;
        self.key = None;
        self.pool = None;
    }
}

impl<R: Read> Iterator for DecryptStream<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(chunk) = self.ready.pop_front() {
                return Some(Ok(chunk));
            }
            if let Some(err) = self.pending_error.take() {
                self.failure = Some(err.clone());
                self.release();
                return Some(Err(err));
            }
            if self.done {
                return None;
            }
            if self.exhausted {
                debug!(
                    chunks = self.records.next_index(),
                    bytes = self.plaintext_len,
                    "Decryption stream finished"
                );
                self.release();
                return None;
            }
            self.fill();
        }
    }
}

impl<R: Read> Read for DecryptStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.position >= self.current.len() {
            if let Some(err) = &self.failure {
                return Err(io::Error::other(err.clone()));
            }
            match self.next() {
                Some(Ok(chunk)) => {
                    self.current = chunk;
                    self.position = 0;
                }
                Some(Err(err)) => return Err(io::Error::other(err)),
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.current.len() - self.position);
        buf[..n].copy_from_slice(&self.current[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}
