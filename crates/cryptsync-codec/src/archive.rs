//! Native encrypted container
//!
//! Layout: a fixed header (magic, flags, Argon2 costs, salt, nonce prefix)
//! followed by records of `[last: u8][len: u32 LE][ciphertext]`. Each record
//! seals up to [`CHUNK_SIZE`] bytes of the (optionally zstd-compressed)
//! stream with ChaCha20-Poly1305. The nonce is the prefix, the record counter
//! and the last flag, and the header is bound as associated data, so records
//! cannot be reordered, dropped or truncated undetected.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use cryptsync_types::{
    CodecProgress, CompressionMode, ContentCodec, Error, ProgressAction, Result,
};
use rand::RngCore;
use std::cell::Cell;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

/// Plaintext bytes sealed per record
pub const CHUNK_SIZE: usize = 64 * 1024;

const MAGIC: &[u8; 8] = b"CSYNARC1";
const FLAG_COMPRESSED: u8 = 0b0000_0001;
const SALT_LEN: usize = 16;
const NONCE_PREFIX_LEN: usize = 7;
const HEADER_LEN: usize = MAGIC.len() + 1 + 4 + 4 + SALT_LEN + NONCE_PREFIX_LEN;
const TAG_LEN: usize = 16;
const ZSTD_LEVEL: i32 = 3;

/// Highest Argon2 memory cost read from a header (1 GiB)
pub const MAX_KDF_MEMORY_KIB: u32 = 1 << 20;
/// Highest Argon2 iteration count read from a header
pub const MAX_KDF_ITERATIONS: u32 = 16;

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Iterations
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
        }
    }
}

/// Compressing, encrypting container codec
#[derive(Debug, Clone, Default)]
pub struct ArchiveCodec {
    kdf: KdfParams,
}

impl ArchiveCodec {
    /// Codec with default key-derivation costs
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec with explicit key-derivation costs
    pub fn with_kdf(kdf: KdfParams) -> Self {
        Self { kdf }
    }

    /// Whether `path` starts with the container magic
    pub fn is_container(path: &Path) -> io::Result<bool> {
        let mut magic = [0u8; MAGIC.len()];
        let read = read_full(&mut File::open(path)?, &mut magic)?;
        Ok(read == magic.len() && &magic == MAGIC)
    }
}

impl KdfParams {
    /// Whether the costs stay within what decryption accepts
    pub const fn is_supported(self) -> bool {
        self.memory_kib <= MAX_KDF_MEMORY_KIB && self.iterations <= MAX_KDF_ITERATIONS
    }
}

struct Header {
    flags: u8,
    kdf: KdfParams,
    salt: [u8; SALT_LEN],
    nonce_prefix: [u8; NONCE_PREFIX_LEN],
}

impl Header {
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN);
        out.extend_from_slice(MAGIC);
        out.push(self.flags);
        out.extend_from_slice(&self.kdf.memory_kib.to_le_bytes());
        out.extend_from_slice(&self.kdf.iterations.to_le_bytes());
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.nonce_prefix);
        out
    }

    fn parse(bytes: &[u8; HEADER_LEN]) -> Option<Self> {
        let (magic, rest) = bytes.split_at(MAGIC.len());
        if magic != MAGIC {
            return None;
        }
        let flags = rest[0];
        let memory_kib = u32::from_le_bytes(rest[1..5].try_into().ok()?);
        let iterations = u32::from_le_bytes(rest[5..9].try_into().ok()?);
        let salt = rest[9..9 + SALT_LEN].try_into().ok()?;
        let nonce_prefix = rest[9 + SALT_LEN..].try_into().ok()?;
        Some(Self {
            flags,
            kdf: KdfParams {
                memory_kib,
                iterations,
            },
            salt,
            nonce_prefix,
        })
    }
}

fn derive_key(password: &str, salt: &[u8], kdf: KdfParams, path: &Path) -> Result<Key> {
    let params = Params::new(kdf.memory_kib, kdf.iterations, 1, Some(32))
        .map_err(|e| Error::crypto(path, format!("invalid key parameters: {}", e)))?;
    let mut key = [0u8; 32];
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| Error::crypto(path, format!("key derivation failed: {}", e)))?;
    Ok(Key::from(key))
}

fn record_nonce(prefix: &[u8; NONCE_PREFIX_LEN], counter: u32, last: bool) -> Nonce {
    let mut nonce = [0u8; 12];
    nonce[..NONCE_PREFIX_LEN].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_LEN..11].copy_from_slice(&counter.to_be_bytes());
    nonce[11] = u8::from(last);
    Nonce::from(nonce)
}

/// Read until `buf` is full or the stream ends
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

struct CountingReader<'a, R> {
    inner: R,
    count: &'a Cell<u64>,
}

impl<R: Read> Read for CountingReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count.set(self.count.get() + n as u64);
        Ok(n)
    }
}

impl ArchiveCodec {
    fn seal_stream<R: Read, W: Write>(
        cipher: &ChaCha20Poly1305,
        header: &Header,
        mut plain: R,
        out: &mut W,
        mut on_record: impl FnMut() -> Result<()>,
    ) -> Result<()> {
        let aad = header.to_bytes();
        let mut current = vec![0u8; CHUNK_SIZE];
        let mut current_len = read_full(&mut plain, &mut current)?;
        let mut next = vec![0u8; CHUNK_SIZE];
        let mut counter: u32 = 0;

        loop {
            let next_len = if current_len == CHUNK_SIZE {
                read_full(&mut plain, &mut next)?
            } else {
                0
            };
            let last = next_len == 0;

            let nonce = record_nonce(&header.nonce_prefix, counter, last);
            let sealed = cipher
                .encrypt(
                    &nonce,
                    Payload {
                        msg: &current[..current_len],
                        aad: &aad,
                    },
                )
                .map_err(|_| Error::other("record encryption failed"))?;
            out.write_all(&[u8::from(last)])?;
            out.write_all(&(sealed.len() as u32).to_le_bytes())?;
            out.write_all(&sealed)?;
            on_record()?;

            if last {
                return Ok(());
            }
            counter = counter
                .checked_add(1)
                .ok_or_else(|| Error::other("container too large"))?;
            std::mem::swap(&mut current, &mut next);
            current_len = next_len;
        }
    }

    fn open_stream<R: Read, W: Write>(
        cipher: &ChaCha20Poly1305,
        header: &Header,
        input: &mut R,
        out: &mut W,
        archive: &Path,
        mut on_record: impl FnMut() -> Result<()>,
    ) -> Result<()> {
        let aad = header.to_bytes();
        let mut counter: u32 = 0;
        let mut sealed = Vec::with_capacity(CHUNK_SIZE + TAG_LEN);

        loop {
            let mut record_head = [0u8; 5];
            if read_full(input, &mut record_head)? != record_head.len() {
                return Err(Error::crypto(archive, "container is truncated"));
            }
            let last = match record_head[0] {
                0 => false,
                1 => true,
                _ => return Err(Error::crypto(archive, "corrupt record header")),
            };
            let len = u32::from_le_bytes([
                record_head[1],
                record_head[2],
                record_head[3],
                record_head[4],
            ]) as usize;
            if len < TAG_LEN || len > CHUNK_SIZE + TAG_LEN {
                return Err(Error::crypto(archive, "corrupt record length"));
            }

            sealed.resize(len, 0);
            if read_full(input, &mut sealed)? != len {
                return Err(Error::crypto(archive, "container is truncated"));
            }
            let nonce = record_nonce(&header.nonce_prefix, counter, last);
            let plain = cipher
                .decrypt(
                    &nonce,
                    Payload {
                        msg: &sealed,
                        aad: &aad,
                    },
                )
                .map_err(|_| Error::crypto(archive, "wrong password or corrupt container"))?;
            out.write_all(&plain)?;
            on_record()?;

            if last {
                let mut trailing = [0u8; 1];
                if read_full(input, &mut trailing)? != 0 {
                    return Err(Error::crypto(archive, "unexpected data after last record"));
                }
                return Ok(());
            }
            counter = counter
                .checked_add(1)
                .ok_or_else(|| Error::crypto(archive, "corrupt record counter"))?;
        }
    }
}

fn check_progress(
    progress: &dyn Fn(&CodecProgress<'_>) -> ProgressAction,
    processed: u64,
    total: u64,
    item: &Path,
) -> Result<()> {
    let snapshot = CodecProgress {
        processed,
        total,
        current_item: item,
    };
    match progress(&snapshot) {
        ProgressAction::Continue => Ok(()),
        ProgressAction::Abort => Err(Error::Cancelled),
    }
}

fn crypto_io(path: &Path) -> impl Fn(io::Error) -> Error + '_ {
    move |e| Error::crypto(path, e.to_string())
}

impl ContentCodec for ArchiveCodec {
    fn name(&self) -> &'static str {
        "archive"
    }

    fn encrypt(
        &self,
        source: &Path,
        archive: &Path,
        password: &str,
        mode: CompressionMode,
        progress: &dyn Fn(&CodecProgress<'_>) -> ProgressAction,
    ) -> Result<()> {
        let input = File::open(source).map_err(crypto_io(source))?;
        let total = input.metadata().map_err(crypto_io(source))?.len();

        let mut header = Header {
            flags: if mode.is_enabled() { FLAG_COMPRESSED } else { 0 },
            kdf: self.kdf,
            salt: [0u8; SALT_LEN],
            nonce_prefix: [0u8; NONCE_PREFIX_LEN],
        };
        rand::thread_rng().fill_bytes(&mut header.salt);
        rand::thread_rng().fill_bytes(&mut header.nonce_prefix);
        let key = derive_key(password, &header.salt, header.kdf, source)?;
        let cipher = ChaCha20Poly1305::new(&key);

        let mut out = BufWriter::new(File::create(archive).map_err(crypto_io(archive))?);
        out.write_all(&header.to_bytes()).map_err(crypto_io(archive))?;

        let read = Cell::new(0u64);
        let counted = CountingReader {
            inner: BufReader::new(input),
            count: &read,
        };
        let on_record = || check_progress(progress, read.get(), total, source);

        let sealed = if mode.is_enabled() {
            let compressed =
                zstd::stream::read::Encoder::new(counted, ZSTD_LEVEL).map_err(crypto_io(source))?;
            Self::seal_stream(&cipher, &header, compressed, &mut out, on_record)
        } else {
            Self::seal_stream(&cipher, &header, counted, &mut out, on_record)
        };
        sealed.map_err(|e| match e {
            Error::Io { message } => Error::crypto(source, message),
            other => other,
        })?;

        out.flush().map_err(crypto_io(archive))?;
        debug!(
            "Sealed {} ({} bytes, compressed: {})",
            source.display(),
            total,
            mode.is_enabled()
        );
        Ok(())
    }

    fn decrypt(
        &self,
        archive: &Path,
        destination: &Path,
        password: &str,
        progress: &dyn Fn(&CodecProgress<'_>) -> ProgressAction,
    ) -> Result<()> {
        let input = File::open(archive).map_err(crypto_io(archive))?;
        let total = input.metadata().map_err(crypto_io(archive))?.len();
        let read = Cell::new(0u64);
        let mut counted = CountingReader {
            inner: BufReader::new(input),
            count: &read,
        };

        let mut head = [0u8; HEADER_LEN];
        if read_full(&mut counted, &mut head).map_err(crypto_io(archive))? != HEADER_LEN {
            return Err(Error::crypto(archive, "not a CryptSync container"));
        }
        let header =
            Header::parse(&head).ok_or_else(|| Error::crypto(archive, "not a CryptSync container"))?;
        if !header.kdf.is_supported() {
            return Err(Error::crypto(archive, "unsupported key parameters"));
        }
        let key = derive_key(password, &header.salt, header.kdf, archive)?;
        let cipher = ChaCha20Poly1305::new(&key);

        let out = BufWriter::new(File::create(destination).map_err(crypto_io(destination))?);
        let on_record = || check_progress(progress, read.get(), total, archive);

        let opened = if header.flags & FLAG_COMPRESSED != 0 {
            let mut decoder = zstd::stream::write::Decoder::new(out).map_err(crypto_io(archive))?;
            Self::open_stream(&cipher, &header, &mut counted, &mut decoder, archive, on_record)
                .and_then(|()| {
                    decoder.flush()?;
                    decoder.into_inner().flush()?;
                    Ok(())
                })
        } else {
            let mut out = out;
            Self::open_stream(&cipher, &header, &mut counted, &mut out, archive, on_record)
                .and_then(|()| out.flush().map_err(Error::from))
        };
        opened.map_err(|e| match e {
            Error::Io { message } => Error::crypto(archive, message),
            other => other,
        })?;

        debug!("Opened {} into {}", archive.display(), destination.display());
        Ok(())
    }

    fn is_foreign(&self, file: &Path) -> bool {
        matches!(Self::is_container(file), Ok(false))
    }
}
