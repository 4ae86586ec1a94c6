//! Checksum engine
//!
//! Computes named-algorithm digests either in one pass over a reader
//! ([`compute_checksum`], [`checksum_file`]) or incrementally while bytes are
//! streamed to disk ([`HashingWriter`]).

use crate::error::FetchError;
use sha2::Digest;
use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

/// Number of leading bytes retained for payload sniffing
const PREFIX_LEN: usize = 1000;

/// Read buffer used when hashing files already on disk
const FILE_READ_BUF: usize = 256 * 1024;

/// Supported checksum algorithms
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    /// MD5
    Md5,
    /// SHA-256
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl ChecksumAlgorithm {
    /// Canonical name as used in granule metadata (e.g. "SHA-256")
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "MD5",
            ChecksumAlgorithm::Sha256 => "SHA-256",
            ChecksumAlgorithm::Sha384 => "SHA-384",
            ChecksumAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Whether `name` names a supported algorithm
    pub fn is_supported(name: &str) -> bool {
        name.parse::<Self>().is_ok()
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = FetchError;

    /// Case-insensitive; the hyphen is optional ("sha256" == "SHA-256").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "sha384" => Ok(ChecksumAlgorithm::Sha384),
            "sha512" => Ok(ChecksumAlgorithm::Sha512),
            _ => Err(FetchError::UnsupportedAlgorithm {
                algorithm: s.to_string(),
            }),
        }
    }
}

/// Split an `<alg>:<value>` checksum string into its parts.
///
/// Both parts are lowercased. Returns `None` when there is no separator.
pub fn split_checksum(s: &str) -> Option<(String, String)> {
    let lowered = s.to_lowercase();
    let (alg, value) = lowered.split_once(':')?;
    Some((alg.trim().to_string(), value.trim().to_string()))
}

/// Running digest for one of the supported algorithms
#[derive(Clone)]
pub enum Hasher {
    /// MD5 state
    Md5(md5::Context),
    /// SHA-256 state
    Sha256(sha2::Sha256),
    /// SHA-384 state
    Sha384(sha2::Sha384),
    /// SHA-512 state
    Sha512(sha2::Sha512),
}

impl Hasher {
    /// Fresh digest state for `algorithm`
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Md5 => Hasher::Md5(md5::Context::new()),
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
            ChecksumAlgorithm::Sha384 => Hasher::Sha384(sha2::Sha384::new()),
            ChecksumAlgorithm::Sha512 => Hasher::Sha512(sha2::Sha512::new()),
        }
    }

    /// Feed bytes into the digest
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(ctx) => ctx.consume(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha384(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    /// Finish and return the lowercase hex digest
    pub fn finalize_hex(self) -> String {
        match self {
            Hasher::Md5(ctx) => format!("{:x}", ctx.compute()),
            Hasher::Sha256(h) => format!("{:x}", h.finalize()),
            Hasher::Sha384(h) => format!("{:x}", h.finalize()),
            Hasher::Sha512(h) => format!("{:x}", h.finalize()),
        }
    }
}

impl io::Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Digest everything `reader` yields
pub fn compute_checksum<R: Read>(algorithm: ChecksumAlgorithm, reader: R) -> io::Result<String> {
    let mut hasher = Hasher::new(algorithm);
    let mut reader = io::BufReader::with_capacity(FILE_READ_BUF, reader);
    io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize_hex())
}

/// Digest the file at `path` using the algorithm named `algorithm`
pub fn checksum_file(algorithm: &str, path: &Path) -> Result<String, FetchError> {
    let algorithm: ChecksumAlgorithm = algorithm.parse()?;
    let file = std::fs::File::open(path).map_err(|e| FetchError::io(path, e))?;
    compute_checksum(algorithm, file).map_err(|e| FetchError::io(path, e))
}

/// Async writer adapter that hashes bytes as they pass through.
///
/// Only bytes the inner writer accepted are hashed and counted, so the digest
/// always matches what actually reached the sink.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Option<Hasher>,
    size: u64,
    prefix: Vec<u8>,
}

impl<W> HashingWriter<W> {
    /// Wrap `inner`; with `None` only the byte count is tracked.
    pub fn new(inner: W, algorithm: Option<ChecksumAlgorithm>) -> Self {
        Self {
            inner,
            hasher: algorithm.map(Hasher::new),
            size: 0,
            prefix: Vec::new(),
        }
    }

    /// Bytes written so far
    pub fn bytes_written(&self) -> u64 {
        self.size
    }

    /// Digest of the bytes written so far, if hashing is enabled.
    ///
    /// Only meaningful once writing is complete.
    pub fn checksum(&self) -> Option<String> {
        self.hasher.clone().map(Hasher::finalize_hex)
    }

    /// True if the leading bytes look like an HTML page.
    ///
    /// A data file that starts with `<html` usually means an auth redirect
    /// landed on a login page instead of the file.
    pub fn looks_like_html(&self) -> bool {
        let squashed: String = String::from_utf8_lossy(&self.prefix)
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        squashed.contains("<html")
    }

    /// Mutably borrow the wrapped writer
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Unwrap the inner writer
    pub fn into_inner(self) -> W {
        self.inner
    }

    fn observe(&mut self, data: &[u8]) {
        if self.prefix.len() < PREFIX_LEN {
            let take = (PREFIX_LEN - self.prefix.len()).min(data.len());
            self.prefix.extend_from_slice(&data[..take]);
        }
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(data);
        }
        self.size += data.len() as u64;
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for HashingWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.observe(&buf[..n]);
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
