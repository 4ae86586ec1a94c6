//! Skip/dedup policy
//!
//! Decides, before a request reaches the fetch pool, whether the download is
//! needed. The decision is a pure function of the flags, an existence check
//! and (optionally) a checksum of the existing file, all of which go through
//! [`FileState`] so the table can be tested without touching the network or
//! even the disk.
//!
//! Rules, first match wins:
//!
//! | clobber | exists | compare requested | algorithm supported | checksum | decision |
//! |---------|--------|-------------------|---------------------|----------|----------|
//! | true    |        |                   |                     |          | download |
//! | false   | false  |                   |                     |          | download |
//! | false   | true   | false             |                     |          | skip (exists by name) |
//! | false   | true   | true              | false               |          | download (cannot verify) |
//! | false   | true   | true              | true                | error    | skip (annotated) |
//! | false   | true   | true              | true                | mismatch | download |
//! | false   | true   | true              | true                | match    | skip (verified) |
//!
//! A comparison is requested when checksum verification is enabled and the
//! request carries both an expected value and an algorithm name.

use crate::checksum::{self, ChecksumAlgorithm};
use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::types::DownloadRequest;
use std::fmt;
use std::path::Path;

/// Filesystem access needed by the policy
pub trait FileState: Send + Sync {
    /// Whether something exists at `path`
    fn exists(&self, path: &Path) -> bool;

    /// Digest of the file at `path`
    fn checksum(&self, algorithm: ChecksumAlgorithm, path: &Path) -> Result<String, FetchError>;
}

/// [`FileState`] backed by the local filesystem
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalFiles;

impl FileState for LocalFiles {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn checksum(&self, algorithm: ChecksumAlgorithm, path: &Path) -> Result<String, FetchError> {
        checksum::checksum_file(algorithm.as_str(), path)
    }
}

/// Why a request will be downloaded
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadReason {
    /// Clobbering was requested
    Clobber,
    /// Nothing exists at the destination
    Missing,
    /// A file exists but its checksum algorithm cannot be verified
    UnsupportedAlgorithm {
        /// The algorithm name from the request
        algorithm: String,
    },
    /// A file exists but its checksum differs (stale or corrupt copy)
    ChecksumMismatch {
        /// Expected digest
        expected: String,
        /// Digest of the existing file
        actual: String,
    },
}

/// Why a request was skipped
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The destination exists and no checksum comparison was requested
    ExistsByName,
    /// The destination exists and its checksum matches
    ChecksumMatch,
    /// The destination exists but computing its checksum failed
    ChecksumError(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ExistsByName => f.write_str("exists"),
            SkipReason::ChecksumMatch => f.write_str("exists, checksum verified"),
            SkipReason::ChecksumError(e) => write!(f, "exists, checksum failed: {}", e),
        }
    }
}

impl fmt::Display for DownloadReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadReason::Clobber => f.write_str("clobber"),
            DownloadReason::Missing => f.write_str("missing"),
            DownloadReason::UnsupportedAlgorithm { algorithm } => {
                write!(f, "name exists, {} unsupported", algorithm)
            }
            DownloadReason::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: got {}, expected {}", actual, expected)
            }
        }
    }
}

/// Policy decision for one request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Hand the request to the fetch pool
    Download(DownloadReason),
    /// Do not download
    Skip(SkipReason),
}

impl Decision {
    /// Whether the request should be downloaded
    pub fn is_download(&self) -> bool {
        matches!(self, Decision::Download(_))
    }
}

/// Flags driving the skip/dedup decision
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SkipPolicy {
    /// Always download, overwriting existing files
    pub clobber: bool,
    /// Compare checksums of existing files when the request has one
    pub verify_checksums: bool,
}

impl Default for SkipPolicy {
    fn default() -> Self {
        Self {
            clobber: false,
            verify_checksums: true,
        }
    }
}

impl From<&FetchConfig> for SkipPolicy {
    fn from(config: &FetchConfig) -> Self {
        Self {
            clobber: config.clobber,
            verify_checksums: config.verify_checksums,
        }
    }
}

impl SkipPolicy {
    /// Decide whether `request` needs downloading
    pub fn evaluate<P: FileState + ?Sized>(&self, request: &DownloadRequest, files: &P) -> Decision {
        if self.clobber {
            return Decision::Download(DownloadReason::Clobber);
        }
        let dest = request.destination.as_path();
        if !files.exists(dest) {
            return Decision::Download(DownloadReason::Missing);
        }

        let (expected, algorithm_name) = match (request.expected_checksum(), request.algorithm_name())
        {
            (Some(expected), Some(alg)) if self.verify_checksums => (expected, alg),
            _ => return Decision::Skip(SkipReason::ExistsByName),
        };

        let algorithm: ChecksumAlgorithm = match algorithm_name.parse() {
            Ok(alg) => alg,
            Err(_) => {
                return Decision::Download(DownloadReason::UnsupportedAlgorithm {
                    algorithm: algorithm_name.to_string(),
                });
            }
        };

        match files.checksum(algorithm, dest) {
            Err(e) => Decision::Skip(SkipReason::ChecksumError(e.to_string())),
            Ok(actual) if actual.eq_ignore_ascii_case(expected) => {
                Decision::Skip(SkipReason::ChecksumMatch)
            }
            Ok(actual) => Decision::Download(DownloadReason::ChecksumMismatch {
                expected: expected.to_string(),
                actual,
            }),
        }
    }
}
