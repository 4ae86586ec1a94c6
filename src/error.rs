//! Error types for cmr-fetch
//!
//! This module provides the error taxonomy for the library:
//! - [`SearchError`] terminates a single search stream
//! - [`FetchError`] is reported per download request and never aborts siblings
//! - [`Error`] is the crate-wide error returned by constructors and helpers
//!
//! Every variant carries structured fields so callers can branch on kind
//! instead of parsing messages.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for cmr-fetch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for cmr-fetch
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "fetch.concurrency")
        key: Option<String>,
    },

    /// Search stream error
    #[error("search error: {0}")]
    Search(#[from] SearchError),

    /// Download error
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Credential store could not be located or parsed
    #[error("credentials error for {path}: {message}")]
    Credentials {
        /// Path of the credential file
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// Query parameters failed validation
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client construction or request error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Errors that terminate a search result stream
#[derive(Debug, Error)]
pub enum SearchError {
    /// The server answered with a shape this client does not understand
    #[error("protocol error: {message}")]
    Protocol {
        /// What was wrong with the response
        message: String,
    },

    /// The server answered with a non-success status
    #[error("{status} requestid={}: {}", .request_id.as_deref().unwrap_or("<unavailable>"), .messages.join("; "))]
    Remote {
        /// HTTP status code
        status: u16,
        /// Server-side request id, for support correlation
        request_id: Option<String>,
        /// Error messages decoded from the response body
        messages: Vec<String>,
    },

    /// Connection or body transfer failure
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// The page request exceeded the configured timeout
    #[error("search request timed out")]
    Timeout,

    /// The stream was cancelled by the caller
    #[error("search cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for SearchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SearchError::Timeout
        } else {
            SearchError::Transport(e)
        }
    }
}

/// Errors reported for a single download request
#[derive(Debug, Error)]
pub enum FetchError {
    /// Non-200 response from the file server
    #[error("{status} requestid={} url={url}", .request_id.as_deref().unwrap_or("<unavailable>"))]
    FailedDownload {
        /// HTTP status code
        status: u16,
        /// Server-side request id, if provided
        request_id: Option<String>,
        /// Leading bytes of the response body, for diagnostics
        body_excerpt: String,
        /// The URL that failed (after redirects)
        url: String,
    },

    /// A bearer token would have been sent over plain HTTP
    #[error("refusing to send bearer token to non-TLS url {url}")]
    InsecureTokenUse {
        /// The offending URL
        url: String,
    },

    /// Downloaded bytes do not match the expected digest
    #[error("got checksum {actual}, expected {expected}")]
    ChecksumMismatch {
        /// Expected digest (lowercase hex)
        expected: String,
        /// Computed digest (lowercase hex)
        actual: String,
    },

    /// The checksum algorithm is not implemented
    #[error("{algorithm} checksum not supported")]
    UnsupportedAlgorithm {
        /// The algorithm name as given
        algorithm: String,
    },

    /// Request could not be sent or the connection failed
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// Reading the response body failed
    #[error("reading from remote: {0}")]
    Read(#[source] reqwest::Error),

    /// Writing to the sink failed
    #[error("writing to file: {0}")]
    Write(#[source] std::io::Error),

    /// The request exceeded the configured timeout
    #[error("download timed out")]
    Timeout,

    /// The download was cancelled
    #[error("download cancelled")]
    Cancelled,

    /// Filesystem operation on the temp or destination file failed
    #[error("{path}: {source}")]
    Io {
        /// Path being operated on
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// URL (or redirect location) could not be parsed
    #[error("invalid url {url}: {reason}")]
    InvalidUrl {
        /// The URL as given
        url: String,
        /// Parse failure
        reason: String,
    },

    /// Redirect chain exceeded the configured limit
    #[error("too many redirects ({limit}) fetching {url}")]
    TooManyRedirects {
        /// The original URL
        url: String,
        /// Configured limit
        limit: usize,
    },
}

impl FetchError {
    /// Classify a transport-level reqwest error, surfacing timeouts distinctly.
    pub(crate) fn transport(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Transport(e)
        }
    }

    /// Classify a body-read reqwest error, surfacing timeouts distinctly.
    pub(crate) fn read(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Read(e)
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FetchError::Io {
            path: path.into(),
            source,
        }
    }
}

impl Error {
    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Search(e) => e.error_code(),
            Error::Fetch(e) => e.error_code(),
            Error::Credentials { .. } => "credentials_error",
            Error::InvalidQuery(_) => "invalid_query",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
        }
    }

    /// Whether this error was caused by cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Error::Search(SearchError::Cancelled) | Error::Fetch(FetchError::Cancelled)
        )
    }

    /// Whether this error was caused by a request timeout
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Search(SearchError::Timeout) | Error::Fetch(FetchError::Timeout)
        )
    }
}

impl SearchError {
    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            SearchError::Protocol { .. } => "protocol_error",
            SearchError::Remote { .. } => "remote_error",
            SearchError::Transport(_) => "transport_error",
            SearchError::Timeout => "timeout",
            SearchError::Cancelled => "cancelled",
        }
    }
}

impl FetchError {
    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            FetchError::FailedDownload { .. } => "failed_download",
            FetchError::InsecureTokenUse { .. } => "insecure_token_use",
            FetchError::ChecksumMismatch { .. } => "checksum_mismatch",
            FetchError::UnsupportedAlgorithm { .. } => "unsupported_algorithm",
            FetchError::Transport(_) => "transport_error",
            FetchError::Read(_) => "read_error",
            FetchError::Write(_) => "write_error",
            FetchError::Timeout => "timeout",
            FetchError::Cancelled => "cancelled",
            FetchError::Io { .. } => "io_error",
            FetchError::InvalidUrl { .. } => "invalid_url",
            FetchError::TooManyRedirects { .. } => "too_many_redirects",
        }
    }
}
