//! Core request/result types shared by the policy, pool and pipeline

use crate::checksum::ChecksumAlgorithm;
use crate::error::FetchError;
use crate::policy::SkipReason;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// A single file to download
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Source URL
    pub url: String,
    /// Final path of the downloaded file
    pub destination: PathBuf,
    /// Expected lowercase hex digest, if known
    #[serde(default)]
    pub checksum: Option<String>,
    /// Name of the algorithm `checksum` was computed with (e.g. "SHA-256")
    #[serde(default)]
    pub checksum_algorithm: Option<String>,
}

impl DownloadRequest {
    /// Request without checksum information
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            checksum: None,
            checksum_algorithm: None,
        }
    }

    /// Attach an expected checksum
    pub fn with_checksum(
        mut self,
        algorithm: impl Into<String>,
        checksum: impl Into<String>,
    ) -> Self {
        self.checksum_algorithm = Some(algorithm.into());
        self.checksum = Some(checksum.into());
        self
    }

    /// Expected checksum, ignoring blank values
    pub fn expected_checksum(&self) -> Option<&str> {
        self.checksum
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Algorithm name, ignoring blank values
    pub fn algorithm_name(&self) -> Option<&str> {
        self.checksum_algorithm
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Parsed algorithm, `None` if absent or unsupported
    pub fn algorithm(&self) -> Option<ChecksumAlgorithm> {
        self.algorithm_name().and_then(|name| name.parse().ok())
    }
}

/// Outcome of one request admitted to the fetch pool
#[derive(Debug)]
pub struct DownloadResult {
    /// Source URL
    pub url: String,
    /// Destination path
    pub path: PathBuf,
    /// Digest of the downloaded bytes, when an algorithm was available
    pub checksum: Option<String>,
    /// Bytes received
    pub size: u64,
    /// Wall time spent on the request
    pub duration: Duration,
    /// Failure, if any; `None` means the file is committed at `path`
    pub error: Option<FetchError>,
}

impl DownloadResult {
    pub(crate) fn new(request: &DownloadRequest) -> Self {
        Self {
            url: request.url.clone(),
            path: request.destination.clone(),
            checksum: None,
            size: 0,
            duration: Duration::ZERO,
            error: None,
        }
    }

    /// Whether the file was downloaded and committed
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Transfer rate in megabits per second
    pub fn throughput_mbps(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        (self.size as f64 * 8.0) / secs / (1024.0 * 1024.0)
    }
}

/// What happened to a request that entered the download pipeline
#[derive(Debug)]
pub enum Outcome {
    /// The skip policy decided no download was needed
    Skipped {
        /// The request that was skipped
        request: DownloadRequest,
        /// Why it was skipped
        reason: SkipReason,
    },
    /// The request went through the fetch pool
    Completed(DownloadResult),
}

impl Outcome {
    /// URL of the underlying request
    pub fn url(&self) -> &str {
        match self {
            Outcome::Skipped { request, .. } => &request.url,
            Outcome::Completed(result) => &result.url,
        }
    }

    /// Whether this outcome represents a hard failure
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Completed(result) if !result.is_success())
    }
}
