//! Bounded worker pool with atomic on-disk commit

use super::Fetcher;
use crate::checksum::HashingWriter;
use crate::error::{Error, FetchError, Result};
use crate::types::{DownloadRequest, DownloadResult};
use std::path::Path;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Permissions given to committed files
#[cfg(unix)]
const FILE_MODE: u32 = 0o644;

/// Runs N download workers over a shared request queue
///
/// Every request a worker takes off the queue produces exactly one
/// [`DownloadResult`]. Results arrive in completion order, not submission
/// order. The result channel closes once all workers have exited.
#[derive(Clone, Debug)]
pub struct FetchPool {
    concurrency: usize,
    cancel: CancellationToken,
}

/// Bytes and digest of a committed download
struct Committed {
    size: u64,
    checksum: Option<String>,
}

impl FetchPool {
    /// Create a pool running `concurrency` workers, all observing `cancel`
    ///
    /// # Errors
    /// Returns [`Error::Config`] if `concurrency` is zero.
    pub fn new(concurrency: usize, cancel: &CancellationToken) -> Result<Self> {
        if concurrency == 0 {
            return Err(Error::Config {
                message: "concurrency must be at least 1".to_string(),
                key: Some("fetch.concurrency".to_string()),
            });
        }
        Ok(Self {
            concurrency,
            cancel: cancel.clone(),
        })
    }

    /// Number of workers
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Start the workers, one fetcher each from `make_fetcher`
    ///
    /// Workers pull from `requests` until it is closed and empty. On
    /// cancellation the queue is closed, in-flight transfers abort, and every
    /// request still queued is reported as [`FetchError::Cancelled`].
    ///
    /// # Errors
    /// Returns the first error from `make_fetcher`; no worker is started then.
    pub fn spawn<T, F>(
        &self,
        requests: async_channel::Receiver<DownloadRequest>,
        mut make_fetcher: F,
    ) -> Result<mpsc::Receiver<DownloadResult>>
    where
        T: Fetcher + 'static,
        F: FnMut() -> Result<T>,
    {
        let fetchers = (0..self.concurrency)
            .map(|_| make_fetcher())
            .collect::<Result<Vec<T>>>()?;

        let (tx, rx) = mpsc::channel(self.concurrency);
        for (id, fetcher) in fetchers.into_iter().enumerate() {
            tokio::spawn(run_worker(
                id,
                fetcher,
                requests.clone(),
                tx.clone(),
                self.cancel.clone(),
            ));
        }
        debug!(workers = self.concurrency, "fetch pool started");
        Ok(rx)
    }
}

async fn run_worker<T: Fetcher>(
    id: usize,
    fetcher: T,
    requests: async_channel::Receiver<DownloadRequest>,
    results: mpsc::Sender<DownloadResult>,
    cancel: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = requests.recv() => match next {
                Ok(request) => request,
                Err(_) => {
                    debug!(worker = id, "request queue exhausted");
                    return;
                }
            },
        };

        let result = download(&fetcher, &request, &cancel).await;
        if results.send(result).await.is_err() {
            debug!(worker = id, "result receiver dropped");
            return;
        }
    }

    // cancelled: accept nothing new, account for what was already queued
    requests.close();
    while let Ok(request) = requests.try_recv() {
        let mut result = DownloadResult::new(&request);
        result.error = Some(FetchError::Cancelled);
        if results.send(result).await.is_err() {
            return;
        }
    }
    debug!(worker = id, "worker cancelled");
}

/// Run one request to completion and describe the outcome
async fn download<T: Fetcher + ?Sized>(
    fetcher: &T,
    request: &DownloadRequest,
    cancel: &CancellationToken,
) -> DownloadResult {
    let started = Instant::now();
    let mut result = DownloadResult::new(request);

    match fetch_and_commit(fetcher, request, cancel).await {
        Ok(committed) => {
            result.size = committed.size;
            result.checksum = committed.checksum;
        }
        Err(e) => result.error = Some(e),
    }
    result.duration = started.elapsed();

    match &result.error {
        None => info!(
            url = %result.url,
            path = %result.path.display(),
            bytes = result.size,
            elapsed_ms = result.duration.as_millis() as u64,
            mbps = %format!("{:.2}", result.throughput_mbps()),
            "download complete"
        ),
        Some(FetchError::Cancelled) => debug!(url = %result.url, "download cancelled"),
        Some(e) => warn!(url = %result.url, error = %e, "download failed"),
    }
    result
}

/// Write to a temp file beside the destination, verify, then rename into place.
///
/// The temp file is removed on every error path when its `TempPath` drops.
async fn fetch_and_commit<T: Fetcher + ?Sized>(
    fetcher: &T,
    request: &DownloadRequest,
    cancel: &CancellationToken,
) -> std::result::Result<Committed, FetchError> {
    let dest = request.destination.as_path();
    let file_name = dest.file_name().ok_or_else(|| {
        FetchError::io(
            dest,
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "destination has no file name",
            ),
        )
    })?;
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let temp = tempfile::Builder::new()
        .prefix(&format!(".{}.", file_name.to_string_lossy()))
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(|e| FetchError::io(dir, e))?;
    let (file, temp_path) = temp.into_parts();

    let mut sink = HashingWriter::new(tokio::fs::File::from_std(file), request.algorithm());
    let size = fetcher.fetch(&request.url, &mut sink, cancel).await?;
    sink.flush().await.map_err(FetchError::Write)?;
    sink.get_mut()
        .sync_all()
        .await
        .map_err(|e| FetchError::io(&*temp_path, e))?;

    let checksum = sink.checksum();
    let html = sink.looks_like_html();
    drop(sink);

    match (request.expected_checksum(), checksum.as_deref()) {
        (Some(expected), Some(actual)) if !actual.eq_ignore_ascii_case(expected) => {
            if html {
                warn!(url = %request.url, "payload looks like an HTML page, check credentials");
            }
            return Err(FetchError::ChecksumMismatch {
                expected: expected.to_lowercase(),
                actual: actual.to_string(),
            });
        }
        (Some(_), Some(_)) => {}
        _ => {
            if html {
                warn!(url = %request.url, "unverified payload looks like an HTML page");
            }
        }
    }

    temp_path
        .persist(dest)
        .map_err(|e| FetchError::io(dest, e.error))?;
    normalize_permissions(dest).await?;

    Ok(Committed { size, checksum })
}

#[cfg(unix)]
async fn normalize_permissions(path: &Path) -> std::result::Result<(), FetchError> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(FILE_MODE))
        .await
        .map_err(|e| FetchError::io(path, e))
}

#[cfg(not(unix))]
async fn normalize_permissions(_path: &Path) -> std::result::Result<(), FetchError> {
    Ok(())
}
