//! Skip policy in front of the fetch pool
//!
//! [`Downloader`] is the whole download half of the data flow: each incoming
//! [`DownloadRequest`] is checked against the [`SkipPolicy`] (on the blocking
//! pool, since verifying an existing file means hashing it) and, if a download
//! is needed, queued for the [`FetchPool`]. Every request read from the input
//! produces exactly one [`Outcome`].

use crate::config::FetchConfig;
use crate::error::{FetchError, Result};
use crate::fetch::{FetchPool, Fetcher, HttpFetcher};
use crate::policy::{Decision, FileState, LocalFiles, SkipPolicy, SkipReason};
use crate::types::{DownloadRequest, DownloadResult, Outcome};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Policy-filtered download runner
#[derive(Clone)]
pub struct Downloader {
    config: FetchConfig,
    policy: SkipPolicy,
    files: Arc<dyn FileState>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("concurrency", &self.config.concurrency)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Downloader {
    /// Create a downloader; `cancel` stops admission and reaches every worker
    ///
    /// # Errors
    /// Returns [`crate::Error::Config`] if the fetch configuration is invalid.
    pub fn new(config: &FetchConfig, cancel: &CancellationToken) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: config.clone(),
            policy: SkipPolicy::from(config),
            files: Arc::new(LocalFiles),
            cancel: cancel.clone(),
        })
    }

    /// Replace the filesystem access used by the skip policy
    pub fn with_file_state(mut self, files: Arc<dyn FileState>) -> Self {
        self.files = files;
        self
    }

    /// The skip policy in effect
    pub fn policy(&self) -> SkipPolicy {
        self.policy
    }

    /// Download `requests` over HTTP with the configured auth mode
    ///
    /// # Errors
    /// Returns an error if a fetcher cannot be built (e.g. unreadable netrc).
    pub fn run<S>(&self, requests: S) -> Result<mpsc::Receiver<Outcome>>
    where
        S: Stream<Item = DownloadRequest> + Send + Unpin + 'static,
    {
        let config = self.config.clone();
        self.run_with(requests, move || HttpFetcher::new(&config))
    }

    /// Download `requests` using fetchers from `make_fetcher`, one per worker
    pub fn run_with<S, T, F>(
        &self,
        mut requests: S,
        make_fetcher: F,
    ) -> Result<mpsc::Receiver<Outcome>>
    where
        S: Stream<Item = DownloadRequest> + Send + Unpin + 'static,
        T: Fetcher + 'static,
        F: FnMut() -> Result<T>,
    {
        let concurrency = self.config.concurrency;
        let (queue_tx, queue_rx) = async_channel::bounded(concurrency);
        let mut results =
            FetchPool::new(concurrency, &self.cancel)?.spawn(queue_rx, make_fetcher)?;
        let (out_tx, out_rx) = mpsc::channel(concurrency);

        let completed_tx = out_tx.clone();
        tokio::spawn(async move {
            while let Some(result) = results.recv().await {
                if completed_tx.send(Outcome::Completed(result)).await.is_err() {
                    break;
                }
            }
        });

        let policy = self.policy;
        let files = self.files.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut admitted = 0usize;
            let mut skipped = 0usize;
            loop {
                let request = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = requests.next() => match next {
                        Some(request) => request,
                        None => break,
                    },
                };

                let (request, decision) = evaluate(policy, files.clone(), request).await;
                let outcome = match decision {
                    Decision::Skip(reason) => {
                        info!(url = %request.url, path = %request.destination.display(), %reason, "skipping");
                        skipped += 1;
                        Outcome::Skipped { request, reason }
                    }
                    Decision::Download(reason) => {
                        debug!(url = %request.url, %reason, "queueing download");
                        match queue_tx.send(request).await {
                            Ok(()) => {
                                admitted += 1;
                                continue;
                            }
                            // pool stopped accepting work after cancellation
                            Err(async_channel::SendError(request)) => {
                                let mut result = DownloadResult::new(&request);
                                result.error = Some(FetchError::Cancelled);
                                Outcome::Completed(result)
                            }
                        }
                    }
                };
                if out_tx.send(outcome).await.is_err() {
                    break;
                }
            }
            debug!(admitted, skipped, "request intake finished");
        });

        Ok(out_rx)
    }
}

/// Apply the policy off the async threads
async fn evaluate(
    policy: SkipPolicy,
    files: Arc<dyn FileState>,
    request: DownloadRequest,
) -> (DownloadRequest, Decision) {
    let fallback = request.clone();
    tokio::task::spawn_blocking(move || {
        let decision = policy.evaluate(&request, files.as_ref());
        (request, decision)
    })
    .await
    .unwrap_or_else(|e| {
        (
            fallback,
            Decision::Skip(SkipReason::ChecksumError(format!("policy check failed: {}", e))),
        )
    })
}
