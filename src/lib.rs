//! # cmr-fetch
//!
//! Streaming search and verified bulk download for NASA's Common Metadata
//! Repository (CMR).
//!
//! ## Design Philosophy
//!
//! cmr-fetch is designed to be:
//! - **Streaming** - Search results arrive page by page as a cancelable stream
//! - **Safe on disk** - A destination file is absent, complete and verified, or untouched
//! - **Bounded** - A fixed number of download workers, backpressure everywhere
//! - **Library-first** - No CLI or rendering, purely a Rust crate for embedding
//!
//! ## Quick Start
//!
//! ```no_run
//! use cmr_fetch::{Config, DownloadRequest, Downloader, Outcome, Query, SearchClient};
//! use futures::StreamExt;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default().with_env_overrides(|k| std::env::var(k).ok());
//!     let cancel = CancellationToken::new();
//!
//!     let client = SearchClient::new(&config.search)?;
//!     let query = Query::granules()
//!         .short_names(["VJ102MOD"])
//!         .page_size(100)
//!         .build()?;
//!     let mut records = client.scroll(&query, &cancel)?;
//!     println!("{:?} granules", records.hits().await);
//!
//!     // Project raw records into requests (schema mapping is up to the caller)
//!     let requests = records
//!         .filter_map(|r| async move {
//!             let record = r.ok()?;
//!             let url = record.pointer("/umm/RelatedUrls/0/URL")?.as_str()?.to_string();
//!             let dest = cmr_fetch::utils::destination_for(&url, "/data".as_ref())?;
//!             Some(DownloadRequest::new(url, dest))
//!         })
//!         .boxed();
//!
//!     let mut outcomes = Downloader::new(&config.fetch, &cancel)?.run(requests)?;
//!     while let Some(outcome) = outcomes.recv().await {
//!         if let Outcome::Completed(result) = outcome {
//!             println!("{} -> {:?}", result.url, result.error);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Checksum computation and streaming verification
pub mod checksum;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Download transport and concurrent fetch pool
pub mod fetch;
/// Skip policy wired in front of the fetch pool
pub mod pipeline;
/// Skip/dedup decisions for existing files
pub mod policy;
/// Cursor-paginated search client
pub mod search;
/// Download request and result types
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use checksum::{ChecksumAlgorithm, HashingWriter};
pub use config::{AuthConfig, Config, FetchConfig, SearchConfig};
pub use error::{Error, FetchError, Result, SearchError};
pub use fetch::{AuthMode, CredentialStore, Credentials, FetchPool, Fetcher, HttpFetcher, Netrc};
pub use pipeline::Downloader;
pub use policy::{Decision, DownloadReason, FileState, LocalFiles, SkipPolicy, SkipReason};
pub use search::{
    CollectionHoldings, Facet, ProviderHoldings, Query, QueryBuilder, ScrollStream, SearchClient,
};
pub use types::{DownloadRequest, DownloadResult, Outcome};

use tokio_util::sync::CancellationToken;

/// Cancel `cancel` when the process receives a termination signal.
///
/// - **Unix:** listens for SIGTERM and SIGINT, falling back to Ctrl+C if
///   signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// The returned task also finishes, without doing anything, if the token is
/// cancelled some other way first.
///
/// # Example
///
/// ```no_run
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() {
///     let cancel = CancellationToken::new();
///     cmr_fetch::cancel_on_signal(&cancel);
///     // hand `cancel` to the search client and downloader
/// }
/// ```
pub fn cancel_on_signal(cancel: &CancellationToken) -> tokio::task::JoinHandle<()> {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = wait_for_signal() => {
                tracing::info!("shutdown signal received, cancelling");
                cancel.cancel();
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // registration may fail in restricted environments (containers, tests)
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        std::future::pending::<()>().await;
    }
}
