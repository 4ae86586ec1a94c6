//! File transport and the concurrent fetch pool
//!
//! A [`Fetcher`] performs one GET and streams the body into a caller-supplied
//! sink. The [`FetchPool`] runs a fixed number of workers, each owning one
//! fetcher, and commits every download atomically.

mod auth;
mod http;
mod pool;

pub use auth::{AuthMode, CredentialStore, Credentials, Netrc};
pub use http::HttpFetcher;
pub use pool::FetchPool;

use crate::error::FetchError;
use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

/// Streaming download transport
///
/// Implementations write the response body for `url` into `sink` and return
/// the number of bytes written. They must abort promptly once `cancel` fires,
/// returning [`FetchError::Cancelled`], and must not retry on their own.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Download `url` into `sink`
    async fn fetch(
        &self,
        url: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        cancel: &CancellationToken,
    ) -> Result<u64, FetchError>;
}

#[async_trait]
impl<T: Fetcher + ?Sized> Fetcher for std::sync::Arc<T> {
    async fn fetch(
        &self,
        url: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        cancel: &CancellationToken,
    ) -> Result<u64, FetchError> {
        (**self).fetch(url, sink, cancel).await
    }
}
