//! HTTP transport

use super::Fetcher;
use super::auth::AuthMode;
use crate::config::FetchConfig;
use crate::error::{FetchError, Result};
use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::{Response, StatusCode, redirect};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// Response header carrying the file server's request id
pub const HEADER_REQUEST_ID: &str = "request-id";

/// Bytes of an error response kept for diagnostics
const BODY_EXCERPT_LEN: usize = 1024;

const USER_AGENT: &str = concat!("cmr-fetch/", env!("CARGO_PKG_VERSION"));

/// [`Fetcher`] backed by `reqwest`
///
/// In netrc mode each fetcher keeps its own cookie jar, so a worker that
/// authenticated once reuses the session cookie for later downloads.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    auth: AuthMode,
    max_redirects: usize,
    buffer_size: usize,
}

impl HttpFetcher {
    /// Build a fetcher, resolving credentials from the configured auth mode
    ///
    /// # Errors
    /// Returns an error if the netrc file cannot be loaded or the HTTP client
    /// cannot be built.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let auth = AuthMode::from_config(&config.auth, |k| std::env::var(k).ok())?;
        Self::with_auth(config, auth)
    }

    /// Build a fetcher with an already-resolved auth mode
    pub fn with_auth(config: &FetchConfig, auth: AuthMode) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT);
        builder = match &auth {
            // redirects are followed by hand to attach credentials per host
            AuthMode::Netrc(_) => builder.cookie_store(true).redirect(redirect::Policy::none()),
            _ => builder.redirect(redirect::Policy::limited(config.max_redirects)),
        };

        Ok(Self {
            client: builder.build()?,
            auth,
            max_redirects: config.max_redirects,
            buffer_size: config.read_buffer_size.max(1),
        })
    }

    async fn send(&self, url: &str) -> std::result::Result<Response, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        match &self.auth {
            AuthMode::None => self
                .client
                .get(parsed)
                .send()
                .await
                .map_err(FetchError::transport),
            AuthMode::Bearer(token) => {
                if parsed.scheme() != "https" {
                    return Err(FetchError::InsecureTokenUse {
                        url: url.to_string(),
                    });
                }
                self.client
                    .get(parsed)
                    .bearer_auth(token)
                    .send()
                    .await
                    .map_err(FetchError::transport)
            }
            AuthMode::Netrc(store) => {
                let mut current = parsed;
                let mut hops = 0;
                loop {
                    let mut request = self.client.get(current.clone());
                    if hops > 0
                        && let Some(creds) = current.host_str().and_then(|h| store.basic_auth(h))
                    {
                        request = request.basic_auth(creds.login, Some(creds.password));
                    }
                    let response = request.send().await.map_err(FetchError::transport)?;
                    if !response.status().is_redirection() {
                        return Ok(response);
                    }
                    let Some(location) = response
                        .headers()
                        .get(LOCATION)
                        .and_then(|v| v.to_str().ok())
                    else {
                        return Ok(response);
                    };
                    if hops >= self.max_redirects {
                        return Err(FetchError::TooManyRedirects {
                            url: url.to_string(),
                            limit: self.max_redirects,
                        });
                    }
                    let next = current.join(location).map_err(|e| FetchError::InvalidUrl {
                        url: location.to_string(),
                        reason: e.to_string(),
                    })?;
                    debug!(from = %current, to = %next, "following redirect");
                    current = next;
                    hops += 1;
                }
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        cancel: &CancellationToken,
    ) -> std::result::Result<u64, FetchError> {
        let mut response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            r = self.send(url) => r?,
        };

        if response.status() != StatusCode::OK {
            return Err(failed_download(response).await);
        }

        let mut writer = BufWriter::with_capacity(self.buffer_size, sink);
        let mut size = 0u64;
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                c = response.chunk() => c.map_err(FetchError::read)?,
            };
            let Some(chunk) = chunk else { break };
            writer.write_all(&chunk).await.map_err(FetchError::Write)?;
            size += chunk.len() as u64;
        }
        writer.flush().await.map_err(FetchError::Write)?;

        debug!(url = %url, bytes = size, "body received");
        Ok(size)
    }
}

/// Build a failure from a non-200 response, reading a bounded excerpt of the body
async fn failed_download(mut response: Response) -> FetchError {
    let status = response.status().as_u16();
    let url = response.url().to_string();
    let request_id = response
        .headers()
        .get(HEADER_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let mut excerpt = Vec::new();
    while excerpt.len() < BODY_EXCERPT_LEN {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(BODY_EXCERPT_LEN - excerpt.len());
                excerpt.extend_from_slice(&chunk[..take]);
            }
            _ => break,
        }
    }

    FetchError::FailedDownload {
        status,
        request_id,
        body_excerpt: String::from_utf8_lossy(&excerpt).trim().to_string(),
        url,
    }
}
