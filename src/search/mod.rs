//! Cursor-paginated search client
//!
//! [`SearchClient::scroll`] turns a [`Query`] into a [`ScrollStream`]: a
//! background task requests one page at a time, forwarding the cursor from
//! each response to the next request, and pushes records through a bounded
//! channel so paging pauses while the consumer is busy.

mod holdings;
mod query;
mod stream;

pub use holdings::{CollectionHoldings, HOLDINGS_ENDPOINT, ProviderHoldings, summarize};
pub use query::{
    AUTOCOMPLETE_ENDPOINT, COLLECTIONS_ENDPOINT, DEFAULT_GRANULE_SORT, GRANULES_ENDPOINT,
    PAGE_SIZE_PARAM, Query, QueryBuilder,
};
pub use stream::ScrollStream;

use crate::config::SearchConfig;
use crate::error::{Error, Result, SearchError};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

/// Response header carrying the total number of hits
pub const HEADER_HITS: &str = "cmr-hits";

/// Request/response header carrying the pagination cursor
pub const HEADER_SEARCH_AFTER: &str = "cmr-search-after";

/// Response header carrying the server-side request id
pub const HEADER_REQUEST_ID: &str = "cmr-request-id";

/// Longest body excerpt kept when an error response is not structured
const ERROR_EXCERPT_LEN: usize = 200;

/// Client for the paginated search API
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone, Debug)]
pub struct SearchClient {
    http: reqwest::Client,
    base_url: Url,
    page_size: usize,
    buffer: usize,
}

/// One keyword facet suggestion from the autocomplete endpoint
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Facet {
    /// Relevance score
    #[serde(default)]
    pub score: f64,
    /// Facet type, e.g. `platform`
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Hierarchical field path, when the facet has one
    #[serde(default)]
    pub fields: String,
    /// Suggested value
    #[serde(default)]
    pub value: String,
}

/// One decoded page
struct Page {
    hits: u64,
    items: Vec<Value>,
    cursor: Option<String>,
}

impl SearchClient {
    /// Create a client from validated configuration
    ///
    /// # Errors
    /// Returns [`Error::Config`] for an invalid base URL or page size, and
    /// [`Error::Network`] if the HTTP client cannot be built.
    pub fn new(config: &SearchConfig) -> Result<Self> {
        config.validate()?;
        let base_url = Url::parse(&config.base_url).map_err(|e| Error::Config {
            message: format!("invalid search url {}: {}", config.base_url, e),
            key: Some("search.base_url".to_string()),
        })?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            http,
            base_url,
            page_size: config.page_size,
            buffer: config.buffer,
        })
    }

    /// Base URL every query is resolved against
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Default records per page
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Start scrolling through every record matching `query`
    ///
    /// Paging happens on a spawned task, so this must be called from within a
    /// Tokio runtime. The task stops when results are exhausted, on the first
    /// error, when `cancel` (or the stream's own token) fires, or when the
    /// stream is dropped.
    ///
    /// # Errors
    /// Returns an error only if the request URL cannot be built.
    pub fn scroll(&self, query: &Query, cancel: &CancellationToken) -> Result<ScrollStream<Value>> {
        let url = query.url(&self.base_url, self.page_size)?;
        Ok(self.scroll_url(url, cancel))
    }

    /// Keyword facets matching `text`, optionally limited to facet `types`
    ///
    /// # Errors
    /// Returns an error only if the request URL cannot be built.
    pub fn facets<I, S>(
        &self,
        text: &str,
        types: I,
        cancel: &CancellationToken,
    ) -> Result<ScrollStream<Facet>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let query = Query::facets(text).facet_types(types).build()?;
        Ok(self.scroll(&query, cancel)?.deserialize_records())
    }

    /// Collection and granule counts per provider
    ///
    /// A single request, not paginated.
    ///
    /// # Errors
    /// Returns [`SearchError::Remote`] for an error status,
    /// [`SearchError::Protocol`] for an unexpected body, and
    /// [`SearchError::Cancelled`] if `cancel` fires first.
    pub async fn provider_holdings(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ProviderHoldings>> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config {
                message: format!("search url {} cannot be a base", self.base_url),
                key: Some("search.base_url".to_string()),
            })?
            .pop_if_empty()
            .push(HOLDINGS_ENDPOINT);
        let rows = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SearchError::Cancelled.into()),
            rows = fetch_holdings(&self.http, url) => rows?,
        };
        let providers = summarize(rows);
        debug!(providers = providers.len(), "provider holdings received");
        Ok(providers)
    }

    /// Scroll a fully-formed search URL (page size included)
    pub fn scroll_url(&self, url: Url, cancel: &CancellationToken) -> ScrollStream<Value> {
        let cancel = cancel.child_token();
        let (tx, rx) = mpsc::channel(self.buffer.max(1));
        let (hits_tx, hits_rx) = oneshot::channel();

        debug!(url = %url, "starting scroll");
        tokio::spawn(run_scroll(
            self.http.clone(),
            url,
            tx,
            hits_tx,
            cancel.clone(),
        ));

        ScrollStream::new(hits_rx, rx, cancel)
    }
}

/// Paging loop; every exit path either finishes cleanly or sends exactly one error
async fn run_scroll(
    http: reqwest::Client,
    url: Url,
    tx: mpsc::Sender<std::result::Result<Value, SearchError>>,
    hits_tx: oneshot::Sender<u64>,
    cancel: CancellationToken,
) {
    let mut hits_tx = Some(hits_tx);
    let mut cursor: Option<String> = None;
    let mut page_num = 0usize;
    let mut emitted = 0u64;

    loop {
        page_num += 1;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SearchError::Cancelled),
            page = fetch_page(&http, &url, cursor.as_deref()) => page,
        };

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                debug!(url = %url, page = page_num, error = %e, "scroll terminated");
                let _ = tx.send(Err(e)).await;
                return;
            }
        };

        if let Some(hits_tx) = hits_tx.take() {
            let _ = hits_tx.send(page.hits);
        }
        debug!(
            page = page_num,
            hits = page.hits,
            items = page.items.len(),
            "received page"
        );

        let count = page.items.len();
        for item in page.items {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = tx.send(Err(SearchError::Cancelled)).await;
                    return;
                }
                sent = tx.send(Ok(item)) => {
                    if sent.is_err() {
                        // consumer went away
                        return;
                    }
                }
            }
            emitted += 1;
        }

        match page.cursor {
            Some(next) if count > 0 => cursor = Some(next),
            _ => {
                info!(url = %url, pages = page_num, records = emitted, "scroll complete");
                return;
            }
        }
    }
}

async fn fetch_page(
    http: &reqwest::Client,
    url: &Url,
    cursor: Option<&str>,
) -> std::result::Result<Page, SearchError> {
    let mut request = http.get(url.clone());
    if let Some(cursor) = cursor {
        request = request.header(HEADER_SEARCH_AFTER, cursor);
    }
    let response = request.send().await?;

    let status = response.status();
    let headers = response.headers().clone();
    if !status.is_success() {
        let body = response.bytes().await.unwrap_or_default();
        return Err(remote_error(
            status.as_u16(),
            header_value(&headers, HEADER_REQUEST_ID),
            &body,
        ));
    }

    let hits = parse_hits(&headers)?;
    let cursor = header_value(&headers, HEADER_SEARCH_AFTER);
    let body = response.bytes().await?;
    let doc: Value = serde_json::from_slice(&body).map_err(|e| SearchError::Protocol {
        message: format!("decoding response body: {}", e),
    })?;
    if !doc.is_object() {
        return Err(SearchError::Protocol {
            message: "response body is not a JSON object".to_string(),
        });
    }

    Ok(Page {
        hits,
        items: extract_items(doc),
        cursor,
    })
}

async fn fetch_holdings(
    http: &reqwest::Client,
    url: Url,
) -> std::result::Result<Vec<CollectionHoldings>, SearchError> {
    let response = http.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        let request_id = header_value(response.headers(), HEADER_REQUEST_ID);
        let body = response.bytes().await.unwrap_or_default();
        return Err(remote_error(status.as_u16(), request_id, &body));
    }
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| SearchError::Protocol {
        message: format!("decoding provider holdings: {}", e),
    })
}

/// Non-empty header value as an owned string
fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_hits(headers: &HeaderMap) -> std::result::Result<u64, SearchError> {
    let raw = header_value(headers, HEADER_HITS).ok_or_else(|| SearchError::Protocol {
        message: format!("missing {} header", HEADER_HITS),
    })?;
    raw.parse().map_err(|_| SearchError::Protocol {
        message: format!("{} header is not a number: {:?}", HEADER_HITS, raw),
    })
}

/// Records from `items`, falling back to `feed.entry`
fn extract_items(mut doc: Value) -> Vec<Value> {
    if let Some(Value::Array(items)) = doc.get_mut("items").map(Value::take)
        && !items.is_empty()
    {
        return items;
    }
    match doc.pointer_mut("/feed/entry").map(Value::take) {
        Some(Value::Array(entries)) => entries,
        _ => Vec::new(),
    }
}

/// Best-effort decode of `{"errors": [...]}`
fn remote_error(status: u16, request_id: Option<String>, body: &[u8]) -> SearchError {
    let messages = match serde_json::from_slice::<Value>(body) {
        Ok(doc) => doc
            .get("errors")
            .and_then(Value::as_array)
            .map(|errs| {
                errs.iter()
                    .map(|e| match e {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
        Err(e) => {
            debug!(error = %e, "error body is not JSON");
            let text = String::from_utf8_lossy(body);
            let text = text.trim();
            if text.is_empty() {
                Vec::new()
            } else {
                vec![text.chars().take(ERROR_EXCERPT_LEN).collect()]
            }
        }
    };
    SearchError::Remote {
        status,
        request_id,
        messages,
    }
}

#[cfg(test)]
mod tests;
