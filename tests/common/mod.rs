//! Common test utilities for cmr-fetch integration tests

#![allow(dead_code)]

use cmr_fetch::{Config, DownloadRequest, Outcome, utils};
use serde_json::{Value, json};
use std::path::Path;
use tokio::sync::mpsc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Search endpoint path under the mock server
pub const GRANULES_PATH: &str = "/search/granules.umm_json";

/// "hello" digests
pub const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";
pub const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

/// Configuration pointing the search client at `server`
pub fn config_for(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.search.base_url = format!("{}/search", server.uri());
    config.search.page_size = 2;
    config.fetch.concurrency = 2;
    config
}

/// Minimal UMM-G style granule record with one data link and its checksum
pub fn granule(name: &str, url: &str, algorithm: &str, checksum: &str) -> Value {
    json!({
        "meta": { "concept-id": format!("G-{name}") },
        "umm": {
            "GranuleUR": name,
            "RelatedUrls": [{ "URL": url, "Type": "GET DATA" }],
            "DataGranule": {
                "ArchiveAndDistributionInformation": [{
                    "Name": name,
                    "Checksum": { "Value": checksum, "Algorithm": algorithm }
                }]
            }
        }
    })
}

/// One search results page
pub fn search_page(items: Vec<Value>, hits: usize, cursor: Option<&str>) -> ResponseTemplate {
    let mut response = ResponseTemplate::new(200)
        .insert_header("cmr-hits", hits.to_string().as_str())
        .set_body_json(json!({ "hits": hits, "items": items }));
    if let Some(cursor) = cursor {
        response = response.insert_header("cmr-search-after", cursor);
    }
    response
}

/// Mount a two-page search: `first` without a cursor header, `second` after `cursor`
pub async fn mount_two_pages(server: &MockServer, first: Vec<Value>, second: Vec<Value>) {
    let hits = first.len() + second.len();
    Mock::given(method("GET"))
        .and(path(GRANULES_PATH))
        .and(header("cmr-search-after", "page-2"))
        .respond_with(search_page(second, hits, None))
        .with_priority(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(GRANULES_PATH))
        .respond_with(search_page(first, hits, Some("page-2")))
        .mount(server)
        .await;
}

/// Project a granule record into a download request under `dir`
pub fn to_request(record: &Value, dir: &Path) -> Option<DownloadRequest> {
    let url = record.pointer("/umm/RelatedUrls/0/URL")?.as_str()?;
    let destination = utils::destination_for(url, dir)?;
    let request = DownloadRequest::new(url, destination);
    match record.pointer("/umm/DataGranule/ArchiveAndDistributionInformation/0/Checksum") {
        Some(checksum) => Some(request.with_checksum(
            checksum.get("Algorithm")?.as_str()?,
            checksum.get("Value")?.as_str()?,
        )),
        None => Some(request),
    }
}

/// Drain every outcome from a downloader
pub async fn collect_outcomes(mut rx: mpsc::Receiver<Outcome>) -> Vec<Outcome> {
    let mut outcomes = Vec::new();
    while let Some(outcome) = rx.recv().await {
        outcomes.push(outcome);
    }
    outcomes
}
