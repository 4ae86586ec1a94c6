#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use futures::StreamExt;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> SearchClient {
    let config = SearchConfig {
        base_url: format!("{}/search", server.uri()),
        ..Default::default()
    };
    SearchClient::new(&config).unwrap()
}

fn page(items: Value, hits: &str, cursor: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header(HEADER_HITS, hits)
        .insert_header(HEADER_SEARCH_AFTER, cursor)
        .set_body_json(json!({ "items": items }))
}

async fn drain(stream: ScrollStream<Value>) -> Vec<std::result::Result<Value, SearchError>> {
    stream.collect().await
}

#[tokio::test]
async fn test_scroll_concatenates_pages_in_order() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search/granules.umm_json"))
        .and(query_param("page_size", "2"))
        .and(header(HEADER_SEARCH_AFTER, "X2"))
        .respond_with(page(json!(["c"]), "3", ""))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/granules.umm_json"))
        .and(query_param("page_size", "2"))
        .respond_with(page(json!(["a", "b"]), "3", "X2"))
        .expect(1)
        .mount(&server)
        .await;

    let query = Query::granules().page_size(2).build().unwrap();
    let mut stream = client_for(&server)
        .scroll(&query, &CancellationToken::new())
        .unwrap();

    assert_eq!(stream.hits().await, Some(3));
    let items: Vec<Value> = drain(stream)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(items, vec![json!("a"), json!("b"), json!("c")]);
}

#[tokio::test]
async fn test_hits_are_read_once_across_pages() {
    let server = MockServer::start().await;

    // later pages report a different count; only the first is delivered
    Mock::given(method("GET"))
        .and(header(HEADER_SEARCH_AFTER, "next"))
        .respond_with(page(json!([3]), "999", ""))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(page(json!([1, 2]), "3", "next"))
        .mount(&server)
        .await;

    let query = Query::collections().build().unwrap();
    let mut stream = client_for(&server)
        .scroll(&query, &CancellationToken::new())
        .unwrap();
    assert_eq!(stream.hits().await, Some(3));
    while let Some(item) = stream.next().await {
        item.unwrap();
    }
    assert_eq!(stream.hits().await, Some(3));
}

#[tokio::test]
async fn test_feed_entry_shape_is_recognized() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search/collections.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(HEADER_HITS, "2")
                .set_body_json(json!({
                    "feed": { "entry": [{ "id": "C1-PROV" }, { "id": "C2-PROV" }] }
                })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let query = Query::builder("collections.json").build().unwrap();
    let stream = client_for(&server)
        .scroll(&query, &CancellationToken::new())
        .unwrap();
    let ids: Vec<String> = drain(stream)
        .await
        .into_iter()
        .map(|r| r.unwrap()["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["C1-PROV", "C2-PROV"]);
}

#[tokio::test]
async fn test_remote_error_after_first_page() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(header(HEADER_SEARCH_AFTER, "X2"))
        .respond_with(
            ResponseTemplate::new(400)
                .insert_header(HEADER_REQUEST_ID, "req-42")
                .set_body_json(json!({ "errors": ["Paging too deep", "try again"] })),
        )
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(page(json!(["a", "b"]), "10", "X2"))
        .expect(1)
        .mount(&server)
        .await;

    let query = Query::granules().build().unwrap();
    let stream = client_for(&server)
        .scroll(&query, &CancellationToken::new())
        .unwrap();
    let items = drain(stream).await;

    assert_eq!(items.len(), 3);
    assert_eq!(items[0].as_ref().unwrap(), &json!("a"));
    assert_eq!(items[1].as_ref().unwrap(), &json!("b"));
    match &items[2] {
        Err(SearchError::Remote {
            status,
            request_id,
            messages,
        }) => {
            assert_eq!(*status, 400);
            assert_eq!(request_id.as_deref(), Some("req-42"));
            assert_eq!(messages, &vec!["Paging too deep".to_string(), "try again".to_string()]);
        }
        other => panic!("expected remote error, got {other:?}"),
    }

    // nothing requested after the failing page
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_unstructured_error_body_becomes_message() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("  upstream unavailable \n"))
        .mount(&server)
        .await;

    let query = Query::granules().build().unwrap();
    let mut stream = client_for(&server)
        .scroll(&query, &CancellationToken::new())
        .unwrap();

    assert_eq!(stream.hits().await, None);
    match stream.next().await {
        Some(Err(SearchError::Remote {
            status, messages, ..
        })) => {
            assert_eq!(status, 503);
            assert_eq!(messages, vec!["upstream unavailable".to_string()]);
        }
        other => panic!("expected remote error, got {other:?}"),
    }
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_missing_hits_header_is_protocol_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": ["a"] })))
        .expect(1)
        .mount(&server)
        .await;

    let query = Query::granules().build().unwrap();
    let mut stream = client_for(&server)
        .scroll(&query, &CancellationToken::new())
        .unwrap();
    assert_eq!(stream.hits().await, None);
    let items = drain(stream).await;
    assert_eq!(items.len(), 1);
    assert!(matches!(items[0], Err(SearchError::Protocol { .. })));
}

#[tokio::test]
async fn test_non_numeric_hits_header_is_protocol_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(page(json!(["a"]), "lots", ""))
        .mount(&server)
        .await;

    let query = Query::granules().build().unwrap();
    let stream = client_for(&server)
        .scroll(&query, &CancellationToken::new())
        .unwrap();
    match drain(stream).await.as_slice() {
        [Err(SearchError::Protocol { message })] => assert!(message.contains("lots"), "{message}"),
        other => panic!("expected a single protocol error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_body_is_protocol_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(HEADER_HITS, "1")
                .set_body_string("<html>not json</html>"),
        )
        .mount(&server)
        .await;

    let query = Query::granules().build().unwrap();
    let mut stream = client_for(&server)
        .scroll(&query, &CancellationToken::new())
        .unwrap();
    assert!(matches!(
        stream.next().await,
        Some(Err(SearchError::Protocol { .. }))
    ));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_empty_items_end_the_stream_despite_cursor() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(page(json!([]), "0", "still-a-cursor"))
        .expect(1)
        .mount(&server)
        .await;

    let query = Query::granules().build().unwrap();
    let mut stream = client_for(&server)
        .scroll(&query, &CancellationToken::new())
        .unwrap();
    assert_eq!(stream.hits().await, Some(0));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_cancel_mid_stream_stops_paging() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(header(HEADER_SEARCH_AFTER, "X2"))
        .respond_with(page(json!(["c"]), "3", "X3").set_delay(Duration::from_secs(10)))
        .with_priority(1)
        .expect(..=1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(page(json!(["a", "b"]), "3", "X2"))
        .expect(1)
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let query = Query::granules().build().unwrap();
    let mut stream = client_for(&server).scroll(&query, &cancel).unwrap();

    assert_eq!(stream.next().await.unwrap().unwrap(), json!("a"));
    assert_eq!(stream.next().await.unwrap().unwrap(), json!("b"));
    cancel.cancel();

    let next = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("cancellation should be prompt");
    assert!(matches!(next, Some(Err(SearchError::Cancelled))));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_page_timeout_is_distinct() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(page(json!(["a"]), "1", "").set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let config = SearchConfig {
        base_url: format!("{}/search", server.uri()),
        timeout: Duration::from_millis(200),
        ..Default::default()
    };
    let client = SearchClient::new(&config).unwrap();
    let query = Query::granules().build().unwrap();
    let mut stream = client.scroll(&query, &CancellationToken::new()).unwrap();
    assert!(matches!(stream.next().await, Some(Err(SearchError::Timeout))));
}

#[tokio::test]
async fn test_typed_records() {
    #[derive(Debug, serde::Deserialize)]
    struct Granule {
        meta: Meta,
    }
    #[derive(Debug, serde::Deserialize)]
    struct Meta {
        #[serde(rename = "concept-id")]
        concept_id: String,
    }

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(page(
            json!([
                { "meta": { "concept-id": "G1-PROV" }, "umm": {} },
                { "meta": { "concept-id": "G2-PROV" }, "umm": {} }
            ]),
            "2",
            "",
        ))
        .mount(&server)
        .await;

    let query = Query::granules().build().unwrap();
    let stream = client_for(&server)
        .scroll(&query, &CancellationToken::new())
        .unwrap()
        .deserialize_records::<Granule>();
    let ids: Vec<String> = stream
        .map(|r| r.unwrap().meta.concept_id)
        .collect()
        .await;
    assert_eq!(ids, vec!["G1-PROV", "G2-PROV"]);
}

#[test]
fn test_extract_items_prefers_items_then_feed_entry() {
    assert_eq!(extract_items(json!({ "items": [1] })), vec![json!(1)]);
    assert_eq!(
        extract_items(json!({ "items": [], "feed": { "entry": [2] } })),
        vec![json!(2)]
    );
    assert!(extract_items(json!({ "hits": 0 })).is_empty());
}

#[test]
fn test_client_rejects_invalid_config() {
    let config = SearchConfig {
        page_size: 0,
        ..Default::default()
    };
    assert!(matches!(
        SearchClient::new(&config),
        Err(Error::Config { .. })
    ));
}

#[test]
fn test_client_exposes_configured_base_url() {
    let config = SearchConfig {
        base_url: "http://localhost:3003/search".to_string(),
        page_size: 50,
        ..Default::default()
    };
    let client = SearchClient::new(&config).unwrap();
    assert_eq!(client.base_url().as_str(), "http://localhost:3003/search");
    assert_eq!(client.page_size(), 50);
}

#[tokio::test]
async fn test_facets_use_autocomplete_feed_shape() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/autocomplete"))
        .and(query_param("q", "viirs"))
        .and(query_param("type[]", "instrument"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(HEADER_HITS, "2")
                .set_body_json(json!({
                    "feed": { "entry": [
                        { "score": 9.5, "type": "instrument", "fields": "VIIRS", "value": "VIIRS" },
                        { "score": 1.25, "type": "instrument", "value": "VIIRS-DNB" }
                    ]}
                })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut stream = client_for(&server)
        .facets("viirs", ["instrument"], &CancellationToken::new())
        .unwrap();
    assert_eq!(stream.hits().await, Some(2));
    let facets: Vec<Facet> = stream.map(|r| r.unwrap()).collect().await;
    assert_eq!(facets.len(), 2);
    assert_eq!(facets[0].kind, "instrument");
    assert_eq!(facets[0].score, 9.5);
    assert_eq!(facets[1].value, "VIIRS-DNB");
    assert_eq!(facets[1].fields, "");
}

#[tokio::test]
async fn test_provider_holdings_are_summed_per_provider() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/provider_holdings.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "concept-id": "C1-LP", "entry-title": "a", "provider-id": "LPCLOUD", "granule-count": 10 },
            { "concept-id": "C2-LP", "entry-title": "b", "provider-id": "LPCLOUD", "granule-count": 32 },
            { "concept-id": "C3-NS", "entry-title": "c", "provider-id": "NSIDC_ECS", "granule-count": 1 }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let providers = client_for(&server)
        .provider_holdings(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(providers.len(), 2);
    assert_eq!(providers[0].id, "LPCLOUD");
    assert_eq!(providers[0].granule_count, 42);
    assert_eq!(providers[0].collections.len(), 2);
    assert_eq!(providers[1].id, "NSIDC_ECS");

    // a single request without paging parameters
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.query(), None);
}

#[tokio::test]
async fn test_provider_holdings_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/provider_holdings.json"))
        .respond_with(
            ResponseTemplate::new(500)
                .insert_header(HEADER_REQUEST_ID, "rid-1")
                .set_body_json(json!({ "errors": ["boom"] })),
        )
        .mount(&server)
        .await;

    let err = client_for(&server)
        .provider_holdings(&CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        Error::Search(SearchError::Remote {
            status,
            request_id,
            messages,
        }) => {
            assert_eq!(status, 500);
            assert_eq!(request_id.as_deref(), Some("rid-1"));
            assert_eq!(messages, vec!["boom".to_string()]);
        }
        other => panic!("expected remote error, got {other:?}"),
    }

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(
        client_for(&server).provider_holdings(&cancel).await,
        Err(Error::Search(SearchError::Cancelled))
    ));
}

#[tokio::test]
async fn test_provider_holdings_rejects_unexpected_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "not": "a list" })))
        .mount(&server)
        .await;

    assert!(matches!(
        client_for(&server)
            .provider_holdings(&CancellationToken::new())
            .await,
        Err(Error::Search(SearchError::Protocol { .. }))
    ));
}
