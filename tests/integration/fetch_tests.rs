//! Integration tests for the fetch client over real HTTP
//!
//! A wiremock server plays the remote site; the recording pacer captures
//! every backoff and cooldown without sleeping.

use kved_crawl::config::{CrawlerConfig, IdentityConfig};
use kved_crawl::crawler::{
    FetchClient, FetchContext, FetchPolicy, FetchResult, PauseKind, RecordingPacer,
    ReqwestTransport,
};
use kved_crawl::session::SessionRotator;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(pacer: Arc<RecordingPacer>) -> FetchClient {
    let crawler = CrawlerConfig {
        request_timeout_secs: 5,
        connect_timeout_secs: 5,
        ..CrawlerConfig::default()
    };
    let identity = IdentityConfig::default();
    FetchClient::new(
        Arc::new(ReqwestTransport::new(&crawler)),
        Arc::new(SessionRotator::new(&identity)),
        pacer,
        FetchPolicy::from_config(&crawler, &identity),
        CancellationToken::new(),
    )
}

fn url(server: &MockServer, route: &str) -> Url {
    Url::parse(&format!("{}{}", server.uri(), route)).unwrap()
}

#[tokio::test]
async fn test_rate_limited_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/catalog/kved/"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/catalog/kved/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>catalog</html>"))
        .mount(&server)
        .await;

    let pacer = Arc::new(RecordingPacer::new());
    let client = client(pacer.clone());
    let result = client
        .fetch(&url(&server, "/catalog/kved/"), &FetchContext::default())
        .await;

    match result {
        FetchResult::Success(doc) => {
            assert_eq!(doc.status, 200);
            assert!(doc.body.contains("catalog"));
        }
        other => panic!("expected success, got {:?}", other),
    }

    let backoffs = pacer.delays(PauseKind::Backoff);
    assert_eq!(backoffs.len(), 2);
    assert!(backoffs[0] < backoffs[1]);
    assert_eq!(client.rotator().rotations(), 0);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_forbidden_rotates_once_then_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let pacer = Arc::new(RecordingPacer::new());
    let client = client(pacer.clone());
    let result = client
        .fetch(&url(&server, "/catalog/kved/01"), &FetchContext::default())
        .await;

    assert!(matches!(result, FetchResult::Fatal { .. }));
    assert_eq!(server.received_requests().await.unwrap().len(), 5);
    assert_eq!(client.rotator().rotations(), 1);
    assert_eq!(pacer.delays(PauseKind::Cooldown).len(), 4);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let pacer = Arc::new(RecordingPacer::new());
    let client = client(pacer.clone());
    let result = client
        .fetch(&url(&server, "/company/12345678/"), &FetchContext::default())
        .await;

    assert!(matches!(result, FetchResult::Fatal { .. }));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    assert!(pacer.delays(PauseKind::Backoff).is_empty());
}

#[tokio::test]
async fn test_missing_marker_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>Loading...</html>"))
        .mount(&server)
        .await;

    let client = client(Arc::new(RecordingPacer::new()));
    let result = client
        .fetch(
            &url(&server, "/company/12345678/"),
            &FetchContext::expecting("seo-table-row"),
        )
        .await;

    assert!(matches!(result, FetchResult::Retryable { attempts: 1, .. }));
}

#[tokio::test]
async fn test_requests_carry_identity_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header_exists("user-agent"))
        .and(header_exists("accept-language"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client(Arc::new(RecordingPacer::new()));
    let result = client
        .fetch(&url(&server, "/"), &FetchContext::default())
        .await;

    assert!(result.is_success());
}
