//! Retry behavior of the resilient fetcher against a scripted transport

use serde_json::json;
use std::time::Duration;
use store_exporter::fetcher::{ApiRequest, FetcherError, ResilientFetcher};
use tokio::time::Instant;

use crate::support::{
    exact_policy, json_ok, rate_limited, status_reply, store_url, timeout, ScriptedTransport,
};

const PATH: &str = "v3/catalog/products";

fn request() -> ApiRequest {
    ApiRequest::get(store_url(PATH))
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_is_honoured_exactly() {
    let transport = ScriptedTransport::new();
    transport.route(
        PATH,
        &[],
        vec![rate_limited(Some("3")), json_ok(json!([{"id": 1}]))],
    );
    let fetcher = ResilientFetcher::new(transport.clone(), exact_policy(8));

    let started = Instant::now();
    let items = fetcher.fetch_array(&request()).await.unwrap();

    assert_eq!(items, vec![json!({"id": 1})]);
    assert_eq!(started.elapsed(), Duration::from_secs(3));
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_long_retry_after_exceeds_max_backoff() {
    let transport = ScriptedTransport::new();
    transport.route(
        PATH,
        &[],
        vec![rate_limited(Some("120")), json_ok(json!([]))],
    );
    let fetcher = ResilientFetcher::new(transport.clone(), exact_policy(8));

    let started = Instant::now();
    fetcher.fetch(&request()).await.unwrap();

    assert_eq!(started.elapsed(), Duration::from_secs(120));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_without_header_uses_backoff() {
    let transport = ScriptedTransport::new();
    transport.route(
        PATH,
        &[],
        vec![
            rate_limited(None),
            rate_limited(Some("soon")),
            json_ok(json!([])),
        ],
    );
    let fetcher = ResilientFetcher::new(transport.clone(), exact_policy(8));

    let started = Instant::now();
    fetcher.fetch(&request()).await.unwrap();

    // 1s after the first failure, 2s after the second
    assert_eq!(started.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_after_exactly_max_attempts() {
    let transport = ScriptedTransport::new();
    transport.route(PATH, &[], vec![status_reply(503)]);
    let fetcher = ResilientFetcher::new(transport.clone(), exact_policy(4));

    let started = Instant::now();
    let err = fetcher.fetch(&request()).await.unwrap_err();

    assert_eq!(transport.requests().len(), 4);
    // 1 + 2 + 4 seconds; no sleep after the final attempt
    assert_eq!(started.elapsed(), Duration::from_secs(7));
    match err {
        FetcherError::ExhaustedRetries { attempts, last, .. } => {
            assert_eq!(attempts, 4);
            assert!(matches!(
                *last,
                FetcherError::TransientServerError { status: 503, .. }
            ));
        }
        other => panic!("expected ExhaustedRetries, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_client_error_is_immediate() {
    let transport = ScriptedTransport::new();
    transport.route(PATH, &[], vec![status_reply(401)]);
    let fetcher = ResilientFetcher::new(transport.clone(), exact_policy(8));

    let started = Instant::now();
    let err = fetcher.fetch(&request()).await.unwrap_err();

    assert_eq!(transport.requests().len(), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(err.kind(), "ClientRequestError");
    assert_eq!(err.status(), Some(401));
}

#[tokio::test(start_paused = true)]
async fn test_network_failures_are_retried() {
    let transport = ScriptedTransport::new();
    transport.route(
        PATH,
        &[],
        vec![timeout(), status_reply(502), json_ok(json!([{"id": 9}]))],
    );
    let fetcher = ResilientFetcher::new(transport.clone(), exact_policy(3));

    let items = fetcher.fetch_array(&request()).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(transport.requests().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_single_attempt_budget_exhausts_immediately() {
    let transport = ScriptedTransport::new();
    transport.route(PATH, &[], vec![timeout()]);
    let fetcher = ResilientFetcher::new(transport.clone(), exact_policy(1));

    let err = fetcher.fetch(&request()).await.unwrap_err();
    assert_eq!(err.kind(), "ExhaustedRetries");
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn test_non_array_body_is_unexpected_shape() {
    let transport = ScriptedTransport::new();
    transport.route(PATH, &[], vec![json_ok(json!({"status": "ok"}))]);
    let fetcher = ResilientFetcher::new(transport, exact_policy(2));

    let err = fetcher.fetch_array(&request()).await.unwrap_err();
    assert_eq!(err.kind(), "UnexpectedResponseShape");
}
