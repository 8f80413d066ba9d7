//! HTTP generator against a local mock server.

#![cfg(feature = "http")]

use stack_loadtest::backend::http::{HttpGetter, HttpLoadGenerator, ReqwestGetter};
use stack_loadtest::backend::{LoadGenerator, Pacing};
use stack_loadtest::registry::EndpointRegistry;
use tokio_util::sync::CancellationToken;

fn live_getter() -> Result<Box<dyn HttpGetter>, String> {
    ReqwestGetter::new()
        .map(|g| Box::new(g) as Box<dyn HttpGetter>)
        .map_err(|e| e.to_string())
}

#[tokio::test]
async fn test_successful_responses_are_counted() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/")
        .with_status(200)
        .with_body("ok")
        .expect(12)
        .create_async()
        .await;

    let registry = EndpointRegistry::from_map([("NlbDnsName", server.host_with_port())]);
    let mut generator =
        HttpLoadGenerator::new(&registry, true, live_getter).with_pacing(Pacing::none());
    assert_eq!(
        generator.url(),
        Some(format!("http://{}/", server.host_with_port()).as_str())
    );

    let result = generator.run(12, CancellationToken::new()).await;

    mock.assert_async().await;
    assert_eq!(result.attempts, 12);
    assert_eq!(result.errors, 0);
    assert_eq!(result.status_codes.get(&200), Some(&12));
}

#[tokio::test]
async fn test_server_errors_are_counted_and_loop_continues() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/")
        .with_status(503)
        .create_async()
        .await;

    let registry = EndpointRegistry::from_map([("NlbDnsName", server.url())]);
    let mut generator =
        HttpLoadGenerator::new(&registry, true, live_getter).with_pacing(Pacing::none());

    let result = generator.run(5, CancellationToken::new()).await;
    assert_eq!(result.attempts, 5);
    assert_eq!(result.errors, 5);
    assert_eq!(result.status_codes.get(&503), Some(&5));
    assert_eq!(result.error_categories.get("http"), Some(&5));
}

#[tokio::test]
async fn test_client_errors_are_not_failures() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/")
        .with_status(404)
        .create_async()
        .await;

    let registry = EndpointRegistry::from_map([("NlbDnsName", server.host_with_port())]);
    let mut generator =
        HttpLoadGenerator::new(&registry, true, live_getter).with_pacing(Pacing::none());

    let result = generator.run(3, CancellationToken::new()).await;
    assert_eq!(result.attempts, 3);
    assert_eq!(result.errors, 0);
    assert_eq!(result.status_codes.get(&404), Some(&3));
}

#[tokio::test]
async fn test_unreachable_host_counts_connection_errors() {
    let registry = EndpointRegistry::from_map([("NlbDnsName", "127.0.0.1:1")]);
    let mut generator =
        HttpLoadGenerator::new(&registry, true, live_getter).with_pacing(Pacing::none());

    let result = generator.run(2, CancellationToken::new()).await;
    assert_eq!(result.attempts, 2);
    assert_eq!(result.errors, 2);
    assert!(result.status_codes.is_empty());
    assert_eq!(result.error_categories.get("connection"), Some(&2));
}
