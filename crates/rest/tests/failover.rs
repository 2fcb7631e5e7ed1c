//! Endpoint failover scenarios driven through a facade.

mod common;

use std::time::Duration;

use common::{Script, ScriptedTransport, ENDPOINT_A, ENDPOINT_B, ENDPOINT_C};
use reqwest::StatusCode;
use tempfile::TempDir;
use veilnet_rest::{
    OperationOutcome, RelaysResponse, RestError, RetryDelay, RetryStrategy, TransportErrorCode,
};

#[tokio::test]
async fn generic_transport_errors_rotate_through_every_endpoint() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::new(vec![
        Script::Fail(TransportErrorCode::ConnectionRefused),
        Script::Fail(TransportErrorCode::ConnectionRefused),
        Script::Fail(TransportErrorCode::ConnectionRefused),
    ]);
    let context = common::context_with_endpoints(
        &dir,
        transport.clone(),
        &[ENDPOINT_A, ENDPOINT_B, ENDPOINT_C],
    );
    let cache = context.address_cache();

    let outcome = context
        .relays_proxy()
        .get_relays(None, RetryStrategy { max_attempts: 2, delay: RetryDelay::Never })
        .wait()
        .await;

    assert!(matches!(outcome, OperationOutcome::Failed(RestError::Network(_))));
    assert_eq!(transport.calls(), 3, "max_attempts = 2 means exactly 3 transport attempts");
    assert_eq!(transport.endpoints_seen(), vec![ENDPOINT_A, ENDPOINT_B, ENDPOINT_C]);
    // Three rotations bring the list back to its original head.
    assert_eq!(cache.current_endpoint().to_string(), ENDPOINT_A);
}

#[tokio::test]
async fn local_connectivity_failures_keep_the_endpoint() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::new(vec![
        Script::Fail(TransportErrorCode::Offline),
        Script::Fail(TransportErrorCode::Offline),
        Script::Respond(StatusCode::OK, r#"{"countries":[]}"#),
    ]);
    let context =
        common::context_with_endpoints(&dir, transport.clone(), &[ENDPOINT_A, ENDPOINT_B]);
    let cache = context.address_cache();

    let outcome = context
        .relays_proxy()
        .get_relays(None, RetryStrategy { max_attempts: 3, delay: RetryDelay::Never })
        .wait()
        .await;

    assert!(matches!(
        outcome,
        OperationOutcome::Completed(RelaysResponse::NewContent { .. })
    ));
    assert_eq!(transport.endpoints_seen(), vec![ENDPOINT_A, ENDPOINT_A, ENDPOINT_A]);
    assert_eq!(cache.current_endpoint().to_string(), ENDPOINT_A, "cache must be unchanged");
}

#[tokio::test]
async fn cancellation_during_backoff_stops_further_attempts() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::new(vec![
        Script::Fail(TransportErrorCode::ConnectionRefused),
        // Anything further would only be reachable if the backoff elapsed.
        Script::Respond(StatusCode::OK, r#"{"countries":[]}"#),
    ]);
    let context = common::context_with_endpoints(&dir, transport.clone(), &[ENDPOINT_A]);

    let operation = context.relays_proxy().get_relays(
        None,
        RetryStrategy { max_attempts: 5, delay: RetryDelay::After(Duration::from_secs(30)) },
    );
    let handle = operation.handle();

    let outcome = tokio::time::timeout(Duration::from_secs(5), async {
        // Cancel once the first attempt has failed and the timer is armed.
        while transport.calls() == 0 {
            tokio::task::yield_now().await;
        }
        handle.cancel();
        operation.wait().await
    })
    .await
    .expect("cancellation must complete well before the 30s backoff");

    assert!(outcome.is_cancelled());
    assert_eq!(transport.calls(), 1, "no attempt may run after cancellation");
}
