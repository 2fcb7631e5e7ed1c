//! Network operation engine
//!
//! Executes one logical REST call through an ordered pipeline with
//! cancellation, bounded retries, and endpoint rotation on transport errors:
//!
//! 1. read the current endpoint from the address cache,
//! 2. resolve an [`Authorization`] when the operation requires one
//!    (cancellable, may suspend until the token manager answers),
//! 3. build the HTTP request for this attempt (synchronous; an encoding
//!    failure is fatal and never retried),
//! 4. await the transport (cancellable),
//! 5. map the response to a typed value (synchronous; semantic failures are
//!    never retried),
//! 6. complete, or rotate/sleep and re-enter on transport errors.
//!
//! Transport errors are the only retryable class. A cancellation-coded error
//! completes the operation as cancelled, a local-connectivity error keeps the
//! endpoint for the next attempt, and anything else rotates the cache past
//! the endpoint that failed.

mod queue;

pub use queue::OperationQueue;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use veilnet_domain::{ApiEndpoint, Authorization};

use crate::address_cache::AddressCache;
use crate::error::RestError;
use crate::transport::{RestRequest, RestResponse, RestTransport};

/// Bound on attempts and inter-attempt delay for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryStrategy {
    /// Retries after the initial attempt. `0` disables retrying; a strategy
    /// with `max_attempts = N` makes at most `N + 1` transport attempts.
    pub max_attempts: u32,
    pub delay: RetryDelay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDelay {
    /// Re-enter the pipeline immediately.
    Never,
    /// Sleep between attempts. The sleep races cancellation.
    After(Duration),
}

impl RetryStrategy {
    /// Fail on the first transport error.
    pub const fn no_retry() -> Self {
        Self { max_attempts: 0, delay: RetryDelay::Never }
    }

    /// Default strategy for interactive calls.
    pub const fn default_strategy() -> Self {
        Self { max_attempts: 2, delay: RetryDelay::After(Duration::from_secs(2)) }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::default_strategy()
    }
}

/// Completion value of one logical REST call.
///
/// Cancellation is a first-class outcome, never an error: callers can always
/// tell "the server rejected this" apart from "I gave up waiting".
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum OperationOutcome<T, E = RestError> {
    Completed(T),
    Failed(E),
    Cancelled,
}

impl<T, E> OperationOutcome<T, E> {
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Maps the completed value, leaving failure and cancellation untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> OperationOutcome<U, E> {
        match self {
            Self::Completed(value) => OperationOutcome::Completed(f(value)),
            Self::Failed(error) => OperationOutcome::Failed(error),
            Self::Cancelled => OperationOutcome::Cancelled,
        }
    }
}

/// Cancellation handle, independent of the operation future.
///
/// Cancellation is cooperative, monotonic and idempotent: once observed at a
/// suspension point the operation completes exactly once with `Cancelled`,
/// and cancelling a completed operation is a no-op.
#[derive(Debug, Clone)]
pub struct OperationHandle {
    token: CancellationToken,
}

impl OperationHandle {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// A spawned operation: await the outcome with [`wait`](Self::wait), cancel
/// through [`handle`](Self::handle) or [`cancel`](Self::cancel).
///
/// Dropping an operation that has not been awaited cancels it, so an
/// abandoned caller cannot leak work onto a facade queue; call
/// [`detach`](Self::detach) to let it run to completion unobserved.
#[must_use = "operations are cancelled when dropped; call `wait` or `detach`"]
pub struct RestOperation<T, E = RestError> {
    handle: OperationHandle,
    outcome: oneshot::Receiver<OperationOutcome<T, E>>,
    detached: bool,
}

impl<T, E> RestOperation<T, E> {
    pub(crate) fn new(
        handle: OperationHandle,
        outcome: oneshot::Receiver<OperationOutcome<T, E>>,
    ) -> Self {
        Self { handle, outcome, detached: false }
    }

    /// A clonable cancellation handle for this operation.
    pub fn handle(&self) -> OperationHandle {
        self.handle.clone()
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Lets the operation run to completion even if this value is dropped.
    pub fn detach(mut self) {
        self.detached = true;
    }

    /// Waits for the completion outcome. Completion fires exactly once.
    pub async fn wait(mut self) -> OperationOutcome<T, E> {
        let outcome = match (&mut self.outcome).await {
            Ok(outcome) => outcome,
            // The queue worker is gone; treat the operation as torn down.
            Err(_) => OperationOutcome::Cancelled,
        };
        self.detached = true;
        outcome
    }
}

impl<T, E> Drop for RestOperation<T, E> {
    fn drop(&mut self) {
        if !self.detached {
            self.handle.cancel();
        }
    }
}

/// Resolves an [`Authorization`] for operations that require one.
///
/// Implementations may suspend indefinitely (e.g. while the token manager
/// refreshes); the engine races the resolution against cancellation.
#[async_trait]
pub trait AuthorizationProvider: Send + Sync {
    async fn get_authorization(&self) -> Result<Authorization, RestError>;
}

/// Emits the raw account number for legacy endpoints that authenticate with
/// `Token <account-number>` instead of a bearer token.
pub struct AccountCredentialProvider {
    account: veilnet_domain::AccountNumber,
}

impl AccountCredentialProvider {
    pub fn new(account: veilnet_domain::AccountNumber) -> Self {
        Self { account }
    }
}

#[async_trait]
impl AuthorizationProvider for AccountCredentialProvider {
    async fn get_authorization(&self) -> Result<Authorization, RestError> {
        Ok(Authorization::AccountCredential(self.account.clone()))
    }
}

/// Builds the HTTP request for one attempt.
///
/// Called once per attempt with the endpoint selected for that attempt and
/// the resolved authorization, if any. Must be cheap and synchronous.
pub trait RequestFactory: Send + Sync {
    fn create_request(
        &self,
        endpoint: &ApiEndpoint,
        authorization: Option<&Authorization>,
    ) -> Result<RestRequest, RestError>;
}

impl<F> RequestFactory for F
where
    F: Fn(&ApiEndpoint, Option<&Authorization>) -> Result<RestRequest, RestError> + Send + Sync,
{
    fn create_request(
        &self,
        endpoint: &ApiEndpoint,
        authorization: Option<&Authorization>,
    ) -> Result<RestRequest, RestError> {
        self(endpoint, authorization)
    }
}

/// Maps a complete transport response to the operation's typed output.
pub trait ResponseHandler<T>: Send + Sync {
    fn handle_response(&self, response: &RestResponse) -> Result<T, RestError>;
}

impl<T, F> ResponseHandler<T> for F
where
    F: Fn(&RestResponse) -> Result<T, RestError> + Send + Sync,
{
    fn handle_response(&self, response: &RestResponse) -> Result<T, RestError> {
        self(response)
    }
}

/// One logical REST call, ready to be spawned on a facade queue or driven
/// inline by a component that already owns a serial context.
pub(crate) struct NetworkOperation<T> {
    pub(crate) name: &'static str,
    pub(crate) cache: Arc<AddressCache>,
    pub(crate) transport: Arc<dyn RestTransport>,
    pub(crate) factory: Arc<dyn RequestFactory>,
    pub(crate) authorization_provider: Option<Arc<dyn AuthorizationProvider>>,
    pub(crate) handler: Arc<dyn ResponseHandler<T>>,
    pub(crate) strategy: RetryStrategy,
}

impl<T: Send + 'static> NetworkOperation<T> {
    /// Spawns the operation on `queue` and returns the caller-facing handle.
    pub(crate) fn spawn_on(self, queue: &OperationQueue) -> RestOperation<T> {
        queue.spawn(move |cancel| self.run(cancel))
    }

    /// Drives the retry loop to completion.
    pub(crate) async fn run(self, cancel: CancellationToken) -> OperationOutcome<T> {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return OperationOutcome::Cancelled;
            }

            let endpoint = self.cache.current_endpoint();

            let authorization = match &self.authorization_provider {
                Some(provider) => {
                    let resolved = tokio::select! {
                        _ = cancel.cancelled() => return OperationOutcome::Cancelled,
                        resolved = provider.get_authorization() => resolved,
                    };
                    match resolved {
                        Ok(authorization) => Some(authorization),
                        Err(error) => {
                            warn!(operation = self.name, error = %error, "authorization failed");
                            return OperationOutcome::Failed(error);
                        }
                    }
                }
                None => None,
            };

            let request = match self.factory.create_request(&endpoint, authorization.as_ref()) {
                Ok(request) => request,
                // Encoding failures are fatal; the request can never succeed.
                Err(error) => return OperationOutcome::Failed(error),
            };

            debug!(operation = self.name, attempt, %endpoint, "sending request");
            let result = tokio::select! {
                // Dropping the in-flight future aborts the transport request.
                _ = cancel.cancelled() => return OperationOutcome::Cancelled,
                result = self.transport.send(request) => result,
            };

            let error = match result {
                Ok(response) => {
                    return match self.handler.handle_response(&response) {
                        Ok(value) => OperationOutcome::Completed(value),
                        // The transport succeeded; the semantic error goes to
                        // the caller untouched.
                        Err(error) => OperationOutcome::Failed(error),
                    };
                }
                Err(error) => error,
            };

            if error.code.is_cancellation() {
                return OperationOutcome::Cancelled;
            }

            if error.code.is_local_connectivity() {
                debug!(operation = self.name, %endpoint, "no local connectivity, keeping endpoint");
            } else {
                let next = self.cache.rotate_after_failure(&endpoint);
                debug!(operation = self.name, failed = %endpoint, next = %next, "rotated endpoint");
            }

            if attempt >= self.strategy.max_attempts {
                warn!(
                    operation = self.name,
                    attempts = attempt + 1,
                    error = %error,
                    "transport retries exhausted"
                );
                return OperationOutcome::Failed(RestError::Network(error));
            }
            attempt += 1;

            if let RetryDelay::After(delay) = self.strategy.delay {
                tokio::select! {
                    _ = cancel.cancelled() => return OperationOutcome::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use reqwest::header::HeaderMap;
    use reqwest::{Method, StatusCode};
    use tempfile::TempDir;
    use tokio::sync::Notify;

    use super::*;
    use crate::transport::{TransportError, TransportErrorCode};

    fn endpoint(literal: &str) -> ApiEndpoint {
        literal.parse().unwrap()
    }

    /// Cache seeded with a deterministic on-disk order.
    fn cache_with_endpoints(dir: &TempDir, endpoints: &[&str]) -> Arc<AddressCache> {
        let path = dir.path().join("api-addresses.json");
        let list: Vec<ApiEndpoint> = endpoints.iter().map(|e| endpoint(e)).collect();
        let json = serde_json::json!({
            "updatedAt": "2026-07-01T00:00:00Z",
            "endpoints": list,
        });
        std::fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();
        Arc::new(AddressCache::open_with_rng(
            path,
            &dir.path().join("missing-bundle.json"),
            endpoint("9.9.9.9:443"),
            StdRng::seed_from_u64(3),
        ))
    }

    fn test_request(
        endpoint: &ApiEndpoint,
        _authorization: Option<&Authorization>,
    ) -> Result<RestRequest, RestError> {
        Ok(RestRequest {
            method: Method::GET,
            endpoint: *endpoint,
            path: "/app/v1/test".to_owned(),
            headers: HeaderMap::new(),
            body: None,
            timeout: Duration::from_secs(5),
        })
    }

    fn ok_response() -> RestResponse {
        RestResponse { status: StatusCode::OK, headers: HeaderMap::new(), body: b"{}".to_vec() }
    }

    /// Transport that replays a script of results and records the endpoints
    /// each attempt targeted.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<RestResponse, TransportError>>>,
        endpoints_seen: Mutex<Vec<ApiEndpoint>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<RestResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                endpoints_seen: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing_forever(code: TransportErrorCode) -> Arc<Self> {
            let failures = (0..16).map(|_| Err(TransportError::new(code, "scripted"))).collect();
            Self::new(failures)
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn endpoints_seen(&self) -> Vec<ApiEndpoint> {
            self.endpoints_seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RestTransport for ScriptedTransport {
        async fn send(&self, request: RestRequest) -> Result<RestResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.endpoints_seen.lock().unwrap().push(request.endpoint);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::new(TransportErrorCode::Other, "exhausted")))
        }
    }

    fn operation<T: Send + 'static>(
        cache: &Arc<AddressCache>,
        transport: Arc<dyn RestTransport>,
        strategy: RetryStrategy,
        handler: impl ResponseHandler<T> + 'static,
    ) -> NetworkOperation<T> {
        NetworkOperation {
            name: "test-operation",
            cache: Arc::clone(cache),
            transport,
            factory: Arc::new(test_request),
            authorization_provider: None,
            handler: Arc::new(handler),
            strategy,
        }
    }

    fn unit_handler(response: &RestResponse) -> Result<(), RestError> {
        if response.status.is_success() {
            Ok(())
        } else {
            Err(RestError::UnhandledResponse(response.status, None))
        }
    }

    #[tokio::test]
    async fn makes_max_attempts_plus_one_calls_and_rotates_every_endpoint() {
        let dir = TempDir::new().unwrap();
        let cache = cache_with_endpoints(&dir, &["1.1.1.1:443", "2.2.2.2:443", "3.3.3.3:443"]);
        let transport = ScriptedTransport::failing_forever(TransportErrorCode::ConnectionRefused);

        let op = operation(
            &cache,
            transport.clone(),
            RetryStrategy { max_attempts: 2, delay: RetryDelay::Never },
            unit_handler,
        );
        let outcome = op.run(CancellationToken::new()).await;

        assert!(matches!(outcome, OperationOutcome::Failed(RestError::Network(_))));
        assert_eq!(transport.calls(), 3);
        assert_eq!(
            transport.endpoints_seen(),
            vec![endpoint("1.1.1.1:443"), endpoint("2.2.2.2:443"), endpoint("3.3.3.3:443")]
        );
        // Full rotation brings the list back to its original head.
        assert_eq!(cache.current_endpoint(), endpoint("1.1.1.1:443"));
    }

    #[tokio::test]
    async fn local_connectivity_errors_keep_the_endpoint() {
        let dir = TempDir::new().unwrap();
        let cache = cache_with_endpoints(&dir, &["1.1.1.1:443", "2.2.2.2:443"]);
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::new(TransportErrorCode::Offline, "no route")),
            Err(TransportError::new(TransportErrorCode::Offline, "no route")),
            Ok(ok_response()),
        ]);

        let op = operation(
            &cache,
            transport.clone(),
            RetryStrategy { max_attempts: 3, delay: RetryDelay::Never },
            unit_handler,
        );
        let outcome = op.run(CancellationToken::new()).await;

        assert!(matches!(outcome, OperationOutcome::Completed(())));
        assert_eq!(transport.calls(), 3);
        assert_eq!(
            transport.endpoints_seen(),
            vec![endpoint("1.1.1.1:443"); 3],
            "every attempt must reuse the same endpoint"
        );
        assert_eq!(cache.current_endpoint(), endpoint("1.1.1.1:443"));
    }

    #[tokio::test]
    async fn response_handler_failures_are_not_retried() {
        let dir = TempDir::new().unwrap();
        let cache = cache_with_endpoints(&dir, &["1.1.1.1:443"]);
        let transport = ScriptedTransport::new(vec![Ok(RestResponse {
            status: StatusCode::BAD_REQUEST,
            headers: HeaderMap::new(),
            body: Vec::new(),
        })]);

        let op = operation(
            &cache,
            transport.clone(),
            RetryStrategy { max_attempts: 5, delay: RetryDelay::Never },
            unit_handler,
        );
        let outcome = op.run(CancellationToken::new()).await;

        assert!(matches!(
            outcome,
            OperationOutcome::Failed(RestError::UnhandledResponse(StatusCode::BAD_REQUEST, None))
        ));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn cancellation_coded_transport_errors_complete_as_cancelled() {
        let dir = TempDir::new().unwrap();
        let cache = cache_with_endpoints(&dir, &["1.1.1.1:443"]);
        let transport = ScriptedTransport::new(vec![Err(TransportError::new(
            TransportErrorCode::Cancelled,
            "caller gave up",
        ))]);

        let op = operation(
            &cache,
            transport,
            RetryStrategy { max_attempts: 5, delay: RetryDelay::Never },
            unit_handler,
        );
        assert!(op.run(CancellationToken::new()).await.is_cancelled());
    }

    #[tokio::test]
    async fn cancelling_during_backoff_completes_without_another_attempt() {
        let dir = TempDir::new().unwrap();
        let cache = cache_with_endpoints(&dir, &["1.1.1.1:443"]);
        // One failure, then the operation sits in its 60 s backoff.
        let transport = ScriptedTransport::failing_forever(TransportErrorCode::ConnectionRefused);

        let op = operation(
            &cache,
            transport.clone(),
            RetryStrategy { max_attempts: 5, delay: RetryDelay::After(Duration::from_secs(60)) },
            unit_handler,
        );

        let queue = OperationQueue::new("test-queue");
        let spawned = op.spawn_on(&queue);
        let handle = spawned.handle();

        // Wait until the first attempt has happened, then cancel mid-backoff.
        while transport.calls() == 0 {
            tokio::task::yield_now().await;
        }
        handle.cancel();

        assert!(spawned.wait().await.is_cancelled());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn cancelling_an_in_flight_request_completes_as_cancelled() {
        struct HangingTransport {
            started: Arc<Notify>,
        }

        #[async_trait]
        impl RestTransport for HangingTransport {
            async fn send(&self, _request: RestRequest) -> Result<RestResponse, TransportError> {
                self.started.notify_one();
                std::future::pending().await
            }
        }

        let dir = TempDir::new().unwrap();
        let cache = cache_with_endpoints(&dir, &["1.1.1.1:443"]);
        let started = Arc::new(Notify::new());
        let transport = Arc::new(HangingTransport { started: Arc::clone(&started) });

        let op = operation(&cache, transport, RetryStrategy::no_retry(), unit_handler);
        let queue = OperationQueue::new("test-queue");
        let spawned = op.spawn_on(&queue);
        let handle = spawned.handle();

        started.notified().await;
        handle.cancel();
        // Cancellation is idempotent.
        handle.cancel();

        assert!(spawned.wait().await.is_cancelled());
    }

    #[tokio::test]
    async fn authorization_failures_are_fatal_and_skip_the_transport() {
        struct RejectingProvider;

        #[async_trait]
        impl AuthorizationProvider for RejectingProvider {
            async fn get_authorization(&self) -> Result<Authorization, RestError> {
                Err(RestError::EncodePayload("no credentials".into()))
            }
        }

        let dir = TempDir::new().unwrap();
        let cache = cache_with_endpoints(&dir, &["1.1.1.1:443"]);
        let transport = ScriptedTransport::new(vec![Ok(ok_response())]);

        let mut op = operation(
            &cache,
            transport.clone(),
            RetryStrategy { max_attempts: 3, delay: RetryDelay::Never },
            unit_handler,
        );
        op.authorization_provider = Some(Arc::new(RejectingProvider));

        let outcome = op.run(CancellationToken::new()).await;
        assert!(matches!(outcome, OperationOutcome::Failed(RestError::EncodePayload(_))));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn cancelling_while_awaiting_authorization_completes_as_cancelled() {
        struct StalledProvider {
            reached: Arc<Notify>,
        }

        #[async_trait]
        impl AuthorizationProvider for StalledProvider {
            async fn get_authorization(&self) -> Result<Authorization, RestError> {
                self.reached.notify_one();
                std::future::pending().await
            }
        }

        let dir = TempDir::new().unwrap();
        let cache = cache_with_endpoints(&dir, &["1.1.1.1:443"]);
        let transport = ScriptedTransport::new(vec![Ok(ok_response())]);
        let reached = Arc::new(Notify::new());

        let mut op = operation(&cache, transport.clone(), RetryStrategy::no_retry(), unit_handler);
        op.authorization_provider = Some(Arc::new(StalledProvider { reached: Arc::clone(&reached) }));

        let queue = OperationQueue::new("test-queue");
        let spawned = op.spawn_on(&queue);
        let handle = spawned.handle();

        reached.notified().await;
        handle.cancel();

        assert!(spawned.wait().await.is_cancelled());
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn dropping_an_operation_cancels_it() {
        struct HangingTransport {
            started: Arc<Notify>,
            aborted: Arc<AtomicUsize>,
        }

        struct AbortGuard(Arc<AtomicUsize>);
        impl Drop for AbortGuard {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        #[async_trait]
        impl RestTransport for HangingTransport {
            async fn send(&self, _request: RestRequest) -> Result<RestResponse, TransportError> {
                let _guard = AbortGuard(Arc::clone(&self.aborted));
                self.started.notify_one();
                std::future::pending().await
            }
        }

        let dir = TempDir::new().unwrap();
        let cache = cache_with_endpoints(&dir, &["1.1.1.1:443"]);
        let started = Arc::new(Notify::new());
        let aborted = Arc::new(AtomicUsize::new(0));
        let transport = Arc::new(HangingTransport {
            started: Arc::clone(&started),
            aborted: Arc::clone(&aborted),
        });

        let op = operation(&cache, transport, RetryStrategy::no_retry(), unit_handler);
        let queue = OperationQueue::new("test-queue");
        let spawned = op.spawn_on(&queue);

        started.notified().await;
        drop(spawned);

        // The cancelled select arm drops the in-flight transport future.
        while aborted.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    }
}
