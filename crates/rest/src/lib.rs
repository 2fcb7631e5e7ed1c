//! # Veilnet REST
//!
//! Resilient REST client runtime for talking to API endpoints that sit
//! behind rotating IP addresses. Every logical call eventually succeeds,
//! fails, or is cancelled with deterministic semantics.
//!
//! The runtime is built from four pieces:
//! - [`address_cache`]: persistent priority-ordered pool of candidate API
//!   endpoints with failover rotation and a background refresh tracker
//! - [`engine`]: cancellable, retrying operation executor composing request
//!   factories, authorization providers and response handlers
//! - [`access_token`]: per-account bearer token cache with single-flight
//!   obtain/refresh
//! - [`proxy`]: thin typed facades per API service
//!
//! A typical call flows caller -> facade -> engine -> (token manager when the
//! endpoint is authorized) -> address cache for the current endpoint ->
//! transport -> response handler -> caller. On transport failure the engine
//! rotates the address cache before retrying.
//!
//! ## Architecture
//! - All collaborators are injected through [`context::ApiContext`]
//! - The HTTPS transport is a trait; [`transport::HttpsTransport`] is the
//!   stock `reqwest` implementation

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod access_token;
pub mod address_cache;
pub mod context;
pub mod engine;
pub mod error;
pub mod proxy;
pub mod transport;

// Re-export commonly used items
pub use access_token::{AccessTokenManager, AccessTokenProvider, AccessTokenRecord};
pub use address_cache::tracker::{
    AddressCacheTracker, AddressListFetcher, BackgroundTaskScheduler, TrackerConfig, UpdateError,
    UpdateStatus,
};
pub use address_cache::{AddressCache, AddressCacheError, CacheSource};
pub use context::{ApiConfig, ApiContext};
pub use engine::{
    AccountCredentialProvider, AuthorizationProvider, OperationHandle, OperationOutcome,
    OperationQueue, RequestFactory, ResponseHandler, RestOperation, RetryDelay, RetryStrategy,
};
pub use error::{error_code, RestError, ServerErrorResponse};
pub use proxy::{
    AccountsProxy, AddressListProxy, DevicesProxy, RelaysProxy, RelaysResponse,
};
pub use transport::{
    HttpsTransport, RestRequest, RestResponse, RestTransport, TransportError, TransportErrorCode,
};
