//! Per-service proxy facades built on the operation engine
//!
//! Each facade bundles a path prefix, a serial operation queue, and typed
//! method signatures. Request construction goes through
//! [`RestRequestBuilder`], which owns the wire conventions: `Host` header,
//! `Content-Type: application/json` on bodied requests, `Authorization`
//! header rendering, and weak `If-None-Match` validators.

mod accounts;
mod addrs;
mod devices;
mod relays;

pub use accounts::AccountsProxy;
pub use addrs::AddressListProxy;
pub use devices::DevicesProxy;
pub use relays::{RelaysProxy, RelaysResponse};

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, HOST, IF_NONE_MATCH};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use veilnet_domain::{ApiEndpoint, Authorization};

use crate::address_cache::AddressCache;
use crate::context::ApiConfig;
use crate::engine::{
    AuthorizationProvider, NetworkOperation, OperationQueue, RequestFactory, ResponseHandler,
    RestOperation, RetryStrategy,
};
use crate::error::{error_code, RestError, ServerErrorResponse};
use crate::transport::{RestRequest, RestResponse, RestTransport};

/// Shared state behind one service facade.
#[derive(Clone)]
pub(crate) struct ProxyCore {
    pub(crate) config: ApiConfig,
    pub(crate) cache: Arc<AddressCache>,
    pub(crate) transport: Arc<dyn RestTransport>,
    queue: OperationQueue,
}

impl ProxyCore {
    pub(crate) fn new(
        name: &'static str,
        config: ApiConfig,
        cache: Arc<AddressCache>,
        transport: Arc<dyn RestTransport>,
    ) -> Self {
        Self { config, cache, transport, queue: OperationQueue::new(name) }
    }

    /// Builds an operation from its parts and spawns it on this facade's
    /// serial queue.
    pub(crate) fn add_operation<T>(
        &self,
        name: &'static str,
        strategy: RetryStrategy,
        authorization_provider: Option<Arc<dyn AuthorizationProvider>>,
        factory: impl RequestFactory + 'static,
        handler: impl ResponseHandler<T> + 'static,
    ) -> RestOperation<T>
    where
        T: Send + 'static,
    {
        NetworkOperation {
            name,
            cache: Arc::clone(&self.cache),
            transport: Arc::clone(&self.transport),
            factory: Arc::new(factory),
            authorization_provider,
            handler: Arc::new(handler),
            strategy,
        }
        .spawn_on(&self.queue)
    }
}

/// Builder for one attempt's HTTP request.
pub(crate) struct RestRequestBuilder {
    method: Method,
    endpoint: ApiEndpoint,
    hostname: String,
    path: String,
    timeout: Duration,
    authorization: Option<Authorization>,
    etag: Option<String>,
    body: Option<Vec<u8>>,
}

impl RestRequestBuilder {
    pub(crate) fn new(
        method: Method,
        endpoint: ApiEndpoint,
        config: &ApiConfig,
        path: impl Into<String>,
    ) -> Self {
        Self {
            method,
            endpoint,
            hostname: config.hostname.clone(),
            path: path.into(),
            timeout: config.network_timeout,
            authorization: None,
            etag: None,
            body: None,
        }
    }

    pub(crate) fn authorization(mut self, authorization: Option<&Authorization>) -> Self {
        self.authorization = authorization.cloned();
        self
    }

    pub(crate) fn if_none_match(mut self, etag: &str) -> Self {
        self.etag = Some(etag.to_owned());
        self
    }

    pub(crate) fn json_body<B: Serialize>(mut self, body: &B) -> Result<Self, RestError> {
        let encoded =
            serde_json::to_vec(body).map_err(|err| RestError::EncodePayload(err.to_string()))?;
        self.body = Some(encoded);
        Ok(self)
    }

    pub(crate) fn build(self) -> Result<RestRequest, RestError> {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, header_value(&self.hostname)?);

        if let Some(authorization) = &self.authorization {
            headers.insert(AUTHORIZATION, header_value(&authorization.header_value())?);
        }

        if let Some(etag) = &self.etag {
            // Strong validators are sent weak.
            let value = if etag.starts_with("W/") { etag.clone() } else { format!("W/{etag}") };
            headers.insert(IF_NONE_MATCH, header_value(&value)?);
        }

        if self.body.is_some() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        Ok(RestRequest {
            method: self.method,
            endpoint: self.endpoint,
            path: self.path,
            headers,
            body: self.body,
            timeout: self.timeout,
        })
    }
}

fn header_value(value: &str) -> Result<HeaderValue, RestError> {
    HeaderValue::from_str(value)
        .map_err(|err| RestError::EncodePayload(format!("invalid header value: {err}")))
}

/// Decodes a 2xx JSON body; routes every other status through
/// [`error_response`].
pub(crate) fn json_response<T: DeserializeOwned>(response: &RestResponse) -> Result<T, RestError> {
    if response.status.is_success() {
        serde_json::from_slice(&response.body)
            .map_err(|err| RestError::DecodeSuccessResponse(err.to_string()))
    } else {
        Err(error_response(response))
    }
}

/// Accepts any 2xx with no decoding; routes every other status through
/// [`error_response`].
pub(crate) fn empty_response(response: &RestResponse) -> Result<(), RestError> {
    if response.status.is_success() {
        Ok(())
    } else {
        Err(error_response(response))
    }
}

/// Maps a status with no declared branch. The body decode is best effort:
/// recognized codes become [`RestError::Server`], everything else is
/// surfaced as an unhandled response.
pub(crate) fn error_response(response: &RestResponse) -> RestError {
    match serde_json::from_slice::<ServerErrorResponse>(&response.body) {
        Ok(error) if error_code::is_known(&error.code) => RestError::Server(error),
        Ok(error) => RestError::UnhandledResponse(response.status, Some(error)),
        Err(decode_error) => {
            debug!(
                status = %response.status,
                error = %decode_error,
                "could not decode error response body"
            );
            RestError::UnhandledResponse(response.status, None)
        }
    }
}

/// Maps a status for which the facade declares a typed error body; a body
/// that fails to decode is itself an error here.
pub(crate) fn declared_error_response(response: &RestResponse) -> RestError {
    match serde_json::from_slice::<ServerErrorResponse>(&response.body) {
        Ok(error) => RestError::Server(error),
        Err(err) => RestError::DecodeErrorResponse(err.to_string()),
    }
}
