//! Relay list facade
//!
//! The relay list is large and changes rarely, so fetches are conditional:
//! callers pass the etag of their cached copy and receive either
//! `NotModified` or fresh content with the etag to remember.

use reqwest::{Method, StatusCode};
use veilnet_domain::constants::APP_URL_PREFIX;
use veilnet_domain::{ApiEndpoint, Authorization, RelayList};

use super::{error_response, ProxyCore, RestRequestBuilder};
use crate::engine::{RestOperation, RetryStrategy};
use crate::error::RestError;
use crate::transport::RestResponse;

/// Outcome of a conditional relay list fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelaysResponse {
    /// The caller's cached copy is still current.
    NotModified,
    NewContent {
        /// Etag to send on the next conditional fetch, when the server
        /// provided one.
        etag: Option<String>,
        relay_list: RelayList,
    },
}

/// Typed operations under `/app/v1/relays`. Unauthenticated.
pub struct RelaysProxy {
    core: ProxyCore,
}

impl RelaysProxy {
    pub(crate) fn new(core: ProxyCore) -> Self {
        Self { core }
    }

    pub fn get_relays(
        &self,
        etag: Option<String>,
        strategy: RetryStrategy,
    ) -> RestOperation<RelaysResponse> {
        let config = self.core.config.clone();
        self.core.add_operation(
            "get-relays",
            strategy,
            None,
            move |endpoint: &ApiEndpoint, _authorization: Option<&Authorization>| {
                let mut builder = RestRequestBuilder::new(
                    Method::GET,
                    *endpoint,
                    &config,
                    format!("{APP_URL_PREFIX}/relays"),
                );
                if let Some(etag) = &etag {
                    builder = builder.if_none_match(etag);
                }
                builder.build()
            },
            |response: &RestResponse| {
                if response.status == StatusCode::NOT_MODIFIED {
                    return Ok(RelaysResponse::NotModified);
                }
                if response.status.is_success() {
                    let relay_list = serde_json::from_slice(&response.body)
                        .map_err(|err| RestError::DecodeSuccessResponse(err.to_string()))?;
                    return Ok(RelaysResponse::NewContent { etag: response.etag(), relay_list });
                }
                Err(error_response(response))
            },
        )
    }
}
