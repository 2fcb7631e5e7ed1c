//! API address list facade
//!
//! Serves the address tracker: `GET /app/v1/api-addrs` returns the current
//! endpoint fleet as socket-addr literals (`"ip:port"`).

use veilnet_domain::constants::APP_URL_PREFIX;
use veilnet_domain::{ApiEndpoint, Authorization};

use reqwest::Method;

use super::{error_response, ProxyCore, RestRequestBuilder};
use crate::address_cache::tracker::AddressListFetcher;
use crate::engine::{RestOperation, RetryStrategy};
use crate::error::RestError;
use crate::transport::RestResponse;

/// Typed operations under `/app/v1/api-addrs`. Unauthenticated.
pub struct AddressListProxy {
    core: ProxyCore,
}

impl AddressListProxy {
    pub(crate) fn new(core: ProxyCore) -> Self {
        Self { core }
    }

    pub fn get_api_addrs(&self, strategy: RetryStrategy) -> RestOperation<Vec<ApiEndpoint>> {
        let config = self.core.config.clone();
        self.core.add_operation(
            "get-api-addrs",
            strategy,
            None,
            move |endpoint: &ApiEndpoint, _authorization: Option<&Authorization>| {
                RestRequestBuilder::new(
                    Method::GET,
                    *endpoint,
                    &config,
                    format!("{APP_URL_PREFIX}/api-addrs"),
                )
                .build()
            },
            |response: &RestResponse| {
                if !response.status.is_success() {
                    return Err(error_response(response));
                }
                let literals: Vec<String> = serde_json::from_slice(&response.body)
                    .map_err(|err| RestError::DecodeSuccessResponse(err.to_string()))?;
                literals
                    .iter()
                    .map(|literal| {
                        literal.parse().map_err(|err| {
                            RestError::DecodeSuccessResponse(format!(
                                "invalid endpoint {literal:?}: {err}"
                            ))
                        })
                    })
                    .collect()
            },
        )
    }
}

impl AddressListFetcher for AddressListProxy {
    fn fetch(&self) -> RestOperation<Vec<ApiEndpoint>> {
        // The tracker supplies its own 15-minute retry cadence; individual
        // fetches fail fast.
        self.get_api_addrs(RetryStrategy::no_retry())
    }
}
