//! Device service facade
//!
//! Device operations declare typed error bodies for 400 and 404: key
//! registration can legitimately fail with `PUBKEY_IN_USE` or
//! `MAX_DEVICES_REACHED`, and lookups with `DEVICE_NOT_FOUND`.

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use veilnet_domain::constants::ACCOUNTS_URL_PREFIX;
use veilnet_domain::{AccountNumber, ApiEndpoint, Authorization, Device, DeviceId, NewDevice};

use super::{declared_error_response, empty_response, error_response, ProxyCore, RestRequestBuilder};
use crate::access_token::{AccessTokenManager, AccessTokenProvider};
use crate::engine::{AuthorizationProvider, RestOperation, RetryStrategy};
use crate::error::RestError;
use crate::transport::RestResponse;

/// Typed operations under `/accounts/v1/devices`. All bearer-authenticated.
pub struct DevicesProxy {
    core: ProxyCore,
    token_manager: Arc<AccessTokenManager>,
}

impl DevicesProxy {
    pub(crate) fn new(core: ProxyCore, token_manager: Arc<AccessTokenManager>) -> Self {
        Self { core, token_manager }
    }

    fn bearer(&self, account: AccountNumber, strategy: RetryStrategy) -> Arc<dyn AuthorizationProvider> {
        Arc::new(AccessTokenProvider::new(Arc::clone(&self.token_manager), account, strategy))
    }

    pub fn list_devices(
        &self,
        account: AccountNumber,
        strategy: RetryStrategy,
    ) -> RestOperation<Vec<Device>> {
        let provider = self.bearer(account, strategy);
        let config = self.core.config.clone();
        self.core.add_operation(
            "list-devices",
            strategy,
            Some(provider),
            move |endpoint: &ApiEndpoint, authorization: Option<&Authorization>| {
                RestRequestBuilder::new(
                    Method::GET,
                    *endpoint,
                    &config,
                    format!("{ACCOUNTS_URL_PREFIX}/devices"),
                )
                .authorization(authorization)
                .build()
            },
            |response: &RestResponse| match response.status {
                status if status.is_success() => serde_json::from_slice(&response.body)
                    .map_err(|err| RestError::DecodeSuccessResponse(err.to_string())),
                _ => Err(error_response(response)),
            },
        )
    }

    pub fn get_device(
        &self,
        account: AccountNumber,
        device: DeviceId,
        strategy: RetryStrategy,
    ) -> RestOperation<Device> {
        let provider = self.bearer(account, strategy);
        let config = self.core.config.clone();
        self.core.add_operation(
            "get-device",
            strategy,
            Some(provider),
            move |endpoint: &ApiEndpoint, authorization: Option<&Authorization>| {
                RestRequestBuilder::new(
                    Method::GET,
                    *endpoint,
                    &config,
                    format!("{ACCOUNTS_URL_PREFIX}/devices/{device}"),
                )
                .authorization(authorization)
                .build()
            },
            device_response,
        )
    }

    /// Registers a new WireGuard key as a device.
    pub fn create_device(
        &self,
        account: AccountNumber,
        device: NewDevice,
        strategy: RetryStrategy,
    ) -> RestOperation<Device> {
        let provider = self.bearer(account, strategy);
        let config = self.core.config.clone();
        self.core.add_operation(
            "create-device",
            strategy,
            Some(provider),
            move |endpoint: &ApiEndpoint, authorization: Option<&Authorization>| {
                RestRequestBuilder::new(
                    Method::POST,
                    *endpoint,
                    &config,
                    format!("{ACCOUNTS_URL_PREFIX}/devices"),
                )
                .authorization(authorization)
                .json_body(&device)?
                .build()
            },
            device_response,
        )
    }

    pub fn delete_device(
        &self,
        account: AccountNumber,
        device: DeviceId,
        strategy: RetryStrategy,
    ) -> RestOperation<()> {
        let provider = self.bearer(account, strategy);
        let config = self.core.config.clone();
        self.core.add_operation(
            "delete-device",
            strategy,
            Some(provider),
            move |endpoint: &ApiEndpoint, authorization: Option<&Authorization>| {
                RestRequestBuilder::new(
                    Method::DELETE,
                    *endpoint,
                    &config,
                    format!("{ACCOUNTS_URL_PREFIX}/devices/{device}"),
                )
                .authorization(authorization)
                .build()
            },
            |response: &RestResponse| match response.status {
                StatusCode::NOT_FOUND => Err(declared_error_response(response)),
                _ => empty_response(response),
            },
        )
    }

    /// Replaces the device's WireGuard key.
    pub fn rotate_device_key(
        &self,
        account: AccountNumber,
        device: DeviceId,
        pubkey: String,
        strategy: RetryStrategy,
    ) -> RestOperation<Device> {
        let provider = self.bearer(account, strategy);
        let config = self.core.config.clone();
        self.core.add_operation(
            "rotate-device-key",
            strategy,
            Some(provider),
            move |endpoint: &ApiEndpoint, authorization: Option<&Authorization>| {
                RestRequestBuilder::new(
                    Method::PUT,
                    *endpoint,
                    &config,
                    format!("{ACCOUNTS_URL_PREFIX}/devices/{device}/pubkey"),
                )
                .authorization(authorization)
                .json_body(&NewDevice { pubkey: pubkey.clone() })?
                .build()
            },
            device_response,
        )
    }
}

/// Shared response mapping for operations returning a device: 400 and 404
/// carry declared error bodies.
fn device_response(response: &RestResponse) -> Result<Device, RestError> {
    match response.status {
        status if status.is_success() => serde_json::from_slice(&response.body)
            .map_err(|err| RestError::DecodeSuccessResponse(err.to_string())),
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => Err(declared_error_response(response)),
        _ => Err(error_response(response)),
    }
}
