//! Account service facade

use std::sync::Arc;

use reqwest::Method;
use serde::Serialize;
use veilnet_domain::constants::ACCOUNTS_URL_PREFIX;
use veilnet_domain::{
    AccountData, AccountNumber, ApiEndpoint, Authorization, NewAccount, VoucherSubmission,
};

use super::{json_response, ProxyCore, RestRequestBuilder};
use crate::access_token::{AccessTokenManager, AccessTokenProvider};
use crate::engine::{AccountCredentialProvider, AuthorizationProvider, RestOperation, RetryStrategy};

/// Typed operations under `/accounts/v1` that concern the account itself.
pub struct AccountsProxy {
    core: ProxyCore,
    token_manager: Arc<AccessTokenManager>,
}

impl AccountsProxy {
    pub(crate) fn new(core: ProxyCore, token_manager: Arc<AccessTokenManager>) -> Self {
        Self { core, token_manager }
    }

    /// Creates a brand-new account. Unauthenticated.
    pub fn create_account(&self, strategy: RetryStrategy) -> RestOperation<NewAccount> {
        let config = self.core.config.clone();
        self.core.add_operation(
            "create-account",
            strategy,
            None,
            move |endpoint: &ApiEndpoint, _authorization: Option<&Authorization>| {
                RestRequestBuilder::new(
                    Method::POST,
                    *endpoint,
                    &config,
                    format!("{ACCOUNTS_URL_PREFIX}/accounts"),
                )
                .build()
            },
            json_response::<NewAccount>,
        )
    }

    /// Fetches the calling account's state. Bearer-authenticated.
    pub fn get_account_data(
        &self,
        account: AccountNumber,
        strategy: RetryStrategy,
    ) -> RestOperation<AccountData> {
        let provider: Arc<dyn AuthorizationProvider> =
            Arc::new(AccessTokenProvider::new(Arc::clone(&self.token_manager), account, strategy));
        let config = self.core.config.clone();
        self.core.add_operation(
            "get-account-data",
            strategy,
            Some(provider),
            move |endpoint: &ApiEndpoint, authorization: Option<&Authorization>| {
                RestRequestBuilder::new(
                    Method::GET,
                    *endpoint,
                    &config,
                    format!("{ACCOUNTS_URL_PREFIX}/accounts/me"),
                )
                .authorization(authorization)
                .build()
            },
            json_response::<AccountData>,
        )
    }

    /// Redeems a voucher code. This is a legacy endpoint authenticated with
    /// the raw account number rather than a bearer token.
    pub fn submit_voucher(
        &self,
        account: AccountNumber,
        voucher_code: String,
        strategy: RetryStrategy,
    ) -> RestOperation<VoucherSubmission> {
        #[derive(Serialize)]
        struct VoucherRequest {
            voucher_code: String,
        }

        let provider: Arc<dyn AuthorizationProvider> =
            Arc::new(AccountCredentialProvider::new(account));
        let config = self.core.config.clone();
        self.core.add_operation(
            "submit-voucher",
            strategy,
            Some(provider),
            move |endpoint: &ApiEndpoint, authorization: Option<&Authorization>| {
                RestRequestBuilder::new(
                    Method::POST,
                    *endpoint,
                    &config,
                    format!("{ACCOUNTS_URL_PREFIX}/submit-voucher"),
                )
                .authorization(authorization)
                .json_body(&VoucherRequest { voucher_code: voucher_code.clone() })?
                .build()
            },
            json_response::<VoucherSubmission>,
        )
    }
}
