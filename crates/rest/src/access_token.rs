//! Access-token cache with single-flight obtain and refresh
//!
//! One manager serves bearer tokens for every facade. All token work runs as
//! jobs on the manager's private serial queue, so no two obtains for the same
//! account can ever run simultaneously within a manager: a caller that
//! queues behind an in-flight obtain simply finds the fresh record in the
//! store when its turn comes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use veilnet_domain::constants::AUTH_URL_PREFIX;
use veilnet_domain::{AccessTokenData, AccountNumber, ApiEndpoint, Authorization};

use crate::address_cache::AddressCache;
use crate::context::ApiConfig;
use crate::engine::{
    AuthorizationProvider, NetworkOperation, OperationOutcome, OperationQueue, RestOperation,
    RetryStrategy,
};
use crate::error::RestError;
use crate::proxy::{json_response, RestRequestBuilder};
use crate::transport::{RestTransport, TransportError, TransportErrorCode};

/// One cached access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessTokenRecord {
    pub account: AccountNumber,
    pub access_token: String,
    pub expiry: DateTime<Utc>,
}

impl AccessTokenRecord {
    /// Strict validity test: a record whose expiry equals `now` is already
    /// expired.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry > now
    }
}

type TokenStore = Arc<Mutex<HashMap<AccountNumber, AccessTokenRecord>>>;

/// Per-account access-token cache layered on the operation engine.
pub struct AccessTokenManager {
    config: ApiConfig,
    cache: Arc<AddressCache>,
    transport: Arc<dyn RestTransport>,
    queue: OperationQueue,
    store: TokenStore,
}

impl AccessTokenManager {
    pub fn new(
        config: ApiConfig,
        cache: Arc<AddressCache>,
        transport: Arc<dyn RestTransport>,
    ) -> Self {
        Self {
            config,
            cache,
            transport,
            queue: OperationQueue::new("access-token-manager"),
            store: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns a valid token record for the account: the cached record while
    /// it is still valid, a refresh of the expired record when one exists,
    /// and a fresh obtain otherwise.
    pub fn get_token(
        &self,
        account: AccountNumber,
        strategy: RetryStrategy,
    ) -> RestOperation<AccessTokenRecord> {
        let job = self.token_job(account, strategy);
        self.queue.spawn(move |cancel| async move { job.resolve(cancel).await })
    }

    /// Returns a bearer authorization for the account, refreshing or
    /// obtaining a token first when necessary.
    pub fn get_authorization(
        &self,
        account: AccountNumber,
        strategy: RetryStrategy,
    ) -> RestOperation<Authorization> {
        let job = self.token_job(account, strategy);
        self.queue.spawn(move |cancel| async move {
            job.resolve(cancel)
                .await
                .map(|record| Authorization::BearerToken(record.access_token))
        })
    }

    fn token_job(&self, account: AccountNumber, strategy: RetryStrategy) -> TokenJob {
        TokenJob {
            config: self.config.clone(),
            cache: Arc::clone(&self.cache),
            transport: Arc::clone(&self.transport),
            store: Arc::clone(&self.store),
            account,
            strategy,
        }
    }
}

/// One queued unit of token work. The cache lookup happens inside the job so
/// that a caller queued behind an in-flight obtain sees its result.
struct TokenJob {
    config: ApiConfig,
    cache: Arc<AddressCache>,
    transport: Arc<dyn RestTransport>,
    store: TokenStore,
    account: AccountNumber,
    strategy: RetryStrategy,
}

impl TokenJob {
    async fn resolve(
        self,
        cancel: CancellationToken,
    ) -> OperationOutcome<AccessTokenRecord> {
        let existing = lock_store(&self.store).get(&self.account).cloned();

        match existing {
            Some(record) if record.is_valid_at(Utc::now()) => {
                debug!(account = ?self.account, "using cached access token");
                OperationOutcome::Completed(record)
            }
            Some(expired) => self.run_token_operation(Some(expired.access_token), cancel).await,
            None => self.run_token_operation(None, cancel).await,
        }
    }

    /// Issues the obtain operation, or the refresh operation when the
    /// expired token is supplied as the refresh credential.
    async fn run_token_operation(
        self,
        refresh_token: Option<String>,
        cancel: CancellationToken,
    ) -> OperationOutcome<AccessTokenRecord> {
        #[derive(Serialize)]
        struct TokenRequest<'a> {
            account_number: &'a str,
        }

        let refreshing = refresh_token.is_some();
        let name = if refreshing { "refresh-access-token" } else { "obtain-access-token" };
        let config = self.config.clone();
        let account = self.account.clone();

        let operation = NetworkOperation {
            name,
            cache: Arc::clone(&self.cache),
            transport: Arc::clone(&self.transport),
            factory: Arc::new(
                move |endpoint: &ApiEndpoint, _authorization: Option<&Authorization>| {
                    match &refresh_token {
                        Some(token) => RestRequestBuilder::new(
                            Method::POST,
                            *endpoint,
                            &config,
                            format!("{AUTH_URL_PREFIX}/refresh"),
                        )
                        .authorization(Some(&Authorization::BearerToken(token.clone())))
                        .build(),
                        None => RestRequestBuilder::new(
                            Method::POST,
                            *endpoint,
                            &config,
                            format!("{AUTH_URL_PREFIX}/token"),
                        )
                        .json_body(&TokenRequest { account_number: account.as_str() })?
                        .build(),
                    }
                },
            ),
            authorization_provider: None,
            handler: Arc::new(json_response::<AccessTokenData>),
            strategy: self.strategy,
        };

        match operation.run(cancel).await {
            OperationOutcome::Completed(data) => {
                let record = AccessTokenRecord {
                    account: self.account.clone(),
                    access_token: data.access_token,
                    expiry: data.expiry,
                };
                // Install atomically before completing; later jobs for this
                // account see the new record.
                lock_store(&self.store).insert(self.account.clone(), record.clone());
                info!(
                    account = ?self.account,
                    expiry = %record.expiry,
                    refreshed = refreshing,
                    "installed access token"
                );
                OperationOutcome::Completed(record)
            }
            OperationOutcome::Failed(error) => {
                warn!(account = ?self.account, error = %error, "access token operation failed");
                OperationOutcome::Failed(error)
            }
            OperationOutcome::Cancelled => OperationOutcome::Cancelled,
        }
    }
}

fn lock_store(
    store: &Mutex<HashMap<AccountNumber, AccessTokenRecord>>,
) -> MutexGuard<'_, HashMap<AccountNumber, AccessTokenRecord>> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`AuthorizationProvider`] backed by the token manager; what authorized
/// facades hand to the engine.
pub struct AccessTokenProvider {
    manager: Arc<AccessTokenManager>,
    account: AccountNumber,
    strategy: RetryStrategy,
}

impl AccessTokenProvider {
    pub fn new(
        manager: Arc<AccessTokenManager>,
        account: AccountNumber,
        strategy: RetryStrategy,
    ) -> Self {
        Self { manager, account, strategy }
    }
}

#[async_trait]
impl AuthorizationProvider for AccessTokenProvider {
    async fn get_authorization(&self) -> Result<Authorization, RestError> {
        let operation =
            self.manager.get_authorization(self.account.clone(), self.strategy);
        match operation.wait().await {
            OperationOutcome::Completed(authorization) => Ok(authorization),
            OperationOutcome::Failed(error) => Err(error),
            // The manager queue was torn down underneath us.
            OperationOutcome::Cancelled => Err(RestError::Network(TransportError::new(
                TransportErrorCode::Cancelled,
                "token manager operation cancelled",
            ))),
        }
    }
}
