//! Composition root
//!
//! The address cache, transport and token manager are long-lived objects
//! owned by a single [`ApiContext`] and injected into every facade it hands
//! out. Nothing in this crate is a process-wide singleton, so tests can run
//! any number of isolated contexts side by side.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use veilnet_domain::constants::{API_HOSTNAME, API_NETWORK_TIMEOUT, DEFAULT_API_ENDPOINT};
use veilnet_domain::ApiEndpoint;

use crate::access_token::AccessTokenManager;
use crate::address_cache::tracker::{AddressCacheTracker, AddressListFetcher};
use crate::address_cache::AddressCache;
use crate::proxy::{AccountsProxy, AddressListProxy, DevicesProxy, RelaysProxy};
use crate::transport::RestTransport;

/// File name of the persisted endpoint snapshot inside the cache directory.
const ADDRESS_CACHE_FILENAME: &str = "api-addresses.json";

/// Configuration knobs for the REST runtime.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Logical API hostname, sent as the `Host` header on every request.
    pub hostname: String,
    /// Per-request timeout handed to the transport.
    pub network_timeout: Duration,
    /// Built-in fallback endpoint used when neither the on-disk cache nor
    /// the bundled seed can be read.
    pub default_endpoint: ApiEndpoint,
    /// Directory holding the persisted endpoint snapshot.
    pub cache_dir: PathBuf,
    /// The endpoint seed shipped with the application bundle.
    pub bundled_addresses_path: PathBuf,
}

impl ApiConfig {
    pub fn new(cache_dir: impl Into<PathBuf>, bundled_addresses_path: impl Into<PathBuf>) -> Self {
        Self {
            hostname: API_HOSTNAME.to_owned(),
            network_timeout: API_NETWORK_TIMEOUT,
            default_endpoint: DEFAULT_API_ENDPOINT,
            cache_dir: cache_dir.into(),
            bundled_addresses_path: bundled_addresses_path.into(),
        }
    }

    pub fn cache_file_path(&self) -> PathBuf {
        self.cache_dir.join(ADDRESS_CACHE_FILENAME)
    }
}

/// Owner of the runtime's long-lived collaborators.
///
/// Must be constructed inside a tokio runtime: facades and the token manager
/// each spawn a queue worker task.
pub struct ApiContext {
    config: ApiConfig,
    cache: Arc<AddressCache>,
    transport: Arc<dyn RestTransport>,
    token_manager: Arc<AccessTokenManager>,
}

impl ApiContext {
    /// Bootstraps the address cache from disk, seed or default, and wires up
    /// the token manager around the injected transport.
    pub fn new(config: ApiConfig, transport: Arc<dyn RestTransport>) -> Self {
        let cache = Arc::new(AddressCache::open(
            config.cache_file_path(),
            &config.bundled_addresses_path,
            config.default_endpoint,
        ));
        Self::with_address_cache(config, transport, cache)
    }

    /// Builds a context around an existing cache. Tests inject caches opened
    /// with a seeded RNG through this.
    pub fn with_address_cache(
        config: ApiConfig,
        transport: Arc<dyn RestTransport>,
        cache: Arc<AddressCache>,
    ) -> Self {
        let token_manager = Arc::new(AccessTokenManager::new(
            config.clone(),
            Arc::clone(&cache),
            Arc::clone(&transport),
        ));
        Self { config, cache, transport, token_manager }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn address_cache(&self) -> Arc<AddressCache> {
        Arc::clone(&self.cache)
    }

    pub fn access_token_manager(&self) -> Arc<AccessTokenManager> {
        Arc::clone(&self.token_manager)
    }

    pub fn accounts_proxy(&self) -> AccountsProxy {
        AccountsProxy::new(self.core("accounts-proxy"), Arc::clone(&self.token_manager))
    }

    pub fn devices_proxy(&self) -> DevicesProxy {
        DevicesProxy::new(self.core("devices-proxy"), Arc::clone(&self.token_manager))
    }

    pub fn relays_proxy(&self) -> RelaysProxy {
        RelaysProxy::new(self.core("relays-proxy"))
    }

    pub fn address_list_proxy(&self) -> AddressListProxy {
        AddressListProxy::new(self.core("address-list-proxy"))
    }

    /// A tracker wired to this context's cache and address list facade.
    pub fn address_cache_tracker(&self) -> AddressCacheTracker {
        let fetcher: Arc<dyn AddressListFetcher> = Arc::new(self.address_list_proxy());
        AddressCacheTracker::new(Arc::clone(&self.cache), fetcher)
    }

    fn core(&self, name: &'static str) -> crate::proxy::ProxyCore {
        crate::proxy::ProxyCore::new(
            name,
            self.config.clone(),
            Arc::clone(&self.cache),
            Arc::clone(&self.transport),
        )
    }
}
