//! Persistent ordered pool of API endpoints
//!
//! The cache holds a non-empty ordered endpoint list: the head is the
//! endpoint used by new requests, and endpoints that failed most recently sit
//! at the tail. The operation engine reports transport failures through
//! [`AddressCache::rotate_after_failure`]; the tracker replaces the whole
//! list from the API through [`AddressCache::replace_endpoints`]. Every
//! mutation is persisted atomically before it becomes observable.

mod store;
pub mod tracker;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info, warn};
use veilnet_domain::ApiEndpoint;

pub use store::AddressCacheError;
use store::StoredEndpoints;

/// Provenance of the current snapshot. Used for logging and for deciding
/// whether the bootstrap needs to re-persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Disk,
    Bundle,
    Default,
}

impl std::fmt::Display for CacheSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disk => "disk",
            Self::Bundle => "bundle",
            Self::Default => "default",
        };
        f.write_str(name)
    }
}

struct CacheState {
    updated_at: DateTime<Utc>,
    /// Invariant: never empty while observable.
    endpoints: Vec<ApiEndpoint>,
    source: CacheSource,
    rng: StdRng,
}

/// Priority-ordered pool of candidate API endpoints with atomic persistence.
///
/// All state sits behind one mutex; read paths copy out the head, write paths
/// hold the lock across persistence so concurrent readers never observe a
/// torn snapshot.
pub struct AddressCache {
    state: Mutex<CacheState>,
    cache_path: PathBuf,
}

impl AddressCache {
    /// Bootstraps the cache, degrading disk -> bundled seed -> built-in
    /// default. Never fails.
    pub fn open(cache_path: PathBuf, bundle_path: &Path, default_endpoint: ApiEndpoint) -> Self {
        Self::open_with_rng(cache_path, bundle_path, default_endpoint, StdRng::from_entropy())
    }

    /// Like [`AddressCache::open`] with an injected RNG, so that shuffle
    /// order is reproducible in tests.
    pub fn open_with_rng(
        cache_path: PathBuf,
        bundle_path: &Path,
        default_endpoint: ApiEndpoint,
        mut rng: StdRng,
    ) -> Self {
        let state = match store::load(&cache_path) {
            Ok(stored) if !stored.endpoints.is_empty() => {
                info!(
                    source = %CacheSource::Disk,
                    count = stored.endpoints.len(),
                    "loaded address cache"
                );
                CacheState {
                    updated_at: stored.updated_at,
                    endpoints: stored.endpoints,
                    source: CacheSource::Disk,
                    rng,
                }
            }
            Ok(_) => {
                warn!("address cache file contains no endpoints, falling back to bundle");
                Self::from_bundle(&cache_path, bundle_path, default_endpoint, &mut rng)
            }
            Err(error) => {
                warn!(error = %error, "failed to load address cache, falling back to bundle");
                Self::from_bundle(&cache_path, bundle_path, default_endpoint, &mut rng)
            }
        };

        Self { state: Mutex::new(state), cache_path }
    }

    fn from_bundle(
        cache_path: &Path,
        bundle_path: &Path,
        default_endpoint: ApiEndpoint,
        rng: &mut StdRng,
    ) -> CacheState {
        match store::load_bundled(bundle_path) {
            Ok(mut endpoints) if !endpoints.is_empty() => {
                endpoints.shuffle(rng);
                let snapshot =
                    StoredEndpoints { updated_at: DateTime::UNIX_EPOCH, endpoints };
                // Persist failure here is logged but not fatal; the seed is
                // still usable in memory.
                if let Err(error) = store::store(cache_path, &snapshot) {
                    warn!(error = %error, "failed to persist bundled endpoint seed");
                }
                info!(
                    source = %CacheSource::Bundle,
                    count = snapshot.endpoints.len(),
                    "adopted bundled endpoint seed"
                );
                CacheState {
                    updated_at: snapshot.updated_at,
                    endpoints: snapshot.endpoints,
                    source: CacheSource::Bundle,
                    rng: rng.clone(),
                }
            }
            Ok(_) => {
                warn!("bundled endpoint seed is empty, using the built-in default endpoint");
                Self::default_state(default_endpoint, rng.clone())
            }
            Err(error) => {
                warn!(
                    error = %error,
                    "failed to load bundled endpoint seed, using the built-in default endpoint"
                );
                Self::default_state(default_endpoint, rng.clone())
            }
        }
    }

    fn default_state(default_endpoint: ApiEndpoint, rng: StdRng) -> CacheState {
        CacheState {
            updated_at: DateTime::UNIX_EPOCH,
            endpoints: vec![default_endpoint],
            source: CacheSource::Default,
            rng,
        }
    }

    /// The endpoint new requests should use. Never blocks beyond copying the
    /// head out of the critical section.
    pub fn current_endpoint(&self) -> ApiEndpoint {
        self.lock().endpoints[0]
    }

    /// Wall-clock time of the last successful refresh; `UNIX_EPOCH` if the
    /// list has never been refreshed from the API.
    pub fn last_update_time(&self) -> DateTime<Utc> {
        self.lock().updated_at
    }

    /// Provenance of the current snapshot.
    pub fn source(&self) -> CacheSource {
        self.lock().source
    }

    /// Moves the failed endpoint to the tail and returns the new head.
    ///
    /// Idempotent under concurrent retries: when `failed` is no longer the
    /// head (a concurrent caller already rotated past it), the state is left
    /// unchanged and the current head is returned.
    pub fn rotate_after_failure(&self, failed: &ApiEndpoint) -> ApiEndpoint {
        let mut state = self.lock();
        if state.endpoints[0] != *failed {
            return state.endpoints[0];
        }

        state.endpoints.rotate_left(1);
        let next = state.endpoints[0];
        debug!(failed = %failed, next = %next, "rotated to the next API endpoint");

        // Keep the rotated order in memory even if the write fails; rotation
        // must never block failover.
        if let Err(error) = self.persist(&state) {
            warn!(error = %error, "failed to persist address cache after rotation");
        }
        next
    }

    /// Installs a freshly fetched endpoint list.
    ///
    /// Rejects empty lists. When the endpoint set is unchanged only
    /// `updated_at` is bumped; otherwise the list is shuffled uniformly and
    /// the previously-current endpoint is pinned back to the head if it is
    /// still present. Both memory and `updated_at` are committed only after
    /// the atomic write succeeds.
    pub fn replace_endpoints(
        &self,
        new_endpoints: Vec<ApiEndpoint>,
    ) -> Result<(), AddressCacheError> {
        if new_endpoints.is_empty() {
            return Err(AddressCacheError::EmptyAddressList);
        }

        let mut state = self.lock();
        let now = Utc::now();

        let current: HashSet<ApiEndpoint> = state.endpoints.iter().copied().collect();
        let incoming: HashSet<ApiEndpoint> = new_endpoints.iter().copied().collect();
        if current == incoming {
            let snapshot =
                StoredEndpoints { updated_at: now, endpoints: state.endpoints.clone() };
            store::store(&self.cache_path, &snapshot)?;
            state.updated_at = now;
            debug!("endpoint list unchanged, bumped the refresh timestamp");
            return Ok(());
        }

        let mut next: Vec<ApiEndpoint> = Vec::with_capacity(new_endpoints.len());
        let mut seen = HashSet::new();
        for endpoint in new_endpoints {
            if seen.insert(endpoint) {
                next.push(endpoint);
            }
        }

        let previous = state.endpoints[0];
        next.shuffle(&mut state.rng);
        if let Some(position) = next.iter().position(|endpoint| *endpoint == previous) {
            next.swap(0, position);
        }

        let snapshot = StoredEndpoints { updated_at: now, endpoints: next };
        store::store(&self.cache_path, &snapshot)?;

        info!(count = snapshot.endpoints.len(), "replaced the API endpoint list");
        state.endpoints = snapshot.endpoints;
        state.updated_at = now;
        Ok(())
    }

    fn persist(&self, state: &CacheState) -> Result<(), AddressCacheError> {
        let snapshot =
            StoredEndpoints { updated_at: state.updated_at, endpoints: state.endpoints.clone() };
        store::store(&self.cache_path, &snapshot)
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
