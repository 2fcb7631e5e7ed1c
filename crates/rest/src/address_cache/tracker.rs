//! Periodic refresh of the address cache
//!
//! The tracker asks the API for its current endpoint fleet once per
//! `update_interval`, backing off to `retry_interval` after a failure.
//! Exactly one timer is armed at any time; starting while running is a
//! no-op and stopping disarms the timer. Hosts with their own background
//! task facility drive [`AddressCacheTracker::run_background_refresh`]
//! instead of the built-in loop.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use veilnet_domain::constants::{ADDRESS_CACHE_RETRY_INTERVAL, ADDRESS_CACHE_UPDATE_INTERVAL};
use veilnet_domain::ApiEndpoint;

use super::{AddressCache, AddressCacheError};
use crate::engine::{OperationOutcome, RestOperation};
use crate::error::RestError;

/// Result of one successful refresh pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    /// The endpoint list was fetched and stored.
    Finished,
    /// The cache was refreshed within `update_interval`; no request was made.
    Throttled,
}

/// Failure of one refresh pass.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("failed to fetch the endpoint list")]
    Fetch(#[source] RestError),

    #[error("failed to store the endpoint list")]
    Store(#[source] AddressCacheError),
}

/// Issues the `api-addrs` operation. Implemented by
/// [`AddressListProxy`](crate::proxy::AddressListProxy); injectable so the
/// tracker can be tested without a transport.
pub trait AddressListFetcher: Send + Sync {
    fn fetch(&self) -> RestOperation<Vec<ApiEndpoint>>;
}

/// Host-provided background task facility. The host is expected to invoke
/// [`AddressCacheTracker::run_background_refresh`] at (or after) the
/// requested time.
pub trait BackgroundTaskScheduler: Send + Sync {
    fn schedule_refresh(&self, at: DateTime<Utc>);
}

/// Timing knobs. Fixed in production; overridable in tests.
#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    pub update_interval: Duration,
    pub retry_interval: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            update_interval: ADDRESS_CACHE_UPDATE_INTERVAL,
            retry_interval: ADDRESS_CACHE_RETRY_INTERVAL,
        }
    }
}

/// Background driver that keeps the address cache fresh.
pub struct AddressCacheTracker {
    context: UpdateContext,
    cancellation_token: CancellationToken,
    task_handle: Arc<AsyncMutex<Option<JoinHandle<()>>>>,
    scheduler: Mutex<Option<Arc<dyn BackgroundTaskScheduler>>>,
}

impl AddressCacheTracker {
    pub fn new(cache: Arc<AddressCache>, fetcher: Arc<dyn AddressListFetcher>) -> Self {
        Self::with_config(cache, fetcher, TrackerConfig::default())
    }

    pub fn with_config(
        cache: Arc<AddressCache>,
        fetcher: Arc<dyn AddressListFetcher>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            context: UpdateContext {
                cache,
                fetcher,
                config,
                last_failure_at: Arc::new(Mutex::new(None)),
            },
            cancellation_token: CancellationToken::new(),
            task_handle: Arc::new(AsyncMutex::new(None)),
            scheduler: Mutex::new(None),
        }
    }

    /// Starts the periodic update loop. A no-op when already running.
    pub async fn start(&mut self) {
        if self.is_running() {
            debug!("address cache tracker already running");
            return;
        }

        // Fresh token so the tracker can be restarted after a stop.
        self.cancellation_token = CancellationToken::new();
        let context = self.context.clone();
        let cancel = self.cancellation_token.clone();

        let handle = tokio::spawn(async move {
            Self::update_loop(context, cancel).await;
        });
        *self.task_handle.lock().await = Some(handle);

        info!("address cache tracker started");
    }

    /// Stops the loop and disarms any armed timer. A no-op when not running.
    pub async fn stop(&mut self) {
        if !self.is_running() {
            return;
        }

        self.cancellation_token.cancel();
        if let Some(handle) = self.task_handle.lock().await.take() {
            if let Err(error) = handle.await {
                warn!(error = %error, "address cache tracker task failed to join");
            }
        }

        info!("address cache tracker stopped");
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .try_lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    /// Runs one ad-hoc refresh outside the periodic schedule.
    pub async fn update(&self) -> OperationOutcome<UpdateStatus, UpdateError> {
        self.context.run_update(&self.cancellation_token).await
    }

    /// The instant the next refresh should fire: `retry_interval` after the
    /// last failure, otherwise `update_interval` after the last successful
    /// update.
    pub fn next_schedule_time(&self) -> DateTime<Utc> {
        self.context.next_schedule_time()
    }

    /// Registers the host scheduler and immediately asks it for the first
    /// background invocation.
    pub fn register_background_task(&self, scheduler: Arc<dyn BackgroundTaskScheduler>) {
        *lock(&self.scheduler) = Some(scheduler);
        self.schedule_background_task();
    }

    /// Asks the registered host scheduler for the next invocation.
    pub fn schedule_background_task(&self) {
        if let Some(scheduler) = lock(&self.scheduler).clone() {
            let at = self.next_schedule_time();
            debug!(at = %at, "scheduling background address cache refresh");
            scheduler.schedule_refresh(at);
        }
    }

    /// Entry point for the host's background task facility: runs a single
    /// update, schedules the next invocation, and returns the outcome for
    /// the host's completion report. Host cancellation maps to `cancel`.
    pub async fn run_background_refresh(
        &self,
        cancel: CancellationToken,
    ) -> OperationOutcome<UpdateStatus, UpdateError> {
        let outcome = self.context.run_update(&cancel).await;
        self.schedule_background_task();
        outcome
    }

    async fn update_loop(context: UpdateContext, cancel: CancellationToken) {
        loop {
            let next_fire = context.next_schedule_time();
            let delay = (next_fire - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            debug!(delay_secs = delay.as_secs(), "armed address cache refresh timer");

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("address cache tracker loop cancelled");
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            // Outcome and failure bookkeeping are handled inside run_update.
            let _outcome = context.run_update(&cancel).await;
        }
    }
}

impl Drop for AddressCacheTracker {
    fn drop(&mut self) {
        if !self.cancellation_token.is_cancelled() {
            self.cancellation_token.cancel();
        }
    }
}

/// State shared between the tracker facade and its background loop.
#[derive(Clone)]
struct UpdateContext {
    cache: Arc<AddressCache>,
    fetcher: Arc<dyn AddressListFetcher>,
    config: TrackerConfig,
    last_failure_at: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl UpdateContext {
    fn next_schedule_time(&self) -> DateTime<Utc> {
        match *lock(&self.last_failure_at) {
            Some(failed_at) => failed_at + to_chrono(self.config.retry_interval),
            None => self.cache.last_update_time() + to_chrono(self.config.update_interval),
        }
    }

    async fn run_update(
        &self,
        cancel: &CancellationToken,
    ) -> OperationOutcome<UpdateStatus, UpdateError> {
        let outcome = self.run_update_inner(cancel).await;
        match &outcome {
            OperationOutcome::Completed(_) => *lock(&self.last_failure_at) = None,
            OperationOutcome::Failed(_) | OperationOutcome::Cancelled => {
                *lock(&self.last_failure_at) = Some(Utc::now());
            }
        }
        outcome
    }

    async fn run_update_inner(
        &self,
        cancel: &CancellationToken,
    ) -> OperationOutcome<UpdateStatus, UpdateError> {
        // Throttle at the source: a recent successful update means no request.
        let age = Utc::now().signed_duration_since(self.cache.last_update_time());
        if age < to_chrono(self.config.update_interval) {
            debug!("address cache was refreshed recently, skipping the request");
            return OperationOutcome::Completed(UpdateStatus::Throttled);
        }

        let operation = self.fetcher.fetch();
        let handle = operation.handle();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                handle.cancel();
                return OperationOutcome::Cancelled;
            }
            outcome = operation.wait() => outcome,
        };

        match outcome {
            OperationOutcome::Completed(endpoints) => {
                match self.cache.replace_endpoints(endpoints) {
                    Ok(()) => {
                        info!("refreshed the API address cache");
                        OperationOutcome::Completed(UpdateStatus::Finished)
                    }
                    Err(error) => {
                        warn!(error = %error, "failed to store the refreshed endpoint list");
                        OperationOutcome::Failed(UpdateError::Store(error))
                    }
                }
            }
            OperationOutcome::Failed(error) => {
                warn!(error = %error, "failed to fetch the API address list");
                OperationOutcome::Failed(UpdateError::Fetch(error))
            }
            OperationOutcome::Cancelled => OperationOutcome::Cancelled,
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::TimeDelta::MAX)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
