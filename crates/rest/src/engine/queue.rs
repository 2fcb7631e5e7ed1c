//! Serialized operation queue
//!
//! Each facade owns one queue. A single worker task drains jobs strictly in
//! submission order and never overlaps them, which is what gives a facade its
//! serial execution guarantee (`max_concurrent = 1`). Cross-facade queues run
//! independently and may interleave.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{OperationHandle, OperationOutcome, RestOperation};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// FIFO queue executing at most one operation at a time.
///
/// Requires a running tokio runtime; the worker task lives until every clone
/// of the queue has been dropped.
#[derive(Clone)]
pub struct OperationQueue {
    name: &'static str,
    jobs: mpsc::UnboundedSender<Job>,
}

impl OperationQueue {
    pub fn new(name: &'static str) -> Self {
        let (jobs, mut pending) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = pending.recv().await {
                job.await;
            }
            debug!(queue = name, "operation queue worker stopped");
        });
        Self { name, jobs }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Enqueues `run` as the next job and returns the caller-facing
    /// operation. The job observes its cancellation token; a job cancelled
    /// while still queued completes with `Cancelled` without running.
    pub(crate) fn spawn<T, E, F, Fut>(&self, run: F) -> RestOperation<T, E>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = OperationOutcome<T, E>> + Send + 'static,
    {
        let token = CancellationToken::new();
        let job_token = token.clone();
        let (completion, outcome) = oneshot::channel();

        let job: Job = Box::pin(async move {
            let result = if job_token.is_cancelled() {
                OperationOutcome::Cancelled
            } else {
                run(job_token).await
            };
            // The caller may have dropped its end; completion is best effort.
            let _ = completion.send(result);
        });

        if self.jobs.send(job).is_err() {
            // Worker is gone (runtime shutdown); the dangling receiver makes
            // the operation resolve as cancelled.
            warn!(queue = self.name, "operation submitted to a stopped queue");
        }

        RestOperation::new(OperationHandle::new(token), outcome)
    }
}
