//! Caller-owned execution for parallel hydration.
//!
//! The tiering layer never creates its own runtime or thread pool. Callers
//! hand in an [`Executor`] and the [`HydrationPool`] only submits work to it.

/// Executor backed by a tokio runtime handle.
#[cfg(feature = "tokio")]
pub mod tokio;

use std::{future::Future, sync::Arc};

use async_lock::Semaphore;
use futures_util::future::BoxFuture;

use crate::config::ConfigError;

/// Spawns detached tasks on a caller-owned runtime.
pub trait Executor: Send + Sync + 'static {
    /// Run `future` to completion in the background.
    fn spawn(&self, future: BoxFuture<'static, ()>);
}

/// Bounded fan-out over a shared [`Executor`].
///
/// The permit count is shared by every call that uses the same pool, so
/// `parallelism` bounds concurrent hydrations across the whole client.
#[derive(Clone)]
pub struct HydrationPool {
    executor: Arc<dyn Executor>,
    permits: Arc<Semaphore>,
    parallelism: usize,
}

impl HydrationPool {
    /// Pool running at most `parallelism` jobs at once on `executor`.
    pub fn new(executor: Arc<dyn Executor>, parallelism: usize) -> Result<Self, ConfigError> {
        if parallelism == 0 {
            return Err(ConfigError::invalid(
                "hydration.parallelism",
                "must be positive",
            ));
        }
        Ok(Self {
            executor,
            permits: Arc::new(Semaphore::new(parallelism)),
            parallelism,
        })
    }

    /// Maximum number of concurrently running jobs.
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Spawn every job and stream back `(index, output)` pairs as they finish.
    ///
    /// Completion order is arbitrary; the index identifies the job. Outputs
    /// of jobs finishing after the receiver is dropped are discarded.
    pub(crate) fn spawn_indexed<T, F>(&self, jobs: Vec<F>) -> flume::Receiver<(usize, T)>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = flume::unbounded();
        for (index, job) in jobs.into_iter().enumerate() {
            let permits = Arc::clone(&self.permits);
            let tx = tx.clone();
            self.executor.spawn(Box::pin(async move {
                let _permit = permits.acquire_arc().await;
                let output = job.await;
                let _ = tx.send((index, output));
            }));
        }
        rx
    }
}

impl std::fmt::Debug for HydrationPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HydrationPool")
            .field("parallelism", &self.parallelism)
            .finish_non_exhaustive()
    }
}
