use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use super::HydrationError;
use crate::{
    blob::BlobStore,
    codec,
    config::duration_ms,
    executor::HydrationPool,
    metrics::{MetricEvent, MetricsSink, Operation},
    observability::{log_debug, log_error, log_warn},
    pointer::{is_pointer, BlobLocator, POINTER_ATTRIBUTE},
    record::{AttributeValue, Record},
    retry::{RetryAttempt, RetryPolicy},
    strategy::{ErrorStrategy, HydrationOutcome},
};

type Fetched = (Result<Record, HydrationError>, Duration);

/// Shared state behind a hydration client. Cloned into pool jobs via `Arc`.
pub(crate) struct Hydrator {
    pub(crate) blob: Arc<dyn BlobStore>,
    pub(crate) bucket: String,
    pub(crate) retry: RetryPolicy,
    pub(crate) strategy: ErrorStrategy,
    pub(crate) metrics: Option<Arc<dyn MetricsSink>>,
    pub(crate) pool: Option<HydrationPool>,
}

impl Hydrator {
    /// Hydrate every pointer in `items`, keeping slot positions.
    ///
    /// A `None` slot is an item dropped by [`ErrorStrategy::SkipFailed`].
    pub(crate) async fn hydrate(
        self: &Arc<Self>,
        items: Vec<Record>,
        operation: Operation,
    ) -> Result<Vec<Option<Record>>, HydrationError> {
        let mut slots = Vec::with_capacity(items.len());
        let mut pointer_slots = Vec::new();
        let mut pointers = Vec::new();
        for (slot, item) in items.into_iter().enumerate() {
            if is_pointer(&item) {
                pointer_slots.push(slot);
                pointers.push(item);
                slots.push(None);
            } else {
                slots.push(Some(item));
            }
        }
        if pointers.is_empty() {
            return Ok(slots);
        }

        log_debug!(
            component = "hydration",
            event = "hydration_batch_start",
            operation = %operation,
            items = slots.len(),
            pointers = pointers.len(),
            pooled = self.pool.is_some(),
        );

        let item_count = pointers.len();
        let mut success_count = 0;
        match &self.pool {
            None => {
                for (slot, pointer) in pointer_slots.into_iter().zip(pointers) {
                    let fetched = self.fetch_timed(&pointer, operation).await;
                    success_count += usize::from(fetched.0.is_ok());
                    slots[slot] = self.settle(pointer, fetched, operation)?;
                }
            }
            Some(pool) => {
                let jobs = pointers
                    .into_iter()
                    .map(|pointer| {
                        let hydrator = Arc::clone(self);
                        async move {
                            let fetched = hydrator.fetch_timed(&pointer, operation).await;
                            (pointer, fetched)
                        }
                    })
                    .collect::<Vec<_>>();
                let results = pool.spawn_indexed(jobs);
                for _ in 0..item_count {
                    let (index, (pointer, fetched)) = results
                        .recv_async()
                        .await
                        .map_err(|_| HydrationError::Worker)?;
                    success_count += usize::from(fetched.0.is_ok());
                    slots[pointer_slots[index]] = self.settle(pointer, fetched, operation)?;
                }
            }
        }

        self.emit(MetricEvent::BatchComplete {
            operation,
            item_count,
            success_count,
        });
        Ok(slots)
    }

    /// Apply the error strategy to one fetched pointer.
    fn settle(
        &self,
        pointer: Record,
        (result, latency): Fetched,
        operation: Operation,
    ) -> Result<Option<Record>, HydrationError> {
        self.emit(MetricEvent::Hydration {
            operation,
            success: result.is_ok(),
            latency_ms: duration_ms::as_millis(latency),
        });
        if let Err(err) = &result {
            log_warn!(
                component = "hydration",
                event = "hydration_failed",
                operation = %operation,
                strategy = ?self.strategy,
                error = %err,
            );
        }

        match self.strategy.resolve(pointer, result) {
            HydrationOutcome::Hydrated(record) | HydrationOutcome::FellBackToPointer(record) => {
                Ok(Some(record))
            }
            HydrationOutcome::Dropped => Ok(None),
            HydrationOutcome::Failed(err) => {
                log_error!(
                    component = "hydration",
                    event = "hydration_fail_fast",
                    operation = %operation,
                    error = %err,
                );
                Err(err)
            }
        }
    }

    async fn fetch_timed(&self, pointer: &Record, operation: Operation) -> Fetched {
        let started = Instant::now();
        let result = self.fetch(pointer, operation).await;
        (result, started.elapsed())
    }

    async fn fetch(&self, pointer: &Record, operation: Operation) -> Result<Record, HydrationError> {
        let locator = BlobLocator::of(pointer).ok_or_else(|| {
            HydrationError::InvalidLocator(
                pointer
                    .get(POINTER_ATTRIBUTE)
                    .and_then(AttributeValue::as_s)
                    .unwrap_or_default()
                    .to_string(),
            )
        })?;
        let (bucket, key) = locator.resolve(&self.bucket);

        let body = self
            .retry
            .run(
                || self.blob.get(bucket, key),
                |attempt| self.observe_retry(operation, attempt),
            )
            .await
            .map_err(|source| HydrationError::Fetch {
                locator: locator.to_string(),
                source,
            })?;

        let mut record =
            codec::decode_payload(&body).map_err(|source| HydrationError::MalformedPayload {
                locator: locator.to_string(),
                source,
            })?;
        record.remove(POINTER_ATTRIBUTE);
        Ok(record)
    }

    fn observe_retry(&self, operation: Operation, attempt: RetryAttempt) {
        self.emit(MetricEvent::RetryAttempt {
            operation,
            attempt: attempt.attempt,
            delay_ms: duration_ms::as_millis(attempt.delay),
            succeeded: attempt.succeeded,
        });
    }

    fn emit(&self, event: MetricEvent) {
        if let Some(metrics) = &self.metrics {
            metrics.record(event);
        }
    }
}
