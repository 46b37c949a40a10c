//! Metric events emitted by the read path.
//!
//! Sinks are injected; nothing is recorded unless one is configured.

use std::{fmt, sync::Arc};

use parking_lot::Mutex;

/// Read shape that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Single-key get.
    GetItem,
    /// Range query.
    Query,
    /// Full scan.
    Scan,
    /// Multi-key batch get.
    BatchGetItem,
    /// Multi-key transactional get.
    TransactGetItems,
}

impl Operation {
    /// Stable name used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::GetItem => "GetItem",
            Operation::Query => "Query",
            Operation::Scan => "Scan",
            Operation::BatchGetItem => "BatchGetItem",
            Operation::TransactGetItems => "TransactGetItems",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single metric observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricEvent {
    /// One pointer hydration finished.
    Hydration {
        /// Read shape.
        operation: Operation,
        /// Whether the payload was hydrated.
        success: bool,
        /// Wall time spent on this pointer, retries included.
        latency_ms: u64,
    },
    /// A read call that contained pointers completed.
    BatchComplete {
        /// Read shape.
        operation: Operation,
        /// Pointers processed.
        item_count: usize,
        /// Pointers hydrated successfully.
        success_count: usize,
    },
    /// One blob fetch attempt.
    RetryAttempt {
        /// Read shape.
        operation: Operation,
        /// 1-based attempt number.
        attempt: u32,
        /// Delay scheduled after this attempt.
        delay_ms: u64,
        /// Whether this attempt succeeded.
        succeeded: bool,
    },
}

/// Receiver of metric events. Called concurrently from hydration workers.
pub trait MetricsSink: Send + Sync {
    /// Record one event.
    fn record(&self, event: MetricEvent);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetrics;

impl MetricsSink for NoOpMetrics {
    fn record(&self, _event: MetricEvent) {}
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct CountingMetrics {
    events: Mutex<Vec<MetricEvent>>,
}

impl CountingMetrics {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every recorded event, in arrival order.
    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().clone()
    }

    /// Forget all recorded events.
    pub fn reset(&self) {
        self.events.lock().clear();
    }

    /// Number of `Hydration` events.
    pub fn hydration_count(&self) -> usize {
        self.count(|event| matches!(event, MetricEvent::Hydration { .. }))
    }

    /// Number of successful `Hydration` events.
    pub fn success_count(&self) -> usize {
        self.count(|event| matches!(event, MetricEvent::Hydration { success: true, .. }))
    }

    /// Number of failed `Hydration` events.
    pub fn failure_count(&self) -> usize {
        self.count(|event| matches!(event, MetricEvent::Hydration { success: false, .. }))
    }

    /// Number of `BatchComplete` events.
    pub fn batch_count(&self) -> usize {
        self.count(|event| matches!(event, MetricEvent::BatchComplete { .. }))
    }

    /// Number of `RetryAttempt` events.
    pub fn retry_attempt_count(&self) -> usize {
        self.count(|event| matches!(event, MetricEvent::RetryAttempt { .. }))
    }

    fn count(&self, predicate: impl Fn(&MetricEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|event| predicate(event)).count()
    }
}

impl MetricsSink for CountingMetrics {
    fn record(&self, event: MetricEvent) {
        self.events.lock().push(event);
    }
}

/// Forwards to an inner sink only while a predicate holds.
pub struct ConditionalMetrics {
    inner: Arc<dyn MetricsSink>,
    enabled: Box<dyn Fn() -> bool + Send + Sync>,
}

impl ConditionalMetrics {
    /// Gate `inner` behind `enabled`, evaluated on every event.
    pub fn new(
        inner: Arc<dyn MetricsSink>,
        enabled: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner,
            enabled: Box::new(enabled),
        }
    }
}

impl fmt::Debug for ConditionalMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalMetrics").finish_non_exhaustive()
    }
}

impl MetricsSink for ConditionalMetrics {
    fn record(&self, event: MetricEvent) {
        if (self.enabled)() {
            self.inner.record(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        thread,
    };

    use super::*;

    fn hydration(success: bool) -> MetricEvent {
        MetricEvent::Hydration {
            operation: Operation::Query,
            success,
            latency_ms: 3,
        }
    }

    #[test]
    fn counting_sink_is_safe_across_threads() {
        let sink = Arc::new(CountingMetrics::new());
        let handles = (0..8)
            .map(|i| {
                let sink = Arc::clone(&sink);
                thread::spawn(move || {
                    for _ in 0..100 {
                        sink.record(hydration(i % 2 == 0));
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().expect("worker");
        }

        assert_eq!(sink.hydration_count(), 800);
        assert_eq!(sink.success_count(), 400);
        assert_eq!(sink.failure_count(), 400);
        sink.reset();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn conditional_sink_respects_toggle() {
        let inner = Arc::new(CountingMetrics::new());
        let enabled = Arc::new(AtomicBool::new(false));
        let gate = Arc::clone(&enabled);
        let sink = ConditionalMetrics::new(inner.clone(), move || gate.load(Ordering::Relaxed));

        sink.record(hydration(true));
        enabled.store(true, Ordering::Relaxed);
        sink.record(hydration(false));
        NoOpMetrics.record(hydration(true));

        assert_eq!(inner.events(), vec![hydration(false)]);
    }

    #[test]
    fn operation_names_are_stable() {
        assert_eq!(Operation::BatchGetItem.to_string(), "BatchGetItem");
        assert_eq!(Operation::TransactGetItems.as_str(), "TransactGetItems");
    }
}
