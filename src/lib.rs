#![deny(missing_docs)]
//! Transparent hot/cold tiering in front of a DynamoDB-style key-value store.
//!
//! Old records are moved to object storage by [`archival::ArchivalService`]
//! and replaced in the primary store by small pointer records. Reads go
//! through [`hydration::HydrationClient`], which wraps any
//! [`store::KvClient`] and swaps pointers back for their full payloads, so
//! callers see the same records they wrote.

mod observability;

/// Records and typed attribute values.
pub mod record;

/// Gzip framing and attribute JSON encoding of archived payloads.
pub mod codec;

/// Deterministic blob keys.
pub mod key;

/// Pointer detection and blob locators.
pub mod pointer;

/// Bounded retries with backoff.
pub mod retry;

/// Per-item failure policy.
pub mod strategy;

/// Metric events and sinks.
pub mod metrics;

/// Caller-owned executors and the hydration pool.
pub mod executor;

/// Blob-store boundary and implementations.
pub mod blob;

/// Primary-store boundary and an in-memory implementation.
pub mod store;

/// Table descriptors.
pub mod schema;

/// Hydrating read decorator.
pub mod hydration;

/// Archival job.
pub mod archival;

/// Tiering configuration.
pub mod config;

pub use crate::{
    archival::{ArchivalPhase, ArchivalResult, ArchivalService},
    blob::{BlobError, BlobErrorKind, BlobStore},
    config::{ConfigError, TieringConfig},
    hydration::{HydrationClient, HydrationError},
    metrics::{MetricEvent, MetricsSink},
    record::{AttributeValue, Record},
    store::{KvClient, StoreError},
    strategy::ErrorStrategy,
};
