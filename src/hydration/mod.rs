//! Read-path decorator that swaps pointer records for archived payloads.
//!
//! [`HydrationClient`] wraps any [`KvClient`] and implements the same trait.
//! Reads are delegated unchanged; when the response holds pointer records
//! their payloads are fetched from blob storage and put back in the slots
//! the pointers occupied. Responses without pointers are returned as-is.
//! Writes are never intercepted.

mod hydrator;

use std::sync::Arc;

use async_trait::async_trait;
use hydrator::Hydrator;
use thiserror::Error;

use crate::{
    blob::BlobStore,
    codec::CodecError,
    config::{validate_retry, ConfigError, TieringConfig},
    executor::{Executor, HydrationPool},
    metrics::{MetricsSink, Operation},
    pointer::is_pointer,
    record::Record,
    retry::{RetryConfig, RetryError, RetryPolicy},
    store::{
        BatchGetItemRequest, BatchGetItemResponse, DeleteItemRequest, DeleteItemResponse,
        GetItemRequest, GetItemResponse, ItemResponse, KvClient, PutItemRequest,
        PutItemResponse, QueryRequest, QueryResponse, ScanRequest, ScanResponse, StoreError,
        TransactGetItemsRequest, TransactGetItemsResponse,
    },
    strategy::ErrorStrategy,
};

/// Failure to hydrate a single pointer.
#[derive(Debug, Error)]
pub enum HydrationError {
    /// The sentinel attribute does not hold a usable locator.
    #[error("invalid blob locator `{0}`")]
    InvalidLocator(String),
    /// The blob could not be fetched.
    #[error("failed to fetch `{locator}`: {source}")]
    Fetch {
        /// Locator of the payload.
        locator: String,
        /// Retry outcome, telling exhausted from non-retryable failures.
        #[source]
        source: RetryError,
    },
    /// The blob was fetched but is not a valid payload.
    #[error("malformed payload at `{locator}`: {source}")]
    MalformedPayload {
        /// Locator of the payload.
        locator: String,
        /// Decoding failure.
        #[source]
        source: CodecError,
    },
    /// A pool task ended without reporting its result.
    #[error("hydration worker exited without reporting")]
    Worker,
}

/// [`KvClient`] decorator hydrating pointer records on every read shape.
pub struct HydrationClient<C> {
    inner: C,
    hydrator: Arc<Hydrator>,
}

impl<C> HydrationClient<C> {
    /// Start building a client over `inner` reading payloads from `bucket`.
    pub fn builder(
        inner: C,
        blob: Arc<dyn BlobStore>,
        bucket: impl Into<String>,
    ) -> HydrationClientBuilder<C> {
        HydrationClientBuilder {
            inner,
            blob,
            bucket: bucket.into(),
            retry: RetryConfig::default(),
            strategy: ErrorStrategy::default(),
            metrics: None,
            pool: None,
        }
    }

    /// The wrapped client.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Unwrap the decorated client.
    pub fn into_inner(self) -> C {
        self.inner
    }

    /// Active failure policy.
    pub fn error_strategy(&self) -> ErrorStrategy {
        self.hydrator.strategy
    }

    /// Hydrate a list of records outside of any store call.
    ///
    /// Items dropped by [`ErrorStrategy::SkipFailed`] are left out.
    pub async fn hydrate_records(
        &self,
        items: Vec<Record>,
        operation: Operation,
    ) -> Result<Vec<Record>, HydrationError> {
        Ok(self
            .hydrator
            .hydrate(items, operation)
            .await?
            .into_iter()
            .flatten()
            .collect())
    }
}

impl<C> std::fmt::Debug for HydrationClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HydrationClient")
            .field("bucket", &self.hydrator.bucket)
            .field("strategy", &self.hydrator.strategy)
            .field("pool", &self.hydrator.pool)
            .finish_non_exhaustive()
    }
}

/// Builder for [`HydrationClient`].
pub struct HydrationClientBuilder<C> {
    inner: C,
    blob: Arc<dyn BlobStore>,
    bucket: String,
    retry: RetryConfig,
    strategy: ErrorStrategy,
    metrics: Option<Arc<dyn MetricsSink>>,
    pool: Option<HydrationPool>,
}

impl<C> HydrationClientBuilder<C> {
    /// Builder seeded from a validated [`TieringConfig`].
    ///
    /// A pool is only created when both `executor` and
    /// `hydration.parallelism` are given; otherwise hydration is sequential.
    pub fn from_config(
        inner: C,
        blob: Arc<dyn BlobStore>,
        config: &TieringConfig,
        executor: Option<Arc<dyn Executor>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut builder = HydrationClient::builder(inner, blob, config.blob.bucket_name.clone())
            .error_strategy(config.error_strategy)
            .retry(config.retry.clone());
        if let (Some(executor), Some(parallelism)) = (executor, config.hydration.parallelism) {
            builder = builder.pool(HydrationPool::new(executor, parallelism)?);
        }
        Ok(builder)
    }

    /// Override the failure policy.
    #[must_use]
    pub fn error_strategy(mut self, strategy: ErrorStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Override the retry configuration.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Report metric events to `sink`.
    #[must_use]
    pub fn metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// Hydrate concurrently on a caller-owned pool.
    #[must_use]
    pub fn pool(mut self, pool: HydrationPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Validate and build the client.
    pub fn build(self) -> Result<HydrationClient<C>, ConfigError> {
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::invalid("blob.bucket_name", "must not be empty"));
        }
        validate_retry(&self.retry)?;
        Ok(HydrationClient {
            inner: self.inner,
            hydrator: Arc::new(Hydrator {
                blob: self.blob,
                bucket: self.bucket,
                retry: RetryPolicy::new(self.retry),
                strategy: self.strategy,
                metrics: self.metrics,
                pool: self.pool,
            }),
        })
    }
}

#[async_trait]
impl<C: KvClient> KvClient for HydrationClient<C> {
    async fn get_item(&self, request: GetItemRequest) -> Result<GetItemResponse, StoreError> {
        let response = self.inner.get_item(request).await?;
        if !response.item.as_ref().is_some_and(is_pointer) {
            return Ok(response);
        }

        let item = self
            .hydrator
            .hydrate(response.item.into_iter().collect(), Operation::GetItem)
            .await?
            .into_iter()
            .next()
            .flatten();
        Ok(GetItemResponse { item })
    }

    async fn query(&self, request: QueryRequest) -> Result<QueryResponse, StoreError> {
        let response = self.inner.query(request).await?;
        if !response.items.iter().any(is_pointer) {
            return Ok(response);
        }

        let QueryResponse {
            items,
            last_evaluated_key,
        } = response;
        let items = self
            .hydrator
            .hydrate(items, Operation::Query)
            .await?
            .into_iter()
            .flatten()
            .collect();
        Ok(QueryResponse {
            items,
            last_evaluated_key,
        })
    }

    async fn scan(&self, request: ScanRequest) -> Result<ScanResponse, StoreError> {
        let response = self.inner.scan(request).await?;
        if !response.items.iter().any(is_pointer) {
            return Ok(response);
        }

        let ScanResponse {
            items,
            last_evaluated_key,
        } = response;
        let items = self
            .hydrator
            .hydrate(items, Operation::Scan)
            .await?
            .into_iter()
            .flatten()
            .collect();
        Ok(ScanResponse {
            items,
            last_evaluated_key,
        })
    }

    async fn batch_get_item(
        &self,
        request: BatchGetItemRequest,
    ) -> Result<BatchGetItemResponse, StoreError> {
        let response = self.inner.batch_get_item(request).await?;
        if !response.responses.values().flatten().any(is_pointer) {
            return Ok(response);
        }

        // All tables go through one pass; per-table runs are split back out
        // by length afterwards.
        let BatchGetItemResponse {
            responses,
            unprocessed_keys,
        } = response;
        let mut runs = Vec::with_capacity(responses.len());
        let mut items = Vec::new();
        for (table_name, records) in responses {
            runs.push((table_name, records.len()));
            items.extend(records);
        }
        let mut hydrated = self
            .hydrator
            .hydrate(items, Operation::BatchGetItem)
            .await?
            .into_iter();
        let responses = runs
            .into_iter()
            .map(|(table_name, len)| {
                let records = hydrated.by_ref().take(len).flatten().collect();
                (table_name, records)
            })
            .collect();
        Ok(BatchGetItemResponse {
            responses,
            unprocessed_keys,
        })
    }

    async fn transact_get_items(
        &self,
        request: TransactGetItemsRequest,
    ) -> Result<TransactGetItemsResponse, StoreError> {
        let response = self.inner.transact_get_items(request).await?;
        if !response
            .responses
            .iter()
            .filter_map(|slot| slot.item.as_ref())
            .any(is_pointer)
        {
            return Ok(response);
        }

        let present = response
            .responses
            .iter()
            .map(|slot| slot.item.is_some())
            .collect::<Vec<_>>();
        let items = response
            .responses
            .into_iter()
            .filter_map(|slot| slot.item)
            .collect();
        let mut hydrated = self
            .hydrator
            .hydrate(items, Operation::TransactGetItems)
            .await?
            .into_iter();
        let responses = present
            .into_iter()
            .map(|present| ItemResponse {
                item: if present { hydrated.next().flatten() } else { None },
            })
            .collect();
        Ok(TransactGetItemsResponse { responses })
    }

    async fn put_item(&self, request: PutItemRequest) -> Result<PutItemResponse, StoreError> {
        self.inner.put_item(request).await
    }

    async fn delete_item(
        &self,
        request: DeleteItemRequest,
    ) -> Result<DeleteItemResponse, StoreError> {
        self.inner.delete_item(request).await
    }
}
