//! Primary-store boundary.
//!
//! [`KvClient`] mirrors the read and write shapes of a DynamoDB-style
//! store. The hydration decorator and the archival job both talk to the
//! store only through this trait.

mod memory;

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
pub use memory::MemoryKvClient;
use thiserror::Error;

use crate::{
    hydration::HydrationError,
    record::{AttributeValue, Record},
};

/// Errors surfaced by a [`KvClient`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The named table does not exist.
    #[error("table `{0}` not found")]
    TableNotFound(String),
    /// A conditional write found the item in an unexpected state.
    #[error("conditional check failed on table `{table_name}`")]
    ConditionalCheckFailed {
        /// Table written to.
        table_name: String,
    },
    /// The request is malformed for the target table.
    #[error("invalid request: {0}")]
    Validation(String),
    /// A pointer could not be hydrated under the fail-fast strategy.
    #[error("hydration failed: {0}")]
    Hydration(#[from] HydrationError),
}

/// Single-key read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetItemRequest {
    /// Table to read.
    pub table_name: String,
    /// Primary key attributes.
    pub key: Record,
}

impl GetItemRequest {
    /// Read `key` from `table_name`.
    pub fn new(table_name: impl Into<String>, key: Record) -> Self {
        Self {
            table_name: table_name.into(),
            key,
        }
    }
}

/// Response of a single-key read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetItemResponse {
    /// The item, when present.
    pub item: Option<Record>,
}

/// Range query over one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    /// Table to read.
    pub table_name: String,
    /// Partition key value every returned item shares.
    pub partition_value: AttributeValue,
    /// Page size.
    pub limit: Option<usize>,
    /// Resume after this key.
    pub exclusive_start_key: Option<Record>,
}

impl QueryRequest {
    /// Query the partition `partition_value` of `table_name`.
    pub fn new(table_name: impl Into<String>, partition_value: AttributeValue) -> Self {
        Self {
            table_name: table_name.into(),
            partition_value,
            limit: None,
            exclusive_start_key: None,
        }
    }

    /// Cap the page size.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Continue from a previous page.
    #[must_use]
    pub fn exclusive_start_key(mut self, key: Option<Record>) -> Self {
        self.exclusive_start_key = key;
        self
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResponse {
    /// Items in key order.
    pub items: Vec<Record>,
    /// Continuation key when more items remain.
    pub last_evaluated_key: Option<Record>,
}

/// Full-table scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    /// Table to read.
    pub table_name: String,
    /// Page size.
    pub limit: Option<usize>,
    /// Resume after this key.
    pub exclusive_start_key: Option<Record>,
}

impl ScanRequest {
    /// Scan `table_name` from the beginning.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            limit: None,
            exclusive_start_key: None,
        }
    }

    /// Cap the page size.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Continue from a previous page.
    #[must_use]
    pub fn exclusive_start_key(mut self, key: Option<Record>) -> Self {
        self.exclusive_start_key = key;
        self
    }
}

/// One page of scan results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResponse {
    /// Items in key order.
    pub items: Vec<Record>,
    /// Continuation key when more items remain.
    pub last_evaluated_key: Option<Record>,
}

/// Multi-key read across tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchGetItemRequest {
    /// Keys to read, per table.
    pub request_items: BTreeMap<String, Vec<Record>>,
}

impl BatchGetItemRequest {
    /// Add `keys` for `table_name`.
    #[must_use]
    pub fn table(mut self, table_name: impl Into<String>, keys: Vec<Record>) -> Self {
        self.request_items
            .entry(table_name.into())
            .or_default()
            .extend(keys);
        self
    }
}

/// Response of a multi-key read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchGetItemResponse {
    /// Items found, per table, in request order.
    pub responses: BTreeMap<String, Vec<Record>>,
    /// Keys the store did not get to.
    pub unprocessed_keys: BTreeMap<String, Vec<Record>>,
}

/// One key of a transactional read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactGetItem {
    /// Table to read.
    pub table_name: String,
    /// Primary key attributes.
    pub key: Record,
}

/// All-or-nothing multi-key read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactGetItemsRequest {
    /// Keys to read, in order.
    pub items: Vec<TransactGetItem>,
}

impl TransactGetItemsRequest {
    /// Append a key.
    #[must_use]
    pub fn item(mut self, table_name: impl Into<String>, key: Record) -> Self {
        self.items.push(TransactGetItem {
            table_name: table_name.into(),
            key,
        });
        self
    }
}

/// Slot of a transactional read response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemResponse {
    /// The item, when present.
    pub item: Option<Record>,
}

/// Response of a transactional read, one slot per requested key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactGetItemsResponse {
    /// Slots in request order.
    pub responses: Vec<ItemResponse>,
}

/// Precondition for a put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutCondition {
    /// The stored item must exist and hold `value` under `name`.
    AttributeEquals {
        /// Attribute checked.
        name: String,
        /// Expected value.
        value: AttributeValue,
    },
}

/// Full replacement of an item by key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutItemRequest {
    /// Table written to.
    pub table_name: String,
    /// New item, key attributes included.
    pub item: Record,
    /// Optional precondition.
    pub condition: Option<PutCondition>,
}

impl PutItemRequest {
    /// Unconditional put.
    pub fn new(table_name: impl Into<String>, item: Record) -> Self {
        Self {
            table_name: table_name.into(),
            item,
            condition: None,
        }
    }

    /// Attach a precondition.
    #[must_use]
    pub fn condition(mut self, condition: PutCondition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// Acknowledgement of a put.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutItemResponse {}

/// Delete by key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteItemRequest {
    /// Table written to.
    pub table_name: String,
    /// Primary key attributes.
    pub key: Record,
}

impl DeleteItemRequest {
    /// Delete `key` from `table_name`.
    pub fn new(table_name: impl Into<String>, key: Record) -> Self {
        Self {
            table_name: table_name.into(),
            key,
        }
    }
}

/// Acknowledgement of a delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteItemResponse {}

/// Client of the primary key-value store.
#[async_trait]
pub trait KvClient: Send + Sync {
    /// Read one item by key.
    async fn get_item(&self, request: GetItemRequest) -> Result<GetItemResponse, StoreError>;

    /// Read one page of a partition.
    async fn query(&self, request: QueryRequest) -> Result<QueryResponse, StoreError>;

    /// Read one page of a table.
    async fn scan(&self, request: ScanRequest) -> Result<ScanResponse, StoreError>;

    /// Read many items by key.
    async fn batch_get_item(
        &self,
        request: BatchGetItemRequest,
    ) -> Result<BatchGetItemResponse, StoreError>;

    /// Read many items by key in one transaction.
    async fn transact_get_items(
        &self,
        request: TransactGetItemsRequest,
    ) -> Result<TransactGetItemsResponse, StoreError>;

    /// Replace an item by key.
    async fn put_item(&self, request: PutItemRequest) -> Result<PutItemResponse, StoreError>;

    /// Delete an item by key.
    async fn delete_item(&self, request: DeleteItemRequest)
        -> Result<DeleteItemResponse, StoreError>;
}

#[async_trait]
impl<T: KvClient + ?Sized> KvClient for Arc<T> {
    async fn get_item(&self, request: GetItemRequest) -> Result<GetItemResponse, StoreError> {
        (**self).get_item(request).await
    }

    async fn query(&self, request: QueryRequest) -> Result<QueryResponse, StoreError> {
        (**self).query(request).await
    }

    async fn scan(&self, request: ScanRequest) -> Result<ScanResponse, StoreError> {
        (**self).scan(request).await
    }

    async fn batch_get_item(
        &self,
        request: BatchGetItemRequest,
    ) -> Result<BatchGetItemResponse, StoreError> {
        (**self).batch_get_item(request).await
    }

    async fn transact_get_items(
        &self,
        request: TransactGetItemsRequest,
    ) -> Result<TransactGetItemsResponse, StoreError> {
        (**self).transact_get_items(request).await
    }

    async fn put_item(&self, request: PutItemRequest) -> Result<PutItemResponse, StoreError> {
        (**self).put_item(request).await
    }

    async fn delete_item(
        &self,
        request: DeleteItemRequest,
    ) -> Result<DeleteItemResponse, StoreError> {
        (**self).delete_item(request).await
    }
}
