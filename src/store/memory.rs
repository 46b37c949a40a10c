use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use parking_lot::RwLock;

use super::{
    BatchGetItemRequest, BatchGetItemResponse, DeleteItemRequest, DeleteItemResponse,
    GetItemRequest, GetItemResponse, ItemResponse, KvClient, PutCondition, PutItemRequest,
    PutItemResponse, QueryRequest, QueryResponse, ScanRequest, ScanResponse, StoreError,
    TransactGetItemsRequest, TransactGetItemsResponse,
};
use crate::{
    key::KeySchema,
    record::{AttributeValue, Record},
    schema::Catalog,
};

type OrderKey = (String, String);

struct MemoryTable {
    key: KeySchema,
    items: BTreeMap<OrderKey, Record>,
}

impl MemoryTable {
    fn order_key(&self, table_name: &str, record: &Record) -> Result<OrderKey, StoreError> {
        let part = |name: &str| -> Result<String, StoreError> {
            match record.get(name) {
                Some(AttributeValue::S(value)) | Some(AttributeValue::N(value)) => {
                    Ok(value.clone())
                }
                Some(AttributeValue::B(bytes)) => Ok(STANDARD.encode(bytes)),
                Some(other) => Err(StoreError::Validation(format!(
                    "key attribute `{name}` of `{table_name}` has kind {}",
                    other.kind()
                ))),
                None => Err(StoreError::Validation(format!(
                    "missing key attribute `{name}` for `{table_name}`"
                ))),
            }
        };
        let partition = part(&self.key.partition_key)?;
        let sort = match &self.key.sort_key {
            Some(name) => part(name)?,
            None => String::new(),
        };
        Ok((partition, sort))
    }

    fn page<'a>(
        &'a self,
        table_name: &str,
        mut items: impl Iterator<Item = (&'a OrderKey, &'a Record)>,
        limit: Option<usize>,
        exclusive_start_key: Option<&Record>,
    ) -> Result<(Vec<Record>, Option<Record>), StoreError> {
        let start = exclusive_start_key
            .map(|key| self.order_key(table_name, key))
            .transpose()?;
        let limit = limit.unwrap_or(usize::MAX);

        let mut page = Vec::new();
        let mut last_evaluated_key = None;
        for (order, record) in items.by_ref() {
            if start.as_ref().is_some_and(|start| order <= start) {
                continue;
            }
            if page.len() == limit {
                last_evaluated_key = page.last().map(|last| self.key.key_of(last));
                break;
            }
            page.push(record.clone());
        }
        Ok((page, last_evaluated_key))
    }
}

/// In-process [`KvClient`] keeping tables ordered by primary key.
///
/// Pages carry a `last_evaluated_key` only when more items remain.
#[derive(Default)]
pub struct MemoryKvClient {
    tables: RwLock<BTreeMap<String, MemoryTable>>,
    reads: AtomicU64,
    puts: AtomicU64,
    deletes: AtomicU64,
}

impl MemoryKvClient {
    /// Store without tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with one empty table per catalog entry.
    pub fn with_catalog(catalog: &Catalog) -> Self {
        let client = Self::new();
        for schema in catalog.tables() {
            client.create_table(&schema.table_name, schema.key.clone());
        }
        client
    }

    /// Create (or reset) `table_name`.
    pub fn create_table(&self, table_name: &str, key: KeySchema) {
        self.tables.write().insert(
            table_name.to_string(),
            MemoryTable {
                key,
                items: BTreeMap::new(),
            },
        );
    }

    /// Seed an item without counting it as a put.
    pub fn insert(&self, table_name: &str, item: Record) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(table_name)
            .ok_or_else(|| StoreError::TableNotFound(table_name.to_string()))?;
        let order = table.order_key(table_name, &item)?;
        table.items.insert(order, item);
        Ok(())
    }

    /// Copy of the item stored under `key`.
    pub fn item(&self, table_name: &str, key: &Record) -> Option<Record> {
        let tables = self.tables.read();
        let table = tables.get(table_name)?;
        let order = table.order_key(table_name, key).ok()?;
        table.items.get(&order).cloned()
    }

    /// Every item of `table_name` in key order.
    pub fn items(&self, table_name: &str) -> Vec<Record> {
        self.tables
            .read()
            .get(table_name)
            .map(|table| table.items.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of read requests served.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of `put_item` calls served, failed conditions included.
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    /// Number of `delete_item` calls served.
    pub fn delete_count(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    fn lookup(&self, table_name: &str, key: &Record) -> Result<Option<Record>, StoreError> {
        let tables = self.tables.read();
        let table = tables
            .get(table_name)
            .ok_or_else(|| StoreError::TableNotFound(table_name.to_string()))?;
        let order = table.order_key(table_name, key)?;
        Ok(table.items.get(&order).cloned())
    }
}

#[async_trait]
impl KvClient for MemoryKvClient {
    async fn get_item(&self, request: GetItemRequest) -> Result<GetItemResponse, StoreError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let item = self.lookup(&request.table_name, &request.key)?;
        Ok(GetItemResponse { item })
    }

    async fn query(&self, request: QueryRequest) -> Result<QueryResponse, StoreError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let tables = self.tables.read();
        let table = tables
            .get(&request.table_name)
            .ok_or_else(|| StoreError::TableNotFound(request.table_name.clone()))?;
        let partition_key = table.key.partition_key.as_str();
        let matching = table
            .items
            .iter()
            .filter(|(_, record)| record.get(partition_key) == Some(&request.partition_value));
        let (items, last_evaluated_key) = table.page(
            &request.table_name,
            matching,
            request.limit,
            request.exclusive_start_key.as_ref(),
        )?;
        Ok(QueryResponse {
            items,
            last_evaluated_key,
        })
    }

    async fn scan(&self, request: ScanRequest) -> Result<ScanResponse, StoreError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let tables = self.tables.read();
        let table = tables
            .get(&request.table_name)
            .ok_or_else(|| StoreError::TableNotFound(request.table_name.clone()))?;
        let (items, last_evaluated_key) = table.page(
            &request.table_name,
            table.items.iter(),
            request.limit,
            request.exclusive_start_key.as_ref(),
        )?;
        Ok(ScanResponse {
            items,
            last_evaluated_key,
        })
    }

    async fn batch_get_item(
        &self,
        request: BatchGetItemRequest,
    ) -> Result<BatchGetItemResponse, StoreError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let mut responses = BTreeMap::new();
        for (table_name, keys) in &request.request_items {
            let mut found = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(item) = self.lookup(table_name, key)? {
                    found.push(item);
                }
            }
            responses.insert(table_name.clone(), found);
        }
        Ok(BatchGetItemResponse {
            responses,
            unprocessed_keys: BTreeMap::new(),
        })
    }

    async fn transact_get_items(
        &self,
        request: TransactGetItemsRequest,
    ) -> Result<TransactGetItemsResponse, StoreError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let responses = request
            .items
            .iter()
            .map(|get| {
                self.lookup(&get.table_name, &get.key)
                    .map(|item| ItemResponse { item })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TransactGetItemsResponse { responses })
    }

    async fn put_item(&self, request: PutItemRequest) -> Result<PutItemResponse, StoreError> {
        self.puts.fetch_add(1, Ordering::Relaxed);
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(&request.table_name)
            .ok_or_else(|| StoreError::TableNotFound(request.table_name.clone()))?;
        let order = table.order_key(&request.table_name, &request.item)?;

        if let Some(PutCondition::AttributeEquals { name, value }) = &request.condition {
            let holds = table
                .items
                .get(&order)
                .and_then(|existing| existing.get(name))
                .is_some_and(|current| current == value);
            if !holds {
                return Err(StoreError::ConditionalCheckFailed {
                    table_name: request.table_name,
                });
            }
        }

        table.items.insert(order, request.item);
        Ok(PutItemResponse {})
    }

    async fn delete_item(
        &self,
        request: DeleteItemRequest,
    ) -> Result<DeleteItemResponse, StoreError> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(&request.table_name)
            .ok_or_else(|| StoreError::TableNotFound(request.table_name.clone()))?;
        let order = table.order_key(&request.table_name, &request.key)?;
        table.items.remove(&order);
        Ok(DeleteItemResponse {})
    }
}
