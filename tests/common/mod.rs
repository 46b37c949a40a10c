//! Common fixtures for integration tests.
#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicU32, AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tonbo_hybrid::{
    blob::{BlobError, BlobStore, MemoryBlobStore, PutOptions},
    codec,
    key::KeySchema,
    pointer::{pointer_record, BlobLocator},
    record::{AttributeValue, Record},
    schema::{Catalog, TableSchema, TieringPolicy},
    store::{
        BatchGetItemRequest, BatchGetItemResponse, DeleteItemRequest, DeleteItemResponse,
        GetItemRequest, GetItemResponse, ItemResponse, KvClient, MemoryKvClient,
        PutItemRequest, PutItemResponse, QueryRequest, QueryResponse, ScanRequest, ScanResponse,
        StoreError, TransactGetItemsRequest, TransactGetItemsResponse,
    },
};

pub const BUCKET: &str = "archive";
pub const USERS: &str = "users";

/// `users` keyed by `user_id`/`section`, aged by `created_at`.
pub fn users_schema() -> TableSchema {
    TableSchema::new(USERS, KeySchema::new("user_id").with_sort_key("section"))
        .timestamp_attribute("updated_at")
        .tiering(TieringPolicy::new("created_at"))
}

pub fn catalog() -> Catalog {
    Catalog::new().with_table(users_schema())
}

pub fn user(id: &str, created_at: &str) -> Record {
    Record::from([
        ("user_id".to_string(), AttributeValue::s(id)),
        ("section".to_string(), AttributeValue::s("PROFILE")),
        ("created_at".to_string(), AttributeValue::s(created_at)),
        ("updated_at".to_string(), AttributeValue::s(created_at)),
        ("bio".to_string(), AttributeValue::s(format!("about {id}"))),
        ("visits".to_string(), AttributeValue::n(42)),
        (
            "tags".to_string(),
            AttributeValue::Ss(vec!["a".to_string(), "b".to_string()]),
        ),
    ])
}

pub fn key_of(record: &Record) -> Record {
    users_schema().key.key_of(record)
}

/// Store `record` in `blob` and return the pointer that refers to it.
pub fn archive_into(blob: &MemoryBlobStore, record: &Record) -> Record {
    let id = record
        .get("user_id")
        .and_then(AttributeValue::as_s)
        .unwrap_or("unknown");
    let key = format!("users/{id}/PROFILE.json.gz");
    blob.insert(
        BUCKET,
        &key,
        codec::encode_payload(record).expect("encode payload"),
    );
    pointer_record(record, ["user_id", "section"], &BlobLocator::for_key(key))
}

pub fn memory_store() -> Arc<MemoryKvClient> {
    Arc::new(MemoryKvClient::with_catalog(&catalog()))
}

/// Blob store failing the first `failures` gets with `error`, then
/// delegating to an in-memory store.
pub struct FlakyBlobStore {
    inner: Arc<MemoryBlobStore>,
    remaining_failures: AtomicU32,
    error: fn() -> BlobError,
    calls: AtomicU32,
}

impl FlakyBlobStore {
    pub fn new(inner: Arc<MemoryBlobStore>, failures: u32, error: fn() -> BlobError) -> Self {
        Self {
            inner,
            remaining_failures: AtomicU32::new(failures),
            error,
            calls: AtomicU32::new(0),
        }
    }

    pub fn always_failing(inner: Arc<MemoryBlobStore>, error: fn() -> BlobError) -> Self {
        Self::new(inner, u32::MAX, error)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn timeout() -> BlobError {
    BlobError::Timeout("simulated timeout".to_string())
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, BlobError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                u32::MAX => Some(u32::MAX),
                n => Some(n - 1),
            })
            .is_ok();
        if failing {
            return Err((self.error)());
        }
        self.inner.get(bucket, key).await
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        options: PutOptions,
    ) -> Result<(), BlobError> {
        self.inner.put(bucket, key, body, options).await
    }
}

/// Client returning canned responses and remembering where their buffers
/// live, so tests can check a response came back without reallocation.
pub struct CannedClient {
    items: Vec<Record>,
    last_buffer: AtomicUsize,
}

impl CannedClient {
    pub fn new(items: Vec<Record>) -> Self {
        Self {
            items,
            last_buffer: AtomicUsize::new(0),
        }
    }

    pub fn last_buffer(&self) -> usize {
        self.last_buffer.load(Ordering::SeqCst)
    }

    fn remember<T>(&self, buffer: &[T]) {
        self.last_buffer
            .store(buffer.as_ptr() as usize, Ordering::SeqCst);
    }
}

#[async_trait]
impl KvClient for CannedClient {
    async fn get_item(&self, _request: GetItemRequest) -> Result<GetItemResponse, StoreError> {
        let item = self.items.first().cloned();
        if let Some(bio) = item
            .as_ref()
            .and_then(|item| item.get("bio"))
            .and_then(AttributeValue::as_s)
        {
            self.remember(bio.as_bytes());
        }
        Ok(GetItemResponse { item })
    }

    async fn query(&self, _request: QueryRequest) -> Result<QueryResponse, StoreError> {
        let items = self.items.clone();
        self.remember(&items);
        Ok(QueryResponse {
            items,
            last_evaluated_key: None,
        })
    }

    async fn scan(&self, _request: ScanRequest) -> Result<ScanResponse, StoreError> {
        let items = self.items.clone();
        self.remember(&items);
        Ok(ScanResponse {
            items,
            last_evaluated_key: None,
        })
    }

    async fn batch_get_item(
        &self,
        _request: BatchGetItemRequest,
    ) -> Result<BatchGetItemResponse, StoreError> {
        let items = self.items.clone();
        self.remember(&items);
        Ok(BatchGetItemResponse {
            responses: [(USERS.to_string(), items)].into_iter().collect(),
            unprocessed_keys: Default::default(),
        })
    }

    async fn transact_get_items(
        &self,
        _request: TransactGetItemsRequest,
    ) -> Result<TransactGetItemsResponse, StoreError> {
        let responses = self
            .items
            .iter()
            .cloned()
            .map(|item| ItemResponse { item: Some(item) })
            .collect::<Vec<_>>();
        self.remember(&responses);
        Ok(TransactGetItemsResponse { responses })
    }

    async fn put_item(&self, _request: PutItemRequest) -> Result<PutItemResponse, StoreError> {
        Ok(PutItemResponse {})
    }

    async fn delete_item(
        &self,
        _request: DeleteItemRequest,
    ) -> Result<DeleteItemResponse, StoreError> {
        Ok(DeleteItemResponse {})
    }
}

/// What [`InterferingClient`] does to puts targeting one user.
#[derive(Clone, Copy)]
pub enum Interference {
    /// Reject the put outright.
    FailPut,
    /// Bump the stored age attribute right before the put lands.
    TouchBeforePut,
}

/// Wraps the memory store and interferes with pointer writes for one user.
pub struct InterferingClient {
    inner: Arc<MemoryKvClient>,
    target: String,
    interference: Interference,
    interfered: Mutex<u32>,
}

impl InterferingClient {
    pub fn new(inner: Arc<MemoryKvClient>, target: &str, interference: Interference) -> Self {
        Self {
            inner,
            target: target.to_string(),
            interference,
            interfered: Mutex::new(0),
        }
    }

    pub fn interfered(&self) -> u32 {
        *self.interfered.lock()
    }

    fn targets(&self, item: &Record) -> bool {
        item.get("user_id").and_then(AttributeValue::as_s) == Some(self.target.as_str())
    }
}

#[async_trait]
impl KvClient for InterferingClient {
    async fn get_item(&self, request: GetItemRequest) -> Result<GetItemResponse, StoreError> {
        self.inner.get_item(request).await
    }

    async fn query(&self, request: QueryRequest) -> Result<QueryResponse, StoreError> {
        self.inner.query(request).await
    }

    async fn scan(&self, request: ScanRequest) -> Result<ScanResponse, StoreError> {
        self.inner.scan(request).await
    }

    async fn batch_get_item(
        &self,
        request: BatchGetItemRequest,
    ) -> Result<BatchGetItemResponse, StoreError> {
        self.inner.batch_get_item(request).await
    }

    async fn transact_get_items(
        &self,
        request: TransactGetItemsRequest,
    ) -> Result<TransactGetItemsResponse, StoreError> {
        self.inner.transact_get_items(request).await
    }

    async fn put_item(&self, request: PutItemRequest) -> Result<PutItemResponse, StoreError> {
        if self.targets(&request.item) {
            *self.interfered.lock() += 1;
            match self.interference {
                Interference::FailPut => {
                    return Err(StoreError::Validation("simulated write failure".into()));
                }
                Interference::TouchBeforePut => {
                    if let Some(mut current) =
                        self.inner.item(&request.table_name, &request.item)
                    {
                        current.insert(
                            "created_at".to_string(),
                            AttributeValue::s("2099-01-01T00:00:00Z"),
                        );
                        self.inner.insert(&request.table_name, current)?;
                    }
                }
            }
        }
        self.inner.put_item(request).await
    }

    async fn delete_item(
        &self,
        request: DeleteItemRequest,
    ) -> Result<DeleteItemResponse, StoreError> {
        self.inner.delete_item(request).await
    }
}
