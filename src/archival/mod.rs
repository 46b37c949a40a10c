//! Background job demoting old records to blob storage.
//!
//! A run walks every tiering-eligible table, pages through it, and replaces
//! each record older than the table's threshold with a pointer record after
//! writing the full payload to blob storage. Runs are started by the caller;
//! there is no internal scheduler.

mod result;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
pub use result::ArchivalResult;
use thiserror::Error;

use crate::{
    blob::{BlobError, BlobStore, PutOptions},
    codec::{self, CodecError},
    config::{ConfigError, TieringConfig},
    key::KeyError,
    observability::{log_error, log_info, log_warn},
    pointer::{is_pointer, pointer_record, BlobLocator},
    record::{AttributeValue, Record},
    schema::{Catalog, TableSchema, TieringPolicy},
    store::{KvClient, PutCondition, PutItemRequest, ScanRequest, StoreError},
};

/// Where a run currently is.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ArchivalPhase {
    /// No run in progress.
    #[default]
    Idle,
    /// Enumerating tiering-eligible tables.
    Discovering,
    /// Fetching a page of `table`.
    Scanning {
        /// Table being processed.
        table: String,
    },
    /// Checking items of the current page.
    Evaluating {
        /// Table being processed.
        table: String,
    },
    /// Writing a blob and its pointer.
    Migrating {
        /// Table being processed.
        table: String,
    },
}

/// Failure to archive a single item or table.
#[derive(Debug, Error)]
pub enum ArchiveItemError {
    /// No blob key could be derived.
    #[error("key generation failed: {0}")]
    Key(#[from] KeyError),
    /// The payload could not be encoded.
    #[error("encoding failed: {0}")]
    Codec(#[from] CodecError),
    /// The blob write failed.
    #[error("blob write failed: {0}")]
    Blob(#[from] BlobError),
    /// The store read or pointer write failed.
    #[error("store request failed: {0}")]
    Store(#[from] StoreError),
    /// The archive threshold cannot be represented.
    #[error("archive threshold {0:?} is out of range")]
    Threshold(Duration),
}

enum Migration {
    Archived,
    /// The record changed between scan and pointer write.
    Changed,
}

/// Moves aged records of tiered tables into blob storage.
pub struct ArchivalService {
    store: Arc<dyn KvClient>,
    blob: Arc<dyn BlobStore>,
    catalog: Catalog,
    config: TieringConfig,
    phase: Mutex<ArchivalPhase>,
    running: AtomicBool,
}

impl ArchivalService {
    /// Service writing through `store` and `blob` for tables in `catalog`.
    pub fn new(
        store: Arc<dyn KvClient>,
        blob: Arc<dyn BlobStore>,
        catalog: Catalog,
        config: TieringConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store,
            blob,
            catalog,
            config,
            phase: Mutex::new(ArchivalPhase::Idle),
            running: AtomicBool::new(false),
        })
    }

    /// Current phase of the running job, `Idle` between runs.
    pub fn phase(&self) -> ArchivalPhase {
        self.phase.lock().clone()
    }

    /// Archive every eligible record. With `dry_run` nothing is written.
    ///
    /// Per-item and per-table failures are collected into the result and
    /// never abort the run.
    pub async fn archive(&self, dry_run: bool) -> ArchivalResult {
        if !self.config.archival.enabled {
            log_info!(component = "archival", event = "archival_disabled");
            return ArchivalResult::default();
        }
        let Some(_guard) = RunGuard::acquire(self) else {
            return ArchivalResult::new(0, 0, vec!["archival already running".to_string()]);
        };

        self.set_phase(ArchivalPhase::Discovering);
        let now = Utc::now();
        let mut result = ArchivalResult::default();

        for (schema, policy) in self.catalog.tiered() {
            let Some(age_attribute) = policy.age_attribute.as_deref() else {
                log_warn!(
                    component = "archival",
                    event = "archival_table_skipped",
                    table = %schema.table_name,
                    reason = "no age attribute",
                );
                continue;
            };
            let archive_after = policy
                .archive_after
                .unwrap_or(self.config.archival.archive_after);

            log_info!(
                component = "archival",
                event = "archival_table_start",
                table = %schema.table_name,
                archive_after_secs = archive_after.as_secs(),
                dry_run,
            );
            let table = TableRun {
                schema,
                policy,
                age_attribute,
                now,
                dry_run,
            };
            if let Err(err) = self.archive_table(&table, archive_after, &mut result).await {
                log_error!(
                    component = "archival",
                    event = "archival_table_failed",
                    table = %schema.table_name,
                    error = %err,
                );
                result.errors.push(format!("{}: {err}", schema.table_name));
            }
        }

        log_info!(
            component = "archival",
            event = "archival_complete",
            dry_run,
            processed = result.items_processed,
            archived = result.items_archived,
            skipped = result.items_skipped(),
            errors = result.errors.len(),
        );
        result
    }

    async fn archive_table(
        &self,
        table: &TableRun<'_>,
        archive_after: Duration,
        result: &mut ArchivalResult,
    ) -> Result<(), ArchiveItemError> {
        let threshold = chrono::Duration::from_std(archive_after)
            .ok()
            .and_then(|age| table.now.checked_sub_signed(age))
            .ok_or(ArchiveItemError::Threshold(archive_after))?;
        let table_name = table.schema.table_name.as_str();

        let mut start = None;
        loop {
            self.set_phase(ArchivalPhase::Scanning {
                table: table_name.to_string(),
            });
            let page = self
                .store
                .scan(
                    ScanRequest::new(table_name)
                        .limit(self.config.archival.batch_size)
                        .exclusive_start_key(start.take()),
                )
                .await?;

            self.set_phase(ArchivalPhase::Evaluating {
                table: table_name.to_string(),
            });
            for item in page.items {
                result.items_processed += 1;
                let Some(age_value) = eligible_age(&item, table.age_attribute, threshold) else {
                    continue;
                };
                if table.dry_run {
                    log_info!(
                        component = "archival",
                        event = "dry_run_candidate",
                        table = table_name,
                        key = ?table.schema.key.key_of(&item),
                    );
                    result.items_archived += 1;
                    continue;
                }

                self.set_phase(ArchivalPhase::Migrating {
                    table: table_name.to_string(),
                });
                match self.migrate(table, &item, age_value).await {
                    Ok(Migration::Archived) => result.items_archived += 1,
                    Ok(Migration::Changed) => {
                        log_warn!(
                            component = "archival",
                            event = "archival_item_changed",
                            table = table_name,
                            key = ?table.schema.key.key_of(&item),
                        );
                    }
                    Err(err) => {
                        let key = table.schema.key.key_of(&item);
                        log_error!(
                            component = "archival",
                            event = "archival_item_failed",
                            table = table_name,
                            key = ?key,
                            error = %err,
                        );
                        result
                            .errors
                            .push(format!("{table_name} {}: {err}", describe_key(&key)));
                    }
                }
            }

            match page.last_evaluated_key {
                Some(key) => start = Some(key),
                None => return Ok(()),
            }
        }
    }

    /// Write the payload blob, then overwrite the record with its pointer.
    async fn migrate(
        &self,
        table: &TableRun<'_>,
        item: &Record,
        age_value: AttributeValue,
    ) -> Result<Migration, ArchiveItemError> {
        let table_name = table.schema.table_name.as_str();
        let blob_config = &self.config.blob;
        let key = table
            .schema
            .key_generator()
            .generate_key(item, &table.policy.key_template, table_name)?;
        let key = blob_config.prefixed_key(&key);

        let json = codec::to_json(item)?;
        let original_size = json.len();
        let body = codec::compress(&json)?;
        let options = PutOptions::gzip_json()
            .metadata("archived_at", table.now.to_rfc3339())
            .metadata("table_name", table_name)
            .metadata("original_size", original_size.to_string());
        self.blob
            .put(&blob_config.bucket_name, &key, body, options)
            .await?;

        let locator = BlobLocator::qualified(&blob_config.bucket_name, &key);
        let pointer = pointer_record(item, table.schema.retained_attributes(), &locator);
        let request = PutItemRequest::new(table_name, pointer).condition(
            PutCondition::AttributeEquals {
                name: table.age_attribute.to_string(),
                value: age_value,
            },
        );
        match self.store.put_item(request).await {
            Ok(_) => {
                log_info!(
                    component = "archival",
                    event = "archival_item_archived",
                    table = table_name,
                    locator = %locator,
                    original_size,
                );
                Ok(Migration::Archived)
            }
            Err(StoreError::ConditionalCheckFailed { .. }) => Ok(Migration::Changed),
            Err(err) => Err(err.into()),
        }
    }

    fn set_phase(&self, phase: ArchivalPhase) {
        *self.phase.lock() = phase;
    }
}

impl std::fmt::Debug for ArchivalService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchivalService")
            .field("catalog", &self.catalog)
            .field("config", &self.config)
            .field("phase", &*self.phase.lock())
            .finish_non_exhaustive()
    }
}

struct TableRun<'a> {
    schema: &'a TableSchema,
    policy: &'a TieringPolicy,
    age_attribute: &'a str,
    now: DateTime<Utc>,
    dry_run: bool,
}

/// Marks a run as active; resets the service to idle when dropped.
struct RunGuard<'a> {
    service: &'a ArchivalService,
}

impl<'a> RunGuard<'a> {
    fn acquire(service: &'a ArchivalService) -> Option<Self> {
        service
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { service })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.service.set_phase(ArchivalPhase::Idle);
        self.service.running.store(false, Ordering::Release);
    }
}

/// The age value of `item` when it is a full record older than `threshold`.
fn eligible_age(
    item: &Record,
    age_attribute: &str,
    threshold: DateTime<Utc>,
) -> Option<AttributeValue> {
    if is_pointer(item) {
        return None;
    }
    let value = item.get(age_attribute)?;
    let age = parse_age(value)?;
    (age < threshold).then(|| value.clone())
}

/// `S` values are RFC 3339 timestamps, `N` values epoch seconds.
fn parse_age(value: &AttributeValue) -> Option<DateTime<Utc>> {
    match value {
        AttributeValue::S(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|at| at.with_timezone(&Utc)),
        AttributeValue::N(text) => {
            let seconds = match text.parse::<i64>() {
                Ok(seconds) => seconds,
                Err(_) => text
                    .parse::<f64>()
                    .ok()
                    .filter(|seconds| seconds.is_finite())?
                    .trunc() as i64,
            };
            DateTime::from_timestamp(seconds, 0)
        }
        _ => None,
    }
}

fn describe_key(key: &Record) -> String {
    key.iter()
        .map(|(name, value)| match value {
            AttributeValue::S(text) | AttributeValue::N(text) => format!("{name}={text}"),
            other => format!("{name}=<{}>", other.kind()),
        })
        .collect::<Vec<_>>()
        .join(",")
}
