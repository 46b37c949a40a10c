//! What to do with a pointer whose payload could not be hydrated.

use serde::{Deserialize, Serialize};

use crate::{hydration::HydrationError, record::Record};

/// Failure policy applied per hydrated item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorStrategy {
    /// Abort the whole read with the first failure.
    FailFast,
    /// Hand back the un-hydrated pointer record.
    #[default]
    ReturnPointer,
    /// Leave the item out of the response.
    SkipFailed,
}

/// Per-item result of the read path.
#[derive(Debug)]
pub enum HydrationOutcome {
    /// Payload fetched and decoded.
    Hydrated(Record),
    /// Failure replaced by the original pointer.
    FellBackToPointer(Record),
    /// Failure dropped from the response.
    Dropped,
    /// Failure that aborts the call.
    Failed(HydrationError),
}

impl ErrorStrategy {
    /// Decide the outcome for `pointer` given its hydration result.
    ///
    /// Success always wins; malformed payloads are handled like fetch
    /// failures.
    pub fn resolve(self, pointer: Record, result: Result<Record, HydrationError>) -> HydrationOutcome {
        match (result, self) {
            (Ok(record), _) => HydrationOutcome::Hydrated(record),
            (Err(err), ErrorStrategy::FailFast) => HydrationOutcome::Failed(err),
            (Err(_), ErrorStrategy::ReturnPointer) => HydrationOutcome::FellBackToPointer(pointer),
            (Err(_), ErrorStrategy::SkipFailed) => HydrationOutcome::Dropped,
        }
    }
}

impl HydrationOutcome {
    /// Returns `true` only for [`HydrationOutcome::Hydrated`].
    pub fn is_hydrated(&self) -> bool {
        matches!(self, HydrationOutcome::Hydrated(_))
    }
}
