//! Tracing macros shared by the hydration, retry, blob and archival paths.
//!
//! Every event is emitted under the `tonbo_hybrid` target with a `component`
//! field naming the subsystem and a snake_case `event` field. No subscriber
//! is installed here.

/// Target for all tiering log events.
pub(crate) const TIERING_TARGET: &str = "tonbo_hybrid";

/// Info-level event, e.g.
/// `log_info!(component = "archival", event = "archival_complete", archived = n)`.
macro_rules! log_info {
    ($($field:tt)*) => {
        ::tracing::info!(target: $crate::observability::TIERING_TARGET, $($field)*)
    };
}

/// Debug-level event.
macro_rules! log_debug {
    ($($field:tt)*) => {
        ::tracing::debug!(target: $crate::observability::TIERING_TARGET, $($field)*)
    };
}

/// Warn-level event.
macro_rules! log_warn {
    ($($field:tt)*) => {
        ::tracing::warn!(target: $crate::observability::TIERING_TARGET, $($field)*)
    };
}

/// Error-level event.
macro_rules! log_error {
    ($($field:tt)*) => {
        ::tracing::error!(target: $crate::observability::TIERING_TARGET, $($field)*)
    };
}

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_info;
pub(crate) use log_warn;
