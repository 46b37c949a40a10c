use futures_util::future::BoxFuture;
use tokio::runtime::Handle;

use super::Executor;

/// [`Executor`] spawning onto an existing tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    /// Executor bound to `handle`.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }
}

impl Default for TokioExecutor {
    /// Binds to the runtime of the calling context.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    fn default() -> Self {
        Self {
            handle: Handle::current(),
        }
    }
}

impl Executor for TokioExecutor {
    fn spawn(&self, future: BoxFuture<'static, ()>) {
        self.handle.spawn(future);
    }
}
