//! Execution contexts for retrying operations.
//!
//! [`wrap_operation`](crate::retry::wrap_operation) drives its attempt loop on
//! a [`Runtime`]: attempts, delays between them and timeout enforcement all
//! happen inside the runtime, never on the caller's task. Two Tokio-backed
//! implementations are provided:
//!
//! - [`TokioRuntime`] spawns onto whatever Tokio runtime is current.
//! - [`HandleRuntime`] spawns onto a specific runtime, e.g. a dedicated pool
//!   kept apart from the application's own executor.
//!
//! Callers wanting inline execution use [`execute`](crate::retry::execute)
//! instead, which runs the same loop on the calling task.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::runtime::Handle;

/// Abstraction over an async runtime.
///
/// Implementations must be `Send + Sync + 'static` so they can be shared
/// across tasks and stored in long-lived structures like the retrying client.
pub trait Runtime: Send + Sync + 'static {
    /// Spawns a future as a background task.
    ///
    /// The future will run to completion even if the returned handle is dropped.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Returns a future that completes after the given duration.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// The default [`Runtime`] implementation backed by the current Tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioRuntime;

impl Runtime for TokioRuntime {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// A [`Runtime`] that spawns onto a specific Tokio runtime.
#[derive(Debug, Clone)]
pub struct HandleRuntime {
    handle: Handle,
}

impl HandleRuntime {
    /// Creates a runtime spawning onto the given handle.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Creates a runtime spawning onto the Tokio runtime of the calling task.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Returns the underlying handle.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Runtime for HandleRuntime {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtimes_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TokioRuntime>();
        assert_send_sync::<HandleRuntime>();
    }

    #[tokio::test]
    async fn test_tokio_runtime_spawn() {
        let rt = TokioRuntime;
        let (tx, rx) = tokio::sync::oneshot::channel();
        rt.spawn(async move {
            let _ = tx.send(42);
        });
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_runtime_sleep() {
        let rt = TokioRuntime;
        let start = tokio::time::Instant::now();
        rt.sleep(Duration::from_millis(250)).await;
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[test]
    fn test_handle_runtime_spawns_onto_dedicated_pool() {
        let pool = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let rt = HandleRuntime::new(pool.handle().clone());

        let (tx, rx) = std::sync::mpsc::channel();
        rt.spawn(async move {
            let _ = tx.send(std::thread::current().name().map(str::to_owned));
        });

        let thread_name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(thread_name.is_some());
    }
}
