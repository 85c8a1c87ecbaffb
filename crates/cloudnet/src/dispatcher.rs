//! # Dispatcher
//!
//! A dedicated multi-threaded tokio runtime. The node owns two: one for
//! transport I/O, one for packet handling, so slow handlers never stall a
//! read loop.

use std::io;
use std::panic::AssertUnwindSafe;

use parking_lot::Mutex;
use tokio::runtime::Builder;
use tokio::runtime::Handle;
use tokio::runtime::Runtime;

use crate::listener::panic_message;
use crate::task::AsyncResult;

pub struct Dispatcher {
    name: String,
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
}

impl Dispatcher {
    pub fn new(name: impl Into<String>, threads: usize) -> io::Result<Self> {
        let name = name.into();
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads.max(1))
            .thread_name(name.clone())
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        tracing::debug!(dispatcher = %name, threads, "started dispatcher");
        Ok(Self {
            name,
            runtime: Mutex::new(Some(runtime)),
            handle,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Runs a blocking operation on the runtime's blocking pool, off the
    /// worker threads that drive the dispatch loops.
    pub fn execute(&self, f: impl FnOnce() + Send + 'static) {
        self.handle.spawn_blocking(f);
    }

    /// Runs a blocking operation on the blocking pool and returns its eventual
    /// result. A panic fails the result.
    pub fn supply<T, F>(&self, f: F) -> AsyncResult<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let result = AsyncResult::new();
        let target = result.clone();
        self.handle.spawn_blocking(move || {
            match std::panic::catch_unwind(AssertUnwindSafe(f)) {
                Ok(Ok(value)) => target.complete(value),
                Ok(Err(e)) => target.fail(e),
                Err(panic) => target.fail(anyhow::anyhow!("task panicked: {}", panic_message(&*panic))),
            };
        });
        result
    }

    /// Stops the runtime without waiting for running tasks. Idempotent.
    pub fn shutdown(&self) {
        if let Some(runtime) = self.runtime.lock().take() {
            tracing::debug!(dispatcher = %self.name, "shutting down dispatcher");
            runtime.shutdown_background();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.name)
            .field("running", &self.runtime.lock().is_some())
            .finish()
    }
}
