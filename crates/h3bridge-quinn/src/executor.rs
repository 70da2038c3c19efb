//! A [`tokio`]-backed [`h3bridge_core::executor::Executor`].

use h3bridge_core::executor::Executor;
use tokio::runtime::Handle;

/// Schedules work onto a `tokio` runtime's task queue from any thread.
///
/// Unlike [`h3bridge_core::executor::ImmediateExecutor`], this never runs
/// application callbacks inline on a transport worker thread: every
/// scheduled closure becomes its own `tokio::task`, cooperatively
/// interleaved with everything else the runtime is driving.
#[derive(Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    /// Bind to the currently running `tokio` runtime (panics outside one,
    /// matching `Handle::current`'s own contract).
    pub fn current() -> Self {
        Self { handle: Handle::current() }
    }

    /// Bind to a specific runtime handle.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }
}

impl Executor for TokioExecutor {
    fn schedule_from_any_thread(&self, f: Box<dyn FnOnce() + Send + 'static>) {
        self.handle.spawn_blocking(f);
    }
}
