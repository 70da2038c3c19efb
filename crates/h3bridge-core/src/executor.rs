//! The cooperative executor boundary (component H).
//!
//! The bridge never schedules work itself beyond a single cross-thread
//! wake; the application owns the executor and the thread every
//! `Application` callback runs on. This keeps application-observable state
//! confined to one thread without the bridge needing any locks around it
//! (§9 "cross-thread wake").

/// A cooperative, single-threaded executor owned by the application.
pub trait Executor: Send + Sync + 'static {
    /// Schedule `f` to run on the executor's thread, callable safely from
    /// any transport worker thread. Implementations must not run `f`
    /// inline on the calling thread.
    fn schedule_from_any_thread(&self, f: Box<dyn FnOnce() + Send + 'static>);
}

/// An executor that runs scheduled work immediately, inline, on whichever
/// thread calls it.
///
/// Useful for tests and for the `demos/echo-server` binary, where there is
/// no separate cooperative scheduler to hand work to; real deployments
/// should supply an executor backed by their async runtime's task queue
/// instead (e.g. a `tokio::sync::mpsc` channel drained by a dedicated
/// task).
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateExecutor;

impl Executor for ImmediateExecutor {
    fn schedule_from_any_thread(&self, f: Box<dyn FnOnce() + Send + 'static>) {
        f();
    }
}
