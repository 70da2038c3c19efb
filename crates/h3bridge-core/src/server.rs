//! Server-wide state: pending-event queue and opaque stream handles
//! (component D).

use crate::buffer::HeaderList;
use crate::stream::StreamState;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Operations a [`StreamHandle`] needs from its owning connection, erased
/// behind a trait object so the handle (and everything downstream of it —
/// [`crate::handler::Application`], [`crate::executor::Executor`]) stays
/// free of the `ConnectionState<T, C>` type parameters. This mirrors how
/// the bridge keeps its public, application-facing surface non-generic
/// while the transport/codec-facing half stays statically typed.
pub trait ConnectionOps: Send + Sync {
    /// Submit response headers for `stream_id`.
    fn send_headers(&self, stream_id: i64, headers: HeaderList, fin: bool);
    /// Enqueue response body bytes for `stream_id`.
    fn send_data(&self, stream_id: i64, data: Bytes, fin: bool);
}

/// An opaque handle the application holds to a live request stream.
///
/// The core retains authoritative ownership of the underlying
/// [`StreamState`] (via `Arc`); a transport-initiated shutdown can free
/// stream state without any application cooperation, per §9's "opaque
/// stream handles" design note.
#[derive(Clone)]
pub struct StreamHandle {
    state: Arc<StreamState>,
    conn: Arc<dyn ConnectionOps>,
}

impl StreamHandle {
    /// Construct a handle over `state`, backed by `conn` for outbound calls.
    pub fn new(state: Arc<StreamState>, conn: Arc<dyn ConnectionOps>) -> Self {
        Self { state, conn }
    }

    /// This stream's 64-bit QUIC stream id.
    pub fn stream_id(&self) -> i64 {
        self.state.stream_id()
    }

    /// Submit response headers, optionally finishing the response with no
    /// body.
    pub fn send_headers(&self, headers: HeaderList, fin: bool) {
        self.conn.send_headers(self.state.stream_id(), headers, fin);
    }

    /// Enqueue response body bytes, optionally finishing the response.
    /// A zero-length `data` with `fin = true` is a valid pure-FIN signal
    /// (§9 open question (b), resolved yes).
    pub fn send_data(&self, data: Bytes, fin: bool) {
        self.conn.send_data(self.state.stream_id(), data, fin);
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("stream_id", &self.state.stream_id())
            .finish()
    }
}

/// A single decoded application-visible event, tagged by kind (§3
/// `PendingEvent`).
pub enum PendingEvent {
    /// A complete request header block was decoded.
    Headers(StreamHandle, HeaderList),
    /// A chunk of request body was decoded.
    Data(StreamHandle, Bytes),
    /// The request's send side has ended.
    Fin(StreamHandle),
}

/// The server-wide pending-event FIFO, guarded by its own mutex,
/// independent of any connection's mutex (§5).
#[derive(Default)]
pub struct EventQueue {
    queue: Mutex<VecDeque<PendingEvent>>,
}

impl EventQueue {
    /// An empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `event` under the queue mutex (§4.D `enqueue`, transport
    /// side). Waking the executor is the caller's responsibility via
    /// [`crate::executor::Executor::schedule_from_any_thread`].
    pub fn enqueue(&self, event: PendingEvent) {
        self.queue.lock().push_back(event);
    }

    /// Atomically detach the whole queue, releasing the mutex before the
    /// caller dispatches anything (§4.D `drain`: draining must not hold
    /// the queue mutex during application calls).
    pub fn drain(&self) -> VecDeque<PendingEvent> {
        std::mem::take(&mut *self.queue.lock())
    }

    /// Whether the queue currently has no pending events. Mainly useful in
    /// tests.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}
