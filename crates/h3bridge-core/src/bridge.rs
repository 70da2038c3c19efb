//! The public facade: `Http3Server`, tying transport callback adapters
//! (component E), codec callback adapters (component F), the flush engine
//! (component G), and the executor bridge (component H) together.

use crate::codec::{Http3Callbacks, Http3Codec};
use crate::config::ServerConfig;
use crate::connection::ConnectionState;
use crate::error::BridgeError;
use crate::executor::Executor;
use crate::flush;
use crate::handler::Application;
use crate::server::{ConnectionOps, EventQueue, PendingEvent, StreamHandle};
use crate::stream::StreamRole;
use crate::transport::{ConnectionEvents, ListenerEvents, QuicTransport, StreamEvents};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Per-connection glue that lets an opaque [`StreamHandle`] call back into
/// its owning [`ConnectionState`] without the handle itself being generic
/// over `T`/`C` (see [`ConnectionOps`]).
struct ConnectionHandle<T: QuicTransport, C: Http3Codec> {
    state: Arc<ConnectionState<T, C>>,
    max_flush_batches: usize,
}

impl<T: QuicTransport, C: Http3Codec> ConnectionOps for ConnectionHandle<T, C> {
    fn send_headers(&self, stream_id: i64, headers: crate::buffer::HeaderList, fin: bool) {
        if self.state.lookup_stream(stream_id).is_none() {
            // §9 open question (a): best-effort no-op if the stream is gone
            // (e.g. the peer already reset it).
            debug!(stream_id, "send_headers on unknown stream, ignoring");
            return;
        }
        self.state.submit_response(stream_id, headers, fin);
        flush::flush_stream(&self.state, stream_id, self.max_flush_batches);
    }

    fn send_data(&self, stream_id: i64, data: Bytes, fin: bool) {
        let Some(stream) = self.state.lookup_stream(stream_id) else {
            debug!(stream_id, "send_data on unknown stream, ignoring");
            return;
        };
        // §9 open question (b): a zero-length chunk with fin=true is a
        // valid pure-FIN signal and must still be enqueued/resumed.
        if !data.is_empty() {
            stream.enqueue_response_chunk(data);
        }
        if fin {
            stream.set_response_fin();
        }
        self.state.resume_stream(stream_id);
        flush::flush_stream(&self.state, stream_id, self.max_flush_batches);
    }
}

/// Adapter implementing [`Http3Callbacks`] over a connection's registry and
/// the server's pending-event queue (component F).
struct CallbackAdapter<'a, T: QuicTransport, C: Http3Codec> {
    conn: &'a ConnectionState<T, C>,
    conn_ops: &'a Arc<dyn ConnectionOps>,
    events: &'a EventQueue,
}

impl<T: QuicTransport, C: Http3Codec> Http3Callbacks for CallbackAdapter<'_, T, C> {
    fn recv_header(&mut self, stream_id: i64, name: Bytes, value: Bytes) {
        if let Some(state) = self.conn.lookup_stream(stream_id) {
            state.append_header(name, value);
        }
    }

    fn end_headers(&mut self, stream_id: i64, _fin: bool) {
        let Some(state) = self.conn.lookup_stream(stream_id) else {
            return;
        };
        let headers = state.take_headers();
        let handle = StreamHandle::new(state, self.conn_ops.clone());
        self.events.enqueue(PendingEvent::Headers(handle, headers));
    }

    fn recv_data(&mut self, stream_id: i64, data: &[u8]) {
        let Some(state) = self.conn.lookup_stream(stream_id) else {
            return;
        };
        let handle = StreamHandle::new(state, self.conn_ops.clone());
        self.events.enqueue(PendingEvent::Data(handle, Bytes::copy_from_slice(data)));
    }

    fn end_stream(&mut self, stream_id: i64) {
        let Some(state) = self.conn.lookup_stream(stream_id) else {
            return;
        };
        let handle = StreamHandle::new(state, self.conn_ops.clone());
        self.events.enqueue(PendingEvent::Fin(handle));
    }
}

/// Drain one batch of pending events and dispatch each to `app`, logging
/// and swallowing any per-event application error (§7 error kind 5, §4.D:
/// draining must not hold the queue mutex during application calls — the
/// mutex is already released by the time `drain` returns its list).
fn dispatch_drained<A: Application>(events: &EventQueue, app: &A) {
    let drained = events.drain();
    for event in drained {
        let result = match event {
            PendingEvent::Headers(stream, headers) => app.on_headers(stream, headers),
            PendingEvent::Data(stream, data) => app.on_data(stream, data),
            PendingEvent::Fin(stream) => app.on_fin(stream),
        };
        if let Err(err) = result {
            error!(%err, "application callback failed, continuing drain");
        }
    }
}

/// The transport-to-application bridge.
///
/// Generic over the QUIC transport (`T`), the HTTP/3 codec (`C`), the
/// application handler (`A`), and the executor (`E`) it is given —
/// matching `h3bridge_core::Http3Server<T, C, A, E>` in the external
/// interface description. Construct with [`Http3Server::new`] and drive
/// with [`Http3Server::start`]; application callbacks are invoked through
/// `E` as events drain.
pub struct Http3Server<T: QuicTransport, C: Http3Codec, A: Application, E: Executor> {
    transport: Arc<T>,
    app: Arc<A>,
    executor: Arc<E>,
    config: ServerConfig,
    connections: Mutex<HashMap<T::ConnHandle, Arc<ConnectionState<T, C>>>>,
    conn_ops: Mutex<HashMap<T::ConnHandle, Arc<dyn ConnectionOps>>>,
    events: Arc<EventQueue>,
}

impl<T: QuicTransport, C: Http3Codec, A: Application, E: Executor> Http3Server<T, C, A, E> {
    /// Construct a new bridge over `transport`, dispatching decoded events
    /// to `app` through `executor`.
    pub fn new(transport: Arc<T>, app: Arc<A>, executor: Arc<E>, config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            transport,
            app,
            executor,
            config,
            connections: Mutex::new(HashMap::new()),
            conn_ops: Mutex::new(HashMap::new()),
            events: Arc::new(EventQueue::new()),
        })
    }

    /// Start listening on `host:port`. The only synchronous error path in
    /// the bridge (§7 error kind 1): a failed start leaves the server
    /// unusable.
    pub fn start(&self, host: &str, port: u16) -> Result<(), BridgeError> {
        self.transport
            .listen(host, port, &self.config)
            .map_err(|err| BridgeError::Listener {
                host: host.to_string(),
                port,
                source: Box::new(err),
            })
    }

    /// Drain the pending-event queue, dispatching each event to the
    /// application. Invoked by the executor wake scheduled from
    /// `enqueue`'s caller (§4.D, §4.H).
    pub fn process_pending(&self) {
        dispatch_drained(&self.events, &self.app);
    }

    fn schedule_process_pending(&self) {
        let events = self.events.clone();
        let app = self.app.clone();
        self.executor
            .schedule_from_any_thread(Box::new(move || dispatch_drained(&events, &app)));
    }

    fn conn_ops_for(&self, state: Arc<ConnectionState<T, C>>) -> Arc<dyn ConnectionOps> {
        Arc::new(ConnectionHandle {
            state,
            max_flush_batches: self.config.max_flush_batches,
        })
    }

    /// Feed one inbound chunk through the codec and drain resulting events,
    /// shared between live `on_receive` delivery and backlog replay once a
    /// connection reaches `Ready` (§4.E).
    fn deliver_receive(
        &self,
        conn: &T::ConnHandle,
        state: &Arc<ConnectionState<T, C>>,
        stream_id: i64,
        data: &[u8],
        fin: bool,
    ) {
        let Some(stream_state) = state.lookup_stream(stream_id) else {
            return;
        };
        if stream_state.has_error() {
            return;
        }

        let Some(ops) = self.conn_ops.lock().get(conn).cloned() else {
            return;
        };
        let mut cb = CallbackAdapter {
            conn: state.as_ref(),
            conn_ops: &ops,
            events: &self.events,
        };
        if let Err(err) = state.read_stream(stream_id, data, fin, &mut cb) {
            if !err.is_would_block() {
                warn!(stream_id, %err, "codec read failed, marking stream failed");
                stream_state.mark_error();
            }
        }
        self.schedule_process_pending();
        flush::flush_connection(state, self.config.max_flush_batches);
    }
}

impl<T: QuicTransport, C: Http3Codec, A: Application, E: Executor> ListenerEvents<T>
    for Http3Server<T, C, A, E>
{
    fn on_new_connection(&self, conn: T::ConnHandle) {
        self.transport.connection_set_configuration(&conn, &self.config);
        let state = ConnectionState::<T, C>::new(conn.clone(), self.transport.clone());
        let ops = self.conn_ops_for(state.clone());
        self.connections.lock().insert(conn.clone(), state);
        self.conn_ops.lock().insert(conn, ops);
    }
}

impl<T: QuicTransport, C: Http3Codec, A: Application, E: Executor> ConnectionEvents<T>
    for Http3Server<T, C, A, E>
{
    fn on_connected(&self, conn: T::ConnHandle) {
        let Some(state) = self.connections.lock().get(&conn).cloned() else {
            warn!("on_connected for unknown connection");
            return;
        };
        state.on_connected(&self.config);
    }

    fn on_peer_stream_started(&self, conn: T::ConnHandle, stream: T::StreamHandle) {
        let Some(state) = self.connections.lock().get(&conn).cloned() else {
            return;
        };
        let stream_state = state.register_peer_stream(&stream, StreamRole::request());
        let ready = state.is_ready();
        self.transport.stream_receive_set_enabled(&stream, ready);
        if !ready {
            trace!(
                stream_id = stream_state.stream_id(),
                "peer stream registered before ready, receive deferred"
            );
        }
    }

    fn on_shutdown_complete(&self, conn: T::ConnHandle) {
        let removed = self.connections.lock().remove(&conn);
        self.conn_ops.lock().remove(&conn);
        if let Some(state) = removed {
            state.shutdown();
            self.transport.connection_close(&conn);
        }
        // Idempotent: a second report for an already-removed connection is
        // simply a no-op (§8.7).
    }
}

impl<T: QuicTransport, C: Http3Codec, A: Application, E: Executor> StreamEvents<T>
    for Http3Server<T, C, A, E>
{
    fn on_start_complete(&self, conn: T::ConnHandle, stream: T::StreamHandle, success: bool) {
        if !success {
            warn!("control-family stream failed to start");
            return;
        }
        let Some(state) = self.connections.lock().get(&conn).cloned() else {
            return;
        };
        let became_ready = state.on_local_stream_start_complete(&stream);
        if became_ready {
            flush::flush_connection(&state, self.config.max_flush_batches);
            for stream_id in state.registered_stream_ids() {
                if let Some(handle) = state.lookup_stream_handle(stream_id) {
                    self.transport.stream_receive_set_enabled(&handle, true);
                }
            }
            // Replay bytes that arrived on peer streams while the
            // connection was still bootstrapping, each stream in its own
            // arrival order, now that the codec is bound and ready (§4.E,
            // §8.3).
            for (stream_id, chunks) in state.take_inbound_backlog() {
                for (data, fin) in chunks {
                    self.deliver_receive(&conn, &state, stream_id, &data, fin);
                }
            }
        }
    }

    fn on_receive(&self, conn: T::ConnHandle, stream: T::StreamHandle, data: &[u8], fin: bool) {
        let Some(state) = self.connections.lock().get(&conn).cloned() else {
            return;
        };
        let stream_id = self.transport.get_stream_id(&stream);
        if !state.is_ready() {
            // §8.3 readiness deferral: queue the raw bytes per stream and
            // replay them in order once the connection reaches READY,
            // rather than dropping them outright — the transport may keep
            // calling `on_receive` regardless of whether receive enablement
            // was actually honored.
            state.buffer_inbound(stream_id, data, fin);
            return;
        }
        self.deliver_receive(&conn, &state, stream_id, data, fin);
    }

    fn on_send_complete(&self, _conn: T::ConnHandle, _stream: T::StreamHandle) {
        // Buffer release happens entirely via `SendContext::drop`; the
        // transport binding drops the context it was given once this fires.
        // Nothing further to do at the bridge level (§4.A, §8.5).
    }

    fn on_shutdown_complete(&self, conn: T::ConnHandle, stream: T::StreamHandle) {
        let Some(state) = self.connections.lock().get(&conn).cloned() else {
            return;
        };
        let stream_id = self.transport.get_stream_id(&stream);
        // Idempotent: unregistering an already-removed stream is a no-op.
        if state.unregister_stream(stream_id).is_some() {
            self.transport.stream_close(&stream);
        }
    }
}
