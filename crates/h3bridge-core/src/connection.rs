//! Per-connection HTTP/3 codec instance, stream registry, and readiness
//! gate (component C).

use crate::codec::{Http3Callbacks, Http3Codec, ResponseSource};
use crate::config::ServerConfig;
use crate::stream::{StreamRole, StreamState};
use crate::transport::{QuicTransport, SendFlags};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// The three locally-initiated unidirectional streams every HTTP/3
/// connection opens during bootstrap (§4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStreamKind {
    /// The HTTP/3 control stream.
    Control,
    /// The QPACK encoder stream.
    QpackEncoder,
    /// The QPACK decoder stream.
    QpackDecoder,
}

/// Lifecycle state of a connection, matching the state machine in §4.H.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Accepted by the listener, handshake not yet complete.
    Handshaking,
    /// Handshake complete; the three control-family streams are being
    /// opened and started.
    Bootstrapping,
    /// All three control-family streams started successfully; request
    /// streams may now be processed.
    Ready,
    /// Transport or peer initiated shutdown.
    Closing,
    /// Shutdown complete; this is terminal.
    Closed,
}

struct Mutable<T: QuicTransport, C: Http3Codec> {
    phase: ConnectionPhase,
    codec: Option<C>,
    control_streams: HashMap<ControlStreamKind, T::StreamHandle>,
    started_count: u8,
    streams: HashMap<i64, Arc<StreamState>>,
    stream_handles: HashMap<i64, T::StreamHandle>,
    inbound_backlog: HashMap<i64, Vec<(Vec<u8>, bool)>>,
}

/// State for a single QUIC connection, generic over the transport and codec
/// implementations it was built with.
///
/// A single `parking_lot::Mutex` guards the codec instance, the stream
/// registry, and the readiness phase together, matching §5's requirement
/// that codec calls always run under the connection mutex and that the
/// registry and readiness flag share that same lock.
pub struct ConnectionState<T: QuicTransport, C: Http3Codec> {
    conn: T::ConnHandle,
    transport: Arc<T>,
    inner: Mutex<Mutable<T, C>>,
}

impl<T: QuicTransport, C: Http3Codec> ConnectionState<T, C> {
    /// Construct a fresh, handshaking connection state for `conn`.
    pub fn new(conn: T::ConnHandle, transport: Arc<T>) -> Arc<Self> {
        Arc::new(Self {
            conn,
            transport,
            inner: Mutex::new(Mutable {
                phase: ConnectionPhase::Handshaking,
                codec: None,
                control_streams: HashMap::with_capacity(3),
                started_count: 0,
                streams: HashMap::new(),
                stream_handles: HashMap::new(),
                inbound_backlog: HashMap::new(),
            }),
        })
    }

    /// The underlying transport connection handle.
    pub fn conn_handle(&self) -> &T::ConnHandle {
        &self.conn
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.inner.lock().phase
    }

    /// Whether the connection has completed bootstrap and is accepting
    /// request traffic (§3 invariant (i) on `is_ready`).
    pub fn is_ready(&self) -> bool {
        matches!(self.inner.lock().phase, ConnectionPhase::Ready)
    }

    /// Handshake completed: create the server-mode codec and open the three
    /// control-family streams (§4.C `on_connected`).
    pub fn on_connected(self: &Arc<Self>, config: &ServerConfig) {
        let mut inner = self.inner.lock();
        inner.phase = ConnectionPhase::Bootstrapping;
        inner.codec = Some(C::new_server());
        drop(inner);

        self.transport.connection_set_configuration(&self.conn, config);

        for kind in [
            ControlStreamKind::Control,
            ControlStreamKind::QpackEncoder,
            ControlStreamKind::QpackDecoder,
        ] {
            match self.transport.stream_open(&self.conn, true) {
                Ok(handle) => {
                    let stream_id = self.transport.get_stream_id(&handle);
                    let state = Arc::new(StreamState::new(stream_id, StreamRole::control_family()));
                    {
                        let mut inner = self.inner.lock();
                        inner.control_streams.insert(kind, handle.clone());
                        inner.streams.insert(stream_id, state);
                        inner.stream_handles.insert(stream_id, handle.clone());
                    }
                    if let Err(err) = self.transport.stream_start(&handle, true) {
                        warn!(?err, ?kind, "failed to start control-family stream");
                    }
                }
                Err(err) => warn!(?err, ?kind, "failed to open control-family stream"),
            }
        }
    }

    /// A locally opened stream's start sequence completed. Only
    /// control-family streams are meaningful here (§4.C); once all three
    /// have started, bind the codec's stream ids, flush once, mark ready,
    /// and resume any already-registered peer streams.
    pub fn on_local_stream_start_complete(self: &Arc<Self>, stream: &T::StreamHandle) -> bool {
        let is_control_family = {
            let inner = self.inner.lock();
            inner.control_streams.values().any(|h| h == stream)
        };
        if !is_control_family {
            return false;
        }

        let mut inner = self.inner.lock();
        inner.started_count += 1;
        let became_ready = inner.started_count == 3;
        if became_ready {
            let control_id = inner
                .control_streams
                .get(&ControlStreamKind::Control)
                .map(|h| self.transport.get_stream_id(h))
                .unwrap_or_default();
            let enc_id = inner
                .control_streams
                .get(&ControlStreamKind::QpackEncoder)
                .map(|h| self.transport.get_stream_id(h))
                .unwrap_or_default();
            let dec_id = inner
                .control_streams
                .get(&ControlStreamKind::QpackDecoder)
                .map(|h| self.transport.get_stream_id(h))
                .unwrap_or_default();
            if let Some(codec) = inner.codec.as_mut() {
                codec.bind_control_stream(control_id);
                codec.bind_qpack_streams(enc_id, dec_id);
            }
            inner.phase = ConnectionPhase::Ready;
        }
        became_ready
    }

    /// Register a stream opened by the peer (§4.C `register_peer_stream`).
    /// Registration happens unconditionally, even pre-`Ready`; receive
    /// enablement is decided by the caller per §4.E.
    pub fn register_peer_stream(&self, handle: &T::StreamHandle, role: StreamRole) -> Arc<StreamState> {
        let stream_id = self.transport.get_stream_id(handle);
        let state = Arc::new(StreamState::new(stream_id, role));
        let mut inner = self.inner.lock();
        inner.streams.insert(stream_id, state.clone());
        inner.stream_handles.insert(stream_id, handle.clone());
        state
    }

    /// Look up a registered stream by id. Must tolerate registry churn: a
    /// stream may have been unregistered between a codec callback firing
    /// and this lookup running (§4.C).
    pub fn lookup_stream(&self, stream_id: i64) -> Option<Arc<StreamState>> {
        self.inner.lock().streams.get(&stream_id).cloned()
    }

    /// Look up the transport handle for a registered stream id.
    pub fn lookup_stream_handle(&self, stream_id: i64) -> Option<T::StreamHandle> {
        self.inner.lock().stream_handles.get(&stream_id).cloned()
    }

    /// Look up the role of a registered stream id, if any.
    pub fn stream_role(&self, stream_id: i64) -> Option<StreamRole> {
        self.inner.lock().streams.get(&stream_id).map(|s| s.role())
    }

    /// Remove a stream from the registry, returning it if present.
    pub fn unregister_stream(&self, stream_id: i64) -> Option<Arc<StreamState>> {
        let mut inner = self.inner.lock();
        inner.stream_handles.remove(&stream_id);
        inner.streams.remove(&stream_id)
    }

    /// All currently registered stream ids. Used to resume receive on
    /// already-registered peer streams once the connection becomes ready.
    pub fn registered_stream_ids(&self) -> Vec<i64> {
        self.inner.lock().streams.keys().copied().collect()
    }

    /// Queue raw inbound bytes for `stream_id`, arrived before the
    /// connection reached `Ready` (§4.E/§8.3). Streams are buffered rather
    /// than dropped since a transport binding may keep delivering `receive`
    /// events regardless of whether receive enablement was requested.
    pub fn buffer_inbound(&self, stream_id: i64, data: &[u8], fin: bool) {
        self.inner
            .lock()
            .inbound_backlog
            .entry(stream_id)
            .or_default()
            .push((data.to_vec(), fin));
    }

    /// Detach every stream's buffered pre-ready bytes, preserving each
    /// stream's own arrival order. Called once, when the connection
    /// transitions to `Ready`, so the backlog can be replayed through the
    /// codec exactly as if it had arrived after readiness.
    pub fn take_inbound_backlog(&self) -> HashMap<i64, Vec<(Vec<u8>, bool)>> {
        std::mem::take(&mut self.inner.lock().inbound_backlog)
    }

    /// Feed inbound bytes for `stream_id` through the codec, invoking `cb`
    /// for decoded events, under the connection mutex (§4.E `receive`).
    pub fn read_stream(
        &self,
        stream_id: i64,
        data: &[u8],
        fin: bool,
        cb: &mut dyn Http3Callbacks,
    ) -> Result<(), crate::error::CodecError> {
        let mut inner = self.inner.lock();
        let Some(codec) = inner.codec.as_mut() else {
            return Err(crate::error::CodecError::CallbackFailure(
                "codec not yet initialized".to_string(),
            ));
        };
        codec.read_stream(stream_id, data, fin, cb).map(|_| ())
    }

    /// Submit response headers for `stream_id` through the codec.
    pub fn submit_response(&self, stream_id: i64, headers: crate::buffer::HeaderList, fin: bool) {
        let mut inner = self.inner.lock();
        if let Some(codec) = inner.codec.as_mut() {
            codec.submit_response(stream_id, headers, fin);
        }
    }

    /// Resume a stream previously paused inside the codec (would-block
    /// response pull).
    pub fn resume_stream(&self, stream_id: i64) {
        let mut inner = self.inner.lock();
        if let Some(codec) = inner.codec.as_mut() {
            codec.resume_stream(stream_id);
        }
    }

    /// Pull the next outbound batch from the codec, consulting `src`.
    pub fn writev_stream(&self, src: &dyn ResponseSource) -> Option<crate::codec::WritevResult> {
        let mut inner = self.inner.lock();
        inner.codec.as_mut().and_then(|codec| codec.writev_stream(src))
    }

    /// Inform the codec that `n` bytes for `stream_id` have been accepted.
    pub fn add_write_offset(&self, stream_id: i64, n: usize) {
        let mut inner = self.inner.lock();
        if let Some(codec) = inner.codec.as_mut() {
            codec.add_write_offset(stream_id, n);
        }
    }

    /// Send a batch of buffers on `stream`, with FIN only if `fin` and the
    /// role allows it (control-family streams never carry application FIN,
    /// §8.6).
    pub fn transport_send(
        &self,
        stream: &T::StreamHandle,
        role: StreamRole,
        ctx: crate::buffer::SendContext,
        fin: bool,
    ) {
        let fin = fin && !role.is_control_family;
        if let Err(err) = self
            .transport
            .stream_send(stream, ctx, SendFlags { fin })
        {
            warn!(?err, "stream_send failed");
        }
    }

    /// Mark the connection as closing (transport- or peer-initiated
    /// shutdown). Idempotent: calling this more than once is harmless.
    pub fn begin_closing(&self) {
        let mut inner = self.inner.lock();
        if inner.phase != ConnectionPhase::Closed {
            inner.phase = ConnectionPhase::Closing;
        }
    }

    /// Tear down the connection: drop the codec and every registered
    /// stream. Idempotent per §8.7 (repeated calls are no-ops beyond the
    /// first).
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        if inner.phase == ConnectionPhase::Closed {
            return;
        }
        inner.phase = ConnectionPhase::Closed;
        inner.codec = None;
        inner.streams.clear();
        inner.control_streams.clear();
        debug!("connection shut down");
    }
}
