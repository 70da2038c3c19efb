//! The QUIC transport boundary (component E's collaborator).
//!
//! This module defines the contract the bridge requires from a QUIC
//! implementation, modeled after the callback-driven shape of MsQuic and
//! mirroring how `salvo_http3::quic` generalizes over a concrete QUIC crate
//! with `Connection`/`OpenStreams`/`SendStream`/`RecvStream` traits. The
//! bridge is generic over this trait family (`QuicTransport` plus the three
//! event-handler traits it dispatches into); `h3bridge-quinn` is one
//! concrete binding, and a fake implementation lives behind `testutil` for
//! scenario tests.

use crate::buffer::SendContext;
use crate::config::ServerConfig;
use std::fmt::Debug;
use std::hash::Hash;

/// Error type a transport implementation reports through this trait family.
pub trait TransportError: std::error::Error + Send + Sync + 'static {}
impl<E: std::error::Error + Send + Sync + 'static> TransportError for E {}

/// Flags accompanying a `stream_send` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendFlags {
    /// Mark the final byte of this send as the stream's FIN.
    pub fin: bool,
}

/// Operations the bridge requires from a QUIC connection handle.
///
/// Implemented by a real connection object (`h3bridge-quinn`) or a fake
/// (`testutil`). Handles are required to be `Clone + Eq + Hash` so they can
/// be used as registry/lookup keys without the bridge knowing their
/// representation.
pub trait QuicTransport: Send + Sync + 'static {
    /// Opaque handle to a live QUIC connection.
    type ConnHandle: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    /// Opaque handle to a live QUIC stream.
    type StreamHandle: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    /// Error type surfaced by transport operations.
    type Error: TransportError;

    /// Start listening on `host:port` with the given configuration,
    /// including TLS credential load and ALPN/idle-timeout/stream-limit
    /// registration. Corresponds to the original's registration + config +
    /// credential-load + listener-start sequence, collapsed into one call
    /// because the core never needs the intermediate handles.
    fn listen(&self, host: &str, port: u16, config: &ServerConfig) -> Result<(), Self::Error>;

    /// Retrieve the 64-bit QUIC stream id for a stream handle.
    fn get_stream_id(&self, stream: &Self::StreamHandle) -> i64;

    /// Open a new stream on `conn`. `unidirectional` selects stream type.
    fn stream_open(
        &self,
        conn: &Self::ConnHandle,
        unidirectional: bool,
    ) -> Result<Self::StreamHandle, Self::Error>;

    /// Start a previously opened stream. `immediate` requests the transport
    /// begin the handshake-level stream start right away rather than lazily
    /// on first send.
    fn stream_start(&self, stream: &Self::StreamHandle, immediate: bool) -> Result<(), Self::Error>;

    /// Hand ownership of `ctx`'s buffers to the transport for sending.
    /// `send_complete` on the corresponding [`StreamEvents`] fires exactly
    /// once the data has been accepted, at which point the transport must
    /// drop `ctx`.
    fn stream_send(
        &self,
        stream: &Self::StreamHandle,
        ctx: SendContext,
        flags: SendFlags,
    ) -> Result<(), Self::Error>;

    /// Enable or pause delivery of `receive` events for `stream`.
    fn stream_receive_set_enabled(&self, stream: &Self::StreamHandle, enabled: bool);

    /// Close a stream handle and release transport-side resources for it.
    fn stream_close(&self, stream: &Self::StreamHandle);

    /// Apply (or re-apply) the server configuration to an established
    /// connection, e.g. after codec bootstrap.
    fn connection_set_configuration(&self, conn: &Self::ConnHandle, config: &ServerConfig);

    /// Close a connection handle and release transport-side resources.
    fn connection_close(&self, conn: &Self::ConnHandle);
}

/// Events the transport reports about the listener itself.
pub trait ListenerEvents<T: QuicTransport>: Send + Sync + 'static {
    /// A new inbound connection was accepted.
    fn on_new_connection(&self, conn: T::ConnHandle);
}

/// Events the transport reports about a single connection.
pub trait ConnectionEvents<T: QuicTransport>: Send + Sync + 'static {
    /// The QUIC handshake completed and the connection is usable.
    fn on_connected(&self, conn: T::ConnHandle);

    /// A peer opened a new stream on this connection.
    fn on_peer_stream_started(&self, conn: T::ConnHandle, stream: T::StreamHandle);

    /// The connection has fully shut down and all its resources may be
    /// released. Must be idempotent: the transport may (in principle)
    /// report this more than once for the same handle.
    fn on_shutdown_complete(&self, conn: T::ConnHandle);
}

/// Events the transport reports about a single stream.
pub trait StreamEvents<T: QuicTransport>: Send + Sync + 'static {
    /// A previously opened stream finished its start sequence.
    fn on_start_complete(&self, conn: T::ConnHandle, stream: T::StreamHandle, success: bool);

    /// New bytes arrived on `stream`. `fin` indicates these are the final
    /// bytes of the peer's send side, even when `data` is empty.
    fn on_receive(&self, conn: T::ConnHandle, stream: T::StreamHandle, data: &[u8], fin: bool);

    /// A previous `stream_send` has been fully accepted by the transport;
    /// its [`SendContext`] should be dropped by the caller of this callback
    /// (the transport binding owns that drop).
    fn on_send_complete(&self, conn: T::ConnHandle, stream: T::StreamHandle);

    /// The stream has fully shut down; any per-stream state may be freed.
    /// Must be idempotent, matching [`ConnectionEvents::on_shutdown_complete`].
    fn on_shutdown_complete(&self, conn: T::ConnHandle, stream: T::StreamHandle);
}
