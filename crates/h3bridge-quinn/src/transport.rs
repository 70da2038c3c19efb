//! Adapts `quinn`'s async `Endpoint`/`Connection`/stream API to
//! [`h3bridge_core::transport::QuicTransport`]'s synchronous, callback-style
//! contract.

use crate::credentials;
use h3bridge_core::buffer::SendContext;
use h3bridge_core::config::ServerConfig;
use h3bridge_core::transport::{ConnectionEvents, ListenerEvents, QuicTransport, SendFlags, StreamEvents};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, error, info, warn};

/// Error surfaced by [`QuinnTransport`] operations.
#[derive(Debug, thiserror::Error)]
pub enum QuinnTransportError {
    /// TLS credential loading failed.
    #[error(transparent)]
    Credentials(#[from] credentials::CredentialError),
    /// The endpoint could not be bound to its local address.
    #[error("failed to bind quinn endpoint: {0}")]
    Bind(#[source] std::io::Error),
    /// `rustls` rejected the server configuration.
    #[error("invalid rustls server configuration: {0}")]
    Tls(#[from] rustls::Error),
    /// The transport's internal connection/stream registry is in an
    /// unexpected state (e.g. a stream handle from a closed connection).
    #[error("unknown transport handle")]
    UnknownHandle,
    /// A transport method was called before [`QuinnTransport::bind_handler`].
    #[error("QuinnTransport used before a handler was bound")]
    HandlerNotBound,
}

struct StreamSlot {
    // A tokio async mutex, not `parking_lot`'s: `stream_send` holds this
    // guard across `.await` points (so concurrent sends to the same stream
    // serialize rather than racing each other's write order), which a
    // non-async-aware lock cannot do safely inside a spawned future.
    send: tokio::sync::Mutex<Option<quinn::SendStream>>,
}

struct ConnSlot {
    connection: quinn::Connection,
    streams: Mutex<HashMap<u64, Arc<StreamSlot>>>,
}

/// The core's `ListenerEvents<T>`/`ConnectionEvents<T>`/`StreamEvents<T>`
/// traits are generic over the transport type `T`. In practice `T` here is
/// always `QuinnTransport` itself and the handler is always
/// `h3bridge_core::Http3Server<QuinnTransport, ..>` — but naming that type
/// directly would require `QuinnTransport` to be generic over a handler `H`
/// whose own type parameter is `QuinnTransport<H>`, an infinite type with no
/// fixed point. This trait erases the handler to plain `u64` ids instead, so
/// `QuinnTransport` itself stays a concrete, non-generic type and the cycle
/// never has to be named.
trait ErasedEvents: Send + Sync {
    fn on_new_connection(&self, conn: u64);
    fn on_connected(&self, conn: u64);
    fn on_peer_stream_started(&self, conn: u64, stream: u64);
    fn on_conn_shutdown_complete(&self, conn: u64);
    fn on_start_complete(&self, conn: u64, stream: u64, success: bool);
    fn on_receive(&self, conn: u64, stream: u64, data: &[u8], fin: bool);
    fn on_send_complete(&self, conn: u64, stream: u64);
    fn on_stream_shutdown_complete(&self, conn: u64, stream: u64);
}

struct EventsAdapter<H>(Arc<H>);

impl<H> ErasedEvents for EventsAdapter<H>
where
    H: ListenerEvents<QuinnTransport> + ConnectionEvents<QuinnTransport> + StreamEvents<QuinnTransport> + Send + Sync,
{
    fn on_new_connection(&self, conn: u64) {
        ListenerEvents::<QuinnTransport>::on_new_connection(&*self.0, conn)
    }

    fn on_connected(&self, conn: u64) {
        ConnectionEvents::<QuinnTransport>::on_connected(&*self.0, conn)
    }

    fn on_peer_stream_started(&self, conn: u64, stream: u64) {
        ConnectionEvents::<QuinnTransport>::on_peer_stream_started(&*self.0, conn, stream)
    }

    fn on_conn_shutdown_complete(&self, conn: u64) {
        ConnectionEvents::<QuinnTransport>::on_shutdown_complete(&*self.0, conn)
    }

    fn on_start_complete(&self, conn: u64, stream: u64, success: bool) {
        StreamEvents::<QuinnTransport>::on_start_complete(&*self.0, conn, stream, success)
    }

    fn on_receive(&self, conn: u64, stream: u64, data: &[u8], fin: bool) {
        StreamEvents::<QuinnTransport>::on_receive(&*self.0, conn, stream, data, fin)
    }

    fn on_send_complete(&self, conn: u64, stream: u64) {
        StreamEvents::<QuinnTransport>::on_send_complete(&*self.0, conn, stream)
    }

    fn on_stream_shutdown_complete(&self, conn: u64, stream: u64) {
        StreamEvents::<QuinnTransport>::on_shutdown_complete(&*self.0, conn, stream)
    }
}

/// A [`QuicTransport`] implementation backed by a real `quinn::Endpoint`.
///
/// The handler (in practice an `h3bridge_core::Http3Server<QuinnTransport, ..>`)
/// is bound after construction via [`QuinnTransport::bind_handler`] rather
/// than supplied to `new`, since the server itself needs an `Arc<QuinnTransport>`
/// to exist before it can be built. Every transport method other than
/// `bind_handler` expects the handler to already be bound; `listen` is the
/// first one actually called, so ordinary construction order satisfies this.
pub struct QuinnTransport {
    handler: OnceLock<Arc<dyn ErasedEvents>>,
    conns: Mutex<HashMap<u64, Arc<ConnSlot>>>,
    next_conn_id: AtomicU64,
    next_stream_id: AtomicU64,
    /// Set once by `new` so methods that spawn long-lived tasks (`listen`)
    /// can obtain an owned `Arc<Self>` from a plain `&self` receiver,
    /// without the `QuicTransport` trait itself needing an `Arc<Self>`
    /// receiver (it is shared generically as `Arc<T>` by `ConnectionState`,
    /// but individual trait methods only ever get `&self`).
    self_weak: Mutex<Weak<Self>>,
}

impl QuinnTransport {
    /// Construct a transport with no handler bound yet.
    pub fn new() -> Arc<Self> {
        let this = Arc::new(Self {
            handler: OnceLock::new(),
            conns: Mutex::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
            next_stream_id: AtomicU64::new(1),
            self_weak: Mutex::new(Weak::new()),
        });
        *this.self_weak.lock() = Arc::downgrade(&this);
        this
    }

    /// Bind the handler that will receive every transport event. Must be
    /// called exactly once, before `listen`.
    ///
    /// # Panics
    ///
    /// Panics if a handler has already been bound.
    pub fn bind_handler<H>(&self, handler: Arc<H>)
    where
        H: ListenerEvents<Self> + ConnectionEvents<Self> + StreamEvents<Self> + Send + Sync + 'static,
    {
        self.handler
            .set(Arc::new(EventsAdapter(handler)))
            .unwrap_or_else(|_| panic!("QuinnTransport::bind_handler called more than once"));
    }

    fn handler(&self) -> Result<&Arc<dyn ErasedEvents>, QuinnTransportError> {
        self.handler.get().ok_or(QuinnTransportError::HandlerNotBound)
    }

    fn alloc_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    fn alloc_stream_id(&self) -> u64 {
        self.next_stream_id.fetch_add(1, Ordering::Relaxed)
    }

    fn build_server_config(config: &ServerConfig) -> Result<quinn::ServerConfig, QuinnTransportError> {
        let creds = credentials::load(&config.cert_path, &config.key_path)?;
        let mut tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(creds.cert_chain, creds.private_key)?;
        tls_config.alpn_protocols = config.alpn_protocols.clone();

        let quic_tls = quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
            .map_err(|err| QuinnTransportError::Tls(rustls::Error::General(err.to_string())))?;
        let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_tls));
        let mut transport_config = quinn::TransportConfig::default();
        transport_config.max_idle_timeout(Some(
            quinn::IdleTimeout::try_from(std::time::Duration::from_millis(config.idle_timeout_ms))
                .expect("idle timeout fits in quinn's VarInt representation"),
        ));
        transport_config.max_concurrent_bidi_streams(quinn::VarInt::from_u64(config.peer_bidi_stream_limit).unwrap_or(quinn::VarInt::MAX));
        transport_config.max_concurrent_uni_streams(quinn::VarInt::from_u64(config.peer_uni_stream_limit).unwrap_or(quinn::VarInt::MAX));
        server_config.transport_config(Arc::new(transport_config));
        Ok(server_config)
    }

    /// Spawn the per-connection tasks: await the handshake, report
    /// `on_connected`, then concurrently accept peer-initiated bidi streams
    /// and drive each to completion.
    fn spawn_connection_tasks(self: &Arc<Self>, conn_id: u64, connecting: quinn::Connecting) {
        let this = self.clone();
        tokio::spawn(async move {
            let connection = match connecting.await {
                Ok(connection) => connection,
                Err(err) => {
                    warn!(conn_id, %err, "quinn handshake failed");
                    return;
                }
            };
            debug!(conn_id, "quinn handshake complete");
            this.conns.lock().insert(
                conn_id,
                Arc::new(ConnSlot {
                    connection: connection.clone(),
                    streams: Mutex::new(HashMap::new()),
                }),
            );
            let Ok(handler) = this.handler() else {
                error!(conn_id, "handler not bound, dropping connection");
                return;
            };
            handler.on_connected(conn_id);

            loop {
                match connection.accept_bi().await {
                    Ok((send, recv)) => {
                        let stream_id = this.alloc_stream_id();
                        if let Some(slot) = this.conns.lock().get(&conn_id).cloned() {
                            slot.streams.lock().insert(
                                stream_id,
                                Arc::new(StreamSlot {
                                    send: tokio::sync::Mutex::new(Some(send)),
                                }),
                            );
                        }
                        if let Ok(handler) = this.handler() {
                            handler.on_peer_stream_started(conn_id, stream_id);
                        }
                        this.spawn_stream_read_loop(conn_id, stream_id, recv);
                    }
                    Err(err) => {
                        debug!(conn_id, %err, "connection closed, ending accept loop");
                        break;
                    }
                }
            }

            this.conns.lock().remove(&conn_id);
            if let Ok(handler) = this.handler() {
                handler.on_conn_shutdown_complete(conn_id);
            }
        });
    }

    fn spawn_stream_read_loop(self: &Arc<Self>, conn_id: u64, stream_id: u64, mut recv: quinn::RecvStream) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 16 * 1024];
            loop {
                let Ok(handler) = this.handler() else { break };
                match recv.read(&mut buf).await {
                    Ok(Some(n)) => {
                        handler.on_receive(conn_id, stream_id, &buf[..n], false);
                    }
                    Ok(None) => {
                        handler.on_receive(conn_id, stream_id, &[], true);
                        break;
                    }
                    Err(err) => {
                        debug!(conn_id, stream_id, %err, "stream read error, treating as fin");
                        handler.on_receive(conn_id, stream_id, &[], true);
                        break;
                    }
                }
            }
            if let Ok(handler) = this.handler() {
                handler.on_stream_shutdown_complete(conn_id, stream_id);
            }
        });
    }
}

impl QuicTransport for QuinnTransport {
    type ConnHandle = u64;
    type StreamHandle = u64;
    type Error = QuinnTransportError;

    fn listen(&self, host: &str, port: u16, config: &ServerConfig) -> Result<(), Self::Error> {
        self.handler()?;
        let server_config = Self::build_server_config(config)?;
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], port)));
        let endpoint = quinn::Endpoint::server(server_config, addr).map_err(QuinnTransportError::Bind)?;
        info!(%addr, "quinn endpoint listening");

        // `listen` needs an owned `Arc<Self>` to outlive the spawned accept
        // loop task; recover it from the weak handle `new` stashed, rather
        // than threading an `Arc<Self>` receiver through the trait itself.
        let this = self.self_weak.lock().upgrade().ok_or(QuinnTransportError::UnknownHandle)?;
        tokio::spawn(async move {
            loop {
                match endpoint.accept().await {
                    Some(connecting) => {
                        let conn_id = this.alloc_conn_id();
                        if let Ok(handler) = this.handler() {
                            handler.on_new_connection(conn_id);
                        }
                        this.spawn_connection_tasks(conn_id, connecting);
                    }
                    None => {
                        info!("quinn endpoint closed");
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    fn get_stream_id(&self, stream: &Self::StreamHandle) -> i64 {
        *stream as i64
    }

    fn stream_open(&self, conn: &Self::ConnHandle, unidirectional: bool) -> Result<Self::StreamHandle, Self::Error> {
        let slot = self.conns.lock().get(conn).cloned().ok_or(QuinnTransportError::UnknownHandle)?;
        let connection = slot.connection.clone();
        let stream_id = self.alloc_stream_id();
        let streams = slot.streams.clone();
        // quinn's stream-open is itself async (it waits for flow-control
        // credit); the core's contract treats `stream_open` as returning a
        // handle immediately and reports true readiness via
        // `on_start_complete`, so we open eagerly in a background task and
        // report completion once it resolves.
        let conn_id = *conn;
        let this_streams = streams;
        let this = self.self_weak.lock().upgrade();
        tokio::spawn(async move {
            let opened = if unidirectional {
                connection.open_uni().await.map(|send| (send, None))
            } else {
                connection.open_bi().await.map(|(send, recv)| (send, Some(recv)))
            };
            match opened {
                Ok((send, _recv)) => {
                    this_streams.lock().insert(stream_id, Arc::new(StreamSlot { send: tokio::sync::Mutex::new(Some(send)) }));
                    if let Some(this) = this.as_ref() {
                        if let Ok(handler) = this.handler() {
                            handler.on_start_complete(conn_id, stream_id, true);
                        }
                    }
                }
                Err(err) => {
                    error!(conn_id, stream_id, %err, "failed to open local stream");
                    if let Some(this) = this.as_ref() {
                        if let Ok(handler) = this.handler() {
                            handler.on_start_complete(conn_id, stream_id, false);
                        }
                    }
                }
            }
        });
        Ok(stream_id)
    }

    fn stream_start(&self, _stream: &Self::StreamHandle, _immediate: bool) -> Result<(), Self::Error> {
        // Start is implicit in quinn once the stream is opened; completion
        // is reported from `stream_open`'s background task instead.
        Ok(())
    }

    fn stream_send(&self, stream: &Self::StreamHandle, ctx: SendContext, flags: SendFlags) -> Result<(), Self::Error> {
        let stream_id = *stream;
        let send_stream = self.conns.lock().values().find_map(|slot| {
            slot.streams.lock().get(&stream_id).cloned()
        });
        let Some(slot) = send_stream else {
            return Err(QuinnTransportError::UnknownHandle);
        };
        let this = self.self_weak.lock().upgrade();
        let conn_id = self
            .conns
            .lock()
            .iter()
            .find(|(_, s)| s.streams.lock().contains_key(&stream_id))
            .map(|(id, _)| *id)
            .unwrap_or_default();
        tokio::spawn(async move {
            let write_result: Result<(), quinn::WriteError> = async {
                // An async mutex, held across the `.await`s below: two
                // `stream_send` calls racing for the same stream must write
                // in the order they acquire the lock, not the order their
                // tasks happen to get polled.
                let mut guard = slot.send.lock().await;
                if let Some(send) = guard.as_mut() {
                    for buf in &ctx.buffers {
                        send.write_all(buf).await?;
                    }
                    if flags.fin {
                        let _ = send.finish();
                    }
                }
                Ok(())
            }
            .await;
            if let Err(err) = write_result {
                warn!(stream_id, %err, "stream write failed");
            }
            drop(ctx);
            if let Some(this) = this.as_ref() {
                if let Ok(handler) = this.handler() {
                    handler.on_send_complete(conn_id, stream_id);
                }
            }
        });
        Ok(())
    }

    fn stream_receive_set_enabled(&self, stream: &Self::StreamHandle, enabled: bool) {
        // quinn has no explicit pause primitive at this layer; pausing is
        // realized by the core simply not calling `read_stream` for bytes
        // delivered while disabled. A production binding would stop
        // polling the recv future instead of discarding backpressure
        // signals; tracked as a known simplification (see DESIGN.md).
        debug!(stream_id = *stream, enabled, "stream_receive_set_enabled (no-op in this binding)");
    }

    fn stream_close(&self, stream: &Self::StreamHandle) {
        let stream_id = *stream;
        for slot in self.conns.lock().values() {
            slot.streams.lock().remove(&stream_id);
        }
    }

    fn connection_set_configuration(&self, _conn: &Self::ConnHandle, _config: &ServerConfig) {
        // Applied once at `listen` time via the quinn `ServerConfig`;
        // quinn does not support per-connection reconfiguration.
    }

    fn connection_close(&self, conn: &Self::ConnHandle) {
        if let Some(slot) = self.conns.lock().remove(conn) {
            slot.connection.close(quinn::VarInt::from_u32(0), b"closed");
        }
    }
}
