//! In-crate test doubles for the QUIC transport and HTTP/3 codec
//! boundaries (`FakeTransport`, `FakeCodec`), plus the toy wire format they
//! use between each other. None of this stands in for a real HTTP/3 wire
//! codec — it exists purely to drive the bridge's own state machine in
//! `tests/scenarios.rs` without a network or a real nghttp3-equivalent
//! implementation, mirroring the "external collaborator" boundary in the
//! crate's scope.

use crate::buffer::{Header, HeaderList, SendContext};
use crate::codec::{Http3Callbacks, Http3Codec, ReadOutcome, ResponseSource, WritevFlags, WritevResult};
use crate::config::ServerConfig;
use crate::error::CodecError;
use crate::transport::{QuicTransport, SendFlags};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};

/// Error type reported by [`FakeTransport`]. The fake never actually fails
/// any operation, so this only exists to satisfy [`QuicTransport::Error`].
#[derive(Debug, thiserror::Error)]
#[error("fake transport error: {0}")]
pub struct FakeTransportError(pub String);

/// Bytes a test has observed arriving at a simulated peer for one stream,
/// in send order, alongside whether FIN has been observed.
#[derive(Debug, Default, Clone)]
pub struct PeerLog {
    /// Concatenated bytes of every accepted send on this stream.
    pub bytes: Vec<u8>,
    /// Whether a send carrying FIN has been accepted.
    pub fin: bool,
}

#[derive(Default)]
struct Inner {
    next_stream: i64,
    listen_calls: Vec<(String, u16)>,
    peer_log: HashMap<i64, PeerLog>,
    pending_sends: HashMap<i64, VecDeque<SendContext>>,
    receive_enabled: HashMap<i64, bool>,
    closed_streams: Vec<i64>,
    closed_conns: Vec<i64>,
}

/// A fake QUIC transport recording everything written to it.
///
/// Connection and stream handles are plain `i64` ids the test allocates
/// itself via [`FakeTransport::alloc_conn`] / [`FakeTransport::alloc_peer_stream`]
/// (peer-initiated streams are never opened through
/// [`QuicTransport::stream_open`], so the fake needs a separate allocator
/// for them that tests can drive directly).
#[derive(Default)]
pub struct FakeTransport {
    inner: Mutex<Inner>,
    conn_ctr: AtomicI64,
    stream_ctr: AtomicI64,
}

impl FakeTransport {
    /// A fresh, empty fake transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new connection id, as if the listener had just accepted
    /// a new inbound connection.
    pub fn alloc_conn(&self) -> i64 {
        self.conn_ctr.fetch_add(1, Ordering::Relaxed)
    }

    /// Allocate a new peer-initiated stream id, as if the peer had just
    /// opened a bidirectional request stream.
    pub fn alloc_peer_stream(&self) -> i64 {
        self.stream_ctr.fetch_add(1, Ordering::Relaxed) * 4 + 1000
    }

    /// The bytes (and FIN state) observed so far on `stream_id`.
    pub fn peer_log(&self, stream_id: i64) -> PeerLog {
        self.inner.lock().peer_log.get(&stream_id).cloned().unwrap_or_default()
    }

    /// Whether receive is currently enabled for `stream_id`.
    pub fn receive_enabled(&self, stream_id: i64) -> bool {
        *self.inner.lock().receive_enabled.get(&stream_id).unwrap_or(&false)
    }

    /// Pop the oldest not-yet-completed send context for `stream_id`, as if
    /// the network had just finished transmitting it. Dropping the
    /// returned context is what frees its buffers; callers that want to
    /// also exercise the transport's `on_send_complete` notification should
    /// invoke that after calling this.
    pub fn complete_next_send(&self, stream_id: i64) -> Option<SendContext> {
        self.inner
            .lock()
            .pending_sends
            .get_mut(&stream_id)
            .and_then(VecDeque::pop_front)
    }

    /// How many sends on `stream_id` are still awaiting completion.
    pub fn pending_send_count(&self, stream_id: i64) -> usize {
        self.inner
            .lock()
            .pending_sends
            .get(&stream_id)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Whether `stream_id` has been closed via [`QuicTransport::stream_close`].
    pub fn is_stream_closed(&self, stream_id: i64) -> bool {
        self.inner.lock().closed_streams.contains(&stream_id)
    }

    /// Whether `conn_id` has been closed via [`QuicTransport::connection_close`].
    pub fn is_conn_closed(&self, conn_id: i64) -> bool {
        self.inner.lock().closed_conns.contains(&conn_id)
    }
}

impl QuicTransport for FakeTransport {
    type ConnHandle = i64;
    type StreamHandle = i64;
    type Error = FakeTransportError;

    fn listen(&self, host: &str, port: u16, _config: &ServerConfig) -> Result<(), Self::Error> {
        self.inner.lock().listen_calls.push((host.to_string(), port));
        Ok(())
    }

    fn get_stream_id(&self, stream: &Self::StreamHandle) -> i64 {
        *stream
    }

    fn stream_open(&self, _conn: &Self::ConnHandle, _unidirectional: bool) -> Result<Self::StreamHandle, Self::Error> {
        let mut inner = self.inner.lock();
        inner.next_stream -= 1;
        Ok(inner.next_stream)
    }

    fn stream_start(&self, _stream: &Self::StreamHandle, _immediate: bool) -> Result<(), Self::Error> {
        Ok(())
    }

    fn stream_send(&self, stream: &Self::StreamHandle, ctx: SendContext, flags: SendFlags) -> Result<(), Self::Error> {
        let mut inner = self.inner.lock();
        let log = inner.peer_log.entry(*stream).or_default();
        for buf in &ctx.buffers {
            log.bytes.extend_from_slice(buf);
        }
        if flags.fin {
            log.fin = true;
        }
        inner.pending_sends.entry(*stream).or_default().push_back(ctx);
        Ok(())
    }

    fn stream_receive_set_enabled(&self, stream: &Self::StreamHandle, enabled: bool) {
        self.inner.lock().receive_enabled.insert(*stream, enabled);
    }

    fn stream_close(&self, stream: &Self::StreamHandle) {
        self.inner.lock().closed_streams.push(*stream);
    }

    fn connection_set_configuration(&self, _conn: &Self::ConnHandle, _config: &ServerConfig) {}

    fn connection_close(&self, conn: &Self::ConnHandle) {
        self.inner.lock().closed_conns.push(*conn);
    }
}

const TAG_HEADER: u8 = 1;
const TAG_END_HEADERS: u8 = 2;
const TAG_DATA: u8 = 3;
const TAG_END_STREAM: u8 = 4;

fn write_u32(buf: &mut Vec<u8>, n: usize) {
    buf.extend_from_slice(&(n as u32).to_be_bytes());
}

fn read_u32(buf: &[u8], at: usize) -> Option<usize> {
    buf.get(at..at + 4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize)
}

/// Toy wire-format encoders/decoders shared by [`FakeCodec`] and tests that
/// need to build request bytes or inspect response bytes directly.
pub mod wire {
    use super::*;

    /// Encode a single header frame.
    pub fn encode_header(buf: &mut Vec<u8>, header: &Header) {
        buf.push(TAG_HEADER);
        write_u32(buf, header.name.len());
        buf.extend_from_slice(&header.name);
        write_u32(buf, header.value.len());
        buf.extend_from_slice(&header.value);
    }

    /// Encode an end-of-headers frame.
    pub fn encode_end_headers(buf: &mut Vec<u8>, fin: bool) {
        buf.push(TAG_END_HEADERS);
        buf.push(fin as u8);
    }

    /// Encode a body data frame.
    pub fn encode_data(buf: &mut Vec<u8>, data: &[u8]) {
        buf.push(TAG_DATA);
        write_u32(buf, data.len());
        buf.extend_from_slice(data);
    }

    /// Encode an end-of-stream frame.
    pub fn encode_end_stream(buf: &mut Vec<u8>) {
        buf.push(TAG_END_STREAM);
    }

    /// Build a full request: a header block, zero or more body chunks, and
    /// (if `fin`) an explicit end-of-stream frame — mirroring how a real
    /// HTTP/3 codec reports request completion through `end_stream`
    /// regardless of whether the request carried a body.
    pub fn encode_request(headers: &[Header], body_chunks: &[&[u8]], fin: bool) -> Vec<u8> {
        let mut buf = Vec::new();
        for h in headers {
            encode_header(&mut buf, h);
        }
        encode_end_headers(&mut buf, false);
        for chunk in body_chunks {
            encode_data(&mut buf, chunk);
        }
        if fin {
            encode_end_stream(&mut buf);
        }
        buf
    }

    /// A decoded response: headers, concatenated body, and FIN state.
    #[derive(Debug, Default, Clone)]
    pub struct DecodedMessage {
        /// Header list in arrival order.
        pub headers: HeaderList,
        /// Concatenated body bytes.
        pub body: Vec<u8>,
        /// Whether an end-of-headers-with-fin or end-stream frame was seen.
        pub fin: bool,
    }

    /// Decode every complete frame out of `bytes`, for assertions against
    /// [`super::FakeTransport::peer_log`] output. Any trailing partial
    /// frame is silently ignored (tests decode fully flushed output).
    pub fn decode_message(bytes: &[u8]) -> DecodedMessage {
        let mut out = DecodedMessage::default();
        let mut at = 0usize;
        while at < bytes.len() {
            match bytes[at] {
                TAG_HEADER => {
                    let Some(name_len) = read_u32(bytes, at + 1) else { break };
                    let name_start = at + 5;
                    let Some(name) = bytes.get(name_start..name_start + name_len) else { break };
                    let value_len_at = name_start + name_len;
                    let Some(value_len) = read_u32(bytes, value_len_at) else { break };
                    let value_start = value_len_at + 4;
                    let Some(value) = bytes.get(value_start..value_start + value_len) else { break };
                    out.headers.push(Header::new(name.to_vec(), value.to_vec()));
                    at = value_start + value_len;
                }
                TAG_END_HEADERS => {
                    let Some(&fin_byte) = bytes.get(at + 1) else { break };
                    if fin_byte != 0 {
                        out.fin = true;
                    }
                    at += 2;
                }
                TAG_DATA => {
                    let Some(len) = read_u32(bytes, at + 1) else { break };
                    let start = at + 5;
                    let Some(data) = bytes.get(start..start + len) else { break };
                    out.body.extend_from_slice(data);
                    at = start + len;
                }
                TAG_END_STREAM => {
                    out.fin = true;
                    at += 1;
                }
                _ => break,
            }
        }
        out
    }
}

#[derive(Default)]
struct OutboundState {
    pending_headers: Option<(HeaderList, bool)>,
    headers_sent: bool,
}

/// A fake HTTP/3 codec using the toy frame format in [`wire`].
///
/// Reassembles frames across arbitrarily split `read_stream` calls (so
/// split-body scenarios exercise the bridge the same way a real streaming
/// codec would), and serves outbound data strictly in the order
/// [`Http3Codec::submit_response`]/[`Http3Codec::resume_stream`] requested it.
#[derive(Default)]
pub struct FakeCodec {
    control_stream_id: Option<i64>,
    encoder_stream_id: Option<i64>,
    decoder_stream_id: Option<i64>,
    inbound_buffers: HashMap<i64, Vec<u8>>,
    outbound: HashMap<i64, OutboundState>,
    ready_queue: VecDeque<i64>,
}

impl FakeCodec {
    fn parse_available(buf: &mut Vec<u8>, stream_id: i64, cb: &mut dyn Http3Callbacks) -> Result<(), CodecError> {
        loop {
            if buf.is_empty() {
                return Ok(());
            }
            match buf[0] {
                TAG_HEADER => {
                    let Some(name_len) = read_u32(buf, 1) else { return Ok(()) };
                    let name_start = 5;
                    if buf.len() < name_start + name_len + 4 {
                        return Ok(());
                    }
                    let name = buf[name_start..name_start + name_len].to_vec();
                    let value_len_at = name_start + name_len;
                    let Some(value_len) = read_u32(buf, value_len_at) else { return Ok(()) };
                    let value_start = value_len_at + 4;
                    if buf.len() < value_start + value_len {
                        return Ok(());
                    }
                    let value = buf[value_start..value_start + value_len].to_vec();
                    cb.recv_header(stream_id, Bytes::from(name), Bytes::from(value));
                    buf.drain(..value_start + value_len);
                }
                TAG_END_HEADERS => {
                    if buf.len() < 2 {
                        return Ok(());
                    }
                    let fin = buf[1] != 0;
                    cb.end_headers(stream_id, fin);
                    buf.drain(..2);
                }
                TAG_DATA => {
                    let Some(len) = read_u32(buf, 1) else { return Ok(()) };
                    if buf.len() < 5 + len {
                        return Ok(());
                    }
                    cb.recv_data(stream_id, &buf[5..5 + len]);
                    buf.drain(..5 + len);
                }
                TAG_END_STREAM => {
                    cb.end_stream(stream_id);
                    buf.drain(..1);
                }
                other => {
                    return Err(CodecError::CallbackFailure(format!("unknown frame tag {other}")));
                }
            }
        }
    }
}

impl Http3Codec for FakeCodec {
    fn new_server() -> Self {
        Self::default()
    }

    fn bind_control_stream(&mut self, stream_id: i64) {
        self.control_stream_id = Some(stream_id);
    }

    fn bind_qpack_streams(&mut self, encoder_id: i64, decoder_id: i64) {
        self.encoder_stream_id = Some(encoder_id);
        self.decoder_stream_id = Some(decoder_id);
    }

    fn set_stream_user_data(&mut self, _stream_id: i64) {}

    fn read_stream(
        &mut self,
        stream_id: i64,
        data: &[u8],
        fin: bool,
        cb: &mut dyn Http3Callbacks,
    ) -> Result<ReadOutcome, CodecError> {
        let buf = self.inbound_buffers.entry(stream_id).or_default();
        buf.extend_from_slice(data);
        Self::parse_available(buf, stream_id, cb)?;
        if fin {
            let trailing_empty = self.inbound_buffers.get(&stream_id).map(Vec::is_empty).unwrap_or(true);
            if !trailing_empty {
                return Err(CodecError::CallbackFailure("fin with truncated frame".to_string()));
            }
        }
        Ok(ReadOutcome::Consumed)
    }

    fn submit_response(&mut self, stream_id: i64, headers: HeaderList, fin: bool) {
        let state = self.outbound.entry(stream_id).or_default();
        state.pending_headers = Some((headers, fin));
        self.ready_queue.push_back(stream_id);
    }

    fn resume_stream(&mut self, stream_id: i64) {
        if self.outbound.contains_key(&stream_id) {
            self.ready_queue.push_back(stream_id);
        }
    }

    fn writev_stream(&mut self, src: &dyn ResponseSource) -> Option<WritevResult> {
        while let Some(stream_id) = self.ready_queue.pop_front() {
            let Some(state) = self.outbound.get_mut(&stream_id) else {
                continue;
            };
            if !state.headers_sent {
                let Some((headers, fin)) = state.pending_headers.take() else {
                    continue;
                };
                state.headers_sent = true;
                let mut buf = Vec::new();
                for h in &headers {
                    wire::encode_header(&mut buf, h);
                }
                wire::encode_end_headers(&mut buf, fin);
                if !fin {
                    self.ready_queue.push_back(stream_id);
                }
                return Some(WritevResult {
                    stream_id,
                    vecs: vec![Bytes::from(buf)],
                    flags: WritevFlags { fin },
                });
            }

            let (vecs, eof) = src.pull_response(stream_id, 16);
            if vecs.is_empty() && !eof {
                continue;
            }
            let mut buf = Vec::new();
            for v in &vecs {
                wire::encode_data(&mut buf, v);
            }
            if eof {
                wire::encode_end_stream(&mut buf);
            } else {
                self.ready_queue.push_back(stream_id);
            }
            return Some(WritevResult {
                stream_id,
                vecs: vec![Bytes::from(buf)],
                flags: WritevFlags { fin: eof },
            });
        }
        None
    }

    fn add_write_offset(&mut self, _stream_id: i64, _n: usize) {}
}
