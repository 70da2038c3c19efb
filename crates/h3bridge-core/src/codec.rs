//! The HTTP/3 codec boundary (component F's collaborator).
//!
//! Mirrors the nghttp3 callback surface described in the spec: the codec
//! decodes inbound bytes into header/data/end events (delivered through
//! [`Http3Callbacks`], which the bridge implements) and, on the write side,
//! is pulled for outbound vectors rather than pushed into. `h3bridge-core`
//! never implements a real QPACK/frame codec — that stays an external
//! collaborator per the scope note in the spec — but defines the trait
//! shape a real one (or `testutil::FakeCodec`) must satisfy.

use crate::buffer::HeaderList;
use crate::error::CodecError;
use bytes::Bytes;

/// Flags returned alongside a batch of outbound vectors from
/// [`Http3Codec::writev_stream`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WritevFlags {
    /// This batch carries the stream's final bytes.
    pub fin: bool,
}

/// One batch of outbound data produced by the codec for a single stream.
#[derive(Debug, Clone)]
pub struct WritevResult {
    /// Stream id this batch belongs to.
    pub stream_id: i64,
    /// Outbound vectors, in order. Already stable, owned allocations —
    /// copying out of the codec's internal buffers is the adapter's job
    /// (see [`crate::flush`]), not the codec's.
    pub vecs: Vec<Bytes>,
    /// FIN / end-of-batch flags.
    pub flags: WritevFlags,
}

/// Outcome of asking the codec to read inbound bytes for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes were consumed successfully.
    Consumed,
}

/// Callbacks the codec invokes synchronously, within `read_stream`, to
/// report decoded events. The bridge's connection-state module implements
/// this trait; the codec never retains a reference to it past a single
/// call.
pub trait Http3Callbacks: Send + Sync {
    /// A header field was decoded for `stream_id`.
    fn recv_header(&mut self, stream_id: i64, name: Bytes, value: Bytes);

    /// The header block for `stream_id` is complete. `fin` reports whether
    /// the peer's send side ended with the header block (no body follows).
    fn end_headers(&mut self, stream_id: i64, fin: bool);

    /// A chunk of request body was decoded for `stream_id`. The codec may
    /// reuse the buffer behind `data` after this call returns, so the
    /// callback must copy anything it needs to keep.
    fn recv_data(&mut self, stream_id: i64, data: &[u8]);

    /// The peer's send side for `stream_id` has ended.
    fn end_stream(&mut self, stream_id: i64);
}

/// Callback the codec invokes to pull response data for a stream it wants
/// to write (the data-reader half of §4.F).
pub trait ResponseSource: Send + Sync {
    /// Pull up to `max_vecs` unsent response vectors for `stream_id`.
    ///
    /// Returns `Ok((vecs, fin))` where an empty `vecs` with `fin == true`
    /// signals EOF for the stream's response body, and an empty `vecs`
    /// with `fin == false` signals backpressure (`CodecError::WouldBlock`
    /// is the alternative the codec itself may return for the same
    /// condition; a real nghttp3-style codec uses the latter).
    fn pull_response(&self, stream_id: i64, max_vecs: usize) -> (Vec<Bytes>, bool);
}

/// The HTTP/3 codec contract required by the bridge.
///
/// A single instance is created per connection in server mode once the QUIC
/// handshake completes (`ConnectionState::on_connected`), and is driven
/// exclusively under that connection's mutex.
pub trait Http3Codec: Send {
    /// Construct a new server-mode codec instance with default settings.
    fn new_server() -> Self
    where
        Self: Sized;

    /// Bind the connection's locally opened control stream id.
    fn bind_control_stream(&mut self, stream_id: i64);

    /// Bind the connection's locally opened QPACK encoder/decoder stream
    /// ids.
    fn bind_qpack_streams(&mut self, encoder_id: i64, decoder_id: i64);

    /// Associate opaque per-stream user data (here, nothing beyond the id
    /// itself — the bridge resolves streams through its own registry, but
    /// the call is kept to mirror the nghttp3 contract precisely).
    fn set_stream_user_data(&mut self, stream_id: i64);

    /// Feed inbound bytes for `stream_id` to the codec, invoking `cb` for
    /// every decoded event. `fin` marks the final read for this stream.
    fn read_stream(
        &mut self,
        stream_id: i64,
        data: &[u8],
        fin: bool,
        cb: &mut dyn Http3Callbacks,
    ) -> Result<ReadOutcome, CodecError>;

    /// Submit response headers (and optionally mark the response finished
    /// with no body) for `stream_id`. `src` is consulted by subsequent
    /// `writev_stream` calls to pull body bytes.
    fn submit_response(&mut self, stream_id: i64, headers: HeaderList, fin: bool);

    /// Resume a stream previously paused by a would-block `pull_response`
    /// result, so the next flush retries it.
    fn resume_stream(&mut self, stream_id: i64);

    /// Pull the next batch of outbound vectors from the codec, consulting
    /// `src` for streams with pending response bodies. Returns `None` when
    /// the codec has nothing left to write in this call.
    fn writev_stream(&mut self, src: &dyn ResponseSource) -> Option<WritevResult>;

    /// Inform the codec that `n` bytes previously returned from
    /// `writev_stream` for `stream_id` have been accepted by the transport.
    fn add_write_offset(&mut self, stream_id: i64, n: usize);
}
