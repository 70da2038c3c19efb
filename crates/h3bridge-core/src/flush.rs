//! Drain the codec's write side into QUIC sends (component G).
//!
//! `flush_stream` used to stop as soon as `writev_stream` handed back a
//! batch for some other stream, on the theory that batch could just be
//! skipped until the caller who cared about it flushed again. It can't be:
//! pulling a batch already mutates codec/`StreamState` side effects
//! (`headers_sent`, chunk offsets), so a skipped batch is bytes lost, not
//! bytes deferred. `flush_stream` now drains exactly like
//! `flush_connection` — the `requested_stream` parameter only labels the
//! trace below, since the codec itself decides which stream's data to hand
//! back on each call and both entry points must send whatever it returns.

use crate::buffer::SendContext;
use crate::codec::{ResponseSource, WritevResult};
use crate::codec::Http3Codec;
use crate::connection::ConnectionState;
use crate::transport::QuicTransport;
use tracing::{trace, warn};

struct RegistrySource<'a, T: QuicTransport, C: Http3Codec> {
    conn: &'a ConnectionState<T, C>,
}

impl<T: QuicTransport, C: Http3Codec> ResponseSource for RegistrySource<'_, T, C> {
    fn pull_response(&self, stream_id: i64, max_vecs: usize) -> (Vec<bytes::Bytes>, bool) {
        match self.conn.lookup_stream(stream_id) {
            Some(state) => state.pull_response(max_vecs),
            None => (Vec::new(), false),
        }
    }
}

/// Drain as many outbound batches as the codec has ready, up to
/// `max_batches`, writing each to the transport and reaping finished
/// response chunks behind it (§4.G steps 1-4).
///
/// Termination rule: stop when the codec returns no batch, or a batch with
/// zero bytes and no FIN (would-block). `max_batches` is the defensive
/// iteration cap against a misbehaving codec (§4.G).
pub fn flush_connection<T: QuicTransport, C: Http3Codec>(
    conn: &ConnectionState<T, C>,
    max_batches: usize,
) {
    let src = RegistrySource { conn };

    for _ in 0..max_batches {
        let Some(WritevResult {
            stream_id,
            vecs,
            flags,
        }) = conn.writev_stream(&src)
        else {
            break;
        };

        if vecs.is_empty() && !flags.fin {
            break;
        }

        let total_len: usize = vecs.iter().map(bytes::Bytes::len).sum();
        conn.add_write_offset(stream_id, total_len);

        let Some(handle) = conn.lookup_stream_handle(stream_id) else {
            warn!(stream_id, "flush: no transport handle for stream, dropping batch");
            continue;
        };
        let role = conn.stream_role(stream_id).unwrap_or_else(crate::stream::StreamRole::request);

        trace!(stream_id, bytes = total_len, fin = flags.fin, "flushing batch");
        let ctx = SendContext::new(vecs);
        conn.transport_send(&handle, role, ctx, flags.fin);

        if let Some(state) = conn.lookup_stream(stream_id) {
            state.reap_finished();
        }
    }
}

/// Flush outbound batches prompted by new response data on
/// `requested_stream`, after a `send_data`/`send_headers` call. The codec
/// may interleave other streams' ready batches into the same drain; every
/// one of them has already mutated state the moment `writev_stream`
/// returned it, so every batch pulled here is sent, exactly like
/// [`flush_connection`] (§4.G, testable property 4, scenario S3).
pub fn flush_stream<T: QuicTransport, C: Http3Codec>(
    conn: &ConnectionState<T, C>,
    requested_stream: i64,
    max_batches: usize,
) {
    trace!(requested_stream, "flush_stream draining via flush_connection");
    flush_connection(conn, max_batches);
}
