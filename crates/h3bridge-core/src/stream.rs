//! Per-stream request-accumulation and response-emission state (component B).

use crate::buffer::{Header, HeaderList, ResponseChunk};
use bytes::Bytes;
use parking_lot::Mutex;

/// Role a stream plays, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRole {
    /// This stream is unidirectional (peer- or locally-initiated).
    pub is_unidirectional: bool,
    /// This stream is one of the connection's control/QPACK streams, never
    /// a request stream. Control-family streams never receive application
    /// data events and never carry FIN on their outbound sends (§4.G, §8.6).
    pub is_control_family: bool,
}

impl StreamRole {
    /// The role of a bidirectional, peer-initiated request stream.
    pub fn request() -> Self {
        Self {
            is_unidirectional: false,
            is_control_family: false,
        }
    }

    /// The role of one of the connection's three locally opened unidirectional
    /// control/QPACK streams.
    pub fn control_family() -> Self {
        Self {
            is_unidirectional: true,
            is_control_family: true,
        }
    }
}

#[derive(Debug, Default)]
struct Mutable {
    has_error: bool,
    temp_headers: HeaderList,
    pending: std::collections::VecDeque<ResponseChunk>,
    finished: Vec<ResponseChunk>,
    response_fin: bool,
}

/// Per-stream state, shared via `Arc` between the transport/codec adapters
/// and any opaque [`crate::server::StreamHandle`] held by the application.
///
/// Per spec invariants: once `has_error` is set no further inbound bytes
/// reach the codec for this stream; `response_fin` only ever transitions
/// false → true; every response chunk is in exactly one of {pending,
/// finished, freed}.
#[derive(Debug)]
pub struct StreamState {
    stream_id: i64,
    role: StreamRole,
    inner: Mutex<Mutable>,
}

impl StreamState {
    /// Create a new, empty stream state for `stream_id`.
    pub fn new(stream_id: i64, role: StreamRole) -> Self {
        Self {
            stream_id,
            role,
            inner: Mutex::new(Mutable::default()),
        }
    }

    /// This stream's QUIC stream id.
    pub fn stream_id(&self) -> i64 {
        self.stream_id
    }

    /// This stream's fixed role.
    pub fn role(&self) -> StreamRole {
        self.role
    }

    /// Whether this stream has been marked failed by a codec error.
    pub fn has_error(&self) -> bool {
        self.inner.lock().has_error
    }

    /// Mark this stream failed; no further inbound bytes should be fed to
    /// the codec for it (enforced by callers, not by this type).
    pub fn mark_error(&self) {
        self.inner.lock().has_error = true;
    }

    /// Append a decoded header to the accumulating temp list.
    pub fn append_header(&self, name: Bytes, value: Bytes) {
        self.inner.lock().temp_headers.push(Header::new(name, value));
    }

    /// Detach the accumulated header list for event emission, leaving the
    /// temp list empty.
    pub fn take_headers(&self) -> HeaderList {
        std::mem::take(&mut self.inner.lock().temp_headers)
    }

    /// Enqueue a response body chunk onto the pending FIFO.
    pub fn enqueue_response_chunk(&self, data: Bytes) {
        self.inner.lock().pending.push_back(ResponseChunk::new(data));
    }

    /// Mark the response as finished. Monotone: once true, stays true.
    pub fn set_response_fin(&self) {
        self.inner.lock().response_fin = true;
    }

    /// Whether the response has been marked finished.
    pub fn is_response_fin(&self) -> bool {
        self.inner.lock().response_fin
    }

    /// Pull up to `max_vecs` unsent response vectors.
    ///
    /// Returns `(vecs, fin)`. An empty `vecs` with `fin == true` signals
    /// EOF; an empty `vecs` with `fin == false` signals would-block (there
    /// is currently nothing to send and the response is not finished).
    /// Chunks fully consumed by this call move from pending to finished,
    /// to be freed by a later [`StreamState::reap_finished`] call once the
    /// flush engine has copied their bytes out (§9 two-phase freeing).
    pub fn pull_response(&self, max_vecs: usize) -> (Vec<Bytes>, bool) {
        let mut inner = self.inner.lock();
        let mut vecs = Vec::with_capacity(max_vecs.min(inner.pending.len()));
        while vecs.len() < max_vecs {
            let Some(chunk) = inner.pending.front() else {
                break;
            };
            if chunk.is_exhausted() {
                let chunk = inner.pending.pop_front().expect("front just checked");
                inner.finished.push(chunk);
                continue;
            }
            let remaining = chunk.remaining();
            let len = remaining.len();
            vecs.push(remaining);
            inner
                .pending
                .front_mut()
                .expect("front just checked")
                .advance(len);
        }
        let fin = vecs.is_empty() && inner.pending.is_empty() && inner.response_fin;
        (vecs, fin)
    }

    /// Free chunks that have moved to the finished list. Must only be
    /// called after the flush engine has copied their bytes into a stable
    /// allocation (§9).
    pub fn reap_finished(&self) {
        self.inner.lock().finished.clear();
    }

    /// Whether the pending response FIFO is empty and nothing is buffered.
    pub fn has_no_pending_response(&self) -> bool {
        self.inner.lock().pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_response_signals_would_block_when_empty_and_not_fin() {
        let s = StreamState::new(4, StreamRole::request());
        let (vecs, fin) = s.pull_response(16);
        assert!(vecs.is_empty());
        assert!(!fin);
    }

    #[test]
    fn pull_response_signals_eof_once_fin_and_drained() {
        let s = StreamState::new(4, StreamRole::request());
        s.enqueue_response_chunk(Bytes::from_static(b"hi"));
        s.set_response_fin();
        let (vecs, fin) = s.pull_response(16);
        assert_eq!(vecs.len(), 1);
        assert!(!fin);
        s.reap_finished();
        let (vecs2, fin2) = s.pull_response(16);
        assert!(vecs2.is_empty());
        assert!(fin2);
    }

    #[test]
    fn take_headers_empties_temp_list() {
        let s = StreamState::new(4, StreamRole::request());
        s.append_header(Bytes::from_static(b":method"), Bytes::from_static(b"GET"));
        let headers = s.take_headers();
        assert_eq!(headers.len(), 1);
        assert!(s.take_headers().is_empty());
    }

    #[test]
    fn response_fin_is_monotone() {
        let s = StreamState::new(4, StreamRole::request());
        assert!(!s.is_response_fin());
        s.set_response_fin();
        assert!(s.is_response_fin());
        s.set_response_fin();
        assert!(s.is_response_fin());
    }
}
