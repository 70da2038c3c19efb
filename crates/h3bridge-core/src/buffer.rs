//! Owned byte buffers and header-list primitives (component A).
//!
//! The only subtlety here is buffer lifetime across the transport boundary:
//! any bytes handed to [`crate::transport::QuicTransport::stream_send`] must
//! stay valid until the transport is done with them. The original C glue
//! achieved that with a manually freed `SendContext`; in Rust we get the same
//! guarantee for free by moving ownership of a [`SendContext`] into the
//! transport call and letting `Drop` release the buffers whenever the
//! transport is finished with them (immediately for a synchronous fake,
//! after the real write completes for an async binding).

use bytes::Bytes;

/// An owned `(name, value)` header pair.
///
/// Headers are kept in arrival order; [`HeaderList`] is a thin alias over a
/// `Vec` rather than a hand-rolled linked list, since Rust's `Vec` already
/// gives us an ordered, owned sequence without the bookkeeping the original
/// head/tail pointers existed to provide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Header field name, exactly as decoded.
    pub name: Bytes,
    /// Header field value, exactly as decoded.
    pub value: Bytes,
}

impl Header {
    /// Construct a header from anything that converts into [`Bytes`].
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// An ordered collection of headers, preserved in decode order.
pub type HeaderList = Vec<Header>;

/// A single chunk of response body, with a cursor tracking how much of it
/// has already been handed to the codec.
#[derive(Debug, Clone)]
pub struct ResponseChunk {
    data: Bytes,
    sent: usize,
}

impl ResponseChunk {
    /// Wrap a fresh, entirely-unsent chunk.
    pub fn new(data: Bytes) -> Self {
        Self { data, sent: 0 }
    }

    /// Bytes of this chunk that have not yet been consumed.
    pub fn remaining(&self) -> Bytes {
        self.data.slice(self.sent..)
    }

    /// Whether every byte of this chunk has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.sent >= self.data.len()
    }

    /// Mark `n` additional bytes as consumed.
    pub fn advance(&mut self, n: usize) {
        self.sent = (self.sent + n).min(self.data.len());
    }
}

/// An owned bundle of outbound buffers tied to a single transport send.
///
/// This is the Rust analogue of the original `SendContext`: the transport
/// implementation takes ownership of one of these per `stream_send` call and
/// drops it — freeing every buffer exactly once — whenever that send truly
/// completes. There is deliberately no explicit "free" method: ownership
/// transfer plus `Drop` is the whole mechanism.
#[derive(Debug, Default)]
pub struct SendContext {
    /// The buffers making up this send, in order.
    pub buffers: Vec<Bytes>,
}

impl SendContext {
    /// Wrap a batch of buffers for a single send call.
    pub fn new(buffers: Vec<Bytes>) -> Self {
        Self { buffers }
    }

    /// Total length of all buffers in this context.
    pub fn total_len(&self) -> usize {
        self.buffers.iter().map(Bytes::len).sum()
    }
}
