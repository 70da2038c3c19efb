//! The application boundary (§4.H).

use crate::buffer::HeaderList;
use crate::server::StreamHandle;
use bytes::Bytes;

/// The request-handling contract the bridge dispatches decoded events to.
///
/// All three methods run on the executor thread (never on a transport
/// worker thread) and must not block it for long, since they run
/// synchronously inside [`crate::server::EventQueue::drain`]. Per §7,
/// any error returned here is logged via `tracing::error!` and swallowed —
/// it must not prevent subsequent queued events from draining.
pub trait Application: Send + Sync + 'static {
    /// A complete request header block was decoded for `stream`.
    fn on_headers(&self, stream: StreamHandle, headers: HeaderList) -> Result<(), AppError>;

    /// A chunk of request body was decoded for `stream`.
    fn on_data(&self, stream: StreamHandle, data: Bytes) -> Result<(), AppError>;

    /// The request's send side has ended for `stream`.
    fn on_fin(&self, stream: StreamHandle) -> Result<(), AppError>;
}

/// An error returned from an [`Application`] callback.
///
/// Opaque to the bridge beyond its `Display` impl: the core only logs it
/// (§7 error kind 5), it never inspects the cause chain.
#[derive(Debug, thiserror::Error)]
#[error("application callback failed: {0}")]
pub struct AppError(pub String);

impl AppError {
    /// Wrap any displayable cause as an [`AppError`].
    pub fn new(msg: impl std::fmt::Display) -> Self {
        Self(msg.to_string())
    }
}
