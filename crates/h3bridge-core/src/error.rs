//! Error types for the bridge's own synchronous entry points.
//!
//! Per-connection and per-stream failures never surface here — they are
//! absorbed into [`crate::stream::StreamState::has_error`] or connection
//! teardown and reported through `tracing`, matching the propagation policy
//! described in the spec: transport callbacks never raise, they convert
//! failures into state flags. `BridgeError` only covers the startup path,
//! mirroring how `salvo_core::Error` and `salvo_http3::Error` separate a
//! leveled, causal error type from the ambient logging of recoverable
//! per-request failures.

/// Error returned synchronously from [`crate::Http3Server::start`].
///
/// This is the only error path in the bridge that is not swallowed and
/// logged: a failed startup leaves the server unusable and must be reported
/// to the caller.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Credential loading (certificate/key files) failed.
    #[error("failed to load TLS credentials from {cert_path} / {key_path}: {source}")]
    Credentials {
        /// Certificate file path that was attempted.
        cert_path: String,
        /// Private key file path that was attempted.
        key_path: String,
        /// Underlying transport error.
        source: BoxedTransportError,
    },

    /// The listener failed to open or start.
    #[error("failed to start listener on {host}:{port}: {source}")]
    Listener {
        /// Host the listener attempted to bind.
        host: String,
        /// Port the listener attempted to bind.
        port: u16,
        /// Underlying transport error.
        source: BoxedTransportError,
    },
}

/// A type-erased transport error, boxed so [`BridgeError`] does not need to
/// be generic over the transport implementation.
pub type BoxedTransportError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error surfaced from the HTTP/3 codec boundary (component F/G).
///
/// Per the required interface in the spec, codec errors are distinguished
/// between "would block" (not a failure — the stream has no response data
/// ready yet) and genuine callback failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CodecError {
    /// The codec has no more output right now but is not finished.
    #[error("codec would block")]
    WouldBlock,
    /// A codec callback reported failure (malformed frame, protocol
    /// violation, etc). The owning stream is marked failed; the connection
    /// is unaffected.
    #[error("codec callback failure: {0}")]
    CallbackFailure(String),
}

impl CodecError {
    /// Whether this error represents transient backpressure rather than a
    /// protocol violation.
    pub fn is_would_block(&self) -> bool {
        matches!(self, CodecError::WouldBlock)
    }
}
