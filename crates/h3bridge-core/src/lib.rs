//! Transport-to-application bridge for an HTTP/3-over-QUIC server.
//!
//! This crate owns QUIC connections and streams, drives an HTTP/3 codec on
//! top of them, and exposes a small asynchronous request/response interface
//! to an application handler. The QUIC transport, the HTTP/3 wire codec,
//! and the application itself are all external collaborators defined as
//! trait boundaries ([`transport::QuicTransport`], [`codec::Http3Codec`],
//! [`handler::Application`]) rather than reimplemented here.
//!
//! See [`bridge::Http3Server`] for the entry point.

#![warn(missing_docs)]

pub mod bridge;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod flush;
pub mod handler;
pub mod server;
pub mod stream;
pub mod transport;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use bridge::Http3Server;
pub use config::ServerConfig;
pub use error::{BridgeError, CodecError};
pub use executor::{Executor, ImmediateExecutor};
pub use handler::{AppError, Application};
pub use server::StreamHandle;
pub use transport::QuicTransport;
