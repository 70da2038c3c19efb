//! A [`quinn`]-based [`h3bridge_core::transport::QuicTransport`] binding.
//!
//! `quinn` is a callback-free, `async`/`await` QUIC implementation; the
//! core's transport contract is callback-driven (mirroring MsQuic). This
//! crate is the adapter: one task per accepted connection drives the
//! handshake future and the peer-stream accept loop, and one task per
//! accepted stream drives its read loop, each translating quinn's futures
//! into calls on the core's `ListenerEvents`/`ConnectionEvents`/`StreamEvents`
//! traits — the same shape as `salvo_core::conn::quinn`'s listener adapts
//! `quinn::Endpoint` to `salvo_core`'s own `Listener`/`Acceptor` traits.
//!
//! This crate does not implement a real HTTP/3 wire codec; it is exercised
//! against [`h3bridge_core::testutil::FakeCodec`] in its own tests, and by
//! `demos/echo-server` at runtime.

#![warn(missing_docs)]

mod credentials;
mod executor;
mod transport;

pub use credentials::CredentialError;
pub use executor::TokioExecutor;
pub use transport::{QuinnTransport, QuinnTransportError};
