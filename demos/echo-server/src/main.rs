//! A minimal binary exercising the bridge end to end: `h3bridge-quinn`'s
//! transport, the in-crate `FakeCodec` (standing in for a real HTTP/3 wire
//! codec, which is out of scope for this bridge), and a trivial application
//! that echoes every request's headers and body back to the caller.

use anyhow::Context;
use bytes::Bytes;
use h3bridge_core::testutil::FakeCodec;
use h3bridge_core::{AppError, Application, Http3Server, ImmediateExecutor, ServerConfig, StreamHandle};
use h3bridge_quinn::QuinnTransport;
use std::sync::Arc;
use tracing::info;

/// Echoes every decoded request straight back to its own stream: the
/// response headers mirror the request headers, body chunks are copied
/// verbatim, and the response ends exactly when the request does.
struct EchoApp;

impl Application for EchoApp {
    fn on_headers(&self, stream: StreamHandle, headers: h3bridge_core::buffer::HeaderList) -> Result<(), AppError> {
        info!(stream_id = stream.stream_id(), header_count = headers.len(), "echoing headers");
        stream.send_headers(headers, false);
        Ok(())
    }

    fn on_data(&self, stream: StreamHandle, data: Bytes) -> Result<(), AppError> {
        info!(stream_id = stream.stream_id(), len = data.len(), "echoing body chunk");
        stream.send_data(data, false);
        Ok(())
    }

    fn on_fin(&self, stream: StreamHandle) -> Result<(), AppError> {
        info!(stream_id = stream.stream_id(), "echoing end of stream");
        stream.send_data(Bytes::new(), true);
        Ok(())
    }
}

fn server_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    if let Ok(cert) = std::env::var("H3BRIDGE_CERT") {
        config.cert_path = cert;
    }
    if let Ok(key) = std::env::var("H3BRIDGE_KEY") {
        config.key_path = key;
    }
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let host = std::env::var("H3BRIDGE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("H3BRIDGE_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(4433);

    // `QuinnTransport` and `Http3Server` each need an `Arc` to the other, so
    // construction is two-phase: build the transport with no handler bound,
    // build the server over it, then bind the server as the transport's
    // handler before calling `start`.
    let transport = QuinnTransport::new();
    let app = Arc::new(EchoApp);
    let executor = Arc::new(ImmediateExecutor);
    let server = Http3Server::<QuinnTransport, FakeCodec, EchoApp, ImmediateExecutor>::new(
        transport.clone(),
        app,
        executor,
        server_config(),
    );
    transport.bind_handler(server.clone());

    server
        .start(&host, port)
        .with_context(|| format!("failed to start h3bridge echo server on {host}:{port}"))?;
    info!(%host, port, "echo server listening, press ctrl-c to stop");

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutting down");
    Ok(())
}
