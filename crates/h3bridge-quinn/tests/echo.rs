//! Exercises `QuinnTransport` end to end over a real loopback QUIC
//! connection, pairing it with the core's `FakeCodec` (the same fake used by
//! `h3bridge-core`'s own `tests/scenarios.rs`) and a trivial echo
//! application, mirroring `demos/echo-server`.

use bytes::Bytes;
use h3bridge_core::buffer::{Header, HeaderList};
use h3bridge_core::testutil::wire;
use h3bridge_core::testutil::FakeCodec;
use h3bridge_core::{AppError, Application, Http3Server, ImmediateExecutor, ServerConfig, StreamHandle};
use h3bridge_quinn::QuinnTransport;
use std::net::UdpSocket;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct EchoApp;

impl Application for EchoApp {
    fn on_headers(&self, stream: StreamHandle, headers: HeaderList) -> Result<(), AppError> {
        stream.send_headers(headers, false);
        Ok(())
    }

    fn on_data(&self, stream: StreamHandle, data: Bytes) -> Result<(), AppError> {
        stream.send_data(data, false);
        Ok(())
    }

    fn on_fin(&self, stream: StreamHandle) -> Result<(), AppError> {
        stream.send_data(Bytes::new(), true);
        Ok(())
    }
}

fn unique_temp_path(suffix: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("h3bridge-quinn-test-{}-{}-{suffix}", std::process::id(), id))
}

/// Grab an ephemeral port from the OS, then release it immediately so
/// `quinn::Endpoint::server` can bind the same number. Same trick the
/// teacher's own quinn test harness uses via `Endpoint::server(.., "[::]:0")`
/// plus reading back `local_addr()`; we need the port up front here since
/// `QuicTransport::listen` takes a port rather than returning the bound one.
fn free_local_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0")
        .expect("bind ephemeral port")
        .local_addr()
        .expect("local addr")
        .port()
}

#[tokio::test]
async fn quinn_transport_echoes_request_over_real_connection() {
    let cert_key = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).expect("self-signed cert");
    let cert_pem = cert_key.cert.pem();
    let key_pem = cert_key.key_pair.serialize_pem();
    let cert_der = cert_key.cert.der().clone();

    let cert_path = unique_temp_path("cert.pem");
    let key_path = unique_temp_path("key.pem");
    std::fs::write(&cert_path, cert_pem).expect("write cert");
    std::fs::write(&key_path, key_pem).expect("write key");

    let port = free_local_port();
    let mut config = ServerConfig::default();
    config.alpn_protocols = vec![b"h3".to_vec()];
    config.cert_path = cert_path.to_string_lossy().into_owned();
    config.key_path = key_path.to_string_lossy().into_owned();

    let transport = QuinnTransport::new();
    let app = Arc::new(EchoApp);
    let executor = Arc::new(ImmediateExecutor);
    let server = Http3Server::<QuinnTransport, FakeCodec, EchoApp, ImmediateExecutor>::new(
        transport.clone(),
        app,
        executor,
        config,
    );
    transport.bind_handler(server.clone());
    server.start("127.0.0.1", port).expect("server start");

    // Give the spawned accept loop a moment to bind and start listening.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut roots = rustls::RootCertStore::empty();
    roots.add(cert_der).expect("trust self-signed cert");
    let mut client_crypto = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    client_crypto.alpn_protocols = vec![b"h3".to_vec()];
    let client_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(client_crypto).expect("quic client crypto");
    let client_config = quinn::ClientConfig::new(Arc::new(client_crypto));

    let mut client_endpoint = quinn::Endpoint::client("127.0.0.1:0".parse().unwrap()).expect("client endpoint");
    client_endpoint.set_default_client_config(client_config);

    let connection = tokio::time::timeout(
        Duration::from_secs(5),
        client_endpoint
            .connect(format!("127.0.0.1:{port}").parse().unwrap(), "localhost")
            .expect("connect")
    )
    .await
    .expect("handshake timed out")
    .expect("handshake failed");

    let (mut send, mut recv) = connection.open_bi().await.expect("open bi stream");

    let request_headers = vec![
        Header::new(&b":method"[..], &b"GET"[..]),
        Header::new(&b":path"[..], &b"/echo"[..]),
    ];
    let body = b"hello from the quinn transport test";
    let request_bytes = wire::encode_request(&request_headers, &[body], true);
    send.write_all(&request_bytes).await.expect("write request");
    send.finish().expect("finish request stream");

    let response_bytes = tokio::time::timeout(Duration::from_secs(5), recv.read_to_end(64 * 1024))
        .await
        .expect("response timed out")
        .expect("read response");

    let decoded = wire::decode_message(&response_bytes);
    assert_eq!(decoded.headers, request_headers);
    assert_eq!(decoded.body, Bytes::copy_from_slice(body));
    assert!(decoded.fin, "echoed response must end the stream");

    let _ = std::fs::remove_file(&cert_path);
    let _ = std::fs::remove_file(&key_path);
}
