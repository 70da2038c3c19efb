//! Server-wide configuration (component D, ambient "Configuration" concern).

/// Configuration accepted by [`crate::Http3Server::start`].
///
/// Carries the constants the spec fixes for the transport registration and
/// configuration steps, plus the credential paths and debug flag. Mirrors
/// the shape of `Http3Config`-style structs in the teacher's `conn` modules:
/// a plain data struct with a `Default` impl, not a builder, since every
/// field here is a fixed protocol or deployment parameter rather than a
/// fluent per-call option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// ALPN protocol identifiers offered during the TLS handshake, in
    /// preference order.
    pub alpn_protocols: Vec<Vec<u8>>,
    /// QUIC idle timeout, in milliseconds.
    pub idle_timeout_ms: u64,
    /// Maximum number of peer-initiated bidirectional streams.
    pub peer_bidi_stream_limit: u64,
    /// Maximum number of peer-initiated unidirectional streams.
    pub peer_uni_stream_limit: u64,
    /// Path to the PEM-encoded certificate chain.
    pub cert_path: String,
    /// Path to the PEM-encoded private key.
    pub key_path: String,
    /// Raise the bridge's own tracing target to `debug` when set.
    pub debug_mode: bool,
    /// Defensive cap on flush batches per `flush_connection`/`flush_stream`
    /// call, guarding against a misbehaving codec looping forever (§4.G).
    pub max_flush_batches: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            alpn_protocols: vec![b"h3".to_vec(), b"h3-29".to_vec()],
            idle_timeout_ms: 5000,
            peer_bidi_stream_limit: 100,
            peer_uni_stream_limit: 3,
            cert_path: "cert.pem".to_string(),
            key_path: "key.pem".to_string(),
            debug_mode: false,
            max_flush_batches: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.idle_timeout_ms, 5000);
        assert_eq!(cfg.peer_bidi_stream_limit, 100);
        assert_eq!(cfg.peer_uni_stream_limit, 3);
        assert_eq!(cfg.alpn_protocols, vec![b"h3".to_vec(), b"h3-29".to_vec()]);
        assert!(!cfg.debug_mode);
    }
}
