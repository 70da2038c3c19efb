//! TLS credential loading from disk (cert chain + private key).

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Error loading or parsing TLS credentials.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// The certificate or key file could not be opened/read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// No certificates were found in the certificate file.
    #[error("no certificates found in {0}")]
    NoCertificates(String),
    /// No private key was found in the key file.
    #[error("no private key found in {0}")]
    NoPrivateKey(String),
    /// `rustls` rejected the loaded certificate/key pair.
    #[error("rustls rejected the loaded credentials: {0}")]
    Rustls(#[from] rustls::Error),
}

/// A loaded certificate chain and private key, ready to hand to
/// `rustls::ServerConfig`.
pub struct Credentials {
    /// DER-encoded certificate chain.
    pub cert_chain: Vec<rustls::pki_types::CertificateDer<'static>>,
    /// DER-encoded private key.
    pub private_key: rustls::pki_types::PrivateKeyDer<'static>,
}

/// Load a PEM certificate chain and private key from disk, matching the
/// `cert_path`/`key_path` fields on [`h3bridge_core::config::ServerConfig`].
pub fn load(cert_path: &str, key_path: &str) -> Result<Credentials, CredentialError> {
    let cert_chain = read_certs(cert_path)?;
    let private_key = read_key(key_path)?;
    Ok(Credentials { cert_chain, private_key })
}

fn read_certs(path: &str) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, CredentialError> {
    let file = File::open(Path::new(path)).map_err(|source| CredentialError::Io {
        path: path.to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| CredentialError::Io {
            path: path.to_string(),
            source,
        })?;
    if certs.is_empty() {
        return Err(CredentialError::NoCertificates(path.to_string()));
    }
    Ok(certs)
}

fn read_key(path: &str) -> Result<rustls::pki_types::PrivateKeyDer<'static>, CredentialError> {
    let file = File::open(Path::new(path)).map_err(|source| CredentialError::Io {
        path: path.to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| CredentialError::Io {
            path: path.to_string(),
            source,
        })?
        .ok_or_else(|| CredentialError::NoPrivateKey(path.to_string()))
}
