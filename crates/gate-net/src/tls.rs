//! TLS termination for the WebSocket transport.
//!
//! Certificate chain and key are read from PEM files once, at server start.
//! Bad material is a fatal startup error.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::ring::default_provider;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

use crate::error::TlsError;

/// Installs the ring provider process-wide unless one is installed already.
fn ensure_crypto_provider() {
    let _ = CryptoProvider::install_default(default_provider());
}

/// Builds an acceptor from a PEM certificate chain and private key.
///
/// # Errors
///
/// - [`TlsError::Io`] if either file cannot be opened or parsed.
/// - [`TlsError::NoCertificates`] / [`TlsError::NoPrivateKey`] if a file
///   holds no usable PEM block.
/// - [`TlsError::Config`] if rustls rejects the pair.
pub fn load_acceptor(cert_file: &Path, key_file: &Path) -> Result<TlsAcceptor, TlsError> {
    ensure_crypto_provider();

    let certs = load_certificates(cert_file)?;
    let key = load_private_key(key_file)?;
    debug!(cert = %cert_file.display(), chain_len = certs.len(), "loaded TLS certificate chain");

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TlsError::Config(format!("failed to configure server cert: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(PathBuf::from(path)));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(PathBuf::from(path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_certificate_file_is_io_error() {
        let result = load_acceptor(
            Path::new("/nonexistent/cert.pem"),
            Path::new("/nonexistent/key.pem"),
        );
        assert!(matches!(result, Err(TlsError::Io { .. })));
    }

    #[test]
    fn test_file_without_pem_blocks_has_no_certificates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&cert, "not a certificate\n").expect("write cert");
        std::fs::write(&key, "not a key\n").expect("write key");

        let result = load_acceptor(&cert, &key);

        assert!(matches!(result, Err(TlsError::NoCertificates(_))));
    }
}
