//! # TLS Server Configuration
//!
//! Builds the rustls server configuration used when the negotiation pipeline
//! detects a TLS record. Advertised ALPN protocols follow the configured
//! transports so the negotiated name can select HTTP/2 or HTTP/1.1.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::{Certificate, PrivateKey, ServerConfig};
use rustls_pemfile::{certs, pkcs8_private_keys, rsa_private_keys};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, instrument};

use crate::config::TlsConfig;
use crate::error::{ProtocolError, Result};
use crate::negotiation::http::{ALPN_HTTP11, ALPN_HTTP2};
use crate::transport::Transport;

/// TLS server configuration
pub struct TlsServerConfig {
    cert_path: String,
    key_path: String,
    alpn_protocols: Vec<Vec<u8>>,
}

/// ALPN names to advertise for a set of transports, most preferred first.
pub fn alpn_for(transports: &[Transport]) -> Vec<Vec<u8>> {
    let mut protocols = Vec::new();
    if transports.contains(&Transport::Http2) {
        protocols.push(ALPN_HTTP2.to_vec());
    }
    if transports
        .iter()
        .any(|t| matches!(t, Transport::Http | Transport::WebSocket))
    {
        protocols.push(ALPN_HTTP11.to_vec());
    }
    protocols
}

impl TlsServerConfig {
    pub fn new<P: AsRef<std::path::Path>>(cert_path: P, key_path: P) -> Self {
        Self {
            cert_path: cert_path.as_ref().to_string_lossy().to_string(),
            key_path: key_path.as_ref().to_string_lossy().to_string(),
            alpn_protocols: Vec::new(),
        }
    }

    /// Build from the `[server.tls]` table.
    ///
    /// # Errors
    /// Returns `ProtocolError::ConfigError` if TLS is enabled without both paths
    pub fn from_config(config: &TlsConfig, transports: &[Transport]) -> Result<Self> {
        match (&config.cert_path, &config.key_path) {
            (Some(cert), Some(key)) => Ok(Self::new(cert, key).with_alpn(alpn_for(transports))),
            _ => Err(ProtocolError::ConfigError(
                "TLS enabled but cert_path or key_path missing".into(),
            )),
        }
    }

    pub fn with_alpn(mut self, protocols: Vec<Vec<u8>>) -> Self {
        self.alpn_protocols = protocols;
        self
    }

    /// Load the TLS configuration from files
    pub fn load_server_config(&self) -> Result<ServerConfig> {
        let cert_file = File::open(&self.cert_path)
            .map_err(|e| ProtocolError::TlsError(format!("Failed to open cert file: {e}")))?;
        let mut cert_reader = BufReader::new(cert_file);
        let cert_chain = certs(&mut cert_reader)
            .map_err(|_| ProtocolError::TlsError("Failed to parse certificate".into()))?;
        let cert_chain: Vec<Certificate> = cert_chain.into_iter().map(Certificate).collect();

        let mut keys = self.read_keys(pkcs8_private_keys)?;
        if keys.is_empty() {
            keys = self.read_keys(rsa_private_keys)?;
        }
        if keys.is_empty() {
            return Err(ProtocolError::TlsError("No private keys found".into()));
        }
        let private_key = PrivateKey(keys.swap_remove(0));

        let mut config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(cert_chain, private_key)
            .map_err(|e| ProtocolError::TlsError(format!("TLS error: {e}")))?;
        config.alpn_protocols = self.alpn_protocols.clone();

        Ok(config)
    }

    fn read_keys(&self, parse: fn(&mut dyn std::io::BufRead) -> std::io::Result<Vec<Vec<u8>>>) -> Result<Vec<Vec<u8>>> {
        let key_file = File::open(&self.key_path)
            .map_err(|e| ProtocolError::TlsError(format!("Failed to open key file: {e}")))?;
        let mut key_reader = BufReader::new(key_file);
        parse(&mut key_reader).map_err(|_| ProtocolError::TlsError("Failed to parse private key".into()))
    }

    #[instrument(skip(self), fields(cert = %self.cert_path))]
    pub fn acceptor(&self) -> Result<TlsAcceptor> {
        let config = self.load_server_config()?;
        debug!(alpn = config.alpn_protocols.len(), "TLS acceptor ready");
        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpn_follows_transports() {
        assert!(alpn_for(&[Transport::Tcp]).is_empty());
        assert_eq!(alpn_for(&[Transport::Http]), vec![b"http/1.1".to_vec()]);
        assert_eq!(
            alpn_for(&[Transport::Http, Transport::Http2]),
            vec![b"h2".to_vec(), b"http/1.1".to_vec()]
        );
    }

    #[test]
    fn test_missing_files_reported() {
        let config = TlsServerConfig::new("/nonexistent/cert.pem", "/nonexistent/key.pem");
        assert!(matches!(config.load_server_config(), Err(ProtocolError::TlsError(_))));

        let disabled = TlsConfig::default();
        assert!(TlsServerConfig::from_config(&disabled, &[Transport::Tcp]).is_err());
    }
}
